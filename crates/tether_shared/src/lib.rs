//! # TETHER Shared
//!
//! Common types used by both the pose sender and the replicating receiver.
//!
//! ## CRITICAL RULE
//!
//! This crate must NEVER depend on an engine or a renderer. Poses cross
//! the network as plain `#[repr(C)]` values; whoever applies them to a
//! visual representation lives outside this workspace.

#![deny(missing_docs)]
#![deny(unsafe_code)]

pub mod constants;
pub mod math;

pub use constants::{DEFAULT_TICK_RATE, DEFAULT_TICK_INTERVAL_SECS, UNIT_QUATERNION_TOLERANCE};
pub use math::{Pose, Quaternion, Vec3};
