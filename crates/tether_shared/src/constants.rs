//! # Replication Constants
//!
//! Values both ends of the link agree on.

// =============================================================================
// NETWORK CONFIGURATION
// =============================================================================

/// Default pose send rate (samples per second).
pub const DEFAULT_TICK_RATE: u32 = 30;

/// Expected seconds between two pose samples at [`DEFAULT_TICK_RATE`].
pub const DEFAULT_TICK_INTERVAL_SECS: f64 = 1.0 / DEFAULT_TICK_RATE as f64;

// =============================================================================
// NUMERIC TOLERANCES
// =============================================================================

/// How far `|q|` may stray from 1.0 before a quaternion is ill-formed.
pub const UNIT_QUATERNION_TOLERANCE: f32 = 1.0e-3;

/// Below this `1 - |dot|`, slerp degrades to normalized lerp.
pub const SLERP_LINEAR_THRESHOLD: f32 = 1.0e-4;
