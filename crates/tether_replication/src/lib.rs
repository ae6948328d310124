//! # TETHER Replication - Remote Transform Sync
//!
//! Smooth, lag-compensated transform replication for entities this process
//! does NOT own.
//!
//! ## Architecture
//!
//! - **Core**: [`ReplicationState`] interpolates from the pose on screen to
//!   the newest sample, dead-reckoned forward by the in-flight lag
//! - **Ordering**: duplicate and stale samples never rewind an entity
//! - **Authority**: [`ReplicatedEntity`] is either network-driven or locally
//!   simulated, never both
//! - **Session**: [`Session`] owns every entity of one connection; spawning
//!   and despawning go through it, not through process-wide flags
//! - **Transport glue**: [`SampleInbox`] for cross-thread delivery, a
//!   fixed-size wire form in [`codec`], an optional [`JitterBuffer`]
//!
//! ## Frame Loop
//!
//! ```text
//!  transport thread            main loop
//!  ────────────────            ─────────
//!  recv bytes                  session.drain_inbox(&inbox, ..)
//!  codec::decode                 └─► entity.on_pose_sample
//!  sender.deliver ──queue──►   session.render(now, |id, pose| ..)
//!                                └─► entity.sample(now)
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use tether_replication::{EntityId, PoseSample, ReplicationConfig, Session};
//!
//! let mut session = Session::new(ReplicationConfig::default())?;
//! session.connect()?;
//! session.on_connected()?;
//! session.spawn_remote(EntityId(7), Pose::IDENTITY)?;
//!
//! session.on_pose_sample(EntityId(7), sample, receipt_time)?;
//! session.render(now, |id, pose| scene.set_transform(id, pose));
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

use std::fmt;

pub mod authority;
pub mod codec;
pub mod config;
pub mod error;
pub mod inbox;
pub mod interpolation;
pub mod jitter;
pub mod lag;
pub mod sample;
pub mod session;
pub mod simulation;

// Re-exports for convenience
pub use authority::{Authority, ReplicatedEntity, SharedEntity};
pub use codec::{WirePoseSample, WIRE_SAMPLE_SIZE};
pub use config::{ReplicationConfig, StallPolicy};
pub use error::{ReplicationError, ReplicationResult};
pub use inbox::{Delivery, SampleInbox, SampleSender};
pub use interpolation::{InterpolationSettings, ReplicationState, SampleOutcome};
pub use jitter::{BufferedSample, JitterBuffer, JitterPush};
pub use lag::LagEstimator;
pub use sample::PoseSample;
pub use session::{Session, SessionState, SessionStats};
pub use simulation::{run_scenario, LinkStats, NetworkConditions, ScenarioConfig, SimulatedLink, SmoothnessReport};
pub use tether_shared::{Pose, Quaternion, Vec3};

/// Network identity of a replicated entity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId(pub u32);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}
