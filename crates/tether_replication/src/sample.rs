//! # Pose Samples
//!
//! The immutable snapshot a transport hands to the replication core.

use tether_shared::{Pose, Quaternion, Vec3};

use crate::error::{ReplicationError, ReplicationResult};

/// One pose snapshot captured by the owning process.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PoseSample {
    /// World-space position.
    pub position: Vec3,
    /// World-space orientation (unit quaternion).
    pub orientation: Quaternion,
    /// Sender's linear velocity at capture time. Zero when the sender has
    /// no physical velocity source.
    pub velocity: Vec3,
    /// Sender-synchronized clock at capture time, in seconds.
    pub server_time: f64,
}

impl PoseSample {
    /// Creates a sample with zero velocity.
    #[must_use]
    pub const fn new(position: Vec3, orientation: Quaternion, server_time: f64) -> Self {
        Self {
            position,
            orientation,
            velocity: Vec3::ZERO,
            server_time,
        }
    }

    /// Creates a sample from a pose with zero velocity.
    #[must_use]
    pub const fn from_pose(pose: Pose, server_time: f64) -> Self {
        Self::new(pose.position, pose.orientation, server_time)
    }

    /// Attaches the sender's velocity. `None` means "no velocity source".
    #[must_use]
    pub fn with_velocity(mut self, velocity: Option<Vec3>) -> Self {
        self.velocity = velocity.unwrap_or(Vec3::ZERO);
        self
    }

    /// Position and orientation as a pose.
    #[must_use]
    pub const fn pose(&self) -> Pose {
        Pose::new(self.position, self.orientation)
    }

    /// Checks the sample and returns it with its orientation renormalized.
    ///
    /// # Errors
    ///
    /// `InvalidSample` for any non-finite component, or an orientation whose
    /// norm is outside `1 ± unit_tolerance`.
    pub fn validated(self, unit_tolerance: f32) -> ReplicationResult<Self> {
        if !self.server_time.is_finite() {
            return Err(ReplicationError::InvalidSample { reason: "non-finite server time" });
        }
        if !self.position.is_finite() {
            return Err(ReplicationError::InvalidSample { reason: "non-finite position" });
        }
        if !self.velocity.is_finite() {
            return Err(ReplicationError::InvalidSample { reason: "non-finite velocity" });
        }
        if !self.orientation.is_finite() {
            return Err(ReplicationError::InvalidSample { reason: "non-finite orientation" });
        }
        if !self.orientation.is_unit(unit_tolerance) {
            return Err(ReplicationError::InvalidSample { reason: "orientation is not a unit quaternion" });
        }

        let orientation = self
            .orientation
            .normalized()
            .ok_or(ReplicationError::InvalidSample { reason: "degenerate orientation" })?;

        Ok(Self { orientation, ..self })
    }
}
