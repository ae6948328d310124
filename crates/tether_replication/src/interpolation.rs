//! # Transform Interpolation
//!
//! The replication core: one [`ReplicationState`] per remote entity turns
//! an irregular, lagged stream of [`PoseSample`]s into a pose that is
//! continuous from frame to frame.
//!
//! ## Timeline
//!
//! ```text
//! Sender ticks:   [A]───────────[B]───────────[C]
//!                   ╲ in flight   ╲
//! Receiver:          ▼ accept A    ▼ accept B
//!                    buffered=R    buffered=R'   (R = pose rendered right then)
//!                    target=A+v·lag target=B+v·lag
//! Render frames:  ·  ·  ·  ·  ·  ·  ·  ·  ·  ·
//!                    t = elapsed / (B.time - A.time), clamped to [0, 1]
//! ```
//!
//! The interpolation always starts from the pose that was on screen when
//! the sample arrived, so a new sample changes the direction of motion but
//! never makes the entity jump.

use tether_shared::{Pose, Vec3};

use crate::config::{ReplicationConfig, StallPolicy};
use crate::error::{ReplicationError, ReplicationResult};
use crate::sample::PoseSample;

/// What happened to a sample handed to [`ReplicationState::on_pose_sample`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SampleOutcome {
    /// Sample became the new target.
    Accepted,
    /// Same `server_time` as the current target; ignored.
    Duplicate,
    /// Older than the current target; discarded so the pose never rewinds.
    Stale,
    /// Held in a jitter buffer; reaches the core on a later render.
    Buffered,
}

impl SampleOutcome {
    /// True for [`SampleOutcome::Accepted`].
    #[must_use]
    pub const fn is_accepted(self) -> bool {
        matches!(self, Self::Accepted)
    }
}

/// Per-entity subset of [`ReplicationConfig`] the core reads every frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct InterpolationSettings {
    /// Behavior once `t` reaches 1.
    pub stall_policy: StallPolicy,
    /// Cap on the overrun projected by [`StallPolicy::Extrapolate`].
    pub max_stall_extrapolation_secs: f64,
    /// Cap on the lag used for dead reckoning.
    pub max_extrapolation_lag_secs: f64,
    /// Cap on the first interval after an ownership handoff.
    pub max_interpolation_interval_secs: f64,
    /// Orientation norm tolerance.
    pub unit_tolerance: f32,
}

impl From<&ReplicationConfig> for InterpolationSettings {
    fn from(config: &ReplicationConfig) -> Self {
        Self {
            stall_policy: config.stall_policy,
            max_stall_extrapolation_secs: config.max_stall_extrapolation_secs,
            max_extrapolation_lag_secs: config.max_extrapolation_lag_secs,
            max_interpolation_interval_secs: config.max_interpolation_interval_secs,
            unit_tolerance: config.unit_tolerance,
        }
    }
}

impl Default for InterpolationSettings {
    fn default() -> Self {
        Self::from(&ReplicationConfig::default())
    }
}

/// Replication state of one remote-controlled entity.
#[derive(Clone, Debug)]
pub struct ReplicationState {
    /// Latest sample, dead-reckoned forward by the estimated lag.
    target_pose: Pose,
    /// Velocity carried by the latest sample.
    target_velocity: Vec3,
    /// Interpolation start: the rendered pose when the latest sample arrived.
    buffered_pose: Pose,
    /// Last pose returned by `sample`.
    rendered_pose: Pose,
    /// Server time of the latest accepted sample.
    last_packet_time: Option<f64>,
    /// Server time of the sample before that.
    previous_packet_time: Option<f64>,
    /// Local seconds accumulated since the latest sample was accepted.
    elapsed_since_packet: f64,
    /// Local clock passed to the previous `sample` call. `None` right after
    /// a sample is accepted: the next call anchors there.
    last_sample_call: Option<f64>,
    /// `previous_packet_time` is a handoff high-water mark, not a packet
    /// this core interpolated from.
    resumed: bool,
    /// The current interval starts at a handoff high-water mark.
    interval_spans_handoff: bool,
    settings: InterpolationSettings,
}

impl ReplicationState {
    /// Creates state for an entity that just became relevant, resting at
    /// `initial`. The first sample snaps.
    #[must_use]
    pub fn new(initial: Pose, settings: InterpolationSettings) -> Self {
        Self::resume_from(initial, None, settings)
    }

    /// Re-creates state after this process gives up authority.
    ///
    /// `buffered = target = rendered = pose`. `high_water` is the newest
    /// server time seen before the handoff; older samples still in flight
    /// are discarded as stale.
    #[must_use]
    pub fn resume_from(pose: Pose, high_water: Option<f64>, settings: InterpolationSettings) -> Self {
        Self {
            target_pose: pose,
            target_velocity: Vec3::ZERO,
            buffered_pose: pose,
            rendered_pose: pose,
            last_packet_time: high_water,
            previous_packet_time: high_water,
            elapsed_since_packet: 0.0,
            last_sample_call: None,
            resumed: high_water.is_some(),
            interval_spans_handoff: false,
            settings,
        }
    }

    /// Applies a newly received sample.
    ///
    /// `estimated_one_way_lag_secs` is how long the sample spent in flight;
    /// the position is projected forward along the sample's velocity by
    /// that much. Orientation is carried through unchanged.
    ///
    /// # Errors
    ///
    /// - `InvalidLag` for a negative or non-finite lag.
    /// - `InvalidSample` for a malformed sample.
    ///
    /// On error the state is unchanged.
    pub fn on_pose_sample(
        &mut self,
        sample: PoseSample,
        estimated_one_way_lag_secs: f64,
    ) -> ReplicationResult<SampleOutcome> {
        if !estimated_one_way_lag_secs.is_finite() || estimated_one_way_lag_secs < 0.0 {
            tracing::warn!(lag = estimated_one_way_lag_secs, "rejected sample: invalid lag");
            return Err(ReplicationError::InvalidLag(estimated_one_way_lag_secs));
        }

        let sample = sample.validated(self.settings.unit_tolerance).map_err(|e| {
            tracing::warn!(server_time = sample.server_time, error = %e, "rejected sample");
            e
        })?;

        if let Some(last) = self.last_packet_time {
            if sample.server_time == last {
                tracing::debug!(server_time = sample.server_time, "duplicate sample ignored");
                return Ok(SampleOutcome::Duplicate);
            }
            if sample.server_time < last {
                tracing::debug!(
                    server_time = sample.server_time,
                    newest = last,
                    "stale sample discarded"
                );
                return Ok(SampleOutcome::Stale);
            }
        }

        let lag = estimated_one_way_lag_secs.min(self.settings.max_extrapolation_lag_secs);
        #[allow(clippy::cast_possible_truncation)]
        let extrapolated = sample.position + sample.velocity * lag as f32;

        self.buffered_pose = self.rendered_pose;
        self.target_pose = Pose::new(extrapolated, sample.orientation);
        self.target_velocity = sample.velocity;
        self.previous_packet_time = self.last_packet_time;
        self.last_packet_time = Some(sample.server_time);
        self.elapsed_since_packet = 0.0;
        // Frames rendered between the previous `sample` call and this
        // arrival are not counted, so each segment runs about one frame
        // past the packet interval. At 30 Hz sends and 60 fps the render
        // settles a few frames behind the newest target.
        self.last_sample_call = None;
        self.interval_spans_handoff = std::mem::take(&mut self.resumed);

        tracing::trace!(server_time = sample.server_time, lag, "sample accepted");
        Ok(SampleOutcome::Accepted)
    }

    /// Returns the pose to render at local time `now`. Call once per frame.
    ///
    /// A clock that runs backwards or is not finite advances nothing.
    pub fn sample(&mut self, now: f64) -> Pose {
        if now.is_finite() {
            match self.last_sample_call {
                Some(prev) if now > prev => {
                    self.elapsed_since_packet += now - prev;
                    self.last_sample_call = Some(now);
                }
                Some(_) => {}
                None => self.last_sample_call = Some(now),
            }
        }

        let pose = self.pose_at(self.elapsed_since_packet);
        self.rendered_pose = pose;
        pose
    }

    /// Pose after `elapsed` seconds since the latest sample.
    fn pose_at(&self, elapsed: f64) -> Pose {
        let Some(interval) = self.interval() else {
            return self.stalled_pose(elapsed);
        };

        if elapsed >= interval {
            return self.stalled_pose(elapsed - interval);
        }

        #[allow(clippy::cast_possible_truncation)]
        let t = (elapsed / interval).clamp(0.0, 1.0) as f32;
        Pose::lerp(self.buffered_pose, self.target_pose, t)
    }

    /// Pose once interpolation has finished, `overrun` seconds later.
    fn stalled_pose(&self, overrun: f64) -> Pose {
        match self.settings.stall_policy {
            StallPolicy::Hold => self.target_pose,
            StallPolicy::Extrapolate => {
                let overrun = overrun.min(self.settings.max_stall_extrapolation_secs);
                if overrun <= 0.0 {
                    return self.target_pose;
                }
                #[allow(clippy::cast_possible_truncation)]
                let position = self.target_pose.position + self.target_velocity * overrun as f32;
                Pose::new(position, self.target_pose.orientation)
            }
        }
    }

    /// Interpolation interval in seconds, or `None` when the two latest
    /// packet times do not define a positive interval.
    ///
    /// The first interval after an ownership handoff runs from the
    /// pre-handoff high-water mark and is capped at
    /// `max_interpolation_interval_secs`; every other interval is the raw
    /// gap between packets.
    #[must_use]
    pub fn interval(&self) -> Option<f64> {
        match (self.previous_packet_time, self.last_packet_time) {
            (Some(prev), Some(last)) if last > prev => {
                let gap = last - prev;
                if self.interval_spans_handoff {
                    Some(gap.min(self.settings.max_interpolation_interval_secs))
                } else {
                    Some(gap)
                }
            }
            _ => None,
        }
    }

    /// Current target (latest sample, velocity-adjusted).
    #[must_use]
    pub const fn target_pose(&self) -> Pose {
        self.target_pose
    }

    /// Current interpolation start.
    #[must_use]
    pub const fn buffered_pose(&self) -> Pose {
        self.buffered_pose
    }

    /// Last pose handed to the renderer.
    #[must_use]
    pub const fn rendered_pose(&self) -> Pose {
        self.rendered_pose
    }

    /// Server time of the latest accepted sample.
    #[must_use]
    pub const fn last_packet_time(&self) -> Option<f64> {
        self.last_packet_time
    }

    /// Server time of the sample accepted before the latest.
    #[must_use]
    pub const fn previous_packet_time(&self) -> Option<f64> {
        self.previous_packet_time
    }

    /// Local seconds since the latest sample was accepted.
    #[must_use]
    pub const fn elapsed_since_packet(&self) -> f64 {
        self.elapsed_since_packet
    }

    /// Settings in effect.
    #[must_use]
    pub const fn settings(&self) -> &InterpolationSettings {
        &self.settings
    }
}
