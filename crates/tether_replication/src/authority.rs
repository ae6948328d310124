//! # Authority
//!
//! Who drives an entity's transform: the network or the local simulation.
//!
//! ```text
//!            acquire_local_authority()  ──► returns last rendered pose
//!   ┌────────┐ ──────────────────────────► ┌────────┐
//!   │ Remote │                             │ Local  │
//!   └────────┘ ◄────────────────────────── └────────┘
//!            release_to_remote(actual_pose) ──► core restarts AT that pose
//! ```
//!
//! The two are variants of one enum, so there is no state in which both a
//! network pose and a simulated pose could be applied to the same entity.

use std::sync::Arc;

use parking_lot::Mutex;
use tether_shared::Pose;

use crate::config::ReplicationConfig;
use crate::error::{ReplicationError, ReplicationResult};
use crate::interpolation::{InterpolationSettings, ReplicationState, SampleOutcome};
use crate::lag::LagEstimator;
use crate::sample::PoseSample;
use crate::EntityId;

/// Current driver of an entity's transform.
#[derive(Clone, Debug)]
pub enum Authority {
    /// Replicated from network samples.
    Remote {
        /// Replication core.
        state: ReplicationState,
        /// One-way lag estimate for this entity's sender.
        lag: LagEstimator,
    },
    /// Simulated by this process.
    Local {
        /// Latest pose reported by the local simulation.
        pose: Pose,
        /// Newest server time replicated before authority was taken.
        high_water: Option<f64>,
    },
}

/// One entity known to this process.
#[derive(Clone, Debug)]
pub struct ReplicatedEntity {
    id: EntityId,
    authority: Authority,
    settings: InterpolationSettings,
    lag_template: LagEstimator,
}

impl ReplicatedEntity {
    /// An entity driven by the network, resting at `initial` until the
    /// first sample arrives.
    #[must_use]
    pub fn remote(id: EntityId, initial: Pose, config: &ReplicationConfig) -> Self {
        let settings = InterpolationSettings::from(config);
        let lag_template = LagEstimator::from_config(config);
        Self {
            id,
            authority: Authority::Remote {
                state: ReplicationState::new(initial, settings),
                lag: lag_template.clone(),
            },
            settings,
            lag_template,
        }
    }

    /// An entity this process owns.
    #[must_use]
    pub fn local(id: EntityId, pose: Pose, config: &ReplicationConfig) -> Self {
        Self {
            id,
            authority: Authority::Local { pose, high_water: None },
            settings: InterpolationSettings::from(config),
            lag_template: LagEstimator::from_config(config),
        }
    }

    /// Entity id.
    #[must_use]
    pub const fn id(&self) -> EntityId {
        self.id
    }

    /// Current authority.
    #[must_use]
    pub const fn authority(&self) -> &Authority {
        &self.authority
    }

    /// True when the local simulation drives this entity.
    #[must_use]
    pub const fn is_locally_owned(&self) -> bool {
        matches!(self.authority, Authority::Local { .. })
    }

    /// Replication core, when remote.
    #[must_use]
    pub const fn replication(&self) -> Option<&ReplicationState> {
        match &self.authority {
            Authority::Remote { state, .. } => Some(state),
            Authority::Local { .. } => None,
        }
    }

    /// Lag estimator, when remote.
    #[must_use]
    pub const fn lag(&self) -> Option<&LagEstimator> {
        match &self.authority {
            Authority::Remote { lag, .. } => Some(lag),
            Authority::Local { .. } => None,
        }
    }

    /// Feeds a sample received at `local_receipt_time` on the synchronized
    /// clock. The one-way lag is estimated from the timing.
    ///
    /// # Errors
    ///
    /// `LocallyOwned` if this process owns the entity, otherwise whatever
    /// [`ReplicationState::on_pose_sample`] reports.
    pub fn on_pose_sample(
        &mut self,
        sample: PoseSample,
        local_receipt_time: f64,
    ) -> ReplicationResult<SampleOutcome> {
        // A rejected sample must not reach the lag estimate.
        let sample = sample.validated(self.settings.unit_tolerance).map_err(|e| {
            tracing::warn!(entity = %self.id, server_time = sample.server_time, error = %e, "rejected sample");
            e
        })?;
        let lag = self.observe_timing(sample.server_time, local_receipt_time)?;
        self.on_pose_sample_with_lag(sample, lag)
    }

    /// Feeds a sample whose lag the caller already knows.
    ///
    /// # Errors
    ///
    /// See [`ReplicatedEntity::on_pose_sample`].
    pub fn on_pose_sample_with_lag(
        &mut self,
        sample: PoseSample,
        estimated_one_way_lag_secs: f64,
    ) -> ReplicationResult<SampleOutcome> {
        match &mut self.authority {
            Authority::Remote { state, .. } => state.on_pose_sample(sample, estimated_one_way_lag_secs),
            Authority::Local { .. } => Err(self.ownership_violation()),
        }
    }

    /// Folds one sample's timing into the lag estimate and returns it.
    ///
    /// # Errors
    ///
    /// `LocallyOwned` if this process owns the entity.
    pub fn observe_timing(&mut self, server_time: f64, local_receipt_time: f64) -> ReplicationResult<f64> {
        match &mut self.authority {
            Authority::Remote { lag, .. } => Ok(lag.observe(server_time, local_receipt_time)),
            Authority::Local { .. } => Err(self.ownership_violation()),
        }
    }

    fn ownership_violation(&self) -> ReplicationError {
        tracing::error!(entity = %self.id, "network sample for a locally owned entity");
        ReplicationError::LocallyOwned(self.id)
    }

    /// Pose to render at `now`, or `None` when the local simulation owns
    /// the transform and the core must stay out of the way.
    pub fn sample(&mut self, now: f64) -> Option<Pose> {
        match &mut self.authority {
            Authority::Remote { state, .. } => Some(state.sample(now)),
            Authority::Local { .. } => None,
        }
    }

    /// Takes authority from the network. Returns the pose last rendered,
    /// which the local simulation must start from.
    ///
    /// # Errors
    ///
    /// `AuthorityConflict` if already local.
    pub fn acquire_local_authority(&mut self) -> ReplicationResult<Pose> {
        let Authority::Remote { state, .. } = &self.authority else {
            return Err(ReplicationError::AuthorityConflict {
                entity: self.id,
                reason: "already locally owned",
            });
        };

        let pose = state.rendered_pose();
        let high_water = state.last_packet_time();
        self.authority = Authority::Local { pose, high_water };
        tracing::info!(entity = %self.id, "local authority acquired");
        Ok(pose)
    }

    /// Records the local simulation's latest pose.
    ///
    /// # Errors
    ///
    /// `AuthorityConflict` if the entity is remote.
    pub fn update_local_pose(&mut self, new_pose: Pose) -> ReplicationResult<()> {
        match &mut self.authority {
            Authority::Local { pose, .. } => {
                *pose = new_pose;
                Ok(())
            }
            Authority::Remote { .. } => Err(ReplicationError::AuthorityConflict {
                entity: self.id,
                reason: "remote entity has no local pose",
            }),
        }
    }

    /// Hands the entity back to the network. Replication restarts at
    /// `current_actual_pose`, so nothing snaps back to a pre-ownership pose.
    ///
    /// # Errors
    ///
    /// `AuthorityConflict` if already remote.
    pub fn release_to_remote(&mut self, current_actual_pose: Pose) -> ReplicationResult<()> {
        let Authority::Local { high_water, .. } = self.authority else {
            return Err(ReplicationError::AuthorityConflict {
                entity: self.id,
                reason: "already remote",
            });
        };

        let mut lag = self.lag_template.clone();
        lag.reset();
        self.authority = Authority::Remote {
            state: ReplicationState::resume_from(current_actual_pose, high_water, self.settings),
            lag,
        };
        tracing::info!(entity = %self.id, "authority released to network");
        Ok(())
    }
}

/// An entity shared between a transport thread and the render loop, one
/// mutex per entity.
#[derive(Clone, Debug)]
pub struct SharedEntity(Arc<Mutex<ReplicatedEntity>>);

impl SharedEntity {
    /// Wraps an entity.
    #[must_use]
    pub fn new(entity: ReplicatedEntity) -> Self {
        Self(Arc::new(Mutex::new(entity)))
    }

    /// Transport side: feeds a sample under the lock.
    ///
    /// # Errors
    ///
    /// See [`ReplicatedEntity::on_pose_sample`].
    pub fn on_pose_sample(&self, sample: PoseSample, local_receipt_time: f64) -> ReplicationResult<SampleOutcome> {
        self.0.lock().on_pose_sample(sample, local_receipt_time)
    }

    /// Render side: samples under the lock.
    #[must_use]
    pub fn sample(&self, now: f64) -> Option<Pose> {
        self.0.lock().sample(now)
    }

    /// Runs `f` with the entity locked.
    pub fn with<R>(&self, f: impl FnOnce(&mut ReplicatedEntity) -> R) -> R {
        f(&mut self.0.lock())
    }
}
