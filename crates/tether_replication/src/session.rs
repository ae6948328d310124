//! # Replication Session
//!
//! The explicit context every spawn, despawn and ownership change goes
//! through. There is no process-wide "already spawned" flag: whether an
//! entity exists is a question for the session that owns it, and a
//! disconnect tears every entity down with it.
//!
//! ## Lifecycle
//!
//! ```text
//!   Disconnected ──connect()──► Connecting ──on_connected()──► Connected
//!        ▲                                                        │
//!        └────────────────────── disconnect() ◄───────────────────┘
//!                               (drops every entity)
//! ```
//!
//! ## Clock
//!
//! Every `now` / `receipt_time` passed to a session is on the
//! transport-synchronized clock, the same one `server_time` is stamped with.

use std::collections::BTreeMap;

use tether_shared::Pose;

use crate::authority::ReplicatedEntity;
use crate::config::ReplicationConfig;
use crate::error::{ReplicationError, ReplicationResult};
use crate::inbox::SampleInbox;
use crate::interpolation::SampleOutcome;
use crate::jitter::{BufferedSample, JitterBuffer, JitterPush};
use crate::sample::PoseSample;
use crate::EntityId;

/// Connection state of a session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SessionState {
    /// Not connected; no entities.
    #[default]
    Disconnected,
    /// Handshake in progress.
    Connecting,
    /// Receiving samples.
    Connected,
}

/// Sample counters for one session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Samples that became a target.
    pub accepted: u64,
    /// Samples held in a jitter buffer.
    pub buffered: u64,
    /// Samples with an already-seen server time.
    pub duplicate: u64,
    /// Samples older than the current target.
    pub stale: u64,
    /// Samples refused with an error.
    pub rejected: u64,
}

impl SessionStats {
    fn record(&mut self, outcome: &ReplicationResult<SampleOutcome>) {
        match outcome {
            Ok(SampleOutcome::Accepted) => self.accepted += 1,
            Ok(SampleOutcome::Buffered) => self.buffered += 1,
            Ok(SampleOutcome::Duplicate) => self.duplicate += 1,
            Ok(SampleOutcome::Stale) => self.stale += 1,
            Err(_) => self.rejected += 1,
        }
    }
}

/// An entity plus its optional playout buffer.
#[derive(Debug)]
struct Slot {
    entity: ReplicatedEntity,
    jitter: Option<JitterBuffer>,
}

impl Slot {
    /// Applies a sample released from the jitter buffer at `now`. The time
    /// it sat in the buffer is added to the in-flight lag.
    fn apply_released(&mut self, held: BufferedSample, now: f64) -> ReplicationResult<SampleOutcome> {
        let base = self.entity.lag().map_or(0.0, crate::lag::LagEstimator::estimate);
        let held_for = (now - held.receipt_time).max(0.0);
        self.entity.on_pose_sample_with_lag(held.sample, base + held_for)
    }
}

/// Owns every replicated entity of one connection.
#[derive(Debug)]
pub struct Session {
    config: ReplicationConfig,
    state: SessionState,
    entities: BTreeMap<EntityId, Slot>,
    stats: SessionStats,
}

impl Session {
    /// Creates a disconnected session.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` if the config fails validation.
    pub fn new(config: ReplicationConfig) -> ReplicationResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            state: SessionState::Disconnected,
            entities: BTreeMap::new(),
            stats: SessionStats::default(),
        })
    }

    /// Config in effect.
    #[must_use]
    pub const fn config(&self) -> &ReplicationConfig {
        &self.config
    }

    /// Connection state.
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Sample counters.
    #[must_use]
    pub const fn stats(&self) -> SessionStats {
        self.stats
    }

    /// Number of known entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// True when no entity is known.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// True when `id` is spawned.
    #[must_use]
    pub fn contains(&self, id: EntityId) -> bool {
        self.entities.contains_key(&id)
    }

    /// Looks up an entity.
    #[must_use]
    pub fn entity(&self, id: EntityId) -> Option<&ReplicatedEntity> {
        self.entities.get(&id).map(|slot| &slot.entity)
    }

    // =========================================================================
    // LIFECYCLE
    // =========================================================================

    /// Starts connecting.
    ///
    /// # Errors
    ///
    /// `InvalidTransition` unless disconnected.
    pub fn connect(&mut self) -> ReplicationResult<()> {
        self.transition(SessionState::Disconnected, SessionState::Connecting)
    }

    /// Marks the handshake complete.
    ///
    /// # Errors
    ///
    /// `InvalidTransition` unless connecting.
    pub fn on_connected(&mut self) -> ReplicationResult<()> {
        self.transition(SessionState::Connecting, SessionState::Connected)
    }

    /// Disconnects and drops every entity.
    ///
    /// # Errors
    ///
    /// `InvalidTransition` if already disconnected.
    pub fn disconnect(&mut self) -> ReplicationResult<()> {
        if self.state == SessionState::Disconnected {
            return Err(ReplicationError::InvalidTransition {
                from: self.state,
                to: SessionState::Disconnected,
            });
        }
        let dropped = self.entities.len();
        self.entities.clear();
        self.state = SessionState::Disconnected;
        tracing::info!(dropped, "session disconnected");
        Ok(())
    }

    fn transition(&mut self, from: SessionState, to: SessionState) -> ReplicationResult<()> {
        if self.state != from {
            return Err(ReplicationError::InvalidTransition { from: self.state, to });
        }
        tracing::info!(from = ?from, to = ?to, "session transition");
        self.state = to;
        Ok(())
    }

    fn require_connected(&self) -> ReplicationResult<()> {
        if self.state == SessionState::Connected {
            Ok(())
        } else {
            Err(ReplicationError::NotConnected(self.state))
        }
    }

    // =========================================================================
    // SPAWN / DESPAWN
    // =========================================================================

    /// Registers an entity driven by the network, resting at `initial`.
    ///
    /// # Errors
    ///
    /// `NotConnected`, or `AlreadySpawned` for a known id.
    pub fn spawn_remote(&mut self, id: EntityId, initial: Pose) -> ReplicationResult<()> {
        let entity = ReplicatedEntity::remote(id, initial, &self.config);
        self.insert(entity)
    }

    /// Registers an entity this process owns.
    ///
    /// # Errors
    ///
    /// `NotConnected`, or `AlreadySpawned` for a known id.
    pub fn spawn_local(&mut self, id: EntityId, pose: Pose) -> ReplicationResult<()> {
        let entity = ReplicatedEntity::local(id, pose, &self.config);
        self.insert(entity)
    }

    fn insert(&mut self, entity: ReplicatedEntity) -> ReplicationResult<()> {
        self.require_connected()?;
        let id = entity.id();
        if self.entities.contains_key(&id) {
            return Err(ReplicationError::AlreadySpawned(id));
        }

        let jitter = self
            .config
            .jitter_buffer_enabled()
            .then(|| JitterBuffer::new(self.config.jitter_buffer_capacity, self.config.jitter_buffer_delay_secs));
        tracing::debug!(entity = %id, local = entity.is_locally_owned(), "entity spawned");
        self.entities.insert(id, Slot { entity, jitter });
        Ok(())
    }

    /// Forgets an entity.
    ///
    /// # Errors
    ///
    /// `UnknownEntity` if it was never spawned.
    pub fn despawn(&mut self, id: EntityId) -> ReplicationResult<ReplicatedEntity> {
        let slot = self.entities.remove(&id).ok_or(ReplicationError::UnknownEntity(id))?;
        tracing::debug!(entity = %id, "entity despawned");
        Ok(slot.entity)
    }

    // =========================================================================
    // SAMPLES
    // =========================================================================

    /// Routes a received sample to its entity.
    ///
    /// With a jitter buffer the sample is validated and held
    /// ([`SampleOutcome::Buffered`]); it reaches the core on a later
    /// [`Session::render`].
    ///
    /// # Errors
    ///
    /// `NotConnected`, `UnknownEntity`, `LocallyOwned`, `InvalidSample`.
    pub fn on_pose_sample(
        &mut self,
        id: EntityId,
        sample: PoseSample,
        receipt_time: f64,
    ) -> ReplicationResult<SampleOutcome> {
        let outcome = self.route_sample(id, sample, receipt_time);
        self.stats.record(&outcome);
        outcome
    }

    fn route_sample(&mut self, id: EntityId, sample: PoseSample, receipt_time: f64) -> ReplicationResult<SampleOutcome> {
        self.require_connected()?;
        let unit_tolerance = self.config.unit_tolerance;
        let slot = self.entities.get_mut(&id).ok_or(ReplicationError::UnknownEntity(id))?;

        let Some(jitter) = slot.jitter.as_mut() else {
            return slot.entity.on_pose_sample(sample, receipt_time);
        };

        let sample = sample.validated(unit_tolerance)?;
        slot.entity.observe_timing(sample.server_time, receipt_time)?;

        match jitter.push(sample, receipt_time) {
            JitterPush::Buffered => Ok(SampleOutcome::Buffered),
            JitterPush::Duplicate => Ok(SampleOutcome::Duplicate),
            JitterPush::Late => Ok(SampleOutcome::Stale),
            JitterPush::Overflow(oldest) => {
                let released = slot.apply_released(oldest, receipt_time);
                self.stats.record(&released);
                Ok(SampleOutcome::Buffered)
            }
        }
    }

    /// Applies everything a transport thread queued.
    ///
    /// Returns how many deliveries were processed; failures are passed to
    /// `on_error` so the caller can see transport problems.
    pub fn drain_inbox(
        &mut self,
        inbox: &SampleInbox,
        mut on_error: impl FnMut(EntityId, ReplicationError),
    ) -> usize {
        let mut processed = 0;
        for delivery in inbox.drain() {
            processed += 1;
            if let Err(e) = self.on_pose_sample(delivery.entity, delivery.sample, delivery.receipt_time) {
                on_error(delivery.entity, e);
            }
        }
        processed
    }

    // =========================================================================
    // RENDER
    // =========================================================================

    /// Once per frame: releases due jitter-buffered samples, then hands
    /// the pose of every remote entity to `apply`. Locally owned entities
    /// are skipped.
    pub fn render(&mut self, now: f64, mut apply: impl FnMut(EntityId, Pose)) {
        let stats = &mut self.stats;
        for (&id, slot) in &mut self.entities {
            if let Some(mut jitter) = slot.jitter.take() {
                jitter.drain_ready(now, |held| {
                    let outcome = slot.apply_released(held, now);
                    if let Err(e) = &outcome {
                        tracing::warn!(entity = %id, error = %e, "buffered sample rejected");
                    }
                    stats.record(&outcome);
                });
                slot.jitter = Some(jitter);
            }

            if let Some(pose) = slot.entity.sample(now) {
                apply(id, pose);
            }
        }
    }

    /// Pose of a single entity at `now`, `None` if local or unknown.
    pub fn sample(&mut self, id: EntityId, now: f64) -> Option<Pose> {
        self.entities.get_mut(&id)?.entity.sample(now)
    }

    // =========================================================================
    // OWNERSHIP
    // =========================================================================

    /// Takes local authority over `id`. Buffered network samples for it are
    /// discarded. Returns the pose the local simulation starts from.
    ///
    /// # Errors
    ///
    /// `UnknownEntity` or `AuthorityConflict`.
    pub fn acquire_authority(&mut self, id: EntityId) -> ReplicationResult<Pose> {
        let slot = self.entities.get_mut(&id).ok_or(ReplicationError::UnknownEntity(id))?;
        let pose = slot.entity.acquire_local_authority()?;
        if let Some(jitter) = slot.jitter.as_mut() {
            jitter.clear();
        }
        Ok(pose)
    }

    /// Records the local simulation's pose for an owned entity.
    ///
    /// # Errors
    ///
    /// `UnknownEntity` or `AuthorityConflict`.
    pub fn update_local_pose(&mut self, id: EntityId, pose: Pose) -> ReplicationResult<()> {
        self.entities
            .get_mut(&id)
            .ok_or(ReplicationError::UnknownEntity(id))?
            .entity
            .update_local_pose(pose)
    }

    /// Hands `id` back to the network, restarting replication at
    /// `current_actual_pose`.
    ///
    /// # Errors
    ///
    /// `UnknownEntity` or `AuthorityConflict`.
    pub fn release_authority(&mut self, id: EntityId, current_actual_pose: Pose) -> ReplicationResult<()> {
        self.entities
            .get_mut(&id)
            .ok_or(ReplicationError::UnknownEntity(id))?
            .entity
            .release_to_remote(current_actual_pose)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_shared::{Quaternion, Vec3};

    fn at(x: f32, time: f64) -> PoseSample {
        PoseSample::new(Vec3::new(x, 0.0, 0.0), Quaternion::IDENTITY, time)
    }

    fn connected(config: ReplicationConfig) -> Session {
        let mut session = Session::new(config).unwrap();
        session.connect().unwrap();
        session.on_connected().unwrap();
        session
    }

    #[test]
    fn test_lifecycle_transitions() {
        let mut session = Session::new(ReplicationConfig::default()).unwrap();
        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(session.on_connected().is_err());
        assert!(session.disconnect().is_err());

        session.connect().unwrap();
        assert!(session.connect().is_err());
        session.on_connected().unwrap();
        assert_eq!(session.state(), SessionState::Connected);
    }

    #[test]
    fn test_spawn_requires_connection() {
        let mut session = Session::new(ReplicationConfig::default()).unwrap();
        assert_eq!(
            session.spawn_remote(EntityId(1), Pose::IDENTITY),
            Err(ReplicationError::NotConnected(SessionState::Disconnected))
        );
    }

    #[test]
    fn test_double_spawn_and_unknown_despawn() {
        let mut session = connected(ReplicationConfig::default());
        session.spawn_remote(EntityId(1), Pose::IDENTITY).unwrap();
        assert_eq!(
            session.spawn_local(EntityId(1), Pose::IDENTITY),
            Err(ReplicationError::AlreadySpawned(EntityId(1)))
        );
        assert!(matches!(session.despawn(EntityId(2)), Err(ReplicationError::UnknownEntity(_))));
        assert!(session.despawn(EntityId(1)).is_ok());
        assert!(session.is_empty());
    }

    #[test]
    fn test_disconnect_drops_entities_and_allows_respawn() {
        let mut session = connected(ReplicationConfig::default());
        session.spawn_remote(EntityId(1), Pose::IDENTITY).unwrap();
        session.disconnect().unwrap();
        assert!(session.is_empty());

        session.connect().unwrap();
        session.on_connected().unwrap();
        assert!(session.spawn_remote(EntityId(1), Pose::IDENTITY).is_ok());
    }

    #[test]
    fn test_render_skips_local_entities() {
        let mut session = connected(ReplicationConfig::default());
        session.spawn_remote(EntityId(1), Pose::IDENTITY).unwrap();
        session.spawn_local(EntityId(2), Pose::IDENTITY).unwrap();
        session.on_pose_sample(EntityId(1), at(3.0, 1.0), 1.0).unwrap();

        let mut seen = Vec::new();
        session.render(1.0, |id, pose| seen.push((id, pose.position.x)));
        assert_eq!(seen, vec![(EntityId(1), 3.0)]);
    }

    #[test]
    fn test_stats_count_outcomes() {
        let mut session = connected(ReplicationConfig::default());
        session.spawn_remote(EntityId(1), Pose::IDENTITY).unwrap();
        session.spawn_local(EntityId(2), Pose::IDENTITY).unwrap();

        session.on_pose_sample(EntityId(1), at(0.0, 2.0), 2.0).unwrap();
        session.on_pose_sample(EntityId(1), at(0.0, 2.0), 2.0).unwrap();
        session.on_pose_sample(EntityId(1), at(0.0, 1.0), 2.0).unwrap();
        assert!(session.on_pose_sample(EntityId(2), at(0.0, 3.0), 3.0).is_err());
        assert!(session.on_pose_sample(EntityId(1), at(f32::NAN, 4.0), 4.0).is_err());

        let stats = session.stats();
        assert_eq!(stats.accepted, 1);
        assert_eq!(stats.duplicate, 1);
        assert_eq!(stats.stale, 1);
        assert_eq!(stats.rejected, 2);
    }

    #[test]
    fn test_jitter_buffer_reorders() {
        let config = ReplicationConfig {
            jitter_buffer_delay_secs: 0.1,
            ..ReplicationConfig::default()
        };
        let mut session = connected(config);
        session.spawn_remote(EntityId(1), Pose::IDENTITY).unwrap();

        // 2.0 overtakes 1.5 on the wire.
        assert_eq!(session.on_pose_sample(EntityId(1), at(1.0, 1.0), 1.05).unwrap(), SampleOutcome::Buffered);
        assert_eq!(session.on_pose_sample(EntityId(1), at(3.0, 2.0), 2.05).unwrap(), SampleOutcome::Buffered);
        assert_eq!(session.on_pose_sample(EntityId(1), at(2.0, 1.5), 2.06).unwrap(), SampleOutcome::Buffered);

        session.render(2.5, |_, _| {});
        let state = session.entity(EntityId(1)).unwrap().replication().unwrap();
        assert_eq!(state.previous_packet_time(), Some(1.5));
        assert_eq!(state.last_packet_time(), Some(2.0));
        assert_eq!(session.stats().stale, 0);
        assert_eq!(session.stats().accepted, 3);
    }

    #[test]
    fn test_jitter_buffer_still_rejects_bad_samples() {
        let config = ReplicationConfig {
            jitter_buffer_delay_secs: 0.1,
            ..ReplicationConfig::default()
        };
        let mut session = connected(config);
        session.spawn_remote(EntityId(1), Pose::IDENTITY).unwrap();

        let bad = PoseSample::new(Vec3::ZERO, Quaternion::new(0.0, 0.0, 0.0, 0.0), 1.0);
        assert!(matches!(
            session.on_pose_sample(EntityId(1), bad, 1.0),
            Err(ReplicationError::InvalidSample { .. })
        ));
    }

    #[test]
    fn test_acquire_clears_buffered_samples() {
        let config = ReplicationConfig {
            jitter_buffer_delay_secs: 0.1,
            ..ReplicationConfig::default()
        };
        let mut session = connected(config);
        session.spawn_remote(EntityId(1), Pose::IDENTITY).unwrap();
        session.on_pose_sample(EntityId(1), at(5.0, 1.0), 1.0).unwrap();

        let handed = session.acquire_authority(EntityId(1)).unwrap();
        assert_eq!(handed, Pose::IDENTITY);

        // The buffered sample must not leak into the local entity.
        session.render(10.0, |_, _| panic!("local entity rendered by replication"));
        assert_eq!(session.stats().accepted, 0);
    }

    #[test]
    fn test_drain_inbox_reports_errors() {
        let mut session = connected(ReplicationConfig::default());
        session.spawn_remote(EntityId(1), Pose::IDENTITY).unwrap();

        let (tx, inbox) = SampleInbox::bounded(8);
        tx.deliver(EntityId(1), at(1.0, 1.0), 1.0);
        tx.deliver(EntityId(5), at(1.0, 1.0), 1.0);

        let mut errors = Vec::new();
        let processed = session.drain_inbox(&inbox, |id, e| errors.push((id, e)));
        assert_eq!(processed, 2);
        assert_eq!(errors, vec![(EntityId(5), ReplicationError::UnknownEntity(EntityId(5)))]);
        assert_eq!(session.stats().accepted, 1);
    }
}
