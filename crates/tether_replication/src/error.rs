//! # Replication Error Types
//!
//! All errors that can occur while replicating a remote transform.

use thiserror::Error;

use crate::session::SessionState;
use crate::EntityId;

/// Errors that can occur in the replication system.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ReplicationError {
    /// A sample carried a NaN/infinite component or a non-unit orientation.
    #[error("invalid pose sample: {reason}")]
    InvalidSample {
        /// What was wrong with it.
        reason: &'static str,
    },

    /// The estimated one-way lag was negative or not finite.
    #[error("invalid one-way lag estimate: {0}")]
    InvalidLag(f64),

    /// A network sample was fed to an entity this process owns.
    #[error("entity {0} is locally owned and cannot accept network samples")]
    LocallyOwned(EntityId),

    /// Ownership handoff requested in the wrong direction.
    #[error("authority conflict on entity {entity}: {reason}")]
    AuthorityConflict {
        /// The entity.
        entity: EntityId,
        /// Which transition was refused.
        reason: &'static str,
    },

    /// Entity id not present in the session.
    #[error("unknown entity: {0}")]
    UnknownEntity(EntityId),

    /// Entity id already spawned in the session.
    #[error("entity already spawned: {0}")]
    AlreadySpawned(EntityId),

    /// Spawn or sample routed through a session that is not connected.
    #[error("session not connected (state: {0:?})")]
    NotConnected(SessionState),

    /// Session state machine refused a transition.
    #[error("invalid session transition from {from:?} to {to:?}")]
    InvalidTransition {
        /// Current state.
        from: SessionState,
        /// Requested state.
        to: SessionState,
    },

    /// Wire buffer shorter than one encoded sample.
    #[error("truncated pose packet: need {needed} bytes, got {got}")]
    Truncated {
        /// Bytes required.
        needed: usize,
        /// Bytes supplied.
        got: usize,
    },

    /// Invalid configuration file.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type for replication operations.
pub type ReplicationResult<T> = Result<T, ReplicationError>;
