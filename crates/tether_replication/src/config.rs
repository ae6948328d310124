//! # Replication Configuration
//!
//! Tunables for the replication core, loaded once at startup from TOML.
//!
//! ```toml
//! stall_policy = "hold"
//! max_extrapolation_lag_secs = 0.25
//! jitter_buffer_delay_secs = 0.05
//! ```
//!
//! Every field is optional; missing fields take the defaults below.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tether_shared::UNIT_QUATERNION_TOLERANCE;

use crate::error::{ReplicationError, ReplicationResult};

/// What the rendered pose does once the interpolation reaches the target
/// and no newer sample has arrived.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StallPolicy {
    /// Stay at the target pose until the next sample.
    #[default]
    Hold,
    /// Keep moving along the last sample's velocity, capped by
    /// `max_stall_extrapolation_secs`.
    Extrapolate,
}

/// Replication tunables.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicationConfig {
    /// Behavior past the end of the interpolation interval.
    pub stall_policy: StallPolicy,
    /// Longest overrun `StallPolicy::Extrapolate` will project forward.
    pub max_stall_extrapolation_secs: f64,
    /// Lag values above this are clamped before dead reckoning.
    pub max_extrapolation_lag_secs: f64,
    /// Upper bound on the first interpolation interval after authority
    /// returns to the network, which spans the whole ownership period.
    pub max_interpolation_interval_secs: f64,
    /// EWMA weight of a new lag measurement (0-1].
    pub lag_smoothing: f64,
    /// Raw lag measurements above this are clamped.
    pub max_lag_secs: f64,
    /// Playout delay of the jitter buffer. Zero disables buffering.
    pub jitter_buffer_delay_secs: f64,
    /// Capacity of the per-entity jitter buffer.
    pub jitter_buffer_capacity: usize,
    /// Capacity of the cross-thread sample inbox.
    pub inbox_capacity: usize,
    /// Allowed deviation of `|q|` from 1.0 in received orientations.
    pub unit_tolerance: f32,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            stall_policy: StallPolicy::Hold,
            max_stall_extrapolation_secs: 0.25,
            max_extrapolation_lag_secs: 0.5,
            max_interpolation_interval_secs: 0.5,
            lag_smoothing: 0.1,
            max_lag_secs: 1.0,
            jitter_buffer_delay_secs: 0.0,
            jitter_buffer_capacity: 16,
            inbox_capacity: 1024,
            unit_tolerance: UNIT_QUATERNION_TOLERANCE,
        }
    }
}

impl ReplicationConfig {
    /// Parses a TOML document and validates it.
    pub fn from_toml_str(text: &str) -> ReplicationResult<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| ReplicationError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and parses a TOML config file.
    pub fn from_file(path: impl AsRef<Path>) -> ReplicationResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            ReplicationError::InvalidConfig(format!("{}: {e}", path.display()))
        })?;
        let config = Self::from_toml_str(&text)?;
        tracing::info!(path = %path.display(), stall_policy = ?config.stall_policy, "replication config loaded");
        Ok(config)
    }

    /// Checks ranges. Durations must be finite and non-negative, the
    /// interpolation bound and smoothing strictly positive.
    pub fn validate(&self) -> ReplicationResult<()> {
        let durations = [
            ("max_stall_extrapolation_secs", self.max_stall_extrapolation_secs),
            ("max_extrapolation_lag_secs", self.max_extrapolation_lag_secs),
            ("max_lag_secs", self.max_lag_secs),
            ("jitter_buffer_delay_secs", self.jitter_buffer_delay_secs),
        ];
        for (name, value) in durations {
            if !value.is_finite() || value < 0.0 {
                return Err(ReplicationError::InvalidConfig(format!(
                    "{name} must be a non-negative number, got {value}"
                )));
            }
        }

        if !self.max_interpolation_interval_secs.is_finite() || self.max_interpolation_interval_secs <= 0.0 {
            return Err(ReplicationError::InvalidConfig(format!(
                "max_interpolation_interval_secs must be positive, got {}",
                self.max_interpolation_interval_secs
            )));
        }
        if !(self.lag_smoothing > 0.0 && self.lag_smoothing <= 1.0) {
            return Err(ReplicationError::InvalidConfig(format!(
                "lag_smoothing must be in (0, 1], got {}",
                self.lag_smoothing
            )));
        }
        if self.jitter_buffer_capacity == 0 {
            return Err(ReplicationError::InvalidConfig(
                "jitter_buffer_capacity must be at least 1".to_string(),
            ));
        }
        if self.inbox_capacity == 0 {
            return Err(ReplicationError::InvalidConfig(
                "inbox_capacity must be at least 1".to_string(),
            ));
        }
        if !self.unit_tolerance.is_finite() || self.unit_tolerance <= 0.0 {
            return Err(ReplicationError::InvalidConfig(format!(
                "unit_tolerance must be positive, got {}",
                self.unit_tolerance
            )));
        }
        Ok(())
    }

    /// True when samples go through a playout buffer.
    #[must_use]
    pub fn jitter_buffer_enabled(&self) -> bool {
        self.jitter_buffer_delay_secs > 0.0
    }
}
