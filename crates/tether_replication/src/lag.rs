//! # Lag Estimation
//!
//! Estimates how long pose samples spend in flight.
//!
//! The transport keeps the sender's clock and ours synchronized, so the
//! transit time of one sample is simply `receipt_time - server_time`. Raw
//! transit times are noisy; the estimate handed to dead reckoning is an
//! exponentially weighted moving average, clamped to `[0, max_lag]`.
//!
//! Jitter is tracked the RTP way (RFC 3550 §6.4.1): a running mean of the
//! change in transit time between consecutive samples.

use crate::config::ReplicationConfig;

/// Gain of the RFC 3550 jitter filter.
const JITTER_GAIN: f64 = 1.0 / 16.0;

/// Smoothed one-way lag estimate for one sender.
#[derive(Clone, Debug)]
pub struct LagEstimator {
    /// EWMA weight of a new measurement.
    smoothing: f64,
    /// Clamp for raw measurements.
    max_lag: f64,
    /// Current estimate in seconds.
    estimate: Option<f64>,
    /// Running transit jitter in seconds.
    jitter: f64,
    /// Unclamped transit of the previous sample.
    last_transit: Option<f64>,
    /// Local receipt time of the previous sample.
    last_arrival: Option<f64>,
    /// Smoothed gap between arrivals.
    mean_interval: Option<f64>,
    /// Measurements folded in.
    observations: u64,
}

impl LagEstimator {
    /// Creates an estimator with an EWMA weight and a lag ceiling.
    #[must_use]
    pub fn new(smoothing: f64, max_lag: f64) -> Self {
        Self {
            smoothing: smoothing.clamp(f64::EPSILON, 1.0),
            max_lag: max_lag.max(0.0),
            estimate: None,
            jitter: 0.0,
            last_transit: None,
            last_arrival: None,
            mean_interval: None,
            observations: 0,
        }
    }

    /// Creates an estimator from the replication config.
    #[must_use]
    pub fn from_config(config: &ReplicationConfig) -> Self {
        Self::new(config.lag_smoothing, config.max_lag_secs)
    }

    /// Seeds the estimate with half a measured round trip, for transports
    /// that ping before the first pose arrives.
    pub fn seed_round_trip(&mut self, rtt_secs: f64) {
        if rtt_secs.is_finite() && rtt_secs >= 0.0 {
            self.estimate = Some((rtt_secs * 0.5).min(self.max_lag));
        }
    }

    /// Folds in one sample's timing and returns the updated estimate.
    ///
    /// Non-finite times are ignored.
    pub fn observe(&mut self, server_time: f64, local_receipt_time: f64) -> f64 {
        let transit = local_receipt_time - server_time;
        if !transit.is_finite() {
            return self.estimate();
        }

        if let Some(last) = self.last_transit {
            let delta = (transit - last).abs();
            self.jitter += (delta - self.jitter) * JITTER_GAIN;
        }
        self.last_transit = Some(transit);

        if let Some(prev) = self.last_arrival {
            let gap = local_receipt_time - prev;
            if gap > 0.0 {
                self.mean_interval = Some(match self.mean_interval {
                    Some(mean) => mean + (gap - mean) * self.smoothing,
                    None => gap,
                });
            }
        }
        self.last_arrival = Some(local_receipt_time);

        let raw = transit.clamp(0.0, self.max_lag);
        self.estimate = Some(match self.estimate {
            Some(current) => current + (raw - current) * self.smoothing,
            None => raw,
        });
        self.observations += 1;

        self.estimate()
    }

    /// Current one-way lag estimate in seconds. Zero before any data.
    #[must_use]
    pub fn estimate(&self) -> f64 {
        self.estimate.unwrap_or(0.0)
    }

    /// Running transit jitter in seconds.
    #[must_use]
    pub const fn jitter(&self) -> f64 {
        self.jitter
    }

    /// Smoothed seconds between arrivals, once two samples have arrived.
    #[must_use]
    pub const fn mean_interval(&self) -> Option<f64> {
        self.mean_interval
    }

    /// Number of measurements folded in.
    #[must_use]
    pub const fn observations(&self) -> u64 {
        self.observations
    }

    /// Forgets everything, e.g. on an ownership change.
    pub fn reset(&mut self) {
        *self = Self::new(self.smoothing, self.max_lag);
    }
}

impl Default for LagEstimator {
    fn default() -> Self {
        Self::from_config(&ReplicationConfig::default())
    }
}
