//! # Jitter Buffer
//!
//! Optional playout delay in front of the replication core.
//!
//! Without buffering, a sample that overtakes an older one on the wire
//! makes the older one stale and it is thrown away. Holding samples for a
//! short delay lets late arrivals slot back into order first:
//!
//! ```text
//! Arrival order:   [1] [3] [2] [4]
//!                   │   │   │   │
//! Buffer (sorted): [1] [1 3] [1 2 3] [2 3 4] ...
//!                   │
//! Release when:    server_time <= now - delay  →  1, 2, 3, 4
//! ```
//!
//! The buffer never allocates after construction. When it is full the
//! oldest sample is released early rather than dropping the newest.

use crate::sample::PoseSample;

/// A sample waiting in the buffer, with the local time it arrived.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BufferedSample {
    /// The sample.
    pub sample: PoseSample,
    /// Local (synchronized) clock at receipt.
    pub receipt_time: f64,
}

/// Result of [`JitterBuffer::push`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum JitterPush {
    /// Held for playout.
    Buffered,
    /// Same server time as a held or released sample.
    Duplicate,
    /// Older than the last released sample; dropped.
    Late,
    /// Held, but the buffer was full: the returned oldest sample must be
    /// applied now.
    Overflow(BufferedSample),
}

/// Fixed-capacity playout buffer ordered by server time.
#[derive(Clone, Debug)]
pub struct JitterBuffer {
    /// Held samples, ascending by server time.
    samples: Vec<BufferedSample>,
    /// Maximum held samples.
    capacity: usize,
    /// Playout delay in seconds.
    delay: f64,
    /// Server time of the newest released sample.
    released_up_to: Option<f64>,
    /// Samples dropped as late or duplicate.
    dropped: u64,
}

impl JitterBuffer {
    /// Creates a buffer holding at most `capacity` samples for `delay`
    /// seconds each.
    #[must_use]
    pub fn new(capacity: usize, delay: f64) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: Vec::with_capacity(capacity),
            capacity,
            delay: delay.max(0.0),
            released_up_to: None,
            dropped: 0,
        }
    }

    /// Inserts a sample in server-time order.
    pub fn push(&mut self, sample: PoseSample, receipt_time: f64) -> JitterPush {
        let time = sample.server_time;

        if let Some(released) = self.released_up_to {
            if time == released {
                self.dropped += 1;
                return JitterPush::Duplicate;
            }
            if time < released {
                self.dropped += 1;
                return JitterPush::Late;
            }
        }

        let index = match self
            .samples
            .binary_search_by(|held| held.sample.server_time.total_cmp(&time))
        {
            Ok(_) => {
                self.dropped += 1;
                return JitterPush::Duplicate;
            }
            Err(index) => index,
        };

        if self.samples.len() == self.capacity {
            if index == 0 {
                // Older than everything held: releasing the oldest would
                // make this one late anyway.
                self.dropped += 1;
                return JitterPush::Late;
            }
            let oldest = self.samples.remove(0);
            self.released_up_to = Some(oldest.sample.server_time);
            self.samples.insert(index - 1, BufferedSample { sample, receipt_time });
            return JitterPush::Overflow(oldest);
        }

        self.samples.insert(index, BufferedSample { sample, receipt_time });
        JitterPush::Buffered
    }

    /// Releases, oldest first, every sample whose playout time has come.
    pub fn drain_ready(&mut self, server_now: f64, mut release: impl FnMut(BufferedSample)) {
        let cutoff = server_now - self.delay;
        let ready = self
            .samples
            .iter()
            .take_while(|held| held.sample.server_time <= cutoff)
            .count();
        self.release_front(ready, &mut release);
    }

    /// Releases everything, oldest first.
    pub fn drain_all(&mut self, mut release: impl FnMut(BufferedSample)) {
        self.release_front(self.samples.len(), &mut release);
    }

    fn release_front(&mut self, count: usize, release: &mut impl FnMut(BufferedSample)) {
        if count == 0 {
            return;
        }
        for held in self.samples.drain(..count) {
            self.released_up_to = Some(held.sample.server_time);
            release(held);
        }
    }

    /// Held sample count.
    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// True when nothing is held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Playout delay in seconds.
    #[must_use]
    pub const fn delay(&self) -> f64 {
        self.delay
    }

    /// Samples dropped as late or duplicate.
    #[must_use]
    pub const fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Drops everything, including the release high-water mark.
    pub fn clear(&mut self) {
        self.samples.clear();
        self.released_up_to = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_shared::{Quaternion, Vec3};

    fn at(time: f64) -> PoseSample {
        #[allow(clippy::cast_possible_truncation)]
        let x = time as f32;
        PoseSample::new(Vec3::new(x, 0.0, 0.0), Quaternion::IDENTITY, time)
    }

    fn drained(buffer: &mut JitterBuffer, now: f64) -> Vec<f64> {
        let mut out = Vec::new();
        buffer.drain_ready(now, |held| out.push(held.sample.server_time));
        out
    }

    #[test]
    fn test_reorders_within_delay() {
        let mut buffer = JitterBuffer::new(8, 0.1);
        assert_eq!(buffer.push(at(1.0), 1.0), JitterPush::Buffered);
        assert_eq!(buffer.push(at(3.0), 1.0), JitterPush::Buffered);
        assert_eq!(buffer.push(at(2.0), 1.0), JitterPush::Buffered);

        assert!(drained(&mut buffer, 1.05).is_empty());
        assert_eq!(drained(&mut buffer, 5.0), vec![1.0, 2.0, 3.0]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_late_and_duplicate() {
        let mut buffer = JitterBuffer::new(8, 0.0);
        buffer.push(at(5.0), 5.0);
        assert_eq!(buffer.push(at(5.0), 5.0), JitterPush::Duplicate);
        assert_eq!(drained(&mut buffer, 5.0), vec![5.0]);

        assert_eq!(buffer.push(at(4.0), 5.1), JitterPush::Late);
        assert_eq!(buffer.push(at(5.0), 5.1), JitterPush::Duplicate);
        assert_eq!(buffer.dropped(), 3);
    }

    #[test]
    fn test_overflow_releases_oldest() {
        let mut buffer = JitterBuffer::new(2, 10.0);
        buffer.push(at(1.0), 0.0);
        buffer.push(at(2.0), 0.0);

        match buffer.push(at(3.0), 0.0) {
            JitterPush::Overflow(oldest) => assert_eq!(oldest.sample.server_time, 1.0),
            other => panic!("expected overflow, got {other:?}"),
        }
        assert_eq!(buffer.len(), 2);

        let mut order = Vec::new();
        buffer.drain_all(|held| order.push(held.sample.server_time));
        assert_eq!(order, vec![2.0, 3.0]);
    }

    #[test]
    fn test_overflow_with_older_newcomer_is_late() {
        let mut buffer = JitterBuffer::new(2, 10.0);
        buffer.push(at(2.0), 0.0);
        buffer.push(at(3.0), 0.0);

        assert_eq!(buffer.push(at(1.0), 0.0), JitterPush::Late);
        assert_eq!(buffer.len(), 2);
    }

    #[test]
    fn test_overflow_keeps_order() {
        let mut buffer = JitterBuffer::new(3, 10.0);
        buffer.push(at(1.0), 0.0);
        buffer.push(at(2.0), 0.0);
        buffer.push(at(4.0), 0.0);

        assert!(matches!(buffer.push(at(3.0), 0.0), JitterPush::Overflow(_)));
        let mut order = Vec::new();
        buffer.drain_all(|held| order.push(held.sample.server_time));
        assert_eq!(order, vec![2.0, 3.0, 4.0]);
    }
}
