//! # Sample Inbox
//!
//! Hand-off from a transport thread to the main loop.
//!
//! The replication state is owned by the render loop. A transport that
//! receives on its own thread never touches that state; it pushes
//! [`Delivery`] values into a bounded lock-free channel and the main loop
//! drains them during its network-poll phase.
//!
//! ```text
//! transport thread ── SampleSender::deliver ──► [bounded queue] ──► Session::drain_inbox
//!                        (never blocks)                              (main loop)
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};

use crate::sample::PoseSample;
use crate::EntityId;

/// One received sample addressed to one entity.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Delivery {
    /// Target entity.
    pub entity: EntityId,
    /// The sample.
    pub sample: PoseSample,
    /// Synchronized clock at receipt.
    pub receipt_time: f64,
}

/// Transport-side handle. Cheap to clone.
#[derive(Clone, Debug)]
pub struct SampleSender {
    tx: Sender<Delivery>,
    dropped: Arc<AtomicU64>,
}

impl SampleSender {
    /// Queues a sample. Never blocks: when the queue is full, or the main
    /// loop has gone away, the sample is dropped, counted, and `false`
    /// returned.
    pub fn deliver(&self, entity: EntityId, sample: PoseSample, receipt_time: f64) -> bool {
        match self.tx.try_send(Delivery { entity, sample, receipt_time }) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(entity = %entity, "sample inbox full, sample dropped");
                false
            }
            Err(TrySendError::Disconnected(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(entity = %entity, "sample inbox closed");
                false
            }
        }
    }
}

/// Main-loop side of the queue.
#[derive(Debug)]
pub struct SampleInbox {
    rx: Receiver<Delivery>,
    dropped: Arc<AtomicU64>,
}

impl SampleInbox {
    /// Creates a queue holding at most `capacity` undelivered samples.
    #[must_use]
    pub fn bounded(capacity: usize) -> (SampleSender, Self) {
        let (tx, rx) = bounded(capacity.max(1));
        let dropped = Arc::new(AtomicU64::new(0));
        (
            SampleSender { tx, dropped: Arc::clone(&dropped) },
            Self { rx, dropped },
        )
    }

    /// Next queued delivery, if any.
    #[must_use]
    pub fn try_next(&self) -> Option<Delivery> {
        self.rx.try_recv().ok()
    }

    /// Everything queued right now, in arrival order.
    pub fn drain(&self) -> impl Iterator<Item = Delivery> + '_ {
        self.rx.try_iter()
    }

    /// Deliveries waiting.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// True when nothing is waiting.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Samples dropped by senders because the queue was full or closed.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
