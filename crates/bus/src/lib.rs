//! Bounded real-time channels between pipeline stages.
//!
//! Every hot path in the pipeline hands data across threads through one of
//! these buses. Capacity is fixed at construction; what happens on overflow
//! depends on the bus:
//!
//! * [`Bus::drop_oldest`]: audio-bearing queues (capture frames, encoder
//!   blocks, transcriber taps). The oldest queued element is discarded to
//!   make room, so a stalled consumer loses the stalest data first.
//! * [`Bus::lossy`]: telemetry queues (level events). The new element is
//!   discarded; a slow consumer simply sees fewer events.
//!
//! Senders detect a departed consumer through a liveness token rather than
//! channel disconnection (the drop-oldest path keeps a stealing receiver
//! alive inside the sender, which would otherwise mask it). A closed bus
//! makes `send` return `false`; producers use that to stop producing.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvError, RecvTimeoutError, TrySendError};
use serde::Serialize;

/// How often overflow drops are logged (every Nth drop).
const DROP_LOG_INTERVAL: u64 = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OverflowPolicy {
    DropOldest,
    DropNewest,
}

/// Sending half of a bus. Cloneable; all clones share the counters.
pub struct BusSender<T> {
    tx: crossbeam_channel::Sender<T>,
    /// Stealing receiver used by the drop-oldest policy to evict the front
    /// of the queue when it is full.
    steal: Receiver<T>,
    policy: OverflowPolicy,
    alive: Weak<()>,
    label: &'static str,
    sent: Arc<AtomicU64>,
    dropped: Arc<AtomicU64>,
}

impl<T> Clone for BusSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            steal: self.steal.clone(),
            policy: self.policy,
            alive: self.alive.clone(),
            label: self.label,
            sent: Arc::clone(&self.sent),
            dropped: Arc::clone(&self.dropped),
        }
    }
}

impl<T> BusSender<T> {
    /// Send without blocking. Returns `false` once the consumer is gone.
    pub fn send(&self, item: T) -> bool {
        if self.alive.upgrade().is_none() {
            return false;
        }

        match self.tx.try_send(item) {
            Ok(()) => {
                self.sent.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(TrySendError::Full(item)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if dropped % DROP_LOG_INTERVAL == 1 {
                    tracing::warn!(bus = self.label, dropped, "bus full, dropping");
                }
                match self.policy {
                    OverflowPolicy::DropOldest => {
                        // Evict the stalest element, then retry once.
                        let _ = self.steal.try_recv();
                        if self.tx.try_send(item).is_ok() {
                            self.sent.fetch_add(1, Ordering::Relaxed);
                            return true;
                        }
                        false
                    }
                    OverflowPolicy::DropNewest => false,
                }
            }
            Err(TrySendError::Disconnected(_)) => {
                tracing::debug!(bus = self.label, "bus closed");
                false
            }
        }
    }

    /// Whether the consumer half is still alive.
    pub fn is_open(&self) -> bool {
        self.alive.upgrade().is_some()
    }

    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn counters(&self) -> BusCounters {
        BusCounters {
            sent: self.sent(),
            dropped: self.dropped(),
        }
    }
}

/// Receiving half of a bus. Dropping it closes the bus for all senders.
pub struct BusReceiver<T> {
    rx: Receiver<T>,
    _alive: Arc<()>,
}

impl<T> BusReceiver<T> {
    /// Block until an element arrives or every sender is gone.
    pub fn recv(&self) -> Result<T, RecvError> {
        self.rx.recv()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Result<T, RecvTimeoutError> {
        self.rx.recv_timeout(timeout)
    }

    pub fn try_recv(&self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Drain everything currently queued.
    pub fn drain(&self) -> Vec<T> {
        let mut out = Vec::with_capacity(self.rx.len());
        while let Ok(item) = self.rx.try_recv() {
            out.push(item);
        }
        out
    }
}

/// Counter snapshot for observability.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct BusCounters {
    pub sent: u64,
    pub dropped: u64,
}

pub struct Bus;

impl Bus {
    /// Bounded bus that evicts the oldest queued element on overflow.
    pub fn drop_oldest<T>(label: &'static str, capacity: usize) -> (BusSender<T>, BusReceiver<T>) {
        Self::with_policy(label, capacity, OverflowPolicy::DropOldest)
    }

    /// Bounded bus that discards the incoming element on overflow.
    pub fn lossy<T>(label: &'static str, capacity: usize) -> (BusSender<T>, BusReceiver<T>) {
        Self::with_policy(label, capacity, OverflowPolicy::DropNewest)
    }

    fn with_policy<T>(
        label: &'static str,
        capacity: usize,
        policy: OverflowPolicy,
    ) -> (BusSender<T>, BusReceiver<T>) {
        let capacity = capacity.max(1);
        let (tx, rx) = bounded(capacity);
        let alive = Arc::new(());

        tracing::debug!(bus = label, capacity, ?policy, "bus created");

        let sender = BusSender {
            tx,
            steal: rx.clone(),
            policy,
            alive: Arc::downgrade(&alive),
            label,
            sent: Arc::new(AtomicU64::new(0)),
            dropped: Arc::new(AtomicU64::new(0)),
        };
        let receiver = BusReceiver { rx, _alive: alive };
        (sender, receiver)
    }
}

/// Capacity for a frame-carrying bus sized in seconds of audio, assuming the
/// producer's nominal frame duration.
pub fn capacity_for_seconds(seconds: f32, nominal_frame_ms: u32) -> usize {
    if nominal_frame_ms == 0 {
        return 32;
    }
    (((seconds * 1000.0) as u32 / nominal_frame_ms) as usize).max(8)
}
