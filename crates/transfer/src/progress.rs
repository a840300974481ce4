use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tracing::trace;

use crate::TransferError;
use crate::events::{EventBus, TransferCancelled};
use crate::types::{RequestKind, TransferEvent, TransferResource};

/// Byte counter and event emitter for one transfer.
///
/// Shared between the completion controller and the upload body source so
/// both fire through the same bus and count into the same total. All
/// methods take `&self`; a status inspector may read
/// [`transferred`](Self::transferred) from another thread at any time.
pub struct TransferTracker {
    bus: Arc<EventBus>,
    resource: Arc<TransferResource>,
    request: RequestKind,
    transferred: AtomicU64,
    cancelled: AtomicBool,
}

impl TransferTracker {
    pub fn new(bus: Arc<EventBus>, resource: Arc<TransferResource>, request: RequestKind) -> Self {
        Self {
            bus,
            resource,
            request,
            transferred: AtomicU64::new(0),
            cancelled: AtomicBool::new(false),
        }
    }

    pub fn resource(&self) -> &Arc<TransferResource> {
        &self.resource
    }

    pub fn request(&self) -> RequestKind {
        self.request
    }

    /// Bytes counted so far.
    pub fn transferred(&self) -> u64 {
        self.transferred.load(Ordering::Acquire)
    }

    /// Returns `true` once any listener asked to cancel this transfer.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Resets the byte counter (an upload restarting its body).
    pub fn reset(&self) {
        self.transferred.store(0, Ordering::Release);
    }

    pub fn initiated(&self) -> Result<(), TransferCancelled> {
        let event = TransferEvent::initiated(self.request, &self.resource);
        self.check(self.bus.publish(&event))
    }

    pub fn started(&self) -> Result<(), TransferCancelled> {
        let event = TransferEvent::started(self.request, &self.resource);
        self.check(self.bus.publish(&event))
    }

    /// Counts `data` and fires PROGRESSED with the new cumulative total.
    ///
    /// The counter is updated before listeners run, so a cancelling
    /// listener still leaves the count equal to the bytes reported.
    pub fn progressed(&self, data: &[u8]) -> Result<u64, TransferCancelled> {
        let total = self
            .transferred
            .fetch_add(data.len() as u64, Ordering::AcqRel)
            + data.len() as u64;
        trace!(resource = %self.resource, delta = data.len(), total, "progress");
        let event = TransferEvent::progressed(self.request, &self.resource, total, data);
        self.check(self.bus.publish(&event)).map(|()| total)
    }

    pub fn succeeded(&self) {
        let event = TransferEvent::succeeded(self.request, &self.resource, self.transferred());
        let _ = self.bus.publish(&event);
    }

    pub fn corrupted(&self, error: &TransferError) {
        let event =
            TransferEvent::corrupted(self.request, &self.resource, self.transferred(), error);
        let _ = self.bus.publish(&event);
    }

    pub fn failed(&self, error: &TransferError) {
        let event = TransferEvent::failed(self.request, &self.resource, self.transferred(), error);
        let _ = self.bus.publish(&event);
    }

    fn check(&self, result: Result<(), TransferCancelled>) -> Result<(), TransferCancelled> {
        if result.is_err() {
            self.cancelled.store(true, Ordering::Release);
        }
        result
    }
}

impl std::fmt::Debug for TransferTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferTracker")
            .field("request", &self.request)
            .field("resource", &self.resource.to_string())
            .field("transferred", &self.transferred())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// SpeedCalculator
// ---------------------------------------------------------------------------

struct SpeedSample {
    bytes: u64,
    timestamp: Instant,
}

/// Calculates transfer speed using a sliding window of samples.
pub struct SpeedCalculator {
    inner: Mutex<SpeedInner>,
}

struct SpeedInner {
    samples: Vec<SpeedSample>,
    max_samples: usize,
    window_size: Duration,
}

impl Default for SpeedCalculator {
    fn default() -> Self {
        Self::new(None, None)
    }
}

impl SpeedCalculator {
    /// Creates a new calculator.
    ///
    /// - `window_size`: time window for speed calculation (default 5 s).
    /// - `max_samples`: maximum retained samples (default 100).
    pub fn new(window_size: Option<Duration>, max_samples: Option<usize>) -> Self {
        Self {
            inner: Mutex::new(SpeedInner {
                samples: Vec::new(),
                max_samples: max_samples.unwrap_or(100),
                window_size: window_size.unwrap_or(Duration::from_secs(5)),
            }),
        }
    }

    /// Records a sample of `bytes` transferred at the current instant.
    pub fn add_sample(&self, bytes: u64) {
        let mut s = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();
        s.samples.push(SpeedSample {
            bytes,
            timestamp: now,
        });

        if let Some(cutoff) = now.checked_sub(s.window_size) {
            s.samples.retain(|sample| sample.timestamp >= cutoff);
        }

        if s.samples.len() > s.max_samples {
            let excess = s.samples.len() - s.max_samples;
            s.samples.drain(..excess);
        }
    }

    /// Average speed in bytes/second within the window; 0.0 with fewer
    /// than 2 samples.
    pub fn bytes_per_second(&self) -> f64 {
        let s = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let (Some(first), Some(last)) = (s.samples.first(), s.samples.last()) else {
            return 0.0;
        };
        if s.samples.len() < 2 {
            return 0.0;
        }

        let elapsed = last.timestamp.duration_since(first.timestamp);
        if elapsed.is_zero() {
            return 0.0;
        }

        let total_bytes: u64 = s.samples.iter().map(|sample| sample.bytes).sum();
        total_bytes as f64 / elapsed.as_secs_f64()
    }

    /// Estimates time remaining to transfer `remaining_bytes`.
    pub fn eta(&self, remaining_bytes: u64) -> Option<Duration> {
        let speed = self.bytes_per_second();
        if speed <= 0.0 {
            return None;
        }
        Some(Duration::from_secs_f64(remaining_bytes as f64 / speed))
    }

    pub fn reset(&self) {
        let mut s = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        s.samples.clear();
    }
}
