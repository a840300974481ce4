//! Transfer listener that logs lifecycle events.

use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use artifact_transfer::{
    EventKind, ListenerError, SpeedCalculator, TransferEvent, TransferListener,
};

/// Logs each transfer step; progress lines are throttled to one per
/// `interval`.
pub struct LogReporter {
    speed: SpeedCalculator,
    interval: Duration,
    last_report: Mutex<Option<Instant>>,
}

impl LogReporter {
    pub fn new(interval: Duration) -> Self {
        Self {
            speed: SpeedCalculator::default(),
            interval,
            last_report: Mutex::new(None),
        }
    }

    fn report_due(&self) -> bool {
        let mut last = self
            .last_report
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();
        match *last {
            Some(at) if now.duration_since(at) < self.interval => false,
            _ => {
                *last = Some(now);
                true
            }
        }
    }
}

impl TransferListener for LogReporter {
    fn on_event(&self, event: &TransferEvent<'_>) -> Result<(), ListenerError> {
        let request = event.request();
        let resource = event.resource();
        match event.kind() {
            EventKind::Initiated => {
                tracing::debug!(%request, %resource, "transfer initiated");
            }
            EventKind::Started => {
                self.speed.reset();
                tracing::info!(
                    %request,
                    %resource,
                    size = ?resource.content_length(),
                    "transfer started"
                );
            }
            EventKind::Progressed => {
                self.speed.add_sample(event.data_len() as u64);
                if self.report_due() {
                    let transferred = event.transferred();
                    let eta = resource
                        .content_length()
                        .and_then(|len| self.speed.eta(len.saturating_sub(transferred)));
                    tracing::info!(
                        %request,
                        resource = resource.resource_name(),
                        transferred,
                        total = ?resource.content_length(),
                        speed = %format_speed(self.speed.bytes_per_second()),
                        eta_secs = ?eta.map(|d| d.as_secs()),
                        "progress"
                    );
                }
            }
            EventKind::Succeeded => {
                tracing::info!(
                    %request,
                    %resource,
                    bytes = event.transferred(),
                    "transfer succeeded"
                );
            }
            EventKind::Corrupted => {
                if let Some(error) = event.error() {
                    tracing::warn!(%resource, %error, "checksum verification failed");
                }
            }
            EventKind::Failed => {
                if let Some(error) = event.error() {
                    tracing::error!(%request, %resource, %error, "transfer failed");
                }
            }
        }
        Ok(())
    }
}

/// Human-readable rate, e.g. `1.5 MiB/s`.
pub fn format_speed(bytes_per_second: f64) -> String {
    const UNITS: [&str; 4] = ["B/s", "KiB/s", "MiB/s", "GiB/s"];
    let mut value = bytes_per_second.max(0.0);
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{value:.0} {}", UNITS[unit])
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}
