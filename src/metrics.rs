//! Resident database age reporting.
//!
//! A small background task samples the age of the resident database and
//! pushes it to a gauge sink. Where the sink forwards the value (Prometheus,
//! StatsD, plain logs) is the host process's business.

use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use tokio_util::sync::CancellationToken;

use crate::config::METRICS_SAMPLE_PERIOD;
use crate::resident::ResidentCache;

/// Receiver of periodic resident-age samples. `None` means no database is
/// currently resident.
pub trait GaugeSink: Send + Sync {
    fn record_resident_age(&self, age: Option<ChronoDuration>);
}

/// Default sink: emits the sample as a debug log line.
#[derive(Default)]
pub struct LogGaugeSink;

impl GaugeSink for LogGaugeSink {
    fn record_resident_age(&self, age: Option<ChronoDuration>) {
        match age {
            Some(age) => log::debug!("Resident database age: {}s", age.num_seconds()),
            None => log::debug!("Resident database age: no database loaded"),
        }
    }
}

/// Samples the resident database age until cancelled.
pub async fn run_age_reporter(
    resident: Arc<ResidentCache>,
    sink: Arc<dyn GaugeSink>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(METRICS_SAMPLE_PERIOD) => {}
        }
        let age = resident
            .current()
            .map(|entry| Utc::now().signed_duration_since(entry.metadata.build_date));
        sink.record_resident_age(age);
    }
}
