//! Time-gated memoization helper.
//!
//! Both the origin download cooldown and the propagator's "last checked"
//! bookkeeping are the same pattern: a recorded timestamp plus a window.
//! Keeping the comparison as a pure function keeps both call sites testable
//! with injected clocks.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::time::Duration;

/// True while `recorded_at` is still within `window` of `now`.
///
/// A `now` earlier than `recorded_at` (clock skew, injected test clocks)
/// counts as fresh rather than producing a negative age.
pub fn is_still_fresh(recorded_at: DateTime<Utc>, now: DateTime<Utc>, window: Duration) -> bool {
    let window = ChronoDuration::from_std(window).unwrap_or(ChronoDuration::MAX);
    now.signed_duration_since(recorded_at) < window
}
