//! Wall-clock helpers over the `Clock` abstraction

use std::time::Duration;

use chrono::{DateTime, Utc};
use scribeflow_common::Clock;

/// Current wall-clock time of `clock`.
pub(crate) fn wall_now<C: Clock>(clock: &C) -> DateTime<Utc> {
    DateTime::<Utc>::from(clock.system_time())
}

/// `at + delay`, saturating at the latest representable time.
pub(crate) fn after(at: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|delta| at.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Whether more than `retention` has passed between `since` and `now`.
pub(crate) fn expired(since: DateTime<Utc>, retention: Duration, now: DateTime<Utc>) -> bool {
    after(since, retention) <= now
}
