use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};

/// Poll `f` up to `attempts` times, `interval` apart, until it yields a value.
///
/// Returns `None` once the attempt budget is exhausted. Pass a zero interval
/// in tests to poll without real delays.
pub async fn poll_until<T, F, Fut>(attempts: u32, interval: Duration, mut f: F) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    for attempt in 0..attempts {
        if let Some(value) = f().await {
            return Some(value);
        }
        if attempt + 1 < attempts && !interval.is_zero() {
            tokio::time::sleep(interval).await;
        }
    }
    None
}

/// ISO-8601 UTC timestamp with a trailing `Z` and second precision, the
/// format the gateway expects and the ledger keys use.
pub fn iso_z(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}
