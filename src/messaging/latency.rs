//! Latency tokens carried in message keys.
//!
//! A writer keys each message with its local send time in nanoseconds since the epoch,
//! as a decimal string. Completion and consumption recover the elapsed time from it.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Keys older than this are treated as foreign, not as latency tokens
const MAX_TRACKED_LATENCY: Duration = Duration::from_secs(24 * 60 * 60);

/// Key for a message sent at `at`
pub fn key_at(at: SystemTime) -> String {
    at.duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default()
        .to_string()
}

/// Key for a message sent now
pub fn now_key() -> String {
    key_at(SystemTime::now())
}

/// Time elapsed between the send time encoded in `key` and `now`.
///
/// Returns `None` when the key is not a nanosecond timestamp, lies in the future,
/// or is more than a day old.
pub fn duration_from_key(key: &[u8], now: SystemTime) -> Option<Duration> {
    if key.is_empty() {
        return None;
    }
    let nanos: i64 = std::str::from_utf8(key).ok()?.parse().ok()?;
    if nanos < 0 {
        return None;
    }
    let sent_at = UNIX_EPOCH + Duration::from_nanos(nanos as u64);
    let elapsed = now.duration_since(sent_at).ok()?;

    (elapsed <= MAX_TRACKED_LATENCY).then_some(elapsed)
}
