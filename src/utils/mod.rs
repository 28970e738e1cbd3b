pub mod logging;

use chrono::Utc;

/// Wall-clock time in epoch milliseconds.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}
