use std::time::Duration;

use steward_kernel::ErrorKind;

/// Backoff schedule for transient faults: three attempts spaced at
/// 1 s / 5 s / 15 s before the error surfaces.
pub const MAX_RETRIES: u32 = 3;
const BACKOFF_SCHEDULE: [Duration; 3] = [
    Duration::from_secs(1),
    Duration::from_secs(5),
    Duration::from_secs(15),
];

/// Delay before retry number `attempt` (zero-based count of failures so
/// far). `None` means the error surfaces instead of retrying.
pub fn backoff_delay(kind: ErrorKind, attempt: u32) -> Option<Duration> {
    if !kind.retryable() || attempt >= MAX_RETRIES {
        return None;
    }
    Some(BACKOFF_SCHEDULE[attempt as usize])
}
