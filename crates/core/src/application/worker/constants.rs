// Worker constants (No magic values)
use std::time::Duration;

/// Longest the dispatcher sleeps without re-checking the queue (1s)
pub const MAX_IDLE_WAIT: Duration = Duration::from_secs(1);

/// Sleep duration after a store error before retry (1s)
pub const ERROR_RECOVERY_SLEEP_DURATION: Duration = Duration::from_secs(1);

/// Shortest wait for a delayed retry that is due "now" (1ms)
pub const MIN_DUE_WAIT: Duration = Duration::from_millis(1);
