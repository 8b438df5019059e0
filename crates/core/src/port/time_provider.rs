// Time Provider Port (for testability)

/// Time provider interface (allows mocking in tests)
pub trait TimeProvider: Send + Sync {
    /// Get current time in milliseconds since epoch
    fn now_millis(&self) -> i64;
}

/// System time provider (production)
pub struct SystemTimeProvider;

impl TimeProvider for SystemTimeProvider {
    fn now_millis(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

pub mod mocks {
    use super::*;
    use std::sync::atomic::{AtomicI64, Ordering};

    /// Clock that only moves when told to
    pub struct ManualTimeProvider {
        now: AtomicI64,
    }

    impl ManualTimeProvider {
        pub fn new(start_millis: i64) -> Self {
            Self {
                now: AtomicI64::new(start_millis),
            }
        }
    }

    impl TimeProvider for ManualTimeProvider {
        fn now_millis(&self) -> i64 {
            self.now.load(Ordering::SeqCst)
        }
    }

    /// Epoch millis derived from the tokio clock, so paused-time tests see
    /// `tokio::time::advance` reflected in store timestamps
    pub struct TokioTimeProvider {
        origin: tokio::time::Instant,
        base_millis: i64,
    }

    impl TokioTimeProvider {
        pub fn new(base_millis: i64) -> Self {
            Self {
                origin: tokio::time::Instant::now(),
                base_millis,
            }
        }
    }

    impl TimeProvider for TokioTimeProvider {
        fn now_millis(&self) -> i64 {
            self.base_millis + self.origin.elapsed().as_millis() as i64
        }
    }
}
