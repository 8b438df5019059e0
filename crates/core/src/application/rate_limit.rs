//! Rolling-window rate limiter for invocation starts
//!
//! Caps the number of processing starts inside any window of `window`
//! length. Excess starts are deferred (the caller sleeps), never dropped.

use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

pub const RATE_WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug)]
pub struct RollingWindowLimiter {
    limit: usize,
    window: Duration,
    starts: VecDeque<Instant>,
}

impl RollingWindowLimiter {
    /// `limit` starts per rolling minute
    pub fn per_minute(limit: u32) -> Self {
        Self::new(limit, RATE_WINDOW)
    }

    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit: limit.max(1) as usize,
            window,
            starts: VecDeque::new(),
        }
    }

    fn prune(&mut self, now: Instant) {
        while let Some(oldest) = self.starts.front() {
            if now.duration_since(*oldest) >= self.window {
                self.starts.pop_front();
            } else {
                break;
            }
        }
    }

    /// How long until another start is allowed (`None` = now)
    pub fn wait_time(&mut self, now: Instant) -> Option<Duration> {
        self.prune(now);
        if self.starts.len() < self.limit {
            return None;
        }
        self.starts
            .front()
            .map(|oldest| (*oldest + self.window).saturating_duration_since(now))
    }

    /// Count a start at `now`
    pub fn record(&mut self, now: Instant) {
        self.prune(now);
        self.starts.push_back(now);
    }

    /// Wait for a free slot and take it
    pub async fn acquire(&mut self) {
        loop {
            let now = Instant::now();
            match self.wait_time(now) {
                None => {
                    self.record(now);
                    return;
                }
                Some(wait) => tokio::time::sleep(wait).await,
            }
        }
    }

    /// Starts inside the current window
    pub fn in_window(&mut self, now: Instant) -> usize {
        self.prune(now);
        self.starts.len()
    }
}
