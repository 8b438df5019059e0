// Processing Unit Port
// Performs OCR/classification on one document (subprocess or in-process)

use crate::domain::{ErrorKind, JobDocument};
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Result of a successful invocation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessingOutput {
    pub summary: Option<String>,
}

/// Processing errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProcessingError {
    /// Eligible for retry
    #[error("{0}")]
    Transient(String),

    /// Non-retryable (e.g. unsupported format); escalates immediately
    #[error("{0}")]
    Terminal(String),

    #[error("processing timed out after {0:?}")]
    Timeout(Duration),
}

impl ProcessingError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProcessingError::Transient(_) => ErrorKind::Transient,
            ProcessingError::Terminal(_) => ErrorKind::Terminal,
            ProcessingError::Timeout(_) => ErrorKind::Timeout,
        }
    }
}

/// Processing Unit trait
///
/// Implementations:
/// - SubprocessProcessor: runs an external command per document
#[async_trait]
pub trait ProcessingUnit: Send + Sync {
    /// Process one document
    ///
    /// `timeout` is the job's per-invocation limit. The scheduler enforces it
    /// regardless; implementations may use it to stop external work cleanly.
    async fn process(
        &self,
        document: &JobDocument,
        timeout: Option<Duration>,
    ) -> Result<ProcessingOutput, ProcessingError>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    /// Mock processor behavior
    #[derive(Debug, Clone)]
    pub enum MockBehavior {
        /// Always succeed
        Success,
        /// Fail transiently with message
        Fail(String),
        /// Fail terminally with message
        Terminal(String),
        /// Panic with message (for panic isolation testing)
        Panic(String),
        /// Fail the first N attempts of each document, then succeed
        FailTimes(u32),
        /// Sleep before succeeding
        Delay(Duration),
    }

    /// Mock Processing Unit for testing
    ///
    /// Tracks call counts and the peak number of concurrent invocations.
    pub struct MockProcessingUnit {
        behavior: Mutex<MockBehavior>,
        overrides: Mutex<HashMap<String, MockBehavior>>,
        attempts: Mutex<HashMap<String, u32>>,
        call_count: AtomicUsize,
        in_flight: AtomicUsize,
        peak_in_flight: AtomicUsize,
        gate: Mutex<Option<Arc<tokio::sync::Semaphore>>>,
    }

    impl MockProcessingUnit {
        pub fn new(behavior: MockBehavior) -> Self {
            Self {
                behavior: Mutex::new(behavior),
                overrides: Mutex::new(HashMap::new()),
                attempts: Mutex::new(HashMap::new()),
                call_count: AtomicUsize::new(0),
                in_flight: AtomicUsize::new(0),
                peak_in_flight: AtomicUsize::new(0),
                gate: Mutex::new(None),
            }
        }

        pub fn new_success() -> Self {
            Self::new(MockBehavior::Success)
        }

        pub fn new_fail(message: impl Into<String>) -> Self {
            Self::new(MockBehavior::Fail(message.into()))
        }

        pub fn set_behavior(&self, behavior: MockBehavior) {
            *self.behavior.lock().unwrap() = behavior;
        }

        /// Behavior for one specific `source_ref`
        pub fn set_behavior_for(&self, source_ref: impl Into<String>, behavior: MockBehavior) {
            self.overrides
                .lock()
                .unwrap()
                .insert(source_ref.into(), behavior);
        }

        /// Hold every invocation until a permit is added to the returned semaphore
        pub fn gated(&self) -> Arc<tokio::sync::Semaphore> {
            let gate = Arc::new(tokio::sync::Semaphore::new(0));
            *self.gate.lock().unwrap() = Some(gate.clone());
            gate
        }

        pub fn call_count(&self) -> usize {
            self.call_count.load(Ordering::SeqCst)
        }

        pub fn in_flight(&self) -> usize {
            self.in_flight.load(Ordering::SeqCst)
        }

        pub fn peak_in_flight(&self) -> usize {
            self.peak_in_flight.load(Ordering::SeqCst)
        }

        /// Invocations seen per `source_ref`
        pub fn attempts_for(&self, source_ref: &str) -> u32 {
            self.attempts
                .lock()
                .unwrap()
                .get(source_ref)
                .copied()
                .unwrap_or(0)
        }

        fn behavior_for(&self, source_ref: &str) -> MockBehavior {
            self.overrides
                .lock()
                .unwrap()
                .get(source_ref)
                .cloned()
                .unwrap_or_else(|| self.behavior.lock().unwrap().clone())
        }
    }

    struct InFlight<'a>(&'a AtomicUsize);

    impl Drop for InFlight<'_> {
        fn drop(&mut self) {
            self.0.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl ProcessingUnit for MockProcessingUnit {
        async fn process(
            &self,
            document: &JobDocument,
            _timeout: Option<Duration>,
        ) -> Result<ProcessingOutput, ProcessingError> {
            self.call_count.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
            let _guard = InFlight(&self.in_flight);

            let attempt = {
                let mut attempts = self.attempts.lock().unwrap();
                let entry = attempts.entry(document.source_ref.clone()).or_insert(0);
                *entry += 1;
                *entry
            };

            let gate = self.gate.lock().unwrap().clone();
            if let Some(gate) = gate {
                if let Ok(permit) = gate.acquire().await {
                    permit.forget();
                }
            }

            match self.behavior_for(&document.source_ref) {
                MockBehavior::Success => Ok(ProcessingOutput::default()),
                MockBehavior::Fail(msg) => Err(ProcessingError::Transient(msg)),
                MockBehavior::Terminal(msg) => Err(ProcessingError::Terminal(msg)),
                MockBehavior::Panic(msg) => {
                    panic!("{}", msg); // Actually panic for panic isolation testing
                }
                MockBehavior::FailTimes(n) if attempt <= n => Err(ProcessingError::Transient(
                    format!("attempt {} failed", attempt),
                )),
                MockBehavior::FailTimes(_) => Ok(ProcessingOutput::default()),
                MockBehavior::Delay(duration) => {
                    tokio::time::sleep(duration).await;
                    Ok(ProcessingOutput::default())
                }
            }
        }
    }
}
