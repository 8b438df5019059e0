// Runner Control Token - cooperative pause/stop/shutdown signalling

use tokio::sync::watch;

/// What a job runner should be doing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Running,
    /// No new dequeues; in-flight invocations finish
    Paused,
    /// Job stopped: no further dequeues, ever
    Stopped,
    /// Daemon shutdown: stop dispatching, job status untouched
    Shutdown,
}

impl RunState {
    pub fn is_final(&self) -> bool {
        matches!(self, RunState::Stopped | RunState::Shutdown)
    }
}

/// Receiving side, checked before each dequeue
#[derive(Clone)]
pub struct ControlToken {
    rx: watch::Receiver<RunState>,
}

impl ControlToken {
    /// A dropped sender reads as `Shutdown`
    pub fn state(&self) -> RunState {
        if self.rx.has_changed().is_err() {
            return RunState::Shutdown;
        }
        *self.rx.borrow()
    }

    /// Wait for the next state change
    pub async fn changed(&mut self) {
        if self.rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }

    /// Block while paused. Returns `false` when the runner must exit.
    pub async fn wait_while_paused(&mut self) -> bool {
        loop {
            match self.state() {
                RunState::Running => return true,
                RunState::Stopped | RunState::Shutdown => return false,
                RunState::Paused => {
                    if self.rx.changed().await.is_err() {
                        return false;
                    }
                }
            }
        }
    }
}

/// Sending side, owned by the runner handle
pub struct ControlSender {
    tx: watch::Sender<RunState>,
}

impl ControlSender {
    /// Final states are sticky: a stopped runner never resumes
    pub fn set(&self, state: RunState) {
        self.tx.send_if_modified(|current| {
            if current.is_final() || *current == state {
                return false;
            }
            *current = state;
            true
        });
    }

    pub fn state(&self) -> RunState {
        *self.tx.borrow()
    }
}

/// Create a control channel
pub fn control_channel(initial: RunState) -> (ControlSender, ControlToken) {
    let (tx, rx) = watch::channel(initial);
    (ControlSender { tx }, ControlToken { rx })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pause_then_resume() {
        let (tx, mut token) = control_channel(RunState::Running);
        tx.set(RunState::Paused);
        assert_eq!(token.state(), RunState::Paused);

        let waiter = tokio::spawn(async move { token.wait_while_paused().await });
        tx.set(RunState::Running);
        assert!(waiter.await.unwrap());
    }

    #[tokio::test]
    async fn test_stop_is_sticky() {
        let (tx, mut token) = control_channel(RunState::Paused);
        tx.set(RunState::Stopped);
        tx.set(RunState::Running);
        assert_eq!(tx.state(), RunState::Stopped);
        assert!(!token.wait_while_paused().await);
    }
}
