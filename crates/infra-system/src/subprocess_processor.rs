// Subprocess processing unit
// Runs an external command per document with an environment allowlist
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

use docflow_core::domain::JobDocument;
use docflow_core::port::{ProcessingError, ProcessingOutput, ProcessingUnit};

/// Longest stdout/stderr excerpt carried into results and error messages
const OUTPUT_EXCERPT_CHARS: usize = 500;

/// `[processor]` settings section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubprocessConfig {
    /// Program to run; the document's `source_ref` is appended to `args`
    pub command: String,
    pub args: Vec<String>,
    pub working_dir: Option<String>,
    /// Inherited variables passed through to the child
    pub env_allowlist: Vec<String>,
    /// Extra variables set for every invocation
    pub env: HashMap<String, String>,
    /// Exit codes meaning "never retry this document"
    pub terminal_exit_codes: Vec<i32>,
    /// Time between SIGTERM and SIGKILL
    pub kill_grace_ms: u64,
}

impl Default for SubprocessConfig {
    fn default() -> Self {
        Self {
            command: "docflow-ocr".to_string(),
            args: Vec::new(),
            working_dir: None,
            env_allowlist: vec![
                "PATH".to_string(),
                "HOME".to_string(),
                "LANG".to_string(),
                "TMPDIR".to_string(),
            ],
            env: HashMap::new(),
            terminal_exit_codes: vec![2],
            kill_grace_ms: 5_000,
        }
    }
}

pub struct SubprocessProcessor {
    config: SubprocessConfig,
}

impl SubprocessProcessor {
    pub fn new(config: SubprocessConfig) -> Self {
        Self { config }
    }

    /// Filter the daemon's environment to the allowlist, then add configured vars
    fn child_env(&self) -> HashMap<String, String> {
        let mut env: HashMap<String, String> = std::env::vars()
            .filter(|(k, _)| self.config.env_allowlist.contains(k))
            .collect();
        env.extend(self.config.env.clone());
        env
    }

    fn build_command(&self, document: &JobDocument) -> Command {
        let mut command = Command::new(&self.config.command);
        command
            .args(&self.config.args)
            .arg(&document.source_ref)
            .env_clear()
            .envs(self.child_env())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &self.config.working_dir {
            command.current_dir(dir);
        }
        command
    }

    fn classify(&self, output: std::process::Output) -> Result<ProcessingOutput, ProcessingError> {
        let stderr = excerpt(&output.stderr);
        match output.status.code() {
            Some(0) => {
                let stdout = excerpt(&output.stdout);
                Ok(ProcessingOutput {
                    summary: (!stdout.is_empty()).then_some(stdout),
                })
            }
            Some(code) if self.config.terminal_exit_codes.contains(&code) => Err(
                ProcessingError::Terminal(format!("exit code {}: {}", code, stderr)),
            ),
            Some(code) => Err(ProcessingError::Transient(format!(
                "exit code {}: {}",
                code, stderr
            ))),
            None => Err(ProcessingError::Transient(format!(
                "terminated by signal: {}",
                stderr
            ))),
        }
    }
}

fn excerpt(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    let text = text.trim();
    match text.char_indices().nth(OUTPUT_EXCERPT_CHARS) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

/// Terminates the child if the invocation ends before it exits
/// (timeout, or the scheduler aborting the task)
struct ChildGuard {
    pid: Option<u32>,
    grace: Duration,
}

impl ChildGuard {
    fn disarm(&mut self) {
        self.pid = None;
    }
}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        let Some(pid) = self.pid.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(kill_graceful(pid, self.grace));
            }
            Err(_) => force_kill(pid),
        }
    }
}

/// SIGTERM first, then SIGKILL if the process is still alive after `grace`
#[cfg(unix)]
async fn kill_graceful(pid: u32, grace: Duration) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return;
    };
    let target = Pid::from_raw(raw);

    info!(pid = %pid, "Sending SIGTERM to processing subprocess");
    if kill(target, Signal::SIGTERM).is_err() {
        // Already gone
        return;
    }

    let deadline = tokio::time::Instant::now() + grace;
    while tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(100)).await;
        if kill(target, None).is_err() {
            debug!(pid = %pid, "Subprocess exited after SIGTERM");
            return;
        }
    }

    warn!(pid = %pid, "Subprocess did not exit after SIGTERM, sending SIGKILL");
    let _ = kill(target, Signal::SIGKILL);
}

#[cfg(not(unix))]
async fn kill_graceful(pid: u32, _grace: Duration) {
    force_kill(pid);
}

#[cfg(unix)]
fn force_kill(pid: u32) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    if let Ok(raw) = i32::try_from(pid) {
        let _ = kill(Pid::from_raw(raw), Signal::SIGKILL);
    }
}

#[cfg(windows)]
fn force_kill(pid: u32) {
    let _ = std::process::Command::new("taskkill")
        .args(["/F", "/PID", &pid.to_string()])
        .output();
}

#[async_trait]
impl ProcessingUnit for SubprocessProcessor {
    async fn process(
        &self,
        document: &JobDocument,
        timeout: Option<Duration>,
    ) -> Result<ProcessingOutput, ProcessingError> {
        debug!(
            document_id = %document.id,
            command = %self.config.command,
            source_ref = %document.source_ref,
            "Starting processing subprocess"
        );

        let child = self
            .build_command(document)
            .spawn()
            .map_err(|e| {
                ProcessingError::Transient(format!(
                    "failed to spawn '{}': {}",
                    self.config.command, e
                ))
            })?;

        let mut guard = ChildGuard {
            pid: child.id(),
            grace: Duration::from_millis(self.config.kill_grace_ms),
        };

        let wait = child.wait_with_output();
        let output = match timeout {
            Some(limit) => match tokio::time::timeout(limit, wait).await {
                Ok(output) => output,
                Err(_) => return Err(ProcessingError::Timeout(limit)),
            },
            None => wait.await,
        };
        guard.disarm();

        let output = output
            .map_err(|e| ProcessingError::Transient(format!("failed to wait for child: {}", e)))?;
        self.classify(output)
    }
}
