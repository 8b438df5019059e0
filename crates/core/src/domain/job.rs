// Job Domain Model and job-level state machine

use crate::domain::config::JobConfig;
use crate::domain::error::{DomainError, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Job ID (UUID v4)
pub type JobId = String;

/// Priority inherited by every document of a job (1 = lowest, 5 = highest)
pub type Priority = u8;

/// Job status
///
/// ```text
/// pending -> running -> {paused, completed, failed, stopped}
/// paused  -> {running, stopped}
/// completed -> running   (re-opened by retry of failed documents)
/// pending -> stopped     (cancelled before start)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Paused,
    Stopped,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Paused => "paused",
            JobStatus::Stopped => "stopped",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    /// States from which `self` may be entered
    pub fn allowed_sources(&self) -> &'static [JobStatus] {
        match self {
            JobStatus::Pending => &[],
            JobStatus::Running => &[JobStatus::Pending, JobStatus::Paused, JobStatus::Completed],
            JobStatus::Paused => &[JobStatus::Running],
            JobStatus::Stopped => &[JobStatus::Pending, JobStatus::Running, JobStatus::Paused],
            JobStatus::Completed => &[JobStatus::Running],
            JobStatus::Failed => &[JobStatus::Running],
        }
    }

    pub fn can_transition_to(&self, to: JobStatus) -> bool {
        to.allowed_sources().contains(self)
    }

    /// Stopped and failed jobs never run again
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Stopped | JobStatus::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "paused" => Ok(JobStatus::Paused),
            "stopped" => Ok(JobStatus::Stopped),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status '{}'", other)),
        }
    }
}

/// Job Entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub name: String,
    pub config: JobConfig,
    pub status: JobStatus,
    pub priority: Priority,

    // Aggregate counters, only ever changed by atomic increments in the store
    pub total_items: i64,
    pub processed_items: i64,
    pub failed_items: i64,
    pub needs_review_items: i64,

    /// Summary reason when status is failed
    pub failure_reason: Option<String>,

    /// Set once a `once`-mode scan reports the source exhausted
    pub discovery_exhausted: bool,

    pub created_at: i64, // epoch ms
    pub updated_at: i64,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
}

impl Job {
    /// Create a new pending job
    ///
    /// # Arguments
    ///
    /// * `id` - Unique job ID (injected, not generated)
    /// * `created_at` - Creation timestamp in epoch ms (injected, not system time)
    /// * `config` - Validated job configuration
    pub fn new(id: impl Into<String>, created_at: i64, config: JobConfig) -> Self {
        Self {
            id: id.into(),
            name: config.name.clone(),
            priority: config.options.priority,
            config,
            status: JobStatus::Pending,
            total_items: 0,
            processed_items: 0,
            failed_items: 0,
            needs_review_items: 0,
            failure_reason: None,
            discovery_exhausted: false,
            created_at,
            updated_at: created_at,
            started_at: None,
            completed_at: None,
        }
    }

    /// Apply a status transition, stamping the lifecycle timestamps
    pub fn transition(&mut self, to: JobStatus, now_millis: i64) -> Result<()> {
        if !self.status.can_transition_to(to) {
            return Err(DomainError::InvalidStateTransition {
                from: self.status.to_string(),
                to: to.to_string(),
            });
        }

        match to {
            JobStatus::Running if self.started_at.is_none() => self.started_at = Some(now_millis),
            JobStatus::Running => self.completed_at = None,
            JobStatus::Stopped | JobStatus::Completed | JobStatus::Failed => {
                self.completed_at = Some(now_millis)
            }
            _ => {}
        }

        self.status = to;
        self.updated_at = self.updated_at.max(now_millis - 1) + 1;
        Ok(())
    }

    /// `processed + failed <= total` must hold at every observable instant
    pub fn counters_consistent(&self) -> bool {
        self.processed_items >= 0
            && self.failed_items >= 0
            && self.needs_review_items >= 0
            && self.processed_items + self.failed_items <= self.total_items
    }
}
