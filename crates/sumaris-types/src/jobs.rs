//! # Job Events
//!
//! Status and progression notifications about long-running background jobs
//! (imports, extractions). They travel on their own destination next to
//! entity events.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle status of a background job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobStatus {
    Pending,
    Running,
    Success,
    Warning,
    Error,
    Fatal,
    Cancelled,
}

impl JobStatus {
    /// Returns true once the job reached a terminal status.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        !matches!(self, Self::Pending | Self::Running)
    }
}

/// Progression of a running job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobProgression {
    /// Human-readable step description.
    pub message: Option<String>,
    /// Units of work done.
    pub current: u64,
    /// Units of work expected. Zero when unknown.
    pub total: u64,
}

impl JobProgression {
    #[must_use]
    pub fn new(message: impl Into<String>, current: u64, total: u64) -> Self {
        Self {
            message: Some(message.into()),
            current,
            total,
        }
    }

    /// Completion percentage, clamped to `0..=100`. `None` when the total is unknown.
    #[must_use]
    pub fn percent(&self) -> Option<u8> {
        if self.total == 0 {
            return None;
        }
        let pct = u128::from(self.current.min(self.total)) * 100 / u128::from(self.total);
        u8::try_from(pct).ok()
    }
}

/// What a job event reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobEventKind {
    /// The job changed status.
    Status(JobStatus),
    /// The job made progress.
    Progression(JobProgression),
}

impl JobEventKind {
    /// Value of the `type` message property.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Status(_) => "job",
            Self::Progression(_) => "progression",
        }
    }
}

/// A notification about one background job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobEvent {
    pub job_id: i64,
    pub kind: JobEventKind,
}

impl JobEvent {
    #[must_use]
    pub fn status(job_id: i64, status: JobStatus) -> Self {
        Self {
            job_id,
            kind: JobEventKind::Status(status),
        }
    }

    #[must_use]
    pub fn progression(job_id: i64, progression: JobProgression) -> Self {
        Self {
            job_id,
            kind: JobEventKind::Progression(progression),
        }
    }
}

impl fmt::Display for JobEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            JobEventKind::Status(status) => write!(f, "job#{} {:?}", self.job_id, status),
            JobEventKind::Progression(p) => {
                write!(f, "job#{} {}/{}", self.job_id, p.current, p.total)
            }
        }
    }
}
