use crate::error::{ErrorCategory, IndexerError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Rebuild stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RebuildStage {
    /// Create the new generation and copy documents into it
    Copy,
    /// Wait for every shard of the new generation to recover
    Recovery,
    /// Switch the alias
    Cutover,
    /// Delete old generations
    Cleanup,
}

impl RebuildStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            RebuildStage::Copy => "copy",
            RebuildStage::Recovery => "recovery",
            RebuildStage::Cutover => "cutover",
            RebuildStage::Cleanup => "cleanup",
        }
    }
}

impl std::fmt::Display for RebuildStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Rebuild job state
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobState {
    Queued {
        queued_at: DateTime<Utc>,
    },
    Running {
        started_at: DateTime<Utc>,
        current_stage: RebuildStage,
    },
    Completed {
        started_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
        duration_ms: u64,
        documents_copied: usize,
    },
    Failed {
        started_at: DateTime<Utc>,
        failed_at: DateTime<Utc>,
        error: String,
        error_category: ErrorCategory,
        failed_stage: RebuildStage,
    },
    Cancelled {
        cancelled_at: DateTime<Utc>,
        reason: String,
    },
}

impl JobState {
    pub fn state_name(&self) -> &'static str {
        match self {
            JobState::Queued { .. } => "queued",
            JobState::Running { .. } => "running",
            JobState::Completed { .. } => "completed",
            JobState::Failed { .. } => "failed",
            JobState::Cancelled { .. } => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Completed { .. } | JobState::Failed { .. } | JobState::Cancelled { .. }
        )
    }
}

/// One zero-downtime rebuild of a logical index
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RebuildJob {
    pub id: Uuid,
    pub base_name: String,
    /// Generation being built
    pub new_index: Option<String>,
    /// Generation that held the alias when the job started
    pub previous_index: Option<String>,
    /// Generations deleted during cleanup
    pub cleaned: Vec<String>,
    pub state: JobState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RebuildJob {
    pub fn new_queued(base_name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            base_name: base_name.into(),
            new_index: None,
            previous_index: None,
            cleaned: Vec::new(),
            state: JobState::Queued { queued_at: now },
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self.state, JobState::Completed { .. })
    }

    pub fn error_category(&self) -> Option<ErrorCategory> {
        match &self.state {
            JobState::Failed { error_category, .. } => Some(*error_category),
            _ => None,
        }
    }
}

/// Rebuild job state machine
pub struct JobStateMachine {
    job: RebuildJob,
}

impl JobStateMachine {
    pub fn new(job: RebuildJob) -> Self {
        Self { job }
    }

    pub fn job(&self) -> &RebuildJob {
        &self.job
    }

    pub fn job_mut(&mut self) -> &mut RebuildJob {
        &mut self.job
    }

    pub fn into_job(self) -> RebuildJob {
        self.job
    }

    fn invalid(&self, to: &str) -> IndexerError {
        IndexerError::InvalidStateTransition {
            from: self.job.state.state_name().to_string(),
            to: to.to_string(),
        }
    }

    /// Running stage, if any
    pub fn current_stage(&self) -> Option<RebuildStage> {
        match &self.job.state {
            JobState::Running { current_stage, .. } => Some(*current_stage),
            _ => None,
        }
    }

    /// Transition: QUEUED → RUNNING (copy)
    pub fn start(&mut self) -> Result<()> {
        match &self.job.state {
            JobState::Queued { .. } => {
                let now = Utc::now();
                self.job.state = JobState::Running {
                    started_at: now,
                    current_stage: RebuildStage::Copy,
                };
                self.job.updated_at = now;
                Ok(())
            }
            _ => Err(self.invalid("running")),
        }
    }

    /// Transition: RUNNING → COMPLETED
    pub fn complete(&mut self, documents_copied: usize) -> Result<()> {
        match &self.job.state {
            JobState::Running { started_at, .. } => {
                let now = Utc::now();
                let duration_ms = (now - *started_at).num_milliseconds().max(0) as u64;

                self.job.state = JobState::Completed {
                    started_at: *started_at,
                    completed_at: now,
                    duration_ms,
                    documents_copied,
                };
                self.job.updated_at = now;
                Ok(())
            }
            _ => Err(self.invalid("completed")),
        }
    }

    /// Transition: RUNNING → FAILED, at the current stage
    pub fn fail(&mut self, error: &IndexerError) -> Result<()> {
        match &self.job.state {
            JobState::Running {
                started_at,
                current_stage,
            } => {
                let now = Utc::now();
                self.job.state = JobState::Failed {
                    started_at: *started_at,
                    failed_at: now,
                    error: error.to_string(),
                    error_category: error.category(),
                    failed_stage: *current_stage,
                };
                self.job.updated_at = now;
                Ok(())
            }
            _ => Err(self.invalid("failed")),
        }
    }

    /// Transition: * → CANCELLED
    pub fn cancel(&mut self, reason: impl Into<String>) -> Result<()> {
        if self.job.state.is_terminal() {
            return Err(self.invalid("cancelled"));
        }
        let now = Utc::now();
        self.job.state = JobState::Cancelled {
            cancelled_at: now,
            reason: reason.into(),
        };
        self.job.updated_at = now;
        Ok(())
    }

    /// Move a running job to `stage`
    pub fn update_stage(&mut self, stage: RebuildStage) -> Result<()> {
        match &mut self.job.state {
            JobState::Running { current_stage, .. } => {
                *current_stage = stage;
                self.job.updated_at = Utc::now();
                Ok(())
            }
            _ => Err(self.invalid("update_stage")),
        }
    }
}
