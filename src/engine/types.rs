use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::tree::TreeSnapshot;

/// Status of a workflow run or of one of its attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Running => write!(f, "running"),
            RunStatus::Completed => write!(f, "completed"),
            RunStatus::Failed => write!(f, "failed"),
        }
    }
}

/// One execution of a workflow entrypoint within a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub attempt_id: String,
    /// 1 for the first attempt, incremented on each retry.
    pub attempt: u32,
    pub status: RunStatus,
    pub started: DateTime<Utc>,
    pub finished: Option<DateTime<Utc>>,
    pub error: Option<String>,
    /// Run-state tree as it stood when the attempt finished.
    pub tree: Option<TreeSnapshot>,
}

impl AttemptRecord {
    pub fn started(attempt_id: &str, attempt: u32) -> Self {
        Self {
            attempt_id: attempt_id.to_string(),
            attempt,
            status: RunStatus::Running,
            started: Utc::now(),
            finished: None,
            error: None,
            tree: None,
        }
    }

    pub fn finish(&mut self, status: RunStatus, error: Option<String>, tree: TreeSnapshot) {
        self.status = status;
        self.finished = Some(Utc::now());
        self.error = error;
        self.tree = Some(tree);
    }
}

/// Everything recorded about a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: String,
    pub workflow_id: String,
    /// Status of the latest attempt.
    pub status: RunStatus,
    pub started: DateTime<Utc>,
    pub finished: Option<DateTime<Utc>>,
    pub attempts: Vec<AttemptRecord>,
}

impl RunRecord {
    pub fn new(run_id: &str, workflow_id: &str) -> Self {
        Self {
            run_id: run_id.to_string(),
            workflow_id: workflow_id.to_string(),
            status: RunStatus::Running,
            started: Utc::now(),
            finished: None,
            attempts: Vec::new(),
        }
    }

    pub fn latest_attempt(&self) -> Option<&AttemptRecord> {
        self.attempts.last()
    }

    /// Insert or replace an attempt by id and refresh the run status from it.
    pub fn upsert_attempt(&mut self, attempt: AttemptRecord) {
        match self
            .attempts
            .iter_mut()
            .find(|a| a.attempt_id == attempt.attempt_id)
        {
            Some(existing) => *existing = attempt,
            None => self.attempts.push(attempt),
        }
        self.attempts.sort_by_key(|a| a.attempt);
        if let Some(latest) = self.attempts.last() {
            self.status = latest.status;
            self.finished = latest.finished;
        }
    }
}
