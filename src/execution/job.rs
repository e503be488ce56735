//! Job state machine.
//!
//! ```text
//! Waiting --start--> Processing --finish--> Done
//!                    Processing --fail----> Failed
//! Waiting --fail--> Failed
//! Waiting/Processing --cancel--> Cancelled
//! ```
//!
//! Terminal jobs never change again; every transition method refuses with
//! [`JobError::IllegalTransition`] instead.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::cache::ResultId;
use super::fingerprint::Fingerprint;
use super::timeout::Interrupted;
use crate::schema::QueryId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        JobId(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        JobId::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(JobId)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobState {
    Waiting,
    Processing,
    Done,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Done | JobState::Failed | JobState::Cancelled)
    }

    /// Status code in the descriptor wire shape. Failed and Cancelled share
    /// code 4 and differ only by the error message.
    pub fn wire_code(self) -> u8 {
        match self {
            JobState::Waiting => 1,
            JobState::Processing => 2,
            JobState::Done => 3,
            JobState::Failed | JobState::Cancelled => 4,
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobState::Waiting => "waiting",
            JobState::Processing => "processing",
            JobState::Done => "done",
            JobState::Failed => "failed",
            JobState::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JobError {
    #[error("Job {id} cannot move from {from} to {to}")]
    IllegalTransition {
        id: JobId,
        from: JobState,
        to: JobState,
    },

    #[error("Job {0} not found")]
    NotFound(JobId),
}

/// Who asked for a run, carried into the query annotation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobMetadata {
    pub username: Option<String>,
    pub query_id: Option<QueryId>,
}

#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub fingerprint: Fingerprint,
    /// Rendered text the fingerprint was computed from. The executor may
    /// receive it with an annotation comment prepended.
    pub query_text: String,
    pub priority: i32,
    pub scheduled: bool,
    pub metadata: JobMetadata,
    pub time_limit: Option<Duration>,
    pub state: JobState,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub result_id: Option<ResultId>,
}

impl Job {
    pub fn new(id: JobId, fingerprint: Fingerprint, query_text: String, now: DateTime<Utc>) -> Self {
        Job {
            id,
            fingerprint,
            query_text,
            priority: 0,
            scheduled: false,
            metadata: JobMetadata::default(),
            time_limit: None,
            state: JobState::Waiting,
            created_at: now,
            started_at: None,
            finished_at: None,
            error: None,
            result_id: None,
        }
    }

    fn refuse(&self, to: JobState) -> JobError {
        JobError::IllegalTransition {
            id: self.id,
            from: self.state,
            to,
        }
    }

    pub fn start(&mut self, now: DateTime<Utc>) -> Result<(), JobError> {
        if self.state != JobState::Waiting {
            return Err(self.refuse(JobState::Processing));
        }
        self.state = JobState::Processing;
        self.started_at = Some(now);
        Ok(())
    }

    pub fn finish(&mut self, result_id: ResultId, now: DateTime<Utc>) -> Result<(), JobError> {
        if self.state != JobState::Processing {
            return Err(self.refuse(JobState::Done));
        }
        self.state = JobState::Done;
        self.finished_at = Some(now);
        self.result_id = Some(result_id);
        Ok(())
    }

    pub fn fail(&mut self, error: impl Into<String>, now: DateTime<Utc>) -> Result<(), JobError> {
        if self.state.is_terminal() {
            return Err(self.refuse(JobState::Failed));
        }
        self.state = JobState::Failed;
        self.finished_at = Some(now);
        self.error = Some(error.into());
        Ok(())
    }

    pub fn cancel(&mut self, now: DateTime<Utc>) -> Result<(), JobError> {
        if self.state.is_terminal() {
            return Err(self.refuse(JobState::Cancelled));
        }
        self.state = JobState::Cancelled;
        self.finished_at = Some(now);
        self.error = Some(Interrupted::Cancelled.to_string());
        Ok(())
    }

    pub fn wait_duration(&self) -> Option<Duration> {
        let started = self.started_at?;
        (started - self.created_at).to_std().ok()
    }

    pub fn run_duration(&self) -> Option<Duration> {
        let started = self.started_at?;
        let finished = self.finished_at?;
        (finished - started).to_std().ok()
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.finished_at
            .or(self.started_at)
            .unwrap_or(self.created_at)
    }

    pub fn descriptor(&self) -> JobDescriptor {
        JobDescriptor {
            id: self.id,
            status: self.state.wire_code(),
            error: self.error.clone().unwrap_or_default(),
            result_id: self.result_id,
            wait_duration: self.wait_duration().map(|d| d.as_secs_f64()),
            run_duration: self.run_duration().map(|d| d.as_secs_f64()),
            updated_at: self.updated_at(),
            state: self.state,
        }
    }
}

/// What callers see of a job.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobDescriptor {
    pub id: JobId,
    pub status: u8,
    pub error: String,
    pub result_id: Option<ResultId>,
    /// Seconds between creation and pickup
    pub wait_duration: Option<f64>,
    /// Seconds between pickup and completion
    pub run_duration: Option<f64>,
    pub updated_at: DateTime<Utc>,
    /// Exact state; the wire `status` conflates Failed and Cancelled.
    #[serde(skip)]
    pub state: JobState,
}
