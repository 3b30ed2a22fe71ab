// Per-submission state machine and result record
use crate::grader::Verdict;
use crate::sandbox::{CapturedOutput, SandboxHandle};
use autograder_common::types::{FailureReason, JobId, JobSnapshot, JobStatus, Submission};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("job {id} cannot move from {from} to {to}")]
pub struct TransitionError {
    pub id: JobId,
    pub from: JobStatus,
    pub to: JobStatus,
}

/// Terminal result of a run, written to the job in one step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    status: JobStatus,
    failure: Option<FailureReason>,
    output: CapturedOutput,
}

impl Outcome {
    pub fn graded(verdict: Verdict, output: CapturedOutput) -> Self {
        Self {
            status: verdict.status(),
            failure: verdict.failure(),
            output,
        }
    }

    pub fn failed(reason: FailureReason, output: CapturedOutput) -> Self {
        Self {
            status: JobStatus::Failed,
            failure: Some(reason),
            output,
        }
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn failure(&self) -> Option<FailureReason> {
        self.failure
    }
}

#[derive(Debug)]
struct JobState {
    status: JobStatus,
    failure: Option<FailureReason>,
    output: CapturedOutput,
    sandbox: Option<SandboxHandle>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

/// One accepted submission.
///
/// Mutable state sits behind a per-job lock; readers always see either the
/// pre-run or the complete terminal record, never a partial write.
#[derive(Debug)]
pub struct Job {
    id: JobId,
    submission: Submission,
    submitted_at: DateTime<Utc>,
    state: RwLock<JobState>,
}

impl Job {
    pub fn new(id: JobId, submission: Submission) -> Self {
        Self {
            id,
            submission,
            submitted_at: Utc::now(),
            state: RwLock::new(JobState {
                status: JobStatus::Queued,
                failure: None,
                output: CapturedOutput::default(),
                sandbox: None,
                started_at: None,
                finished_at: None,
            }),
        }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn submission(&self) -> &Submission {
        &self.submission
    }

    pub fn status(&self) -> JobStatus {
        self.state.read().status
    }

    /// Queued -> Running. Only the scheduler calls this.
    pub fn start(&self) -> Result<(), TransitionError> {
        let mut state = self.state.write();
        if state.status != JobStatus::Queued {
            return Err(TransitionError {
                id: self.id,
                from: state.status,
                to: JobStatus::Running,
            });
        }
        state.status = JobStatus::Running;
        state.started_at = Some(Utc::now());
        Ok(())
    }

    /// Record the live sandbox. Ignored unless the job is running.
    pub fn attach_sandbox(&self, handle: SandboxHandle) {
        let mut state = self.state.write();
        if state.status == JobStatus::Running {
            state.sandbox = Some(handle);
        }
    }

    pub fn sandbox(&self) -> Option<SandboxHandle> {
        self.state.read().sandbox.clone()
    }

    /// Running -> terminal. Output, status and failure land together.
    pub fn finish(&self, outcome: Outcome) -> Result<(), TransitionError> {
        let mut state = self.state.write();
        if state.status != JobStatus::Running {
            return Err(TransitionError {
                id: self.id,
                from: state.status,
                to: outcome.status,
            });
        }
        state.status = outcome.status;
        state.failure = outcome.failure;
        state.output = outcome.output;
        state.sandbox = None;
        state.finished_at = Some(Utc::now());
        Ok(())
    }

    pub fn snapshot(&self) -> JobSnapshot {
        let state = self.state.read();
        JobSnapshot {
            id: self.id,
            problem: self.submission.problem.clone(),
            language: self.submission.language.clone(),
            status: state.status,
            failure: state.failure,
            stdout: String::from_utf8_lossy(&state.output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&state.output.stderr).into_owned(),
            submitted_at: self.submitted_at,
            started_at: state.started_at,
            finished_at: state.finished_at,
        }
    }
}
