use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Position of a submission in the append-only job history.
pub type JobId = u64;

/// A program handed to the engine by the request layer.
///
/// Immutable once built; the job that owns it never exposes it mutably.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub problem: String,
    pub language: String,
    pub source: Vec<u8>,
}

impl Submission {
    pub fn new(problem: impl Into<String>, language: impl Into<String>, source: impl Into<Vec<u8>>) -> Self {
        Self {
            problem: problem.into(),
            language: language.into(),
            source: source.into(),
        }
    }
}

/// Lifecycle of a job.
///
/// `Queued -> Running -> {Correct, Incorrect, Failed}`; nothing moves backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Correct,
    Incorrect,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Correct | JobStatus::Incorrect | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Correct => "correct",
            JobStatus::Incorrect => "incorrect",
            JobStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Why a job ended up `Failed`.
///
/// The status string is shared by program errors and infrastructure
/// failures; this code keeps them apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// The program wrote to stderr, or past the output limit.
    ProgramError,
    /// The program did not exit before the execution deadline.
    Timeout,
    /// The sandbox provider failed to create, feed, start, wait on or read a sandbox.
    Sandbox,
    /// A problem fixture could not be read.
    Fixture,
    UnsupportedLanguage,
    Internal,
}

impl FailureReason {
    /// Program-behaviour outcomes are graded results, not infrastructure faults.
    pub fn is_infrastructure(self) -> bool {
        !matches!(self, FailureReason::ProgramError | FailureReason::Timeout)
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureReason::ProgramError => "program_error",
            FailureReason::Timeout => "timeout",
            FailureReason::Sandbox => "sandbox",
            FailureReason::Fixture => "fixture",
            FailureReason::UnsupportedLanguage => "unsupported_language",
            FailureReason::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// Point-in-time view of a job, safe to hand to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub id: JobId,
    pub problem: String,
    pub language: String,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureReason>,
    pub stdout: String,
    pub stderr: String,
    pub submitted_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

/// Counts over the job history and the active working set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagerStats {
    pub total: usize,
    pub active: usize,
    pub queued: usize,
    pub running: usize,
    pub correct: usize,
    pub incorrect: usize,
    pub failed: usize,
}

impl ManagerStats {
    pub fn record(&mut self, status: JobStatus) {
        self.total += 1;
        match status {
            JobStatus::Queued => self.queued += 1,
            JobStatus::Running => self.running += 1,
            JobStatus::Correct => self.correct += 1,
            JobStatus::Incorrect => self.incorrect += 1,
            JobStatus::Failed => self.failed += 1,
        }
    }
}
