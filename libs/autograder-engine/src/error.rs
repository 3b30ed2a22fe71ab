use crate::problems::FixtureError;
use crate::sandbox::SandboxError;
use autograder_common::types::FailureReason;
use std::time::Duration;
use thiserror::Error;

/// Anything that stops a run from producing a graded verdict.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("language '{0}' is not supported")]
    UnsupportedLanguage(String),
    #[error(transparent)]
    Fixture(#[from] FixtureError),
    #[error("failed to build program archive: {0}")]
    Archive(#[from] std::io::Error),
    #[error(transparent)]
    Sandbox(#[from] SandboxError),
    #[error("execution exceeded the {}ms deadline", .0.as_millis())]
    Timeout(Duration),
    #[error("program wrote more than {0} bytes to one stream")]
    OutputLimit(usize),
}

impl ExecutionError {
    pub fn reason(&self) -> FailureReason {
        match self {
            ExecutionError::UnsupportedLanguage(_) => FailureReason::UnsupportedLanguage,
            ExecutionError::Fixture(_) => FailureReason::Fixture,
            ExecutionError::Archive(_) => FailureReason::Internal,
            ExecutionError::Sandbox(_) => FailureReason::Sandbox,
            ExecutionError::Timeout(_) => FailureReason::Timeout,
            ExecutionError::OutputLimit(_) => FailureReason::ProgramError,
        }
    }
}
