/// Grader - Output Comparison
///
/// **Rules, in order:**
/// - Any stderr output fails the run, whatever stdout holds
/// - Otherwise stdout is compared to the expected-output fixture byte for byte
/// - Exact match is correct, anything else is incorrect
///
/// No whitespace normalization, no partial credit.
use crate::problems::{FixtureError, ProblemStore};
use crate::sandbox::CapturedOutput;
use autograder_common::types::{FailureReason, JobStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Correct,
    Incorrect,
    /// The program wrote to stderr.
    ProgramError,
}

impl Verdict {
    pub fn status(self) -> JobStatus {
        match self {
            Verdict::Correct => JobStatus::Correct,
            Verdict::Incorrect => JobStatus::Incorrect,
            Verdict::ProgramError => JobStatus::Failed,
        }
    }

    pub fn failure(self) -> Option<FailureReason> {
        match self {
            Verdict::ProgramError => Some(FailureReason::ProgramError),
            _ => None,
        }
    }
}

/// Pure grading rule.
pub fn grade(stdout: &[u8], stderr: &[u8], expected: &[u8]) -> Verdict {
    if !stderr.is_empty() {
        Verdict::ProgramError
    } else if stdout == expected {
        Verdict::Correct
    } else {
        Verdict::Incorrect
    }
}

/// Grade captured output against a problem's expected-output fixture.
///
/// The fixture is only read when stderr is empty.
pub async fn grade_output(
    problems: &dyn ProblemStore,
    problem: &str,
    output: &CapturedOutput,
) -> Result<Verdict, FixtureError> {
    if !output.stderr.is_empty() {
        return Ok(Verdict::ProgramError);
    }

    let expected = problems.read_expected_output(problem).await?;
    Ok(grade(&output.stdout, &output.stderr, &expected))
}
