/// Job Executor - One Job, One Sandbox, One Verdict
///
/// **Flow:**
/// 1. Resolve the language; unknown languages fail before any sandbox exists
/// 2. Read the problem input and pack the program archive
/// 3. Create the sandbox and record it on the job
/// 4. Run it through the engine protocol
/// 5. Grade stdout/stderr against the expected output
/// 6. Tear the sandbox down
/// 7. Write the terminal state in one step
///
/// Every failure lands on the job as `Failed` with a reason; nothing here
/// returns an error to the caller.
use crate::archive::program_archive;
use crate::engine::{SandboxEngine, SANDBOX_ROOT};
use crate::error::ExecutionError;
use crate::grader::grade_output;
use crate::job::{Job, Outcome};
use crate::language::{InputMode, LanguageConfig, LanguageRegistry, INPUT_FILE};
use crate::problems::ProblemStore;
use crate::sandbox::{CapturedOutput, SandboxSpec};
use autograder_common::types::{FailureReason, JobStatus};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// Everything a sandbox needs, prepared before one is created.
struct PreparedRun {
    spec: SandboxSpec,
    archive: Vec<u8>,
    stdin: Option<Vec<u8>>,
}

pub struct SandboxExecutor {
    engine: SandboxEngine,
    languages: Arc<LanguageRegistry>,
    problems: Arc<dyn ProblemStore>,
}

impl SandboxExecutor {
    pub fn new(
        engine: SandboxEngine,
        languages: Arc<LanguageRegistry>,
        problems: Arc<dyn ProblemStore>,
    ) -> Self {
        Self {
            engine,
            languages,
            problems,
        }
    }

    pub fn engine(&self) -> &SandboxEngine {
        &self.engine
    }

    pub fn languages(&self) -> &LanguageRegistry {
        &self.languages
    }

    pub fn problems(&self) -> &dyn ProblemStore {
        self.problems.as_ref()
    }

    /// Run a job that is already `Running` to its terminal state.
    #[instrument(
        skip(self, job),
        fields(
            job_id = job.id(),
            problem = %job.submission().problem,
            language = %job.submission().language,
        )
    )]
    pub async fn execute(&self, job: &Job) {
        let outcome = self.run(job).await;

        match outcome.status() {
            JobStatus::Failed => warn!(
                status = %outcome.status(),
                failure = ?outcome.failure(),
                "Job finished"
            ),
            status => info!(status = %status, "Job finished"),
        }

        if let Err(e) = job.finish(outcome) {
            error!(error = %e, "Failed to record job outcome");
        }
    }

    async fn run(&self, job: &Job) -> Outcome {
        let submission = job.submission();

        let Some(language) = self.languages.lookup(&submission.language) else {
            return failed(ExecutionError::UnsupportedLanguage(submission.language.clone()));
        };

        let prepared = match self.prepare(job, language).await {
            Ok(prepared) => prepared,
            Err(e) => return failed(e),
        };

        let session = match self.engine.create(&prepared.spec).await {
            Ok(session) => session,
            Err(e) => return failed(e.into()),
        };
        job.attach_sandbox(session.handle().clone());
        info!(container = %session.handle(), image = %language.image, "Running submission");

        let outcome = match session
            .run(prepared.archive, prepared.stdin.as_deref())
            .await
        {
            Ok(output) => self.grade(&submission.problem, output).await,
            Err(e) => failed(e),
        };

        session.teardown().await;
        outcome
    }

    async fn prepare(
        &self,
        job: &Job,
        language: &LanguageConfig,
    ) -> Result<PreparedRun, ExecutionError> {
        let submission = job.submission();
        let input = self.problems.read_input(&submission.problem).await?;
        let archive = program_archive(language, &submission.source, &input)?;

        let stdin = match language.input {
            InputMode::Stdin => Some(input),
            InputMode::File => None,
        };

        let spec = SandboxSpec {
            name: format!("autograder-{}-{}", job.id(), Uuid::new_v4().simple()),
            image: language.image.clone(),
            command: language.command_for(INPUT_FILE),
            working_dir: SANDBOX_ROOT.to_string(),
            open_stdin: stdin.is_some(),
        };

        Ok(PreparedRun {
            spec,
            archive,
            stdin,
        })
    }

    async fn grade(&self, problem: &str, output: CapturedOutput) -> Outcome {
        match grade_output(self.problems.as_ref(), problem, &output).await {
            Ok(verdict) => Outcome::graded(verdict, output),
            Err(e) => {
                error!(error = %e, "Failed to read expected output");
                Outcome::failed(FailureReason::Fixture, output)
            }
        }
    }
}

fn failed(err: ExecutionError) -> Outcome {
    let reason = err.reason();
    if reason.is_infrastructure() {
        error!(error = %err, failure = %reason, "Execution failed");
    } else {
        warn!(error = %err, failure = %reason, "Execution failed");
    }
    Outcome::failed(reason, CapturedOutput::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::SandboxProvider;
    use crate::testing::{Call, MemoryProblems, ScriptedProvider, Step};
    use autograder_common::types::Submission;
    use std::time::Duration;

    fn executor(provider: Arc<ScriptedProvider>, problems: MemoryProblems) -> SandboxExecutor {
        executor_with_timeout(provider, problems, Duration::from_secs(5))
    }

    fn executor_with_timeout(
        provider: Arc<ScriptedProvider>,
        problems: MemoryProblems,
        timeout: Duration,
    ) -> SandboxExecutor {
        let provider: Arc<dyn SandboxProvider> = provider;
        SandboxExecutor::new(
            SandboxEngine::new(provider, timeout),
            Arc::new(LanguageRegistry::builtin()),
            Arc::new(problems),
        )
    }

    fn problems() -> MemoryProblems {
        MemoryProblems::new()
            .with("echo", "4\n", "4\n")
            .with("hello-world", "", "Hello, World!\n")
    }

    fn running_job(problem: &str, language: &str, source: &str) -> Job {
        let job = Job::new(0, Submission::new(problem, language, source));
        job.start().unwrap();
        job
    }

    #[tokio::test]
    async fn test_correct_submission() {
        let provider = Arc::new(ScriptedProvider::new());
        let executor = executor(provider.clone(), problems());
        let job = running_job("echo", "python", "echo");

        executor.execute(&job).await;

        let snapshot = job.snapshot();
        assert_eq!(snapshot.status, JobStatus::Correct);
        assert_eq!(snapshot.stdout, "4\n");
        assert!(snapshot.failure.is_none());
        assert_eq!(provider.created(), 1);
        assert_eq!(provider.removed(), 1);
        assert!(job.sandbox().is_none());
    }

    #[tokio::test]
    async fn test_incorrect_submission() {
        let provider = Arc::new(ScriptedProvider::new());
        let executor = executor(provider.clone(), problems());
        let job = running_job("hello-world", "python", "print Hello, World.");

        executor.execute(&job).await;

        let snapshot = job.snapshot();
        assert_eq!(snapshot.status, JobStatus::Incorrect);
        assert_eq!(snapshot.stdout, "Hello, World.\n");
        assert_eq!(provider.removed(), 1);
    }

    #[tokio::test]
    async fn test_stderr_fails_even_with_right_stdout() {
        let provider = Arc::new(ScriptedProvider::new());
        let executor = executor(provider.clone(), problems());
        let job = running_job("echo", "python", "echo\nwarn Traceback...");

        executor.execute(&job).await;

        let snapshot = job.snapshot();
        assert_eq!(snapshot.status, JobStatus::Failed);
        assert_eq!(snapshot.failure, Some(FailureReason::ProgramError));
        assert_eq!(snapshot.stdout, "4\n");
        assert_eq!(snapshot.stderr, "Traceback...\n");
    }

    #[tokio::test]
    async fn test_stdin_language_gets_input_on_stdin() {
        let provider = Arc::new(ScriptedProvider::new());
        let executor = executor(provider.clone(), problems());
        let job = running_job("echo", "python", "echo");

        executor.execute(&job).await;

        let calls = provider.calls();
        assert!(calls.iter().any(|c| matches!(c, Call::WriteStdin(_))));
    }

    #[tokio::test]
    async fn test_program_that_exits_before_reading_stdin_is_graded() {
        let provider = Arc::new(ScriptedProvider::new());
        let executor = executor(provider.clone(), problems());
        let job = running_job("hello-world", "python", "exit\nprint Hello, World!");

        executor.execute(&job).await;

        let snapshot = job.snapshot();
        assert_eq!(snapshot.status, JobStatus::Correct);
        assert!(snapshot.failure.is_none());
        assert!(provider.calls().iter().any(|c| matches!(c, Call::WriteStdin(_))));
        assert_eq!(provider.removed(), 1);
    }

    #[tokio::test]
    async fn test_output_flood_is_a_program_error() {
        let provider = Arc::new(ScriptedProvider::new());
        let dyn_provider: Arc<dyn SandboxProvider> = provider.clone();
        let executor = SandboxExecutor::new(
            SandboxEngine::new(dyn_provider, Duration::from_secs(5)).with_output_limit(64),
            Arc::new(LanguageRegistry::builtin()),
            Arc::new(problems()),
        );
        let job = running_job("echo", "python", "flood 65");

        executor.execute(&job).await;

        let snapshot = job.snapshot();
        assert_eq!(snapshot.status, JobStatus::Failed);
        assert_eq!(snapshot.failure, Some(FailureReason::ProgramError));
        assert!(snapshot.stdout.is_empty());
        assert_eq!(provider.removed(), 1);
    }

    #[tokio::test]
    async fn test_file_language_gets_input_in_archive() {
        let provider = Arc::new(ScriptedProvider::new());
        let executor = executor(provider.clone(), problems());
        let job = running_job("echo", "sed", "echo");

        executor.execute(&job).await;

        assert_eq!(job.status(), JobStatus::Correct);
        let calls = provider.calls();
        assert!(!calls.iter().any(|c| matches!(c, Call::WriteStdin(_))));

        let Some(Call::Create(name)) = calls.first().cloned() else {
            panic!("first call should be create: {calls:?}");
        };
        assert!(name.starts_with("autograder-0-"));
    }

    #[tokio::test]
    async fn test_archive_and_sandbox_settings() {
        // A blocked program keeps the sandbox alive so its files can be inspected.
        let provider = Arc::new(ScriptedProvider::new());
        let executor = Arc::new(executor(provider.clone(), problems()));
        let job = Arc::new(running_job("echo", "sed", "block\necho"));

        let task = {
            let executor = Arc::clone(&executor);
            let job = Arc::clone(&job);
            tokio::spawn(async move { executor.execute(&job).await })
        };

        let handle = loop {
            if let Some(handle) = job.sandbox() {
                if provider.waiting() == 1 {
                    break handle;
                }
            }
            tokio::task::yield_now().await;
        };

        let files = provider.files(&handle);
        assert_eq!(files.get("script").map(Vec::as_slice), Some(b"block\necho".as_slice()));
        assert_eq!(files.get("in.txt").map(Vec::as_slice), Some(b"4\n".as_slice()));

        let spec = provider.spec(&handle).unwrap();
        assert_eq!(spec.command, vec!["sed", "-f", "script", "in.txt"]);
        assert_eq!(spec.working_dir, "/");
        assert!(!spec.open_stdin);

        provider.release(1);
        task.await.unwrap();
        assert_eq!(job.status(), JobStatus::Correct);
    }

    #[tokio::test]
    async fn test_unsupported_language_never_creates_sandbox() {
        let provider = Arc::new(ScriptedProvider::new());
        let executor = executor(provider.clone(), problems());
        let job = running_job("echo", "cobol", "echo");

        executor.execute(&job).await;

        let snapshot = job.snapshot();
        assert_eq!(snapshot.status, JobStatus::Failed);
        assert_eq!(snapshot.failure, Some(FailureReason::UnsupportedLanguage));
        assert!(provider.calls().is_empty());
    }

    #[tokio::test]
    async fn test_create_failure_skips_remove() {
        let provider = Arc::new(ScriptedProvider::new());
        provider.fail_on(Step::Create);
        let executor = executor(provider.clone(), problems());
        let job = running_job("echo", "python", "echo");

        executor.execute(&job).await;

        let snapshot = job.snapshot();
        assert_eq!(snapshot.status, JobStatus::Failed);
        assert_eq!(snapshot.failure, Some(FailureReason::Sandbox));
        assert_eq!(provider.removed(), 0);
    }

    #[tokio::test]
    async fn test_every_post_create_failure_removes_once() {
        for step in [Step::CopyArchive, Step::Start, Step::Stdin, Step::Wait, Step::Logs] {
            let provider = Arc::new(ScriptedProvider::new());
            provider.fail_on(step);
            let executor = executor(provider.clone(), problems());
            let job = running_job("echo", "python", "echo");

            executor.execute(&job).await;

            let snapshot = job.snapshot();
            assert_eq!(snapshot.status, JobStatus::Failed, "{step:?}");
            assert_eq!(snapshot.failure, Some(FailureReason::Sandbox), "{step:?}");
            assert!(snapshot.stdout.is_empty(), "{step:?}");
            assert_eq!(provider.created(), 1, "{step:?}");
            assert_eq!(provider.removed(), 1, "{step:?}");
        }
    }

    #[tokio::test]
    async fn test_remove_failure_does_not_change_verdict() {
        let provider = Arc::new(ScriptedProvider::new());
        provider.fail_on(Step::Remove);
        let executor = executor(provider.clone(), problems());
        let job = running_job("echo", "python", "echo");

        executor.execute(&job).await;

        assert_eq!(job.status(), JobStatus::Correct);
        assert_eq!(provider.removed(), 1);
    }

    #[tokio::test]
    async fn test_timeout() {
        let provider = Arc::new(ScriptedProvider::new());
        let executor =
            executor_with_timeout(provider.clone(), problems(), Duration::from_millis(50));
        let job = running_job("echo", "python", "hang");

        executor.execute(&job).await;

        let snapshot = job.snapshot();
        assert_eq!(snapshot.status, JobStatus::Failed);
        assert_eq!(snapshot.failure, Some(FailureReason::Timeout));
        assert!(provider.calls().iter().any(|c| matches!(c, Call::Kill(_))));
        assert_eq!(provider.removed(), 1);
    }

    #[tokio::test]
    async fn test_missing_expected_output_is_a_fixture_failure() {
        let provider = Arc::new(ScriptedProvider::new());
        let problems = MemoryProblems::new().without_expected("broken", "1\n");
        let executor = executor(provider.clone(), problems);
        let job = running_job("broken", "python", "echo");

        executor.execute(&job).await;

        let snapshot = job.snapshot();
        assert_eq!(snapshot.status, JobStatus::Failed);
        assert_eq!(snapshot.failure, Some(FailureReason::Fixture));
        assert_eq!(snapshot.stdout, "1\n");
        assert_eq!(provider.removed(), 1);
    }

    #[tokio::test]
    async fn test_missing_problem_fails_before_sandbox() {
        let provider = Arc::new(ScriptedProvider::new());
        let executor = executor(provider.clone(), problems());
        let job = running_job("deleted", "python", "echo");

        executor.execute(&job).await;

        assert_eq!(job.snapshot().failure, Some(FailureReason::Fixture));
        assert_eq!(provider.created(), 0);
    }
}
