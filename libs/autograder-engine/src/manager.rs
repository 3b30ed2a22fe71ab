/// Job Manager - Admission and Scheduling
///
/// **Admission:**
/// Validate a submission, append it to the job history, add it to the active
/// set. Rejected submissions never consume an id.
///
/// **Scheduling (one tick):**
/// - `Queued` + free permit: promote to `Running` and spawn its execution task
/// - `Queued` + no permit: leave for a later tick
/// - `Running`: in flight, untouched
/// - terminal: dropped from the active set, kept in history
///
/// Ticks fire on a fixed interval and also whenever a job is admitted or an
/// execution finishes.
use crate::executor::SandboxExecutor;
use crate::job::{Job, Outcome};
use crate::sandbox::CapturedOutput;
use crate::store::JobStore;
use autograder_common::config::Config;
use autograder_common::types::{
    FailureReason, JobId, JobSnapshot, JobStatus, ManagerStats, Submission,
};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, trace};

/// Why a submission was turned away. Messages are shown to API clients.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AdmitError {
    #[error("Problem {0} does not exist.")]
    UnknownProblem(String),
    #[error("Language {0} is not supported.")]
    UnsupportedLanguage(String),
    #[error("No {0} provided.")]
    MissingField(&'static str),
    #[error("Program is {size} bytes; the limit is {limit} bytes.")]
    SourceTooLarge { size: usize, limit: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerSettings {
    pub tick_interval: Duration,
    pub max_concurrent_jobs: usize,
    pub max_source_bytes: usize,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for ManagerSettings {
    fn from(config: &Config) -> Self {
        Self {
            tick_interval: config.tick_interval,
            max_concurrent_jobs: config.max_concurrent_jobs,
            max_source_bytes: config.max_source_bytes,
        }
    }
}

/// What one scheduler tick did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    pub launched: usize,
    pub running: usize,
    pub deferred: usize,
    pub retired: usize,
}

pub struct JobManager {
    store: Arc<JobStore>,
    executor: Arc<SandboxExecutor>,
    settings: ManagerSettings,
    active: Mutex<BTreeMap<JobId, Arc<Job>>>,
    permits: Arc<Semaphore>,
    wake: Arc<Notify>,
}

impl JobManager {
    pub fn new(
        store: Arc<JobStore>,
        executor: Arc<SandboxExecutor>,
        settings: ManagerSettings,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(
            settings.max_concurrent_jobs.min(Semaphore::MAX_PERMITS),
        ));
        Self {
            store,
            executor,
            settings,
            active: Mutex::new(BTreeMap::new()),
            permits,
            wake: Arc::new(Notify::new()),
        }
    }

    pub fn executor(&self) -> &SandboxExecutor {
        &self.executor
    }

    pub fn settings(&self) -> &ManagerSettings {
        &self.settings
    }

    /// Validate and enqueue a submission; execution happens later.
    pub async fn admit(&self, submission: Submission) -> Result<JobSnapshot, AdmitError> {
        if submission.problem.trim().is_empty() {
            return Err(AdmitError::MissingField("problem"));
        }
        if submission.language.trim().is_empty() {
            return Err(AdmitError::MissingField("language"));
        }
        if submission.source.is_empty() {
            return Err(AdmitError::MissingField("program"));
        }
        if submission.source.len() > self.settings.max_source_bytes {
            return Err(AdmitError::SourceTooLarge {
                size: submission.source.len(),
                limit: self.settings.max_source_bytes,
            });
        }
        if !self.executor.problems().exists(&submission.problem).await {
            return Err(AdmitError::UnknownProblem(submission.problem));
        }
        if !self.executor.languages().contains(&submission.language) {
            return Err(AdmitError::UnsupportedLanguage(submission.language));
        }

        let job = self.store.append(submission);
        let snapshot = job.snapshot();
        info!(
            job_id = snapshot.id,
            problem = %snapshot.problem,
            language = %snapshot.language,
            "Job admitted"
        );

        self.active.lock().insert(job.id(), job);
        self.wake.notify_one();
        Ok(snapshot)
    }

    /// Current snapshot of any job ever admitted.
    pub fn get(&self, id: JobId) -> Option<JobSnapshot> {
        self.store.get(id).map(|job| job.snapshot())
    }

    pub fn stats(&self) -> ManagerStats {
        let mut stats = self.store.stats();
        stats.active = self.active.lock().len();
        stats
    }

    /// One pass over the active set. Must be called inside a tokio runtime.
    pub fn tick(&self) -> TickReport {
        let mut report = TickReport::default();

        self.active.lock().retain(|_, job| match job.status() {
            JobStatus::Queued => {
                match Arc::clone(&self.permits).try_acquire_owned() {
                    Ok(permit) => {
                        if job.start().is_ok() {
                            self.launch(Arc::clone(job), permit);
                            report.launched += 1;
                        }
                    }
                    Err(_) => report.deferred += 1,
                }
                true
            }
            JobStatus::Running => {
                report.running += 1;
                true
            }
            _ => {
                report.retired += 1;
                false
            }
        });

        trace!(
            launched = report.launched,
            running = report.running,
            deferred = report.deferred,
            retired = report.retired,
            "Scheduler tick"
        );
        report
    }

    fn launch(&self, job: Arc<Job>, permit: OwnedSemaphorePermit) {
        debug!(job_id = job.id(), "Job promoted to running");

        let executor = Arc::clone(&self.executor);
        let wake = Arc::clone(&self.wake);

        tokio::spawn(async move {
            // Inner task so a panic surfaces as a JoinError instead of
            // leaving the job stuck in Running.
            let run = {
                let job = Arc::clone(&job);
                tokio::spawn(async move { executor.execute(&job).await })
            };

            if let Err(e) = run.await {
                error!(job_id = job.id(), error = %e, "Execution task aborted");
                let outcome = Outcome::failed(FailureReason::Internal, CapturedOutput::default());
                if let Err(e) = job.finish(outcome) {
                    error!(job_id = job.id(), error = %e, "Failed to record job outcome");
                }
            }

            drop(permit);
            wake.notify_one();
        });
    }

    /// Drive the scheduler until `shutdown` resolves.
    ///
    /// Jobs already running keep going after this returns.
    pub async fn run_until<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut interval = tokio::time::interval(self.settings.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        info!(
            tick_ms = self.settings.tick_interval.as_millis() as u64,
            max_concurrent_jobs = self.settings.max_concurrent_jobs,
            "Scheduler started"
        );

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = interval.tick() => {}
                _ = self.wake.notified() => {}
            }
            self.tick();
        }

        info!("Scheduler stopped");
    }

    /// Poll a job until it is terminal. `None` if the id is unknown.
    pub async fn wait_for_terminal(&self, id: JobId, poll: Duration) -> Option<JobSnapshot> {
        let job = self.store.get(id)?;
        loop {
            let snapshot = job.snapshot();
            if snapshot.status.is_terminal() {
                return Some(snapshot);
            }
            tokio::time::sleep(poll).await;
        }
    }
}
