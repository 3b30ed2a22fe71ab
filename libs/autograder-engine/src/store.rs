// Append-only job history
use crate::job::Job;
use autograder_common::types::{JobId, ManagerStats, Submission};
use parking_lot::RwLock;
use std::sync::Arc;

/// Every job ever admitted, indexed by id.
///
/// Ids are positions in the history, assigned under the write lock, so they
/// are dense, monotonic and never reused.
#[derive(Debug, Default)]
pub struct JobStore {
    jobs: RwLock<Vec<Arc<Job>>>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the next job for `submission` and append it.
    pub fn append(&self, submission: Submission) -> Arc<Job> {
        let mut jobs = self.jobs.write();
        let job = Arc::new(Job::new(jobs.len() as JobId, submission));
        jobs.push(Arc::clone(&job));
        job
    }

    pub fn get(&self, id: JobId) -> Option<Arc<Job>> {
        let index = usize::try_from(id).ok()?;
        self.jobs.read().get(index).cloned()
    }

    pub fn len(&self) -> usize {
        self.jobs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.read().is_empty()
    }

    /// Per-status counts over the whole history
    pub fn stats(&self) -> ManagerStats {
        let mut stats = ManagerStats::default();
        for job in self.jobs.read().iter() {
            stats.record(job.status());
        }
        stats
    }
}
