//! Job Manager persistence boundary: job metadata ([`JobStore`]) and
//! per-request outcomes ([`ResultStore`]), each a trait over a keyed
//! record store so the in-memory default can later be swapped out.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::Error;
use crate::executor::ExecutionOutcome;
use crate::expansion::Provenance;

use super::{Job, JobStatus};

/// One executed request within a job, persisted independently of the
/// owning [`Job`] so results can be paginated without loading the job
/// header.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResultRecord {
    pub job_id: Uuid,
    pub ordinal: usize,
    pub request: String,
    pub provenance: Provenance,
    pub outcome: ExecutionOutcome,
    pub recorded_at: DateTime<Utc>,
}

/// Storage boundary for job headers/state.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert or overwrite a job's full record.
    ///
    /// # Errors
    /// Returns [`Error::storage`] on a persistence failure.
    async fn upsert(&self, job: Job) -> Result<(), Error>;

    /// # Errors
    /// Returns [`Error::not_found`] if no job with this id exists.
    async fn get(&self, id: Uuid) -> Result<Job, Error>;

    /// All jobs, in no particular order; callers sort as needed.
    ///
    /// # Errors
    /// Returns [`Error::storage`] on a persistence failure.
    async fn list(&self) -> Result<Vec<Job>, Error>;

    /// # Errors
    /// Returns [`Error::storage`] on a persistence failure.
    async fn delete(&self, id: Uuid) -> Result<bool, Error>;
}

/// Storage boundary for per-request results.
#[async_trait]
pub trait ResultStore: Send + Sync {
    /// # Errors
    /// Returns [`Error::storage`] on a persistence failure.
    async fn append(&self, record: JobResultRecord) -> Result<(), Error>;

    /// Results for `job_id`, ordered by ordinal, paginated.
    ///
    /// # Errors
    /// Returns [`Error::storage`] on a persistence failure.
    async fn list(&self, job_id: Uuid, limit: usize, offset: usize) -> Result<Vec<JobResultRecord>, Error>;

    /// # Errors
    /// Returns [`Error::storage`] on a persistence failure.
    async fn count(&self, job_id: Uuid) -> Result<usize, Error>;

    /// Discard all results recorded for `job_id`. Used by resume, which
    /// re-executes a job from scratch rather than continuing it.
    ///
    /// # Errors
    /// Returns [`Error::storage`] on a persistence failure.
    async fn truncate(&self, job_id: Uuid) -> Result<(), Error>;
}

/// In-memory [`JobStore`].
#[derive(Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<Uuid, Job>>,
}

impl InMemoryJobStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn upsert(&self, job: Job) -> Result<(), Error> {
        self.jobs.write().await.insert(job.id, job);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Job, Error> {
        self.jobs
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("job {id} not found")))
    }

    async fn list(&self) -> Result<Vec<Job>, Error> {
        Ok(self.jobs.read().await.values().cloned().collect())
    }

    async fn delete(&self, id: Uuid) -> Result<bool, Error> {
        Ok(self.jobs.write().await.remove(&id).is_some())
    }
}

/// In-memory [`ResultStore`].
#[derive(Default)]
pub struct InMemoryResultStore {
    results: RwLock<HashMap<Uuid, Vec<JobResultRecord>>>,
}

impl InMemoryResultStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            results: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl ResultStore for InMemoryResultStore {
    async fn append(&self, record: JobResultRecord) -> Result<(), Error> {
        let mut guard = self.results.write().await;
        guard.entry(record.job_id).or_default().push(record);
        Ok(())
    }

    async fn list(&self, job_id: Uuid, limit: usize, offset: usize) -> Result<Vec<JobResultRecord>, Error> {
        let guard = self.results.read().await;
        let rows = guard.get(&job_id).cloned().unwrap_or_default();
        Ok(rows.into_iter().skip(offset).take(limit).collect())
    }

    async fn count(&self, job_id: Uuid) -> Result<usize, Error> {
        let guard = self.results.read().await;
        Ok(guard.get(&job_id).map_or(0, Vec::len))
    }

    async fn truncate(&self, job_id: Uuid) -> Result<(), Error> {
        self.results.write().await.remove(&job_id);
        Ok(())
    }
}

/// Scans `store` at startup and reclassifies any job still `Running` as
/// `Failed("interrupted")` — there is no clean-shutdown signal for a
/// process that was killed mid-job, so a `Running` row found at
/// construction time can only mean the previous process died.
///
/// # Errors
/// Returns [`Error::storage`] if the store cannot be read or written.
pub async fn recover_interrupted_jobs(store: &Arc<dyn JobStore>) -> Result<usize, Error> {
    let jobs = store.list().await?;
    let mut recovered = 0;
    for mut job in jobs {
        if job.status == JobStatus::Running {
            job.status = JobStatus::Failed;
            job.error_message = Some("interrupted".to_string());
            job.progress.end_time = Some(Utc::now());
            job.updated_at = Utc::now();
            store.upsert(job).await?;
            recovered += 1;
        }
    }
    Ok(recovered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HTTPConfig;
    use crate::job::Progress;

    fn running_job() -> Job {
        Job {
            id: Uuid::new_v4(),
            corpus_run_id: 1,
            status: JobStatus::Running,
            progress: Progress::new(10),
            http_config: HTTPConfig::default(),
            error_message: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn recover_reclassifies_running_jobs_as_failed() {
        let store: Arc<dyn JobStore> = Arc::new(InMemoryJobStore::new());
        let job = running_job();
        let id = job.id;
        store.upsert(job).await.unwrap();

        let recovered = recover_interrupted_jobs(&store).await.unwrap();
        assert_eq!(recovered, 1);

        let job = store.get(id).await.unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error_message.as_deref(), Some("interrupted"));
    }

    #[tokio::test]
    async fn recover_leaves_terminal_jobs_untouched() {
        let store: Arc<dyn JobStore> = Arc::new(InMemoryJobStore::new());
        let mut job = running_job();
        job.status = JobStatus::Completed;
        store.upsert(job).await.unwrap();

        let recovered = recover_interrupted_jobs(&store).await.unwrap();
        assert_eq!(recovered, 0);
    }

    #[tokio::test]
    async fn result_store_truncate_clears_job_results() {
        let store = InMemoryResultStore::new();
        let job_id = Uuid::new_v4();
        store
            .append(JobResultRecord {
                job_id,
                ordinal: 1,
                request: "GET / HTTP/1.1".to_string(),
                provenance: Provenance::Original,
                outcome: ExecutionOutcome {
                    status_code: Some(200),
                    headers: vec![],
                    body: String::new(),
                    elapsed_ms: 1,
                    error: None,
                    final_url: "http://example.com/".to_string(),
                    actual_request: "GET / HTTP/1.1\r\n\r\n".to_string(),
                },
                recorded_at: Utc::now(),
            })
            .await
            .unwrap();
        assert_eq!(store.count(job_id).await.unwrap(), 1);
        store.truncate(job_id).await.unwrap();
        assert_eq!(store.count(job_id).await.unwrap(), 0);
    }
}
