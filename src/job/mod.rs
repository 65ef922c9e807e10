//! Job Manager: supervises execution of a corpus run against a
//! target, with cancellation, resume-from-scratch, and crash recovery.
//! Built as an explicit context object over injected store traits rather
//! than a global singleton.

pub mod store;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, Notify, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::{FuzzerConfig, HTTPConfig};
use crate::corpus::CorpusStore;
use crate::error::Error;
use crate::executor::{BatchItem, Executor, ExecutionOutcome, ResultSink};

pub use store::{JobResultRecord, JobStore, ResultStore};

/// A job's lifecycle state. Terminal states are `Completed`,
/// `Failed`, and `Cancelled`; only `Cancelled`/`Failed` may be resumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    #[must_use]
    pub const fn is_resumable(self) -> bool {
        matches!(self, Self::Failed | Self::Cancelled)
    }
}

/// Progress counters tracked for a running or finished job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Progress {
    pub total_requests: usize,
    pub completed_requests: usize,
    pub successful_requests: usize,
    pub failed_requests: usize,
    pub current_request: usize,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    /// `(total - completed) / rate`, where `rate` is requests completed per
    /// second so far. `None` until at least one request has completed.
    pub estimated_remaining_seconds: Option<f64>,
}

impl Progress {
    #[must_use]
    pub fn new(total_requests: usize) -> Self {
        Self {
            total_requests,
            completed_requests: 0,
            successful_requests: 0,
            failed_requests: 0,
            current_request: 0,
            start_time: None,
            end_time: None,
            estimated_remaining_seconds: None,
        }
    }

    /// Percentage complete, `0.0` for an empty job rather than dividing by
    /// zero.
    #[must_use]
    pub fn percentage(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            (self.completed_requests as f64 / self.total_requests as f64) * 100.0
        }
    }
}

/// A unit of supervised execution against one corpus run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub corpus_run_id: i64,
    pub status: JobStatus,
    pub progress: Progress,
    pub http_config: HTTPConfig,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Aggregate job counts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobStatistics {
    pub total_jobs: usize,
    pub active_jobs: usize,
    pub by_status: HashMap<String, usize>,
}

/// Supervises job execution: a bounded scheduler picks up `Pending` jobs,
/// runs them to a terminal state, and honors cooperative cancellation.
pub struct JobManager {
    job_store: Arc<dyn JobStore>,
    result_store: Arc<dyn ResultStore>,
    corpus_store: Arc<dyn CorpusStore>,
    config: FuzzerConfig,
    active_slots: Arc<Semaphore>,
    cancellations: Mutex<HashMap<Uuid, CancellationToken>>,
    wake: Notify,
}

impl JobManager {
    /// Build a manager over the given stores, recovering any job left
    /// `Running` by a prior process.
    ///
    /// # Errors
    /// Returns [`Error::storage`] if the job store cannot be read.
    pub async fn new(
        job_store: Arc<dyn JobStore>,
        result_store: Arc<dyn ResultStore>,
        corpus_store: Arc<dyn CorpusStore>,
        config: FuzzerConfig,
    ) -> Result<Arc<Self>, Error> {
        let recovered = store::recover_interrupted_jobs(&job_store).await?;
        if recovered > 0 {
            warn!(recovered, "reclassified jobs left RUNNING by a prior process as FAILED");
        }

        Ok(Arc::new(Self {
            active_slots: Arc::new(Semaphore::new(config.max_concurrent_jobs)),
            job_store,
            result_store,
            corpus_store,
            config,
            cancellations: Mutex::new(HashMap::new()),
            wake: Notify::new(),
        }))
    }

    /// Create a new job against `corpus_run_id`, left `Pending` for the
    /// scheduler to pick up.
    ///
    /// # Errors
    /// Returns [`Error::not_found`] if the corpus run does not exist.
    pub async fn create_job(&self, corpus_run_id: i64, http_config: HTTPConfig) -> Result<Uuid, Error> {
        let run = self.corpus_store.get(corpus_run_id).await?;
        let job = Job {
            id: Uuid::new_v4(),
            corpus_run_id,
            status: JobStatus::Pending,
            progress: Progress::new(run.run.total_generated),
            http_config,
            error_message: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let id = job.id;
        self.job_store.upsert(job).await?;
        self.wake.notify_one();
        Ok(id)
    }

    /// # Errors
    /// Returns [`Error::not_found`] if the job does not exist.
    pub async fn get_job(&self, id: Uuid) -> Result<Job, Error> {
        self.job_store.get(id).await
    }

    /// # Errors
    /// Returns [`Error::storage`] on a persistence failure.
    pub async fn list_jobs(&self) -> Result<Vec<Job>, Error> {
        self.job_store.list().await
    }

    /// Paginated results for a job.
    ///
    /// # Errors
    /// Returns [`Error::not_found`] if the job does not exist.
    pub async fn job_results(
        &self,
        id: Uuid,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<JobResultRecord>, Error> {
        self.job_store.get(id).await?;
        self.result_store.list(id, limit, offset).await
    }

    /// Cancel a job. A `Pending` job is cancelled immediately; a `Running`
    /// job's cancellation token is signalled and the scheduler's
    /// in-flight execution observes it.
    ///
    /// # Errors
    /// Returns [`Error::forbidden_transition`] if the job is already in a
    /// terminal state.
    pub async fn cancel_job(&self, id: Uuid) -> Result<(), Error> {
        let mut job = self.job_store.get(id).await?;
        if job.status.is_terminal() {
            return Err(Error::forbidden_transition(format!(
                "cannot cancel job {id} in terminal state"
            )));
        }

        if let Some(token) = self.cancellations.lock().await.get(&id) {
            token.cancel();
        }

        job.status = JobStatus::Cancelled;
        job.progress.end_time = Some(Utc::now());
        job.updated_at = Utc::now();
        self.job_store.upsert(job).await
    }

    /// Resume a `Failed`/`Cancelled` job from scratch: prior results are
    /// discarded and the job is reset to `Pending`. A partially-executed
    /// job is re-run in full, not continued from where it stopped.
    ///
    /// # Errors
    /// Returns [`Error::forbidden_transition`] if the job is not in a
    /// resumable state.
    pub async fn resume_job(&self, id: Uuid) -> Result<(), Error> {
        let mut job = self.job_store.get(id).await?;
        if !job.status.is_resumable() {
            return Err(Error::forbidden_transition(format!(
                "job {id} is not in a resumable state"
            )));
        }

        self.result_store.truncate(id).await?;
        job.status = JobStatus::Pending;
        job.progress = Progress::new(job.progress.total_requests);
        job.error_message = None;
        job.updated_at = Utc::now();
        self.job_store.upsert(job).await?;
        self.wake.notify_one();
        Ok(())
    }

    /// Aggregate counts across all jobs.
    ///
    /// # Errors
    /// Returns [`Error::storage`] on a persistence failure.
    pub async fn statistics(&self) -> Result<JobStatistics, Error> {
        let jobs = self.job_store.list().await?;
        let mut stats = JobStatistics {
            total_jobs: jobs.len(),
            active_jobs: self.config.max_concurrent_jobs - self.active_slots.available_permits(),
            ..Default::default()
        };
        for job in &jobs {
            let key = match job.status {
                JobStatus::Pending => "pending",
                JobStatus::Running => "running",
                JobStatus::Completed => "completed",
                JobStatus::Failed => "failed",
                JobStatus::Cancelled => "cancelled",
            };
            *stats.by_status.entry(key.to_string()).or_insert(0) += 1;
        }
        Ok(stats)
    }

    /// Spawn the scheduler loop as a background task. The returned handle
    /// is owned by the caller (typically held for the process lifetime).
    #[must_use]
    pub fn spawn_scheduler(self: &Arc<Self>) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move { manager.scheduler_loop().await })
    }

    async fn scheduler_loop(self: Arc<Self>) {
        let tick = std::time::Duration::from_secs(self.config.scheduler_tick_secs);
        loop {
            tokio::select! {
                () = tokio::time::sleep(tick) => {}
                () = self.wake.notified() => {}
            }

            let Ok(jobs) = self.job_store.list().await else {
                continue;
            };
            for job in jobs.into_iter().filter(|j| j.status == JobStatus::Pending) {
                let Ok(permit) = Arc::clone(&self.active_slots).try_acquire_owned() else {
                    break;
                };
                let manager = Arc::clone(&self);
                let job_id = job.id;
                tokio::spawn(async move {
                    let _permit = permit;
                    manager.run_job(job_id).await;
                });
            }
        }
    }

    async fn run_job(self: Arc<Self>, job_id: Uuid) {
        let Ok(mut job) = self.job_store.get(job_id).await else {
            return;
        };
        if job.status != JobStatus::Pending {
            return;
        }

        let token = CancellationToken::new();
        self.cancellations.lock().await.insert(job_id, token.clone());

        job.status = JobStatus::Running;
        job.progress.start_time = Some(Utc::now());
        job.updated_at = Utc::now();
        if self.job_store.upsert(job.clone()).await.is_err() {
            self.cancellations.lock().await.remove(&job_id);
            return;
        }

        info!(%job_id, "job started");
        let outcome = self.execute_job(&job, &token).await;
        self.cancellations.lock().await.remove(&job_id);

        let mut job = match self.job_store.get(job_id).await {
            Ok(j) => j,
            Err(_) => return,
        };

        match outcome {
            Ok(()) if token.is_cancelled() => {
                job.status = JobStatus::Cancelled;
            }
            Ok(()) => {
                job.status = JobStatus::Completed;
            }
            Err(e) => {
                job.status = JobStatus::Failed;
                job.error_message = Some(e.to_string());
            }
        }
        job.progress.end_time = Some(Utc::now());
        job.updated_at = Utc::now();
        let _ = self.job_store.upsert(job).await;
        info!(%job_id, "job finished");
    }

    async fn execute_job(&self, job: &Job, token: &CancellationToken) -> Result<(), Error> {
        let detail = self.corpus_store.get(job.corpus_run_id).await?;
        let executor = Executor::new(job.http_config.clone())?;

        let items: Vec<BatchItem> = detail
            .requests
            .iter()
            .map(|r| BatchItem {
                ordinal: r.ordinal,
                request: crate::parser::ParsedRequest::parse(&r.request)
                    .unwrap_or_else(|_| crate::parser::ParsedRequest {
                        method: "GET".to_string(),
                        target: "/".to_string(),
                        version: "HTTP/1.1".to_string(),
                        headers: indexmap::IndexMap::new(),
                        body: Vec::new(),
                    }),
            })
            .collect();
        let by_ordinal: HashMap<usize, (crate::expansion::Provenance, String)> = detail
            .requests
            .iter()
            .map(|r| (r.ordinal, (r.provenance.clone(), r.request.clone())))
            .collect();

        let sink: Arc<dyn ResultSink> = Arc::new(ProgressSink {
            job_id: job.id,
            job_store: Arc::clone(&self.job_store),
            result_store: Arc::clone(&self.result_store),
            by_ordinal,
            total: job.progress.total_requests,
            started_at: Utc::now(),
            state: Mutex::new(ProgressState::default()),
        });

        crate::executor::run_batch(
            &executor,
            self.config.max_request_concurrency,
            items,
            token,
            &sink,
        )
        .await;

        Ok(())
    }
}

#[derive(Default)]
struct ProgressState {
    completed: usize,
    successful: usize,
    failed: usize,
}

/// Persists progress and the result record after every individual request
/// completes, rather than batching the whole run before writing anything —
/// a cancelled or crashed job otherwise leaves no trace of partial progress.
struct ProgressSink {
    job_id: Uuid,
    job_store: Arc<dyn JobStore>,
    result_store: Arc<dyn ResultStore>,
    by_ordinal: HashMap<usize, (crate::expansion::Provenance, String)>,
    total: usize,
    started_at: DateTime<Utc>,
    state: Mutex<ProgressState>,
}

#[async_trait]
impl ResultSink for ProgressSink {
    async fn record(&self, ordinal: usize, outcome: &ExecutionOutcome) {
        let (provenance, request_text) = self
            .by_ordinal
            .get(&ordinal)
            .cloned()
            .unwrap_or((crate::expansion::Provenance::Original, String::new()));

        let _ = self
            .result_store
            .append(JobResultRecord {
                job_id: self.job_id,
                ordinal,
                request: request_text,
                provenance,
                outcome: outcome.clone(),
                recorded_at: Utc::now(),
            })
            .await;

        let (completed, successful, failed) = {
            let mut state = self.state.lock().await;
            state.completed += 1;
            if outcome.error.is_some() {
                state.failed += 1;
            } else {
                state.successful += 1;
            }
            (state.completed, state.successful, state.failed)
        };

        let elapsed_secs = (Utc::now() - self.started_at).num_milliseconds().max(0) as f64 / 1000.0;
        let rate = if elapsed_secs > 0.0 {
            completed as f64 / elapsed_secs
        } else {
            0.0
        };
        let estimated_remaining_seconds = if rate > 0.0 {
            Some((self.total.saturating_sub(completed)) as f64 / rate)
        } else {
            None
        };

        if let Ok(mut refreshed) = self.job_store.get(self.job_id).await {
            refreshed.progress.completed_requests = completed;
            refreshed.progress.successful_requests = successful;
            refreshed.progress.failed_requests = failed;
            refreshed.progress.current_request = completed;
            refreshed.progress.estimated_remaining_seconds = estimated_remaining_seconds;
            refreshed.updated_at = Utc::now();
            let _ = self.job_store.upsert(refreshed).await;
        }
    }
}
