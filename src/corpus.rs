//! Corpus Store: persists an expansion as an immutable
//! [`CorpusRun`] plus its ordered [`GeneratedRequest`] rows, behind a
//! trait so the Job Manager never depends on a concrete backend.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::Error;
use crate::expansion::{Generated, PayloadSet, Provenance, Strategy};

/// One row of a [`CorpusRun`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedRequest {
    pub run_id: i64,
    /// 1-based ordinal position within the run.
    pub ordinal: usize,
    pub request: String,
    pub provenance: Provenance,
}

/// One expansion, immutable after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorpusRun {
    pub id: i64,
    pub template: String,
    pub placeholders: Vec<String>,
    pub strategy: Strategy,
    pub payload_sets: Vec<PayloadSet>,
    pub total_generated: usize,
    pub created_at: DateTime<Utc>,
}

/// A `CorpusRun` together with its generated rows, as returned by `get`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorpusRunDetail {
    pub run: CorpusRun,
    pub requests: Vec<GeneratedRequest>,
}

/// Aggregate counts returned by `statistics`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CorpusStatistics {
    pub total_runs: usize,
    pub total_generated: usize,
    pub by_strategy: HashMap<String, usize>,
}

/// Storage boundary for corpus runs. The default implementation is
/// in-memory; a real relational backend implements the same trait without
/// the Expansion Engine or Job Manager needing to change.
#[async_trait]
pub trait CorpusStore: Send + Sync {
    /// Persist a new run atomically: the header and all generated rows
    /// appear together or not at all.
    ///
    /// # Errors
    /// Returns [`Error::storage`] on a persistence failure.
    async fn save(
        &self,
        template: String,
        placeholders: Vec<String>,
        strategy: Strategy,
        payload_sets: Vec<PayloadSet>,
        generated: Vec<Generated>,
    ) -> Result<i64, Error>;

    /// List runs, newest first.
    ///
    /// # Errors
    /// Returns [`Error::storage`] on a persistence failure.
    async fn list(&self, limit: usize, offset: usize) -> Result<Vec<CorpusRun>, Error>;

    /// Fetch a run with its full ordered generated rows.
    ///
    /// # Errors
    /// Returns [`Error::not_found`] if the run does not exist.
    async fn get(&self, run_id: i64) -> Result<CorpusRunDetail, Error>;

    /// Delete a run. Returns `false` if it did not exist.
    ///
    /// # Errors
    /// Returns [`Error::forbidden_transition`] if a non-terminal job still
    /// references this run.
    async fn delete(&self, run_id: i64, has_active_job: bool) -> Result<bool, Error>;

    /// Aggregate counts across all runs.
    ///
    /// # Errors
    /// Returns [`Error::storage`] on a persistence failure.
    async fn statistics(&self) -> Result<CorpusStatistics, Error>;
}

/// In-memory [`CorpusStore`], the default backend: an explicit context
/// object injected by the caller rather than a global singleton.
#[derive(Default)]
pub struct InMemoryCorpusStore {
    next_id: AtomicI64,
    runs: RwLock<HashMap<i64, Arc<CorpusRunDetail>>>,
}

impl InMemoryCorpusStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_id: AtomicI64::new(1),
            runs: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl CorpusStore for InMemoryCorpusStore {
    async fn save(
        &self,
        template: String,
        placeholders: Vec<String>,
        strategy: Strategy,
        payload_sets: Vec<PayloadSet>,
        generated: Vec<Generated>,
    ) -> Result<i64, Error> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let requests: Vec<GeneratedRequest> = generated
            .into_iter()
            .enumerate()
            .map(|(i, g)| GeneratedRequest {
                run_id: id,
                ordinal: i + 1,
                request: g.request,
                provenance: g.provenance,
            })
            .collect();
        let run = CorpusRun {
            id,
            template,
            placeholders,
            strategy,
            payload_sets,
            total_generated: requests.len(),
            created_at: Utc::now(),
        };
        let detail = Arc::new(CorpusRunDetail { run, requests });

        let mut guard = self.runs.write().await;
        guard.insert(id, detail);
        Ok(id)
    }

    async fn list(&self, limit: usize, offset: usize) -> Result<Vec<CorpusRun>, Error> {
        let guard = self.runs.read().await;
        let mut runs: Vec<CorpusRun> = guard.values().map(|d| d.run.clone()).collect();
        runs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(runs.into_iter().skip(offset).take(limit).collect())
    }

    async fn get(&self, run_id: i64) -> Result<CorpusRunDetail, Error> {
        let guard = self.runs.read().await;
        guard
            .get(&run_id)
            .map(|d| (**d).clone())
            .ok_or_else(|| Error::not_found(format!("corpus run {run_id} not found")))
    }

    async fn delete(&self, run_id: i64, has_active_job: bool) -> Result<bool, Error> {
        if has_active_job {
            return Err(Error::forbidden_transition(
                "cannot delete a corpus run referenced by a non-terminal job",
            ));
        }
        let mut guard = self.runs.write().await;
        Ok(guard.remove(&run_id).is_some())
    }

    async fn statistics(&self) -> Result<CorpusStatistics, Error> {
        let guard = self.runs.read().await;
        let mut stats = CorpusStatistics {
            total_runs: guard.len(),
            ..Default::default()
        };
        for detail in guard.values() {
            stats.total_generated += detail.run.total_generated;
            *stats
                .by_strategy
                .entry(detail.run.strategy.to_string())
                .or_insert(0) += 1;
        }
        Ok(stats)
    }
}
