//! External interface surface: the operations a JSON API would expose,
//! minus transport, authentication, and routing, which are explicitly
//! out of scope. [`FuzzerService`] is the trait boundary a future HTTP
//! server crate would adapt into routes; [`DefaultFuzzerService`] wires
//! the Expansion Engine, Corpus Store, Job Manager, and Analysis Engines
//! together behind it.
//!
//! Separates pure service logic from how a caller reaches it, so the
//! same methods back both the CLI and a future HTTP layer.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::analysis::{
    error_patterns, reflection, time_delay, ErrorPatternConfig, ErrorPatternReport,
    ReflectionConfig, ReflectionReport, TimeDelayConfig, TimeDelayReport,
};
use crate::config::HTTPConfig;
use crate::corpus::{CorpusRun, CorpusStatistics, CorpusStore};
use crate::error::Error;
use crate::executor::{Executor, ExecutionOutcome};
use crate::expansion::{self, Generated, MutationSpec, PayloadSet, Provenance, Strategy};
use crate::job::{Job, JobManager, JobResultRecord, JobStatistics};
use crate::parser::ParsedRequest;

/// `POST /replace-placeholders`, `POST /mutations` request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpandRequest {
    pub template: String,
    pub placeholders: Vec<String>,
    pub strategy: Strategy,
    pub payload_sets: Vec<PayloadSet>,
}

/// `{strategy, total_requests, requests[], request_id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpandResponse {
    pub strategy: Strategy,
    pub total_requests: usize,
    pub requests: Vec<ExpandedRequestView>,
    pub run_id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpandedRequestView {
    pub ordinal: usize,
    pub request: String,
    pub provenance: Provenance,
}

/// `POST /mutations` request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MutationRequest {
    pub template: String,
    pub mutations: Vec<MutationSpec>,
}

/// `POST /execute-requests` request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteRequest {
    pub run_id: i64,
    pub http_config: Option<HTTPConfig>,
}

/// `{job_id, status}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteResponse {
    pub job_id: Uuid,
    pub status: &'static str,
}

/// `POST /execute-single-request` request body: synchronous, bypasses the
/// Job Manager entirely.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SingleExecuteRequest {
    pub run_id: i64,
    pub ordinal: usize,
    pub http_config: Option<HTTPConfig>,
}

/// A page of results plus whether more remain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultPage {
    pub results: Vec<JobResultRecord>,
    pub has_more: bool,
}

/// `{kind, config}` request for one of the three analysis endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AnalysisRequest {
    ErrorPatterns(ErrorPatternConfig),
    PayloadReflection(ReflectionConfig),
    TimeDelay(TimeDelayConfig),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AnalysisReport {
    ErrorPatterns(ErrorPatternReport),
    PayloadReflection(ReflectionReport),
    TimeDelay(TimeDelayReport),
}

/// The operations a caller can perform, expressed as a Rust trait. A
/// server crate adapts each method to a route; this crate stops at the
/// service boundary and never handles transport or authentication.
#[async_trait]
pub trait FuzzerService: Send + Sync {
    /// `POST /replace-placeholders`.
    async fn expand(&self, request: ExpandRequest) -> Result<ExpandResponse, Error>;

    /// `POST /mutations`.
    async fn expand_mutations(&self, request: MutationRequest) -> Result<ExpandResponse, Error>;

    /// `GET /history?limit&offset`.
    async fn list_history(&self, limit: usize, offset: usize) -> Result<Vec<CorpusRun>, Error>;

    /// `GET /history/{id}`.
    async fn get_history(&self, run_id: i64) -> Result<CorpusRun, Error>;

    /// `DELETE /history/{id}`.
    async fn delete_history(&self, run_id: i64) -> Result<bool, Error>;

    /// `GET /statistics`.
    async fn corpus_statistics(&self) -> Result<CorpusStatistics, Error>;

    /// `POST /execute-requests`.
    async fn execute_requests(&self, request: ExecuteRequest) -> Result<ExecuteResponse, Error>;

    /// `POST /execute-single-request`.
    async fn execute_single_request(
        &self,
        request: SingleExecuteRequest,
    ) -> Result<ExecutionOutcome, Error>;

    /// `GET /jobs`.
    async fn list_jobs(&self) -> Result<Vec<Job>, Error>;

    /// `GET /jobs/{id}`.
    async fn get_job(&self, job_id: Uuid) -> Result<Job, Error>;

    /// `POST /jobs/{id}/stop`.
    async fn stop_job(&self, job_id: Uuid) -> Result<(), Error>;

    /// `POST /jobs/{id}/resume`.
    async fn resume_job(&self, job_id: Uuid) -> Result<(), Error>;

    /// `GET /jobs/{id}/results?limit&offset`.
    async fn job_results(&self, job_id: Uuid, limit: usize, offset: usize) -> Result<ResultPage, Error>;

    /// `GET /jobs/{id}/results/{ordinal}`.
    async fn job_result(&self, job_id: Uuid, ordinal: usize) -> Result<JobResultRecord, Error>;

    /// `GET|POST /jobs/{id}/analyze/{error-patterns,payload-reflection,time-delay}`.
    async fn analyze(&self, job_id: Uuid, request: AnalysisRequest) -> Result<AnalysisReport, Error>;

    /// `GET /jobs` summary counts, surfaced separately from `/statistics`
    /// so a caller can poll scheduler health without paging all jobs.
    async fn job_statistics(&self) -> Result<JobStatistics, Error>;
}

/// The concrete [`FuzzerService`] wiring used by the demonstration CLI and
/// by integration tests.
pub struct DefaultFuzzerService {
    corpus: Arc<dyn CorpusStore>,
    jobs: Arc<JobManager>,
    default_http_config: HTTPConfig,
}

impl DefaultFuzzerService {
    #[must_use]
    pub fn new(corpus: Arc<dyn CorpusStore>, jobs: Arc<JobManager>, default_http_config: HTTPConfig) -> Self {
        Self {
            corpus,
            jobs,
            default_http_config,
        }
    }

    async fn persist_expansion(
        &self,
        template: String,
        placeholders: Vec<String>,
        strategy: Strategy,
        payload_sets: Vec<PayloadSet>,
        generated: Vec<Generated>,
    ) -> Result<ExpandResponse, Error> {
        let total = generated.len();
        let views: Vec<ExpandedRequestView> = generated
            .iter()
            .enumerate()
            .map(|(i, g)| ExpandedRequestView {
                ordinal: i + 1,
                request: g.request.clone(),
                provenance: g.provenance.clone(),
            })
            .collect();

        let run_id = self
            .corpus
            .save(template, placeholders, strategy, payload_sets, generated)
            .await?;

        Ok(ExpandResponse {
            strategy,
            total_requests: total,
            requests: views,
            run_id,
        })
    }
}

#[async_trait]
impl FuzzerService for DefaultFuzzerService {
    async fn expand(&self, request: ExpandRequest) -> Result<ExpandResponse, Error> {
        let generated = expansion::expand(
            &request.template,
            &request.placeholders,
            request.strategy,
            &request.payload_sets,
        )?;
        self.persist_expansion(
            request.template,
            request.placeholders,
            request.strategy,
            request.payload_sets,
            generated,
        )
        .await
    }

    async fn expand_mutations(&self, request: MutationRequest) -> Result<ExpandResponse, Error> {
        let generated = expansion::expand_mutations(&request.template, &request.mutations);
        self.persist_expansion(request.template, vec![], Strategy::Mutation, vec![], generated)
            .await
    }

    async fn list_history(&self, limit: usize, offset: usize) -> Result<Vec<CorpusRun>, Error> {
        self.corpus.list(limit, offset).await
    }

    async fn get_history(&self, run_id: i64) -> Result<CorpusRun, Error> {
        Ok(self.corpus.get(run_id).await?.run)
    }

    async fn delete_history(&self, run_id: i64) -> Result<bool, Error> {
        let active_jobs = self.jobs.list_jobs().await?;
        let has_active_job = active_jobs
            .iter()
            .any(|j| j.corpus_run_id == run_id && !j.status.is_terminal());
        self.corpus.delete(run_id, has_active_job).await
    }

    async fn corpus_statistics(&self) -> Result<CorpusStatistics, Error> {
        self.corpus.statistics().await
    }

    async fn execute_requests(&self, request: ExecuteRequest) -> Result<ExecuteResponse, Error> {
        let http_config = request.http_config.unwrap_or_else(|| self.default_http_config.clone());
        let job_id = self.jobs.create_job(request.run_id, http_config).await?;
        Ok(ExecuteResponse {
            job_id,
            status: "pending",
        })
    }

    async fn execute_single_request(
        &self,
        request: SingleExecuteRequest,
    ) -> Result<ExecutionOutcome, Error> {
        let detail = self.corpus.get(request.run_id).await?;
        let row = detail
            .requests
            .iter()
            .find(|r| r.ordinal == request.ordinal)
            .ok_or_else(|| Error::not_found(format!("ordinal {} not found in run {}", request.ordinal, request.run_id)))?;

        let http_config = request.http_config.unwrap_or_else(|| self.default_http_config.clone());
        let executor = Executor::new(http_config)?;
        let parsed = ParsedRequest::parse(&row.request)?;
        Ok(executor.execute(&parsed).await)
    }

    async fn list_jobs(&self) -> Result<Vec<Job>, Error> {
        self.jobs.list_jobs().await
    }

    async fn get_job(&self, job_id: Uuid) -> Result<Job, Error> {
        self.jobs.get_job(job_id).await
    }

    async fn stop_job(&self, job_id: Uuid) -> Result<(), Error> {
        self.jobs.cancel_job(job_id).await
    }

    async fn resume_job(&self, job_id: Uuid) -> Result<(), Error> {
        self.jobs.resume_job(job_id).await
    }

    async fn job_results(&self, job_id: Uuid, limit: usize, offset: usize) -> Result<ResultPage, Error> {
        let mut results = self.jobs.job_results(job_id, limit + 1, offset).await?;
        let has_more = results.len() > limit;
        results.truncate(limit);
        Ok(ResultPage { results, has_more })
    }

    async fn job_result(&self, job_id: Uuid, ordinal: usize) -> Result<JobResultRecord, Error> {
        let page = self.jobs.job_results(job_id, usize::MAX, 0).await?;
        page.into_iter()
            .find(|r| r.ordinal == ordinal)
            .ok_or_else(|| Error::not_found(format!("result {ordinal} not found for job {job_id}")))
    }

    async fn analyze(&self, job_id: Uuid, request: AnalysisRequest) -> Result<AnalysisReport, Error> {
        let records = self.jobs.job_results(job_id, usize::MAX, 0).await?;
        Ok(match request {
            AnalysisRequest::ErrorPatterns(config) => {
                AnalysisReport::ErrorPatterns(error_patterns::scan(&records, &config))
            }
            AnalysisRequest::PayloadReflection(config) => {
                AnalysisReport::PayloadReflection(reflection::scan(&records, &config))
            }
            AnalysisRequest::TimeDelay(config) => {
                AnalysisReport::TimeDelay(time_delay::scan(&records, &config))
            }
        })
    }

    async fn job_statistics(&self) -> Result<JobStatistics, Error> {
        self.jobs.statistics().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FuzzerConfig;
    use crate::corpus::InMemoryCorpusStore;
    use crate::job::store::{InMemoryJobStore, InMemoryResultStore};
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn service_with_server() -> (DefaultFuzzerService, MockServer) {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("hello"))
            .mount(&server)
            .await;

        let corpus: Arc<dyn CorpusStore> = Arc::new(InMemoryCorpusStore::new());
        let job_store: Arc<dyn crate::job::JobStore> = Arc::new(InMemoryJobStore::new());
        let result_store: Arc<dyn crate::job::ResultStore> = Arc::new(InMemoryResultStore::new());
        let mut config = FuzzerConfig::default();
        config.default_http_config.base_url = server.address().to_string();
        let jobs = JobManager::new(job_store, result_store, Arc::clone(&corpus), config.clone())
            .await
            .unwrap();
        let service = DefaultFuzzerService::new(corpus, jobs, config.default_http_config.clone());
        (service, server)
    }

    #[tokio::test]
    async fn expand_persists_a_corpus_run() {
        let (service, _server) = service_with_server().await;
        let response = service
            .expand(ExpandRequest {
                template: "q=<<>>".to_string(),
                placeholders: vec![],
                strategy: Strategy::Sniper,
                payload_sets: vec![PayloadSet::new("p", vec!["a".into(), "b".into()])],
            })
            .await
            .unwrap();
        assert_eq!(response.total_requests, 3);
        let fetched = service.get_history(response.run_id).await.unwrap();
        assert_eq!(fetched.total_generated, 3);
    }

    #[tokio::test]
    async fn execute_requests_creates_a_pending_job() {
        let (service, _server) = service_with_server().await;
        let expand = service
            .expand(ExpandRequest {
                template: "q=<<>>".to_string(),
                placeholders: vec![],
                strategy: Strategy::Sniper,
                payload_sets: vec![PayloadSet::new("p", vec!["a".into()])],
            })
            .await
            .unwrap();

        let response = service
            .execute_requests(ExecuteRequest {
                run_id: expand.run_id,
                http_config: None,
            })
            .await
            .unwrap();
        assert_eq!(response.status, "pending");
        let job = service.get_job(response.job_id).await.unwrap();
        assert_eq!(job.status, crate::job::JobStatus::Pending);
    }

    #[tokio::test]
    async fn execute_single_request_bypasses_job_manager() {
        let (service, _server) = service_with_server().await;
        let expand = service
            .expand(ExpandRequest {
                template: "GET /x HTTP/1.1\r\n\r\n".to_string(),
                placeholders: vec![],
                strategy: Strategy::Sniper,
                payload_sets: vec![PayloadSet::new("p", vec!["a".into()])],
            })
            .await
            .unwrap();

        let outcome = service
            .execute_single_request(SingleExecuteRequest {
                run_id: expand.run_id,
                ordinal: 1,
                http_config: None,
            })
            .await
            .unwrap();
        assert_eq!(outcome.status_code, Some(200));
    }

    #[tokio::test]
    async fn delete_history_forbidden_while_job_active() {
        let (service, _server) = service_with_server().await;
        let expand = service
            .expand(ExpandRequest {
                template: "q=<<>>".to_string(),
                placeholders: vec![],
                strategy: Strategy::Sniper,
                payload_sets: vec![PayloadSet::new("p", vec!["a".into()])],
            })
            .await
            .unwrap();
        service
            .execute_requests(ExecuteRequest {
                run_id: expand.run_id,
                http_config: None,
            })
            .await
            .unwrap();

        let err = service.delete_history(expand.run_id).await.unwrap_err();
        assert_eq!(err.kind(), Some(crate::error::ErrorKind::ForbiddenTransition));
    }
}
