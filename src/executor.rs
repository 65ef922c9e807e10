//! HTTP Executor: turns a [`ParsedRequest`] plus [`HTTPConfig`] into
//! a live request, and runs a batch of them sequentially or in parallel
//! with `Semaphore`-bounded concurrency and an ordinal-preserving join.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, Method};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::config::HTTPConfig;
use crate::error::Error;
use crate::parser::ParsedRequest;

/// Outcome of sending one parsed request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub status_code: Option<u16>,
    pub headers: Vec<(String, String)>,
    pub body: String,
    pub elapsed_ms: u64,
    pub error: Option<String>,
    /// The URL the request actually went to, after absolute-target/Host
    /// resolution.
    pub final_url: String,
    /// Reconstructed wire-level text of what was actually sent, for audit.
    pub actual_request: String,
}

impl ExecutionOutcome {
    fn failed(elapsed: Duration, error: impl Into<String>) -> Self {
        Self {
            status_code: None,
            headers: Vec::new(),
            body: String::new(),
            elapsed_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            error: Some(error.into()),
            final_url: String::new(),
            actual_request: String::new(),
        }
    }
}

/// Headers excluded from forwarding: the library sets these itself, and
/// forwarding a stale value would fight its own framing.
const EXCLUDED_HEADERS: [&str; 3] = ["host", "connection", "content-length"];

fn is_excluded_header(name: &str) -> bool {
    EXCLUDED_HEADERS.iter().any(|h| h.eq_ignore_ascii_case(name))
}

fn header_value<'a>(request: &'a ParsedRequest, name: &str) -> Option<&'a str> {
    request
        .headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// Extract the `boundary=` parameter from a `Content-Type` header value.
fn extract_boundary(content_type: &str) -> Option<String> {
    content_type.split(';').find_map(|part| {
        let part = part.trim();
        part.strip_prefix("boundary=")
            .map(|b| b.trim_matches('"').to_string())
    })
}

/// Installs the process-wide rustls crypto provider required by the
/// `rustls-no-provider` reqwest feature. Safe to call repeatedly.
fn ensure_crypto_provider_installed() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        #[cfg(not(windows))]
        let provider = rustls::crypto::ring::default_provider();
        #[cfg(windows)]
        let provider = rustls::crypto::aws_lc_rs::default_provider();
        let _ = provider.install_default();
    });
}

/// Builds and sends one request at a time; owns the `reqwest::Client` so
/// connection pooling and TLS setup happen once per job, not per request.
pub struct Executor {
    client: Client,
    config: HTTPConfig,
}

impl Executor {
    /// Build an executor from an execution override, constructing the
    /// underlying client up front so a bad TLS/proxy config fails fast.
    ///
    /// # Errors
    /// Returns [`Error::transport`] if the client cannot be constructed.
    pub fn new(config: HTTPConfig) -> Result<Self, Error> {
        ensure_crypto_provider_installed();
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout))
            .redirect(if config.follow_redirects {
                reqwest::redirect::Policy::limited(10)
            } else {
                reqwest::redirect::Policy::none()
            })
            .danger_accept_invalid_certs(!config.verify_ssl)
            .build()
            .map_err(|e| Error::transport(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    /// Resolve a parsed request's target against the request's own `Host`
    /// header, `base_url`, or an absolute target embedded in the request
    /// line (in that order of precedence), and send it, applying
    /// `additional_headers` without overriding headers already present on
    /// the request.
    pub async fn execute(&self, request: &ParsedRequest) -> ExecutionOutcome {
        let start = Instant::now();
        let url = self.resolve_url(request);

        let method = match Method::from_bytes(request.method.as_bytes()) {
            Ok(m) => m,
            Err(_) => return ExecutionOutcome::failed(start.elapsed(), "invalid HTTP method"),
        };

        let mut sent_headers: Vec<(String, String)> = Vec::with_capacity(request.headers.len());
        let mut builder = self.client.request(method, &url);
        for (name, value) in &request.headers {
            if is_excluded_header(name) {
                continue;
            }
            builder = builder.header(name, value);
            sent_headers.push((name.clone(), value.clone()));
        }
        for (name, value) in &self.config.additional_headers {
            if !request.headers.contains_key(name) {
                builder = builder.header(name, value);
                sent_headers.push((name.clone(), value.clone()));
            }
        }

        let body = self.resolve_body(request);
        if !body.is_empty() {
            builder = builder.body(body.clone());
        }

        let actual_request = build_actual_request(&request.method, &request.version, &url, &sent_headers, &body);

        match builder.send().await {
            Ok(response) => {
                let status_code = Some(response.status().as_u16());
                let headers = response
                    .headers()
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or("").to_string()))
                    .collect();
                let body = match response.text().await {
                    Ok(text) => text,
                    Err(e) => {
                        return ExecutionOutcome {
                            final_url: url,
                            actual_request,
                            ..ExecutionOutcome::failed(
                                start.elapsed(),
                                format!("failed to read response body: {e}"),
                            )
                        }
                    }
                };
                ExecutionOutcome {
                    status_code,
                    headers,
                    body,
                    elapsed_ms: u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
                    error: None,
                    final_url: url,
                    actual_request,
                }
            }
            Err(e) => ExecutionOutcome {
                final_url: url,
                actual_request,
                ..ExecutionOutcome::failed(start.elapsed(), e.to_string())
            },
        }
    }

    /// A request line target beginning with a scheme is used verbatim;
    /// otherwise the host comes from the request's own `Host` header if
    /// present, else `base_url`, joined to the path with exactly one `/`.
    fn resolve_url(&self, request: &ParsedRequest) -> String {
        if request.target.starts_with("http://") || request.target.starts_with("https://") {
            return request.target.clone();
        }

        let host = header_value(request, "host").unwrap_or(&self.config.base_url);
        let host = host.trim_end_matches('/');
        let path = if request.target.starts_with('/') {
            request.target.clone()
        } else {
            format!("/{}", request.target)
        };
        format!("{}://{host}{path}", self.config.scheme)
    }

    /// Apply the per-`Content-Type` body policy: no body for GET/HEAD,
    /// re-serialized JSON when it parses, a boundary-repaired multipart
    /// body, and everything else verbatim.
    fn resolve_body(&self, request: &ParsedRequest) -> Vec<u8> {
        if request.body.is_empty() || matches!(request.method.as_str(), "GET" | "HEAD") {
            return Vec::new();
        }

        let content_type = header_value(request, "content-type")
            .unwrap_or_default()
            .to_lowercase();

        if content_type.contains("multipart/form-data") {
            match extract_boundary(&content_type) {
                Some(boundary) => crate::parser::ensure_closing_boundary(&request.body, &boundary),
                None => request.body.clone(),
            }
        } else if content_type.contains("application/json") {
            match std::str::from_utf8(&request.body)
                .ok()
                .and_then(|s| serde_json::from_str::<serde_json::Value>(s).ok())
            {
                Some(value) => serde_json::to_vec(&value).unwrap_or_else(|_| request.body.clone()),
                None => request.body.clone(),
            }
        } else {
            request.body.clone()
        }
    }
}

/// Reconstruct the wire-level text of what was actually sent, for audit.
fn build_actual_request(
    method: &str,
    version: &str,
    url: &str,
    headers: &[(String, String)],
    body: &[u8],
) -> String {
    let mut out = format!("{method} {url} {version}\r\n");
    for (name, value) in headers {
        out.push_str(name);
        out.push_str(": ");
        out.push_str(value);
        out.push_str("\r\n");
    }
    out.push_str("\r\n");
    match std::str::from_utf8(body) {
        Ok(text) => out.push_str(text),
        Err(_) => out.push_str(&format!("[Binary data: {} bytes]", body.len())),
    }
    out
}

/// One entry of a batch, carrying its position so ordinal order survives
/// out-of-order completion under parallel execution.
pub struct BatchItem {
    pub ordinal: usize,
    pub request: ParsedRequest,
}

/// Notified after each request in a batch completes, so a caller can
/// persist progress incrementally rather than waiting for the whole batch.
#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn record(&self, ordinal: usize, outcome: &ExecutionOutcome);
}

/// A sink that discards every result, for callers with no incremental
/// progress to track.
pub struct NoopSink;

#[async_trait]
impl ResultSink for NoopSink {
    async fn record(&self, _ordinal: usize, _outcome: &ExecutionOutcome) {}
}

/// Run `items` against `executor`, honoring `config.sequential_execution`
/// and `config.request_delay`, stopping early if `cancel` fires. Results
/// are always returned in ordinal order regardless of completion order, and
/// `sink` is notified as each one completes so a caller can persist
/// progress without waiting for the full batch.
///
/// Sequential mode sleeps `request_delay` seconds between requests, but in
/// slices no longer than one second at a time so a cancellation between
/// requests is observed promptly rather than after the full delay.
pub async fn run_batch(
    executor: &Executor,
    max_concurrency: usize,
    items: Vec<BatchItem>,
    cancel: &CancellationToken,
    sink: &Arc<dyn ResultSink>,
) -> Vec<(usize, ExecutionOutcome)> {
    if executor.config.sequential_execution {
        run_sequential(executor, items, cancel, sink).await
    } else {
        run_parallel(executor, max_concurrency, items, cancel, sink).await
    }
}

async fn run_sequential(
    executor: &Executor,
    items: Vec<BatchItem>,
    cancel: &CancellationToken,
    sink: &Arc<dyn ResultSink>,
) -> Vec<(usize, ExecutionOutcome)> {
    let mut out = Vec::with_capacity(items.len());
    let delay = Duration::from_secs_f64(executor.config.request_delay.max(0.0));

    for item in items {
        if cancel.is_cancelled() {
            break;
        }
        let outcome = executor.execute(&item.request).await;
        sink.record(item.ordinal, &outcome).await;
        out.push((item.ordinal, outcome));

        if !delay.is_zero() {
            sleep_cancellable(delay, cancel).await;
        }
    }
    out
}

/// Sleep for `total`, checking `cancel` at least once per second so a
/// cancelled job never waits out a long configured delay.
async fn sleep_cancellable(total: Duration, cancel: &CancellationToken) {
    let slice = Duration::from_secs(1);
    let mut remaining = total;
    while !remaining.is_zero() {
        let step = remaining.min(slice);
        tokio::select! {
            () = sleep(step) => {}
            () = cancel.cancelled() => return,
        }
        remaining -= step;
    }
}

async fn run_parallel(
    executor: &Executor,
    max_concurrency: usize,
    items: Vec<BatchItem>,
    cancel: &CancellationToken,
    sink: &Arc<dyn ResultSink>,
) -> Vec<(usize, ExecutionOutcome)> {
    let semaphore = Arc::new(Semaphore::new(max_concurrency.max(1)));
    let mut handles = Vec::with_capacity(items.len());

    for item in items {
        if cancel.is_cancelled() {
            break;
        }
        let permit = Arc::clone(&semaphore);
        let client = executor.client.clone();
        let config = executor.config.clone();
        let cancel = cancel.clone();
        let sink = Arc::clone(sink);
        handles.push(tokio::spawn(async move {
            let _permit = permit.acquire_owned().await.ok();
            if cancel.is_cancelled() {
                let outcome = ExecutionOutcome::failed(Duration::ZERO, "cancelled");
                sink.record(item.ordinal, &outcome).await;
                return (item.ordinal, outcome);
            }
            let scoped = Executor { client, config };
            let outcome = scoped.execute(&item.request).await;
            sink.record(item.ordinal, &outcome).await;
            (item.ordinal, outcome)
        }));
    }

    let mut out = Vec::with_capacity(handles.len());
    for handle in handles {
        if let Ok(result) = handle.await {
            out.push(result);
        }
    }
    out.sort_by_key(|(ordinal, _)| *ordinal);
    out
}
