//! Payload-Reflection Detector: finds a job's injected payload
//! echoed back in the response body, raw or in an encoded form.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::payload_of;
use crate::job::JobResultRecord;

/// Which encodings to search for, beyond the raw payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReflectionConfig {
    pub html_encoded: bool,
    pub url_encoded: bool,
    pub js_encoded: bool,
    /// Payloads shorter than this are skipped to avoid incidental matches.
    pub min_payload_length: usize,
}

impl Default for ReflectionConfig {
    fn default() -> Self {
        Self {
            html_encoded: true,
            url_encoded: true,
            js_encoded: true,
            min_payload_length: 3,
        }
    }
}

/// Which form of the payload a finding matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReflectionVariant {
    Raw,
    HtmlEncoded,
    UrlEncoded,
    JsEncoded,
}

/// One reflected occurrence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReflectionFinding {
    pub ordinal: usize,
    pub variant: ReflectionVariant,
    pub offset: usize,
    pub payload: String,
}

/// Aggregate result of running the detector over a job.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReflectionReport {
    pub findings: Vec<ReflectionFinding>,
    pub counts_per_variant: HashMap<String, usize>,
}

/// HTML-encode the characters that matter for reflection detection:
/// `<`, `>`, `&`, `"`, `'`.
fn html_encode(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            '<' => "&lt;".to_string(),
            '>' => "&gt;".to_string(),
            '&' => "&amp;".to_string(),
            '"' => "&quot;".to_string(),
            '\'' => "&#x27;".to_string(),
            other => other.to_string(),
        })
        .collect()
}

fn js_encode(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            '\'' => "\\'".to_string(),
            '"' => "\\\"".to_string(),
            '\\' => "\\\\".to_string(),
            '\n' => "\\n".to_string(),
            other => other.to_string(),
        })
        .collect()
}

/// Run the detector over `results`.
#[must_use]
pub fn scan(results: &[JobResultRecord], config: &ReflectionConfig) -> ReflectionReport {
    let mut report = ReflectionReport::default();

    for record in results {
        let Some(payload) = payload_of(&record.provenance) else {
            continue;
        };
        if payload.len() < config.min_payload_length {
            continue;
        }

        let body = &record.outcome.body;
        let mut variants = vec![(ReflectionVariant::Raw, payload.clone())];
        if config.html_encoded {
            variants.push((ReflectionVariant::HtmlEncoded, html_encode(&payload)));
        }
        if config.url_encoded {
            variants.push((
                ReflectionVariant::UrlEncoded,
                urlencoding::encode(&payload).into_owned(),
            ));
        }
        if config.js_encoded {
            variants.push((ReflectionVariant::JsEncoded, js_encode(&payload)));
        }

        for (variant, needle) in variants {
            if needle.is_empty() {
                continue;
            }
            if let Some(offset) = body.find(&needle) {
                let key = format!("{variant:?}");
                *report.counts_per_variant.entry(key).or_insert(0) += 1;
                report.findings.push(ReflectionFinding {
                    ordinal: record.ordinal,
                    variant,
                    offset,
                    payload: payload.clone(),
                });
            }
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expansion::Provenance;
    use chrono::Utc;
    use uuid::Uuid;

    fn record(body: &str, payload: &str) -> JobResultRecord {
        JobResultRecord {
            job_id: Uuid::new_v4(),
            ordinal: 1,
            request: String::new(),
            provenance: Provenance::Sniper {
                payload: payload.to_string(),
                position: 1,
            },
            outcome: crate::executor::ExecutionOutcome {
                status_code: Some(200),
                headers: vec![],
                body: body.to_string(),
                elapsed_ms: 5,
                error: None,
                final_url: String::new(),
                actual_request: String::new(),
            },
            recorded_at: Utc::now(),
        }
    }

    #[test]
    fn detects_raw_reflection() {
        let results = vec![record("echo: <script>alert(1)</script>", "<script>alert(1)</script>")];
        let report = scan(&results, &ReflectionConfig::default());
        assert!(report.findings.iter().any(|f| f.variant == ReflectionVariant::Raw));
    }

    #[test]
    fn detects_html_encoded_reflection() {
        let results = vec![record("echo: &lt;script&gt;", "<script>")];
        let report = scan(&results, &ReflectionConfig::default());
        assert!(report
            .findings
            .iter()
            .any(|f| f.variant == ReflectionVariant::HtmlEncoded));
    }

    #[test]
    fn short_payloads_are_skipped() {
        let results = vec![record("xx", "xx")];
        let config = ReflectionConfig {
            min_payload_length: 5,
            ..ReflectionConfig::default()
        };
        let report = scan(&results, &config);
        assert!(report.findings.is_empty());
    }

    #[test]
    fn original_seed_row_has_no_payload_to_reflect() {
        let mut rec = record("whatever", "x");
        rec.provenance = Provenance::Original;
        let report = scan(&[rec], &ReflectionConfig::default());
        assert!(report.findings.is_empty());
    }
}
