//! Error-Pattern Matcher: scans each result for literal
//! signature fragments common to SQL, PHP, .NET, Java, and web-server
//! error pages.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::payload_of;
use crate::job::JobResultRecord;

/// Patterns that ship by default, covering common SQL, application
/// server, and web server error-disclosure strings.
const DEFAULT_PATTERNS: &[&str] = &[
    // SQL
    "SQL syntax",
    "mysql_fetch",
    "ORA-01756",
    "SQLite3::query",
    "PostgreSQL query failed",
    "Unclosed quotation mark",
    // PHP
    "Fatal error:",
    "Warning: include",
    "Parse error:",
    // .NET
    "System.Data.SqlClient",
    "Microsoft OLE DB Provider",
    "Server Error in '/' Application",
    // Java
    "java.lang.NullPointerException",
    "org.apache.catalina",
    "javax.servlet.ServletException",
    // Web server
    "Internal Server Error",
    "Apache Tomcat/",
    "nginx/1.",
];

/// Error-Pattern Matcher configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPatternConfig {
    pub patterns: Vec<String>,
    pub case_sensitive: bool,
}

impl Default for ErrorPatternConfig {
    fn default() -> Self {
        Self {
            patterns: DEFAULT_PATTERNS.iter().map(ToString::to_string).collect(),
            case_sensitive: false,
        }
    }
}

/// One matched occurrence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPatternFinding {
    pub ordinal: usize,
    pub matched_patterns: Vec<String>,
    pub snippet: String,
    pub payload: Option<String>,
}

/// Aggregate result of running the matcher over a job.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorPatternReport {
    pub findings: Vec<ErrorPatternFinding>,
    pub counts_per_pattern: HashMap<String, usize>,
}

/// Run the matcher over `results`. Pure function: no I/O, no
/// mutation of the results themselves.
#[must_use]
pub fn scan(results: &[JobResultRecord], config: &ErrorPatternConfig) -> ErrorPatternReport {
    let mut report = ErrorPatternReport::default();

    for record in results {
        let haystack = format!(
            "{} {}\n{}",
            record.outcome.status_code.map_or_else(|| "000".to_string(), |c| c.to_string()),
            record
                .outcome
                .headers
                .iter()
                .map(|(k, v)| format!("{k}: {v}"))
                .collect::<Vec<_>>()
                .join("\n"),
            record.outcome.body,
        );
        let search_space = if config.case_sensitive {
            haystack.clone()
        } else {
            haystack.to_lowercase()
        };

        let mut matched = Vec::new();
        let mut first_match_idx = None;
        for pattern in &config.patterns {
            let needle = if config.case_sensitive {
                pattern.clone()
            } else {
                pattern.to_lowercase()
            };
            if let Some(idx) = search_space.find(&needle) {
                matched.push(pattern.clone());
                *report.counts_per_pattern.entry(pattern.clone()).or_insert(0) += 1;
                if first_match_idx.is_none() {
                    first_match_idx = Some(idx);
                }
            }
        }

        if let Some(idx) = first_match_idx {
            let snippet = snippet_around(&haystack, idx, 80);
            report.findings.push(ErrorPatternFinding {
                ordinal: record.ordinal,
                matched_patterns: matched,
                snippet,
                payload: payload_of(&record.provenance),
            });
        }
    }

    report
}

/// An 80-character window centered on `idx`, clamped to the string's
/// bounds. Slices on char boundaries to avoid panicking on multi-byte UTF-8.
fn snippet_around(haystack: &str, idx: usize, width: usize) -> String {
    let half = width / 2;
    let start = idx.saturating_sub(half);
    let end = (idx + half).min(haystack.len());

    let start = (start..=idx).find(|&i| haystack.is_char_boundary(i)).unwrap_or(0);
    let end = (end..=haystack.len())
        .find(|&i| haystack.is_char_boundary(i))
        .unwrap_or(haystack.len());

    haystack[start..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expansion::Provenance;
    use chrono::Utc;
    use uuid::Uuid;

    fn record(ordinal: usize, body: &str, payload: &str) -> JobResultRecord {
        JobResultRecord {
            job_id: Uuid::new_v4(),
            ordinal,
            request: String::new(),
            provenance: Provenance::Sniper {
                payload: payload.to_string(),
                position: 1,
            },
            outcome: crate::executor::ExecutionOutcome {
                status_code: Some(500),
                headers: vec![],
                body: body.to_string(),
                elapsed_ms: 10,
                error: None,
                final_url: String::new(),
                actual_request: String::new(),
            },
            recorded_at: Utc::now(),
        }
    }

    #[test]
    fn matches_default_sql_pattern_case_insensitively() {
        let results = vec![record(1, "you have an error in your sql syntax near", "' OR 1=1")];
        let report = scan(&results, &ErrorPatternConfig::default());
        assert_eq!(report.findings.len(), 1);
        assert_eq!(report.findings[0].payload.as_deref(), Some("' OR 1=1"));
        assert_eq!(report.counts_per_pattern.get("SQL syntax"), Some(&1));
    }

    #[test]
    fn case_sensitive_mode_requires_exact_case() {
        let config = ErrorPatternConfig {
            patterns: vec!["Fatal error:".to_string()],
            case_sensitive: true,
        };
        let results = vec![record(1, "fatal error: oops", "x")];
        let report = scan(&results, &config);
        assert!(report.findings.is_empty());
    }

    #[test]
    fn clean_response_yields_no_findings() {
        let results = vec![record(1, "all good here", "x")];
        let report = scan(&results, &ErrorPatternConfig::default());
        assert!(report.findings.is_empty());
    }

    #[test]
    fn multiple_pattern_matches_are_all_recorded() {
        let results = vec![record(1, "Fatal error: mysql_fetch failed", "x")];
        let report = scan(&results, &ErrorPatternConfig::default());
        assert_eq!(report.findings[0].matched_patterns.len(), 2);
    }
}
