//! Command-line surface: a thin `clap` wrapper over [`crate::service::FuzzerService`]
//! for driving expansion, execution, and analysis from a terminal.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use uuid::Uuid;

use crate::analysis::{BaselineMethod as AnalysisBaselineMethod, ErrorPatternConfig, ReflectionConfig, TimeDelayConfig};
use crate::expansion::{MutationSpec, MutationValue, PayloadSet, Strategy};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Fuzzer: request-template expansion, execution, and response analysis",
    long_about = "Fuzzer expands a request template against payload sets, executes the\n\
                  resulting corpus against a target host under a cancellable job, and\n\
                  scans the recorded responses for error signatures, payload reflection,\n\
                  and time-based anomalies.\n\n\
                  Examples:\n  \
                  fuzzer expand --template 'q=<<>>' --strategy sniper --payload-set p=a,b\n  \
                  fuzzer mutate --template 'GET /<<TOKEN>>' --mutation TOKEN:overflow:a*1000\n  \
                  fuzzer run --run-id 1 --base-url example.com\n  \
                  fuzzer jobs --id <uuid>\n  \
                  fuzzer analyze --id <uuid> error-patterns"
)]
pub struct Cli {
    /// Path to a TOML config file overriding built-in defaults.
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Emit logs as JSON instead of human-readable text.
    #[arg(long, global = true)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum StrategyArg {
    Sniper,
    BatteringRam,
    Pitchfork,
    ClusterBomb,
}

impl From<StrategyArg> for Strategy {
    fn from(value: StrategyArg) -> Self {
        match value {
            StrategyArg::Sniper => Self::Sniper,
            StrategyArg::BatteringRam => Self::BatteringRam,
            StrategyArg::Pitchfork => Self::Pitchfork,
            StrategyArg::ClusterBomb => Self::ClusterBomb,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum BaselineMethodArg {
    FirstRequest,
    Median,
    Mean,
}

impl From<BaselineMethodArg> for AnalysisBaselineMethod {
    fn from(value: BaselineMethodArg) -> Self {
        match value {
            BaselineMethodArg::FirstRequest => Self::FirstRequest,
            BaselineMethodArg::Median => Self::Median,
            BaselineMethodArg::Mean => Self::Mean,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Expand a template against payload sets and persist the corpus run.
    Expand {
        #[arg(long)]
        template: String,
        /// Placeholder names declared by the template (`<<NAME>>`); omit
        /// for Sniper, which uses unnamed `<<>>` placeholders.
        #[arg(long = "placeholder")]
        placeholders: Vec<String>,
        #[arg(long, value_enum)]
        strategy: StrategyArg,
        /// One payload set as `name=value1,value2,...`; repeatable.
        #[arg(long = "payload-set", value_parser = parse_payload_set)]
        payload_sets: Vec<PayloadSet>,
    },
    /// Expand a template by substituting one token with per-value mutation
    /// rules, bypassing the combinatorial strategies entirely.
    Mutate {
        #[arg(long)]
        template: String,
        /// One mutation as `token:label:value1,value2,...`; a value
        /// suffixed `*N` repeats it N times instead of substituting it
        /// literally. Repeatable.
        #[arg(long = "mutation", value_parser = parse_mutation_spec)]
        mutations: Vec<MutationSpec>,
    },
    /// List, inspect, or delete persisted corpus runs.
    History {
        #[command(subcommand)]
        action: HistoryAction,
    },
    /// Create a job executing a persisted corpus run against a target.
    Run {
        #[arg(long)]
        run_id: i64,
        #[arg(long, default_value = "localhost:8000")]
        base_url: String,
        #[arg(long, default_value = "http")]
        scheme: String,
        #[arg(long)]
        sequential: bool,
        #[arg(long, default_value_t = 0.0)]
        request_delay: f64,
    },
    /// List jobs, or inspect/stop/resume a single job by id.
    Jobs {
        #[arg(long)]
        id: Option<Uuid>,
        #[command(subcommand)]
        action: Option<JobAction>,
    },
    /// Run one of the analysis engines over a completed job's results.
    Analyze {
        #[arg(long)]
        id: Uuid,
        #[command(subcommand)]
        engine: AnalyzeEngine,
    },
}

#[derive(Subcommand, Debug)]
pub enum HistoryAction {
    List {
        #[arg(long, default_value_t = 50)]
        limit: usize,
        #[arg(long, default_value_t = 0)]
        offset: usize,
    },
    Get {
        run_id: i64,
    },
    Delete {
        run_id: i64,
    },
    Statistics,
}

#[derive(Subcommand, Debug)]
pub enum JobAction {
    Stop,
    Resume,
    Results {
        #[arg(long, default_value_t = 50)]
        limit: usize,
        #[arg(long, default_value_t = 0)]
        offset: usize,
    },
}

#[derive(Subcommand, Debug)]
pub enum AnalyzeEngine {
    ErrorPatterns {
        #[arg(long = "pattern")]
        patterns: Vec<String>,
        #[arg(long)]
        case_sensitive: bool,
    },
    PayloadReflection {
        #[arg(long, default_value_t = 3)]
        min_payload_length: usize,
    },
    TimeDelay {
        #[arg(long, default_value_t = 5.0)]
        threshold_secs: f64,
        #[arg(long, value_enum, default_value = "median")]
        baseline: BaselineMethodArg,
    },
}

impl AnalyzeEngine {
    #[must_use]
    pub fn error_pattern_config(patterns: Vec<String>, case_sensitive: bool) -> ErrorPatternConfig {
        if patterns.is_empty() {
            ErrorPatternConfig {
                case_sensitive,
                ..ErrorPatternConfig::default()
            }
        } else {
            ErrorPatternConfig { patterns, case_sensitive }
        }
    }

    #[must_use]
    pub fn reflection_config(min_payload_length: usize) -> ReflectionConfig {
        ReflectionConfig {
            min_payload_length,
            ..ReflectionConfig::default()
        }
    }

    #[must_use]
    pub fn time_delay_config(threshold_secs: f64, baseline: BaselineMethodArg) -> TimeDelayConfig {
        TimeDelayConfig {
            time_threshold_secs: threshold_secs,
            baseline_method: baseline.into(),
            ..TimeDelayConfig::default()
        }
    }
}

/// Parse a `token:label:value1,value2,...` mutation argument. A value
/// suffixed `*N` becomes `MutationValue::Repeat { value, repeat: N }`.
fn parse_mutation_spec(raw: &str) -> Result<MutationSpec, String> {
    let mut parts = raw.splitn(3, ':');
    let token = parts.next().filter(|s| !s.is_empty());
    let label = parts.next().filter(|s| !s.is_empty());
    let values = parts.next();
    let (Some(token), Some(label), Some(values)) = (token, label, values) else {
        return Err(format!("mutation `{raw}` must be `token:label:value1,value2,...`"));
    };

    let values = values
        .split(',')
        .map(|v| match v.split_once('*') {
            Some((value, repeat)) => {
                let repeat: u32 = repeat
                    .parse()
                    .map_err(|_| format!("mutation `{raw}` has a non-numeric repeat count `{repeat}`"))?;
                Ok(MutationValue::Repeat {
                    value: value.to_string(),
                    repeat,
                })
            }
            None => Ok(MutationValue::Literal(v.to_string())),
        })
        .collect::<Result<Vec<_>, String>>()?;

    Ok(MutationSpec {
        token: token.to_string(),
        label: label.to_string(),
        values,
    })
}

/// Parse a `name=value1,value2,...` payload-set argument.
fn parse_payload_set(raw: &str) -> Result<PayloadSet, String> {
    let (name, values) = raw
        .split_once('=')
        .ok_or_else(|| format!("payload set `{raw}` must be `name=value1,value2,...`"))?;
    if name.is_empty() {
        return Err("payload set name must not be empty".to_string());
    }
    let payloads = values.split(',').map(str::to_string).collect();
    Ok(PayloadSet::new(name, payloads))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parse_payload_set_splits_name_and_values() {
        let set = parse_payload_set("p=a,b,c").unwrap();
        assert_eq!(set.name, "p");
        assert_eq!(set.payloads, vec!["a", "b", "c"]);
    }

    #[test]
    fn parse_payload_set_rejects_missing_equals() {
        assert!(parse_payload_set("p-a-b").is_err());
    }

    #[test]
    fn expand_subcommand_parses_repeated_payload_sets() {
        let cli = Cli::parse_from([
            "fuzzer",
            "expand",
            "--template",
            "q=<<>>",
            "--strategy",
            "sniper",
            "--payload-set",
            "p=a,b",
        ]);
        match cli.command {
            Command::Expand { payload_sets, .. } => assert_eq!(payload_sets.len(), 1),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn parse_mutation_spec_reads_literal_and_repeat_values() {
        let spec = parse_mutation_spec("TOKEN:overflow:a,b*3").unwrap();
        assert_eq!(spec.token, "TOKEN");
        assert_eq!(spec.label, "overflow");
        assert_eq!(spec.values, vec![
            MutationValue::Literal("a".to_string()),
            MutationValue::Repeat { value: "b".to_string(), repeat: 3 },
        ]);
    }

    #[test]
    fn parse_mutation_spec_rejects_missing_parts() {
        assert!(parse_mutation_spec("TOKEN:a").is_err());
    }

    #[test]
    fn mutate_subcommand_parses_repeated_mutations() {
        let cli = Cli::parse_from([
            "fuzzer",
            "mutate",
            "--template",
            "GET /<<TOKEN>> HTTP/1.1",
            "--mutation",
            "TOKEN:overflow:a*100",
        ]);
        match cli.command {
            Command::Mutate { mutations, .. } => assert_eq!(mutations.len(), 1),
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
