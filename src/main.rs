use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use fuzzer_core::analysis::{error_patterns, reflection, time_delay};
use fuzzer_core::cli::{AnalyzeEngine, Cli, Command, HistoryAction, JobAction};
use fuzzer_core::config::{FuzzerConfig, HTTPConfig};
use fuzzer_core::corpus::{CorpusStore, InMemoryCorpusStore};
use fuzzer_core::error::Error;
use fuzzer_core::expansion::{self as expansion_mod, Strategy};
use fuzzer_core::job::store::{InMemoryJobStore, InMemoryResultStore};
use fuzzer_core::job::{JobManager, JobStore, ResultStore};
use fuzzer_core::logging::{self, LoggingConfig};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    logging::init(LoggingConfig {
        filter: None,
        format: if cli.json_logs {
            fuzzer_core::logging::LogFormat::Json
        } else {
            fuzzer_core::logging::LogFormat::Text
        },
    });

    let config = cli
        .config
        .as_ref()
        .map_or_else(FuzzerConfig::load_default, FuzzerConfig::from_file)
        .unwrap_or_else(|e| {
            eprintln!("warning: failed to load config, using defaults: {e}");
            FuzzerConfig::default()
        });

    let corpus: Arc<dyn CorpusStore> = Arc::new(InMemoryCorpusStore::new());
    let job_store: Arc<dyn JobStore> = Arc::new(InMemoryJobStore::new());
    let result_store: Arc<dyn ResultStore> = Arc::new(InMemoryResultStore::new());

    let jobs = match JobManager::new(job_store, result_store, Arc::clone(&corpus), config.clone()).await {
        Ok(jobs) => jobs,
        Err(e) => {
            print_error(&e);
            return ExitCode::FAILURE;
        }
    };
    jobs.spawn_scheduler();

    match run_command(cli.command, &corpus, &jobs, &config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            print_error(&e);
            ExitCode::FAILURE
        }
    }
}

fn print_error(e: &Error) {
    let payload = e.to_payload();
    eprintln!("error: {} ({})", payload.detail, payload.kind);
    if let Some(suggestion) = payload.suggestion {
        eprintln!("  suggestion: {suggestion}");
    }
}

async fn run_command(
    command: Command,
    corpus: &Arc<dyn CorpusStore>,
    jobs: &Arc<JobManager>,
    config: &FuzzerConfig,
) -> Result<(), Error> {
    match command {
        Command::Expand {
            template,
            placeholders,
            strategy,
            payload_sets,
        } => {
            let strategy: Strategy = strategy.into();
            let generated = expansion_mod::expand(&template, &placeholders, strategy, &payload_sets)?;
            let total = generated.len();
            let run_id = corpus
                .save(template, placeholders, strategy, payload_sets, generated)
                .await?;
            println!("persisted corpus run {run_id} with {total} requests");
        }

        Command::Mutate { template, mutations } => {
            let generated = expansion_mod::expand_mutations(&template, &mutations);
            let total = generated.len();
            let run_id = corpus
                .save(template, vec![], Strategy::Mutation, vec![], generated)
                .await?;
            println!("persisted corpus run {run_id} with {total} requests");
        }

        Command::History { action } => match action {
            HistoryAction::List { limit, offset } => {
                for run in corpus.list(limit, offset).await? {
                    println!("{}\t{}\t{}", run.id, run.strategy, run.total_generated);
                }
            }
            HistoryAction::Get { run_id } => {
                let detail = corpus.get(run_id).await?;
                println!("{}", serde_json::to_string_pretty(&detail).unwrap_or_default());
            }
            HistoryAction::Delete { run_id } => {
                let active = jobs.list_jobs().await?;
                let has_active = active
                    .iter()
                    .any(|j| j.corpus_run_id == run_id && !j.status.is_terminal());
                let deleted = corpus.delete(run_id, has_active).await?;
                println!("{}", if deleted { "deleted" } else { "not found" });
            }
            HistoryAction::Statistics => {
                let stats = corpus.statistics().await?;
                println!("{}", serde_json::to_string_pretty(&stats).unwrap_or_default());
            }
        },

        Command::Run {
            run_id,
            base_url,
            scheme,
            sequential,
            request_delay,
        } => {
            let http_config = HTTPConfig {
                scheme,
                base_url,
                sequential_execution: sequential,
                request_delay,
                ..config.default_http_config.clone()
            };
            let job_id = jobs.create_job(run_id, http_config).await?;
            println!("created job {job_id}");
        }

        Command::Jobs { id, action } => match (id, action) {
            (None, _) => {
                for job in jobs.list_jobs().await? {
                    println!("{}\t{:?}\t{:.1}%", job.id, job.status, job.progress.percentage());
                }
            }
            (Some(id), None) => {
                let job = jobs.get_job(id).await?;
                println!("{}", serde_json::to_string_pretty(&job).unwrap_or_default());
            }
            (Some(id), Some(JobAction::Stop)) => {
                jobs.cancel_job(id).await?;
                println!("stopped {id}");
            }
            (Some(id), Some(JobAction::Resume)) => {
                jobs.resume_job(id).await?;
                println!("resumed {id}");
            }
            (Some(id), Some(JobAction::Results { limit, offset })) => {
                for record in jobs.job_results(id, limit, offset).await? {
                    println!(
                        "{}\t{:?}\t{}ms",
                        record.ordinal, record.outcome.status_code, record.outcome.elapsed_ms
                    );
                }
            }
        },

        Command::Analyze { id, engine } => {
            let records = jobs.job_results(id, usize::MAX, 0).await?;
            match engine {
                AnalyzeEngine::ErrorPatterns { patterns, case_sensitive } => {
                    let config = AnalyzeEngine::error_pattern_config(patterns, case_sensitive);
                    let report = error_patterns::scan(&records, &config);
                    println!("{}", serde_json::to_string_pretty(&report).unwrap_or_default());
                }
                AnalyzeEngine::PayloadReflection { min_payload_length } => {
                    let config = AnalyzeEngine::reflection_config(min_payload_length);
                    let report = reflection::scan(&records, &config);
                    println!("{}", serde_json::to_string_pretty(&report).unwrap_or_default());
                }
                AnalyzeEngine::TimeDelay { threshold_secs, baseline } => {
                    let config = AnalyzeEngine::time_delay_config(threshold_secs, baseline);
                    let report = time_delay::scan(&records, &config);
                    println!("{}", serde_json::to_string_pretty(&report).unwrap_or_default());
                }
            }
        }
    }
    Ok(())
}
