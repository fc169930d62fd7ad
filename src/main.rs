use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use inquire::error::InquireResult;
use serde::Serialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod cancel;
mod cli;
mod config;
mod explain;
mod extract;
mod lock;
mod ranking;
mod semantic;
#[cfg(test)]
mod tests;
mod web;

use cancel::CancelToken;
use cli::{IndexArgs, OutputFormat};
use config::{Config, ExplanationConfig, IndexScope, RankingConfig};
use explain::{explain_or_placeholder, ChatCompletionClient, DisabledExplainer, ExplanationProvider};
use extract::{extract_path, FileExtractor, TextExtractor};
use ranking::{Candidate, OutcomeStatus, RankedResult, RankingService};
use semantic::{EmbeddingProvider, VectorStorage, VECTORS_FILE};

/// One output row of `rrank rank`.
#[derive(Debug, Serialize)]
struct ResultRow<'a> {
    #[serde(flatten)]
    result: &'a RankedResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    explanation: Option<String>,
}

fn init_logging() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}=info,tower_http=info", env!("CARGO_PKG_NAME")))
        }))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn build_provider(config: &Config) -> anyhow::Result<Arc<dyn EmbeddingProvider>> {
    let provider = semantic::provider_for(
        &config.embedding.model,
        config.base_path().to_path_buf(),
        Some(Duration::from_secs(config.embedding.download_timeout_secs)),
    )?;
    Ok(Arc::from(provider))
}

fn build_service(
    config: &Config,
    provider: Arc<dyn EmbeddingProvider>,
    ranking: RankingConfig,
) -> anyhow::Result<RankingService> {
    let extractor: Arc<dyn TextExtractor> = Arc::new(FileExtractor::new());

    match ranking.index_scope {
        IndexScope::Session => Ok(RankingService::new(provider, extractor, ranking)),
        IndexScope::Persistent => {
            let storage = VectorStorage::new(config.base_path().join(VECTORS_FILE));
            Ok(RankingService::with_storage(provider, extractor, ranking, storage)?)
        }
    }
}

/// The configured explanation client, or a provider that always degrades
/// to the placeholder when explanations are off or not configured.
fn build_explainer(config: &ExplanationConfig) -> Arc<dyn ExplanationProvider> {
    if !config.enabled {
        return Arc::new(DisabledExplainer);
    }

    match ChatCompletionClient::from_config(config) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            log::warn!("Explanations unavailable: {}", e);
            Arc::new(DisabledExplainer)
        }
    }
}

fn acquire_lock(base_path: &Path) -> anyhow::Result<lock::FileLock> {
    lock::FileLock::try_acquire(base_path)
        .with_context(|| format!("failed to lock {}", base_path.display()))
}

fn main() -> anyhow::Result<()> {
    // .env is optional
    dotenvy::dotenv().ok();

    let args = cli::Args::parse();
    init_logging();

    let config = Config::load_with(&config::base_path()?)?;

    match args.command {
        cli::Command::Rank {
            job,
            files,
            top_k,
            explain,
            format,
            scope,
        } => {
            let job_description = job.read()?;

            let mut ranking = config.ranking.clone();
            if let Some(scope) = scope {
                ranking.index_scope = scope;
            }

            let _lock = match ranking.index_scope {
                IndexScope::Persistent => Some(acquire_lock(config.base_path())?),
                IndexScope::Session => None,
            };

            let mut candidates = Vec::with_capacity(files.len());
            for path in files {
                let bytes = std::fs::read(&path)
                    .with_context(|| format!("failed to read {}", path.display()))?;
                let filename = path
                    .file_name()
                    .map(|name| name.to_string_lossy().to_string())
                    .unwrap_or_default();
                candidates.push(Candidate::new(filename, bytes));
            }

            let provider = build_provider(&config)?;
            let service = build_service(&config, provider, ranking)?;

            let cancel = CancelToken::new();
            if let Err(e) = cancel.cancel_on_ctrlc() {
                log::warn!("Could not install Ctrl+C handler: {}", e);
            }

            let report = service.rank_with(&job_description, candidates, top_k, &cancel)?;

            for skipped in report.skipped() {
                if let OutcomeStatus::Skipped { reason } = &skipped.status {
                    eprintln!("skipped {}: {}", skipped.id, reason);
                }
            }

            let explainer = explain.then(|| build_explainer(&config.explanation));
            let rows: Vec<ResultRow> = report
                .results
                .iter()
                .map(|result| {
                    // explain the text that was actually ranked under this id
                    let explanation = explainer.as_ref().map(|explainer| {
                        explain_or_placeholder(explainer.as_ref(), &job_description, &result.text)
                            .text
                    });
                    ResultRow {
                        result,
                        explanation,
                    }
                })
                .collect();

            print_rows(&rows, format)
        }

        cli::Command::Explain { job, file } => {
            let job_description = job.read()?;
            let resume_text = extract_path(&FileExtractor::new(), &file)
                .with_context(|| format!("failed to extract {}", file.display()))?;

            let explainer = build_explainer(&config.explanation);
            let explanation =
                explain_or_placeholder(explainer.as_ref(), &job_description, &resume_text);

            println!("{}", explanation.text);
            if explanation.degraded {
                eprintln!("explanation could not be generated, see log for details");
            }
            Ok(())
        }

        cli::Command::Index { action } => {
            let _lock = acquire_lock(config.base_path())?;

            let provider = build_provider(&config)?;
            let ranking = RankingConfig {
                index_scope: IndexScope::Persistent,
                ..config.ranking.clone()
            };
            let service = build_service(&config, provider, ranking)?;

            match action {
                IndexArgs::Stats {} => {
                    println!("{}", serde_json::to_string_pretty(&service.stats())?);
                    Ok(())
                }
                IndexArgs::List {} => {
                    for id in service.indexed_ids() {
                        println!("{id}");
                    }
                    Ok(())
                }
                IndexArgs::Remove { id } => {
                    if !service.remove_entry(&id)? {
                        bail!("no indexed resume with id '{}'", id);
                    }
                    println!("removed {id}");
                    Ok(())
                }
                IndexArgs::Clear { yes } => {
                    let stats = service.stats();
                    if !yes {
                        match inquire::prompt_confirmation(format!(
                            "Are you sure you want to delete {} indexed resumes?",
                            stats.entries
                        )) {
                            InquireResult::Ok(true) => {}
                            InquireResult::Ok(false) => return Ok(()),
                            InquireResult::Err(err) => bail!("An error occurred: {}", err),
                        }
                    }

                    let removed = service.clear_index()?;
                    println!("{} items removed", removed);
                    Ok(())
                }
            }
        }

        cli::Command::Daemon { addr } => {
            let addr = addr.unwrap_or_else(|| config.daemon.listen_addr.clone());

            let _lock = match config.ranking.index_scope {
                IndexScope::Persistent => Some(acquire_lock(config.base_path())?),
                IndexScope::Session => None,
            };

            let provider = build_provider(&config)?;
            let service = build_service(&config, provider, config.ranking.clone())?;
            log::info!(
                "Ranking with model '{}', index scope {}",
                config.embedding.model,
                service.scope()
            );

            // the blocking HTTP client must be created outside the async runtime
            let state = web::SharedState {
                service: Arc::new(service),
                explainer: build_explainer(&config.explanation),
            };

            web::start_daemon(state.clone(), &addr, config.daemon.max_body_bytes)
        }
    }
}

fn print_rows(rows: &[ResultRow], format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(rows)?);
        }
        OutputFormat::Csv => {
            let mut writer = csv::Writer::from_writer(std::io::stdout());
            writer.write_record(["rank", "id", "score", "snippet", "explanation"])?;
            for row in rows {
                writer.write_record([
                    row.result.rank.to_string(),
                    row.result.id.clone(),
                    format!("{:.3}", row.result.score),
                    row.result.snippet.clone(),
                    row.explanation.clone().unwrap_or_default(),
                ])?;
            }
            writer.flush()?;
        }
        OutputFormat::Table => {
            if rows.is_empty() {
                println!("no results");
            }
            for row in rows {
                println!(
                    "#{} {} (score {:.3})",
                    row.result.rank, row.result.id, row.result.score
                );
                for line in row.result.snippet.lines() {
                    println!("    {line}");
                }
                if let Some(explanation) = &row.explanation {
                    println!("  why: {explanation}");
                }
                println!();
            }
        }
    }

    Ok(())
}
