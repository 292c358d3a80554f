//! kg-builder: grow a concept graph from a seed and densify it.

use anyhow::{bail, Context, Result};
use builder::{
    run_with_deadline, Enricher, EnricherSettings, RandomMiner, RunReport, StoreSample,
    TraversalEngine, VisitedSource,
};
use clap::{Parser, Subcommand};
use kgraph_core::config::AppConfig;
use kgraph_core::{KgError, RetryPolicy};
use serde::Serialize;
use serde_json::{json, Value};
use slm::{ConceptGenerator, OllamaGenerator, ResponseCache};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use storage::{ConceptStore, GraphMaintenance, GraphStore};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "kg-builder")]
#[command(author, version, about = "Concept graph builder", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (defaults to config/default and config/$RUN_MODE)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Expand the graph from a seed concept, then mine random relationships
    Build {
        /// Seed concept
        #[arg(short, long)]
        seed: Option<String>,
        /// Maximum number of concepts to create, seed included
        #[arg(short, long)]
        max_nodes: Option<usize>,
        /// Wall-clock limit for the traversal
        #[arg(short, long)]
        timeout_minutes: Option<u64>,
        /// Concurrent traversal workers
        #[arg(short, long)]
        workers: Option<usize>,
        /// Re-seed from weakly connected concepts up to this many times
        #[arg(long)]
        reseed_rounds: Option<usize>,
        /// Skip random relationship mining after the traversal
        #[arg(long)]
        skip_mining: bool,
    },

    /// Mine relationships between random pairs of stored concepts
    Mine {
        /// Number of pairs
        #[arg(short = 'n', long)]
        count: Option<usize>,
        /// Pairs processed at once
        #[arg(short = 'j', long)]
        concurrency: Option<usize>,
        /// Give up after this many minutes
        #[arg(long)]
        deadline_minutes: Option<u64>,
    },

    /// Run mining batches on an interval until Ctrl-C
    Enrich,

    /// Remove orphan relationships and concepts
    Cleanup,

    /// Print node and relationship counts
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    kgraph_core::init_tracing();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => AppConfig::load_from_file(path),
        None => AppConfig::load(),
    }
    .context("failed to load configuration")?;

    let store = Arc::new(
        ConceptStore::open(&config.store.wal_path)
            .await
            .with_context(|| format!("failed to open graph store at {}", config.store.wal_path))?,
    );
    let retry = config.retry.policy();

    match cli.command {
        Commands::Build {
            seed,
            max_nodes,
            timeout_minutes,
            workers,
            reseed_rounds,
            skip_mining,
        } => {
            let seed = seed.unwrap_or_else(|| config.graph.seed_concept.clone());
            let max_nodes = max_nodes.unwrap_or(config.graph.max_nodes);
            let timeout = timeout_minutes
                .map(|minutes| Duration::from_secs(minutes.saturating_mul(60)))
                .unwrap_or_else(|| config.graph.timeout());
            let workers = workers.unwrap_or(config.graph.worker_count);
            let reseed_rounds = reseed_rounds.unwrap_or(config.graph.reseed_rounds);

            let (generator, cache) = generative_text(&config).await?;
            let engine = TraversalEngine::new(store.clone(), generator.clone(), cache.clone())
                .with_retry_policy(retry)
                .with_maintenance_every(config.graph.traversal_maintenance_every);

            let mut failed = None;
            let visited: Vec<String> = if reseed_rounds > 0 {
                let report = engine
                    .run_with_reseeding(&seed, max_nodes, timeout, workers, reseed_rounds)
                    .await?;
                let relationships_created = report.relationships_created();
                let mut names = BTreeSet::new();
                let mut rounds = Vec::new();
                for round in report.rounds {
                    names.extend(round.names.iter().cloned());
                    let (value, error) = report_json(round);
                    failed = failed.or(error);
                    rounds.push(value);
                }
                print_json(&json!({
                    "nodes_created": report.nodes_created,
                    "relationships_created": relationships_created,
                    "rounds": rounds,
                }))?;
                names.into_iter().collect()
            } else {
                let report = engine.run(&seed, max_nodes, timeout, workers).await?;
                let names = report.names.clone();
                let (value, error) = report_json(report);
                print_json(&value)?;
                failed = error;
                names
            };

            if !skip_mining && config.graph.random_relationships > 0 {
                let miner = miner(&config, store.clone(), generator, cache, retry);
                match miner
                    .run(
                        config.graph.random_relationships,
                        config.graph.concurrency,
                        &VisitedSource::new(visited),
                    )
                    .await
                {
                    Ok(report) => {
                        let (value, error) = report_json(report);
                        print_json(&value)?;
                        failed = failed.or(error);
                    }
                    Err(e) if e.is_invalid_input() => {
                        info!("Skipping random relationship mining: {}", e)
                    }
                    Err(e) => return Err(e.into()),
                }
            }

            finish(failed)
        }

        Commands::Mine {
            count,
            concurrency,
            deadline_minutes,
        } => {
            let count = count.unwrap_or(config.graph.random_relationships);
            let concurrency = concurrency.unwrap_or(config.graph.concurrency);

            let (generator, cache) = generative_text(&config).await?;
            let miner = miner(&config, store.clone(), generator, cache, retry);
            let source = StoreSample::new(store.clone());
            let report = match deadline_minutes {
                Some(minutes) => {
                    let deadline = Duration::from_secs(minutes.saturating_mul(60));
                    run_with_deadline(&miner, count, concurrency, &source, deadline).await?
                }
                None => miner.run(count, concurrency, &source).await?,
            };

            let (value, error) = report_json(report);
            print_json(&value)?;
            finish(error)
        }

        Commands::Enrich => {
            let (generator, cache) = generative_text(&config).await?;
            let miner = Arc::new(miner(&config, store.clone(), generator, cache, retry));
            let enricher = Enricher::new(
                miner,
                store.clone(),
                EnricherSettings::from(&config.enricher),
            );

            enricher.start().await?;
            tokio::signal::ctrl_c()
                .await
                .context("failed to listen for Ctrl-C")?;
            info!("Shutdown requested");
            enricher.stop().await?;

            print_json(&serde_json::to_value(enricher.stats())?)?;
            Ok(())
        }

        Commands::Cleanup => {
            let maintenance = GraphMaintenance::new(store.clone()).with_retry_policy(retry);
            let report = maintenance.sweep().await?;
            print_json(&serde_json::to_value(report)?)?;
            Ok(())
        }

        Commands::Stats => {
            let stats = store.graph_stats().await?;
            print_json(&serde_json::to_value(stats)?)?;
            Ok(())
        }
    }
}

async fn generative_text(
    config: &AppConfig,
) -> Result<(Arc<dyn ConceptGenerator>, Arc<ResponseCache>)> {
    let generator = OllamaGenerator::from_config(&config.llm)?;
    let cache = ResponseCache::open(&config.llm.cache_dir)
        .await
        .with_context(|| format!("failed to open response cache at {}", config.llm.cache_dir))?;
    info!(
        model = %config.llm.model,
        cached = cache.len(),
        "Generative text client ready"
    );
    Ok((Arc::new(generator), Arc::new(cache)))
}

fn miner(
    config: &AppConfig,
    store: Arc<ConceptStore>,
    generator: Arc<dyn ConceptGenerator>,
    cache: Arc<ResponseCache>,
    retry: RetryPolicy,
) -> RandomMiner {
    RandomMiner::new(store, generator, cache)
        .with_retry_policy(retry)
        .with_maintenance_every(config.graph.mining_maintenance_every)
}

fn report_json<S: Serialize>(report: RunReport<S>) -> (Value, Option<KgError>) {
    let termination = report.termination;
    let elapsed_ms = report.elapsed.as_millis() as u64;
    let (stats, error) = report.into_parts();
    let value = json!({
        "termination": termination,
        "elapsed_ms": elapsed_ms,
        "stats": stats,
        "error": error.as_ref().map(ToString::to_string),
    });
    (value, error)
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn finish(error: Option<KgError>) -> Result<()> {
    match error {
        Some(e) => {
            warn!("Run finished with errors: {}", e);
            bail!(e)
        }
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_mine_flags_do_not_clash_with_config() {
        let cli = Cli::try_parse_from(["kg-builder", "-c", "kg.toml", "mine", "-j", "4", "-n", "20"])
            .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("kg.toml")));
        match cli.command {
            Commands::Mine {
                count, concurrency, ..
            } => {
                assert_eq!(count, Some(20));
                assert_eq!(concurrency, Some(4));
            }
            _ => panic!("expected the mine subcommand"),
        }
    }
}
