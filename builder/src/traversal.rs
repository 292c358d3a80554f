//! Breadth-first concept expansion.
//!
//! A seed concept is persisted, then a pool of workers pulls names from a
//! shared [`Frontier`], asks the generator for related concepts and writes
//! the accepted ones back to the store. The run ends when the frontier
//! drains, the node budget is spent or the deadline fires.

use crate::filter::validate_candidate;
use crate::report::{ReseedReport, TraversalReport};
use async_trait::async_trait;
use jobs::{run_workers, Claim, Expander, Frontier, Termination};
use kgraph_core::model::{Concept, Relationship};
use kgraph_core::stats::BuilderStatsRecorder;
use kgraph_core::{KgError, KgResult, RetryPolicy};
use rand::seq::SliceRandom;
use slm::{CachedGenerator, ConceptGenerator, ResponseCache};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use storage::{GraphMaintenance, GraphStore};
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info, warn};

pub const DEFAULT_MAINTENANCE_EVERY: usize = 5;

/// How many weakly connected concepts a re-seed round picks from.
const RESEED_CANDIDATES: usize = 10;

pub struct TraversalEngine {
    store: Arc<dyn GraphStore>,
    generator: CachedGenerator,
    maintenance: GraphMaintenance,
    retry: RetryPolicy,
    maintenance_every: usize,
}

impl TraversalEngine {
    pub fn new(
        store: Arc<dyn GraphStore>,
        generator: Arc<dyn ConceptGenerator>,
        cache: Arc<ResponseCache>,
    ) -> Self {
        Self {
            maintenance: GraphMaintenance::new(store.clone()),
            generator: CachedGenerator::new(generator, cache),
            store,
            retry: RetryPolicy::default(),
            maintenance_every: DEFAULT_MAINTENANCE_EVERY,
        }
    }

    /// Applied to every generator and store call of a run.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.generator = self.generator.with_retry_policy(retry);
        self.maintenance = self.maintenance.with_retry_policy(retry);
        self.retry = retry;
        self
    }

    /// Completed expansions between maintenance sweeps. `0` disables periodic sweeps.
    pub fn with_maintenance_every(mut self, every: usize) -> Self {
        self.maintenance_every = every;
        self
    }

    /// Expand from `seed` until the queue drains, `max_nodes` concepts were
    /// created (seed included) or `timeout` elapses.
    ///
    /// Only bad arguments or a seed that cannot be persisted are errors;
    /// everything else is reported with the stats.
    pub async fn run(
        &self,
        seed: &str,
        max_nodes: usize,
        timeout: Duration,
        worker_count: usize,
    ) -> KgResult<TraversalReport> {
        self.run_from(seed, max_nodes, timeout, worker_count, Vec::new())
            .await
    }

    /// Runs a traversal from `seed`, then keeps starting new ones from random
    /// weakly connected concepts until `target_nodes` new concepts exist, no
    /// fresh candidate remains, `timeout` is spent or `max_rounds` re-seeds ran.
    pub async fn run_with_reseeding(
        &self,
        seed: &str,
        target_nodes: usize,
        timeout: Duration,
        worker_count: usize,
        max_rounds: usize,
    ) -> KgResult<ReseedReport> {
        let started = Instant::now();
        let first = self.run(seed, target_nodes, timeout, worker_count).await?;

        let mut nodes_created = first.stats.nodes_created;
        let mut known: HashSet<String> = first.names.iter().cloned().collect();
        let mut used_seeds = HashSet::from([seed.to_string()]);
        let mut rounds = vec![first];

        for round in 1..=max_rounds {
            if nodes_created >= target_nodes as u64 {
                break;
            }
            let remaining = timeout.saturating_sub(started.elapsed());
            if remaining.is_zero() {
                info!(round, "no time left for another re-seed round");
                break;
            }

            let candidates = match self
                .retry
                .run(|| self.store.low_connectivity_concepts(RESEED_CANDIDATES))
                .await
            {
                Ok(candidates) => candidates,
                Err(e) => {
                    warn!(round, "cannot list low-connectivity concepts: {}", e);
                    break;
                }
            };
            let fresh: Vec<String> = candidates
                .into_iter()
                .filter(|name| !used_seeds.contains(name))
                .collect();
            let next_seed = {
                let mut rng = rand::thread_rng();
                fresh.choose(&mut rng).cloned()
            };
            let Some(next_seed) = next_seed else {
                info!(round, "no low-connectivity concept left to re-seed from");
                break;
            };
            used_seeds.insert(next_seed.clone());

            // The re-seed concept already exists and counts against its own budget.
            let budget = (target_nodes as u64 - nodes_created) as usize + 1;
            info!(round, seed = %next_seed, budget, "Re-seeding traversal");

            let mut preload: Vec<String> = known.iter().cloned().collect();
            preload.retain(|name| name != &next_seed);
            match self
                .run_from(&next_seed, budget, remaining, worker_count, preload)
                .await
            {
                Ok(report) => {
                    nodes_created += report.stats.nodes_created.saturating_sub(1);
                    known.extend(report.names.iter().cloned());
                    rounds.push(report);
                }
                Err(e) => warn!(round, seed = %next_seed, "re-seeded traversal failed: {}", e),
            }
        }

        info!(
            rounds = rounds.len(),
            nodes_created, "Re-seeded traversal finished"
        );
        Ok(ReseedReport {
            rounds,
            nodes_created,
        })
    }

    async fn run_from(
        &self,
        seed: &str,
        max_nodes: usize,
        timeout: Duration,
        worker_count: usize,
        known: Vec<String>,
    ) -> KgResult<TraversalReport> {
        if seed.trim().is_empty() {
            return Err(KgError::invalid_input("seed concept must not be empty"));
        }
        if max_nodes == 0 {
            return Err(KgError::invalid_input("max_nodes must be greater than 0"));
        }
        if worker_count == 0 {
            return Err(KgError::invalid_input("worker_count must be greater than 0"));
        }

        let started = Instant::now();
        info!(
            seed,
            max_nodes,
            timeout_secs = timeout.as_secs(),
            worker_count,
            "Starting traversal"
        );

        let stats = Arc::new(BuilderStatsRecorder::new(seed));
        let seed_concept = Concept::new(seed);
        self.retry
            .run(|| self.store.create_concept(&seed_concept))
            .await?;
        stats.record_node();

        let frontier = Arc::new(Frontier::seeded(seed, max_nodes));
        frontier.mark_visited(known);

        let context = Arc::new(ExpansionContext {
            store: self.store.clone(),
            generator: self.generator.clone(),
            maintenance: self.maintenance.clone(),
            retry: self.retry,
            stats: stats.clone(),
            failures: Mutex::new(Vec::new()),
            expansions: AtomicUsize::new(0),
            maintenance_every: self.maintenance_every,
            gate: RwLock::new(()),
        });

        // A timeout too large to represent as an instant means no deadline.
        let supervisor = started.checked_add(timeout).map(|deadline| {
            let frontier = frontier.clone();
            tokio::spawn(async move {
                tokio::time::sleep_until(deadline).await;
                warn!("Traversal deadline reached, no new work will be dequeued");
                frontier.cancel();
            })
        });

        run_workers(frontier.clone(), context.clone(), worker_count).await;
        if let Some(supervisor) = supervisor {
            supervisor.abort();
        }

        self.maintenance
            .sweep_until_stable("traversal finished")
            .await;
        stats.finish();

        let termination = frontier.termination().unwrap_or(Termination::Completed);
        let failures = std::mem::take(
            &mut *context
                .failures
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        let snapshot = stats.snapshot();
        info!(
            ?termination,
            nodes_created = snapshot.nodes_created,
            relationships_created = snapshot.relationships_created,
            failures = failures.len(),
            dropped = frontier.dropped(),
            "Traversal finished"
        );

        Ok(TraversalReport {
            stats: snapshot,
            termination,
            attempted: context.expansions.load(Ordering::SeqCst),
            failures,
            elapsed: started.elapsed(),
            names: frontier.visited(),
        })
    }
}

/// Per-run state shared by all traversal workers.
struct ExpansionContext {
    store: Arc<dyn GraphStore>,
    generator: CachedGenerator,
    maintenance: GraphMaintenance,
    retry: RetryPolicy,
    stats: Arc<BuilderStatsRecorder>,
    failures: Mutex<Vec<KgError>>,
    expansions: AtomicUsize,
    maintenance_every: usize,
    /// Expansions hold it shared, maintenance exclusively, so a sweep never
    /// sees a concept whose relationship is still being written.
    gate: RwLock<()>,
}

impl ExpansionContext {
    fn fail(&self, err: KgError) {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(err);
    }

    async fn expand_concept(&self, worker_id: usize, name: &str, frontier: &Frontier) {
        let related = match self.generator.related_concepts(name).await {
            Ok(related) => related,
            Err(e) => {
                warn!(worker = worker_id, concept = name, "Failed to get related concepts: {}", e);
                self.fail(e);
                return;
            }
        };
        debug!(worker = worker_id, concept = name, candidates = related.len(), "Expanding");

        for candidate in related {
            if frontier.is_cancelled() {
                debug!(worker = worker_id, concept = name, "Deadline passed, skipping remaining candidates");
                break;
            }
            if let Err(rejection) = validate_candidate(&candidate) {
                info!(candidate = %candidate.name, "Filtered out candidate: {}", rejection);
                continue;
            }
            if candidate.name == name {
                continue;
            }

            let claim = frontier.claim(&candidate.name);
            if claim == Claim::BudgetExhausted {
                info!(worker = worker_id, "Node budget reached");
                break;
            }

            // Persisted with its attributes before any edge can merge in a bare endpoint.
            let mut concept = Concept::new(candidate.name.as_str());
            concept.relevance = candidate.relevance;
            concept.description = candidate.description.clone();
            if let Err(e) = self.retry.run(|| self.store.create_concept(&concept)).await {
                warn!(concept = %candidate.name, "Failed to create concept: {}", e);
                self.fail(e);
                continue;
            }
            if claim == Claim::Claimed {
                self.stats.record_node();
                frontier.enqueue(candidate.name.as_str());
            }

            let relationship = Relationship::new(
                name,
                candidate.name.as_str(),
                candidate.relation.as_str(),
                candidate.relevance,
            );
            match self
                .retry
                .run(|| self.store.create_relationship(&relationship))
                .await
            {
                Ok(true) => {
                    self.stats.record_relationship();
                    info!(
                        "Created relationship: {} -[{}]-> {}",
                        name, candidate.relation, candidate.name
                    );
                }
                Ok(false) => debug!(
                    "Relationship already present: {} -[{}]-> {}",
                    name, candidate.relation, candidate.name
                ),
                Err(e) => {
                    warn!(
                        source = name,
                        target = %candidate.name,
                        "Failed to create relationship: {}",
                        e
                    );
                    self.fail(e);
                }
            }
        }
    }
}

#[async_trait]
impl Expander for ExpansionContext {
    async fn expand(&self, worker_id: usize, name: String, frontier: &Frontier) {
        {
            let _shared = self.gate.read().await;
            self.expand_concept(worker_id, &name, frontier).await;
        }

        let done = self.expansions.fetch_add(1, Ordering::SeqCst) + 1;
        if self.maintenance_every > 0 && done % self.maintenance_every == 0 {
            let _exclusive = self.gate.write().await;
            self.maintenance
                .sweep_logged("periodic traversal maintenance")
                .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kgraph_core::model::RelatedConcept;
    use slm::ScriptedGenerator;
    use storage::ConceptStore;

    fn engine(generator: ScriptedGenerator) -> (TraversalEngine, Arc<ConceptStore>) {
        let store = Arc::new(ConceptStore::in_memory());
        let engine = TraversalEngine::new(
            store.clone(),
            Arc::new(generator),
            Arc::new(ResponseCache::ephemeral()),
        )
        .with_retry_policy(RetryPolicy::no_retry());
        (engine, store)
    }

    #[tokio::test]
    async fn test_invalid_arguments_do_nothing() {
        let (engine, store) = engine(ScriptedGenerator::new());
        for (seed, max_nodes, workers) in [("", 5, 1), ("Seed", 0, 1), ("Seed", 5, 0)] {
            let err = engine
                .run(seed, max_nodes, Duration::from_secs(5), workers)
                .await
                .unwrap_err();
            assert!(err.is_invalid_input());
        }
        assert_eq!(store.graph_stats().await.unwrap().node_count, 0);
    }

    #[tokio::test]
    async fn test_self_reference_is_ignored() {
        let generator = ScriptedGenerator::new().with_related(
            "Recursion",
            vec![
                RelatedConcept::new("Recursion", "DEFINED_BY", 1.0),
                RelatedConcept::new("Base case", "REQUIRES", 0.9),
            ],
        );
        let (engine, store) = engine(generator);

        let report = engine
            .run("Recursion", 10, Duration::from_secs(5), 2)
            .await
            .unwrap();

        assert_eq!(report.stats.relationships_created, 1);
        assert_eq!(store.degree("Recursion").await, 1);
    }

    #[tokio::test]
    async fn test_unbounded_timeout_runs_without_deadline() {
        let generator = ScriptedGenerator::new().with_related(
            "Quasar",
            vec![RelatedConcept::new("Black hole", "POWERED_BY", 0.9)],
        );
        let (engine, store) = engine(generator);

        let report = engine.run("Quasar", 5, Duration::MAX, 1).await.unwrap();

        assert_eq!(report.termination, Termination::Completed);
        assert_eq!(report.stats.nodes_created, 2);
        assert!(store.contains_concept("Black hole").await);
    }
}
