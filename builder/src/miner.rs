use crate::filter::validate_mined;
use crate::report::MinerReport;
use async_trait::async_trait;
use jobs::{BoundedPool, PairRegistry, Termination};
use kgraph_core::model::Relationship;
use kgraph_core::stats::EnricherStatsRecorder;
use kgraph_core::{KgError, KgResult, RetryPolicy};
use rand::seq::SliceRandom;
use slm::{CachedGenerator, ConceptGenerator, ResponseCache};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use storage::{GraphMaintenance, GraphStore};
use tokio::time::Instant;
use tracing::{debug, info, warn};

pub const DEFAULT_MAINTENANCE_EVERY: usize = 10;

/// Names sampled from the store when no explicit list is given.
pub const DEFAULT_SAMPLE_SIZE: usize = 200;

/// Supplies the names random pairs are drawn from.
#[async_trait]
pub trait PairSource: Send + Sync {
    async fn names(&self) -> KgResult<Vec<String>>;
}

/// A fixed list, typically the visited set of a traversal.
pub struct VisitedSource {
    names: Vec<String>,
}

impl VisitedSource {
    pub fn new(names: Vec<String>) -> Self {
        Self { names }
    }
}

#[async_trait]
impl PairSource for VisitedSource {
    async fn names(&self) -> KgResult<Vec<String>> {
        Ok(self.names.clone())
    }
}

/// A random sample of the concepts currently in the store.
pub struct StoreSample {
    store: Arc<dyn GraphStore>,
    size: usize,
}

impl StoreSample {
    pub fn new(store: Arc<dyn GraphStore>) -> Self {
        Self {
            store,
            size: DEFAULT_SAMPLE_SIZE,
        }
    }
}

#[async_trait]
impl PairSource for StoreSample {
    async fn names(&self) -> KgResult<Vec<String>> {
        self.store.sample_random_concepts(self.size).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PairOutcome {
    /// Same unordered pair already taken by this batch.
    Duplicate,
    AlreadyConnected,
    NoRelationship,
    Rejected,
    Created,
    /// Store reported an identical edge.
    AlreadyPresent,
}

pub struct RandomMiner {
    store: Arc<dyn GraphStore>,
    generator: CachedGenerator,
    maintenance: GraphMaintenance,
    retry: RetryPolicy,
    maintenance_every: usize,
}

struct PairContext {
    store: Arc<dyn GraphStore>,
    generator: CachedGenerator,
    maintenance: GraphMaintenance,
    retry: RetryPolicy,
    stats: Arc<EnricherStatsRecorder>,
    registry: PairRegistry,
    finished: AtomicUsize,
    maintenance_every: usize,
}

impl RandomMiner {
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

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.generator = self.generator.with_retry_policy(retry);
        self.maintenance = self.maintenance.with_retry_policy(retry);
        self.retry = retry;
        self
    }

    /// Finished pairs between maintenance sweeps. `0` disables periodic sweeps.
    pub fn with_maintenance_every(mut self, every: usize) -> Self {
        self.maintenance_every = every;
        self
    }

    /// Draw `count` random pairs of distinct names and mine each one, at most
    /// `concurrency` at a time. Per-pair failures are collected in the report.
    pub async fn run(
        &self,
        count: usize,
        concurrency: usize,
        source: &dyn PairSource,
    ) -> KgResult<MinerReport> {
        if count == 0 {
            return Err(KgError::invalid_input("count must be greater than 0"));
        }
        if concurrency == 0 {
            return Err(KgError::invalid_input("concurrency must be greater than 0"));
        }

        let names: Vec<String> = source
            .names()
            .await?
            .into_iter()
            .filter(|name| !name.trim().is_empty())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if names.len() < 2 {
            return Err(KgError::invalid_input(format!(
                "need at least 2 distinct concepts to mine relationships, got {}",
                names.len()
            )));
        }

        let started = Instant::now();
        info!(
            count,
            concurrency,
            concepts = names.len(),
            "Mining random relationships"
        );

        let pairs = random_pairs(&names, count);
        let context = Arc::new(PairContext {
            store: self.store.clone(),
            generator: self.generator.clone(),
            maintenance: self.maintenance.clone(),
            retry: self.retry,
            stats: Arc::new(EnricherStatsRecorder::new()),
            registry: PairRegistry::new(),
            finished: AtomicUsize::new(0),
            maintenance_every: self.maintenance_every,
        });

        let mut pool = BoundedPool::new(concurrency);
        for (a, b) in pairs {
            let context = context.clone();
            pool.spawn(async move {
                let result = context.process_pair(&a, &b).await;
                context.after_pair().await;
                result
            })
            .await?;
        }

        let mut failures = Vec::new();
        for joined in pool.join_all().await {
            match joined {
                Ok(Ok(_)) => {}
                Ok(Err(e)) | Err(e) => failures.push(e),
            }
        }

        self.maintenance
            .sweep_logged("mining finished")
            .await;
        context.stats.finish();
        let stats = context.stats.snapshot();

        info!(
            pairs_processed = stats.pairs_processed,
            relationships_found = stats.relationships_found,
            relationships_created = stats.relationships_created,
            failures = failures.len(),
            "Random mining finished"
        );

        Ok(MinerReport {
            stats,
            termination: Termination::Completed,
            attempted: count,
            failures,
            elapsed: started.elapsed(),
            names,
        })
    }
}

impl PairContext {
    async fn process_pair(&self, a: &str, b: &str) -> KgResult<PairOutcome> {
        if !self.registry.try_begin(a, b) {
            debug!("Pair {} / {} already taken in this batch, skipping", a, b);
            self.stats.record_pair();
            return Ok(PairOutcome::Duplicate);
        }

        let exists = self
            .retry
            .run(|| self.store.relationship_exists(a, b))
            .await
            .map_err(|e| {
                warn!(a, b, "Failed to check relationship: {}", e);
                e
            })?;
        if exists {
            debug!("Relationship already exists between {} and {}, skipping", a, b);
            self.stats.record_pair();
            return Ok(PairOutcome::AlreadyConnected);
        }

        let mined = self
            .generator
            .mine_relationship(a, b)
            .await
            .map_err(|e| {
                warn!(a, b, "Failed to mine relationship: {}", e);
                e
            })?;
        let Some(mined) = mined else {
            debug!("No relationship between {} and {}", a, b);
            self.stats.record_pair();
            return Ok(PairOutcome::NoRelationship);
        };
        self.stats.record_found();

        if let Err(rejection) = validate_mined(&mined) {
            info!("Filtered out relationship between {} and {}: {}", a, b, rejection);
            self.stats.record_pair();
            return Ok(PairOutcome::Rejected);
        }

        let mut relationship = Relationship::new(a, b, mined.relation.as_str(), mined.strength);
        relationship.description = mined.description.clone();
        let created = self
            .retry
            .run(|| self.store.create_relationship(&relationship))
            .await
            .map_err(|e| {
                warn!(a, b, "Failed to create relationship: {}", e);
                e
            })?;
        self.stats.record_pair();

        if created {
            self.stats.record_created();
            info!("Created relationship: {} -[{}]-> {}", a, mined.relation, b);
            Ok(PairOutcome::Created)
        } else {
            Ok(PairOutcome::AlreadyPresent)
        }
    }

    async fn after_pair(&self) {
        let finished = self.finished.fetch_add(1, Ordering::SeqCst) + 1;
        if self.maintenance_every > 0 && finished % self.maintenance_every == 0 {
            self.maintenance
                .sweep_logged("scheduled mining maintenance")
                .await;
        }
    }
}

/// `count` pairs of two distinct names each, drawn with replacement across pairs.
fn random_pairs(names: &[String], count: usize) -> Vec<(String, String)> {
    let mut rng = rand::thread_rng();
    (0..count)
        .filter_map(|_| {
            let mut picked = names.choose_multiple(&mut rng, 2);
            let a = picked.next()?.clone();
            let b = picked.next()?.clone();
            Some((a, b))
        })
        .collect()
}

/// Runs `miner` with a deadline. The miner itself has none.
pub async fn run_with_deadline(
    miner: &RandomMiner,
    count: usize,
    concurrency: usize,
    source: &dyn PairSource,
    deadline: Duration,
) -> KgResult<MinerReport> {
    tokio::time::timeout(deadline, miner.run(count, concurrency, source))
        .await
        .map_err(|_| KgError::Timeout { elapsed: deadline })?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_pairs_never_repeat_a_name() {
        let names: Vec<String> = ["Alpha", "Beta", "Gamma"].iter().map(|s| s.to_string()).collect();
        let pairs = random_pairs(&names, 50);
        assert_eq!(pairs.len(), 50);
        assert!(pairs.iter().all(|(a, b)| a != b));
    }

    #[tokio::test]
    async fn test_fewer_than_two_names_is_invalid() {
        let miner = RandomMiner::new(
            Arc::new(storage::ConceptStore::in_memory()),
            Arc::new(slm::ScriptedGenerator::new()),
            Arc::new(ResponseCache::ephemeral()),
        );
        let source = VisitedSource::new(vec!["Solo".to_string(), "Solo".to_string()]);
        let err = miner.run(5, 2, &source).await.unwrap_err();
        assert!(err.is_invalid_input());

        let err = miner.run(0, 2, &source).await.unwrap_err();
        assert!(err.is_invalid_input());
    }
}
