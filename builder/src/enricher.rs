use crate::miner::{RandomMiner, StoreSample};
use chrono::{DateTime, Utc};
use kgraph_core::config::EnricherConfig;
use kgraph_core::{KgError, KgResult};
use serde::Serialize;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use storage::GraphStore;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Cumulative counters across every batch since the enricher was created.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EnricherTotals {
    pub batches: u64,
    pub pairs_processed: u64,
    pub relations_found: u64,
    pub relations_created: u64,
    pub started_at: Option<DateTime<Utc>>,
    pub last_batch_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy)]
pub struct EnricherSettings {
    pub batch_size: usize,
    pub interval: Duration,
    pub concurrency: usize,
}

impl From<&EnricherConfig> for EnricherSettings {
    fn from(config: &EnricherConfig) -> Self {
        Self {
            batch_size: config.batch_size,
            interval: config.interval(),
            concurrency: config.concurrency,
        }
    }
}

struct RunningLoop {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Runs a mining batch right away and then once per interval until stopped.
pub struct Enricher {
    miner: Arc<RandomMiner>,
    store: Arc<dyn GraphStore>,
    settings: EnricherSettings,
    totals: Arc<Mutex<EnricherTotals>>,
    running: tokio::sync::Mutex<Option<RunningLoop>>,
}

impl Enricher {
    pub fn new(
        miner: Arc<RandomMiner>,
        store: Arc<dyn GraphStore>,
        settings: EnricherSettings,
    ) -> Self {
        Self {
            miner,
            store,
            settings,
            totals: Arc::new(Mutex::new(EnricherTotals::default())),
            running: tokio::sync::Mutex::new(None),
        }
    }

    pub async fn start(&self) -> KgResult<()> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Err(KgError::graph("enricher is already running"));
        }
        if self.settings.batch_size == 0 || self.settings.concurrency == 0 {
            return Err(KgError::invalid_input(
                "enricher batch size and concurrency must be greater than 0",
            ));
        }

        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let miner = self.miner.clone();
        let store = self.store.clone();
        let totals = self.totals.clone();
        let settings = self.settings;

        lock(&totals).started_at = Some(Utc::now());
        info!(
            batch_size = settings.batch_size,
            interval_secs = settings.interval.as_secs(),
            concurrency = settings.concurrency,
            "Enricher started"
        );

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(settings.interval.max(Duration::from_millis(1)));
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        run_batch(&miner, store.clone(), &totals, settings).await;
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            info!("Enricher loop stopped");
        });

        *running = Some(RunningLoop { shutdown, handle });
        Ok(())
    }

    /// Signals the loop and waits for the current batch to finish.
    pub async fn stop(&self) -> KgResult<()> {
        let Some(running) = self.running.lock().await.take() else {
            return Err(KgError::graph("enricher is not running"));
        };

        let _ = running.shutdown.send(true);
        if let Err(e) = running.handle.await {
            error!("Enricher loop ended abnormally: {}", e);
        }
        info!("Enricher stopped");
        Ok(())
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    pub fn stats(&self) -> EnricherTotals {
        lock(&self.totals).clone()
    }
}

async fn run_batch(
    miner: &RandomMiner,
    store: Arc<dyn GraphStore>,
    totals: &Mutex<EnricherTotals>,
    settings: EnricherSettings,
) {
    let source = StoreSample::new(store);
    match miner
        .run(settings.batch_size, settings.concurrency, &source)
        .await
    {
        Ok(report) => {
            let stats = report.stats.clone();
            {
                let mut totals = lock(totals);
                totals.batches += 1;
                totals.pairs_processed += stats.pairs_processed;
                totals.relations_found += stats.relationships_found;
                totals.relations_created += stats.relationships_created;
                totals.last_batch_at = Some(Utc::now());
            }
            let (_, error) = report.into_parts();
            if let Some(e) = error {
                warn!("Enrichment batch finished with errors: {}", e);
            } else {
                info!(
                    pairs_processed = stats.pairs_processed,
                    relations_created = stats.relationships_created,
                    "Enrichment batch complete"
                );
            }
        }
        Err(e) if e.is_invalid_input() => info!("Skipping enrichment batch: {}", e),
        Err(e) => error!("Enrichment batch failed: {}", e),
    }
}

fn lock(totals: &Mutex<EnricherTotals>) -> std::sync::MutexGuard<'_, EnricherTotals> {
    totals.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kgraph_core::model::Relationship;
    use kgraph_core::RetryPolicy;
    use slm::{ResponseCache, ScriptedGenerator};
    use storage::ConceptStore;

    async fn enricher(interval: Duration) -> (Enricher, Arc<ConceptStore>) {
        let store = Arc::new(ConceptStore::in_memory());
        store
            .create_relationship(&Relationship::new("Volcano", "Magma", "CONTAINS", 1.0))
            .await
            .unwrap();
        store
            .create_relationship(&Relationship::new("Basalt", "Lava", "FORMS_FROM", 1.0))
            .await
            .unwrap();

        let generator = ScriptedGenerator::new().with_relationship("Magma", "Lava", "BECOMES");
        let miner = RandomMiner::new(
            store.clone(),
            Arc::new(generator),
            Arc::new(ResponseCache::ephemeral()),
        )
        .with_retry_policy(RetryPolicy::no_retry());
        let settings = EnricherSettings {
            batch_size: 4,
            interval,
            concurrency: 2,
        };
        (Enricher::new(Arc::new(miner), store.clone(), settings), store)
    }

    #[tokio::test]
    async fn test_start_runs_first_batch_immediately() {
        let (enricher, _store) = enricher(Duration::from_secs(3600)).await;
        enricher.start().await.unwrap();
        assert!(enricher.is_running().await);

        for _ in 0..100 {
            if enricher.stats().batches > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        enricher.stop().await.unwrap();

        let totals = enricher.stats();
        assert_eq!(totals.batches, 1);
        assert!(totals.pairs_processed <= 4);
        assert!(totals.started_at.is_some());
        assert!(totals.last_batch_at.is_some());
        assert!(!enricher.is_running().await);
    }

    #[tokio::test]
    async fn test_double_start_and_stop_are_errors() {
        let (enricher, _store) = enricher(Duration::from_secs(3600)).await;
        assert!(enricher.stop().await.is_err());

        enricher.start().await.unwrap();
        assert!(enricher.start().await.is_err());
        enricher.stop().await.unwrap();
        assert!(enricher.stop().await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_batches_repeat_on_interval() {
        let (enricher, _store) = enricher(Duration::from_secs(60)).await;
        enricher.start().await.unwrap();

        tokio::time::sleep(Duration::from_secs(150)).await;
        enricher.stop().await.unwrap();

        assert_eq!(enricher.stats().batches, 3);
    }
}
