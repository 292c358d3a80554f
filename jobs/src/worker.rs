use crate::queue::Frontier;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{error, info};

/// Expands one dequeued name. New names are pushed back through [`Frontier::claim`].
#[async_trait]
pub trait Expander: Send + Sync + 'static {
    async fn expand(&self, worker_id: usize, name: String, frontier: &Frontier);
}

/// Releases the in-flight slot even if the expansion panics.
struct InFlightGuard<'a> {
    frontier: &'a Frontier,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.frontier.complete();
    }
}

pub struct Worker<E: Expander> {
    id: usize,
    frontier: Arc<Frontier>,
    expander: Arc<E>,
}

impl<E: Expander> Worker<E> {
    pub fn new(id: usize, frontier: Arc<Frontier>, expander: Arc<E>) -> Self {
        Self {
            id,
            frontier,
            expander,
        }
    }

    /// Loops until the frontier closes. Returns the number of names expanded.
    pub async fn run(self) -> usize {
        info!(worker = self.id, "Worker started");
        let mut expanded = 0;
        while let Some(name) = self.frontier.next().await {
            let _guard = InFlightGuard {
                frontier: &self.frontier,
            };
            self.expander
                .expand(self.id, name, &self.frontier)
                .await;
            expanded += 1;
        }
        info!(worker = self.id, expanded, "Worker stopped");
        expanded
    }
}

/// Runs `worker_count` workers over the frontier and waits for all of them.
pub async fn run_workers<E: Expander>(
    frontier: Arc<Frontier>,
    expander: Arc<E>,
    worker_count: usize,
) -> usize {
    let mut workers = JoinSet::new();
    for id in 0..worker_count {
        workers.spawn(Worker::new(id, frontier.clone(), expander.clone()).run());
    }

    let mut expanded = 0;
    while let Some(joined) = workers.join_next().await {
        match joined {
            Ok(count) => expanded += count,
            Err(e) => error!("Worker task failed: {}", e),
        }
    }
    expanded
}
