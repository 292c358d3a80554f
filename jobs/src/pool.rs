use dashmap::DashSet;
use kgraph_core::{KgError, KgResult};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::error;

/// Runs at most `concurrency` tasks at a time.
///
/// `spawn` waits for a permit before the task starts, so submitting a large
/// batch never creates more than `concurrency` live tasks.
pub struct BoundedPool<T> {
    semaphore: Arc<Semaphore>,
    tasks: JoinSet<T>,
}

impl<T: Send + 'static> BoundedPool<T> {
    pub fn new(concurrency: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(concurrency.max(1))),
            tasks: JoinSet::new(),
        }
    }

    pub async fn spawn<F>(&mut self, task: F) -> KgResult<()>
    where
        F: Future<Output = T> + Send + 'static,
    {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| KgError::graph("worker pool closed").with_source(e))?;

        self.tasks.spawn(async move {
            let output = task.await;
            drop(permit);
            output
        });
        Ok(())
    }

    /// Waits for every task. A panicked task becomes an error in its slot.
    pub async fn join_all(mut self) -> Vec<KgResult<T>> {
        let mut results = Vec::with_capacity(self.tasks.len());
        while let Some(joined) = self.tasks.join_next().await {
            results.push(joined.map_err(|e| {
                error!("pool task failed: {}", e);
                KgError::graph("pool task failed").with_source(e)
            }));
        }
        results
    }
}

/// Unordered pairs already started in this batch.
#[derive(Default)]
pub struct PairRegistry {
    seen: DashSet<(String, String)>,
}

impl PairRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn key(a: &str, b: &str) -> (String, String) {
        if a <= b {
            (a.to_string(), b.to_string())
        } else {
            (b.to_string(), a.to_string())
        }
    }

    /// `true` for the first caller with this pair in either order.
    pub fn try_begin(&self, a: &str, b: &str) -> bool {
        self.seen.insert(Self::key(a, b))
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}
