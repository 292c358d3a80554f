use crate::store::GraphStore;
use kgraph_core::{KgResult, RetryPolicy};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub relationships_removed: usize,
    pub nodes_removed: usize,
}

impl SweepReport {
    pub fn total(&self) -> usize {
        self.relationships_removed + self.nodes_removed
    }

    fn merge(&mut self, other: SweepReport) {
        self.relationships_removed += other.relationships_removed;
        self.nodes_removed += other.nodes_removed;
    }
}

/// Orphan cleanup over a [`GraphStore`].
#[derive(Clone)]
pub struct GraphMaintenance {
    store: Arc<dyn GraphStore>,
    retry: RetryPolicy,
}

impl GraphMaintenance {
    pub fn new(store: Arc<dyn GraphStore>) -> Self {
        Self {
            store,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub async fn remove_orphan_relationships(&self) -> KgResult<usize> {
        self.retry
            .run(|| self.store.remove_orphan_relationships())
            .await
    }

    pub async fn remove_orphan_nodes(&self) -> KgResult<usize> {
        self.retry.run(|| self.store.remove_orphan_nodes()).await
    }

    /// Relationships first, so nodes left bare by removed edges go in the same pass.
    pub async fn sweep(&self) -> KgResult<SweepReport> {
        let relationships_removed = self.remove_orphan_relationships().await?;
        let nodes_removed = self.remove_orphan_nodes().await?;
        Ok(SweepReport {
            relationships_removed,
            nodes_removed,
        })
    }

    /// Like [`sweep`](Self::sweep) but never fails; errors are logged.
    pub async fn sweep_logged(&self, reason: &str) -> SweepReport {
        let mut report = SweepReport::default();

        match self.remove_orphan_relationships().await {
            Ok(count) => report.relationships_removed = count,
            Err(e) => warn!(reason, "orphan relationship cleanup failed: {}", e),
        }
        match self.remove_orphan_nodes().await {
            Ok(count) => report.nodes_removed = count,
            Err(e) => warn!(reason, "orphan node cleanup failed: {}", e),
        }

        if report.total() > 0 {
            info!(
                reason,
                relationships_removed = report.relationships_removed,
                nodes_removed = report.nodes_removed,
                "graph maintenance removed orphans"
            );
        }
        report
    }

    /// One logged sweep, and a second one if the first removed anything.
    pub async fn sweep_until_stable(&self, reason: &str) -> SweepReport {
        let mut report = self.sweep_logged(reason).await;
        if report.total() > 0 {
            let second = self.sweep_logged(reason).await;
            report.merge(second);
        }
        report
    }
}
