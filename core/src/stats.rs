//! Run statistics shared by concurrent workers.
//!
//! Recorders are incremented from many tasks at once; the orchestrator reads
//! them through `snapshot()` either mid-run or after `finish()`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuilderStats {
    pub seed_concept: String,
    pub nodes_created: u64,
    pub relationships_created: u64,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnricherStats {
    pub pairs_processed: u64,
    pub relationships_found: u64,
    pub relationships_created: u64,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_ms: u64,
}

#[derive(Debug)]
struct RunClock {
    started_at: DateTime<Utc>,
    finished_at: OnceLock<DateTime<Utc>>,
}

impl RunClock {
    fn start() -> Self {
        Self {
            started_at: Utc::now(),
            finished_at: OnceLock::new(),
        }
    }

    fn finish(&self) {
        let _ = self.finished_at.set(Utc::now());
    }

    fn end_time(&self) -> Option<DateTime<Utc>> {
        self.finished_at.get().copied()
    }

    fn duration_ms(&self) -> u64 {
        let end = self.end_time().unwrap_or_else(Utc::now);
        (end - self.started_at).num_milliseconds().max(0) as u64
    }
}

#[derive(Debug)]
pub struct BuilderStatsRecorder {
    seed_concept: String,
    nodes_created: AtomicU64,
    relationships_created: AtomicU64,
    clock: RunClock,
}

impl BuilderStatsRecorder {
    pub fn new(seed_concept: impl Into<String>) -> Self {
        Self {
            seed_concept: seed_concept.into(),
            nodes_created: AtomicU64::new(0),
            relationships_created: AtomicU64::new(0),
            clock: RunClock::start(),
        }
    }

    pub fn record_node(&self) -> u64 {
        self.nodes_created.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn record_relationship(&self) -> u64 {
        self.relationships_created.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn nodes_created(&self) -> u64 {
        self.nodes_created.load(Ordering::SeqCst)
    }

    /// Stamps the end time. Later calls keep the first stamp.
    pub fn finish(&self) {
        self.clock.finish();
    }

    pub fn snapshot(&self) -> BuilderStats {
        BuilderStats {
            seed_concept: self.seed_concept.clone(),
            nodes_created: self.nodes_created.load(Ordering::SeqCst),
            relationships_created: self.relationships_created.load(Ordering::SeqCst),
            start_time: self.clock.started_at,
            end_time: self.clock.end_time(),
            duration_ms: self.clock.duration_ms(),
        }
    }
}

#[derive(Debug)]
pub struct EnricherStatsRecorder {
    pairs_processed: AtomicU64,
    relationships_found: AtomicU64,
    relationships_created: AtomicU64,
    clock: RunClock,
}

impl Default for EnricherStatsRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl EnricherStatsRecorder {
    pub fn new() -> Self {
        Self {
            pairs_processed: AtomicU64::new(0),
            relationships_found: AtomicU64::new(0),
            relationships_created: AtomicU64::new(0),
            clock: RunClock::start(),
        }
    }

    pub fn record_pair(&self) -> u64 {
        self.pairs_processed.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn record_found(&self) {
        self.relationships_found.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_created(&self) {
        self.relationships_created.fetch_add(1, Ordering::SeqCst);
    }

    pub fn finish(&self) {
        self.clock.finish();
    }

    pub fn snapshot(&self) -> EnricherStats {
        EnricherStats {
            pairs_processed: self.pairs_processed.load(Ordering::SeqCst),
            relationships_found: self.relationships_found.load(Ordering::SeqCst),
            relationships_created: self.relationships_created.load(Ordering::SeqCst),
            start_time: self.clock.started_at,
            end_time: self.clock.end_time(),
            duration_ms: self.clock.duration_ms(),
        }
    }
}
