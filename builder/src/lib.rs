//! Knowledge graph construction: traversal from a seed, random relationship
//! mining and the periodic enricher built on top of it.

pub mod enricher;
pub mod filter;
pub mod miner;
pub mod report;
pub mod traversal;

pub use enricher::{Enricher, EnricherSettings, EnricherTotals};
pub use filter::{validate_candidate, validate_mined, Rejection};
pub use miner::{run_with_deadline, PairSource, RandomMiner, StoreSample, VisitedSource};
pub use report::{MinerReport, ReseedReport, RunReport, TraversalReport};
pub use traversal::TraversalEngine;
