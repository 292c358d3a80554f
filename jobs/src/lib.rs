pub mod pool;
pub mod queue;
pub mod worker;

pub use pool::{BoundedPool, PairRegistry};
pub use queue::{Claim, Frontier, Termination};
pub use worker::{run_workers, Expander, Worker};
