pub mod index;
pub mod maintenance;
pub mod store;
pub mod wal;

pub use maintenance::{GraphMaintenance, SweepReport};
pub use store::{ConceptStore, GraphStore};
