pub mod graph;

pub use graph::{ConceptGraph, EdgeKey};
