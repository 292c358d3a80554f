pub mod cache;
pub mod cached;
pub mod generator;
pub mod ollama;

pub use cache::{CacheKey, ResponseCache};
pub use cached::CachedGenerator;
pub use generator::{ConceptGenerator, ScriptedGenerator};
pub use ollama::OllamaGenerator;
