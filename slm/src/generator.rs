use async_trait::async_trait;
use kgraph_core::model::{MinedRelationship, RelatedConcept};
use kgraph_core::{KgError, KgResult};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

/// The two questions the builder asks a generative text service.
///
/// An empty list or `None` means "nothing related", never an error.
#[async_trait]
pub trait ConceptGenerator: Send + Sync {
    async fn related_concepts(&self, concept: &str) -> KgResult<Vec<RelatedConcept>>;

    async fn mine_relationship(
        &self,
        source: &str,
        target: &str,
    ) -> KgResult<Option<MinedRelationship>>;
}

/// Answers from fixed tables and counts every call.
#[derive(Default)]
pub struct ScriptedGenerator {
    related: HashMap<String, Vec<RelatedConcept>>,
    relationships: HashMap<(String, String), MinedRelationship>,
    related_calls: AtomicUsize,
    mine_calls: AtomicUsize,
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_related(mut self, concept: &str, related: Vec<RelatedConcept>) -> Self {
        self.related.insert(concept.to_string(), related);
        self
    }

    /// Scripted for the unordered pair; asking (b, a) gets the same answer.
    pub fn with_relationship(mut self, a: &str, b: &str, relation: &str) -> Self {
        self.relationships.insert(
            (a.to_string(), b.to_string()),
            MinedRelationship::new(relation),
        );
        self
    }

    pub fn related_calls(&self) -> usize {
        self.related_calls.load(Ordering::SeqCst)
    }

    pub fn mine_calls(&self) -> usize {
        self.mine_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConceptGenerator for ScriptedGenerator {
    async fn related_concepts(&self, concept: &str) -> KgResult<Vec<RelatedConcept>> {
        self.related_calls.fetch_add(1, Ordering::SeqCst);
        if concept.trim().is_empty() {
            return Err(KgError::generative_text("empty concept").with_retryable(false));
        }
        Ok(self.related.get(concept).cloned().unwrap_or_default())
    }

    async fn mine_relationship(
        &self,
        source: &str,
        target: &str,
    ) -> KgResult<Option<MinedRelationship>> {
        self.mine_calls.fetch_add(1, Ordering::SeqCst);
        let forward = (source.to_string(), target.to_string());
        let backward = (target.to_string(), source.to_string());
        Ok(self
            .relationships
            .get(&forward)
            .or_else(|| self.relationships.get(&backward))
            .cloned())
    }
}
