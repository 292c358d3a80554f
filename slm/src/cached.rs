use crate::cache::{CacheKey, ResponseCache};
use crate::generator::ConceptGenerator;
use async_trait::async_trait;
use kgraph_core::model::{MinedRelationship, RelatedConcept};
use kgraph_core::{KgResult, RetryPolicy};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

/// Read-through cache plus retry in front of any [`ConceptGenerator`].
///
/// Only successful answers are stored. A failed cache write is logged and
/// the answer is still returned.
#[derive(Clone)]
pub struct CachedGenerator {
    inner: Arc<dyn ConceptGenerator>,
    cache: Arc<ResponseCache>,
    retry: RetryPolicy,
}

impl CachedGenerator {
    pub fn new(inner: Arc<dyn ConceptGenerator>, cache: Arc<ResponseCache>) -> Self {
        Self {
            inner,
            cache,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn lookup<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.cache.get(key)?;
        match serde_json::from_value(value) {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                warn!(key, "ignoring cache entry with unexpected shape: {}", e);
                None
            }
        }
    }

    async fn store<T: Serialize>(&self, key: &str, answer: &T) {
        let value = match serde_json::to_value(answer) {
            Ok(value) => value,
            Err(e) => {
                warn!(key, "cannot encode answer for cache: {}", e);
                return;
            }
        };
        if let Err(e) = self.cache.put(key, value).await {
            warn!(key, "cache write failed: {}", e);
        }
    }
}

#[async_trait]
impl ConceptGenerator for CachedGenerator {
    async fn related_concepts(&self, concept: &str) -> KgResult<Vec<RelatedConcept>> {
        let key = CacheKey::related(concept);
        if let Some(hit) = self.lookup::<Vec<RelatedConcept>>(&key) {
            debug!(concept, "cache hit for related concepts");
            return Ok(hit);
        }

        let answer = self
            .retry
            .run(|| self.inner.related_concepts(concept))
            .await?;
        self.store(&key, &answer).await;
        Ok(answer)
    }

    async fn mine_relationship(
        &self,
        source: &str,
        target: &str,
    ) -> KgResult<Option<MinedRelationship>> {
        let key = CacheKey::relationship(source, target);
        if let Some(hit) = self.lookup::<Option<MinedRelationship>>(&key) {
            debug!(source, target, "cache hit for relationship");
            return Ok(hit);
        }

        let answer = self
            .retry
            .run(|| self.inner.mine_relationship(source, target))
            .await?;
        self.store(&key, &answer).await;
        Ok(answer)
    }
}
