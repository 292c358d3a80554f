use crate::index::ConceptGraph;
use crate::wal::{Wal, WalError};
use async_trait::async_trait;
use kgraph_core::model::{is_generic_label, Concept, ConceptId, GraphStats, Relationship};
use kgraph_core::{KgError, KgResult};
use rand::seq::SliceRandom;
use rkyv::ser::{serializers::AllocSerializer, Serializer};
use rkyv::{Archive, Deserialize, Serialize};
use std::path::Path;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

/// Graph persistence as seen by the traversal and mining engines.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Idempotent on name. Returns the stable id of the (possibly pre-existing) concept.
    async fn create_concept(&self, concept: &Concept) -> KgResult<ConceptId>;

    /// Creates missing endpoints. Returns `false` if the same edge already existed.
    async fn create_relationship(&self, relationship: &Relationship) -> KgResult<bool>;

    async fn sample_random_concepts(&self, n: usize) -> KgResult<Vec<String>>;

    /// True if any edge connects `a` and `b`, whatever its direction.
    async fn relationship_exists(&self, a: &str, b: &str) -> KgResult<bool>;

    async fn remove_orphan_relationships(&self) -> KgResult<usize>;

    async fn remove_orphan_nodes(&self) -> KgResult<usize>;

    /// Names of the `limit` least connected concepts, fewest edges first.
    async fn low_connectivity_concepts(&self, limit: usize) -> KgResult<Vec<String>>;

    async fn graph_stats(&self) -> KgResult<GraphStats>;
}

#[derive(Archive, Deserialize, Serialize, Debug, Clone, PartialEq)]
#[archive(check_bytes)]
pub enum GraphMutation {
    PutConcept(Concept),
    PutRelationship(Relationship),
    DeleteConcept(String),
    DeleteRelationship {
        source: String,
        target: String,
        relation: String,
    },
}

/// One WAL frame: mutations applied together.
#[derive(Archive, Deserialize, Serialize, Debug, Clone)]
#[archive(check_bytes)]
pub struct WalRecord {
    pub mutations: Vec<GraphMutation>,
}

/// Embedded concept graph, optionally backed by a write-ahead log.
pub struct ConceptStore {
    wal: Option<Mutex<Wal>>,
    tx_lock: Mutex<()>,
    graph: RwLock<ConceptGraph>,
}

impl ConceptStore {
    /// Store without durability.
    pub fn in_memory() -> Self {
        Self {
            wal: None,
            tx_lock: Mutex::new(()),
            graph: RwLock::new(ConceptGraph::new()),
        }
    }

    /// Open a store, replaying the log at `wal_path` to restore previous state.
    pub async fn open(wal_path: impl AsRef<Path>) -> KgResult<Self> {
        let mut wal = Wal::open(&wal_path).await?;
        let mut graph = ConceptGraph::new();

        let last_lsn = wal
            .replay(|_lsn, data| {
                let archived = rkyv::check_archived_root::<WalRecord>(&data[..])
                    .map_err(|_| WalError::CorruptEntry)?;
                let record: WalRecord = archived
                    .deserialize(&mut rkyv::Infallible)
                    .map_err(|_| WalError::CorruptEntry)?;
                for mutation in record.mutations {
                    apply_mutation(&mut graph, mutation);
                }
                Ok(())
            })
            .await?;

        let stats = graph.stats();
        info!(
            path = %wal_path.as_ref().display(),
            last_lsn,
            nodes = stats.node_count,
            relationships = stats.relationship_count,
            "concept store opened"
        );

        Ok(Self {
            wal: Some(Mutex::new(wal)),
            tx_lock: Mutex::new(()),
            graph: RwLock::new(graph),
        })
    }

    pub async fn contains_concept(&self, name: &str) -> bool {
        self.graph.read().await.contains_concept(name)
    }

    pub async fn concept(&self, name: &str) -> Option<Concept> {
        self.graph.read().await.concept(name).cloned()
    }

    pub async fn concept_names(&self) -> Vec<String> {
        self.graph.read().await.concept_names()
    }

    pub async fn relationships(&self) -> Vec<Relationship> {
        self.graph.read().await.relationships().cloned().collect()
    }

    pub async fn degree(&self, name: &str) -> usize {
        self.graph.read().await.degree(name)
    }

    /// Plans mutations against the current graph and commits them as one WAL record.
    /// Writers are serialized; readers never observe a partial record.
    async fn commit<F>(&self, plan: F) -> KgResult<Vec<GraphMutation>>
    where
        F: FnOnce(&ConceptGraph) -> KgResult<Vec<GraphMutation>>,
    {
        let _tx_guard = self.tx_lock.lock().await;

        let mutations = {
            let graph = self.graph.read().await;
            plan(&graph)?
        };
        if mutations.is_empty() {
            return Ok(mutations);
        }

        if let Some(wal) = &self.wal {
            let record = WalRecord {
                mutations: mutations.clone(),
            };
            let bytes = serialize_record(&record)?;
            let mut wal = wal.lock().await;
            wal.append(&bytes).await?;
            wal.flush().await?;
        }

        let mut graph = self.graph.write().await;
        for mutation in &mutations {
            apply_mutation(&mut graph, mutation.clone());
        }

        Ok(mutations)
    }
}

#[async_trait]
impl GraphStore for ConceptStore {
    async fn create_concept(&self, concept: &Concept) -> KgResult<ConceptId> {
        if concept.name.trim().is_empty() {
            return Err(KgError::graph("concept name must not be empty"));
        }

        let applied = self
            .commit(|graph| {
                if graph.contains_concept(&concept.name) {
                    Ok(Vec::new())
                } else {
                    Ok(vec![GraphMutation::PutConcept(concept.clone())])
                }
            })
            .await?;

        if !applied.is_empty() {
            debug!(concept = %concept.name, "concept created");
        }
        Ok(concept.id())
    }

    async fn create_relationship(&self, relationship: &Relationship) -> KgResult<bool> {
        validate_relationship(relationship)?;

        let applied = self
            .commit(|graph| {
                let mut mutations = Vec::new();
                for endpoint in [&relationship.source, &relationship.target] {
                    if !graph.contains_concept(endpoint) {
                        mutations.push(GraphMutation::PutConcept(Concept::new(endpoint.as_str())));
                    }
                }
                if graph.contains_relationship(
                    &relationship.source,
                    &relationship.target,
                    &relationship.relation,
                ) {
                    return Ok(Vec::new());
                }
                mutations.push(GraphMutation::PutRelationship(relationship.clone()));
                Ok(mutations)
            })
            .await?;

        Ok(applied
            .iter()
            .any(|m| matches!(m, GraphMutation::PutRelationship(_))))
    }

    async fn sample_random_concepts(&self, n: usize) -> KgResult<Vec<String>> {
        let graph = self.graph.read().await;
        let names = graph.concept_names();
        Ok(names
            .choose_multiple(&mut rand::thread_rng(), n)
            .cloned()
            .collect())
    }

    async fn relationship_exists(&self, a: &str, b: &str) -> KgResult<bool> {
        Ok(self.graph.read().await.connected(a, b))
    }

    async fn remove_orphan_relationships(&self) -> KgResult<usize> {
        let applied = self
            .commit(|graph| {
                Ok(graph
                    .orphan_relationships()
                    .into_iter()
                    .map(|(source, target, relation)| GraphMutation::DeleteRelationship {
                        source,
                        target,
                        relation,
                    })
                    .collect())
            })
            .await?;
        Ok(applied.len())
    }

    async fn remove_orphan_nodes(&self) -> KgResult<usize> {
        let applied = self
            .commit(|graph| {
                Ok(graph
                    .orphan_concepts()
                    .into_iter()
                    .map(GraphMutation::DeleteConcept)
                    .collect())
            })
            .await?;
        Ok(applied.len())
    }

    async fn low_connectivity_concepts(&self, limit: usize) -> KgResult<Vec<String>> {
        let graph = self.graph.read().await;
        Ok(graph
            .least_connected(limit)
            .into_iter()
            .map(|(name, _)| name)
            .collect())
    }

    async fn graph_stats(&self) -> KgResult<GraphStats> {
        Ok(self.graph.read().await.stats())
    }
}

fn validate_relationship(relationship: &Relationship) -> KgResult<()> {
    if relationship.source.trim().is_empty() || relationship.target.trim().is_empty() {
        return Err(KgError::graph("relationship endpoints must not be empty"));
    }
    if relationship.relation.trim().is_empty() {
        return Err(KgError::graph(format!(
            "relationship {} -> {} has no type",
            relationship.source, relationship.target
        )));
    }
    if is_generic_label(&relationship.relation) {
        return Err(KgError::graph(format!(
            "generic relationship label '{}' rejected",
            relationship.relation
        )));
    }
    Ok(())
}

fn serialize_record(record: &WalRecord) -> KgResult<Vec<u8>> {
    let mut serializer = AllocSerializer::<1024>::default();
    serializer
        .serialize_value(record)
        .map_err(|_| WalError::Encoding("failed to encode wal record".to_string()))?;
    Ok(serializer.into_serializer().into_inner().to_vec())
}

fn apply_mutation(graph: &mut ConceptGraph, mutation: GraphMutation) {
    match mutation {
        GraphMutation::PutConcept(concept) => {
            graph.insert_concept(concept);
        }
        GraphMutation::PutRelationship(relationship) => {
            graph.insert_relationship(relationship);
        }
        GraphMutation::DeleteConcept(name) => {
            graph.remove_concept(&name);
        }
        GraphMutation::DeleteRelationship {
            source,
            target,
            relation,
        } => {
            graph.remove_relationship(&source, &target, &relation);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_create_concept_is_idempotent() {
        let store = ConceptStore::in_memory();
        let id1 = store.create_concept(&Concept::new("Topology")).await.unwrap();
        let id2 = store
            .create_concept(&Concept::new("Topology").with_description("second"))
            .await
            .unwrap();

        assert_eq!(id1, id2);
        assert_eq!(store.graph_stats().await.unwrap().node_count, 1);
        assert!(store.concept("Topology").await.unwrap().description.is_none());
    }

    #[tokio::test]
    async fn test_relationship_merges_endpoints() {
        let store = ConceptStore::in_memory();
        let rel = Relationship::new("Physics", "Mechanics", "HAS_BRANCH", 0.9);

        assert!(store.create_relationship(&rel).await.unwrap());
        assert!(!store.create_relationship(&rel).await.unwrap());

        let stats = store.graph_stats().await.unwrap();
        assert_eq!(stats.node_count, 2);
        assert_eq!(stats.relationship_count, 1);
        assert!(store.relationship_exists("Mechanics", "Physics").await.unwrap());
    }

    #[tokio::test]
    async fn test_generic_and_empty_labels_rejected() {
        let store = ConceptStore::in_memory();
        for label in ["", "  ", "related to", "Is Related To"] {
            let err = store
                .create_relationship(&Relationship::new("A1", "B1", label, 0.5))
                .await
                .unwrap_err();
            assert!(matches!(err, KgError::Graph { .. }));
            assert!(!err.is_retryable());
        }
        assert_eq!(store.graph_stats().await.unwrap().node_count, 0);
    }

    #[tokio::test]
    async fn test_sample_returns_distinct_names() {
        let store = ConceptStore::in_memory();
        for name in ["Alpha", "Beta", "Gamma"] {
            store.create_concept(&Concept::new(name)).await.unwrap();
        }

        let mut sample = store.sample_random_concepts(2).await.unwrap();
        sample.sort();
        sample.dedup();
        assert_eq!(sample.len(), 2);
        assert_eq!(store.sample_random_concepts(10).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_replay_on_restart() {
        let dir = tempdir().unwrap();
        let wal_path = dir.path().join("graph.wal");

        {
            let store = ConceptStore::open(&wal_path).await.unwrap();
            store.create_concept(&Concept::new("Isolated")).await.unwrap();
            store
                .create_relationship(&Relationship::new("Biology", "Genetics", "HAS_FIELD", 0.8))
                .await
                .unwrap();
            assert_eq!(store.remove_orphan_nodes().await.unwrap(), 1);
        }

        let store = ConceptStore::open(&wal_path).await.unwrap();
        let stats = store.graph_stats().await.unwrap();
        assert_eq!(stats.node_count, 2);
        assert_eq!(stats.relationship_count, 1);
        assert!(!store.contains_concept("Isolated").await);
    }

    #[tokio::test]
    async fn test_low_connectivity_prefers_leaves() {
        let store = ConceptStore::in_memory();
        for target in ["Leaf A", "Leaf B"] {
            store
                .create_relationship(&Relationship::new("Hub", target, "HAS_PART", 1.0))
                .await
                .unwrap();
        }

        let low = store.low_connectivity_concepts(2).await.unwrap();
        assert_eq!(low, vec!["Leaf A".to_string(), "Leaf B".to_string()]);
    }
}
