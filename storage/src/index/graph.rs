use kgraph_core::model::{Concept, GraphStats, Relationship};
use std::collections::{BTreeMap, HashMap};

/// Identity of a stored edge: (source, target, relation).
pub type EdgeKey = (String, String, String);

/// Name-keyed concept graph with outgoing adjacency and incoming degree counts.
#[derive(Default)]
pub struct ConceptGraph {
    concepts: BTreeMap<String, Concept>,
    outgoing: HashMap<String, Vec<Relationship>>,
    incoming_degree: HashMap<String, usize>,
}

impl ConceptGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` if a concept with this name already existed.
    pub fn insert_concept(&mut self, concept: Concept) -> bool {
        if self.concepts.contains_key(&concept.name) {
            return false;
        }
        self.concepts.insert(concept.name.clone(), concept);
        true
    }

    pub fn contains_concept(&self, name: &str) -> bool {
        self.concepts.contains_key(name)
    }

    pub fn concept(&self, name: &str) -> Option<&Concept> {
        self.concepts.get(name)
    }

    /// Returns `false` if the same (source, target, relation) edge already existed.
    pub fn insert_relationship(&mut self, relationship: Relationship) -> bool {
        if self.contains_relationship(
            &relationship.source,
            &relationship.target,
            &relationship.relation,
        ) {
            return false;
        }
        *self
            .incoming_degree
            .entry(relationship.target.clone())
            .or_insert(0) += 1;
        self.outgoing
            .entry(relationship.source.clone())
            .or_default()
            .push(relationship);
        true
    }

    pub fn contains_relationship(&self, source: &str, target: &str, relation: &str) -> bool {
        self.outgoing
            .get(source)
            .map(|edges| {
                edges
                    .iter()
                    .any(|edge| edge.target == target && edge.relation == relation)
            })
            .unwrap_or(false)
    }

    /// Any edge between `a` and `b`, in either direction.
    pub fn connected(&self, a: &str, b: &str) -> bool {
        let has_edge = |from: &str, to: &str| {
            self.outgoing
                .get(from)
                .map(|edges| edges.iter().any(|edge| edge.target == to))
                .unwrap_or(false)
        };
        has_edge(a, b) || has_edge(b, a)
    }

    pub fn remove_relationship(&mut self, source: &str, target: &str, relation: &str) -> bool {
        let Some(edges) = self.outgoing.get_mut(source) else {
            return false;
        };
        let before = edges.len();
        edges.retain(|edge| !(edge.target == target && edge.relation == relation));
        let removed = before - edges.len();
        if edges.is_empty() {
            self.outgoing.remove(source);
        }
        for _ in 0..removed {
            self.decrement_incoming(target);
        }
        removed > 0
    }

    /// Removes the concept and every edge touching it.
    pub fn remove_concept(&mut self, name: &str) -> bool {
        if self.concepts.remove(name).is_none() {
            return false;
        }

        if let Some(edges) = self.outgoing.remove(name) {
            for edge in edges {
                self.decrement_incoming(&edge.target);
            }
        }

        for edges in self.outgoing.values_mut() {
            edges.retain(|edge| edge.target != name);
        }
        self.outgoing.retain(|_, edges| !edges.is_empty());
        self.incoming_degree.remove(name);
        true
    }

    pub fn degree(&self, name: &str) -> usize {
        let out = self.outgoing.get(name).map(Vec::len).unwrap_or(0);
        let incoming = self.incoming_degree.get(name).copied().unwrap_or(0);
        out + incoming
    }

    /// Concepts with no incident edge in either direction.
    pub fn orphan_concepts(&self) -> Vec<String> {
        self.concepts
            .keys()
            .filter(|name| self.degree(name) == 0)
            .cloned()
            .collect()
    }

    /// Edges missing their type label or pointing at a concept that no longer exists.
    pub fn orphan_relationships(&self) -> Vec<EdgeKey> {
        self.outgoing
            .values()
            .flatten()
            .filter(|edge| {
                edge.relation.trim().is_empty()
                    || !self.concepts.contains_key(&edge.source)
                    || !self.concepts.contains_key(&edge.target)
            })
            .map(|edge| {
                (
                    edge.source.clone(),
                    edge.target.clone(),
                    edge.relation.clone(),
                )
            })
            .collect()
    }

    /// Concepts ordered by ascending degree, ties broken by name.
    pub fn least_connected(&self, limit: usize) -> Vec<(String, usize)> {
        let mut ranked: Vec<(String, usize)> = self
            .concepts
            .keys()
            .map(|name| (name.clone(), self.degree(name)))
            .collect();
        ranked.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        ranked.truncate(limit);
        ranked
    }

    pub fn concept_names(&self) -> Vec<String> {
        self.concepts.keys().cloned().collect()
    }

    pub fn relationships(&self) -> impl Iterator<Item = &Relationship> {
        self.outgoing.values().flatten()
    }

    pub fn stats(&self) -> GraphStats {
        GraphStats {
            node_count: self.concepts.len(),
            relationship_count: self.outgoing.values().map(Vec::len).sum(),
        }
    }

    fn decrement_incoming(&mut self, target: &str) {
        if let Some(count) = self.incoming_degree.get_mut(target) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                self.incoming_degree.remove(target);
            }
        }
    }
}
