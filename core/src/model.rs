use rkyv::{Archive, Deserialize as RkyvDeserialize, Serialize as RkyvSerialize};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Relationship labels too vague to carry information.
pub const GENERIC_RELATION_LABELS: [&str; 3] = ["related to", "is related to", "relates to"];

pub type ConceptId = u64;

#[derive(
    Archive, RkyvDeserialize, RkyvSerialize, Serialize, Deserialize, Debug, PartialEq, Clone,
)]
#[archive(check_bytes)]
pub struct Concept {
    pub name: String,
    pub description: Option<String>,
    pub relevance: f32,
}

#[derive(
    Archive, RkyvDeserialize, RkyvSerialize, Serialize, Deserialize, Debug, PartialEq, Clone,
)]
#[archive(check_bytes)]
pub struct Relationship {
    pub source: String,
    pub target: String,
    pub relation: String,
    pub description: Option<String>,
    pub strength: f32,
}

impl Concept {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            relevance: 1.0,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn id(&self) -> ConceptId {
        derive_concept_id(&self.name)
    }
}

impl Relationship {
    pub fn new(
        source: impl Into<String>,
        target: impl Into<String>,
        relation: impl Into<String>,
        strength: f32,
    ) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            relation: relation.into(),
            description: None,
            strength,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// A candidate proposed by the generative text service for "concepts related to X".
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
pub struct RelatedConcept {
    pub name: String,
    #[serde(default, alias = "type")]
    pub relation: String,
    #[serde(default = "default_relevance", alias = "strength")]
    pub relevance: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl RelatedConcept {
    pub fn new(name: impl Into<String>, relation: impl Into<String>, relevance: f32) -> Self {
        Self {
            name: name.into(),
            relation: relation.into(),
            relevance,
            description: None,
        }
    }
}

/// The answer to "is there a relationship between A and B".
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
pub struct MinedRelationship {
    pub relation: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default = "default_relevance")]
    pub strength: f32,
}

impl MinedRelationship {
    pub fn new(relation: impl Into<String>) -> Self {
        Self {
            relation: relation.into(),
            description: None,
            strength: default_relevance(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, Copy, Default)]
pub struct GraphStats {
    pub node_count: usize,
    pub relationship_count: usize,
}

fn default_relevance() -> f32 {
    1.0
}

pub fn is_generic_label(relation: &str) -> bool {
    let normalized = relation.trim().to_lowercase();
    normalized.is_empty() || GENERIC_RELATION_LABELS.contains(&normalized.as_str())
}

pub fn derive_concept_id(name: &str) -> ConceptId {
    let mut hasher = Sha256::new();
    hasher.update(name.as_bytes());
    let digest = hasher.finalize();
    u64::from_le_bytes([
        digest[0], digest[1], digest[2], digest[3], digest[4], digest[5], digest[6], digest[7],
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generic_labels_are_detected() {
        assert!(is_generic_label(""));
        assert!(is_generic_label("  related to "));
        assert!(is_generic_label("Is Related To"));
        assert!(!is_generic_label("PART_OF"));
    }

    #[test]
    fn concept_id_is_stable_and_case_sensitive() {
        assert_eq!(derive_concept_id("Graph"), derive_concept_id("Graph"));
        assert_ne!(derive_concept_id("Graph"), derive_concept_id("graph"));
        assert_eq!(Concept::new("Graph").id(), derive_concept_id("Graph"));
    }

    #[test]
    fn related_concept_accepts_producer_aliases() {
        let parsed: Vec<RelatedConcept> = serde_json::from_str(
            r#"[{"name": "Neural Network", "type": "PART_OF", "strength": 0.7},
                {"name": "Ontology"}]"#,
        )
        .unwrap();

        assert_eq!(parsed[0].relation, "PART_OF");
        assert!((parsed[0].relevance - 0.7).abs() < f32::EPSILON);
        assert_eq!(parsed[1].relation, "");
        assert_eq!(parsed[1].relevance, 1.0);
    }
}
