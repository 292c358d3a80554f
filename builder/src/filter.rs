use kgraph_core::model::{is_generic_label, MinedRelationship, RelatedConcept};
use thiserror::Error;

/// Characters that mark a proposed name as noise.
pub const REJECTED_CHARACTERS: &str = "!@#$%^&*()_+={}[]|\\:;\"'<>,?/~`";

pub const MIN_NAME_CHARS: usize = 3;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    #[error("empty name")]
    EmptyName,
    #[error("name shorter than 3 characters")]
    TooShort,
    #[error("name contains control or special characters")]
    SpecialCharacters,
    #[error("relation label is empty or generic")]
    GenericRelation,
    #[error("every word of a long name is capitalized")]
    AllCapitalized,
}

/// Checks a proposed related concept. Every candidate goes through here
/// before anything is persisted.
pub fn validate_candidate(candidate: &RelatedConcept) -> Result<(), Rejection> {
    validate_name(&candidate.name)?;
    validate_relation(&candidate.relation)
}

pub fn validate_mined(relationship: &MinedRelationship) -> Result<(), Rejection> {
    validate_relation(&relationship.relation)
}

pub fn validate_name(name: &str) -> Result<(), Rejection> {
    if name.trim().is_empty() {
        return Err(Rejection::EmptyName);
    }
    if name.chars().count() < MIN_NAME_CHARS {
        return Err(Rejection::TooShort);
    }
    if name
        .chars()
        .any(|c| c.is_control() || REJECTED_CHARACTERS.contains(c))
    {
        return Err(Rejection::SpecialCharacters);
    }

    let words: Vec<&str> = name.split_whitespace().collect();
    let capitalized = words
        .iter()
        .filter(|word| word.starts_with(|c: char| c.is_ascii_uppercase()))
        .count();
    if words.len() > 2 && capitalized == words.len() {
        return Err(Rejection::AllCapitalized);
    }
    Ok(())
}

pub fn validate_relation(relation: &str) -> Result<(), Rejection> {
    if is_generic_label(relation) {
        return Err(Rejection::GenericRelation);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(name: &str, relation: &str) -> RelatedConcept {
        RelatedConcept::new(name, relation, 0.5)
    }

    #[test]
    fn test_accepts_ordinary_candidates() {
        assert!(validate_candidate(&candidate("Machine learning", "SUBFIELD_OF")).is_ok());
        assert!(validate_candidate(&candidate("Graph Theory", "USES")).is_ok());
        assert!(validate_candidate(&candidate("Bayesian inference in practice", "PART_OF")).is_ok());
        assert!(validate_candidate(&candidate("Real-time systems", "HAS_PART")).is_ok());
    }

    #[test]
    fn test_rejects_bad_names() {
        assert_eq!(validate_candidate(&candidate("", "USES")), Err(Rejection::EmptyName));
        assert_eq!(validate_candidate(&candidate("   ", "USES")), Err(Rejection::EmptyName));
        assert_eq!(validate_candidate(&candidate("AI", "USES")), Err(Rejection::TooShort));
        assert_eq!(
            validate_candidate(&candidate("C++ templates", "USES")),
            Err(Rejection::SpecialCharacters)
        );
        assert_eq!(
            validate_candidate(&candidate("snake_case", "USES")),
            Err(Rejection::SpecialCharacters)
        );
        assert_eq!(
            validate_candidate(&candidate("line\nbreak", "USES")),
            Err(Rejection::SpecialCharacters)
        );
        assert_eq!(
            validate_candidate(&candidate("Quantum Flux Harmonizer", "USES")),
            Err(Rejection::AllCapitalized)
        );
    }

    #[test]
    fn test_rejects_generic_relations() {
        for relation in ["", "related to", "is related to", "Relates To "] {
            assert_eq!(
                validate_candidate(&candidate("Statistics", relation)),
                Err(Rejection::GenericRelation)
            );
        }
        assert_eq!(
            validate_mined(&MinedRelationship::new("related to")),
            Err(Rejection::GenericRelation)
        );
        assert!(validate_mined(&MinedRelationship::new("DERIVED_FROM")).is_ok());
    }
}
