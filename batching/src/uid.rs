//! Deterministic review keys.
//!
//! When the input carries no natural review identifier, each row is keyed by a
//! BLAKE3 hash of its content fields plus an occurrence ordinal, so byte-identical
//! rows still get distinct keys while keys stay stable across runs.

use std::collections::HashMap;

/// Bumped whenever the canonical field layout changes.
const UID_SCHEME: &str = "review-uid/v1";
const FIELD_SEP: char = '\u{1f}';

/// Content fields that feed a derived key.
#[derive(Debug, Clone, Copy)]
pub struct UidFields<'a> {
    pub project_id: &'a str,
    pub user_id: Option<&'a str>,
    pub created_on: Option<&'a str>,
    pub text: &'a str,
}

impl UidFields<'_> {
    fn canonical(&self) -> String {
        let mut out = String::with_capacity(self.text.len() + 64);
        out.push_str(UID_SCHEME);
        for field in [
            self.project_id,
            self.user_id.unwrap_or(""),
            self.created_on.unwrap_or(""),
            self.text,
        ] {
            out.push(FIELD_SEP);
            out.push_str(field.trim());
        }
        out
    }
}

/// Derive the key for a row whose content has been seen `occurrence` times before.
///
/// Returns 64 lowercase hex characters.
pub fn derive_review_uid(fields: &UidFields<'_>, occurrence: usize) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(fields.canonical().as_bytes());
    hasher.update(&[FIELD_SEP as u8]);
    hasher.update(occurrence.to_string().as_bytes());
    hasher.finalize().to_hex().to_string()
}

/// Assigns derived keys over one pass of the input, tracking duplicate content.
#[derive(Debug, Default)]
pub struct UidAssigner {
    seen: HashMap<blake3::Hash, usize>,
}

impl UidAssigner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn assign(&mut self, fields: &UidFields<'_>) -> String {
        let content = blake3::hash(fields.canonical().as_bytes());
        let occurrence = self.seen.entry(content).or_insert(0);
        let uid = derive_review_uid(fields, *occurrence);
        *occurrence += 1;
        uid
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields<'a>(project_id: &'a str, text: &'a str) -> UidFields<'a> {
        UidFields {
            project_id,
            user_id: Some("u1"),
            created_on: Some("2024-01-01"),
            text,
        }
    }

    #[test]
    fn test_same_fields_same_uid() {
        let a = derive_review_uid(&fields("p1", "Great place"), 0);
        let b = derive_review_uid(&fields("p1", "Great place"), 0);
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_project_id_changes_uid() {
        let a = derive_review_uid(&fields("p1", "Great place"), 0);
        let b = derive_review_uid(&fields("p2", "Great place"), 0);
        assert_ne!(a, b);
    }

    #[test]
    fn test_field_boundaries_do_not_alias() {
        let a = UidFields {
            project_id: "p1",
            user_id: Some("ab"),
            created_on: None,
            text: "c",
        };
        let b = UidFields {
            project_id: "p1",
            user_id: Some("a"),
            created_on: None,
            text: "bc",
        };
        assert_ne!(derive_review_uid(&a, 0), derive_review_uid(&b, 0));
    }

    #[test]
    fn test_assigner_separates_identical_rows() {
        let mut assigner = UidAssigner::new();
        let first = assigner.assign(&fields("p1", "Same text"));
        let second = assigner.assign(&fields("p1", "Same text"));
        assert_ne!(first, second);

        // A fresh pass over the same rows reproduces both keys.
        let mut again = UidAssigner::new();
        assert_eq!(again.assign(&fields("p1", "Same text")), first);
        assert_eq!(again.assign(&fields("p1", "Same text")), second);
    }

    #[test]
    fn test_assigner_unaffected_by_unrelated_rows() {
        let mut plain = UidAssigner::new();
        let key = plain.assign(&fields("p1", "Target"));

        let mut noisy = UidAssigner::new();
        noisy.assign(&fields("p9", "Something else"));
        assert_eq!(noisy.assign(&fields("p1", "Target")), key);
    }
}
