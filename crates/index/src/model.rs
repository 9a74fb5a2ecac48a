//! Canonical graph records: deduplicated entities and relations.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::cmp::Ordering;
use std::collections::BTreeSet;

const SEPARATOR: &[u8] = b"\x1f";

fn stable_id(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            hasher.update(SEPARATOR);
        }
        hasher.update(part.as_bytes());
    }
    hex::encode(&hasher.finalize()[..16])
}

/// Id of the entity owning the dedup key `(normalized_name, entity_type)`
pub fn entity_id(normalized_name: &str, entity_type: &str) -> String {
    stable_id(&[normalized_name, entity_type])
}

pub fn relation_id(subject_entity_id: &str, predicate_label: &str, object_entity_id: &str) -> String {
    stable_id(&[subject_entity_id, predicate_label, object_entity_id])
}

/// A surface form together with the evidence backing it as canonical name
#[derive(Debug, Clone, Copy)]
pub struct NameCandidate<'a> {
    pub surface_form: &'a str,
    pub confidence: f32,
    pub chunk_index: usize,
}

impl NameCandidate<'_> {
    /// Higher confidence wins, then the earlier chunk, then the smaller string
    fn outranks(&self, other: &NameCandidate<'_>) -> bool {
        self.confidence
            .total_cmp(&other.confidence)
            .then_with(|| other.chunk_index.cmp(&self.chunk_index))
            .then_with(|| other.surface_form.cmp(self.surface_form))
            == Ordering::Greater
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub entity_id: String,
    pub canonical_name: String,
    pub normalized_name: String,
    pub entity_type: String,
    /// Every recorded surface form other than `canonical_name`
    pub aliases: BTreeSet<String>,
    pub mention_count: u64,
    pub canonical_confidence: f32,
    pub canonical_chunk_index: usize,
}

impl Entity {
    pub fn new(normalized_name: &str, entity_type: &str, name: NameCandidate<'_>) -> Self {
        Self {
            entity_id: entity_id(normalized_name, entity_type),
            canonical_name: name.surface_form.to_string(),
            normalized_name: normalized_name.to_string(),
            entity_type: entity_type.to_string(),
            aliases: BTreeSet::new(),
            mention_count: 0,
            canonical_confidence: name.confidence,
            canonical_chunk_index: name.chunk_index,
        }
    }

    fn canonical_candidate(&self) -> NameCandidate<'_> {
        NameCandidate {
            surface_form: &self.canonical_name,
            confidence: self.canonical_confidence,
            chunk_index: self.canonical_chunk_index,
        }
    }

    /// Record a surface form. It becomes the canonical name if it outranks
    /// the current one; the displaced name moves to `aliases`.
    pub fn record_name(&mut self, candidate: NameCandidate<'_>) {
        if candidate.outranks(&self.canonical_candidate()) {
            if candidate.surface_form != self.canonical_name {
                let previous = std::mem::replace(&mut self.canonical_name, candidate.surface_form.to_string());
                self.aliases.remove(candidate.surface_form);
                self.aliases.insert(previous);
            }
            self.canonical_confidence = candidate.confidence;
            self.canonical_chunk_index = candidate.chunk_index;
        } else if candidate.surface_form != self.canonical_name {
            self.aliases.insert(candidate.surface_form.to_string());
        }
    }

    /// Fold another record of the same (or an explicitly merged) entity in
    pub fn absorb(&mut self, other: Entity) {
        self.mention_count += other.mention_count;
        self.record_name(other.canonical_candidate());
        for alias in other.aliases {
            if alias != self.canonical_name {
                self.aliases.insert(alias);
            }
        }
    }

    /// Canonical name followed by aliases
    pub fn names(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.canonical_name.as_str()).chain(self.aliases.iter().map(String::as_str))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relation {
    pub relation_id: String,
    pub subject_entity_id: String,
    pub predicate_label: String,
    pub object_entity_id: String,
    pub support_count: u64,
    pub source_chunk_ids: BTreeSet<String>,
    /// Highest confidence among merged mentions
    pub confidence: f32,
}

impl Relation {
    pub fn new(subject_entity_id: &str, predicate_label: &str, object_entity_id: &str) -> Self {
        Self {
            relation_id: relation_id(subject_entity_id, predicate_label, object_entity_id),
            subject_entity_id: subject_entity_id.to_string(),
            predicate_label: predicate_label.to_string(),
            object_entity_id: object_entity_id.to_string(),
            support_count: 0,
            source_chunk_ids: BTreeSet::new(),
            confidence: 0.0,
        }
    }

    pub fn record_support(&mut self, chunk_id: &str, confidence: f32) {
        self.support_count += 1;
        if !chunk_id.is_empty() {
            self.source_chunk_ids.insert(chunk_id.to_string());
        }
        self.confidence = self.confidence.max(confidence);
    }

    pub fn absorb(&mut self, other: Relation) {
        self.support_count += other.support_count;
        self.source_chunk_ids.extend(other.source_chunk_ids);
        self.confidence = self.confidence.max(other.confidence);
    }

    pub fn touches(&self, entity_id: &str) -> bool {
        self.subject_entity_id == entity_id || self.object_entity_id == entity_id
    }

    /// The endpoint opposite `entity_id`
    pub fn other_end(&self, entity_id: &str) -> &str {
        if self.subject_entity_id == entity_id {
            &self.object_entity_id
        } else {
            &self.subject_entity_id
        }
    }
}
