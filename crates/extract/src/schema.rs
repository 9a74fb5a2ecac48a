use serde::{Deserialize, Serialize};

/// A raw, per-chunk observation of an entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityMention {
    pub surface_form: String,
    pub proposed_type: String,
    pub source_chunk_id: String,
    pub source_chunk_index: usize,
    pub confidence: f32,
}

impl EntityMention {
    pub fn new(surface_form: impl Into<String>, proposed_type: impl Into<String>) -> Self {
        Self {
            surface_form: surface_form.into(),
            proposed_type: proposed_type.into(),
            source_chunk_id: String::new(),
            source_chunk_index: 0,
            confidence: 1.0,
        }
    }

    pub fn from_chunk(mut self, chunk_id: impl Into<String>, chunk_index: usize) -> Self {
        self.source_chunk_id = chunk_id.into();
        self.source_chunk_index = chunk_index;
        self
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence;
        self
    }
}

/// A raw, per-chunk observation of a relationship between two mentions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationMention {
    pub subject: EntityMention,
    pub predicate_label: String,
    pub object: EntityMention,
    pub source_chunk_id: String,
    pub source_chunk_index: usize,
    pub confidence: f32,
}

impl RelationMention {
    /// Build a relation whose provenance is taken from the subject mention
    pub fn new(subject: EntityMention, predicate_label: impl Into<String>, object: EntityMention) -> Self {
        Self {
            source_chunk_id: subject.source_chunk_id.clone(),
            source_chunk_index: subject.source_chunk_index,
            confidence: subject.confidence.min(object.confidence),
            subject,
            predicate_label: predicate_label.into(),
            object,
        }
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence;
        self
    }
}

/// Validated output of one chunk's extraction
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub chunk_id: String,
    pub entities: Vec<EntityMention>,
    pub relations: Vec<RelationMention>,
}

impl ExtractionResult {
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.relations.is_empty()
    }
}

/// The JSON shape requested from the model. Nothing here is trusted until
/// `parser::parse_extraction` has validated it.
#[derive(Debug, Deserialize)]
pub(crate) struct RawExtraction {
    #[serde(default)]
    pub entities: Vec<RawEntity>,
    #[serde(default)]
    pub relations: Vec<RawRelation>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawEntity {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default, rename = "type")]
    pub entity_type: Option<String>,
    #[serde(default)]
    pub confidence: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawRelation {
    #[serde(alias = "subject")]
    pub source: String,
    #[serde(alias = "object")]
    pub target: String,
    #[serde(alias = "predicate")]
    pub relation: String,
    #[serde(default)]
    pub confidence: Option<f64>,
}
