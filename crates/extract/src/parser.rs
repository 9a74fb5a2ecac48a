//! Strict conversion of untyped model output into mention records.

use std::collections::HashMap;

use ingest::Chunk;

use crate::error::{ExtractError, Result};
use crate::normalizer::{UNKNOWN_TYPE, normalize_name, normalize_predicate, normalize_type};
use crate::schema::{EntityMention, ExtractionResult, RawExtraction, RelationMention};

/// Parse and validate a model response for `chunk`.
///
/// Relation endpoints may name an entity by its response-local id ("E1") or by
/// its surface form. Endpoints that match no listed entity become new
/// mentions of type `UNKNOWN`.
pub fn parse_extraction(chunk: &Chunk, response: &str) -> Result<ExtractionResult> {
    let body = strip_code_fence(response);
    let value: serde_json::Value = serde_json::from_str(body)
        .map_err(|e| ExtractError::parse(&chunk.id, format!("invalid JSON: {e}")))?;
    if !value.is_object() {
        return Err(ExtractError::parse(&chunk.id, "expected a JSON object"));
    }
    let raw: RawExtraction = serde_json::from_value(value)
        .map_err(|e| ExtractError::parse(&chunk.id, format!("schema mismatch: {e}")))?;

    let mut entities: Vec<EntityMention> = Vec::with_capacity(raw.entities.len());
    let mut by_local_id: HashMap<String, usize> = HashMap::new();
    let mut by_name: HashMap<String, usize> = HashMap::new();

    for raw_entity in raw.entities {
        let name = raw_entity.name.trim();
        if normalize_name(name).is_empty() {
            return Err(ExtractError::parse(&chunk.id, "entity with empty name"));
        }
        let confidence = validate_confidence(&chunk.id, raw_entity.confidence)?;
        let entity_type = raw_entity.entity_type.as_deref().map_or_else(|| UNKNOWN_TYPE.to_string(), normalize_type);

        let position = entities.len();
        entities.push(
            EntityMention::new(name, entity_type)
                .from_chunk(&chunk.id, chunk.index)
                .with_confidence(confidence),
        );
        if let Some(local_id) = raw_entity.id {
            by_local_id.insert(local_id.trim().to_string(), position);
        }
        by_name.entry(normalize_name(name)).or_insert(position);
    }

    let mut relations = Vec::with_capacity(raw.relations.len());
    for raw_relation in raw.relations {
        let predicate = normalize_predicate(&raw_relation.relation);
        if predicate.is_empty() {
            return Err(ExtractError::parse(&chunk.id, "relation with empty predicate"));
        }
        let confidence = validate_confidence(&chunk.id, raw_relation.confidence)?;

        let subject = resolve_endpoint(chunk, &raw_relation.source, confidence, &mut entities, &by_local_id, &mut by_name)?;
        let object = resolve_endpoint(chunk, &raw_relation.target, confidence, &mut entities, &by_local_id, &mut by_name)?;

        relations.push(RelationMention {
            subject,
            predicate_label: predicate,
            object,
            source_chunk_id: chunk.id.clone(),
            source_chunk_index: chunk.index,
            confidence,
        });
    }

    Ok(ExtractionResult {
        chunk_id: chunk.id.clone(),
        entities,
        relations,
    })
}

fn resolve_endpoint(
    chunk: &Chunk,
    reference: &str,
    confidence: f32,
    entities: &mut Vec<EntityMention>,
    by_local_id: &HashMap<String, usize>,
    by_name: &mut HashMap<String, usize>,
) -> Result<EntityMention> {
    let reference = reference.trim();
    if let Some(&position) = by_local_id.get(reference) {
        return Ok(entities[position].clone());
    }

    let normalized = normalize_name(reference);
    if normalized.is_empty() {
        return Err(ExtractError::parse(&chunk.id, "relation endpoint with empty name"));
    }
    if let Some(&position) = by_name.get(&normalized) {
        return Ok(entities[position].clone());
    }

    let mention = EntityMention::new(reference, UNKNOWN_TYPE)
        .from_chunk(&chunk.id, chunk.index)
        .with_confidence(confidence);
    by_name.insert(normalized, entities.len());
    entities.push(mention.clone());
    Ok(mention)
}

fn validate_confidence(chunk_id: &str, confidence: Option<f64>) -> Result<f32> {
    match confidence {
        None => Ok(1.0),
        Some(c) if c.is_finite() && (0.0..=1.0).contains(&c) => Ok(c as f32),
        Some(c) => Err(ExtractError::parse(chunk_id, format!("confidence {c} outside [0, 1]"))),
    }
}

/// Models like to wrap JSON in ```json fences despite being told not to
fn strip_code_fence(response: &str) -> &str {
    let trimmed = response.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.split_once('\n').map_or("", |(_, body)| body);
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}
