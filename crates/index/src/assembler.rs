//! Merges per-chunk mentions into the canonical graph.
//!
//! Every accumulation here is a sum, a set union or a maximum under a total
//! order, so merging is insensitive to batch granularity and to the order in
//! which chunks arrive.

use tracing::debug;

use extract::normalizer::{normalize_name, normalize_predicate, normalize_type};
use extract::{EntityMention, ExtractionResult, RelationMention};

use crate::error::Result;
use crate::graph::{Graph, GraphDelta};
use crate::model::{Entity, NameCandidate, Relation, entity_id};
use crate::store::GraphStore;

#[derive(Debug, Clone, Copy, Default)]
pub struct GraphAssembler;

impl GraphAssembler {
    pub fn new() -> Self {
        Self
    }

    /// Merge mentions into `graph` and return the result
    pub fn merge(&self, mut graph: Graph, entities: &[EntityMention], relations: &[RelationMention]) -> Graph {
        self.merge_into(&mut graph, entities, relations);
        graph
    }

    pub fn merge_into(&self, graph: &mut Graph, entities: &[EntityMention], relations: &[RelationMention]) {
        for mention in entities {
            let Some(id) = self.resolve(graph, mention) else {
                continue;
            };
            if let Some(entity) = graph.entities.get_mut(&id) {
                entity.mention_count += 1;
            }
        }

        for mention in relations {
            let predicate = normalize_predicate(&mention.predicate_label);
            if predicate.is_empty() {
                continue;
            }
            // Endpoints contribute names but are not counted as mentions
            let (Some(subject_id), Some(object_id)) =
                (self.resolve(graph, &mention.subject), self.resolve(graph, &mention.object))
            else {
                continue;
            };

            let relation = Relation::new(&subject_id, &predicate, &object_id);
            graph
                .relations
                .entry(relation.relation_id.clone())
                .or_insert(relation)
                .record_support(&mention.source_chunk_id, mention.confidence);
        }
    }

    /// Find or create the entity for a mention and record its surface form.
    /// Returns `None` for mentions whose name normalizes to nothing.
    fn resolve(&self, graph: &mut Graph, mention: &EntityMention) -> Option<String> {
        let normalized = normalize_name(&mention.surface_form);
        if normalized.is_empty() {
            return None;
        }
        let entity_type = normalize_type(&mention.proposed_type);
        let id = entity_id(&normalized, &entity_type);
        let candidate = NameCandidate {
            surface_form: mention.surface_form.trim(),
            confidence: mention.confidence,
            chunk_index: mention.source_chunk_index,
        };

        graph
            .entities
            .entry(id.clone())
            .and_modify(|entity| entity.record_name(candidate))
            .or_insert_with(|| Entity::new(&normalized, &entity_type, candidate));

        Some(id)
    }

    /// Compute the records a store must upsert to absorb `extraction`.
    ///
    /// Touched entities and relations are read back from the store and
    /// combined with this extraction's contribution. The caller must hold the
    /// graph's write lock from here until the delta is committed.
    pub async fn propose(&self, store: &dyn GraphStore, extraction: &ExtractionResult) -> Result<GraphDelta> {
        let fresh = self.merge(Graph::new(), &extraction.entities, &extraction.relations);

        let mut delta = GraphDelta::default();
        for (id, contribution) in fresh.entities {
            let merged = match store.get_entity_by_id(&id).await? {
                Some(mut existing) => {
                    existing.absorb(contribution);
                    existing
                }
                None => contribution,
            };
            delta.entities.push(merged);
        }
        for (id, contribution) in fresh.relations {
            let merged = match store.get_relation_by_id(&id).await? {
                Some(mut existing) => {
                    existing.absorb(contribution);
                    existing
                }
                None => contribution,
            };
            delta.relations.push(merged);
        }

        debug!(
            chunk_id = %extraction.chunk_id,
            entities = delta.entities.len(),
            relations = delta.relations.len(),
            "Proposed graph delta"
        );
        Ok(delta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryGraphStore;
    use std::collections::BTreeSet;

    fn mention(name: &str, entity_type: &str, chunk: usize, confidence: f32) -> EntityMention {
        EntityMention::new(name, entity_type)
            .from_chunk(format!("chunk-{chunk}"), chunk)
            .with_confidence(confidence)
    }

    fn works_at(subject: &str, object: &str, chunk: usize) -> RelationMention {
        RelationMention::new(
            mention(subject, "UNKNOWN", chunk, 1.0),
            "works_at",
            mention(object, "UNKNOWN", chunk, 1.0),
        )
    }

    fn sample_mentions() -> (Vec<EntityMention>, Vec<RelationMention>) {
        let entities = vec![
            mention("Sarah", "person", 0, 0.6),
            mention("sarah", "PERSON", 1, 0.6),
            mention("The Sarah", "Person", 2, 0.9),
            mention("prismaticAI", "ORGANIZATION", 0, 0.8),
            mention("PrismaticAI", "organization", 3, 0.8),
            mention("Sarah", "ORGANIZATION", 3, 0.5),
        ];
        let relations = vec![
            works_at("Sarah", "prismaticAI", 0),
            works_at("sarah", "PrismaticAI", 1),
            works_at("Tom", "prismaticAI", 3),
        ];
        (entities, relations)
    }

    #[test]
    fn test_case_folded_relations_merge() {
        let graph = GraphAssembler::new().merge(
            Graph::new(),
            &[],
            &[works_at("Sarah", "prismaticAI", 0), works_at("sarah", "PrismaticAI", 1)],
        );

        assert_eq!(graph.relations.len(), 1);
        let relation = graph.relations.values().next().unwrap();
        assert_eq!(relation.support_count, 2);
        assert_eq!(relation.source_chunk_ids, BTreeSet::from(["chunk-0".to_string(), "chunk-1".to_string()]));
        assert_eq!(graph.entities.len(), 2);
    }

    #[test]
    fn test_exact_key_dedup() {
        let (entities, _) = sample_mentions();
        let graph = GraphAssembler::new().merge(Graph::new(), &entities, &[]);

        // sarah/PERSON, prismaticai/ORGANIZATION, sarah/ORGANIZATION
        assert_eq!(graph.entities.len(), 3);
        let sarah = graph.entity(&entity_id("sarah", "PERSON")).unwrap();
        assert_eq!(sarah.mention_count, 3);
        assert_eq!(sarah.canonical_name, "The Sarah");
        assert_eq!(
            sarah.aliases,
            BTreeSet::from(["Sarah".to_string(), "sarah".to_string()])
        );
        let org = graph.entity(&entity_id("prismaticai", "ORGANIZATION")).unwrap();
        assert_eq!(org.canonical_name, "prismaticAI");
    }

    #[test]
    fn test_merge_is_order_independent() {
        let (entities, relations) = sample_mentions();
        let assembler = GraphAssembler::new();
        let expected = assembler.merge(Graph::new(), &entities, &relations);

        // Reversed order
        let mut reversed_entities = entities.clone();
        reversed_entities.reverse();
        let mut reversed_relations = relations.clone();
        reversed_relations.reverse();
        assert_eq!(assembler.merge(Graph::new(), &reversed_entities, &reversed_relations), expected);

        // Rotations, one mention at a time, relations first
        for shift in 0..entities.len() {
            let mut rotated = entities.clone();
            rotated.rotate_left(shift);
            let mut graph = Graph::new();
            for relation in relations.iter().rev() {
                assembler.merge_into(&mut graph, &[], std::slice::from_ref(relation));
            }
            for entity in &rotated {
                assembler.merge_into(&mut graph, std::slice::from_ref(entity), &[]);
            }
            assert_eq!(graph, expected, "shift {shift}");
        }
    }

    #[test]
    fn test_aliases_only_grow() {
        let (entities, _) = sample_mentions();
        let assembler = GraphAssembler::new();
        let id = entity_id("sarah", "PERSON");
        let mut graph = Graph::new();
        let mut seen: BTreeSet<String> = BTreeSet::new();

        for entity in &entities {
            assembler.merge_into(&mut graph, std::slice::from_ref(entity), &[]);
            if let Some(sarah) = graph.entity(&id) {
                let names: BTreeSet<String> = sarah.names().map(str::to_string).collect();
                assert!(names.is_superset(&seen));
                seen = names;
            }
        }
    }

    #[tokio::test]
    async fn test_propose_matches_batch_merge() {
        let (entities, relations) = sample_mentions();
        let assembler = GraphAssembler::new();
        let store = MemoryGraphStore::new();

        // Split into two "chunks" and commit them incrementally
        let first = ExtractionResult {
            chunk_id: "a".into(),
            entities: entities[..3].to_vec(),
            relations: relations[..1].to_vec(),
        };
        let second = ExtractionResult {
            chunk_id: "b".into(),
            entities: entities[3..].to_vec(),
            relations: relations[1..].to_vec(),
        };
        for extraction in [&second, &first] {
            let delta = assembler.propose(&store, extraction).await.unwrap();
            store.commit(&delta).await.unwrap();
        }

        let expected = assembler.merge(Graph::new(), &entities, &relations);
        assert_eq!(store.snapshot().await.unwrap(), expected);
    }
}
