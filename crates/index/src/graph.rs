use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use extract::normalizer::{UNKNOWN_TYPE, similar_names};

use crate::error::{Result, StoreError};
use crate::model::{Entity, Relation, relation_id};

/// All entities and relations at a point in time, keyed by id
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Graph {
    pub entities: BTreeMap<String, Entity>,
    pub relations: BTreeMap<String, Relation>,
}

/// Records to upsert into a store; each record replaces the stored one
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphDelta {
    pub entities: Vec<Entity>,
    pub relations: Vec<Relation>,
}

impl GraphDelta {
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.relations.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphStats {
    pub entity_count: usize,
    pub relation_count: usize,
}

/// A pair of entities whose names look alike but whose keys differ
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeCandidate {
    pub survivor_id: String,
    pub absorbed_id: String,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entity(&self, entity_id: &str) -> Option<&Entity> {
        self.entities.get(entity_id)
    }

    pub fn relation(&self, relation_id: &str) -> Option<&Relation> {
        self.relations.get(relation_id)
    }

    pub fn stats(&self) -> GraphStats {
        GraphStats {
            entity_count: self.entities.len(),
            relation_count: self.relations.len(),
        }
    }

    /// Insert an entity, accumulating into an existing record with the same id
    pub fn absorb_entity(&mut self, entity: Entity) {
        match self.entities.get_mut(&entity.entity_id) {
            Some(existing) => existing.absorb(entity),
            None => {
                self.entities.insert(entity.entity_id.clone(), entity);
            }
        }
    }

    pub fn absorb_relation(&mut self, relation: Relation) {
        match self.relations.get_mut(&relation.relation_id) {
            Some(existing) => existing.absorb(relation),
            None => {
                self.relations.insert(relation.relation_id.clone(), relation);
            }
        }
    }

    pub fn relations_of<'a>(&'a self, entity_id: &'a str) -> impl Iterator<Item = &'a Relation> + 'a {
        self.relations.values().filter(move |r| r.touches(entity_id))
    }

    /// Fold `absorbed_id` into `survivor_id`.
    ///
    /// Relations of the absorbed entity are re-pointed at the survivor and
    /// deduplicated again, so support counts and provenance carry over.
    pub fn merge_entities(&mut self, survivor_id: &str, absorbed_id: &str) -> Result<()> {
        if survivor_id == absorbed_id {
            return Err(StoreError::SelfMerge(survivor_id.to_string()));
        }
        if !self.entities.contains_key(survivor_id) {
            return Err(StoreError::NotFound(survivor_id.to_string()));
        }
        let absorbed = self
            .entities
            .remove(absorbed_id)
            .ok_or_else(|| StoreError::NotFound(absorbed_id.to_string()))?;

        if let Some(survivor) = self.entities.get_mut(survivor_id) {
            survivor.absorb(absorbed);
        }

        let moved: Vec<String> = self
            .relations_of(absorbed_id)
            .map(|r| r.relation_id.clone())
            .collect();

        for id in moved {
            let Some(mut relation) = self.relations.remove(&id) else {
                continue;
            };
            if relation.subject_entity_id == absorbed_id {
                relation.subject_entity_id = survivor_id.to_string();
            }
            if relation.object_entity_id == absorbed_id {
                relation.object_entity_id = survivor_id.to_string();
            }
            relation.relation_id = relation_id(
                &relation.subject_entity_id,
                &relation.predicate_label,
                &relation.object_entity_id,
            );
            self.absorb_relation(relation);
        }

        Ok(())
    }

    /// Suggest fuzzy merges: same type (or one side `UNKNOWN`) and similar
    /// normalized names. The entity with more mentions is the survivor.
    pub fn merge_candidates(&self) -> Vec<MergeCandidate> {
        let entities: Vec<&Entity> = self.entities.values().collect();
        let mut candidates = Vec::new();

        for (i, a) in entities.iter().enumerate() {
            for b in &entities[i + 1..] {
                let compatible_types = a.entity_type == b.entity_type
                    || a.entity_type == UNKNOWN_TYPE
                    || b.entity_type == UNKNOWN_TYPE;
                if !compatible_types || !similar_names(&a.normalized_name, &b.normalized_name) {
                    continue;
                }

                // BTreeMap order means a.entity_id < b.entity_id
                let (survivor, absorbed) = if b.mention_count > a.mention_count { (b, a) } else { (a, b) };
                candidates.push(MergeCandidate {
                    survivor_id: survivor.entity_id.clone(),
                    absorbed_id: absorbed.entity_id.clone(),
                });
            }
        }

        candidates
    }
}
