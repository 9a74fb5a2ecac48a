use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use extract::normalizer::normalize_name;

use super::{GraphStore, Reached, Subgraph};
use crate::error::{Result, StoreError};
use crate::graph::{Graph, GraphDelta, GraphStats};
use crate::model::{Entity, Relation};

#[derive(Debug, Clone, Default)]
struct Adjacency {
    outgoing: BTreeSet<String>,
    incoming: BTreeSet<String>,
}

#[derive(Debug, Default)]
struct GraphState {
    graph: Graph,
    adjacency: HashMap<String, Adjacency>,
    /// normalized name -> entity ids
    names: HashMap<String, BTreeSet<String>>,
}

impl GraphState {
    fn index_keys(entity: &Entity) -> HashSet<String> {
        let mut keys: HashSet<String> = entity.names().map(normalize_name).collect();
        keys.insert(entity.normalized_name.clone());
        keys.retain(|k| !k.is_empty());
        keys
    }

    fn upsert_entity(&mut self, entity: Entity) {
        if let Some(previous) = self.graph.entities.get(&entity.entity_id) {
            for key in Self::index_keys(previous) {
                if let Some(ids) = self.names.get_mut(&key) {
                    ids.remove(&entity.entity_id);
                    if ids.is_empty() {
                        self.names.remove(&key);
                    }
                }
            }
        }
        for key in Self::index_keys(&entity) {
            self.names.entry(key).or_default().insert(entity.entity_id.clone());
        }
        self.graph.entities.insert(entity.entity_id.clone(), entity);
    }

    fn upsert_relation(&mut self, relation: Relation) {
        self.adjacency
            .entry(relation.subject_entity_id.clone())
            .or_default()
            .outgoing
            .insert(relation.relation_id.clone());
        self.adjacency
            .entry(relation.object_entity_id.clone())
            .or_default()
            .incoming
            .insert(relation.relation_id.clone());
        self.graph.relations.insert(relation.relation_id.clone(), relation);
    }

    fn check_endpoints(&self, relations: &[Relation], pending: impl Fn(&str) -> bool) -> Result<()> {
        for relation in relations {
            for endpoint in [&relation.subject_entity_id, &relation.object_entity_id] {
                if !self.graph.entities.contains_key(endpoint) && !pending(endpoint.as_str()) {
                    return Err(StoreError::DanglingRelation {
                        relation_id: relation.relation_id.clone(),
                        entity_id: endpoint.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    fn relation_ids_of(&self, entity_id: &str) -> impl Iterator<Item = &String> {
        self.adjacency
            .get(entity_id)
            .into_iter()
            .flat_map(|adj| adj.outgoing.iter().chain(adj.incoming.iter()))
    }

    fn neighbors(&self, entity_id: &str, max_hops: usize) -> Subgraph {
        let Some(origin) = self.graph.entities.get(entity_id) else {
            return Subgraph::default();
        };

        let mut hops: HashMap<&str, usize> = HashMap::from([(entity_id, 0)]);
        let mut entities = vec![Reached {
            entity: origin.clone(),
            hops: 0,
        }];
        let mut relations: BTreeMap<&str, &Relation> = BTreeMap::new();
        let mut frontier: Vec<&str> = vec![entity_id];

        for depth in 1..=max_hops {
            let mut next: BTreeSet<&str> = BTreeSet::new();
            for &current in &frontier {
                for relation_id in self.relation_ids_of(current) {
                    let Some(relation) = self.graph.relations.get(relation_id) else {
                        continue;
                    };
                    relations.insert(relation_id.as_str(), relation);
                    let other = relation.other_end(current);
                    if !hops.contains_key(other) {
                        next.insert(other);
                    }
                }
            }

            for &id in &next {
                hops.insert(id, depth);
                if let Some(entity) = self.graph.entities.get(id) {
                    entities.push(Reached {
                        entity: entity.clone(),
                        hops: depth,
                    });
                }
            }
            if next.is_empty() {
                break;
            }
            frontier = next.into_iter().collect();
        }

        Subgraph {
            entities,
            relations: relations.into_values().cloned().collect(),
        }
    }
}

/// In-memory reference store.
///
/// Every write validates before it mutates and holds the write lock for the
/// whole batch, so a reader sees either all of a commit or none of it, and a
/// commit only touches the records it names.
#[derive(Default)]
pub struct MemoryGraphStore {
    state: RwLock<GraphState>,
}

impl MemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_graph(graph: Graph) -> Self {
        let mut state = GraphState::default();
        for entity in graph.entities.into_values() {
            state.upsert_entity(entity);
        }
        for relation in graph.relations.into_values() {
            state.upsert_relation(relation);
        }
        Self {
            state: RwLock::new(state),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, GraphState>> {
        self.state
            .read()
            .map_err(|_| StoreError::Unavailable("graph state lock poisoned".into()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, GraphState>> {
        self.state
            .write()
            .map_err(|_| StoreError::Unavailable("graph state lock poisoned".into()))
    }
}

#[async_trait]
impl GraphStore for MemoryGraphStore {
    async fn put_entities(&self, entities: &[Entity]) -> Result<()> {
        let mut state = self.write()?;
        for entity in entities {
            state.upsert_entity(entity.clone());
        }
        Ok(())
    }

    async fn put_relations(&self, relations: &[Relation]) -> Result<()> {
        let mut state = self.write()?;
        state.check_endpoints(relations, |_| false)?;
        for relation in relations {
            state.upsert_relation(relation.clone());
        }
        Ok(())
    }

    async fn commit(&self, delta: &GraphDelta) -> Result<()> {
        let pending: HashSet<&str> = delta.entities.iter().map(|e| e.entity_id.as_str()).collect();
        let mut state = self.write()?;
        state.check_endpoints(&delta.relations, |id| pending.contains(id))?;
        for entity in &delta.entities {
            state.upsert_entity(entity.clone());
        }
        for relation in &delta.relations {
            state.upsert_relation(relation.clone());
        }
        Ok(())
    }

    async fn get_entity_by_id(&self, entity_id: &str) -> Result<Option<Entity>> {
        Ok(self.read()?.graph.entities.get(entity_id).cloned())
    }

    async fn get_relation_by_id(&self, relation_id: &str) -> Result<Option<Relation>> {
        Ok(self.read()?.graph.relations.get(relation_id).cloned())
    }

    async fn find_entities_by_name(&self, normalized_name: &str) -> Result<Vec<Entity>> {
        let state = self.read()?;
        let Some(ids) = state.names.get(normalized_name) else {
            return Ok(Vec::new());
        };
        Ok(ids.iter().filter_map(|id| state.graph.entities.get(id).cloned()).collect())
    }

    async fn neighbors(&self, entity_id: &str, max_hops: usize) -> Result<Subgraph> {
        Ok(self.read()?.neighbors(entity_id, max_hops))
    }

    async fn snapshot(&self) -> Result<Graph> {
        Ok(self.read()?.graph.clone())
    }

    async fn stats(&self) -> Result<GraphStats> {
        Ok(self.read()?.graph.stats())
    }
}
