use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, instrument};
use unicode_segmentation::UnicodeSegmentation;

use extract::normalizer::normalize_name;
use index::{Entity, GraphStore, Reached, Relation, Subgraph};

use crate::error::{QueryError, Result};

/// Longest word run looked up as a candidate entity name
const MAX_GRAM_WORDS: usize = 4;

const STOPWORDS: &[&str] = &[
    "a", "about", "am", "an", "and", "any", "are", "as", "at", "be", "been", "by", "can", "could", "did",
    "do", "does", "for", "from", "has", "have", "how", "i", "in", "is", "it", "its", "me", "my", "of", "on",
    "or", "our", "she", "he", "tell", "that", "the", "their", "them", "there", "they", "this", "to", "was",
    "we", "were", "what", "when", "where", "which", "who", "whom", "whose", "why", "will", "with", "would",
    "you", "your",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrieverConfig {
    pub hop_depth: usize,
    pub max_nodes: usize,
}

impl Default for RetrieverConfig {
    fn default() -> Self {
        Self {
            hop_depth: 2,
            max_nodes: 50,
        }
    }
}

impl RetrieverConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_nodes == 0 {
            return Err(QueryError::InvalidConfig("max_nodes must be at least 1".into()));
        }
        Ok(())
    }
}

/// Subgraph selected for one query. Built fresh per query, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalContext {
    /// Seeds admitted into the subgraph, sorted by id
    pub seed_entity_ids: Vec<String>,
    /// Entities ordered by hop distance then id; relations by id
    pub subgraph: Subgraph,
    pub hop_depth: usize,
    pub textual_summary: String,
    /// Whether `max_nodes` cut the expansion short
    pub truncated: bool,
}

/// Selects the part of the graph relevant to a natural-language query
#[derive(Debug, Clone, Copy)]
pub struct Retriever {
    config: RetrieverConfig,
}

impl Retriever {
    pub fn new(config: RetrieverConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &RetrieverConfig {
        &self.config
    }

    #[instrument(skip(self, store), fields(hop_depth = self.config.hop_depth, max_nodes = self.config.max_nodes))]
    pub async fn retrieve(&self, query: &str, store: &dyn GraphStore) -> Result<RetrievalContext> {
        let seeds = find_seeds(query, store).await?;
        if seeds.is_empty() {
            info!("No seed entity found");
            return Err(QueryError::NoSeedEntity(query.to_string()));
        }
        debug!(seeds = seeds.len(), "Seed entities matched");

        let (subgraph, truncated) = self.expand(seeds, store).await?;
        let seed_entity_ids: Vec<String> = subgraph
            .entities
            .iter()
            .filter(|r| r.hops == 0)
            .map(|r| r.entity.entity_id.clone())
            .collect();
        let textual_summary = summarize(&subgraph);

        info!(
            entities = subgraph.entities.len(),
            relations = subgraph.relations.len(),
            truncated,
            "Retrieved subgraph"
        );

        Ok(RetrievalContext {
            seed_entity_ids,
            subgraph,
            hop_depth: self.config.hop_depth,
            textual_summary,
            truncated,
        })
    }

    /// Level-by-level breadth-first expansion. Within a level candidates are
    /// admitted in id order, so truncation always drops the farthest nodes
    /// and the result is independent of store iteration order.
    async fn expand(&self, seeds: Vec<Entity>, store: &dyn GraphStore) -> Result<(Subgraph, bool)> {
        let max_nodes = self.config.max_nodes;
        let mut truncated = seeds.len() > max_nodes;

        let mut collected: BTreeMap<String, Reached> = BTreeMap::new();
        let mut frontier: Vec<String> = Vec::new();
        for entity in seeds.into_iter().take(max_nodes) {
            frontier.push(entity.entity_id.clone());
            collected.insert(entity.entity_id.clone(), Reached { entity, hops: 0 });
        }

        let mut seen_relations: BTreeMap<String, Relation> = BTreeMap::new();

        for hop in 1..=self.config.hop_depth {
            if frontier.is_empty() || truncated {
                break;
            }

            let mut candidates: BTreeMap<String, Entity> = BTreeMap::new();
            for entity_id in &frontier {
                let around = store.neighbors(entity_id, 1).await?;
                for relation in around.relations {
                    seen_relations.entry(relation.relation_id.clone()).or_insert(relation);
                }
                for reached in around.entities {
                    if !collected.contains_key(&reached.entity.entity_id) {
                        candidates.entry(reached.entity.entity_id.clone()).or_insert(reached.entity);
                    }
                }
            }

            frontier = Vec::new();
            for (entity_id, entity) in candidates {
                if collected.len() >= max_nodes {
                    truncated = true;
                    break;
                }
                frontier.push(entity_id.clone());
                collected.insert(entity_id, Reached { entity, hops: hop });
            }
        }

        let relations: Vec<Relation> = seen_relations
            .into_values()
            .filter(|r| collected.contains_key(&r.subject_entity_id) && collected.contains_key(&r.object_entity_id))
            .collect();

        let mut entities: Vec<Reached> = collected.into_values().collect();
        entities.sort_by(|a, b| a.hops.cmp(&b.hops).then_with(|| a.entity.entity_id.cmp(&b.entity.entity_id)));

        Ok((Subgraph { entities, relations }, truncated))
    }
}

/// Entities named anywhere in `query`, sorted by id
pub async fn find_seeds(query: &str, store: &dyn GraphStore) -> Result<Vec<Entity>> {
    let mut seeds: BTreeMap<String, Entity> = BTreeMap::new();
    for gram in candidate_names(query) {
        for entity in store.find_entities_by_name(&gram).await? {
            seeds.entry(entity.entity_id.clone()).or_insert(entity);
        }
    }
    Ok(seeds.into_values().collect())
}

/// Normalized word n-grams of the query that could name an entity.
///
/// A possessive word contributes both spellings, so "McDonald's" reaches an
/// entity stored as `mcdonalds` and "Sarah's" reaches one stored as `sarah`.
fn candidate_names(query: &str) -> BTreeSet<String> {
    let words: Vec<Vec<String>> = query
        .unicode_words()
        .map(|w| word_forms(&w.to_lowercase()))
        .collect();

    let mut grams = BTreeSet::new();
    for len in 1..=MAX_GRAM_WORDS.min(words.len()) {
        for window in words.windows(len) {
            for phrase in spellings(window) {
                if phrase.iter().all(|w| STOPWORDS.contains(&w.as_str())) {
                    continue;
                }
                let name = normalize_name(&phrase.join(" "));
                if !name.is_empty() {
                    grams.insert(name);
                }
            }
        }
    }
    grams
}

/// The word as written, plus the word without a possessive suffix
fn word_forms(word: &str) -> Vec<String> {
    let mut forms = vec![word.to_string()];
    if let Some(stem) = word.strip_suffix("'s").or_else(|| word.strip_suffix("\u{2019}s")) {
        if !stem.is_empty() {
            forms.push(stem.to_string());
        }
    }
    forms
}

/// Every way of picking one form per word of `window`
fn spellings(window: &[Vec<String>]) -> Vec<Vec<String>> {
    window.iter().fold(vec![Vec::new()], |phrases, forms| {
        phrases
            .iter()
            .flat_map(|phrase| {
                forms.iter().map(move |form| {
                    let mut next = phrase.clone();
                    next.push(form.clone());
                    next
                })
            })
            .collect()
    })
}

/// One `Subject --predicate--> Object` line per relation in id order, then
/// one `Name (TYPE)` line per entity no listed relation mentions.
fn summarize(subgraph: &Subgraph) -> String {
    let names: BTreeMap<&str, &str> = subgraph
        .entities
        .iter()
        .map(|r| (r.entity.entity_id.as_str(), r.entity.canonical_name.as_str()))
        .collect();
    let name_of = |id: &str| names.get(id).copied().unwrap_or(id).to_string();

    let mut lines: Vec<String> = subgraph
        .relations
        .iter()
        .map(|r| {
            format!(
                "{} --{}--> {}",
                name_of(&r.subject_entity_id),
                r.predicate_label,
                name_of(&r.object_entity_id)
            )
        })
        .collect();

    let connected: BTreeSet<&str> = subgraph
        .relations
        .iter()
        .flat_map(|r| [r.subject_entity_id.as_str(), r.object_entity_id.as_str()])
        .collect();
    lines.extend(
        subgraph
            .entities
            .iter()
            .filter(|r| !connected.contains(r.entity.entity_id.as_str()))
            .map(|r| format!("{} ({})", r.entity.canonical_name, r.entity.entity_type)),
    );

    lines.join("\n")
}
