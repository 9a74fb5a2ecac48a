//! Name, type and predicate normalisation shared by the extractor, the graph
//! assembler and the retriever.

use regex::Regex;
use std::sync::LazyLock;

static APOSTROPHES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"['\x{2019}`]").expect("valid apostrophe pattern"));
static NON_WORD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^\p{L}\p{N}]+").expect("valid separator pattern"));

const DETERMINERS: [&str; 3] = ["the", "a", "an"];

pub const UNKNOWN_TYPE: &str = "UNKNOWN";

/// Normalize an entity surface form: case-fold, drop apostrophes, turn every
/// other run of non-alphanumerics into one space, drop a leading determiner.
///
/// `Coca-Cola` -> `coca cola`, `AT&T` -> `at t`, `McDonald's` -> `mcdonalds`.
/// Query n-grams go through the same function, so any separator a name is
/// written with matches any separator the query uses.
pub fn normalize_name(name: &str) -> String {
    let lowered = name.to_lowercase();
    let joined = APOSTROPHES.replace_all(&lowered, "");
    let spaced = NON_WORD.replace_all(&joined, " ");
    let collapsed = spaced.trim();

    match collapsed.split_once(' ') {
        Some((first, rest)) if DETERMINERS.contains(&first) => rest.to_string(),
        _ => collapsed.to_string(),
    }
}

/// `person` / ` Person ` / `per son` -> `PERSON` / `PERSON` / `PER_SON`
pub fn normalize_type(entity_type: &str) -> String {
    let cleaned = NON_WORD.replace_all(entity_type.trim(), "_");
    let cleaned = cleaned.trim_matches('_');
    if cleaned.is_empty() {
        UNKNOWN_TYPE.to_string()
    } else {
        cleaned.to_uppercase()
    }
}

/// `Works At` / `works-at` -> `works_at`
pub fn normalize_predicate(predicate: &str) -> String {
    let lowered = predicate.trim().to_lowercase();
    NON_WORD.replace_all(&lowered, "_").trim_matches('_').to_string()
}

/// Loose similarity between two normalized names.
///
/// Only used to suggest merges; exact-key resolution never consults it.
pub fn similar_names(a: &str, b: &str) -> bool {
    if a.is_empty() || b.is_empty() {
        return false;
    }
    if a == b {
        return true;
    }

    let words_a: Vec<&str> = a.split_whitespace().collect();
    let words_b: Vec<&str> = b.split_whitespace().collect();

    // One name is a whole-word prefix/suffix run of the other ("sarah" / "sarah jones")
    let (short, long) = if words_a.len() <= words_b.len() {
        (&words_a, &words_b)
    } else {
        (&words_b, &words_a)
    };
    if short.is_empty() {
        return false;
    }
    if long.windows(short.len()).any(|w| w == short.as_slice()) {
        return true;
    }

    // Multi-word names sharing most of their words
    if words_a.len() > 1 && words_b.len() > 1 {
        let common = words_a.iter().filter(|w| words_b.contains(w)).count();
        let total = words_a.len().max(words_b.len());
        return common as f64 / total as f64 > 0.7;
    }

    false
}
