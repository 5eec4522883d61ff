//! Lexical helpers shared by search relevance and the default
//! contradiction predicate.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;

/// Letters, digits and in-word apostrophes ("don't").
static WORD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[\p{L}\p{N}]+(?:'[\p{L}]+)?").expect("word pattern is a valid literal")
});

/// Lowercased words in order of appearance, short words included.
pub fn words(text: &str) -> Vec<String> {
    let normalized = text.to_lowercase().replace('\u{2019}', "'");
    WORD.find_iter(&normalized)
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Distinct lowercased tokens longer than two characters.
pub fn tokens(text: &str) -> BTreeSet<String> {
    words(text)
        .into_iter()
        .filter(|w| w.chars().count() > 2)
        .collect()
}

/// Jaccard similarity of two token sets; two empty sets are dissimilar.
pub fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / union as f64
}

/// Search relevance of `content` for `query`: token Jaccard weighted 0.8,
/// plus 0.2 when the whole query appears in the content. Clamped to
/// `[0, 1]`; an empty query or content is neutral (0.5).
pub fn relevance(query: &str, content: &str) -> f64 {
    let query = query.trim().to_lowercase();
    let content = content.to_lowercase();
    if query.is_empty() || content.trim().is_empty() {
        return 0.5;
    }
    let mut score = jaccard(&tokens(&query), &tokens(&content)) * 0.8;
    if content.contains(&query) {
        score += 0.2;
    }
    score.clamp(0.0, 1.0)
}

/// Whether `content` matches `query` at all: any shared token or a
/// substring hit. An empty query matches everything.
pub fn matches_query(query: &str, content: &str) -> bool {
    let query = query.trim().to_lowercase();
    if query.is_empty() {
        return true;
    }
    let content_lower = content.to_lowercase();
    if content_lower.contains(&query) {
        return true;
    }
    let content_tokens = tokens(&content_lower);
    tokens(&query).iter().any(|t| content_tokens.contains(t))
}
