//! Related-notes ranker (C9): hybrid vector + keyword scoring with a
//! statistical cutoff instead of a fixed top-N, so a focus note with one
//! obviously-related neighbor doesn't drag in ten weak ones.

use std::collections::HashSet;

use crate::config::RankerConfig;
use crate::embeddings::cosine_similarity;
use crate::error::RetrievalResult;
use crate::models::Node;
use crate::storage::ZettelStore;

const STOPWORDS: &[&str] = &[
    "the", "and", "for", "are", "but", "not", "you", "all", "can", "had", "her", "was", "one",
    "our", "out", "day", "get", "has", "him", "his", "how", "man", "new", "now", "old", "see",
    "two", "way", "who", "boy", "did", "its", "let", "put", "say", "she", "too", "use", "with",
    "that", "this", "from", "they", "have", "been", "were", "what", "when", "where",
];

#[derive(Debug, Clone)]
pub struct RankedNote {
    pub node_id: String,
    pub title: String,
    pub hybrid_score: f32,
    pub reasons: Vec<String>,
}

pub struct Ranker<'s> {
    store: &'s ZettelStore,
    config: RankerConfig,
}

impl<'s> Ranker<'s> {
    pub fn new(store: &'s ZettelStore, config: RankerConfig) -> Self {
        Self { store, config }
    }

    /// Related notes for `focus_id`, excluding anything in `in_view` and the
    /// focus itself, via the 8-step hybrid-score-then-statistical-cutoff
    /// algorithm (§4.9).
    pub fn related_to(&self, focus_id: &str, in_view: &HashSet<String>) -> RetrievalResult<Vec<RankedNote>> {
        let Some(focus_embedding) = self.store.find_embedding(focus_id)? else {
            return Ok(Vec::new());
        };
        let Some(focus_node) = self.store.find_node_by_id(focus_id)? else {
            return Ok(Vec::new());
        };
        let focus_tokens = tokenize(&focus_node.title, self.config.min_token_len);

        let mut scored = Vec::new();
        for candidate in self.store.all_nodes()? {
            if candidate.id == focus_id || candidate.ghost || in_view.contains(&candidate.id) {
                continue;
            }
            let Some(candidate_embedding) = self.store.find_embedding(&candidate.id)? else { continue };

            let vec_score = cosine_similarity(&focus_embedding.vector, &candidate_embedding.vector);
            if vec_score < self.config.semantic_floor {
                continue;
            }

            let candidate_tokens = tokenize(&candidate.title, self.config.min_token_len);
            let shared: Vec<&String> = focus_tokens.intersection(&candidate_tokens).collect();
            let kw_score = if focus_tokens.is_empty() {
                0.0
            } else {
                (shared.len() as f32 / focus_tokens.len() as f32).min(1.0)
            };

            let hybrid = self.config.w_vec * vec_score + self.config.w_kw * kw_score;
            let reasons = reasons_for(vec_score, &shared);
            scored.push((candidate, hybrid, reasons));
        }

        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        let cut = statistical_cutoff(&scored, self.config.k_strong);
        scored.truncate(cut);
        scored.truncate(self.config.max_results);

        Ok(scored
            .into_iter()
            .map(|(node, score, reasons)| RankedNote { node_id: node.id, title: node.title, hybrid_score: score, reasons })
            .collect())
    }
}

fn reasons_for(vec_score: f32, shared: &[&String]) -> Vec<String> {
    let mut reasons = vec![format!("Semantic similarity: {:.0}%", vec_score * 100.0)];
    if !shared.is_empty() {
        let mut terms: Vec<&str> = shared.iter().map(|s| s.as_str()).collect();
        terms.sort_unstable();
        reasons.push(format!("Keyword match: {} term(s) ({})", terms.len(), terms.join(", ")));
    }
    reasons
}

/// Lowercase, strip everything but alphanumerics and hyphens, split on
/// whitespace, drop short tokens and stopwords.
fn tokenize(title: &str, min_len: usize) -> HashSet<String> {
    title
        .to_lowercase()
        .split_whitespace()
        .map(|word| word.chars().filter(|c| c.is_alphanumeric() || *c == '-').collect::<String>())
        .filter(|word| word.len() >= min_len && !STOPWORDS.contains(&word.as_str()))
        .collect()
}

/// Cut the sorted-descending list at the first "strong boundary": a gap
/// between consecutive scores exceeding `mean + k * stddev` of all gaps.
/// Keeps everything if no such boundary exists.
fn statistical_cutoff(scored: &[(Node, f32, Vec<String>)], k: f64) -> usize {
    if scored.len() < 2 {
        return scored.len();
    }
    let gaps: Vec<f64> = scored.windows(2).map(|w| (w[0].1 - w[1].1) as f64).collect();
    let mean = gaps.iter().sum::<f64>() / gaps.len() as f64;
    let variance = gaps.iter().map(|g| (g - mean).powi(2)).sum::<f64>() / gaps.len() as f64;
    let stddev = variance.sqrt();
    let threshold = mean + k * stddev;

    for (i, gap) in gaps.iter().enumerate() {
        if *gap > threshold {
            return i + 1;
        }
    }
    scored.len()
}
