//! Explicit configuration records for every engine.
//!
//! Per the "ambient state -> explicit configuration" design note: tunables
//! named in the fusion/ranker/breaker sections live on `Default`-implementing
//! structs passed at construction, mirroring the corpus's `HybridSearchConfig`
//! (`search/hybrid.rs`) rather than scattered free constants.

use crate::models::EdgeKind;

/// Bounded-expansion parameters (§4.5.1).
#[derive(Debug, Clone)]
pub struct ExpansionConfig {
    pub max_depth: u32,
    pub budget: usize,
    pub allowed_kinds: Vec<EdgeKind>,
    pub decay: f32,
    pub bidirectional: bool,
}

impl Default for ExpansionConfig {
    fn default() -> Self {
        Self {
            max_depth: 3,
            budget: 50,
            allowed_kinds: vec![EdgeKind::ExplicitLink, EdgeKind::Sequence, EdgeKind::Hierarchy],
            decay: 0.7,
            bidirectional: true,
        }
    }
}

/// K-shortest diverse paths parameters (§4.5.3).
#[derive(Debug, Clone)]
pub struct KShortestConfig {
    pub k: usize,
    pub allowed_kinds: Vec<EdgeKind>,
    pub max_depth: u32,
    pub overlap_threshold: f32,
    pub max_candidates: usize,
    pub max_extra_hops: u32,
}

impl Default for KShortestConfig {
    fn default() -> Self {
        Self {
            k: 3,
            allowed_kinds: vec![
                EdgeKind::ExplicitLink,
                EdgeKind::Sequence,
                EdgeKind::Causes,
                EdgeKind::Semantic,
                EdgeKind::SemanticSuggestion,
            ],
            max_depth: 6,
            overlap_threshold: 0.7,
            max_candidates: 64,
            max_extra_hops: 4,
        }
    }
}

/// Edge-kind penalty used as the tie-break component of K-shortest-path scoring.
pub fn edge_penalty(kind: EdgeKind) -> f32 {
    match kind {
        EdgeKind::ExplicitLink => 0.0,
        EdgeKind::Sequence => 0.1,
        EdgeKind::Causes => 0.2,
        EdgeKind::Semantic => 0.3,
        EdgeKind::SemanticSuggestion => 0.5,
        _ => 0.3,
    }
}

/// Fusion parameters for retrieval RRF (§6.5).
#[derive(Debug, Clone)]
pub struct FusionConfig {
    pub rrf_k: f32,
    pub lexical_weight: f32,
    pub graph_weight: f32,
    pub semantic_weight: f32,
    pub top_n: usize,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            rrf_k: 60.0,
            lexical_weight: 0.3,
            graph_weight: 0.2,
            semantic_weight: 0.5,
            top_n: 20,
        }
    }
}

/// Retrieval-level config (seed extraction, lexical fan-out).
#[derive(Debug, Clone)]
pub struct RetrievalConfig {
    pub lexical_top_m: usize,
    pub max_seeds: usize,
    pub expansion: ExpansionConfig,
    pub fusion: FusionConfig,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            lexical_top_m: 50,
            max_seeds: 10,
            expansion: ExpansionConfig {
                allowed_kinds: vec![EdgeKind::ExplicitLink, EdgeKind::Sequence, EdgeKind::Hierarchy],
                decay: 0.7,
                bidirectional: true,
                ..ExpansionConfig::default()
            },
            fusion: FusionConfig::default(),
        }
    }
}

/// Hybrid related-notes ranker config (§4.9).
#[derive(Debug, Clone)]
pub struct RankerConfig {
    pub w_vec: f32,
    pub w_kw: f32,
    pub semantic_floor: f32,
    pub k_strong: f64,
    pub max_results: usize,
    pub min_token_len: usize,
}

impl Default for RankerConfig {
    fn default() -> Self {
        Self {
            w_vec: 0.85,
            w_kw: 0.15,
            semantic_floor: 0.35,
            k_strong: 1.0,
            max_results: 15,
            min_token_len: 3,
        }
    }
}

/// Circuit breaker config (§4.8).
#[derive(Debug, Clone, Copy)]
pub struct BreakerConfig {
    pub max_failures: u32,
    pub cooldown_ms: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self { max_failures: 3, cooldown_ms: 600_000 }
    }
}

/// Suggestion engine caller policy (§9 open questions, resolved).
#[derive(Debug, Clone, Copy)]
pub struct SuggestionConfig {
    /// Grace window before a suggestion not seen in a recompute is eligible for pruning.
    pub stale_after: chrono::Duration,
}

impl Default for SuggestionConfig {
    fn default() -> Self {
        Self { stale_after: chrono::Duration::days(30) }
    }
}

/// Embedding health thresholds (§6.5).
#[derive(Debug, Clone, Copy)]
pub struct EmbeddingHealthConfig {
    pub ok_ratio: f64,
    pub warn_ratio: f64,
}

impl Default for EmbeddingHealthConfig {
    fn default() -> Self {
        Self { ok_ratio: 0.95, warn_ratio: 0.60 }
    }
}
