//! N-source weighted Reciprocal Rank Fusion over chunk identities (§4.6).
//!
//! Generalizes the corpus's two-source RRF to an arbitrary number of
//! weighted ranked lists: lexical, graph-expansion, and (once wired up)
//! semantic similarity all fuse through the same function. Each ranked
//! entry is a chunk identity, not a node identity, so a chunk found by
//! more than one source is recognized as cross-confirmed.

use std::collections::HashMap;

/// One ranked source: `(chunk_id, score)` pairs, higher score ranked first,
/// the weight that source's rank contributes with, and the label attached
/// to any chunk this source is the sole contributor for.
pub struct FusionSource<'a> {
    pub label: &'static str,
    pub hits: &'a [(String, f32)],
    pub weight: f32,
}

/// One chunk's fused result: its id, fused score, and every source label
/// that contributed to it.
#[derive(Debug, Clone)]
pub struct FusedHit {
    pub id: String,
    pub score: f32,
    pub source_labels: Vec<&'static str>,
}

impl FusedHit {
    /// A chunk confirmed by two or more sources is labeled `"lexical"`
    /// regardless of which sources those were; a chunk found by exactly one
    /// source keeps that source's label (§4.6).
    pub fn label(&self) -> &'static str {
        if self.source_labels.len() >= 2 {
            "lexical"
        } else {
            self.source_labels.first().copied().unwrap_or("lexical")
        }
    }
}

/// Fuse ranked sources via weighted RRF and return the top `top_n` chunk
/// identities with their fused scores and contributing-source labels,
/// descending by score.
pub fn rrf_fuse(sources: &[FusionSource<'_>], rrf_k: f32, top_n: usize) -> Vec<FusedHit> {
    let mut fused: HashMap<String, (f32, Vec<&'static str>)> = HashMap::new();

    for source in sources {
        let mut ranked: Vec<&(String, f32)> = source.hits.iter().collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        for (rank, (chunk_id, _)) in ranked.into_iter().enumerate() {
            let contribution = source.weight / (rrf_k + (rank as f32 + 1.0));
            let entry = fused.entry(chunk_id.clone()).or_insert_with(|| (0.0, Vec::new()));
            entry.0 += contribution;
            entry.1.push(source.label);
        }
    }

    let mut out: Vec<FusedHit> =
        fused.into_iter().map(|(id, (score, source_labels))| FusedHit { id, score, source_labels }).collect();
    out.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
    out.truncate(top_n);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn top_ranked_in_every_source_wins() {
        let lexical = vec![("a".to_string(), 3.0), ("b".to_string(), 1.0)];
        let graph = vec![("a".to_string(), 0.9), ("c".to_string(), 0.1)];
        let fused = rrf_fuse(
            &[
                FusionSource { label: "lexical", hits: &lexical, weight: 0.5 },
                FusionSource { label: "graph", hits: &graph, weight: 0.5 },
            ],
            60.0,
            10,
        );
        assert_eq!(fused[0].id, "a");
    }

    #[test]
    fn a_chunk_present_in_only_one_source_still_appears() {
        let lexical = vec![("a".to_string(), 3.0)];
        let graph: Vec<(String, f32)> = vec![];
        let fused = rrf_fuse(
            &[
                FusionSource { label: "lexical", hits: &lexical, weight: 1.0 },
                FusionSource { label: "graph", hits: &graph, weight: 1.0 },
            ],
            60.0,
            10,
        );
        assert_eq!(fused.len(), 1);
        assert_eq!(fused[0].id, "a");
        assert_eq!(fused[0].label(), "lexical");
    }

    #[test]
    fn respects_top_n_truncation() {
        let lexical: Vec<(String, f32)> =
            (0..5).map(|i| (format!("n{i}"), 5.0 - i as f32)).collect();
        let fused = rrf_fuse(&[FusionSource { label: "lexical", hits: &lexical, weight: 1.0 }], 60.0, 2);
        assert_eq!(fused.len(), 2);
    }

    #[test]
    fn zero_weight_source_does_not_influence_order() {
        let lexical = vec![("a".to_string(), 1.0), ("b".to_string(), 2.0)];
        let noise = vec![("b".to_string(), 100.0), ("a".to_string(), 0.0)];
        let fused = rrf_fuse(
            &[
                FusionSource { label: "lexical", hits: &lexical, weight: 1.0 },
                FusionSource { label: "graph", hits: &noise, weight: 0.0 },
            ],
            60.0,
            10,
        );
        assert_eq!(fused[0].id, "b");
    }

    #[test]
    fn chunk_confirmed_by_two_sources_is_labeled_lexical() {
        let lexical = vec![("c1".to_string(), 1.0), ("c2".to_string(), 0.4)];
        let graph = vec![("c2".to_string(), 0.9)];
        let fused = rrf_fuse(
            &[
                FusionSource { label: "lexical", hits: &lexical, weight: 1.0 },
                FusionSource { label: "graph", hits: &graph, weight: 1.0 },
            ],
            60.0,
            10,
        );
        let c1 = fused.iter().find(|h| h.id == "c1").unwrap();
        let c2 = fused.iter().find(|h| h.id == "c2").unwrap();
        assert_eq!(c1.label(), "lexical");
        assert_eq!(c2.label(), "lexical");
        assert_eq!(c2.source_labels.len(), 2);
    }

    #[test]
    fn single_source_chunk_keeps_its_own_label() {
        let graph = vec![("g1".to_string(), 0.5)];
        let fused = rrf_fuse(&[FusionSource { label: "graph", hits: &graph, weight: 1.0 }], 60.0, 10);
        assert_eq!(fused[0].label(), "graph");
    }
}
