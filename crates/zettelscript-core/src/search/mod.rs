//! Hybrid retrieval (C6): lexical search, graph expansion, and fusion into
//! one context blob with provenance, shaped on the corpus's multi-source
//! retrieval pipeline.

pub mod fusion;
pub mod keyword;

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};

use crate::config::RetrievalConfig;
use crate::error::RetrievalResult;
use crate::graph::GraphEngine;
use crate::models::NodeKind;
use crate::storage::ZettelStore;
use fusion::{rrf_fuse, FusionSource};
use keyword::sanitize_fts5_query;

/// Narrows the candidate set before seeds are drawn and before the fused
/// result is assembled (§4.6).
#[derive(Debug, Clone, Default)]
pub struct RetrievalFilters {
    pub kinds: Option<Vec<NodeKind>>,
    pub excluded_ids: HashSet<String>,
    pub updated_after: Option<DateTime<Utc>>,
    pub updated_before: Option<DateTime<Utc>>,
}

impl RetrievalFilters {
    fn admits(&self, node: &crate::models::Node) -> bool {
        if self.excluded_ids.contains(&node.id) {
            return false;
        }
        if let Some(kinds) = &self.kinds {
            if !kinds.contains(&node.kind) {
                return false;
            }
        }
        if let Some(after) = self.updated_after {
            if node.updated_at < after {
                return false;
            }
        }
        if let Some(before) = self.updated_before {
            if node.updated_at > before {
                return false;
            }
        }
        true
    }
}

/// One chunk's contribution to the fused result's provenance listing.
#[derive(Debug, Clone)]
pub struct ProvenanceEntry {
    pub node_id: String,
    pub chunk_id: String,
    pub path: String,
    pub score_share: f32,
    pub source_label: String,
}

/// The assembled answer to a retrieval query: concatenated note context plus
/// where each piece of it came from.
#[derive(Debug, Clone)]
pub struct ContextResult {
    pub context: String,
    pub provenance: Vec<ProvenanceEntry>,
}

const CONTEXT_SEPARATOR: &str = "\n\n---\n\n";

/// A chunk-level retrieval hit: the chunk's identity and text plus the node
/// it belongs to, carried through fusion so the fused result keeps chunk
/// granularity (§4.6).
#[derive(Debug, Clone)]
struct ChunkHit {
    chunk_id: String,
    node_id: String,
    text: String,
    score: f32,
}

pub struct Retriever<'s> {
    store: &'s ZettelStore,
    graph: GraphEngine<'s>,
    config: RetrievalConfig,
}

impl<'s> Retriever<'s> {
    pub fn new(store: &'s ZettelStore, config: RetrievalConfig) -> Self {
        Self { store, graph: GraphEngine::new(store), config }
    }

    /// Run the query end to end: sanitize, search, expand, fuse, assemble.
    /// Fusion operates over chunk identities, not node identities, so a
    /// chunk surfaced by more than one source is recognized as
    /// cross-confirmed (§4.6).
    pub fn retrieve(
        &self,
        query: &str,
        filters: &RetrievalFilters,
        semantic: Option<&[(String, f32)]>,
    ) -> RetrievalResult<ContextResult> {
        let lexical_chunks = self.lexical_search(query, filters)?;
        let lexical_node_scores = aggregate_max_per_node(&lexical_chunks);
        let seeds = extract_seeds(&lexical_node_scores, self.config.max_seeds);

        let expanded = self.graph.expand(&seeds, &self.config.expansion)?;
        let graph_node_hits = self.filter_graph_hits(expanded, filters)?;
        let graph_chunks = self.broadcast_to_chunks(&graph_node_hits)?;

        let semantic_chunks = match semantic {
            Some(hits) => {
                let filtered = self.apply_filters(hits.to_vec(), filters)?;
                self.broadcast_to_chunks(&filtered)?
            }
            None => Vec::new(),
        };

        let lexical_pairs: Vec<(String, f32)> =
            lexical_chunks.iter().map(|c| (c.chunk_id.clone(), c.score)).collect();
        let graph_pairs: Vec<(String, f32)> =
            graph_chunks.iter().map(|c| (c.chunk_id.clone(), c.score)).collect();
        let semantic_pairs: Vec<(String, f32)> =
            semantic_chunks.iter().map(|c| (c.chunk_id.clone(), c.score)).collect();

        let mut sources = vec![
            FusionSource { label: "lexical", hits: &lexical_pairs, weight: self.config.fusion.lexical_weight },
            FusionSource { label: "graph", hits: &graph_pairs, weight: self.config.fusion.graph_weight },
        ];
        if semantic.is_some() {
            sources.push(FusionSource {
                label: "semantic",
                hits: &semantic_pairs,
                weight: self.config.fusion.semantic_weight,
            });
        }

        let fused = rrf_fuse(&sources, self.config.fusion.rrf_k, self.config.fusion.top_n);

        let mut chunk_lookup: HashMap<String, ChunkHit> = HashMap::new();
        for chunk in lexical_chunks.into_iter().chain(graph_chunks).chain(semantic_chunks) {
            chunk_lookup.entry(chunk.chunk_id.clone()).or_insert(chunk);
        }

        self.assemble(fused, &chunk_lookup)
    }

    /// BM25 search at chunk granularity (§4.6): each FTS row is already one
    /// chunk, so scores are normalized against the batch's strongest hit
    /// without collapsing chunks belonging to the same node.
    fn lexical_search(&self, query: &str, filters: &RetrievalFilters) -> RetrievalResult<Vec<ChunkHit>> {
        let sanitized = sanitize_fts5_query(query);
        let hits = self.store.fts_search(&sanitized, self.config.lexical_top_m)?;

        // bm25() is smaller-is-better; flip sign so larger is better.
        let max_goodness = hits.iter().map(|h| -h.score).fold(0.0_f32, f32::max);
        let chunk_hits: Vec<ChunkHit> = hits
            .into_iter()
            .map(|hit| {
                let goodness = -hit.score;
                let score = if max_goodness <= 0.0 { 0.5 } else { goodness / max_goodness };
                ChunkHit { chunk_id: hit.chunk_id, node_id: hit.node_id, text: hit.text, score }
            })
            .collect();

        self.filter_chunk_hits(chunk_hits, filters)
    }

    fn filter_graph_hits(
        &self,
        expanded: HashMap<String, f32>,
        filters: &RetrievalFilters,
    ) -> RetrievalResult<Vec<(String, f32)>> {
        self.apply_filters(expanded.into_iter().collect(), filters)
    }

    fn apply_filters(
        &self,
        hits: Vec<(String, f32)>,
        filters: &RetrievalFilters,
    ) -> RetrievalResult<Vec<(String, f32)>> {
        let mut kept = Vec::with_capacity(hits.len());
        for (node_id, score) in hits {
            match self.store.find_node_by_id(&node_id)? {
                Some(node) if filters.admits(&node) => kept.push((node_id, score)),
                _ => {}
            }
        }
        Ok(kept)
    }

    /// Drop chunk hits whose owning node is excluded by `filters`, caching
    /// the node lookup per node id since several chunks usually share one.
    fn filter_chunk_hits(&self, hits: Vec<ChunkHit>, filters: &RetrievalFilters) -> RetrievalResult<Vec<ChunkHit>> {
        let mut admitted_cache: HashMap<String, bool> = HashMap::new();
        let mut kept = Vec::with_capacity(hits.len());
        for hit in hits {
            let admitted = match admitted_cache.get(&hit.node_id) {
                Some(v) => *v,
                None => {
                    let admitted = match self.store.find_node_by_id(&hit.node_id)? {
                        Some(node) => filters.admits(&node),
                        None => false,
                    };
                    admitted_cache.insert(hit.node_id.clone(), admitted);
                    admitted
                }
            };
            if admitted {
                kept.push(hit);
            }
        }
        Ok(kept)
    }

    /// Graph expansion and semantic similarity are node-level signals; spread
    /// a node's score across every one of its chunks so they can fuse
    /// alongside chunk-level lexical hits.
    fn broadcast_to_chunks(&self, node_hits: &[(String, f32)]) -> RetrievalResult<Vec<ChunkHit>> {
        let mut out = Vec::new();
        for (node_id, score) in node_hits {
            for chunk in self.store.chunks_for_node(node_id)? {
                out.push(ChunkHit { chunk_id: chunk.id, node_id: node_id.clone(), text: chunk.text, score: *score });
            }
        }
        Ok(out)
    }

    fn assemble(
        &self,
        fused: Vec<fusion::FusedHit>,
        chunk_lookup: &HashMap<String, ChunkHit>,
    ) -> RetrievalResult<ContextResult> {
        let total_score: f32 = fused.iter().map(|h| h.score).sum();

        let mut node_order: Vec<String> = Vec::new();
        let mut seen_nodes: HashSet<String> = HashSet::new();
        let mut provenance = Vec::with_capacity(fused.len());

        for hit in &fused {
            let Some(chunk) = chunk_lookup.get(&hit.id) else { continue };
            if seen_nodes.insert(chunk.node_id.clone()) {
                node_order.push(chunk.node_id.clone());
            }
            let score_share = if total_score > 0.0 { hit.score / total_score } else { 0.0 };
            provenance.push(ProvenanceEntry {
                node_id: chunk.node_id.clone(),
                chunk_id: hit.id.clone(),
                path: String::new(),
                score_share,
                source_label: hit.label().to_string(),
            });
        }

        let mut blocks = Vec::with_capacity(node_order.len());
        let mut node_paths: HashMap<String, String> = HashMap::new();
        for node_id in &node_order {
            let Some(node) = self.store.find_node_by_id(node_id)? else { continue };
            let chunks = self.store.chunks_for_node(node_id)?;
            let body = chunks.iter().map(|c| c.text.as_str()).collect::<Vec<_>>().join("\n\n");
            blocks.push(format!("## {}\n\n{}", node.title, body));
            node_paths.insert(node_id.clone(), node.path);
        }

        for entry in &mut provenance {
            if let Some(path) = node_paths.get(&entry.node_id) {
                entry.path = path.clone();
            }
        }

        provenance.sort_by(|a, b| b.score_share.total_cmp(&a.score_share));

        Ok(ContextResult { context: blocks.join(CONTEXT_SEPARATOR), provenance })
    }
}

/// Collapse chunk-level hits to one best score per node, for seeding graph
/// expansion (which operates on node adjacency, not chunk adjacency).
fn aggregate_max_per_node(chunks: &[ChunkHit]) -> Vec<(String, f32)> {
    let mut best: HashMap<String, f32> = HashMap::new();
    for chunk in chunks {
        let entry = best.entry(chunk.node_id.clone()).or_insert(chunk.score);
        if chunk.score > *entry {
            *entry = chunk.score;
        }
    }
    best.into_iter().collect()
}

/// Top `max_seeds` node ids by score, used to seed graph expansion.
fn extract_seeds(node_scores: &[(String, f32)], max_seeds: usize) -> Vec<String> {
    let mut ranked: Vec<&(String, f32)> = node_scores.iter().collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
    ranked.into_iter().take(max_seeds).map(|(id, _)| id.clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexer::{FileInfo, Indexer};

    fn seed_notes(store: &ZettelStore) {
        let indexer = Indexer::new(store);
        indexer
            .index_file(&FileInfo {
                path: "alpha.md".to_string(),
                bytes: b"---\ntitle: Alpha Station\n---\nThe alpha station orbits a dim star.".to_vec(),
            })
            .unwrap();
        indexer
            .index_file(&FileInfo {
                path: "beta.md".to_string(),
                bytes: b"---\ntitle: Beta Outpost\n---\nAn unrelated outpost log entry.".to_vec(),
            })
            .unwrap();
    }

    #[test]
    fn lexical_search_ranks_matching_note_first() {
        let (store, _dir) = ZettelStore::open_temp();
        seed_notes(&store);
        let retriever = Retriever::new(&store, RetrievalConfig::default());
        let hits = retriever.lexical_search("alpha station", &RetrievalFilters::default()).unwrap();
        assert!(!hits.is_empty());
        let top = hits.iter().max_by(|a, b| a.score.total_cmp(&b.score)).unwrap();
        let node = store.find_node_by_id(&top.node_id).unwrap().unwrap();
        assert_eq!(node.title, "Alpha Station");
    }

    #[test]
    fn excluded_id_is_filtered_out_of_lexical_results() {
        let (store, _dir) = ZettelStore::open_temp();
        seed_notes(&store);
        let retriever = Retriever::new(&store, RetrievalConfig::default());
        let unfiltered = retriever.lexical_search("outpost", &RetrievalFilters::default()).unwrap();
        let target = unfiltered[0].node_id.clone();
        let mut filters = RetrievalFilters::default();
        filters.excluded_ids.insert(target.clone());
        let filtered = retriever.lexical_search("outpost", &filters).unwrap();
        assert!(!filtered.iter().any(|hit| hit.node_id == target));
    }

    #[test]
    fn retrieve_assembles_context_and_provenance() {
        let (store, _dir) = ZettelStore::open_temp();
        seed_notes(&store);
        let retriever = Retriever::new(&store, RetrievalConfig::default());
        let result = retriever.retrieve("alpha station", &RetrievalFilters::default(), None).unwrap();
        assert!(result.context.contains("Alpha Station"));
        assert!(!result.provenance.is_empty());
        let share_sum: f32 = result.provenance.iter().map(|p| p.score_share).sum();
        assert!((share_sum - 1.0).abs() < 0.01 || result.provenance.len() == 1);
        assert!(result.provenance.iter().all(|p| !p.chunk_id.is_empty()));
    }

    #[test]
    fn kind_filter_excludes_non_matching_nodes() {
        let (store, _dir) = ZettelStore::open_temp();
        seed_notes(&store);
        let retriever = Retriever::new(&store, RetrievalConfig::default());
        let mut filters = RetrievalFilters::default();
        filters.kinds = Some(vec![NodeKind::Character]);
        let hits = retriever.lexical_search("alpha station", &filters).unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn retrieve_labels_every_provenance_entry_with_a_known_source() {
        let (store, _dir) = ZettelStore::open_temp();
        seed_notes(&store);
        let retriever = Retriever::new(&store, RetrievalConfig::default());
        let result = retriever.retrieve("alpha station", &RetrievalFilters::default(), None).unwrap();
        assert!(result
            .provenance
            .iter()
            .all(|p| ["lexical", "graph", "semantic"].contains(&p.source_label.as_str())));
    }
}
