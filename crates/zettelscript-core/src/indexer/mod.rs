//! Single-file and batch indexing orchestration (C4): parse -> upsert ->
//! alias replacement -> version/chunk write -> link resolution.
//!
//! Batch indexing is two-pass (§4.4, §9): pass one upserts every node and its
//! aliases so title/alias lookups are complete, then the resolver cache is
//! cleared and pass two writes versions, chunks, and link edges against that
//! now-complete node set. A single `index_file` call runs all five steps for
//! one file without the cross-file guarantee the batch gives.

use std::collections::HashMap;

use sha2::{Digest, Sha256};

use crate::error::StoreResult;
use crate::models::{Edge, EdgeKind, Node, NodeKind, Provenance};
use crate::parser::{self, ParsedNote};
use crate::resolver::{ResolutionOutcome, Resolver};
use crate::storage::ZettelStore;

/// Raw input to indexing: a vault-relative path and its current bytes.
#[derive(Debug, Clone)]
pub struct FileInfo {
    pub path: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct UnresolvedLink {
    pub source_id: String,
    pub source_path: String,
    pub target_text: String,
    pub display_text: String,
    pub span: (usize, usize),
}

#[derive(Debug, Clone)]
pub struct AmbiguousLink {
    pub source_id: String,
    pub source_path: String,
    pub target_text: String,
    pub candidates: Vec<String>,
}

/// Result of indexing one file.
#[derive(Debug, Clone)]
pub struct IndexedFile {
    pub node: Node,
    pub edges_created: Vec<Edge>,
    pub unresolved: Vec<UnresolvedLink>,
    pub ambiguous: Vec<AmbiguousLink>,
    pub reindexed_content: bool,
}

#[derive(Debug, Clone)]
pub struct BatchIndexResult {
    pub indexed: Vec<IndexedFile>,
    pub failures: Vec<(String, String)>,
    pub unresolved: Vec<UnresolvedLink>,
    pub ambiguous: Vec<AmbiguousLink>,
}

pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hasher.finalize().iter().map(|b| format!("{b:02x}")).collect()
}

/// `{displayText, position}` edge attributes for a resolved reference (§4.4 step 5).
fn reference_attributes(display_text: &str, span: (usize, usize)) -> HashMap<String, serde_json::Value> {
    let mut attrs = HashMap::new();
    attrs.insert("displayText".to_string(), serde_json::Value::String(display_text.to_string()));
    attrs.insert("position".to_string(), serde_json::json!({ "start": span.0, "end": span.1 }));
    attrs
}

pub struct Indexer<'s> {
    store: &'s ZettelStore,
}

impl<'s> Indexer<'s> {
    pub fn new(store: &'s ZettelStore) -> Self {
        Self { store }
    }

    /// True if `hash` differs from the node currently on record at `path`
    /// (or there is no node yet).
    pub fn needs_reindex(&self, path: &str, hash: &str) -> StoreResult<bool> {
        match self.store.find_node_by_path(path)? {
            Some(node) => Ok(node.content_hash.as_deref() != Some(hash)),
            None => Ok(true),
        }
    }

    /// Run all five steps for one file in isolation (no cross-file resolution guarantee).
    pub fn index_file(&self, info: &FileInfo) -> Result<IndexedFile, IndexFileError> {
        let parsed = parser::parse_note(&info.path, &info.bytes)
            .map_err(|e| IndexFileError { path: info.path.clone(), reason: e.to_string() })?;
        let hash = content_hash(&info.bytes);
        let reindexed_content = self.needs_reindex(&info.path, &hash).map_err(|e| IndexFileError {
            path: info.path.clone(),
            reason: e.to_string(),
        })?;

        let resolver = Resolver::new(self.store);
        let node = self
            .store
            .transaction(|conn| self.upsert_and_alias(conn, &info.path, &parsed, &hash))
            .map_err(|e| IndexFileError { path: info.path.clone(), reason: e.to_string() })?;

        if reindexed_content {
            self.store
                .transaction(|conn| self.write_version_and_chunks(conn, &node, &parsed, &hash))
                .map_err(|e| IndexFileError { path: info.path.clone(), reason: e.to_string() })?;
        }

        let (edges_created, unresolved, ambiguous) = self
            .store
            .transaction(|conn| self.resolve_and_write_links(conn, &node, &parsed, &resolver))
            .map_err(|e| IndexFileError { path: info.path.clone(), reason: e.to_string() })?;

        Ok(IndexedFile { node, edges_created, unresolved, ambiguous, reindexed_content })
    }

    /// Two-pass batch index over every file; a per-file failure is captured and
    /// the batch continues (§4.4, §7).
    pub fn index_batch(&self, files: &[FileInfo]) -> BatchIndexResult {
        let mut failures = Vec::new();
        let mut parsed_pass = Vec::with_capacity(files.len());

        for info in files {
            match parser::parse_note(&info.path, &info.bytes) {
                Ok(parsed) => {
                    let hash = content_hash(&info.bytes);
                    // Must be computed before the upsert below overwrites the
                    // node's stored content_hash with this file's current hash.
                    let reindexed_content = match self.needs_reindex(&info.path, &hash) {
                        Ok(v) => v,
                        Err(e) => {
                            failures.push((info.path.clone(), e.to_string()));
                            continue;
                        }
                    };
                    let outcome = self.store.transaction(|conn| self.upsert_and_alias(conn, &info.path, &parsed, &hash));
                    match outcome {
                        Ok(node) => parsed_pass.push((info.clone(), parsed, hash, reindexed_content, node)),
                        Err(e) => {
                            tracing::warn!(path = %info.path, error = %e, "failed to upsert node");
                            failures.push((info.path.clone(), e.to_string()));
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(path = %info.path, error = %e, "failed to parse note");
                    failures.push((info.path.clone(), e.to_string()));
                }
            }
        }

        let resolver = Resolver::new(self.store);
        resolver.clear_cache();

        let mut indexed = Vec::with_capacity(parsed_pass.len());
        let mut unresolved_all = Vec::new();
        let mut ambiguous_all = Vec::new();

        for (info, parsed, hash, reindexed_content, node) in parsed_pass {
            if reindexed_content {
                if let Err(e) = self.store.transaction(|conn| self.write_version_and_chunks(conn, &node, &parsed, &hash)) {
                    tracing::warn!(path = %info.path, error = %e, "failed to write version/chunks");
                    failures.push((info.path.clone(), e.to_string()));
                    continue;
                }
            }

            match self.store.transaction(|conn| self.resolve_and_write_links(conn, &node, &parsed, &resolver)) {
                Ok((edges_created, unresolved, ambiguous)) => {
                    unresolved_all.extend(unresolved.iter().cloned());
                    ambiguous_all.extend(ambiguous.iter().cloned());
                    indexed.push(IndexedFile { node, edges_created, unresolved, ambiguous, reindexed_content });
                }
                Err(e) => {
                    tracing::warn!(path = %info.path, error = %e, "failed to resolve links");
                    failures.push((info.path.clone(), e.to_string()));
                }
            }
        }

        tracing::info!(indexed = indexed.len(), failures = failures.len(), "batch index complete");

        BatchIndexResult { indexed, failures, unresolved: unresolved_all, ambiguous: ambiguous_all }
    }

    /// Cascading removal of a file's node (§4.4 step, triggered by a delete event).
    pub fn remove_file(&self, path: &str) -> StoreResult<()> {
        self.store.transaction(|conn| {
            if let Some(node) = self.store.find_node_by_path(path)? {
                self.store.delete_node(conn, &node.id)?;
                tracing::info!(path, node_id = %node.id, "removed node for deleted file");
            }
            Ok(())
        })
    }

    /// Synthesize ghost nodes for unresolved textual references; never invoked
    /// implicitly by indexing itself (§9 resolved open question) — the caller
    /// decides when (e.g. end of a full batch) to promote unresolved links.
    pub fn synthesize_ghosts(&self, unresolved: &[UnresolvedLink]) -> StoreResult<Vec<Node>> {
        let mut ghosts = Vec::with_capacity(unresolved.len());
        for link in unresolved {
            let ghost = self
                .store
                .transaction(|conn| self.store.get_or_create_ghost_by_title(conn, &link.target_text, NodeKind::Note))?;
            self.store.transaction(|conn| {
                self.store.upsert_edge(
                    conn,
                    &link.source_id,
                    &ghost.id,
                    EdgeKind::ExplicitLink,
                    None,
                    Provenance::Explicit,
                    &reference_attributes(&link.display_text, link.span),
                )
            })?;
            ghosts.push(ghost);
        }
        Ok(ghosts)
    }

    fn upsert_and_alias(
        &self,
        conn: &rusqlite::Connection,
        path: &str,
        parsed: &ParsedNote,
        hash: &str,
    ) -> StoreResult<Node> {
        let node =
            self.store.upsert_node_by_path(conn, path, parsed.kind, &parsed.title, Some(hash), &parsed.metadata)?;
        self.store.replace_aliases(conn, &node.id, &parsed.aliases)?;
        Ok(node)
    }

    fn write_version_and_chunks(
        &self,
        conn: &rusqlite::Connection,
        node: &Node,
        parsed: &ParsedNote,
        hash: &str,
    ) -> StoreResult<()> {
        let parent = self.store.latest_version(conn, &node.id)?.map(|v| v.id);
        let version = self.store.add_version(conn, &node.id, hash, parent.as_deref(), None)?;

        let spans: Vec<(String, i64, i64)> = parsed
            .paragraphs
            .iter()
            .map(|p| {
                let text = parsed.body[(p.start - parsed.body_offset)..(p.end - parsed.body_offset)].to_string();
                (text, p.start as i64, p.end as i64)
            })
            .collect();
        self.store.insert_chunks(conn, &node.id, &version.id, &spans)?;
        Ok(())
    }

    fn resolve_and_write_links(
        &self,
        conn: &rusqlite::Connection,
        node: &Node,
        parsed: &ParsedNote,
        resolver: &Resolver<'_, ZettelStore>,
    ) -> StoreResult<(Vec<Edge>, Vec<UnresolvedLink>, Vec<AmbiguousLink>)> {
        self.store.delete_edges_by_source_and_kind(conn, &node.id, EdgeKind::ExplicitLink)?;

        let mut edges = Vec::new();
        let mut unresolved = Vec::new();
        let mut ambiguous = Vec::new();

        for reference in &parsed.references {
            match resolver.resolve(reference)? {
                ResolutionOutcome::Resolved(target_id) => {
                    let edge = self.store.upsert_edge(
                        conn,
                        &node.id,
                        &target_id,
                        EdgeKind::ExplicitLink,
                        None,
                        Provenance::Explicit,
                        &reference_attributes(&reference.display, reference.span),
                    )?;
                    edges.push(edge);
                }
                ResolutionOutcome::Unresolved { target } => {
                    unresolved.push(UnresolvedLink {
                        source_id: node.id.clone(),
                        source_path: node.path.clone(),
                        target_text: target,
                        display_text: reference.display.clone(),
                        span: reference.span,
                    });
                }
                ResolutionOutcome::Ambiguous { target, candidates } => {
                    ambiguous.push(AmbiguousLink {
                        source_id: node.id.clone(),
                        source_path: node.path.clone(),
                        target_text: target,
                        candidates,
                    });
                }
            }
        }

        Ok((edges, unresolved, ambiguous))
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("indexing {path} failed: {reason}")]
pub struct IndexFileError {
    pub path: String,
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NodeKind;

    fn file(path: &str, text: &str) -> FileInfo {
        FileInfo { path: path.to_string(), bytes: text.as_bytes().to_vec() }
    }

    #[test]
    fn single_file_index_creates_node_and_version() {
        let (store, _dir) = ZettelStore::open_temp();
        let indexer = Indexer::new(&store);
        let result = indexer.index_file(&file("a.md", "# Alpha\n\nSome body text.")).unwrap();
        assert_eq!(result.node.title, "Alpha");
        assert_eq!(result.node.kind, NodeKind::Note);
        assert!(result.reindexed_content);
        let version = store.transaction(|conn| store.latest_version(conn, &result.node.id)).unwrap();
        assert!(version.is_some());
    }

    #[test]
    fn reindexing_unchanged_content_skips_new_version() {
        let (store, _dir) = ZettelStore::open_temp();
        let indexer = Indexer::new(&store);
        let f = file("a.md", "# Alpha\n\nbody");
        let first = indexer.index_file(&f).unwrap();
        let second = indexer.index_file(&f).unwrap();
        assert!(first.reindexed_content);
        assert!(!second.reindexed_content);
    }

    #[test]
    fn batch_index_resolves_cross_file_links() {
        let (store, _dir) = ZettelStore::open_temp();
        let indexer = Indexer::new(&store);
        let files = vec![file("a.md", "# Alpha\n\nSee [[Beta]]."), file("b.md", "# Beta\n\nback to nothing")];
        let result = indexer.index_batch(&files);
        assert!(result.failures.is_empty());
        assert_eq!(result.indexed.len(), 2);
        let alpha = result.indexed.iter().find(|f| f.node.title == "Alpha").unwrap();
        assert_eq!(alpha.edges_created.len(), 1);
        assert!(result.unresolved.is_empty());
    }

    #[test]
    fn batch_index_reports_unresolved_links() {
        let (store, _dir) = ZettelStore::open_temp();
        let indexer = Indexer::new(&store);
        let files = vec![file("a.md", "# Alpha\n\nSee [[Nobody Here]].")];
        let result = indexer.index_batch(&files);
        assert_eq!(result.unresolved.len(), 1);
        assert_eq!(result.unresolved[0].target_text, "Nobody Here");
    }

    #[test]
    fn synthesize_ghosts_creates_node_and_edge() {
        let (store, _dir) = ZettelStore::open_temp();
        let indexer = Indexer::new(&store);
        let files = vec![file("a.md", "# Alpha\n\nSee [[Ghosty]].")];
        let result = indexer.index_batch(&files);
        let ghosts = indexer.synthesize_ghosts(&result.unresolved).unwrap();
        assert_eq!(ghosts.len(), 1);
        assert!(ghosts[0].ghost);
        let edges = store.edges_by_source(&result.indexed[0].node.id, Some(EdgeKind::ExplicitLink)).unwrap();
        assert_eq!(edges.len(), 1);
    }

    #[test]
    fn remove_file_cascades_delete() {
        let (store, _dir) = ZettelStore::open_temp();
        let indexer = Indexer::new(&store);
        let result = indexer.index_file(&file("a.md", "# Alpha\n\nbody")).unwrap();
        indexer.remove_file("a.md").unwrap();
        assert!(store.find_node_by_id(&result.node.id).unwrap().is_none());
    }

    #[test]
    fn parse_failure_is_captured_without_stopping_batch() {
        let (store, _dir) = ZettelStore::open_temp();
        let indexer = Indexer::new(&store);
        let files = vec![file("bad.md", "---\ntitle: [unterminated\n---\nbody"), file("good.md", "# Good\n\nbody")];
        let result = indexer.index_batch(&files);
        assert_eq!(result.failures.len(), 1);
        assert_eq!(result.indexed.len(), 1);
    }
}
