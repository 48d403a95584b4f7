//! Durable store (C1): transactional persistence, schema migration, FTS.
//!
//! Shaped on the corpus's `Storage`: separate `writer`/`reader`
//! `Mutex<Connection>` pointed at the same on-disk file, both configured
//! with the same PRAGMAs, so `ZettelStore` is `Send + Sync` and shareable
//! via `Arc` without wrapping the whole thing in one lock for reads.

pub mod migrations;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use directories::ProjectDirs;
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{StoreError, StoreResult};
use crate::models::*;

/// A lexical hit from the FTS side-car (§4.1's query surface for C6).
#[derive(Debug, Clone)]
pub struct FtsHit {
    pub chunk_id: String,
    pub node_id: String,
    pub text: String,
    pub score: f32,
}

pub struct ZettelStore {
    writer: Mutex<Connection>,
    reader: Mutex<Connection>,
}

impl ZettelStore {
    fn configure_connection(conn: &Connection) -> StoreResult<()> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;
             PRAGMA temp_store = MEMORY;",
        )?;
        Ok(())
    }

    /// Open (creating if absent) the store at `<vault>/.zettelscript/zettelscript.db`,
    /// or an explicit path (§6.2).
    pub fn open(vault_root: &Path) -> StoreResult<Self> {
        let dir = vault_root.join(".zettelscript");
        std::fs::create_dir_all(&dir)?;
        Self::open_at(&dir.join("zettelscript.db"))
    }

    /// Open the store at an arbitrary path; used directly by callers that manage
    /// their own layout, and by tests.
    pub fn open_at(path: &Path) -> StoreResult<Self> {
        let writer_conn = Connection::open(path)?;
        Self::configure_connection(&writer_conn)?;
        migrations::apply_migrations(&writer_conn)?;

        let reader_conn = Connection::open(path)?;
        Self::configure_connection(&reader_conn)?;

        Ok(Self { writer: Mutex::new(writer_conn), reader: Mutex::new(reader_conn) })
    }

    /// Platform-default vault-less location, mirroring the corpus's `directories`-based
    /// fallback for callers that don't have a vault root handy (e.g. tests).
    pub fn open_default() -> StoreResult<Self> {
        let proj_dirs = ProjectDirs::from("dev", "zettelscript", "zettelscript")
            .ok_or_else(|| StoreError::Init("could not determine project directories".into()))?;
        let data_dir = proj_dirs.data_dir();
        std::fs::create_dir_all(data_dir)?;
        Self::open_at(&data_dir.join("zettelscript.db"))
    }

    #[cfg(test)]
    pub fn open_temp() -> (Self, tempfile::TempDir) {
        let dir = tempfile::TempDir::new().expect("create temp dir");
        let store = Self::open_at(&dir.path().join("zettelscript.db")).expect("open store");
        (store, dir)
    }

    /// Run `f` against the writer connection inside a single transaction.
    pub fn transaction<T>(&self, f: impl FnOnce(&Connection) -> StoreResult<T>) -> StoreResult<T> {
        let conn = self.writer.lock().map_err(|_| StoreError::Init("writer lock poisoned".into()))?;
        conn.execute_batch("BEGIN IMMEDIATE")?;
        match f(&conn) {
            Ok(value) => {
                conn.execute_batch("COMMIT")?;
                Ok(value)
            }
            Err(e) => {
                let _ = conn.execute_batch("ROLLBACK");
                Err(e)
            }
        }
    }

    fn with_reader<T>(&self, f: impl FnOnce(&Connection) -> StoreResult<T>) -> StoreResult<T> {
        let conn = self.reader.lock().map_err(|_| StoreError::Init("reader lock poisoned".into()))?;
        f(&conn)
    }

    // ========================================================================
    // NODES
    // ========================================================================

    /// Create if absent, else update in place (preserving `createdAt`), keyed by `path` (§4.4 step 2).
    pub fn upsert_node_by_path(
        &self,
        conn: &Connection,
        path: &str,
        kind: NodeKind,
        title: &str,
        content_hash: Option<&str>,
        metadata: &HashMap<String, serde_json::Value>,
    ) -> StoreResult<Node> {
        let existing = find_node_by_path(conn, path)?;
        let now = Utc::now();
        let metadata_json = serde_json::to_string(metadata).unwrap_or_else(|_| "{}".into());

        match existing {
            Some(mut node) => {
                conn.execute(
                    "UPDATE nodes SET kind = ?1, title = ?2, updated_at = ?3, content_hash = ?4, metadata = ?5 WHERE id = ?6",
                    params![kind.as_str(), title, now.to_rfc3339(), content_hash, metadata_json, &node.id],
                )?;
                node.kind = kind;
                node.title = title.to_string();
                node.updated_at = now;
                node.content_hash = content_hash.map(str::to_string);
                node.metadata = metadata.clone();
                Ok(node)
            }
            None => {
                let id = uuid::Uuid::new_v4().to_string();
                conn.execute(
                    "INSERT INTO nodes (id, kind, title, path, created_at, updated_at, content_hash, metadata, ghost)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?5, ?6, ?7, 0)",
                    params![&id, kind.as_str(), title, path, now.to_rfc3339(), content_hash, metadata_json],
                )?;
                Ok(Node {
                    id,
                    kind,
                    title: title.to_string(),
                    path: path.to_string(),
                    created_at: now,
                    updated_at: now,
                    content_hash: content_hash.map(str::to_string),
                    metadata: metadata.clone(),
                    ghost: false,
                })
            }
        }
    }

    /// Idempotent under case-insensitive title: returns the existing ghost or creates one (§4.3).
    pub fn get_or_create_ghost_by_title(&self, conn: &Connection, title: &str, kind: NodeKind) -> StoreResult<Node> {
        let normalized = normalize_text(title);
        let path = Node::ghost_path(title);
        if let Some(existing) = find_nodes_by_title_or_alias(conn, &normalized)?
            .into_iter()
            .find(|n| n.ghost)
        {
            return Ok(existing);
        }
        let now = Utc::now();
        let id = uuid::Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO nodes (id, kind, title, path, created_at, updated_at, content_hash, metadata, ghost)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5, NULL, '{}', 1)",
            params![&id, kind.as_str(), title, &path, now.to_rfc3339()],
        )?;
        Ok(Node {
            id,
            kind,
            title: title.to_string(),
            path,
            created_at: now,
            updated_at: now,
            content_hash: None,
            metadata: HashMap::new(),
            ghost: true,
        })
    }

    pub fn find_node_by_id(&self, id: &str) -> StoreResult<Option<Node>> {
        self.with_reader(|conn| find_node_by_id(conn, id))
    }

    pub fn find_node_by_path(&self, path: &str) -> StoreResult<Option<Node>> {
        self.with_reader(|conn| find_node_by_path(conn, path))
    }

    pub fn find_nodes_by_title_or_alias(&self, normalized_target: &str) -> StoreResult<Vec<Node>> {
        self.with_reader(|conn| find_nodes_by_title_or_alias(conn, normalized_target))
    }

    pub fn all_nodes(&self) -> StoreResult<Vec<Node>> {
        self.with_reader(|conn| {
            let mut stmt = conn.prepare("SELECT id, kind, title, path, created_at, updated_at, content_hash, metadata, ghost FROM nodes")?;
            let rows = stmt.query_map([], row_to_node)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    /// Cascading delete: removes all referencing rows via `ON DELETE CASCADE` (§3, §4.4).
    pub fn delete_node(&self, conn: &Connection, id: &str) -> StoreResult<()> {
        conn.execute("DELETE FROM nodes WHERE id = ?1", params![id])?;
        Ok(())
    }

    // ========================================================================
    // VERSIONS
    // ========================================================================

    pub fn latest_version(&self, conn: &Connection, node_id: &str) -> StoreResult<Option<Version>> {
        Ok(conn
            .query_row(
                "SELECT id, node_id, content_hash, parent_version_id, created_at, summary
                 FROM versions WHERE node_id = ?1 ORDER BY created_at DESC LIMIT 1",
                params![node_id],
                row_to_version,
            )
            .optional()?)
    }

    pub fn add_version(
        &self,
        conn: &Connection,
        node_id: &str,
        content_hash: &str,
        parent_version_id: Option<&str>,
        summary: Option<&str>,
    ) -> StoreResult<Version> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();
        conn.execute(
            "INSERT INTO versions (id, node_id, content_hash, parent_version_id, created_at, summary)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![&id, node_id, content_hash, parent_version_id, now.to_rfc3339(), summary],
        )?;
        Ok(Version {
            id,
            node_id: node_id.to_string(),
            content_hash: content_hash.to_string(),
            parent_version_id: parent_version_id.map(str::to_string),
            created_at: now,
            summary: summary.map(str::to_string),
        })
    }

    // ========================================================================
    // ALIASES
    // ========================================================================

    /// Replace the alias set atomically (§4.4 step 4).
    pub fn replace_aliases(&self, conn: &Connection, node_id: &str, aliases: &[String]) -> StoreResult<()> {
        conn.execute("DELETE FROM aliases WHERE node_id = ?1", params![node_id])?;
        for alias in aliases {
            let norm = normalize_text(alias);
            // Case-insensitive uniqueness (§3): a later insert silently wins the slot
            // rather than failing the whole re-index over one alias collision.
            conn.execute(
                "INSERT INTO aliases (node_id, alias, alias_norm) VALUES (?1, ?2, ?3)
                 ON CONFLICT(alias_norm) DO UPDATE SET node_id = excluded.node_id, alias = excluded.alias",
                params![node_id, alias, norm],
            )?;
        }
        Ok(())
    }

    // ========================================================================
    // EDGES
    // ========================================================================

    /// Delete all edges of `kind` sourced at `source_id` (§4.4 step 5; must precede new writes, §5).
    pub fn delete_edges_by_source_and_kind(&self, conn: &Connection, source_id: &str, kind: EdgeKind) -> StoreResult<()> {
        conn.execute("DELETE FROM edges WHERE source_id = ?1 AND kind = ?2", params![source_id, kind.as_str()])?;
        Ok(())
    }

    /// Upsert an edge; `(sourceId, targetId, kind)` has at most one live edge (§3).
    pub fn upsert_edge(
        &self,
        conn: &Connection,
        source_id: &str,
        target_id: &str,
        kind: EdgeKind,
        strength: Option<f32>,
        provenance: Provenance,
        attributes: &HashMap<String, serde_json::Value>,
    ) -> StoreResult<Edge> {
        let attrs_json = serde_json::to_string(attributes).unwrap_or_else(|_| "{}".into());
        let now = Utc::now();
        let provenance_str = provenance.to_string();

        conn.execute(
            "INSERT INTO edges (id, source_id, target_id, kind, strength, provenance, created_at, attributes)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(source_id, target_id, kind) DO UPDATE SET
               strength = excluded.strength, provenance = excluded.provenance, attributes = excluded.attributes",
            params![
                uuid::Uuid::new_v4().to_string(),
                source_id,
                target_id,
                kind.as_str(),
                strength,
                provenance_str,
                now.to_rfc3339(),
                attrs_json
            ],
        )?;

        conn.query_row(
            "SELECT id, source_id, target_id, kind, strength, provenance, created_at, version_start, version_end, attributes
             FROM edges WHERE source_id = ?1 AND target_id = ?2 AND kind = ?3",
            params![source_id, target_id, kind.as_str()],
            row_to_edge,
        )
        .map_err(StoreError::from)
    }

    pub fn edges_by_source(&self, source_id: &str, kind: Option<EdgeKind>) -> StoreResult<Vec<Edge>> {
        self.with_reader(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, source_id, target_id, kind, strength, provenance, created_at, version_start, version_end, attributes
                 FROM edges WHERE source_id = ?1 AND (?2 IS NULL OR kind = ?2)",
            )?;
            let rows = stmt.query_map(params![source_id, kind.map(|k| k.as_str())], row_to_edge)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    pub fn edges_by_target(&self, target_id: &str, kind: Option<EdgeKind>) -> StoreResult<Vec<Edge>> {
        self.with_reader(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, source_id, target_id, kind, strength, provenance, created_at, version_start, version_end, attributes
                 FROM edges WHERE target_id = ?1 AND (?2 IS NULL OR kind = ?2)",
            )?;
            let rows = stmt.query_map(params![target_id, kind.map(|k| k.as_str())], row_to_edge)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    /// Full edge snapshot, optionally filtered by kind set; used by the graph engine,
    /// which rebuilds adjacency from a fresh snapshot on every call (§9).
    pub fn all_edges(&self, kinds: Option<&[EdgeKind]>) -> StoreResult<Vec<Edge>> {
        self.with_reader(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, source_id, target_id, kind, strength, provenance, created_at, version_start, version_end, attributes FROM edges",
            )?;
            let rows = stmt.query_map([], row_to_edge)?;
            let mut edges = rows.collect::<rusqlite::Result<Vec<_>>>()?;
            if let Some(allowed) = kinds {
                edges.retain(|e| allowed.contains(&e.kind));
            }
            Ok(edges)
        })
    }

    // ========================================================================
    // CHUNKS / FTS
    // ========================================================================

    /// Replace a version's chunks (insert is all that's needed; old versions keep their chunks).
    pub fn insert_chunks(
        &self,
        conn: &Connection,
        node_id: &str,
        version_id: &str,
        spans: &[(String, i64, i64)],
    ) -> StoreResult<Vec<Chunk>> {
        let mut chunks = Vec::with_capacity(spans.len());
        for (text, start, end) in spans {
            let id = uuid::Uuid::new_v4().to_string();
            conn.execute(
                "INSERT INTO chunks (id, node_id, version_id, text, offset_start, offset_end, token_count)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, NULL)",
                params![&id, node_id, version_id, text, start, end],
            )?;
            chunks.push(Chunk {
                id,
                node_id: node_id.to_string(),
                version_id: version_id.to_string(),
                text: text.clone(),
                offset_start: *start,
                offset_end: *end,
                token_count: None,
            });
        }
        Ok(chunks)
    }

    /// A node's chunks in offset order; used to assemble retrieval context (§4.6).
    pub fn chunks_for_node(&self, node_id: &str) -> StoreResult<Vec<Chunk>> {
        self.with_reader(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, node_id, version_id, text, offset_start, offset_end, token_count
                 FROM chunks WHERE node_id = ?1 ORDER BY offset_start",
            )?;
            let rows = stmt.query_map(params![node_id], row_to_chunk)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    /// BM25 search over the sanitized, OR-joined query (§4.1, §4.6).
    /// Empty sanitized query returns an empty result, never an error.
    pub fn fts_search(&self, sanitized_or_query: &str, limit: usize) -> StoreResult<Vec<FtsHit>> {
        if sanitized_or_query.trim().is_empty() {
            return Ok(Vec::new());
        }
        self.with_reader(|conn| {
            let mut stmt = conn.prepare(
                "SELECT c.id, c.node_id, c.text, bm25(chunks_fts) AS score
                 FROM chunks_fts
                 JOIN chunks c ON c.rowid = chunks_fts.rowid
                 WHERE chunks_fts MATCH ?1
                 ORDER BY score
                 LIMIT ?2",
            )?;
            let rows = stmt.query_map(params![sanitized_or_query, limit as i64], |row| {
                Ok(FtsHit {
                    chunk_id: row.get(0)?,
                    node_id: row.get(1)?,
                    text: row.get(2)?,
                    score: row.get::<_, f64>(3)? as f32,
                })
            })?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    // ========================================================================
    // EMBEDDINGS
    // ========================================================================

    pub fn upsert_embedding(&self, embedding: &Embedding) -> StoreResult<()> {
        self.transaction(|conn| {
            let bytes = embedding_to_bytes(&embedding.vector);
            conn.execute(
                "INSERT INTO embeddings (id, node_id, vector, model, dimension, content_hash, computed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(node_id) DO UPDATE SET
                   vector = excluded.vector, model = excluded.model, dimension = excluded.dimension,
                   content_hash = excluded.content_hash, computed_at = excluded.computed_at",
                params![
                    &embedding.id,
                    &embedding.node_id,
                    bytes,
                    &embedding.model,
                    embedding.dimension as i64,
                    &embedding.content_hash,
                    embedding.computed_at.to_rfc3339()
                ],
            )?;
            Ok(())
        })
    }

    pub fn find_embedding(&self, node_id: &str) -> StoreResult<Option<Embedding>> {
        self.with_reader(|conn| {
            conn.query_row(
                "SELECT id, node_id, vector, model, dimension, content_hash, computed_at FROM embeddings WHERE node_id = ?1",
                params![node_id],
                row_to_embedding,
            )
            .optional()
            .map_err(StoreError::from)
        })
    }

    pub fn all_embeddings(&self) -> StoreResult<Vec<Embedding>> {
        self.with_reader(|conn| {
            let mut stmt = conn.prepare("SELECT id, node_id, vector, model, dimension, content_hash, computed_at FROM embeddings")?;
            let rows = stmt.query_map([], row_to_embedding)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    // ========================================================================
    // SUGGESTIONS
    // ========================================================================

    pub fn find_suggestion(&self, id: &str) -> StoreResult<Option<CandidateEdge>> {
        self.with_reader(|conn| {
            conn.query_row(
                "SELECT id, from_id, to_id, kind, status, status_changed_at, signals, reasons, provenance,
                        created_at, last_computed_at, last_seen_at, writeback_status, writeback_reason, approved_edge_id
                 FROM suggestions WHERE id = ?1",
                params![id],
                row_to_suggestion,
            )
            .optional()
            .map_err(StoreError::from)
        })
    }

    pub fn suggestions_by_status(&self, status: SuggestionStatus) -> StoreResult<Vec<CandidateEdge>> {
        self.with_reader(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, from_id, to_id, kind, status, status_changed_at, signals, reasons, provenance,
                        created_at, last_computed_at, last_seen_at, writeback_status, writeback_reason, approved_edge_id
                 FROM suggestions WHERE status = ?1",
            )?;
            let rows = stmt.query_map(params![status.to_string()], row_to_suggestion)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    pub fn insert_suggestion(&self, conn: &Connection, suggestion: &CandidateEdge) -> StoreResult<()> {
        conn.execute(
            "INSERT INTO suggestions (id, from_id, to_id, kind, status, status_changed_at, signals, reasons, provenance,
                                       created_at, last_computed_at, last_seen_at, writeback_status, writeback_reason, approved_edge_id)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15)",
            params![
                &suggestion.id,
                &suggestion.from_id,
                &suggestion.to_id,
                suggestion.kind.as_str(),
                suggestion.status.to_string(),
                suggestion.status_changed_at.to_rfc3339(),
                serde_json::to_string(&suggestion.signals).unwrap_or_else(|_| "{}".into()),
                serde_json::to_string(&suggestion.reasons).unwrap_or_else(|_| "[]".into()),
                serde_json::to_string(&suggestion.provenance).unwrap_or_else(|_| "[]".into()),
                suggestion.created_at.to_rfc3339(),
                suggestion.last_computed_at.to_rfc3339(),
                suggestion.last_seen_at.to_rfc3339(),
                match suggestion.writeback.status {
                    WritebackStatus::Pending => "pending",
                    WritebackStatus::Written => "written",
                    WritebackStatus::Skipped => "skipped",
                    WritebackStatus::Failed => "failed",
                },
                &suggestion.writeback.reason,
                &suggestion.approved_edge_id,
            ],
        )?;
        Ok(())
    }

    pub fn update_suggestion(&self, conn: &Connection, suggestion: &CandidateEdge) -> StoreResult<()> {
        conn.execute(
            "UPDATE suggestions SET status = ?2, status_changed_at = ?3, signals = ?4, reasons = ?5, provenance = ?6,
                                     last_computed_at = ?7, last_seen_at = ?8, writeback_status = ?9, writeback_reason = ?10, approved_edge_id = ?11
             WHERE id = ?1",
            params![
                &suggestion.id,
                suggestion.status.to_string(),
                suggestion.status_changed_at.to_rfc3339(),
                serde_json::to_string(&suggestion.signals).unwrap_or_else(|_| "{}".into()),
                serde_json::to_string(&suggestion.reasons).unwrap_or_else(|_| "[]".into()),
                serde_json::to_string(&suggestion.provenance).unwrap_or_else(|_| "[]".into()),
                suggestion.last_computed_at.to_rfc3339(),
                suggestion.last_seen_at.to_rfc3339(),
                match suggestion.writeback.status {
                    WritebackStatus::Pending => "pending",
                    WritebackStatus::Written => "written",
                    WritebackStatus::Skipped => "skipped",
                    WritebackStatus::Failed => "failed",
                },
                &suggestion.writeback.reason,
                &suggestion.approved_edge_id,
            ],
        )?;
        Ok(())
    }

    pub fn mark_suggestions_seen(&self, conn: &Connection, ids: &[String], at: DateTime<Utc>) -> StoreResult<()> {
        for id in ids {
            conn.execute("UPDATE suggestions SET last_seen_at = ?2 WHERE id = ?1", params![id, at.to_rfc3339()])?;
        }
        Ok(())
    }

    pub fn suggestions_not_seen_since(&self, cutoff: DateTime<Utc>) -> StoreResult<Vec<CandidateEdge>> {
        self.with_reader(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, from_id, to_id, kind, status, status_changed_at, signals, reasons, provenance,
                        created_at, last_computed_at, last_seen_at, writeback_status, writeback_reason, approved_edge_id
                 FROM suggestions WHERE last_seen_at < ?1",
            )?;
            let rows = stmt.query_map(params![cutoff.to_rfc3339()], row_to_suggestion)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    pub fn delete_suggestion(&self, conn: &Connection, id: &str) -> StoreResult<()> {
        conn.execute("DELETE FROM suggestions WHERE id = ?1", params![id])?;
        Ok(())
    }

    // ========================================================================
    // WORMHOLE REJECTIONS
    // ========================================================================

    pub fn record_rejection(&self, conn: &Connection, rejection: &WormholeRejection) -> StoreResult<()> {
        conn.execute(
            "INSERT INTO wormhole_rejections (from_id, to_id, from_hash, to_hash, rejected_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(from_id, to_id) DO UPDATE SET from_hash = excluded.from_hash, to_hash = excluded.to_hash, rejected_at = excluded.rejected_at",
            params![&rejection.from_id, &rejection.to_id, &rejection.from_hash, &rejection.to_hash, rejection.rejected_at.to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn find_rejection(&self, from_id: &str, to_id: &str) -> StoreResult<Option<WormholeRejection>> {
        self.with_reader(|conn| {
            conn.query_row(
                "SELECT from_id, to_id, from_hash, to_hash, rejected_at FROM wormhole_rejections WHERE from_id = ?1 AND to_id = ?2",
                params![from_id, to_id],
                |row| {
                    Ok(WormholeRejection {
                        from_id: row.get(0)?,
                        to_id: row.get(1)?,
                        from_hash: row.get(2)?,
                        to_hash: row.get(3)?,
                        rejected_at: parse_ts(row.get::<_, String>(4)?),
                    })
                },
            )
            .optional()
            .map_err(StoreError::from)
        })
    }

    // ========================================================================
    // MENTION CANDIDATES
    // ========================================================================

    pub fn insert_mention_candidate(&self, conn: &Connection, mention: &MentionCandidate) -> StoreResult<()> {
        conn.execute(
            "INSERT INTO mention_candidates (id, source_id, target_id, surface_text, span_start, span_end, confidence, reasons, status)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9)",
            params![
                &mention.id,
                &mention.source_id,
                &mention.target_id,
                &mention.surface_text,
                mention.span_start,
                mention.span_end,
                mention.confidence,
                serde_json::to_string(&mention.reasons).unwrap_or_else(|_| "[]".into()),
                mention.status.to_string(),
            ],
        )?;
        Ok(())
    }

    pub fn mentions_for_pair(&self, source_id: &str, target_id: &str) -> StoreResult<Vec<MentionCandidate>> {
        self.with_reader(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, source_id, target_id, surface_text, span_start, span_end, confidence, reasons, status
                 FROM mention_candidates WHERE source_id = ?1 AND target_id = ?2",
            )?;
            let rows = stmt.query_map(params![source_id, target_id], row_to_mention)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }
}

impl crate::resolver::NodeLookup for ZettelStore {
    fn find_by_id(&self, id: &str) -> StoreResult<Option<Node>> {
        self.find_node_by_id(id)
    }

    fn find_by_title_or_alias(&self, normalized: &str) -> StoreResult<Vec<Node>> {
        self.find_nodes_by_title_or_alias(normalized)
    }
}

// ============================================================================
// FREE HELPERS (usable with either connection, inside or outside a transaction)
// ============================================================================

pub fn find_node_by_id(conn: &Connection, id: &str) -> StoreResult<Option<Node>> {
    Ok(conn
        .query_row(
            "SELECT id, kind, title, path, created_at, updated_at, content_hash, metadata, ghost FROM nodes WHERE id = ?1",
            params![id],
            row_to_node,
        )
        .optional()?)
}

pub fn find_node_by_path(conn: &Connection, path: &str) -> StoreResult<Option<Node>> {
    Ok(conn
        .query_row(
            "SELECT id, kind, title, path, created_at, updated_at, content_hash, metadata, ghost FROM nodes WHERE path = ?1",
            params![path],
            row_to_node,
        )
        .optional()?)
}

/// Union of nodes whose title or alias normalizes to `normalized_target` (§4.3 step 2).
pub fn find_nodes_by_title_or_alias(conn: &Connection, normalized_target: &str) -> StoreResult<Vec<Node>> {
    let mut stmt = conn.prepare(
        "SELECT DISTINCT n.id, n.kind, n.title, n.path, n.created_at, n.updated_at, n.content_hash, n.metadata, n.ghost
         FROM nodes n
         LEFT JOIN aliases a ON a.node_id = n.id
         WHERE lower(replace(trim(n.title), '  ', ' ')) = ?1 OR a.alias_norm = ?1",
    )?;
    let rows = stmt.query_map(params![normalized_target], row_to_node)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

fn row_to_node(row: &rusqlite::Row) -> rusqlite::Result<Node> {
    let kind_str: String = row.get(1)?;
    let metadata_json: String = row.get(7)?;
    Ok(Node {
        id: row.get(0)?,
        kind: kind_str.parse().unwrap_or_default(),
        title: row.get(2)?,
        path: row.get(3)?,
        created_at: parse_ts(row.get(4)?),
        updated_at: parse_ts(row.get(5)?),
        content_hash: row.get(6)?,
        metadata: serde_json::from_str(&metadata_json).unwrap_or_default(),
        ghost: row.get::<_, i64>(8)? != 0,
    })
}

fn row_to_version(row: &rusqlite::Row) -> rusqlite::Result<Version> {
    Ok(Version {
        id: row.get(0)?,
        node_id: row.get(1)?,
        content_hash: row.get(2)?,
        parent_version_id: row.get(3)?,
        created_at: parse_ts(row.get(4)?),
        summary: row.get(5)?,
    })
}

fn row_to_chunk(row: &rusqlite::Row) -> rusqlite::Result<Chunk> {
    Ok(Chunk {
        id: row.get(0)?,
        node_id: row.get(1)?,
        version_id: row.get(2)?,
        text: row.get(3)?,
        offset_start: row.get(4)?,
        offset_end: row.get(5)?,
        token_count: row.get(6)?,
    })
}

fn row_to_edge(row: &rusqlite::Row) -> rusqlite::Result<Edge> {
    let kind_str: String = row.get(3)?;
    let provenance_str: String = row.get(5)?;
    let attrs_json: String = row.get(9)?;
    Ok(Edge {
        id: row.get(0)?,
        source_id: row.get(1)?,
        target_id: row.get(2)?,
        kind: kind_str.parse().unwrap_or(EdgeKind::ExplicitLink),
        strength: row.get(4)?,
        provenance: parse_provenance(&provenance_str),
        created_at: parse_ts(row.get(6)?),
        version_start: row.get(7)?,
        version_end: row.get(8)?,
        attributes: serde_json::from_str(&attrs_json).unwrap_or_default(),
    })
}

fn row_to_embedding(row: &rusqlite::Row) -> rusqlite::Result<Embedding> {
    let bytes: Vec<u8> = row.get(2)?;
    Ok(Embedding {
        id: row.get(0)?,
        node_id: row.get(1)?,
        vector: bytes_to_embedding(&bytes),
        model: row.get(3)?,
        dimension: row.get::<_, i64>(4)? as usize,
        content_hash: row.get(5)?,
        computed_at: parse_ts(row.get(6)?),
    })
}

fn row_to_suggestion(row: &rusqlite::Row) -> rusqlite::Result<CandidateEdge> {
    let kind_str: String = row.get(3)?;
    let status_str: String = row.get(4)?;
    let signals_json: String = row.get(6)?;
    let reasons_json: String = row.get(7)?;
    let provenance_json: String = row.get(8)?;
    let writeback_status_str: String = row.get(12)?;
    Ok(CandidateEdge {
        id: row.get(0)?,
        from_id: row.get(1)?,
        to_id: row.get(2)?,
        kind: kind_str.parse().unwrap_or(EdgeKind::Semantic),
        status: parse_suggestion_status(&status_str),
        status_changed_at: parse_ts(row.get(5)?),
        signals: serde_json::from_str(&signals_json).unwrap_or_default(),
        reasons: serde_json::from_str(&reasons_json).unwrap_or_default(),
        provenance: serde_json::from_str(&provenance_json).unwrap_or_default(),
        created_at: parse_ts(row.get(9)?),
        last_computed_at: parse_ts(row.get(10)?),
        last_seen_at: parse_ts(row.get(11)?),
        writeback: WritebackOutcome { status: parse_writeback_status(&writeback_status_str), reason: row.get(13)? },
        approved_edge_id: row.get(14)?,
    })
}

fn row_to_mention(row: &rusqlite::Row) -> rusqlite::Result<MentionCandidate> {
    let reasons_json: String = row.get(7)?;
    let status_str: String = row.get(8)?;
    Ok(MentionCandidate {
        id: row.get(0)?,
        source_id: row.get(1)?,
        target_id: row.get(2)?,
        surface_text: row.get(3)?,
        span_start: row.get(4)?,
        span_end: row.get(5)?,
        confidence: row.get(6)?,
        reasons: serde_json::from_str(&reasons_json).unwrap_or_default(),
        status: parse_mention_status(&status_str),
    })
}

fn parse_ts(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s).map(|dt| dt.with_timezone(&Utc)).unwrap_or_else(|_| Utc::now())
}

fn parse_provenance(s: &str) -> Provenance {
    match s {
        "explicit" => Provenance::Explicit,
        "inferred" => Provenance::Inferred,
        "computed" => Provenance::Computed,
        "user_approved" => Provenance::UserApproved,
        _ => Provenance::Computed,
    }
}

fn parse_suggestion_status(s: &str) -> SuggestionStatus {
    match s {
        "approved" => SuggestionStatus::Approved,
        "rejected" => SuggestionStatus::Rejected,
        _ => SuggestionStatus::Suggested,
    }
}

fn parse_writeback_status(s: &str) -> WritebackStatus {
    match s {
        "written" => WritebackStatus::Written,
        "skipped" => WritebackStatus::Skipped,
        "failed" => WritebackStatus::Failed,
        _ => WritebackStatus::Pending,
    }
}

fn parse_mention_status(s: &str) -> MentionStatus {
    match s {
        "approved" => MentionStatus::Approved,
        "rejected" => MentionStatus::Rejected,
        "deferred" => MentionStatus::Deferred,
        _ => MentionStatus::New,
    }
}

fn embedding_to_bytes(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn bytes_to_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes.chunks_exact(4).map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]])).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upsert_node_by_path_creates_then_updates_preserving_created_at() {
        let (store, _dir) = ZettelStore::open_temp();
        let node1 = store
            .transaction(|conn| store.upsert_node_by_path(conn, "a.md", NodeKind::Note, "Alpha", Some("h1"), &HashMap::new()))
            .unwrap();
        let node2 = store
            .transaction(|conn| store.upsert_node_by_path(conn, "a.md", NodeKind::Note, "Alpha Renamed", Some("h2"), &HashMap::new()))
            .unwrap();
        assert_eq!(node1.id, node2.id);
        assert_eq!(node1.created_at, node2.created_at);
        assert_eq!(node2.title, "Alpha Renamed");
        assert_eq!(node2.content_hash.as_deref(), Some("h2"));
    }

    #[test]
    fn ghost_creation_is_idempotent_under_case_insensitive_title() {
        let (store, _dir) = ZettelStore::open_temp();
        let g1 = store.transaction(|conn| store.get_or_create_ghost_by_title(conn, "Some Title", NodeKind::Note)).unwrap();
        let g2 = store.transaction(|conn| store.get_or_create_ghost_by_title(conn, "some title", NodeKind::Note)).unwrap();
        assert_eq!(g1.id, g2.id);
        assert!(g1.ghost);
        assert!(g1.path.starts_with(GHOST_PATH_PREFIX));
        assert!(g1.content_hash.is_none());
    }

    #[test]
    fn edge_upsert_enforces_single_live_edge_per_triple() {
        let (store, _dir) = ZettelStore::open_temp();
        store
            .transaction(|conn| {
                let a = store.upsert_node_by_path(conn, "a.md", NodeKind::Note, "A", Some("ha"), &HashMap::new())?;
                let b = store.upsert_node_by_path(conn, "b.md", NodeKind::Note, "B", Some("hb"), &HashMap::new())?;
                store.upsert_edge(conn, &a.id, &b.id, EdgeKind::ExplicitLink, Some(1.0), Provenance::Explicit, &HashMap::new())?;
                store.upsert_edge(conn, &a.id, &b.id, EdgeKind::ExplicitLink, Some(0.5), Provenance::Explicit, &HashMap::new())?;
                let edges = store.edges_by_source(&a.id, Some(EdgeKind::ExplicitLink))?;
                assert_eq!(edges.len(), 1);
                assert_eq!(edges[0].strength, Some(0.5));
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn cascading_delete_removes_edges_and_versions() {
        let (store, _dir) = ZettelStore::open_temp();
        let (a_id, b_id) = store
            .transaction(|conn| {
                let a = store.upsert_node_by_path(conn, "a.md", NodeKind::Note, "A", Some("ha"), &HashMap::new())?;
                let b = store.upsert_node_by_path(conn, "b.md", NodeKind::Note, "B", Some("hb"), &HashMap::new())?;
                store.upsert_edge(conn, &a.id, &b.id, EdgeKind::ExplicitLink, None, Provenance::Explicit, &HashMap::new())?;
                store.add_version(conn, &a.id, "ha", None, None)?;
                Ok((a.id, b.id))
            })
            .unwrap();

        store.transaction(|conn| store.delete_node(conn, &a_id)).unwrap();

        assert!(store.find_node_by_id(&a_id).unwrap().is_none());
        assert!(store.edges_by_target(&b_id, None).unwrap().is_empty());
    }

    #[test]
    fn fts_search_on_empty_query_returns_empty() {
        let (store, _dir) = ZettelStore::open_temp();
        let hits = store.fts_search("", 10).unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn fts_search_finds_inserted_chunk_text() {
        let (store, _dir) = ZettelStore::open_temp();
        store
            .transaction(|conn| {
                let node = store.upsert_node_by_path(conn, "a.md", NodeKind::Note, "A", Some("ha"), &HashMap::new())?;
                let version = store.add_version(conn, &node.id, "ha", None, None)?;
                store.insert_chunks(conn, &node.id, &version.id, &[("the quick brown fox".to_string(), 0, 20)])?;
                Ok(())
            })
            .unwrap();

        let hits = store.fts_search("quick OR fox", 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].text.contains("quick"));
    }

    #[test]
    fn embedding_bytes_roundtrip() {
        let vector = vec![0.1f32, -0.5, 2.25];
        let bytes = embedding_to_bytes(&vector);
        let back = bytes_to_embedding(&bytes);
        assert_eq!(vector, back);
    }
}
