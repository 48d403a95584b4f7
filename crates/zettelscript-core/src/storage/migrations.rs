//! Schema migrations.
//!
//! Shaped exactly like the corpus's `storage/migrations.rs`: an ordered,
//! `&'static` array of `Migration { version, description, up }`, applied
//! forward-only via `execute_batch` inside `apply_migrations`, with the
//! current version tracked in a single-row `schema_version` table.

use rusqlite::Connection;

use crate::error::{StoreError, StoreResult};

/// One forward schema migration.
pub struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub up: &'static str,
}

pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "initial schema: nodes, edges, versions, chunks, fts5, aliases",
        up: r#"
            CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS nodes (
                id TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                title TEXT NOT NULL,
                path TEXT NOT NULL UNIQUE,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                content_hash TEXT,
                metadata TEXT NOT NULL DEFAULT '{}',
                ghost INTEGER NOT NULL DEFAULT 0
            );

            CREATE INDEX IF NOT EXISTS idx_nodes_title ON nodes (title);

            CREATE TABLE IF NOT EXISTS versions (
                id TEXT PRIMARY KEY,
                node_id TEXT NOT NULL REFERENCES nodes (id) ON DELETE CASCADE,
                content_hash TEXT NOT NULL,
                parent_version_id TEXT,
                created_at TEXT NOT NULL,
                summary TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_versions_node ON versions (node_id, created_at);

            CREATE TABLE IF NOT EXISTS edges (
                id TEXT PRIMARY KEY,
                source_id TEXT NOT NULL REFERENCES nodes (id) ON DELETE CASCADE,
                target_id TEXT NOT NULL REFERENCES nodes (id) ON DELETE CASCADE,
                kind TEXT NOT NULL,
                strength REAL,
                provenance TEXT NOT NULL,
                created_at TEXT NOT NULL,
                version_start TEXT,
                version_end TEXT,
                attributes TEXT NOT NULL DEFAULT '{}',
                UNIQUE (source_id, target_id, kind)
            );

            CREATE INDEX IF NOT EXISTS idx_edges_source ON edges (source_id, kind);
            CREATE INDEX IF NOT EXISTS idx_edges_target ON edges (target_id, kind);

            CREATE TABLE IF NOT EXISTS aliases (
                node_id TEXT NOT NULL REFERENCES nodes (id) ON DELETE CASCADE,
                alias TEXT NOT NULL,
                alias_norm TEXT NOT NULL UNIQUE
            );

            CREATE INDEX IF NOT EXISTS idx_aliases_node ON aliases (node_id);

            CREATE TABLE IF NOT EXISTS chunks (
                id TEXT PRIMARY KEY,
                node_id TEXT NOT NULL REFERENCES nodes (id) ON DELETE CASCADE,
                version_id TEXT NOT NULL REFERENCES versions (id) ON DELETE CASCADE,
                text TEXT NOT NULL,
                offset_start INTEGER NOT NULL,
                offset_end INTEGER NOT NULL,
                token_count INTEGER
            );

            CREATE INDEX IF NOT EXISTS idx_chunks_node ON chunks (node_id, offset_start);

            CREATE VIRTUAL TABLE IF NOT EXISTS chunks_fts USING fts5(
                text,
                content = 'chunks',
                content_rowid = 'rowid'
            );

            CREATE TRIGGER IF NOT EXISTS chunks_ai AFTER INSERT ON chunks BEGIN
                INSERT INTO chunks_fts(rowid, text) VALUES (new.rowid, new.text);
            END;

            CREATE TRIGGER IF NOT EXISTS chunks_ad AFTER DELETE ON chunks BEGIN
                INSERT INTO chunks_fts(chunks_fts, rowid, text) VALUES ('delete', old.rowid, old.text);
            END;

            CREATE TRIGGER IF NOT EXISTS chunks_au AFTER UPDATE ON chunks BEGIN
                INSERT INTO chunks_fts(chunks_fts, rowid, text) VALUES ('delete', old.rowid, old.text);
                INSERT INTO chunks_fts(rowid, text) VALUES (new.rowid, new.text);
            END;

            INSERT INTO schema_version (version) SELECT 1 WHERE NOT EXISTS (SELECT 1 FROM schema_version);
        "#,
    },
    Migration {
        version: 2,
        description: "embeddings, suggestions, mention candidates, wormhole rejections",
        up: r#"
            CREATE TABLE IF NOT EXISTS embeddings (
                id TEXT PRIMARY KEY,
                node_id TEXT NOT NULL UNIQUE REFERENCES nodes (id) ON DELETE CASCADE,
                vector BLOB NOT NULL,
                model TEXT NOT NULL,
                dimension INTEGER NOT NULL,
                content_hash TEXT NOT NULL,
                computed_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS suggestions (
                id TEXT PRIMARY KEY,
                from_id TEXT NOT NULL REFERENCES nodes (id) ON DELETE CASCADE,
                to_id TEXT NOT NULL REFERENCES nodes (id) ON DELETE CASCADE,
                kind TEXT NOT NULL,
                status TEXT NOT NULL,
                status_changed_at TEXT NOT NULL,
                signals TEXT NOT NULL DEFAULT '{}',
                reasons TEXT NOT NULL DEFAULT '[]',
                provenance TEXT NOT NULL DEFAULT '[]',
                created_at TEXT NOT NULL,
                last_computed_at TEXT NOT NULL,
                last_seen_at TEXT NOT NULL,
                writeback_status TEXT NOT NULL DEFAULT 'pending',
                writeback_reason TEXT,
                approved_edge_id TEXT,
                UNIQUE (from_id, to_id, kind)
            );

            CREATE INDEX IF NOT EXISTS idx_suggestions_status ON suggestions (status);

            CREATE TABLE IF NOT EXISTS mention_candidates (
                id TEXT PRIMARY KEY,
                source_id TEXT NOT NULL REFERENCES nodes (id) ON DELETE CASCADE,
                target_id TEXT REFERENCES nodes (id) ON DELETE CASCADE,
                surface_text TEXT NOT NULL,
                span_start INTEGER NOT NULL,
                span_end INTEGER NOT NULL,
                confidence REAL NOT NULL,
                reasons TEXT NOT NULL DEFAULT '[]',
                status TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS wormhole_rejections (
                from_id TEXT NOT NULL,
                to_id TEXT NOT NULL,
                from_hash TEXT NOT NULL,
                to_hash TEXT NOT NULL,
                rejected_at TEXT NOT NULL,
                PRIMARY KEY (from_id, to_id)
            );

            UPDATE schema_version SET version = 2;
        "#,
    },
];

/// Read the current schema version, defaulting to 0 for a fresh database
/// (the `schema_version` table does not exist yet).
pub fn get_current_version(conn: &Connection) -> rusqlite::Result<u32> {
    let exists: bool = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'schema_version'",
            [],
            |_| Ok(true),
        )
        .unwrap_or(false);

    if !exists {
        return Ok(0);
    }

    conn.query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |row| row.get(0))
}

/// Apply every migration newer than the database's current version, in order.
///
/// `version(db) > version(code)` (a database migrated by a newer build) is a
/// hard error (§6.2); this function never runs a migration out of order.
pub fn apply_migrations(conn: &Connection) -> StoreResult<u32> {
    let current = get_current_version(conn)?;
    let code_version = MIGRATIONS.iter().map(|m| m.version).max().unwrap_or(0);

    if current > code_version {
        return Err(StoreError::SchemaTooNew { db: current, code: code_version });
    }

    for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
        conn.execute_batch(migration.up)?;
        tracing::info!(version = migration.version, description = migration.description, "applied migration");
    }

    Ok(code_version)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_database_starts_at_zero() {
        let conn = Connection::open_in_memory().unwrap();
        assert_eq!(get_current_version(&conn).unwrap(), 0);
    }

    #[test]
    fn apply_migrations_reaches_latest_version() {
        let conn = Connection::open_in_memory().unwrap();
        let version = apply_migrations(&conn).unwrap();
        assert_eq!(version, 2);
        assert_eq!(get_current_version(&conn).unwrap(), 2);
    }

    #[test]
    fn apply_migrations_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        apply_migrations(&conn).unwrap();
        let second = apply_migrations(&conn).unwrap();
        assert_eq!(second, 2);
    }

    #[test]
    fn fts_trigger_invariant_holds_on_insert_and_delete() {
        let conn = Connection::open_in_memory().unwrap();
        apply_migrations(&conn).unwrap();
        conn.execute(
            "INSERT INTO nodes (id, kind, title, path, created_at, updated_at) VALUES ('n1','note','T','p1','2024-01-01','2024-01-01')",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO versions (id, node_id, content_hash, created_at) VALUES ('v1','n1','h1','2024-01-01')",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO chunks (id, node_id, version_id, text, offset_start, offset_end) VALUES ('c1','n1','v1','hello world',0,11)",
            [],
        )
        .unwrap();

        let fts_count: i64 = conn.query_row("SELECT count(*) FROM chunks_fts WHERE chunks_fts MATCH 'hello'", [], |r| r.get(0)).unwrap();
        assert_eq!(fts_count, 1);

        conn.execute("DELETE FROM chunks WHERE id = 'c1'", []).unwrap();
        let fts_count_after: i64 = conn.query_row("SELECT count(*) FROM chunks_fts WHERE chunks_fts MATCH 'hello'", [], |r| r.get(0)).unwrap();
        assert_eq!(fts_count_after, 0);
    }
}
