//! # ZettelScript Core
//!
//! Indexing, graph, and retrieval core for markdown vaults of `[[wiki]]`-linked
//! notes. A vault is a directory of markdown files; this crate turns it into a
//! queryable knowledge graph:
//!
//! - **Parsing**: YAML preamble + body, `[[wiki]]` references, and fenced/inline
//!   code exclusion zones so links inside code blocks are never resolved.
//! - **Resolution**: title/alias/path lookup with ambiguity and ghost-node
//!   handling for references that don't (yet) resolve to a real note.
//! - **Indexing**: content-hash-gated re-parsing, chunking, and FTS5 population
//!   on top of a SQLite-backed store.
//! - **Graph**: typed, layered edges (structural, semantic, temporal, ...) with
//!   k-shortest-path and bounded expansion queries.
//! - **Retrieval**: lexical (BM25/FTS5) + graph + optional semantic hit fusion
//!   via weighted Reciprocal Rank Fusion, assembled into grounded context with
//!   provenance.
//! - **Suggestions**: a review queue for machine-proposed edges (semantic
//!   "wormholes", unresolved mentions) with a canonical ID, an approve/reject
//!   lifecycle, and atomic markdown write-back.
//! - **Operational resilience**: a per-subsystem circuit breaker and a related-
//!   notes ranker for surfacing neighbors of whatever note is currently open.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use zettelscript_core::{ZettelStore, Indexer, FileInfo};
//!
//! let store = ZettelStore::open("vault.db")?;
//! let indexer = Indexer::new(&store);
//! let indexed = indexer.index_file(&FileInfo {
//!     path: "notes/mitochondria.md".to_string(),
//!     bytes: std::fs::read("vault/notes/mitochondria.md")?,
//! })?;
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(rustdoc::missing_crate_level_docs)]

// ============================================================================
// MODULES
// ============================================================================

pub mod models;

pub mod config;
pub mod error;

pub mod storage;

pub mod parser;
pub mod resolver;
pub mod indexer;

pub mod graph;

pub mod embeddings;
pub mod search;

pub mod suggestion;

pub mod breaker;
pub mod ranker;

// ============================================================================
// PUBLIC API RE-EXPORTS
// ============================================================================

pub use models::{
    Alias, CandidateEdge, Chunk, Edge, EdgeKind, EdgeLayer, Embedding, MentionCandidate,
    MentionStatus, Node, NodeKind, Provenance, SuggestionSignals, SuggestionStatus, Version,
    WormholeRejection, WritebackOutcome, WritebackStatus, normalize_text,
};

pub use config::{
    BreakerConfig, EmbeddingHealthConfig, ExpansionConfig, FusionConfig, KShortestConfig,
    RankerConfig, RetrievalConfig, SuggestionConfig, edge_penalty,
};

pub use error::{
    GraphError, GraphResult, ParseError, ParseResult, RetrievalError, RetrievalResult,
    StoreError, StoreResult, SuggestionError, SuggestionResult, ZettelError, ZettelResult,
};

pub use storage::{FtsHit, ZettelStore};

pub use parser::{
    ExclusionKind, ExclusionZone, ParsedNote, PreambleFields, Span, WikiReference, parse_note,
};

pub use resolver::{ResolutionOutcome, Resolver};

pub use indexer::{
    AmbiguousLink, BatchIndexResult, FileInfo, IndexFileError, IndexedFile, Indexer,
    UnresolvedLink, content_hash,
};

pub use graph::{Adjacency, Direction, GraphEngine};

pub use embeddings::{
    EmbeddingError, EmbeddingProvider, EmbeddingResult, cosine_similarity, dot_product,
    euclidean_distance, matryoshka_truncate,
};

pub use search::{ContextResult, ProvenanceEntry, RetrievalFilters, Retriever};
pub use search::fusion::{FusedHit, FusionSource, rrf_fuse};
pub use search::keyword::sanitize_fts5_query;

pub use suggestion::{SuggestionEngine, canonical_suggestion_id};
pub use suggestion::writeback::write_back;

pub use breaker::CircuitBreakerRegistry;
pub use ranker::{RankedNote, Ranker};

// ============================================================================
// VERSION INFO
// ============================================================================

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// ============================================================================
// PRELUDE
// ============================================================================

/// Convenient imports for common usage.
pub mod prelude {
    pub use crate::{
        CircuitBreakerRegistry, ContextResult, Edge, EdgeKind, FileInfo, GraphEngine, Indexer,
        Node, NodeKind, Ranker, Resolver, Retriever, StoreError, StoreResult, SuggestionEngine,
        ZettelError, ZettelResult, ZettelStore,
    };
}
