//! Core data model: nodes, edges, versions, chunks, suggestions, embeddings.
//!
//! Kinds are closed sums (tagged enums) per the design note on polymorphism;
//! `Display`/`FromStr` are hand-written rather than derived via `strum`, matching
//! the rest of the crate's enum conventions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ============================================================================
// NODE
// ============================================================================

/// The ten closed node kinds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    #[default]
    Note,
    Scene,
    Character,
    Location,
    Object,
    Event,
    Concept,
    Moc,
    Timeline,
    Draft,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Note => "note",
            NodeKind::Scene => "scene",
            NodeKind::Character => "character",
            NodeKind::Location => "location",
            NodeKind::Object => "object",
            NodeKind::Event => "event",
            NodeKind::Concept => "concept",
            NodeKind::Moc => "moc",
            NodeKind::Timeline => "timeline",
            NodeKind::Draft => "draft",
        }
    }
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for NodeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "note" => Ok(NodeKind::Note),
            "scene" => Ok(NodeKind::Scene),
            "character" => Ok(NodeKind::Character),
            "location" => Ok(NodeKind::Location),
            "object" => Ok(NodeKind::Object),
            "event" => Ok(NodeKind::Event),
            "concept" => Ok(NodeKind::Concept),
            "moc" => Ok(NodeKind::Moc),
            "timeline" => Ok(NodeKind::Timeline),
            "draft" => Ok(NodeKind::Draft),
            other => Err(format!("unknown node kind: {other}")),
        }
    }
}

/// Synthetic path prefix for ghost nodes (invariant 6, §8).
pub const GHOST_PATH_PREFIX: &str = "ghost://";

/// A referenceable entity: one note on disk, or a synthesized ghost.
#[non_exhaustive]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub id: String,
    pub kind: NodeKind,
    pub title: String,
    pub path: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub content_hash: Option<String>,
    pub metadata: HashMap<String, serde_json::Value>,
    pub ghost: bool,
}

impl Node {
    /// Synthesize the placeholder path used for ghost nodes, derived from title.
    pub fn ghost_path(title: &str) -> String {
        format!("{GHOST_PATH_PREFIX}{}", title.to_lowercase().trim())
    }
}

// ============================================================================
// EDGE
// ============================================================================

/// The twelve closed edge kinds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    ExplicitLink,
    Backlink,
    Sequence,
    Hierarchy,
    Participation,
    PovVisibleTo,
    Causes,
    SetupPayoff,
    Semantic,
    SemanticSuggestion,
    Mention,
    Alias,
}

impl EdgeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeKind::ExplicitLink => "explicit_link",
            EdgeKind::Backlink => "backlink",
            EdgeKind::Sequence => "sequence",
            EdgeKind::Hierarchy => "hierarchy",
            EdgeKind::Participation => "participation",
            EdgeKind::PovVisibleTo => "pov_visible_to",
            EdgeKind::Causes => "causes",
            EdgeKind::SetupPayoff => "setup_payoff",
            EdgeKind::Semantic => "semantic",
            EdgeKind::SemanticSuggestion => "semantic_suggestion",
            EdgeKind::Mention => "mention",
            EdgeKind::Alias => "alias",
        }
    }

    /// Undirected kinds are canonicalized by sorting endpoints (§4.7, §6.3).
    pub fn is_undirected(&self) -> bool {
        matches!(self, EdgeKind::Semantic | EdgeKind::SemanticSuggestion)
    }

    /// Edge-layer classification for bounded expansion and rendering (§3).
    pub fn layer(&self) -> EdgeLayer {
        match self {
            EdgeKind::ExplicitLink
            | EdgeKind::Hierarchy
            | EdgeKind::Sequence
            | EdgeKind::Causes
            | EdgeKind::SetupPayoff
            | EdgeKind::Participation
            | EdgeKind::PovVisibleTo => EdgeLayer::Truth,
            EdgeKind::Semantic => EdgeLayer::Computed,
            EdgeKind::Backlink | EdgeKind::Mention | EdgeKind::SemanticSuggestion | EdgeKind::Alias => {
                EdgeLayer::Noise
            }
        }
    }
}

impl std::fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for EdgeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "explicit_link" => Ok(EdgeKind::ExplicitLink),
            "backlink" => Ok(EdgeKind::Backlink),
            "sequence" => Ok(EdgeKind::Sequence),
            "hierarchy" => Ok(EdgeKind::Hierarchy),
            "participation" => Ok(EdgeKind::Participation),
            "pov_visible_to" => Ok(EdgeKind::PovVisibleTo),
            "causes" => Ok(EdgeKind::Causes),
            "setup_payoff" => Ok(EdgeKind::SetupPayoff),
            "semantic" => Ok(EdgeKind::Semantic),
            "semantic_suggestion" => Ok(EdgeKind::SemanticSuggestion),
            "mention" => Ok(EdgeKind::Mention),
            "alias" => Ok(EdgeKind::Alias),
            other => Err(format!("unknown edge kind: {other}")),
        }
    }
}

/// Layer A/B/C partitioning of edge kinds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum EdgeLayer {
    /// Layer A: authoritative fact.
    Truth,
    /// Layer B: computed similarity.
    Computed,
    /// Layer C: noise (rendering-optional).
    Noise,
}

/// Edge provenance.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    Explicit,
    Inferred,
    Computed,
    UserApproved,
}

impl std::fmt::Display for Provenance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Provenance::Explicit => "explicit",
            Provenance::Inferred => "inferred",
            Provenance::Computed => "computed",
            Provenance::UserApproved => "user_approved",
        };
        write!(f, "{s}")
    }
}

/// A directed, typed relation between two node identities.
#[non_exhaustive]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    pub id: String,
    pub source_id: String,
    pub target_id: String,
    pub kind: EdgeKind,
    pub strength: Option<f32>,
    pub provenance: Provenance,
    pub created_at: DateTime<Utc>,
    pub version_start: Option<String>,
    pub version_end: Option<String>,
    pub attributes: HashMap<String, serde_json::Value>,
}

// ============================================================================
// VERSION
// ============================================================================

/// A point in a node's content history.
#[non_exhaustive]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Version {
    pub id: String,
    pub node_id: String,
    pub content_hash: String,
    pub parent_version_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub summary: Option<String>,
}

// ============================================================================
// CHUNK
// ============================================================================

/// A contiguous byte span of a specific version; the unit of lexical retrieval.
#[non_exhaustive]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chunk {
    pub id: String,
    pub node_id: String,
    pub version_id: String,
    pub text: String,
    pub offset_start: i64,
    pub offset_end: i64,
    pub token_count: Option<i64>,
}

// ============================================================================
// MENTION CANDIDATE
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MentionStatus {
    New,
    Approved,
    Rejected,
    Deferred,
}

impl std::fmt::Display for MentionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MentionStatus::New => "new",
            MentionStatus::Approved => "approved",
            MentionStatus::Rejected => "rejected",
            MentionStatus::Deferred => "deferred",
        };
        write!(f, "{s}")
    }
}

/// A proposed `source -> target` association from surface-text evidence.
#[non_exhaustive]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MentionCandidate {
    pub id: String,
    pub source_id: String,
    pub target_id: Option<String>,
    pub surface_text: String,
    pub span_start: i64,
    pub span_end: i64,
    pub confidence: f32,
    pub reasons: Vec<String>,
    pub status: MentionStatus,
}

// ============================================================================
// CANDIDATE EDGE (SUGGESTION)
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SuggestionStatus {
    Suggested,
    Approved,
    Rejected,
}

impl std::fmt::Display for SuggestionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SuggestionStatus::Suggested => "suggested",
            SuggestionStatus::Approved => "approved",
            SuggestionStatus::Rejected => "rejected",
        };
        write!(f, "{s}")
    }
}

/// Per-channel subscores backing a suggestion's confidence.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuggestionSignals {
    pub semantic: Option<f32>,
    pub mention_count: Option<u32>,
    pub graph_proximity: Option<f32>,
}

impl SuggestionSignals {
    /// Merge another observation into this one: most-recent-per-channel wins.
    pub fn merge(&mut self, other: &SuggestionSignals) {
        if other.semantic.is_some() {
            self.semantic = other.semantic;
        }
        if other.mention_count.is_some() {
            self.mention_count = other.mention_count;
        }
        if other.graph_proximity.is_some() {
            self.graph_proximity = other.graph_proximity;
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WritebackOutcome {
    pub status: WritebackStatus,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum WritebackStatus {
    Pending,
    Written,
    Skipped,
    Failed,
}

/// A proposed typed edge awaiting approval, distinct from truth edges.
#[non_exhaustive]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateEdge {
    pub id: String,
    pub from_id: String,
    pub to_id: String,
    pub kind: EdgeKind,
    pub status: SuggestionStatus,
    pub status_changed_at: DateTime<Utc>,
    pub signals: SuggestionSignals,
    pub reasons: Vec<String>,
    pub provenance: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub last_computed_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub writeback: WritebackOutcome,
    pub approved_edge_id: Option<String>,
}

// ============================================================================
// EMBEDDING
// ============================================================================

/// A per-node float vector used for semantic similarity.
#[non_exhaustive]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Embedding {
    pub id: String,
    pub node_id: String,
    pub vector: Vec<f32>,
    pub model: String,
    pub dimension: usize,
    pub content_hash: String,
    pub computed_at: DateTime<Utc>,
}

// ============================================================================
// WORMHOLE REJECTION
// ============================================================================

/// A memory of a user's rejection of a semantic suggestion, witnessed by content hash.
#[non_exhaustive]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WormholeRejection {
    pub from_id: String,
    pub to_id: String,
    pub from_hash: String,
    pub to_hash: String,
    pub rejected_at: DateTime<Utc>,
}

// ============================================================================
// ALIAS
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alias {
    pub node_id: String,
    pub alias: String,
}

/// Normalize an alias/title for case-insensitive comparison (§4.3/§3).
pub fn normalize_text(s: &str) -> String {
    s.trim().split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_kind_roundtrips() {
        for kind in [
            NodeKind::Note,
            NodeKind::Scene,
            NodeKind::Character,
            NodeKind::Location,
            NodeKind::Object,
            NodeKind::Event,
            NodeKind::Concept,
            NodeKind::Moc,
            NodeKind::Timeline,
            NodeKind::Draft,
        ] {
            let parsed: NodeKind = kind.to_string().parse().unwrap();
            assert_eq!(parsed, kind);
        }
    }

    #[test]
    fn edge_kind_layers() {
        assert_eq!(EdgeKind::ExplicitLink.layer(), EdgeLayer::Truth);
        assert_eq!(EdgeKind::Semantic.layer(), EdgeLayer::Computed);
        assert_eq!(EdgeKind::Backlink.layer(), EdgeLayer::Noise);
    }

    #[test]
    fn edge_kind_undirectedness() {
        assert!(EdgeKind::Semantic.is_undirected());
        assert!(EdgeKind::SemanticSuggestion.is_undirected());
        assert!(!EdgeKind::ExplicitLink.is_undirected());
    }

    #[test]
    fn ghost_path_is_prefixed_and_normalized() {
        let path = Node::ghost_path("  My Title  ");
        assert!(path.starts_with(GHOST_PATH_PREFIX));
        assert_eq!(path, "ghost://my title");
    }

    #[test]
    fn normalize_collapses_whitespace_and_case() {
        assert_eq!(normalize_text("  Alpha   Beta \n"), "alpha beta");
    }

    #[test]
    fn signals_merge_keeps_most_recent_per_channel() {
        let mut a = SuggestionSignals { semantic: Some(0.5), mention_count: None, graph_proximity: Some(0.2) };
        let b = SuggestionSignals { semantic: Some(0.8), mention_count: Some(3), graph_proximity: None };
        a.merge(&b);
        assert_eq!(a.semantic, Some(0.8));
        assert_eq!(a.mention_count, Some(3));
        assert_eq!(a.graph_proximity, Some(0.2));
    }
}
