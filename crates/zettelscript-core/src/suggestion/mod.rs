//! Suggestion store (C7): candidate edges awaiting human approval, their
//! lifecycle, and the markdown write-back that fires on approval.

pub mod writeback;

use std::collections::HashMap;
use std::path::Path;

use chrono::Utc;
use sha2::{Digest, Sha256};

use crate::config::SuggestionConfig;
use crate::embeddings::cosine_similarity;
use crate::error::{SuggestionError, SuggestionResult};
use crate::models::{CandidateEdge, EdgeKind, Provenance, SuggestionSignals, SuggestionStatus, WritebackStatus};
use crate::storage::ZettelStore;

/// `SHA-256("v1|a|b|kind")` truncated to 32 hex chars; `(a,b)` sorted for
/// undirected kinds so both discovery orders land on the same identity (§6.3).
pub fn canonical_suggestion_id(from_id: &str, to_id: &str, kind: EdgeKind) -> String {
    let (a, b) = canonical_endpoints(from_id, to_id, kind);
    let mut hasher = Sha256::new();
    hasher.update(format!("v1|{a}|{b}|{}", kind.as_str()));
    let digest = hasher.finalize();
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    hex[..32].to_string()
}

fn canonical_endpoints(from_id: &str, to_id: &str, kind: EdgeKind) -> (String, String) {
    if kind.is_undirected() && to_id < from_id {
        (to_id.to_string(), from_id.to_string())
    } else {
        (from_id.to_string(), to_id.to_string())
    }
}

pub struct SuggestionEngine<'s> {
    store: &'s ZettelStore,
}

impl<'s> SuggestionEngine<'s> {
    pub fn new(store: &'s ZettelStore) -> Self {
        Self { store }
    }

    /// Upsert a candidate by canonical identity: signals merge, reasons
    /// dedupe to top 3, provenance appends, status is left untouched (§4.7).
    pub fn upsert_candidate(
        &self,
        from_id: &str,
        to_id: &str,
        kind: EdgeKind,
        signals: SuggestionSignals,
        reason: Option<String>,
        provenance: &str,
    ) -> SuggestionResult<CandidateEdge> {
        let (from_id, to_id) = canonical_endpoints(from_id, to_id, kind);
        let id = canonical_suggestion_id(&from_id, &to_id, kind);
        let now = Utc::now();

        Ok(self.store.transaction(|conn| {
            if let Some(mut existing) = self.store.find_suggestion(&id)? {
                existing.signals.merge(&signals);
                if let Some(r) = reason {
                    if !existing.reasons.contains(&r) {
                        existing.reasons.push(r);
                    }
                }
                existing.reasons.truncate(3);
                existing.provenance.push(provenance.to_string());
                existing.last_computed_at = now;
                self.store.update_suggestion(conn, &existing)?;
                Ok(existing)
            } else {
                let suggestion = CandidateEdge {
                    id: id.clone(),
                    from_id: from_id.clone(),
                    to_id: to_id.clone(),
                    kind,
                    status: SuggestionStatus::Suggested,
                    status_changed_at: now,
                    signals,
                    reasons: reason.into_iter().collect(),
                    provenance: vec![provenance.to_string()],
                    created_at: now,
                    last_computed_at: now,
                    last_seen_at: now,
                    writeback: crate::models::WritebackOutcome { status: WritebackStatus::Pending, reason: None },
                    approved_edge_id: None,
                };
                self.store.insert_suggestion(conn, &suggestion)?;
                Ok(suggestion)
            }
        })?)
    }

    /// `suggested -> approved`: create a truth edge with `user_approved`
    /// provenance, then best-effort write the reference into markdown.
    /// Re-approval of an already-approved suggestion is a no-op.
    pub fn approve(&self, suggestion_id: &str, vault_root: &Path) -> SuggestionResult<CandidateEdge> {
        let current = self
            .store
            .find_suggestion(suggestion_id)?
            .ok_or_else(|| SuggestionError::InvalidTransition("missing".to_string(), "approved".to_string()))?;

        if current.status == SuggestionStatus::Approved {
            return Ok(current);
        }
        if current.status == SuggestionStatus::Rejected {
            return Err(SuggestionError::InvalidTransition("rejected".to_string(), "approved".to_string()));
        }

        let approved = self.store.transaction(|conn| {
            let edge = self.store.upsert_edge(
                conn,
                &current.from_id,
                &current.to_id,
                current.kind,
                current.signals.semantic,
                Provenance::UserApproved,
                &HashMap::new(),
            )?;
            let mut updated = current.clone();
            updated.status = SuggestionStatus::Approved;
            updated.status_changed_at = Utc::now();
            updated.approved_edge_id = Some(edge.id);
            self.store.update_suggestion(conn, &updated)?;
            Ok(updated)
        })?;

        let from_node = self.store.find_node_by_id(&approved.from_id)?;
        let to_node = self.store.find_node_by_id(&approved.to_id)?;
        let outcome = match (from_node, to_node) {
            (Some(from), Some(to)) => writeback::write_back(vault_root, &from, &to.title),
            _ => crate::models::WritebackOutcome {
                status: WritebackStatus::Failed,
                reason: Some("endpoint node missing".to_string()),
            },
        };

        Ok(self.store.transaction(|conn| {
            let mut final_suggestion = approved.clone();
            final_suggestion.writeback = outcome;
            self.store.update_suggestion(conn, &final_suggestion)?;
            Ok(final_suggestion)
        })?)
    }

    /// `suggested -> rejected`. `approved -> rejected` is not allowed without
    /// an explicit `unreject` first.
    pub fn reject(&self, suggestion_id: &str) -> SuggestionResult<CandidateEdge> {
        let current = self
            .store
            .find_suggestion(suggestion_id)?
            .ok_or_else(|| SuggestionError::InvalidTransition("missing".to_string(), "rejected".to_string()))?;
        if current.status == SuggestionStatus::Approved {
            return Err(SuggestionError::InvalidTransition("approved".to_string(), "rejected".to_string()));
        }
        self.transition(current, SuggestionStatus::Rejected)
    }

    /// `rejected -> suggested`, clearing the way for a future approval.
    pub fn unreject(&self, suggestion_id: &str) -> SuggestionResult<CandidateEdge> {
        let current = self
            .store
            .find_suggestion(suggestion_id)?
            .ok_or_else(|| SuggestionError::InvalidTransition("missing".to_string(), "suggested".to_string()))?;
        if current.status != SuggestionStatus::Rejected {
            return Err(SuggestionError::InvalidTransition(current.status.to_string(), "suggested".to_string()));
        }
        self.transition(current, SuggestionStatus::Suggested)
    }

    fn transition(&self, mut suggestion: CandidateEdge, to: SuggestionStatus) -> SuggestionResult<CandidateEdge> {
        suggestion.status = to;
        suggestion.status_changed_at = Utc::now();
        Ok(self.store.transaction(|conn| {
            self.store.update_suggestion(conn, &suggestion)?;
            Ok(suggestion)
        })?)
    }

    pub fn mark_seen(&self, ids: &[String]) -> SuggestionResult<()> {
        let now = Utc::now();
        Ok(self.store.transaction(|conn| Ok(self.store.mark_suggestions_seen(conn, ids, now)?))?)
    }

    /// Delete `suggested` candidates not seen within `config.stale_after`.
    /// Approved and rejected suggestions are never pruned by this policy.
    pub fn prune_stale(&self, config: &SuggestionConfig) -> SuggestionResult<Vec<String>> {
        let cutoff = Utc::now() - config.stale_after;
        let candidates = self.store.suggestions_not_seen_since(cutoff)?;
        let mut pruned = Vec::new();
        for candidate in candidates.into_iter().filter(|c| c.status == SuggestionStatus::Suggested) {
            self.store.transaction(|conn| Ok(self.store.delete_suggestion(conn, &candidate.id)?))?;
            pruned.push(candidate.id);
        }
        Ok(pruned)
    }

    /// `isRejected`: exact content-hash match on both endpoints.
    pub fn is_rejected(&self, from_id: &str, to_id: &str, from_hash: &str, to_hash: &str) -> SuggestionResult<bool> {
        let (a, b) = sorted_pair(from_id, to_id);
        let (hash_a, hash_b) = if a == from_id { (from_hash, to_hash) } else { (to_hash, from_hash) };
        match self.store.find_rejection(&a, &b)? {
            Some(rej) => Ok(rej.from_hash == hash_a && rej.to_hash == hash_b),
            None => Ok(false),
        }
    }

    /// `hasAnyRejection`: hash-agnostic existence check.
    pub fn has_any_rejection(&self, from_id: &str, to_id: &str) -> SuggestionResult<bool> {
        let (a, b) = sorted_pair(from_id, to_id);
        Ok(self.store.find_rejection(&a, &b)?.is_some())
    }

    /// Candidate-generation sweep: embedding-backed semantic pairs above the
    /// similarity floor, skipping pairs already wormhole-rejected at the
    /// current content-hash pair (§4.7).
    pub fn sweep_semantic_candidates(&self, semantic_floor: f32) -> SuggestionResult<Vec<CandidateEdge>> {
        let nodes: Vec<_> = self.store.all_nodes()?.into_iter().filter(|n| !n.ghost).collect();
        let mut produced = Vec::new();

        for (i, a) in nodes.iter().enumerate() {
            let Some(embedding_a) = self.store.find_embedding(&a.id)? else { continue };
            for b in &nodes[i + 1..] {
                let Some(embedding_b) = self.store.find_embedding(&b.id)? else { continue };
                let similarity = cosine_similarity(&embedding_a.vector, &embedding_b.vector);
                if similarity < semantic_floor {
                    continue;
                }
                let (Some(hash_a), Some(hash_b)) = (&a.content_hash, &b.content_hash) else {
                    continue;
                };
                if self.is_rejected(&a.id, &b.id, hash_a, hash_b)? {
                    continue;
                }
                let reason = format!("Semantic similarity: {:.0}%", similarity * 100.0);
                let suggestion = self.upsert_candidate(
                    &a.id,
                    &b.id,
                    EdgeKind::Semantic,
                    SuggestionSignals { semantic: Some(similarity), mention_count: None, graph_proximity: None },
                    Some(reason),
                    "semantic_sweep",
                )?;
                produced.push(suggestion);
            }
        }

        Ok(produced)
    }

    /// Feed `signals.mentionCount` from accumulated mention-candidate
    /// evidence for a resolved source/target pair.
    pub fn upsert_mention_backed_candidate(
        &self,
        source_id: &str,
        target_id: &str,
    ) -> SuggestionResult<Option<CandidateEdge>> {
        let mentions = self.store.mentions_for_pair(source_id, target_id)?;
        if mentions.is_empty() {
            return Ok(None);
        }
        let suggestion = self.upsert_candidate(
            source_id,
            target_id,
            EdgeKind::SemanticSuggestion,
            SuggestionSignals { semantic: None, mention_count: Some(mentions.len() as u32), graph_proximity: None },
            Some(format!("Mentioned {} time(s)", mentions.len())),
            "mention_candidates",
        )?;
        Ok(Some(suggestion))
    }
}

fn sorted_pair(a: &str, b: &str) -> (String, String) {
    if a <= b { (a.to_string(), b.to_string()) } else { (b.to_string(), a.to_string()) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexer::{FileInfo, Indexer};
    use crate::models::Embedding;
    use tempfile::tempdir;

    fn seed_two_notes(store: &ZettelStore) -> (String, String) {
        let indexer = Indexer::new(store);
        let a = indexer
            .index_file(&FileInfo { path: "a.md".to_string(), bytes: b"# Alpha\n\nfirst note".to_vec() })
            .unwrap();
        let b = indexer
            .index_file(&FileInfo { path: "b.md".to_string(), bytes: b"# Beta\n\nsecond note".to_vec() })
            .unwrap();
        (a.node.id, b.node.id)
    }

    #[test]
    fn canonical_id_is_order_independent_for_undirected_kinds() {
        let id1 = canonical_suggestion_id("a", "b", EdgeKind::Semantic);
        let id2 = canonical_suggestion_id("b", "a", EdgeKind::Semantic);
        assert_eq!(id1, id2);
        assert_eq!(id1.len(), 32);
    }

    #[test]
    fn canonical_id_is_order_sensitive_for_directed_kinds() {
        let id1 = canonical_suggestion_id("a", "b", EdgeKind::ExplicitLink);
        let id2 = canonical_suggestion_id("b", "a", EdgeKind::ExplicitLink);
        assert_ne!(id1, id2);
    }

    #[test]
    fn upsert_merges_signals_and_dedupes_reasons() {
        let (store, _dir) = ZettelStore::open_temp();
        let (a, b) = seed_two_notes(&store);
        let engine = SuggestionEngine::new(&store);
        let first = engine
            .upsert_candidate(
                &a,
                &b,
                EdgeKind::Semantic,
                SuggestionSignals { semantic: Some(0.5), mention_count: None, graph_proximity: None },
                Some("Semantic similarity: 50%".to_string()),
                "sweep-1",
            )
            .unwrap();
        let second = engine
            .upsert_candidate(
                &a,
                &b,
                EdgeKind::Semantic,
                SuggestionSignals { semantic: Some(0.7), mention_count: Some(2), graph_proximity: None },
                Some("Semantic similarity: 50%".to_string()),
                "sweep-2",
            )
            .unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.signals.semantic, Some(0.7));
        assert_eq!(second.signals.mention_count, Some(2));
        assert_eq!(second.reasons.len(), 1);
        assert_eq!(second.provenance.len(), 2);
    }

    #[test]
    fn reject_then_reapprove_is_blocked_without_unreject() {
        let (store, _dir) = ZettelStore::open_temp();
        let (a, b) = seed_two_notes(&store);
        let engine = SuggestionEngine::new(&store);
        let suggestion = engine
            .upsert_candidate(
                &a,
                &b,
                EdgeKind::Semantic,
                SuggestionSignals::default(),
                None,
                "sweep",
            )
            .unwrap();
        engine.reject(&suggestion.id).unwrap();
        let vault = tempdir().unwrap();
        let err = engine.approve(&suggestion.id, vault.path()).unwrap_err();
        assert!(matches!(err, SuggestionError::InvalidTransition(_, _)));
        engine.unreject(&suggestion.id).unwrap();
        let approved = engine.approve(&suggestion.id, vault.path()).unwrap();
        assert_eq!(approved.status, SuggestionStatus::Approved);
    }

    #[test]
    fn approve_creates_truth_edge_and_is_idempotent() {
        let (store, _dir) = ZettelStore::open_temp();
        let (a, b) = seed_two_notes(&store);
        let engine = SuggestionEngine::new(&store);
        let suggestion = engine
            .upsert_candidate(&a, &b, EdgeKind::Semantic, SuggestionSignals::default(), None, "sweep")
            .unwrap();
        let vault = tempdir().unwrap();
        let approved = engine.approve(&suggestion.id, vault.path()).unwrap();
        assert!(approved.approved_edge_id.is_some());
        let again = engine.approve(&suggestion.id, vault.path()).unwrap();
        assert_eq!(again.approved_edge_id, approved.approved_edge_id);
    }

    #[test]
    fn wormhole_rejection_blocks_future_semantic_sweeps() {
        let (store, _dir) = ZettelStore::open_temp();
        let (a, b) = seed_two_notes(&store);
        store
            .upsert_embedding(&Embedding {
                id: "e1".to_string(),
                node_id: a.clone(),
                vector: vec![1.0, 0.0],
                model: "test".to_string(),
                dimension: 2,
                content_hash: "h1".to_string(),
                computed_at: Utc::now(),
            })
            .unwrap();
        store
            .upsert_embedding(&Embedding {
                id: "e2".to_string(),
                node_id: b.clone(),
                vector: vec![1.0, 0.0],
                model: "test".to_string(),
                dimension: 2,
                content_hash: "h2".to_string(),
                computed_at: Utc::now(),
            })
            .unwrap();
        let engine = SuggestionEngine::new(&store);
        let node_a = store.find_node_by_id(&a).unwrap().unwrap();
        let node_b = store.find_node_by_id(&b).unwrap().unwrap();
        let (sorted_a, sorted_b, hash_a, hash_b) = if a <= b {
            (a.clone(), b.clone(), node_a.content_hash.unwrap(), node_b.content_hash.unwrap())
        } else {
            (b.clone(), a.clone(), node_b.content_hash.unwrap(), node_a.content_hash.unwrap())
        };
        store
            .transaction(|conn| {
                Ok(store.record_rejection(
                    conn,
                    &crate::models::WormholeRejection {
                        from_id: sorted_a,
                        to_id: sorted_b,
                        from_hash: hash_a,
                        to_hash: hash_b,
                        rejected_at: Utc::now(),
                    },
                )?)
            })
            .unwrap();
        let produced = engine.sweep_semantic_candidates(0.1).unwrap();
        assert!(produced.is_empty());
    }
}
