//! Reference resolution (C3): turns a scanned [`WikiReference`] into a node
//! identity, or a reason it couldn't be resolved.
//!
//! `NodeLookup` is the seam the indexer and tests plug store access through,
//! shaped the way the corpus separates its retrieval queries from the
//! connection that backs them. `Resolver` adds a per-pass cache keyed by
//! normalized target text so repeated references within one indexing pass
//! don't re-query the store.

use std::cell::RefCell;
use std::collections::HashMap;

use crate::error::StoreResult;
use crate::models::{normalize_text, Node};
use crate::parser::WikiReference;

/// Read access the resolver needs; implemented by `ZettelStore` and by an
/// in-memory fake for tests.
pub trait NodeLookup {
    fn find_by_id(&self, id: &str) -> StoreResult<Option<Node>>;
    fn find_by_title_or_alias(&self, normalized: &str) -> StoreResult<Vec<Node>>;
}

/// Outcome of resolving one reference (§4.3).
#[derive(Debug, Clone, PartialEq)]
pub enum ResolutionOutcome {
    Resolved(String),
    Unresolved { target: String },
    Ambiguous { target: String, candidates: Vec<String> },
}

/// Resolves references against a `NodeLookup`, caching per normalized target
/// for the lifetime of one indexing pass.
pub struct Resolver<'a, L: NodeLookup> {
    lookup: &'a L,
    cache: RefCell<HashMap<String, ResolutionOutcome>>,
}

impl<'a, L: NodeLookup> Resolver<'a, L> {
    pub fn new(lookup: &'a L) -> Self {
        Self { lookup, cache: RefCell::new(HashMap::new()) }
    }

    /// Drop all cached resolutions; call between indexing passes (§4.4, §9).
    pub fn clear_cache(&self) {
        self.cache.borrow_mut().clear();
    }

    /// Resolve a single reference per the 5-step algorithm:
    /// identity references bypass title/alias lookup entirely; textual
    /// references normalize and match by title-or-alias, with zero matches
    /// unresolved and more than one ambiguous.
    pub fn resolve(&self, reference: &WikiReference) -> StoreResult<ResolutionOutcome> {
        if reference.is_identity {
            return match self.lookup.find_by_id(&reference.target)? {
                Some(node) => Ok(ResolutionOutcome::Resolved(node.id)),
                None => Ok(ResolutionOutcome::Unresolved { target: reference.target.clone() }),
            };
        }

        let normalized = normalize_text(&reference.target);

        if let Some(cached) = self.cache.borrow().get(&normalized) {
            return Ok(cached.clone());
        }

        let matches = self.lookup.find_by_title_or_alias(&normalized)?;
        let outcome = match matches.len() {
            0 => ResolutionOutcome::Unresolved { target: reference.target.clone() },
            1 => ResolutionOutcome::Resolved(matches.into_iter().next().unwrap().id),
            _ => {
                let title_matches: Vec<&Node> =
                    matches.iter().filter(|n| normalize_text(&n.title) == normalized).collect();
                if title_matches.len() == 1 {
                    let resolved_id = title_matches[0].id.clone();
                    tracing::debug!(
                        target = %reference.target,
                        candidates = matches.len(),
                        "exact title match preferred over ambiguous alias candidates"
                    );
                    ResolutionOutcome::Resolved(resolved_id)
                } else {
                    ResolutionOutcome::Ambiguous {
                        target: reference.target.clone(),
                        candidates: matches.into_iter().map(|n| n.id).collect(),
                    }
                }
            }
        };

        self.cache.borrow_mut().insert(normalized, outcome.clone());
        Ok(outcome)
    }
}

#[cfg(test)]
pub mod fake {
    use super::*;

    /// In-memory `NodeLookup` for resolver/indexer unit tests.
    #[derive(Default)]
    pub struct FakeLookup {
        pub nodes: RefCell<Vec<Node>>,
        pub aliases: RefCell<HashMap<String, String>>, // normalized alias -> node id
    }

    impl FakeLookup {
        pub fn push(&self, node: Node) {
            self.nodes.borrow_mut().push(node);
        }

        pub fn alias(&self, normalized: &str, node_id: &str) {
            self.aliases.borrow_mut().insert(normalized.to_string(), node_id.to_string());
        }
    }

    impl NodeLookup for FakeLookup {
        fn find_by_id(&self, id: &str) -> StoreResult<Option<Node>> {
            Ok(self.nodes.borrow().iter().find(|n| n.id == id).cloned())
        }

        fn find_by_title_or_alias(&self, normalized: &str) -> StoreResult<Vec<Node>> {
            let mut out: Vec<Node> =
                self.nodes.borrow().iter().filter(|n| normalize_text(&n.title) == normalized).cloned().collect();
            if let Some(id) = self.aliases.borrow().get(normalized) {
                if let Some(n) = self.nodes.borrow().iter().find(|n| &n.id == id) {
                    if !out.iter().any(|o| o.id == n.id) {
                        out.push(n.clone());
                    }
                }
            }
            Ok(out)
        }
    }
}
