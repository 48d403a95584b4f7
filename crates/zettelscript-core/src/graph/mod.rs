//! Graph engine (C5): bounded expansion, shortest path, K-shortest diverse
//! paths, and structural queries over a freshly rebuilt adjacency snapshot.
//!
//! There is no corpus module this generalizes — built from first principles
//! over `HashMap`/`VecDeque`/`BinaryHeap` the way the rest of the crate
//! favors explicit, typed state over ambient globals. Adjacency is rebuilt
//! from a full edge snapshot on every call (§9): the engine never caches a
//! graph across calls, so a write is visible to the very next traversal.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};

use crate::config::{edge_penalty, ExpansionConfig, KShortestConfig};
use crate::error::GraphResult;
use crate::models::{Edge, EdgeKind};
use crate::storage::ZettelStore;

/// Directed adjacency rebuilt from a full edge snapshot.
#[derive(Debug, Default, Clone)]
pub struct Adjacency {
    pub out: HashMap<String, Vec<(String, EdgeKind, Option<f32>)>>,
    pub inbound: HashMap<String, Vec<(String, EdgeKind, Option<f32>)>>,
}

impl Adjacency {
    pub fn from_edges(edges: &[Edge]) -> Self {
        let mut out: HashMap<String, Vec<(String, EdgeKind, Option<f32>)>> = HashMap::new();
        let mut inbound: HashMap<String, Vec<(String, EdgeKind, Option<f32>)>> = HashMap::new();
        for e in edges {
            out.entry(e.source_id.clone()).or_default().push((e.target_id.clone(), e.kind, e.strength));
            inbound.entry(e.target_id.clone()).or_default().push((e.source_id.clone(), e.kind, e.strength));
            if e.kind.is_undirected() {
                out.entry(e.target_id.clone()).or_default().push((e.source_id.clone(), e.kind, e.strength));
                inbound.entry(e.source_id.clone()).or_default().push((e.target_id.clone(), e.kind, e.strength));
            }
        }
        Self { out, inbound }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Direction {
    Outbound,
    Inbound,
    Both,
}

pub struct GraphEngine<'s> {
    store: &'s ZettelStore,
}

impl<'s> GraphEngine<'s> {
    pub fn new(store: &'s ZettelStore) -> Self {
        Self { store }
    }

    fn adjacency(&self, allowed_kinds: &[EdgeKind]) -> GraphResult<Adjacency> {
        let kinds = if allowed_kinds.is_empty() { None } else { Some(allowed_kinds) };
        let edges = self.store.all_edges(kinds)?;
        Ok(Adjacency::from_edges(&edges))
    }

    /// Bounded best-first expansion from `seeds` (§4.5.1): score decays by
    /// `config.decay` per hop, traversal stops at `config.max_depth`, and the
    /// number of distinct scored nodes never exceeds `config.budget`.
    pub fn expand(&self, seeds: &[String], config: &ExpansionConfig) -> GraphResult<HashMap<String, f32>> {
        let adjacency = self.adjacency(&config.allowed_kinds)?;
        Ok(bounded_expand(&adjacency, seeds, config))
    }

    /// Shortest path between two nodes, found by running BFS independently
    /// from each endpoint (forward from `from`, backward along in-edges from
    /// `to`) and joining at the node minimizing total hop count (§4.5.2).
    pub fn shortest_path(&self, from: &str, to: &str, allowed_kinds: &[EdgeKind], max_depth: u32) -> GraphResult<Option<Vec<String>>> {
        let adjacency = self.adjacency(allowed_kinds)?;
        Ok(meet_in_the_middle_path(&adjacency, from, to, max_depth))
    }

    /// Up to `config.k` diverse shortest paths (§4.5.3): a Yen-style search
    /// over deviations from the best path found so far, filtering candidates
    /// whose node-set Jaccard overlap with an already-accepted path exceeds
    /// `config.overlap_threshold` (endpoints excluded from the comparison
    /// when either path has 4 or fewer nodes), tie-breaking equal-length
    /// candidates by summed [`edge_penalty`] and then lexicographic path.
    pub fn k_shortest_diverse_paths(&self, from: &str, to: &str, config: &KShortestConfig) -> GraphResult<Vec<Vec<String>>> {
        let adjacency = self.adjacency(&config.allowed_kinds)?;
        Ok(yen_diverse_paths(&adjacency, from, to, config))
    }

    pub fn backlinks(&self, node_id: &str) -> GraphResult<Vec<Edge>> {
        Ok(self.store.edges_by_target(node_id, None)?)
    }

    pub fn neighbors(&self, node_id: &str, direction: Direction) -> GraphResult<Vec<(String, EdgeKind)>> {
        let mut out = Vec::new();
        if matches!(direction, Direction::Outbound | Direction::Both) {
            out.extend(self.store.edges_by_source(node_id, None)?.into_iter().map(|e| (e.target_id, e.kind)));
        }
        if matches!(direction, Direction::Inbound | Direction::Both) {
            out.extend(self.store.edges_by_target(node_id, None)?.into_iter().map(|e| (e.source_id, e.kind)));
        }
        Ok(out)
    }

    /// `(in_degree, out_degree)`.
    pub fn degree(&self, node_id: &str) -> GraphResult<(usize, usize)> {
        let in_degree = self.store.edges_by_target(node_id, None)?.len();
        let out_degree = self.store.edges_by_source(node_id, None)?.len();
        Ok((in_degree, out_degree))
    }

    /// Nodes with neither inbound nor outbound edges.
    pub fn isolated_nodes(&self) -> GraphResult<Vec<String>> {
        let nodes = self.store.all_nodes()?;
        let edges = self.store.all_edges(None)?;
        let mut connected = HashSet::new();
        for e in &edges {
            connected.insert(e.source_id.clone());
            connected.insert(e.target_id.clone());
        }
        Ok(nodes.into_iter().map(|n| n.id).filter(|id| !connected.contains(id)).collect())
    }

    /// Nodes whose in-degree is at least `threshold`, most-linked first.
    pub fn high_in_degree_nodes(&self, threshold: usize) -> GraphResult<Vec<(String, usize)>> {
        let edges = self.store.all_edges(None)?;
        let mut counts: HashMap<String, usize> = HashMap::new();
        for e in &edges {
            *counts.entry(e.target_id.clone()).or_insert(0) += 1;
        }
        let mut result: Vec<(String, usize)> = counts.into_iter().filter(|(_, c)| *c >= threshold).collect();
        result.sort_by(|a, b| b.1.cmp(&a.1));
        Ok(result)
    }

    /// Weakly connected components (edges treated as undirected for component membership).
    pub fn connected_components(&self) -> GraphResult<Vec<Vec<String>>> {
        let nodes = self.store.all_nodes()?;
        let edges = self.store.all_edges(None)?;
        let mut undirected: HashMap<String, Vec<String>> = HashMap::new();
        for e in &edges {
            undirected.entry(e.source_id.clone()).or_default().push(e.target_id.clone());
            undirected.entry(e.target_id.clone()).or_default().push(e.source_id.clone());
        }

        let mut visited = HashSet::new();
        let mut components = Vec::new();
        for node in &nodes {
            if visited.contains(&node.id) {
                continue;
            }
            let mut component = Vec::new();
            let mut queue = VecDeque::new();
            queue.push_back(node.id.clone());
            visited.insert(node.id.clone());
            while let Some(current) = queue.pop_front() {
                component.push(current.clone());
                for next in undirected.get(&current).cloned().unwrap_or_default() {
                    if visited.insert(next.clone()) {
                        queue.push_back(next);
                    }
                }
            }
            components.push(component);
        }
        Ok(components)
    }

    pub fn same_component(&self, a: &str, b: &str) -> GraphResult<bool> {
        let components = self.connected_components()?;
        Ok(components.iter().any(|c| c.iter().any(|n| n == a) && c.iter().any(|n| n == b)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Scored(f32);

impl Eq for Scored {}

impl PartialOrd for Scored {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scored {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

fn bounded_expand(adjacency: &Adjacency, seeds: &[String], config: &ExpansionConfig) -> HashMap<String, f32> {
    let mut scores: HashMap<String, f32> = HashMap::new();
    let mut heap: BinaryHeap<(Scored, u32, String)> = BinaryHeap::new();

    for seed in seeds {
        scores.insert(seed.clone(), 1.0);
        heap.push((Scored(1.0), 0, seed.clone()));
    }

    while let Some((Scored(score), depth, node)) = heap.pop() {
        if depth >= config.max_depth {
            continue;
        }

        let mut candidates = adjacency.out.get(&node).cloned().unwrap_or_default();
        if config.bidirectional {
            candidates.extend(adjacency.inbound.get(&node).cloned().unwrap_or_default());
        }

        for (next, kind, strength) in candidates {
            if !config.allowed_kinds.contains(&kind) {
                continue;
            }
            let next_score = score * config.decay * strength.unwrap_or(1.0);
            let already_known = scores.contains_key(&next);
            if !already_known && scores.len() >= config.budget {
                continue;
            }
            let improves = scores.get(&next).map(|existing| next_score > *existing).unwrap_or(true);
            if improves {
                scores.insert(next.clone(), next_score);
                heap.push((Scored(next_score), depth + 1, next));
            }
        }
    }

    scores
}

fn bfs_distances(adjacency_side: &HashMap<String, Vec<(String, EdgeKind, Option<f32>)>>, start: &str, max_depth: u32) -> (HashMap<String, u32>, HashMap<String, String>) {
    let mut dist = HashMap::new();
    let mut parent = HashMap::new();
    dist.insert(start.to_string(), 0);
    let mut queue = VecDeque::new();
    queue.push_back(start.to_string());

    while let Some(node) = queue.pop_front() {
        let d = dist[&node];
        if d >= max_depth {
            continue;
        }
        for (next, _, _) in adjacency_side.get(&node).cloned().unwrap_or_default() {
            if !dist.contains_key(&next) {
                dist.insert(next.clone(), d + 1);
                parent.insert(next.clone(), node.clone());
                queue.push_back(next);
            }
        }
    }
    (dist, parent)
}

fn reconstruct_chain(parent: &HashMap<String, String>, start: &str, end: &str) -> Vec<String> {
    let mut chain = vec![end.to_string()];
    let mut current = end.to_string();
    while current != start {
        match parent.get(&current) {
            Some(p) => {
                chain.push(p.clone());
                current = p.clone();
            }
            None => break,
        }
    }
    chain.reverse();
    chain
}

fn meet_in_the_middle_path(adjacency: &Adjacency, from: &str, to: &str, max_depth: u32) -> Option<Vec<String>> {
    if from == to {
        return Some(vec![from.to_string()]);
    }

    let (dist_f, parent_f) = bfs_distances(&adjacency.out, from, max_depth);
    let (dist_b, parent_b) = bfs_distances(&adjacency.inbound, to, max_depth);

    let meeting = dist_f
        .keys()
        .filter(|n| dist_b.contains_key(*n))
        .min_by_key(|n| dist_f[*n] + dist_b[*n])?
        .clone();

    let forward = reconstruct_chain(&parent_f, from, &meeting);
    let mut backward = reconstruct_chain(&parent_b, to, &meeting);
    backward.reverse();

    let mut path = forward;
    path.extend(backward.into_iter().skip(1));
    Some(path)
}

fn path_edge_kinds(adjacency: &Adjacency, path: &[String]) -> Vec<EdgeKind> {
    path.windows(2)
        .map(|pair| {
            adjacency
                .out
                .get(&pair[0])
                .and_then(|edges| edges.iter().find(|(n, _, _)| n == &pair[1]))
                .map(|(_, k, _)| *k)
                .unwrap_or(EdgeKind::ExplicitLink)
        })
        .collect()
}

fn path_penalty(adjacency: &Adjacency, path: &[String]) -> f32 {
    path_edge_kinds(adjacency, path).into_iter().map(edge_penalty).sum()
}

fn node_set(path: &[String]) -> HashSet<String> {
    path.iter().cloned().collect()
}

/// `path` with its first and last node dropped, for endpoint-excluded overlap.
fn interior_node_set(path: &[String]) -> HashSet<String> {
    if path.len() <= 2 {
        HashSet::new()
    } else {
        path[1..path.len() - 1].iter().cloned().collect()
    }
}

fn jaccard_overlap(a: &HashSet<String>, b: &HashSet<String>) -> f32 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.union(b).count();
    if union == 0 {
        0.0
    } else {
        intersection as f32 / union as f32
    }
}

/// Jaccard overlap between two paths' node sets (§4.5.3 step 4). When either
/// path has 4 or fewer nodes its node set is dominated by the `from`/`to`
/// endpoints every candidate necessarily shares, so both endpoints are
/// excluded from the comparison in that case.
fn path_overlap(a: &[String], b: &[String]) -> f32 {
    if a.len() <= 4 || b.len() <= 4 {
        jaccard_overlap(&interior_node_set(a), &interior_node_set(b))
    } else {
        jaccard_overlap(&node_set(a), &node_set(b))
    }
}

/// Dijkstra-ish shortest path minimizing `(hop count, summed edge penalty)`,
/// restricted to a working graph with some edges/nodes removed for Yen deviations.
fn restricted_shortest_path(
    adjacency: &Adjacency,
    from: &str,
    to: &str,
    removed_edges: &HashSet<(String, String)>,
    removed_nodes: &HashSet<String>,
) -> Option<(Vec<String>, u32, f32)> {
    #[derive(Clone)]
    struct State {
        node: String,
        hops: u32,
        penalty: f32,
    }
    impl PartialEq for State {
        fn eq(&self, other: &Self) -> bool {
            self.hops == other.hops && self.penalty == other.penalty
        }
    }
    impl Eq for State {}
    impl PartialOrd for State {
        fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
            Some(self.cmp(other))
        }
    }
    impl Ord for State {
        fn cmp(&self, other: &Self) -> Ordering {
            // BinaryHeap is max-heap; reverse so the lowest (hops, penalty) pops first.
            other.hops.cmp(&self.hops).then_with(|| other.penalty.total_cmp(&self.penalty))
        }
    }

    if removed_nodes.contains(from) || removed_nodes.contains(to) {
        return None;
    }

    let mut best: HashMap<String, (u32, f32)> = HashMap::new();
    let mut parent: HashMap<String, String> = HashMap::new();
    best.insert(from.to_string(), (0, 0.0));

    let mut heap = BinaryHeap::new();
    heap.push(State { node: from.to_string(), hops: 0, penalty: 0.0 });

    while let Some(state) = heap.pop() {
        if state.node == to {
            let path = reconstruct_chain(&parent, from, to);
            return Some((path, state.hops, state.penalty));
        }
        if let Some((best_hops, best_penalty)) = best.get(&state.node) {
            if *best_hops < state.hops || (*best_hops == state.hops && *best_penalty < state.penalty) {
                continue;
            }
        }
        for (next, kind, _) in adjacency.out.get(&state.node).cloned().unwrap_or_default() {
            if removed_nodes.contains(&next) || removed_edges.contains(&(state.node.clone(), next.clone())) {
                continue;
            }
            let next_hops = state.hops + 1;
            let next_penalty = state.penalty + edge_penalty(kind);
            let improves = match best.get(&next) {
                Some((h, p)) => next_hops < *h || (next_hops == *h && next_penalty < *p),
                None => true,
            };
            if improves {
                best.insert(next.clone(), (next_hops, next_penalty));
                parent.insert(next.clone(), state.node.clone());
                heap.push(State { node: next.clone(), hops: next_hops, penalty: next_penalty });
            }
        }
    }
    None
}

fn yen_diverse_paths(adjacency: &Adjacency, from: &str, to: &str, config: &KShortestConfig) -> Vec<Vec<String>> {
    let Some((first_path, first_hops, _)) = restricted_shortest_path(adjacency, from, to, &HashSet::new(), &HashSet::new()) else {
        return Vec::new();
    };

    let mut accepted = vec![first_path];
    let max_len = first_hops + config.max_extra_hops;

    let mut candidates: Vec<(Vec<String>, u32, f32)> = Vec::new();
    let mut explored = 0usize;

    while accepted.len() < config.k && explored < config.max_candidates {
        let last_accepted = accepted.last().unwrap().clone();

        for i in 0..last_accepted.len().saturating_sub(1) {
            if explored >= config.max_candidates {
                break;
            }
            explored += 1;

            let spur_node = &last_accepted[i];
            let root_path = &last_accepted[..=i];

            let mut removed_edges = HashSet::new();
            for existing in &accepted {
                if existing.len() > i && existing[..=i] == *root_path {
                    removed_edges.insert((existing[i].clone(), existing[i + 1].clone()));
                }
            }
            let removed_nodes: HashSet<String> = root_path[..i].iter().cloned().collect();

            if let Some((spur_path, _, _)) = restricted_shortest_path(adjacency, spur_node, to, &removed_edges, &removed_nodes) {
                let mut total_path = root_path[..i].to_vec();
                total_path.extend(spur_path);
                let hops = (total_path.len() as u32).saturating_sub(1);
                if hops > max_len {
                    continue;
                }
                let penalty = path_penalty(adjacency, &total_path);
                if !accepted.contains(&total_path) && !candidates.iter().any(|(p, _, _)| p == &total_path) {
                    candidates.push((total_path, hops, penalty));
                }
            }
        }

        candidates.sort_by(|a, b| {
            a.1.cmp(&b.1).then_with(|| a.2.total_cmp(&b.2)).then_with(|| a.0.join("\u{1}").cmp(&b.0.join("\u{1}")))
        });

        let mut picked = None;
        for (idx, (path, _, _)) in candidates.iter().enumerate() {
            // Accept iff overlap with every already-accepted path is <= the
            // threshold; only strictly-greater overlap counts as too similar.
            let too_similar = accepted.iter().any(|accepted_path| path_overlap(accepted_path, path) > config.overlap_threshold);
            if !too_similar {
                picked = Some(idx);
                break;
            }
        }

        match picked {
            Some(idx) => {
                let (path, _, _) = candidates.remove(idx);
                accepted.push(path);
            }
            None => break,
        }
    }

    accepted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Provenance;
    use chrono::Utc;

    fn edge(source: &str, target: &str, kind: EdgeKind) -> Edge {
        Edge {
            id: format!("{source}-{target}-{}", kind.as_str()),
            source_id: source.to_string(),
            target_id: target.to_string(),
            kind,
            strength: None,
            provenance: Provenance::Explicit,
            created_at: Utc::now(),
            version_start: None,
            version_end: None,
            attributes: HashMap::new(),
        }
    }

    fn chain_adjacency() -> Adjacency {
        // a -> b -> c -> d, plus a shortcut a -> c
        Adjacency::from_edges(&[
            edge("a", "b", EdgeKind::ExplicitLink),
            edge("b", "c", EdgeKind::ExplicitLink),
            edge("c", "d", EdgeKind::ExplicitLink),
            edge("a", "c", EdgeKind::ExplicitLink),
        ])
    }

    #[test]
    fn bounded_expand_decays_score_with_depth() {
        let adjacency = chain_adjacency();
        let config = ExpansionConfig { max_depth: 3, budget: 50, allowed_kinds: vec![EdgeKind::ExplicitLink], decay: 0.5, bidirectional: false };
        let scores = bounded_expand(&adjacency, &["a".to_string()], &config);
        assert_eq!(scores.get("a"), Some(&1.0));
        assert!(scores.get("b").unwrap() < &1.0);
        assert!(scores.get("d").is_some());
    }

    #[test]
    fn bounded_expand_respects_budget() {
        let adjacency = chain_adjacency();
        let config = ExpansionConfig { max_depth: 5, budget: 2, allowed_kinds: vec![EdgeKind::ExplicitLink], decay: 0.9, bidirectional: false };
        let scores = bounded_expand(&adjacency, &["a".to_string()], &config);
        assert!(scores.len() <= 2);
    }

    #[test]
    fn meet_in_the_middle_finds_direct_path() {
        let adjacency = chain_adjacency();
        let path = meet_in_the_middle_path(&adjacency, "a", "d", 5).unwrap();
        assert_eq!(path.first(), Some(&"a".to_string()));
        assert_eq!(path.last(), Some(&"d".to_string()));
    }

    #[test]
    fn meet_in_the_middle_returns_none_when_unreachable() {
        let adjacency = Adjacency::from_edges(&[edge("a", "b", EdgeKind::ExplicitLink)]);
        assert!(meet_in_the_middle_path(&adjacency, "a", "z", 5).is_none());
    }

    #[test]
    fn restricted_shortest_path_prefers_fewer_hops() {
        let adjacency = chain_adjacency();
        let (path, hops, _) = restricted_shortest_path(&adjacency, "a", "c", &HashSet::new(), &HashSet::new()).unwrap();
        assert_eq!(hops, 1);
        assert_eq!(path, vec!["a".to_string(), "c".to_string()]);
    }

    #[test]
    fn yen_diverse_paths_finds_multiple_routes() {
        let adjacency = Adjacency::from_edges(&[
            edge("a", "b", EdgeKind::ExplicitLink),
            edge("b", "d", EdgeKind::ExplicitLink),
            edge("a", "c", EdgeKind::ExplicitLink),
            edge("c", "d", EdgeKind::ExplicitLink),
        ]);
        let config = KShortestConfig {
            k: 2,
            allowed_kinds: vec![EdgeKind::ExplicitLink],
            max_depth: 6,
            overlap_threshold: 0.99,
            max_candidates: 64,
            max_extra_hops: 4,
        };
        let paths = yen_diverse_paths(&adjacency, "a", "d", &config);
        assert_eq!(paths.len(), 2);
        assert_ne!(paths[0], paths[1]);
    }

    #[test]
    fn jaccard_overlap_of_identical_node_sets_is_one() {
        let a: HashSet<String> = ["x".to_string(), "y".to_string()].into_iter().collect();
        assert_eq!(jaccard_overlap(&a, &a), 1.0);
    }

    #[test]
    fn path_overlap_excludes_endpoints_for_short_paths() {
        // Two 3-node paths sharing only the endpoints: with endpoints
        // excluded, their interiors are disjoint, so overlap is 0, not 1.
        let a = vec!["src".to_string(), "mid1".to_string(), "dst".to_string()];
        let b = vec!["src".to_string(), "mid2".to_string(), "dst".to_string()];
        assert_eq!(path_overlap(&a, &b), 0.0);
    }

    #[test]
    fn path_overlap_includes_endpoints_for_long_paths() {
        let a: Vec<String> = ["a", "b", "c", "d", "e"].iter().map(|s| s.to_string()).collect();
        let b: Vec<String> = ["a", "x", "y", "z", "e"].iter().map(|s| s.to_string()).collect();
        // Shared endpoints count toward overlap once paths exceed 4 nodes.
        assert!(path_overlap(&a, &b) > 0.0);
    }
}
