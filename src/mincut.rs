/*
 * Notice of Provisional Patent Filing:
 * The methods and algorithms implemented in this file (specifically relating to
 * Contextual Coherence Fields and relational coherence accumulation) are the
 * subject of a United States Provisional Patent Application (63/988,438)
 * filed on February 23, 2026.
 *
 * This source code is licensed under the Business Source License 1.1.
 * See LICENSE and PATENTS.md in the root directory for full details.
 */

//! Context-group discovery by recursive global minimum cut.
//!
//! # Algorithm
//!
//! Stoer-Wagner global minimum cut on a dense working matrix. Each of the
//! V − 1 phases picks the most tightly connected vertex by a linear scan, so
//! a full cut costs O(V³). [`partition`] applies it recursively: a (sub-)graph is bisected
//! along its minimum cut whenever that cut is strictly lighter than the
//! personality-modulated threshold, and both halves are examined again.
//!
//! # Tie-breaks
//!
//! - Each phase starts from the lowest active index.
//! - The most tightly connected vertex is picked with a strict `>` scan in
//!   index order, so the lowest index wins ties.
//! - The best cut is replaced only by a strictly lighter one.
//! - Groups are emitted sorted, and ordered by their smallest node.
//!
//! Re-running on an unchanged graph therefore yields the identical partition.
//!
//! # Invariants
//!
//! - Every node appears in exactly one group.
//! - 0 or 1 nodes → one trivial group (or none for 0). An edgeless
//!   (sub-)graph → all singletons.

use tracing::debug;

use crate::fingerprint::ContextKey;
use crate::graph::RelationalGraph;
use crate::phase::Personality;

/// Partitioner tuning.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PartitionConfig {
    /// Cut threshold before personality modulation.
    pub base_cut_threshold: f32,
    /// Graphs with more nodes are partitioned approximately.
    pub exact_node_limit: usize,
    /// Acceptable severed-to-total similarity ratio before personality modulation.
    pub base_leakage_target: f32,
}

impl Default for PartitionConfig {
    fn default() -> Self {
        Self {
            base_cut_threshold: 0.3,
            exact_node_limit: 256,
            base_leakage_target: 0.2,
        }
    }
}

/// A single global minimum cut.
#[derive(Clone, Debug, PartialEq)]
pub struct MinCutResult {
    /// Side holding the lowest node index, sorted.
    pub side_a: Vec<usize>,
    /// The other side, sorted. Empty for graphs with fewer than two nodes.
    pub side_b: Vec<usize>,
    /// Total weight of edges crossing the cut.
    pub cut_weight: f32,
}

/// Disjoint groups of node indices covering a graph.
#[derive(Clone, Debug, PartialEq)]
pub struct Partition {
    groups: Vec<Vec<usize>>,
    /// Threshold the partition was computed with.
    pub cut_threshold: f32,
    /// True when the approximate component partition was used.
    pub approximate: bool,
}

impl Partition {
    fn normalized(mut groups: Vec<Vec<usize>>, cut_threshold: f32, approximate: bool) -> Self {
        for g in groups.iter_mut() {
            g.sort_unstable();
        }
        groups.retain(|g| !g.is_empty());
        groups.sort_by_key(|g| g[0]);
        Self {
            groups,
            cut_threshold,
            approximate,
        }
    }

    /// Groups of node indices, each sorted, ordered by smallest member.
    pub fn groups(&self) -> &[Vec<usize>] {
        &self.groups
    }

    /// Number of groups.
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    /// True when the graph had no nodes.
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Group index of each node, for a graph of `node_count` nodes.
    pub fn assignment(&self, node_count: usize) -> Vec<Option<usize>> {
        let mut out = vec![None; node_count];
        for (g, members) in self.groups.iter().enumerate() {
            for &m in members {
                if let Some(slot) = out.get_mut(m) {
                    *slot = Some(g);
                }
            }
        }
        out
    }

    /// Groups translated to context keys.
    pub fn to_keys(&self, graph: &RelationalGraph) -> Vec<Vec<ContextKey>> {
        self.groups
            .iter()
            .map(|g| g.iter().filter_map(|&i| graph.key(i)).collect())
            .collect()
    }
}

// ─── Stoer-Wagner ───────────────────────────────────────────────────────────

/// Dense working copy of a (sub-)graph.
struct CutGraph {
    /// `adj[i][j]` = weight between super-vertices `i` and `j`.
    adj: Vec<Vec<f32>>,
    active: Vec<bool>,
    /// Local vertices merged into each super-vertex.
    members: Vec<Vec<usize>>,
}

impl CutGraph {
    /// Restrict `graph` to `nodes` (original indices). Local index = position in `nodes`.
    fn restricted(graph: &RelationalGraph, nodes: &[usize]) -> Self {
        let n = nodes.len();
        let mut local = vec![usize::MAX; graph.node_count()];
        for (l, &orig) in nodes.iter().enumerate() {
            if let Some(slot) = local.get_mut(orig) {
                *slot = l;
            }
        }
        let mut adj = vec![vec![0.0f32; n]; n];
        for (a, b, w) in graph.edges() {
            let (la, lb) = (local[a], local[b]);
            if la != usize::MAX && lb != usize::MAX {
                adj[la][lb] = w;
                adj[lb][la] = w;
            }
        }
        Self {
            adj,
            active: vec![true; n],
            members: (0..n).map(|i| vec![i]).collect(),
        }
    }

    fn has_edges(&self) -> bool {
        self.adj.iter().any(|row| row.iter().any(|&w| w > 0.0))
    }

    /// One phase: grow A from the lowest active vertex. Returns `(s, t, cut_of_phase)`.
    fn phase(&self) -> (usize, usize, f32) {
        let n = self.adj.len();
        let active: Vec<usize> = (0..n).filter(|&i| self.active[i]).collect();
        let mut in_a = vec![false; n];
        let mut w = vec![0.0f32; n];

        let start = active[0];
        in_a[start] = true;
        for &v in &active {
            w[v] = self.adj[start][v];
        }
        let mut prev = start;
        let mut last = start;

        for _ in 1..active.len() {
            let mut best = usize::MAX;
            let mut best_w = f32::NEG_INFINITY;
            for &v in &active {
                if !in_a[v] && w[v] > best_w {
                    best = v;
                    best_w = w[v];
                }
            }
            prev = last;
            last = best;
            in_a[best] = true;
            for &v in &active {
                if !in_a[v] {
                    w[v] += self.adj[best][v];
                }
            }
        }

        let cut: f32 = active
            .iter()
            .filter(|&&v| v != last)
            .map(|&v| self.adj[last][v])
            .sum();
        (prev, last, cut)
    }

    /// Merge `t` into `s`.
    fn merge(&mut self, s: usize, t: usize) {
        self.active[t] = false;
        for i in 0..self.adj.len() {
            if i != s && i != t && self.active[i] {
                let w = self.adj[s][i] + self.adj[t][i];
                self.adj[s][i] = w;
                self.adj[i][s] = w;
            }
        }
        let moved = std::mem::take(&mut self.members[t]);
        self.members[s].extend(moved);
    }

    /// Global minimum cut over local indices. Returns `(t-side local indices, weight)`.
    fn min_cut(mut self) -> (Vec<usize>, f32) {
        let mut best_weight = f32::INFINITY;
        let mut best_side: Vec<usize> = Vec::new();
        while self.active.iter().filter(|&&a| a).count() > 1 {
            let (s, t, cut) = self.phase();
            if cut < best_weight {
                best_weight = cut;
                best_side = self.members[t].clone();
            }
            self.merge(s, t);
        }
        (best_side, best_weight)
    }
}

/// Split `nodes` by a local-index side into `(side_with_lowest, other)`, both sorted.
fn split_sides(nodes: &[usize], local_side: &[usize]) -> (Vec<usize>, Vec<usize>) {
    let mut in_side = vec![false; nodes.len()];
    for &l in local_side {
        in_side[l] = true;
    }
    let mut a = Vec::new();
    let mut b = Vec::new();
    for (l, &orig) in nodes.iter().enumerate() {
        if in_side[l] {
            b.push(orig);
        } else {
            a.push(orig);
        }
    }
    a.sort_unstable();
    b.sort_unstable();
    if a.is_empty() || (!b.is_empty() && b[0] < a[0]) {
        core::mem::swap(&mut a, &mut b);
    }
    (a, b)
}

/// Global minimum cut of the whole graph.
///
/// Fewer than two nodes: every node on `side_a`, weight 0.0.
pub fn stoer_wagner(graph: &RelationalGraph) -> MinCutResult {
    let nodes: Vec<usize> = (0..graph.node_count()).collect();
    min_cut_of(graph, &nodes)
}

fn min_cut_of(graph: &RelationalGraph, nodes: &[usize]) -> MinCutResult {
    if nodes.len() < 2 {
        return MinCutResult {
            side_a: nodes.to_vec(),
            side_b: Vec::new(),
            cut_weight: 0.0,
        };
    }
    let (side, weight) = CutGraph::restricted(graph, nodes).min_cut();
    let (side_a, side_b) = split_sides(nodes, &side);
    MinCutResult {
        side_a,
        side_b,
        cut_weight: weight,
    }
}

// ─── Recursive partition ────────────────────────────────────────────────────

/// Partition `graph` by recursive bisection at `cut_threshold`.
///
/// Above `config.exact_node_limit` nodes the graph is split into components of
/// edges reaching `cut_threshold` instead.
pub fn partition(graph: &RelationalGraph, cut_threshold: f32, config: &PartitionConfig) -> Partition {
    let n = graph.node_count();
    if n > config.exact_node_limit {
        debug!(nodes = n, limit = config.exact_node_limit, "approximate partition");
        return component_partition(graph, cut_threshold);
    }
    let mut groups = Vec::new();
    if n > 0 {
        let all: Vec<usize> = (0..n).collect();
        bisect(graph, &all, cut_threshold, &mut groups);
    }
    Partition::normalized(groups, cut_threshold, false)
}

fn bisect(graph: &RelationalGraph, nodes: &[usize], cut_threshold: f32, out: &mut Vec<Vec<usize>>) {
    if nodes.len() <= 1 {
        if !nodes.is_empty() {
            out.push(nodes.to_vec());
        }
        return;
    }

    let cut_graph = CutGraph::restricted(graph, nodes);
    if !cut_graph.has_edges() {
        out.extend(nodes.iter().map(|&v| vec![v]));
        return;
    }

    let (side, weight) = cut_graph.min_cut();
    if weight >= cut_threshold || side.is_empty() || side.len() == nodes.len() {
        out.push(nodes.to_vec());
        return;
    }

    let (a, b) = split_sides(nodes, &side);
    bisect(graph, &a, cut_threshold, out);
    bisect(graph, &b, cut_threshold, out);
}

/// Connected components over edges whose weight reaches `threshold`.
fn component_partition(graph: &RelationalGraph, threshold: f32) -> Partition {
    let n = graph.node_count();
    let mut parent: Vec<usize> = (0..n).collect();

    fn find(parent: &mut [usize], mut x: usize) -> usize {
        while parent[x] != x {
            parent[x] = parent[parent[x]];
            x = parent[x];
        }
        x
    }

    for (a, b, w) in graph.edges() {
        if w >= threshold {
            let (ra, rb) = (find(&mut parent, a), find(&mut parent, b));
            if ra != rb {
                // lower index becomes the root
                let (lo, hi) = (ra.min(rb), ra.max(rb));
                parent[hi] = lo;
            }
        }
    }

    let mut by_root: std::collections::BTreeMap<usize, Vec<usize>> = Default::default();
    for v in 0..n {
        let r = find(&mut parent, v);
        by_root.entry(r).or_default().push(v);
    }
    Partition::normalized(by_root.into_values().collect(), threshold, true)
}

/// Recursive min-cut partitioner with a personality-modulated threshold.
#[derive(Clone, Debug, Default)]
pub struct MinCutPartitioner {
    config: PartitionConfig,
}

impl MinCutPartitioner {
    /// Partitioner with `config`.
    pub fn new(config: PartitionConfig) -> Self {
        Self { config }
    }

    /// Configuration in use.
    pub fn config(&self) -> &PartitionConfig {
        &self.config
    }

    /// `base_cut_threshold × (0.5 + curiosity_drive)`.
    pub fn cut_threshold(&self, personality: &Personality) -> f32 {
        personality.modulate_cut_threshold(self.config.base_cut_threshold)
    }

    /// Partition with an explicit threshold.
    pub fn partition_with_threshold(&self, graph: &RelationalGraph, cut_threshold: f32) -> Partition {
        partition(graph, cut_threshold, &self.config)
    }

    /// Partition with the threshold derived from `personality`.
    pub fn partition(&self, graph: &RelationalGraph, personality: &Personality) -> Partition {
        self.partition_with_threshold(graph, self.cut_threshold(personality))
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
