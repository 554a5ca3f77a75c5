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

//! Relational graph over observed context keys.
//!
//! Nodes are context keys with enough episodes; an edge joins two keys whose
//! mean trajectory embeddings are similar. The graph is an index arena plus a
//! weight table keyed by `(i, j)` with `i < j`.
//!
//! # Invariants
//!
//! - Nodes are sorted by key, so the same snapshot always yields the same indices.
//! - Edge weights are cosine similarity clamped to [0.0, 1.0] and are at least
//!   `edge_threshold`.
//! - Embeddings and pair similarities are cached; only what changed since the
//!   previous build is recomputed.

use std::collections::BTreeMap;
use std::sync::Arc;

use hashbrown::{HashMap, HashSet};
use tracing::{debug, warn};

use crate::episodes::{EpisodeId, EpisodeSnapshot, InteractionEpisode, TrajectorySample};
use crate::error::{CcfError, CcfResult};
use crate::fingerprint::ContextKey;
use crate::storage::{DurableStore, StoreKey, StoreOp, StoreValue};

/// Dimensions of a trajectory embedding: four statistics for three channels.
pub const EMBEDDING_DIM: usize = 12;

// ─── Trajectory Embedding ───────────────────────────────────────────────────

/// Online mean / variance / trend / peak of one channel.
#[derive(Clone, Debug, Default)]
struct ChannelStats {
    count: usize,
    mean: f64,
    m2: f64,
    peak: Option<f32>,
    sum_x: f64,
    sum_x2: f64,
    sum_xy: f64,
    sum_y: f64,
}

impl ChannelStats {
    fn push(&mut self, value: f32) {
        let v = value as f64;
        let x = self.count as f64;

        self.count += 1;
        let delta = v - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (v - self.mean);

        self.peak = Some(self.peak.map_or(value, |p| p.max(value)));

        self.sum_x += x;
        self.sum_x2 += x * x;
        self.sum_xy += x * v;
        self.sum_y += v;
    }

    /// `[mean, variance, slope, peak]`.
    fn finish(&self) -> [f32; 4] {
        if self.count == 0 {
            return [0.0; 4];
        }
        let n = self.count as f64;
        let (variance, slope) = if self.count > 1 {
            let denom = self.sum_x2 - self.sum_x * self.sum_x / n;
            let slope = if denom.abs() < 1e-12 {
                0.0
            } else {
                (self.sum_xy - self.sum_x * self.sum_y / n) / denom
            };
            (self.m2 / (n - 1.0), slope)
        } else {
            (0.0, 0.0)
        };
        [
            self.mean as f32,
            variance as f32,
            slope as f32,
            self.peak.unwrap_or(0.0),
        ]
    }
}

/// 12-dimensional summary of a trajectory.
///
/// Layout: `[tension; coherence; energy]`, each as `[mean, variance, slope, peak]`.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TrajectoryEmbedding(pub [f32; EMBEDDING_DIM]);

impl TrajectoryEmbedding {
    /// Summarise a sample sequence.
    pub fn from_samples(samples: &[TrajectorySample]) -> Self {
        let mut channels: [ChannelStats; 3] = Default::default();
        for s in samples {
            channels[0].push(s.tension);
            channels[1].push(s.coherence);
            channels[2].push(s.energy);
        }
        let mut out = [0.0f32; EMBEDDING_DIM];
        for (c, stats) in channels.iter().enumerate() {
            out[c * 4..c * 4 + 4].copy_from_slice(&stats.finish());
        }
        Self(out)
    }

    /// Element-wise mean. Zero vector for an empty input.
    pub fn mean<'a>(items: impl IntoIterator<Item = &'a TrajectoryEmbedding>) -> Self {
        let mut sum = [0.0f32; EMBEDDING_DIM];
        let mut n = 0usize;
        for e in items {
            for (acc, v) in sum.iter_mut().zip(e.0.iter()) {
                *acc += v;
            }
            n += 1;
        }
        if n > 0 {
            for v in sum.iter_mut() {
                *v /= n as f32;
            }
        }
        Self(sum)
    }

    /// Cosine similarity clamped to [0.0, 1.0]. Zero when either vector has no magnitude.
    pub fn similarity(&self, other: &TrajectoryEmbedding) -> f32 {
        let mut dot = 0.0f32;
        let mut mag_a = 0.0f32;
        let mut mag_b = 0.0f32;
        for (a, b) in self.0.iter().zip(other.0.iter()) {
            dot += a * b;
            mag_a += a * a;
            mag_b += b * b;
        }
        let denom = mag_a.sqrt() * mag_b.sqrt();
        if denom < 1e-12 {
            0.0
        } else {
            (dot / denom).clamp(0.0, 1.0)
        }
    }

    /// Mean tension.
    pub fn tension_mean(&self) -> f32 {
        self.0[0]
    }

    /// Tension trend per sample.
    pub fn tension_slope(&self) -> f32 {
        self.0[2]
    }

    /// Highest tension.
    pub fn tension_peak(&self) -> f32 {
        self.0[3]
    }

    /// Mean coherence.
    pub fn coherence_mean(&self) -> f32 {
        self.0[4]
    }

    /// Coherence trend per sample.
    pub fn coherence_slope(&self) -> f32 {
        self.0[6]
    }
}

// ─── Graph ──────────────────────────────────────────────────────────────────

/// Weighted similarity graph over context keys.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RelationalGraph {
    nodes: Vec<ContextKey>,
    edges: BTreeMap<(usize, usize), f32>,
}

impl RelationalGraph {
    /// Build from explicit nodes and `(i, j, weight)` edges.
    ///
    /// Node order is kept as given. Self-loops, out-of-range indices and
    /// non-positive weights are dropped; weights are clamped to [0.0, 1.0] and
    /// a repeated pair keeps its last weight.
    pub fn from_parts(
        nodes: Vec<ContextKey>,
        edges: impl IntoIterator<Item = (usize, usize, f32)>,
    ) -> Self {
        let n = nodes.len();
        let mut table = BTreeMap::new();
        for (a, b, w) in edges {
            if a == b || a >= n || b >= n || w.is_nan() || w <= 0.0 {
                continue;
            }
            table.insert((a.min(b), a.max(b)), w.min(1.0));
        }
        Self { nodes, edges: table }
    }

    /// Node keys in index order.
    pub fn nodes(&self) -> &[ContextKey] {
        &self.nodes
    }

    /// Key of node `i`.
    pub fn key(&self, i: usize) -> Option<ContextKey> {
        self.nodes.get(i).copied()
    }

    /// Index of `key`, if it is a node.
    pub fn index_of(&self, key: &ContextKey) -> Option<usize> {
        self.nodes.iter().position(|k| k == key)
    }

    /// Number of nodes.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of edges.
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Weight between two nodes, 0.0 when there is no edge.
    pub fn weight(&self, a: usize, b: usize) -> f32 {
        self.edges
            .get(&(a.min(b), a.max(b)))
            .copied()
            .unwrap_or(0.0)
    }

    /// Edges as `(i, j, weight)` with `i < j`, in index order.
    pub fn edges(&self) -> impl Iterator<Item = (usize, usize, f32)> + '_ {
        self.edges.iter().map(|(&(a, b), &w)| (a, b, w))
    }

    /// Neighbours of node `i` with their weights.
    pub fn neighbors(&self, i: usize) -> Vec<(usize, f32)> {
        self.edges()
            .filter_map(|(a, b, w)| {
                if a == i {
                    Some((b, w))
                } else if b == i {
                    Some((a, w))
                } else {
                    None
                }
            })
            .collect()
    }

    /// Sum of all edge weights.
    pub fn total_weight(&self) -> f32 {
        self.edges.values().sum()
    }
}

// ─── Builder ────────────────────────────────────────────────────────────────

/// Graph construction tuning.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GraphConfig {
    /// Minimum similarity for an edge.
    pub edge_threshold: f32,
    /// Keys with fewer retained episodes are not nodes.
    pub min_episodes_per_context: usize,
    /// Above this node count, candidate pairs come from the store's similarity search.
    pub exhaustive_limit: usize,
    /// Neighbours requested per node from the similarity search.
    pub search_top_k: usize,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            edge_threshold: 0.3,
            min_episodes_per_context: 1,
            exhaustive_limit: 128,
            search_top_k: 16,
        }
    }
}

/// What the last build computed and what it reused.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BuildStats {
    /// Nodes in the graph.
    pub nodes: usize,
    /// Edges in the graph.
    pub edges: usize,
    /// Episode embeddings computed.
    pub episodes_embedded: usize,
    /// Episode embeddings served from cache.
    pub episodes_reused: usize,
    /// Node embeddings recomputed.
    pub nodes_recomputed: usize,
    /// Pair similarities computed.
    pub pairs_computed: usize,
    /// Pair similarities served from cache.
    pub pairs_reused: usize,
    /// Candidate pairs came from the store's similarity search.
    pub used_search: bool,
}

/// Identifies the episode window a node embedding was computed from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct NodeSignature {
    count: usize,
    first: EpisodeId,
    last: EpisodeId,
}

impl NodeSignature {
    fn of(episodes: &[Arc<InteractionEpisode>]) -> Option<Self> {
        Some(Self {
            count: episodes.len(),
            first: episodes.first()?.id,
            last: episodes.last()?.id,
        })
    }
}

/// Incremental graph builder. Lives on the recomputation worker.
pub struct RelationalGraphBuilder {
    config: GraphConfig,
    store: Option<Arc<dyn DurableStore>>,
    episode_cache: HashMap<EpisodeId, TrajectoryEmbedding>,
    node_cache: HashMap<ContextKey, (NodeSignature, TrajectoryEmbedding)>,
    pair_cache: HashMap<(ContextKey, ContextKey), f32>,
    indexed: HashSet<ContextKey>,
    last_stats: BuildStats,
}

impl RelationalGraphBuilder {
    /// Builder without a similarity-search backend.
    pub fn new(config: GraphConfig) -> Self {
        Self {
            config,
            store: None,
            episode_cache: HashMap::new(),
            node_cache: HashMap::new(),
            pair_cache: HashMap::new(),
            indexed: HashSet::new(),
            last_stats: BuildStats::default(),
        }
    }

    /// Use `store` for neighbour search on large graphs.
    pub fn with_store(mut self, store: Arc<dyn DurableStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Configuration in use.
    pub fn config(&self) -> &GraphConfig {
        &self.config
    }

    /// Statistics of the most recent build.
    pub fn last_stats(&self) -> BuildStats {
        self.last_stats
    }

    /// Cached mean embedding of a node from the most recent build.
    pub fn node_embedding(&self, key: &ContextKey) -> Option<TrajectoryEmbedding> {
        self.node_cache.get(key).map(|(_, e)| *e)
    }

    /// Build the graph for `snapshot`.
    pub fn build(&mut self, snapshot: &EpisodeSnapshot) -> RelationalGraph {
        let mut stats = BuildStats::default();
        let min_episodes = self.config.min_episodes_per_context.max(1);

        // ── episode + node embeddings ──
        let mut live_episodes: HashSet<EpisodeId> = HashSet::new();
        let mut nodes: Vec<ContextKey> = Vec::new();
        let mut node_embeddings: Vec<TrajectoryEmbedding> = Vec::new();
        let mut changed: HashSet<ContextKey> = HashSet::new();

        for (key, episodes) in snapshot.contexts() {
            for ep in episodes {
                live_episodes.insert(ep.id);
            }
            if episodes.len() < min_episodes {
                continue;
            }
            let Some(signature) = NodeSignature::of(episodes) else {
                continue;
            };
            let cached = self
                .node_cache
                .get(key)
                .filter(|(sig, _)| *sig == signature)
                .map(|(_, e)| *e);
            let embedding = match cached {
                Some(e) => e,
                None => {
                    let mut per_episode = Vec::with_capacity(episodes.len());
                    for ep in episodes {
                        let e = match self.episode_cache.get(&ep.id) {
                            Some(e) => {
                                stats.episodes_reused += 1;
                                *e
                            }
                            None => {
                                stats.episodes_embedded += 1;
                                let e = ep.embedding();
                                self.episode_cache.insert(ep.id, e);
                                e
                            }
                        };
                        per_episode.push(e);
                    }
                    let e = TrajectoryEmbedding::mean(per_episode.iter());
                    self.node_cache.insert(*key, (signature, e));
                    changed.insert(*key);
                    stats.nodes_recomputed += 1;
                    e
                }
            };
            nodes.push(*key);
            node_embeddings.push(embedding);
        }

        // ── cache pruning ──
        self.episode_cache.retain(|id, _| live_episodes.contains(id));
        let live_nodes: HashSet<ContextKey> = nodes.iter().copied().collect();
        self.node_cache.retain(|k, _| live_nodes.contains(k));
        self.pair_cache.retain(|(a, b), _| {
            live_nodes.contains(a)
                && live_nodes.contains(b)
                && !changed.contains(a)
                && !changed.contains(b)
        });

        // ── edges ──
        let candidates = if nodes.len() > self.config.exhaustive_limit {
            match self.search_candidates(&nodes, &node_embeddings, &changed) {
                Ok(c) => {
                    stats.used_search = true;
                    Some(c)
                }
                Err(err) => {
                    warn!(error = %err, nodes = nodes.len(), "similarity search failed, scanning all pairs");
                    None
                }
            }
        } else {
            None
        };

        let mut edges: Vec<(usize, usize, f32)> = Vec::new();
        let mut consider = |i: usize, j: usize, stats: &mut BuildStats| {
            let pair = (nodes[i], nodes[j]);
            let sim = match self.pair_cache.get(&pair) {
                Some(s) => {
                    stats.pairs_reused += 1;
                    *s
                }
                None => {
                    stats.pairs_computed += 1;
                    let s = node_embeddings[i].similarity(&node_embeddings[j]);
                    self.pair_cache.insert(pair, s);
                    s
                }
            };
            if sim >= self.config.edge_threshold && sim > 0.0 {
                edges.push((i, j, sim));
            }
        };
        match candidates {
            Some(pairs) => {
                for (i, j) in pairs {
                    consider(i, j, &mut stats);
                }
            }
            None => {
                for i in 0..nodes.len() {
                    for j in (i + 1)..nodes.len() {
                        consider(i, j, &mut stats);
                    }
                }
            }
        }

        let graph = RelationalGraph::from_parts(nodes, edges);
        stats.nodes = graph.node_count();
        stats.edges = graph.edge_count();
        debug!(
            nodes = stats.nodes,
            edges = stats.edges,
            pairs_computed = stats.pairs_computed,
            pairs_reused = stats.pairs_reused,
            search = stats.used_search,
            "relational graph built"
        );
        self.last_stats = stats;
        graph
    }

    /// Candidate `(i, j)` pairs (`i < j`) from the store's nearest-neighbour search.
    ///
    /// Node embeddings that changed are upserted first and departed nodes are
    /// removed from the index.
    fn search_candidates(
        &mut self,
        nodes: &[ContextKey],
        embeddings: &[TrajectoryEmbedding],
        changed: &HashSet<ContextKey>,
    ) -> CcfResult<Vec<(usize, usize)>> {
        let Some(store) = self.store.clone() else {
            return Err(CcfError::Storage("no similarity store configured".into()));
        };

        let mut ops = Vec::new();
        for (key, embedding) in nodes.iter().zip(embeddings) {
            if changed.contains(key) || !self.indexed.contains(key) {
                ops.push(StoreOp::Set(
                    StoreKey::embedding(key),
                    StoreValue::Embedding {
                        context: *key,
                        embedding: *embedding,
                    },
                ));
            }
        }
        let live: HashSet<ContextKey> = nodes.iter().copied().collect();
        let gone: Vec<ContextKey> = self
            .indexed
            .iter()
            .filter(|k| !live.contains(*k))
            .copied()
            .collect();
        for key in &gone {
            ops.push(StoreOp::Delete(StoreKey::embedding(key)));
        }
        if !ops.is_empty() {
            store.batch(&ops)?;
        }
        self.indexed = live;

        let mut pairs = std::collections::BTreeSet::new();
        for (i, embedding) in embeddings.iter().enumerate() {
            for hit in store.search(embedding, self.config.search_top_k + 1)? {
                let Ok(j) = nodes.binary_search(&hit.context) else {
                    continue;
                };
                if i != j {
                    pairs.insert((i.min(j), i.max(j)));
                }
            }
        }
        Ok(pairs.into_iter().collect())
    }
}

impl core::fmt::Debug for RelationalGraphBuilder {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RelationalGraphBuilder")
            .field("config", &self.config)
            .field("cached_episodes", &self.episode_cache.len())
            .field("cached_nodes", &self.node_cache.len())
            .field("cached_pairs", &self.pair_cache.len())
            .field("has_store", &self.store.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::episodes::CloseReason;
    use crate::fingerprint::*;

    fn key(b: BrightnessBand, n: NoiseBand) -> ContextKey {
        ContextKey {
            brightness: b,
            noise: n,
            presence: PresenceSignature::Close,
            motion: MotionContext::Static,
            orientation: Orientation::Upright,
            time_period: TimePeriod::Day,
        }
    }

    fn episode(id: u64, k: ContextKey, tension: f32, coherence: f32) -> Arc<InteractionEpisode> {
        let samples: Vec<TrajectorySample> = (0..10)
            .map(|_| TrajectorySample { tension, coherence, energy: 0.5 })
            .collect();
        Arc::new(
            InteractionEpisode::new(EpisodeId(id), k, 0, 9, CloseReason::SessionEnd, &samples)
                .unwrap(),
        )
    }

    #[test]
    fn test_embedding_stats() {
        let samples: Vec<TrajectorySample> = (0..5)
            .map(|i| TrajectorySample { tension: i as f32, coherence: 1.0, energy: 0.0 })
            .collect();
        let e = TrajectoryEmbedding::from_samples(&samples);
        assert!((e.tension_mean() - 2.0).abs() < 1e-6);
        assert!((e.0[1] - 2.5).abs() < 1e-6, "variance={}", e.0[1]);
        assert!((e.tension_slope() - 1.0).abs() < 1e-6);
        assert!((e.tension_peak() - 4.0).abs() < 1e-6);
        assert!((e.coherence_mean() - 1.0).abs() < 1e-6);
        assert_eq!(e.coherence_slope(), 0.0);
    }

    #[test]
    fn test_similarity_bounds() {
        let mut a = TrajectoryEmbedding::default();
        let mut b = TrajectoryEmbedding::default();
        a.0[0] = 1.0;
        b.0[0] = -1.0;
        assert_eq!(a.similarity(&b), 0.0);
        assert!((a.similarity(&a) - 1.0).abs() < 1e-6);
        assert_eq!(a.similarity(&TrajectoryEmbedding::default()), 0.0);
    }

    #[test]
    fn test_from_parts_normalises_pairs() {
        let a = key(BrightnessBand::Dark, NoiseBand::Quiet);
        let b = key(BrightnessBand::Dim, NoiseBand::Quiet);
        let g = RelationalGraph::from_parts(vec![a, b], vec![(1, 0, 0.7), (0, 0, 1.0), (0, 5, 1.0)]);
        assert_eq!(g.edge_count(), 1);
        assert!((g.weight(0, 1) - 0.7).abs() < 1e-6);
        assert_eq!(g.neighbors(0), vec![(1, 0.7)]);
    }

    #[test]
    fn test_nodes_sorted_and_thresholded() {
        let calm_a = key(BrightnessBand::Bright, NoiseBand::Quiet);
        let calm_b = key(BrightnessBand::Dim, NoiseBand::Quiet);
        let cfg = GraphConfig { min_episodes_per_context: 2, ..GraphConfig::default() };
        let snap = EpisodeSnapshot::from_contexts(vec![
            (calm_a, vec![episode(0, calm_a, 0.1, 0.8), episode(1, calm_a, 0.1, 0.8)]),
            (calm_b, vec![episode(2, calm_b, 0.1, 0.8), episode(3, calm_b, 0.12, 0.78)]),
            // below min_episodes
            (key(BrightnessBand::Dark, NoiseBand::Loud), vec![episode(4, calm_a, 0.9, 0.1)]),
        ]);
        let mut builder = RelationalGraphBuilder::new(cfg);
        let g = builder.build(&snap);
        assert_eq!(g.nodes(), &[calm_b, calm_a]);
        assert_eq!(g.edge_count(), 1);
        assert!(g.weight(0, 1) > 0.9);
    }

    #[test]
    fn test_rebuild_reuses_cache() {
        let a = key(BrightnessBand::Bright, NoiseBand::Quiet);
        let b = key(BrightnessBand::Dark, NoiseBand::Loud);
        let c = key(BrightnessBand::Dim, NoiseBand::Moderate);
        let mut builder = RelationalGraphBuilder::new(GraphConfig::default());
        let snap1 = EpisodeSnapshot::from_contexts(vec![
            (a, vec![episode(0, a, 0.1, 0.8)]),
            (b, vec![episode(1, b, 0.9, 0.1)]),
        ]);
        let g1 = builder.build(&snap1);
        assert_eq!(builder.last_stats().episodes_embedded, 2);
        assert_eq!(builder.last_stats().pairs_computed, 1);

        // Unchanged snapshot: nothing recomputed, identical graph.
        let g2 = builder.build(&snap1);
        assert_eq!(g1, g2);
        let s = builder.last_stats();
        assert_eq!((s.episodes_embedded, s.nodes_recomputed, s.pairs_computed), (0, 0, 0));
        assert_eq!(s.pairs_reused, 1);

        // New node: only its pairs are computed.
        let snap2 = EpisodeSnapshot::from_contexts(vec![
            (a, vec![episode(0, a, 0.1, 0.8)]),
            (b, vec![episode(1, b, 0.9, 0.1)]),
            (c, vec![episode(2, c, 0.5, 0.5)]),
        ]);
        builder.build(&snap2);
        let s = builder.last_stats();
        assert_eq!(s.nodes_recomputed, 1);
        assert_eq!(s.pairs_computed, 2);
        assert_eq!(s.pairs_reused, 1);
    }

    #[test]
    fn test_search_path_matches_exhaustive() {
        use crate::storage::MemoryStore;

        let keys: Vec<ContextKey> = [BrightnessBand::Dark, BrightnessBand::Dim, BrightnessBand::Bright]
            .into_iter()
            .flat_map(|b| {
                [NoiseBand::Quiet, NoiseBand::Moderate, NoiseBand::Loud]
                    .into_iter()
                    .map(move |n| key(b, n))
            })
            .collect();
        let contexts: Vec<_> = keys
            .iter()
            .enumerate()
            .map(|(i, k)| {
                let t = if i % 2 == 0 { 0.1 } else { 0.9 };
                (*k, vec![episode(i as u64, *k, t, 1.0 - t)])
            })
            .collect();
        let snap = EpisodeSnapshot::from_contexts(contexts);

        let mut exhaustive = RelationalGraphBuilder::new(GraphConfig::default());
        let full = exhaustive.build(&snap);

        let cfg = GraphConfig { exhaustive_limit: 2, search_top_k: keys.len(), ..GraphConfig::default() };
        let mut searching = RelationalGraphBuilder::new(cfg).with_store(Arc::new(MemoryStore::new()));
        let searched = searching.build(&snap);
        assert!(searching.last_stats().used_search);
        assert_eq!(full, searched);
    }
}
