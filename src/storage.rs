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

//! Durable key-value / vector-search collaborator.
//!
//! The engine never owns a database. It talks to a [`DurableStore`]: point
//! reads and writes, an atomic multi-operation `batch`, and nearest-neighbour
//! `search` over trajectory embeddings. [`MemoryStore`] is the in-process
//! reference implementation used by tests and the demo.

use std::sync::Arc;

use hashbrown::HashMap;
use parking_lot::RwLock;

use crate::accumulator::CoherenceAccumulator;
use crate::episodes::{CloseReason, EpisodeId, InteractionEpisode, TrajectorySample};
use crate::error::{CcfError, CcfResult};
use crate::fingerprint::ContextKey;
use crate::graph::TrajectoryEmbedding;
use crate::groups::{GroupId, GroupTable};

// ─── Keys and values ────────────────────────────────────────────────────────

/// Namespaced storage key.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StoreKey(pub String);

impl StoreKey {
    /// Key of a group's accumulator.
    pub fn accumulator(group: &GroupId) -> Self {
        Self(format!("acc/{:08x}", group.representative().context_hash_u32()))
    }

    /// Key of a closed episode.
    pub fn episode(id: EpisodeId) -> Self {
        Self(format!("{}{:016x}", Self::EPISODE_PREFIX, id.0))
    }

    /// Key of a context's node embedding in the similarity index.
    pub fn embedding(context: &ContextKey) -> Self {
        Self(format!("embedding/{:08x}", context.context_hash_u32()))
    }

    /// Key of the current group table.
    pub fn group_table() -> Self {
        Self("groups/table".into())
    }

    /// Prefix shared by all episode keys.
    pub const EPISODE_PREFIX: &'static str = "episode/";

    /// True for keys in the similarity index.
    pub fn is_embedding(&self) -> bool {
        self.0.starts_with("embedding/")
    }
}

impl core::fmt::Display for StoreKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Owned, serialisable copy of a closed episode.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EpisodeRecord {
    /// Episode id.
    pub id: EpisodeId,
    /// Fingerprint of the window.
    pub context_key: ContextKey,
    /// First tick.
    pub start_tick: u64,
    /// Last tick.
    pub end_tick: u64,
    /// Why the window closed.
    pub close_reason: CloseReason,
    /// Recorded samples.
    pub samples: Vec<TrajectorySample>,
}

impl From<&InteractionEpisode> for EpisodeRecord {
    fn from(ep: &InteractionEpisode) -> Self {
        Self {
            id: ep.id,
            context_key: ep.context_key,
            start_tick: ep.start_tick,
            end_tick: ep.end_tick,
            close_reason: ep.close_reason,
            samples: ep.trajectory().to_vec(),
        }
    }
}

impl EpisodeRecord {
    /// Rebuild the in-memory episode. `None` when the record holds no samples.
    pub fn to_episode(&self) -> Option<InteractionEpisode> {
        InteractionEpisode::new(
            self.id,
            self.context_key,
            self.start_tick,
            self.end_tick,
            self.close_reason,
            &self.samples,
        )
    }
}

/// A stored value.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum StoreValue {
    /// A group's accumulator.
    Accumulator {
        /// Owning group.
        group: GroupId,
        /// Accumulator state.
        accumulator: CoherenceAccumulator,
    },
    /// A closed episode.
    Episode(EpisodeRecord),
    /// Group memberships of the live table.
    GroupTable {
        /// Table generation.
        generation: u64,
        /// Member keys per group.
        groups: Vec<Vec<ContextKey>>,
    },
    /// A context's node embedding.
    Embedding {
        /// Context the embedding summarises.
        context: ContextKey,
        /// Embedding vector.
        embedding: TrajectoryEmbedding,
    },
}

impl StoreValue {
    /// Persistable form of `table`.
    pub fn group_table(table: &GroupTable) -> Self {
        Self::GroupTable {
            generation: table.generation(),
            groups: table.groups().iter().map(|g| g.members.clone()).collect(),
        }
    }
}

/// One operation of an atomic batch.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum StoreOp {
    /// Insert or overwrite.
    Set(StoreKey, StoreValue),
    /// Remove if present.
    Delete(StoreKey),
}

impl StoreOp {
    /// Key the operation targets.
    pub fn key(&self) -> &StoreKey {
        match self {
            Self::Set(key, _) | Self::Delete(key) => key,
        }
    }
}

/// Nearest-neighbour result.
#[derive(Clone, Debug, PartialEq)]
pub struct SearchHit {
    /// Storage key of the match.
    pub key: StoreKey,
    /// Context the matched embedding belongs to.
    pub context: ContextKey,
    /// Similarity to the query in [0.0, 1.0].
    pub score: f32,
}

// ─── Trait ──────────────────────────────────────────────────────────────────

/// Durable storage consumed by the engine.
///
/// `batch` must apply all operations or none.
pub trait DurableStore: Send + Sync {
    /// Point read.
    fn get(&self, key: &StoreKey) -> CcfResult<Option<StoreValue>>;

    /// Point write.
    fn set(&self, key: StoreKey, value: StoreValue) -> CcfResult<()> {
        self.batch(&[StoreOp::Set(key, value)])
    }

    /// Apply `ops` atomically.
    fn batch(&self, ops: &[StoreOp]) -> CcfResult<()>;

    /// Up to `top_k` stored embeddings most similar to `query`, best first.
    fn search(&self, query: &TrajectoryEmbedding, top_k: usize) -> CcfResult<Vec<SearchHit>>;

    /// Every entry whose key starts with `prefix`, ordered by key.
    fn scan(&self, prefix: &str) -> CcfResult<Vec<(StoreKey, StoreValue)>>;
}

impl<S: DurableStore + ?Sized> DurableStore for Arc<S> {
    fn get(&self, key: &StoreKey) -> CcfResult<Option<StoreValue>> {
        (**self).get(key)
    }

    fn set(&self, key: StoreKey, value: StoreValue) -> CcfResult<()> {
        (**self).set(key, value)
    }

    fn batch(&self, ops: &[StoreOp]) -> CcfResult<()> {
        (**self).batch(ops)
    }

    fn search(&self, query: &TrajectoryEmbedding, top_k: usize) -> CcfResult<Vec<SearchHit>> {
        (**self).search(query, top_k)
    }

    fn scan(&self, prefix: &str) -> CcfResult<Vec<(StoreKey, StoreValue)>> {
        (**self).scan(prefix)
    }
}

// ─── In-memory reference store ──────────────────────────────────────────────

/// Hash-map store with brute-force cosine search.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<StoreKey, StoreValue>>,
}

impl MemoryStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// True when nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// All stored accumulators, ordered by group.
    pub fn accumulators(&self) -> Vec<(GroupId, CoherenceAccumulator)> {
        let mut out: Vec<_> = self
            .entries
            .read()
            .values()
            .filter_map(|v| match v {
                StoreValue::Accumulator { group, accumulator } => Some((*group, *accumulator)),
                _ => None,
            })
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    /// Number of stored episodes.
    pub fn episode_count(&self) -> usize {
        self.entries
            .read()
            .values()
            .filter(|v| matches!(v, StoreValue::Episode(_)))
            .count()
    }
}

impl DurableStore for MemoryStore {
    fn get(&self, key: &StoreKey) -> CcfResult<Option<StoreValue>> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn batch(&self, ops: &[StoreOp]) -> CcfResult<()> {
        let mut entries = self.entries.write();
        for op in ops {
            match op {
                StoreOp::Set(key, value) => {
                    entries.insert(key.clone(), value.clone());
                }
                StoreOp::Delete(key) => {
                    entries.remove(key);
                }
            }
        }
        Ok(())
    }

    fn search(&self, query: &TrajectoryEmbedding, top_k: usize) -> CcfResult<Vec<SearchHit>> {
        if top_k == 0 {
            return Ok(Vec::new());
        }
        let entries = self.entries.read();
        let mut hits: Vec<SearchHit> = entries
            .iter()
            .filter_map(|(key, value)| match value {
                StoreValue::Embedding { context, embedding } => Some(SearchHit {
                    key: key.clone(),
                    context: *context,
                    score: query.similarity(embedding),
                }),
                _ => None,
            })
            .collect();
        if hits.iter().any(|h| h.score.is_nan()) {
            return Err(CcfError::Storage("non-finite embedding in index".into()));
        }
        hits.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.context.cmp(&b.context))
        });
        hits.truncate(top_k);
        Ok(hits)
    }

    fn scan(&self, prefix: &str) -> CcfResult<Vec<(StoreKey, StoreValue)>> {
        let mut out: Vec<(StoreKey, StoreValue)> = self
            .entries
            .read()
            .iter()
            .filter(|(k, _)| k.0.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::*;

    fn key(b: BrightnessBand) -> ContextKey {
        ContextKey {
            brightness: b,
            noise: NoiseBand::Quiet,
            presence: PresenceSignature::Close,
            motion: MotionContext::Static,
            orientation: Orientation::Upright,
            time_period: TimePeriod::Day,
        }
    }

    fn emb(x: f32, y: f32) -> TrajectoryEmbedding {
        let mut v = [0.0; crate::graph::EMBEDDING_DIM];
        v[0] = x;
        v[1] = y;
        TrajectoryEmbedding(v)
    }

    fn index(store: &MemoryStore, k: ContextKey, e: TrajectoryEmbedding) {
        store
            .set(StoreKey::embedding(&k), StoreValue::Embedding { context: k, embedding: e })
            .unwrap();
    }

    #[test]
    fn test_keys_are_namespaced() {
        let k = key(BrightnessBand::Dark);
        assert!(StoreKey::embedding(&k).is_embedding());
        assert!(StoreKey::accumulator(&GroupId(k)).0.starts_with("acc/"));
        assert_eq!(StoreKey::episode(EpisodeId(7)).0, "episode/0000000000000007");
    }

    #[test]
    fn test_batch_set_and_delete() {
        let store = MemoryStore::new();
        let k = key(BrightnessBand::Dim);
        let acc_key = StoreKey::accumulator(&GroupId(k));
        store
            .batch(&[StoreOp::Set(
                acc_key.clone(),
                StoreValue::Accumulator { group: GroupId(k), accumulator: CoherenceAccumulator::new(3) },
            )])
            .unwrap();
        assert_eq!(store.accumulators().len(), 1);
        store.batch(&[StoreOp::Delete(acc_key.clone())]).unwrap();
        assert_eq!(store.get(&acc_key).unwrap(), None);
        assert!(store.is_empty());
    }

    #[test]
    fn test_scan_returns_prefix_in_key_order() {
        let store = MemoryStore::new();
        index(&store, key(BrightnessBand::Dark), emb(1.0, 0.0));
        index(&store, key(BrightnessBand::Bright), emb(0.0, 1.0));
        store
            .set(
                StoreKey::accumulator(&GroupId(key(BrightnessBand::Dim))),
                StoreValue::Accumulator { group: GroupId(key(BrightnessBand::Dim)), accumulator: CoherenceAccumulator::new(0) },
            )
            .unwrap();

        let hits = store.scan("embedding/").unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits[0].0 < hits[1].0);
        assert!(hits.iter().all(|(k, _)| k.is_embedding()));
        assert!(store.scan(StoreKey::EPISODE_PREFIX).unwrap().is_empty());
    }

    #[test]
    fn test_search_orders_by_similarity() {
        let store = MemoryStore::new();
        index(&store, key(BrightnessBand::Dark), emb(1.0, 0.0));
        index(&store, key(BrightnessBand::Dim), emb(0.7, 0.7));
        index(&store, key(BrightnessBand::Bright), emb(0.0, 1.0));

        let hits = store.search(&emb(1.0, 0.1), 2).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].context, key(BrightnessBand::Dark));
        assert_eq!(hits[1].context, key(BrightnessBand::Dim));
        assert!(hits[0].score >= hits[1].score);
    }

    #[test]
    fn test_search_returns_top_k_regardless_of_score() {
        let store = MemoryStore::new();
        index(&store, key(BrightnessBand::Dark), emb(1.0, 0.0));
        index(&store, key(BrightnessBand::Dim), emb(0.0, 1.0));
        let hits = store.search(&emb(1.0, 0.0), 10).unwrap();
        assert_eq!(hits.len(), 2);
        assert!(store.search(&emb(1.0, 0.0), 0).unwrap().is_empty());
    }

    #[test]
    fn test_episode_record_round_trips_to_episode() {
        let samples = [TrajectorySample { tension: 0.2, coherence: 0.4, energy: 0.5 }; 3];
        let ep = InteractionEpisode::new(
            EpisodeId(1),
            key(BrightnessBand::Dark),
            10,
            12,
            CloseReason::ContextChanged,
            &samples,
        )
        .unwrap();
        let record = EpisodeRecord::from(&ep);
        assert_eq!(record.to_episode().unwrap(), ep);
    }
}
