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

//! Per-group coherence accumulators and the min-gate.
//!
//! - [`CoherenceAccumulator`]: earned trust with asymptotic growth, proportional
//!   drops and lazy idle decay toward an earned floor.
//! - [`AccumulatorStore`]: one accumulator per coherence group, reconciled
//!   against the latest published [`GroupTable`] before every update.
//! - [`effective_coherence`]: `min(instant, context)`.
//!
//! # Invariants
//!
//! - `value` is bounded [0.0, 1.0] for every update sequence.
//! - Decay never takes `value` below `floor(count) = min(0.3, 0.01 × count)`.
//! - An idle interval is decayed at most once.
//! - Deltas arrive pre-scaled by personality. The store never reads personality.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use hashbrown::{HashMap, HashSet};
use tracing::debug;

use crate::fingerprint::ContextKey;
use crate::groups::{GroupId, GroupTable, PublishedGroups};

/// Floor ceiling: no amount of history protects more than this.
pub const MAX_EARNED_FLOOR: f32 = 0.3;

/// Floor earned per positive interaction.
pub const FLOOR_PER_INTERACTION: f32 = 0.01;

/// Effective coherence gate: the robot never expresses more calm than it has
/// earned in this context.
pub fn effective_coherence(instant: f32, context: f32) -> f32 {
    instant.clamp(0.0, 1.0).min(context)
}

// ─── Configuration ──────────────────────────────────────────────────────────

/// Idle-decay tuning.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AccumulatorConfig {
    /// Ticks without interaction before decay starts.
    pub decay_idle_ticks: u64,
    /// Fraction of the distance to the floor lost per idle tick, in [0.0, 1.0].
    pub decay_rate: f32,
}

impl Default for AccumulatorConfig {
    fn default() -> Self {
        Self {
            decay_idle_ticks: 100,
            decay_rate: 0.001,
        }
    }
}

// ─── Coherence Accumulator ──────────────────────────────────────────────────

/// Earned trust for one coherence group.
///
/// Grows through repeated positive interaction, drops on negative events and
/// relaxes toward its earned floor when left idle.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CoherenceAccumulator {
    /// Accumulated coherence [0.0, 1.0].
    pub value: f32,
    /// Positive interactions recorded.
    pub interaction_count: u32,
    /// Tick of the most recent interaction (positive or negative).
    pub last_interaction_tick: u64,
    /// Tick up to which idle decay has been applied.
    pub last_decay_tick: u64,
}

impl CoherenceAccumulator {
    /// Fresh accumulator at zero coherence, stamped `now`.
    pub fn new(now: u64) -> Self {
        Self {
            value: 0.0,
            interaction_count: 0,
            last_interaction_tick: now,
            last_decay_tick: now,
        }
    }

    /// Minimum coherence that interaction history protects against idle decay.
    ///
    /// ```text
    /// floor = min(0.3, 0.01 × count)
    ///   count =  0 → 0.00
    ///   count = 10 → 0.10
    ///   count ≥ 30 → 0.30
    /// ```
    pub fn floor(&self) -> f32 {
        (FLOOR_PER_INTERACTION * self.interaction_count as f32).min(MAX_EARNED_FLOOR)
    }

    /// Positive interaction: `value += delta × (1 − value)`.
    pub fn record_positive(&mut self, delta_up: f32, now: u64) {
        let d = delta_up.clamp(0.0, 1.0);
        self.value = (self.value + d * (1.0 - self.value)).clamp(0.0, 1.0);
        self.interaction_count = self.interaction_count.saturating_add(1);
        self.touch(now);
    }

    /// Negative interaction: `value −= delta × value`.
    ///
    /// The drop is proportional and is not held at the floor; only idle decay
    /// respects it.
    pub fn record_negative(&mut self, delta_down: f32, now: u64) {
        let d = delta_down.clamp(0.0, 1.0);
        self.value = (self.value - d * self.value).clamp(0.0, 1.0);
        self.touch(now);
    }

    fn touch(&mut self, now: u64) {
        self.last_interaction_tick = now;
        self.last_decay_tick = self.last_decay_tick.max(now);
    }

    /// Apply idle decay up to `now`. Returns `true` if `value` changed.
    ///
    /// Decay starts `decay_idle_ticks` after the last interaction and resumes
    /// from wherever the previous call stopped.
    pub fn decay(&mut self, now: u64, config: &AccumulatorConfig) -> bool {
        let idle_start = self
            .last_interaction_tick
            .saturating_add(config.decay_idle_ticks);
        let from = idle_start.max(self.last_decay_tick);
        if now <= from {
            return false;
        }
        self.last_decay_tick = now;

        let floor = self.floor();
        if self.value <= floor {
            return false;
        }
        let keep = (1.0 - config.decay_rate.clamp(0.0, 1.0)).powf((now - from) as f32);
        let next = (floor + (self.value - floor) * keep).clamp(floor, 1.0);
        let changed = next != self.value;
        self.value = next;
        changed
    }
}

/// Merge accumulators into one.
///
/// Value is the interaction-count-weighted mean (plain mean when no source has
/// interactions), counts are summed and tick stamps take the latest.
pub fn merge_accumulators(sources: &[CoherenceAccumulator]) -> Option<CoherenceAccumulator> {
    match sources {
        [] => None,
        [only] => Some(*only),
        _ => {
            let total: u64 = sources.iter().map(|a| a.interaction_count as u64).sum();
            let value = if total == 0 {
                sources.iter().map(|a| a.value).sum::<f32>() / sources.len() as f32
            } else {
                sources
                    .iter()
                    .map(|a| a.value * a.interaction_count as f32)
                    .sum::<f32>()
                    / total as f32
            };
            Some(CoherenceAccumulator {
                value: value.clamp(0.0, 1.0),
                interaction_count: total.min(u32::MAX as u64) as u32,
                last_interaction_tick: sources
                    .iter()
                    .map(|a| a.last_interaction_tick)
                    .max()
                    .unwrap_or(0),
                last_decay_tick: sources.iter().map(|a| a.last_decay_tick).max().unwrap_or(0),
            })
        }
    }
}

// ─── Accumulator Store ──────────────────────────────────────────────────────

/// Accumulator changes since the last drain, for persistence.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StoreDelta {
    /// Groups whose accumulator changed, with the current state.
    pub updated: Vec<(GroupId, CoherenceAccumulator)>,
    /// Groups whose accumulator no longer exists.
    pub retired: Vec<GroupId>,
}

impl StoreDelta {
    /// True if nothing changed.
    pub fn is_empty(&self) -> bool {
        self.updated.is_empty() && self.retired.is_empty()
    }
}

/// Outcome of reconciling the store against a newer group table.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RegroupStats {
    /// Target groups built from more than one source.
    pub merged: usize,
    /// Target groups copied from a source shared with another target.
    pub split: usize,
    /// Source accumulators that disappeared.
    pub retired: usize,
}

/// One accumulator per coherence group.
///
/// Exclusively owned by the control loop. Group boundaries come from the
/// latest [`GroupTable`] published by the recomputation worker; the store
/// reconciles against it in one `&mut` step before touching any accumulator.
pub struct AccumulatorStore {
    config: AccumulatorConfig,
    accumulators: HashMap<GroupId, CoherenceAccumulator>,
    table: Arc<GroupTable>,
    published: Option<PublishedGroups>,
    dirty: HashSet<GroupId>,
    retired: HashSet<GroupId>,
}

impl AccumulatorStore {
    /// Store with no published-table subscription. Every key is a singleton
    /// until [`apply_table`](Self::apply_table) is called.
    pub fn new(config: AccumulatorConfig) -> Self {
        Self {
            config,
            accumulators: HashMap::new(),
            table: Arc::new(GroupTable::empty()),
            published: None,
            dirty: HashSet::new(),
            retired: HashSet::new(),
        }
    }

    /// Store that follows `published`.
    pub fn with_published(config: AccumulatorConfig, published: PublishedGroups) -> Self {
        let mut store = Self::new(config);
        store.published = Some(published);
        store.sync_groups();
        store
    }

    /// Decay configuration.
    pub fn config(&self) -> &AccumulatorConfig {
        &self.config
    }

    /// Table the accumulators are currently keyed by.
    pub fn table(&self) -> &Arc<GroupTable> {
        &self.table
    }

    /// Group of `key` under the reconciled table.
    pub fn group_of(&self, key: &ContextKey) -> GroupId {
        self.table.group_of(key)
    }

    // ── Reads ─────────────────────────────────────────────────────────────

    /// Current accumulator for `key`'s group, created at `{0, 0, now}` when unseen.
    ///
    /// Lazy decay is applied before returning.
    pub fn get_or_create(&mut self, key: &ContextKey, now: u64) -> &CoherenceAccumulator {
        self.sync_groups();
        let gid = self.table.group_of(key);
        self.entry(gid, now)
    }

    /// Earned coherence of `key`'s group at `now`. Unseen groups read 0.0
    /// and are not created.
    pub fn context_coherence(&mut self, key: &ContextKey, now: u64) -> f32 {
        self.sync_groups();
        self.settled_coherence(key, now)
    }

    /// Like [`context_coherence`](Self::context_coherence) but read under the
    /// table already reconciled; a newer published table is left for the
    /// next mutating call.
    pub fn settled_coherence(&mut self, key: &ContextKey, now: u64) -> f32 {
        let gid = self.table.group_of(key);
        match self.accumulators.get_mut(&gid) {
            Some(acc) => {
                if acc.decay(now, &self.config) {
                    self.dirty.insert(gid);
                }
                acc.value
            }
            None => 0.0,
        }
    }

    /// `min(instant, context_coherence(key, now))`.
    pub fn effective_coherence(&mut self, instant: f32, key: &ContextKey, now: u64) -> f32 {
        let ctx = self.context_coherence(key, now);
        effective_coherence(instant, ctx)
    }

    /// Accumulator of a group without decay or reconciliation.
    pub fn peek(&self, group: &GroupId) -> Option<&CoherenceAccumulator> {
        self.accumulators.get(group)
    }

    /// True if the group has an accumulator.
    pub fn contains(&self, group: &GroupId) -> bool {
        self.accumulators.contains_key(group)
    }

    /// Number of live accumulators.
    pub fn len(&self) -> usize {
        self.accumulators.len()
    }

    /// True if no accumulator exists.
    pub fn is_empty(&self) -> bool {
        self.accumulators.is_empty()
    }

    /// Iterate over `(group, accumulator)` pairs in arbitrary order.
    pub fn iter(&self) -> impl Iterator<Item = (&GroupId, &CoherenceAccumulator)> {
        self.accumulators.iter()
    }

    // ── Updates ───────────────────────────────────────────────────────────

    /// Record a positive interaction. Returns the new value.
    pub fn record_positive(&mut self, key: &ContextKey, delta_up: f32, now: u64) -> f32 {
        self.sync_groups();
        let gid = self.table.group_of(key);
        let acc = self.entry(gid, now);
        acc.record_positive(delta_up, now);
        let value = acc.value;
        self.dirty.insert(gid);
        value
    }

    /// Record a negative interaction. Returns the new value.
    pub fn record_negative(&mut self, key: &ContextKey, delta_down: f32, now: u64) -> f32 {
        self.sync_groups();
        let gid = self.table.group_of(key);
        let acc = self.entry(gid, now);
        acc.record_negative(delta_down, now);
        let value = acc.value;
        self.dirty.insert(gid);
        value
    }

    /// Apply lazy decay to `key`'s group. Returns the value after decay, or
    /// `None` when the group has no accumulator.
    pub fn decay(&mut self, key: &ContextKey, now: u64) -> Option<f32> {
        self.sync_groups();
        let gid = self.table.group_of(key);
        let acc = self.accumulators.get_mut(&gid)?;
        if acc.decay(now, &self.config) {
            self.dirty.insert(gid);
        }
        Some(acc.value)
    }

    /// Apply lazy decay to every accumulator. Returns how many changed.
    pub fn decay_all(&mut self, now: u64) -> usize {
        self.sync_groups();
        let mut changed = 0;
        for (gid, acc) in self.accumulators.iter_mut() {
            if acc.decay(now, &self.config) {
                self.dirty.insert(*gid);
                changed += 1;
            }
        }
        changed
    }

    /// Warm start: install a persisted accumulator for a group that has none.
    ///
    /// Returns `false` and keeps the live state when the group already exists.
    pub fn restore(&mut self, group: GroupId, acc: CoherenceAccumulator) -> bool {
        if self.accumulators.contains_key(&group) {
            return false;
        }
        let mut acc = acc;
        acc.value = acc.value.clamp(0.0, 1.0);
        self.accumulators.insert(group, acc);
        self.retired.remove(&group);
        true
    }

    // ── Regrouping ────────────────────────────────────────────────────────

    /// Fold `sources` into `into` (count-weighted). `into` may be one of the
    /// sources. Returns the merged accumulator, or `None` if no source had one.
    pub fn merge(&mut self, sources: &[GroupId], into: GroupId) -> Option<CoherenceAccumulator> {
        let mut accs = Vec::with_capacity(sources.len());
        for gid in sources {
            if let Some(acc) = self.accumulators.remove(gid) {
                accs.push(acc);
                if *gid != into {
                    self.retire(*gid);
                }
            }
        }
        let merged = merge_accumulators(&accs)?;
        self.accumulators.insert(into, merged);
        self.mark(into);
        Some(merged)
    }

    /// Give every child a copy of `parent`'s accumulator. The parent is
    /// removed unless it is one of the children. Returns `false` if the parent
    /// had no accumulator.
    pub fn split(&mut self, parent: GroupId, children: &[GroupId]) -> bool {
        let Some(acc) = self.accumulators.get(&parent).copied() else {
            return false;
        };
        if !children.contains(&parent) {
            self.accumulators.remove(&parent);
            self.retire(parent);
        }
        for child in children {
            self.accumulators.insert(*child, acc);
            self.mark(*child);
        }
        true
    }

    /// Reconcile with the latest published table if it is newer.
    ///
    /// Returns the regroup stats when a reconciliation happened.
    pub fn sync_groups(&mut self) -> Option<RegroupStats> {
        let latest = self.published.as_ref()?.load();
        if latest.generation() <= self.table.generation() {
            return None;
        }
        Some(self.apply_table(latest))
    }

    /// Re-key the accumulators from the current table to `next`.
    ///
    /// Each target group is built from the accumulators of the groups its
    /// members belonged to. Several sources merge; a source feeding several
    /// targets is split (copied). Accumulators untouched by the change keep
    /// their identity.
    pub fn apply_table(&mut self, next: Arc<GroupTable>) -> RegroupStats {
        let prev = Arc::clone(&self.table);

        // target -> old groups its members came from
        let mut plan: BTreeMap<GroupId, BTreeSet<GroupId>> = BTreeMap::new();
        for group in next.groups() {
            let sources = plan.entry(group.id).or_default();
            for m in &group.members {
                sources.insert(prev.group_of(m));
            }
        }
        for (key, _) in prev.assignments() {
            if !next.contains(key) {
                plan.entry(GroupId(*key))
                    .or_default()
                    .insert(prev.group_of(key));
            }
        }
        plan.retain(|_, sources| {
            sources.retain(|s| self.accumulators.contains_key(s));
            !sources.is_empty()
        });

        let mut fan_out: HashMap<GroupId, usize> = HashMap::new();
        for sources in plan.values() {
            for s in sources {
                *fan_out.entry(*s).or_insert(0) += 1;
            }
        }

        let mut stats = RegroupStats::default();
        let mut built: Vec<(GroupId, CoherenceAccumulator)> = Vec::with_capacity(plan.len());
        for (target, sources) in &plan {
            if sources.len() == 1 && sources.contains(target) {
                continue;
            }
            let accs: Vec<CoherenceAccumulator> = sources
                .iter()
                .filter_map(|s| self.accumulators.get(s).copied())
                .collect();
            if let Some(acc) = merge_accumulators(&accs) {
                if accs.len() > 1 {
                    stats.merged += 1;
                } else if sources.iter().any(|s| fan_out.get(s).copied().unwrap_or(0) > 1) {
                    stats.split += 1;
                }
                built.push((*target, acc));
            }
        }

        let targets: BTreeSet<GroupId> = plan.keys().copied().collect();
        for source in fan_out.keys() {
            if !targets.contains(source) && self.accumulators.remove(source).is_some() {
                self.retire(*source);
                stats.retired += 1;
            }
        }
        for (target, acc) in built {
            self.accumulators.insert(target, acc);
            self.mark(target);
        }

        debug!(
            from = prev.generation(),
            to = next.generation(),
            merged = stats.merged,
            split = stats.split,
            retired = stats.retired,
            "regrouping applied"
        );
        self.table = next;
        stats
    }

    // ── Persistence support ───────────────────────────────────────────────

    /// Drain the set of changed and retired groups.
    pub fn take_dirty(&mut self) -> StoreDelta {
        let mut updated: Vec<(GroupId, CoherenceAccumulator)> = self
            .dirty
            .drain()
            .filter_map(|g| self.accumulators.get(&g).map(|a| (g, *a)))
            .collect();
        updated.sort_by(|a, b| a.0.cmp(&b.0));
        let mut retired: Vec<GroupId> = self.retired.drain().collect();
        retired.sort();
        StoreDelta { updated, retired }
    }

    // ── Internal helpers ──────────────────────────────────────────────────

    fn entry(&mut self, gid: GroupId, now: u64) -> &mut CoherenceAccumulator {
        let acc = self
            .accumulators
            .entry(gid)
            .or_insert_with(|| CoherenceAccumulator::new(now));
        if acc.decay(now, &self.config) {
            self.dirty.insert(gid);
        }
        acc
    }

    fn mark(&mut self, gid: GroupId) {
        self.retired.remove(&gid);
        self.dirty.insert(gid);
    }

    fn retire(&mut self, gid: GroupId) {
        self.dirty.remove(&gid);
        self.retired.insert(gid);
    }
}

impl Default for AccumulatorStore {
    fn default() -> Self {
        Self::new(AccumulatorConfig::default())
    }
}

impl core::fmt::Debug for AccumulatorStore {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AccumulatorStore")
            .field("groups", &self.accumulators.len())
            .field("generation", &self.table.generation())
            .field("dirty", &self.dirty.len())
            .finish()
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
