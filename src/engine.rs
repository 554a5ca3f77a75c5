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

//! The tick-driven control loop.
//!
//! One call to [`CoherenceEngine::tick`] per control cycle:
//!
//! ```text
//! features ─▶ ContextKey ─▶ group (latest published table)
//!                              │
//!        outcome ─▶ record positive / negative
//!                              │
//!        instant ─▶ min(instant, context) ─▶ PhaseClassifier
//!                              │
//!      (tension, effective, energy) ─▶ EpisodeRecorder ─▶ EpisodeLog
//!                              │
//!              persistence batch  +  recomputation trigger
//! ```
//!
//! The accumulator store is owned here and never shared. Regrouping published
//! by the background worker is folded in at the start of the next tick.

use std::sync::Arc;
use std::time::Duration;

use hashbrown::HashSet;
use tracing::{debug, warn};

use crate::accumulator::{AccumulatorStore, RegroupStats};
use crate::config::EngineConfig;
use crate::episodes::{EpisodeId, EpisodeLog, EpisodeRecorder, InteractionEpisode, TrajectorySample};
use crate::error::CcfResult;
use crate::fingerprint::{ContextKey, FeatureSnapshot, FingerprintBuilder};
use crate::groups::{GroupId, GroupTable, PublishedGroups};
use crate::persist::PersistenceQueue;
use crate::phase::{PhaseClassification, PhaseClassifier, Personality};
use crate::scheduler::{RecomputationOutcome, RecomputationScheduler};
use crate::storage::{DurableStore, EpisodeRecord, MemoryStore, StoreKey, StoreOp, StoreValue};

/// Direction of an interaction event this tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum InteractionOutcome {
    /// Calm, engaged interaction. Grows trust.
    Positive,
    /// Startle or aversive event. Drops trust.
    Negative,
}

/// Per-tick input from the sensing collaborator.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TickInput {
    /// Discretised feature bands.
    pub features: FeatureSnapshot,
    /// Tension in [0.0, 1.0].
    pub tension: f32,
    /// Instantaneous calm in [0.0, 1.0].
    pub instant_coherence: f32,
    /// Energy in [0.0, 1.0].
    pub energy: f32,
    /// Interaction event, if one happened.
    pub outcome: Option<InteractionOutcome>,
}

/// What one tick produced.
#[derive(Clone, Debug, PartialEq)]
pub struct TickReport {
    /// Tick processed.
    pub tick: u64,
    /// Fingerprint of the tick.
    pub key: ContextKey,
    /// Group the fingerprint resolved to.
    pub group: GroupId,
    /// Earned trust of the group after this tick's update.
    pub context_coherence: f32,
    /// `min(instant, context)`.
    pub effective_coherence: f32,
    /// Phase after this tick.
    pub phase: PhaseClassification,
    /// Episode closed by this tick.
    pub closed_episode: Option<EpisodeId>,
    /// Regrouping folded in at the start of this tick.
    pub regrouped: Option<RegroupStats>,
    /// Recomputation generation requested by this tick.
    pub requested_generation: Option<u64>,
}

/// Relational-trust engine: fingerprints, trust store, phase and regrouping.
pub struct CoherenceEngine {
    config: EngineConfig,
    fingerprint: FingerprintBuilder,
    store: AccumulatorStore,
    classifier: PhaseClassifier,
    recorder: EpisodeRecorder,
    log: EpisodeLog,
    published: PublishedGroups,
    scheduler: RecomputationScheduler,
    persistence: PersistenceQueue,
    probed: HashSet<GroupId>,
    last: Option<LastTick>,
}

/// Inputs and gate output of the most recent tick.
#[derive(Clone, Copy, Debug)]
struct LastTick {
    tick: u64,
    key: ContextKey,
    instant: f32,
    effective: f32,
}

impl CoherenceEngine {
    /// Engine backed by `durable`, resuming from what it holds. Fails on an
    /// invalid configuration or an unreadable episode history, and when the
    /// recomputation worker cannot be started.
    pub fn new(config: EngineConfig, durable: Arc<dyn DurableStore>) -> CcfResult<Self> {
        config.validate()?;
        let published = PublishedGroups::new();
        match durable.get(&StoreKey::group_table()) {
            Ok(Some(StoreValue::GroupTable { generation, groups })) => {
                published.publish(GroupTable::from_partition(generation, groups));
                debug!(generation, "group table restored");
            }
            Ok(_) => {}
            Err(err) => warn!(error = %err, "group table read failed, starting with singletons"),
        }
        let (log, next_episode) = restore_episodes(&*durable, &config)?;
        let scheduler = RecomputationScheduler::new(
            config.schedule.clone(),
            config.graph.clone(),
            config.partition.clone(),
            published.clone(),
            Some(Arc::clone(&durable)),
        )?;
        Ok(Self {
            fingerprint: FingerprintBuilder::new(),
            store: AccumulatorStore::with_published(config.accumulator.clone(), published.clone()),
            classifier: PhaseClassifier::new(config.phase.clone(), 0),
            recorder: EpisodeRecorder::new(config.episodes.clone()).with_next_id(next_episode),
            log,
            published,
            scheduler,
            persistence: PersistenceQueue::new(durable, config.persistence.clone()),
            probed: HashSet::new(),
            last: None,
            config,
        })
    }

    /// Engine backed by a fresh [`MemoryStore`].
    pub fn in_memory(config: EngineConfig) -> CcfResult<Self> {
        Self::new(config, Arc::new(MemoryStore::new()))
    }

    /// Configuration in use.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Personality in use.
    pub fn personality(&self) -> &Personality {
        &self.config.personality
    }

    /// Replace the personality. Affects future deltas and recomputations only.
    pub fn set_personality(&mut self, personality: Personality) {
        self.config.personality = personality;
    }

    /// Process one control cycle.
    pub fn tick(&mut self, now: u64, input: &TickInput) -> TickReport {
        let key = self.fingerprint.build_or_unknown(&input.features);
        let regrouped = self.store.sync_groups();
        let group = self.store.group_of(&key);
        self.warm_start(group);

        let personality = &self.config.personality;
        match input.outcome {
            Some(InteractionOutcome::Positive) => {
                let delta = personality.modulate_coherence_gain(self.config.interaction.base_gain);
                self.store.record_positive(&key, delta, now);
            }
            Some(InteractionOutcome::Negative) => {
                let delta = personality.modulate_startle_drop(self.config.interaction.base_drop);
                self.store.record_negative(&key, delta, now);
            }
            None => {}
        }

        let instant = input.instant_coherence.clamp(0.0, 1.0);
        let context_coherence = self.store.context_coherence(&key, now);
        let effective_coherence = crate::accumulator::effective_coherence(instant, context_coherence);
        let phase = self.classifier.update(effective_coherence, input.tension, now);
        self.last = Some(LastTick { tick: now, key, instant, effective: effective_coherence });

        let sample = TrajectorySample {
            tension: input.tension.clamp(0.0, 1.0),
            coherence: effective_coherence,
            energy: input.energy.clamp(0.0, 1.0),
        };
        let closed = self.recorder.record(key, sample, now);
        let closed_episode = closed.as_ref().map(|ep| ep.id);
        let episode_op = closed.map(|ep| self.file_episode(ep));
        self.persist(episode_op, regrouped.is_some(), now);

        let requested_generation = self.maybe_recompute();

        TickReport {
            tick: now,
            key,
            group,
            context_coherence,
            effective_coherence,
            phase,
            closed_episode,
            regrouped,
            requested_generation,
        }
    }

    /// Close the open episode window and push all pending writes.
    pub fn end_session(&mut self, now: u64) -> Option<EpisodeId> {
        let closed = self.recorder.end_session();
        let id = closed.as_ref().map(|ep| ep.id);
        let episode_op = closed.map(|ep| self.file_episode(ep));
        self.persist(episode_op, false, now);
        if let Err(err) = self.persistence.drain() {
            warn!(error = %err, pending = self.persistence.pending(), "session end with unwritten batches");
        }
        id
    }

    /// `min(instant, context_coherence)` for the most recent tick's key and
    /// instant reading, evaluated at `tick`. 0.0 before the first tick.
    ///
    /// For the tick just processed this is exactly the gated value the phase
    /// was classified from. Groups published since are not folded in here.
    pub fn effective_coherence(&mut self, tick: u64) -> f32 {
        match self.last {
            Some(last) if last.tick == tick => last.effective,
            Some(last) => {
                let ctx = self.store.settled_coherence(&last.key, tick);
                crate::accumulator::effective_coherence(last.instant, ctx)
            }
            None => 0.0,
        }
    }

    /// Current phase.
    pub fn current_phase(&self) -> PhaseClassification {
        self.classifier.current()
    }

    /// Group `key` currently resolves to in the accumulator store.
    pub fn group_of(&self, key: &ContextKey) -> GroupId {
        self.store.group_of(key)
    }

    /// Latest published group table (may be newer than the store's until the next tick).
    pub fn published_groups(&self) -> Arc<GroupTable> {
        self.published.load()
    }

    /// Accumulator store, read-only.
    pub fn store(&self) -> &AccumulatorStore {
        &self.store
    }

    /// Episode log, read-only.
    pub fn episodes(&self) -> &EpisodeLog {
        &self.log
    }

    /// Batches still waiting for the durable store.
    pub fn pending_writes(&self) -> usize {
        self.persistence.pending()
    }

    /// Force a recomputation now. Returns the requested generation.
    pub fn request_recomputation(&mut self) -> CcfResult<u64> {
        let snapshot = self.log.snapshot();
        self.scheduler.request(snapshot, &self.config.personality)
    }

    /// Recomputation outcomes since the last poll.
    pub fn poll_recomputations(&self) -> Vec<RecomputationOutcome> {
        self.scheduler.poll()
    }

    /// Wait up to `timeout` for the next recomputation outcome.
    pub fn wait_for_recomputation(&self, timeout: Duration) -> Option<RecomputationOutcome> {
        self.scheduler.recv_outcome_timeout(timeout)
    }

    // ── Internal ──────────────────────────────────────────────────────────

    /// Pull a persisted accumulator for a group the store has never held.
    fn warm_start(&mut self, group: GroupId) {
        if self.store.contains(&group) || !self.probed.insert(group) {
            return;
        }
        match self.persistence.store().get(&StoreKey::accumulator(&group)) {
            Ok(Some(StoreValue::Accumulator { group: stored, accumulator })) if stored == group => {
                if self.store.restore(group, accumulator) {
                    debug!(%group, value = accumulator.value, "accumulator restored");
                }
            }
            Ok(_) => {}
            Err(err) => warn!(error = %err, %group, "accumulator read failed, starting cold"),
        }
    }

    fn file_episode(&mut self, episode: InteractionEpisode) -> StoreOp {
        let op = StoreOp::Set(
            StoreKey::episode(episode.id),
            StoreValue::Episode(EpisodeRecord::from(&episode)),
        );
        let appended = self.log.append(episode);
        self.scheduler.note_episode(appended.new_key);
        op
    }

    /// Accumulator changes, the closed episode and a new group table go out
    /// as one batch.
    fn persist(&mut self, episode_op: Option<StoreOp>, regrouped: bool, now: u64) {
        let delta = self.store.take_dirty();
        let mut ops: Vec<StoreOp> = Vec::with_capacity(delta.updated.len() + delta.retired.len() + 2);
        if regrouped {
            ops.push(StoreOp::Set(
                StoreKey::group_table(),
                StoreValue::group_table(self.store.table()),
            ));
        }
        for (group, accumulator) in delta.updated {
            ops.push(StoreOp::Set(
                StoreKey::accumulator(&group),
                StoreValue::Accumulator { group, accumulator },
            ));
        }
        for group in delta.retired {
            ops.push(StoreOp::Delete(StoreKey::accumulator(&group)));
        }
        ops.extend(episode_op);
        self.persistence.submit(ops, now);
    }

    fn maybe_recompute(&mut self) -> Option<u64> {
        let log = &self.log;
        match self
            .scheduler
            .maybe_request(log.key_count(), || log.snapshot(), &self.config.personality)
        {
            Ok(generation) => generation,
            Err(err) => {
                warn!(error = %err, "recomputation not dispatched");
                None
            }
        }
    }
}

/// Rebuild the episode log from persisted records. Returns the log and the
/// id the recorder continues from.
fn restore_episodes(durable: &dyn DurableStore, config: &EngineConfig) -> CcfResult<(EpisodeLog, u64)> {
    let mut log = EpisodeLog::new(config.episodes.clone());
    let mut records: Vec<EpisodeRecord> = durable
        .scan(StoreKey::EPISODE_PREFIX)?
        .into_iter()
        .filter_map(|(_, value)| match value {
            StoreValue::Episode(record) => Some(record),
            _ => None,
        })
        .collect();
    records.sort_by_key(|r| r.id);
    let next_id = records.last().map_or(0, |r| r.id.0.saturating_add(1));
    let mut restored = 0usize;
    for record in &records {
        if let Some(episode) = record.to_episode() {
            log.append(episode);
            restored += 1;
        }
    }
    if restored > 0 {
        debug!(restored, next_id, contexts = log.key_count(), "episode log restored");
    }
    Ok((log, next_id))
}

impl core::fmt::Debug for CoherenceEngine {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CoherenceEngine")
            .field("groups", &self.store.len())
            .field("generation", &self.store.table().generation())
            .field("episodes", &self.log.episode_count())
            .field("phase", &self.classifier.current())
            .field("pending_writes", &self.persistence.pending())
            .finish()
    }
}
