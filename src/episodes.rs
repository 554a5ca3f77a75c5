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

//! Interaction episodes: bounded trajectory windows filed under a context key.
//!
//! [`EpisodeRecorder`] accumulates `(tension, coherence, energy)` samples and
//! closes a window when the key changes, when the window reaches
//! `max_duration_ticks`, or at session end. Closed episodes are immutable and
//! live in the [`EpisodeLog`] behind `Arc`; the graph builder only ever holds
//! references.

use std::collections::BTreeSet;
use std::sync::Arc;

use hashbrown::HashMap;
use heapless::Deque;
use tracing::debug;

use crate::fingerprint::ContextKey;
use crate::graph::TrajectoryEmbedding;

/// Samples kept per episode. Older samples are dropped first.
pub const MAX_TRAJECTORY_SAMPLES: usize = 128;

/// One tick of interaction dynamics.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TrajectorySample {
    /// Tension in [0.0, 1.0].
    pub tension: f32,
    /// Effective coherence in [0.0, 1.0].
    pub coherence: f32,
    /// Energy in [0.0, 1.0].
    pub energy: f32,
}

/// Episode identifier, unique per recorder.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EpisodeId(pub u64);

/// Why a window closed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CloseReason {
    /// The fingerprint changed.
    ContextChanged,
    /// The window reached `max_duration_ticks`.
    MaxDuration,
    /// Explicit session end.
    SessionEnd,
}

/// Coarse reading of how an episode went, from its trajectory trends.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum EpisodeOutcome {
    /// Coherence rising while tension does not.
    Positive,
    /// Coherence falling, or a tension spike.
    Negative,
    /// Neither.
    Neutral,
}

/// A closed interaction window.
#[derive(Clone, Debug, PartialEq)]
pub struct InteractionEpisode {
    /// Episode id.
    pub id: EpisodeId,
    /// Fingerprint active for the whole window.
    pub context_key: ContextKey,
    /// First tick of the window.
    pub start_tick: u64,
    /// Last recorded tick (inclusive).
    pub end_tick: u64,
    /// Why the window closed.
    pub close_reason: CloseReason,
    /// Samples dropped because the window outgrew [`MAX_TRAJECTORY_SAMPLES`].
    pub dropped_samples: u32,
    trajectory: heapless::Vec<TrajectorySample, MAX_TRAJECTORY_SAMPLES>,
}

impl InteractionEpisode {
    /// Build an episode from recorded samples. Returns `None` when `samples`
    /// is empty; keeps the newest [`MAX_TRAJECTORY_SAMPLES`] otherwise.
    pub fn new(
        id: EpisodeId,
        context_key: ContextKey,
        start_tick: u64,
        end_tick: u64,
        close_reason: CloseReason,
        samples: &[TrajectorySample],
    ) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }
        let skip = samples.len().saturating_sub(MAX_TRAJECTORY_SAMPLES);
        let trajectory = samples[skip..].iter().copied().collect();
        Some(Self {
            id,
            context_key,
            start_tick,
            end_tick,
            close_reason,
            dropped_samples: skip as u32,
            trajectory,
        })
    }

    /// Samples in recording order.
    pub fn trajectory(&self) -> &[TrajectorySample] {
        &self.trajectory
    }

    /// Ticks covered, inclusive.
    pub fn duration_ticks(&self) -> u64 {
        self.end_tick.saturating_sub(self.start_tick) + 1
    }

    /// 12-dimensional summary of the trajectory.
    pub fn embedding(&self) -> TrajectoryEmbedding {
        TrajectoryEmbedding::from_samples(&self.trajectory)
    }

    /// Trend-based outcome.
    pub fn outcome(&self) -> EpisodeOutcome {
        let e = self.embedding();
        let (tension_slope, tension_peak) = (e.tension_slope(), e.tension_peak());
        let coherence_slope = e.coherence_slope();
        if coherence_slope > 0.001 && tension_slope <= 0.0 {
            EpisodeOutcome::Positive
        } else if coherence_slope < -0.001 || tension_peak > 0.8 {
            EpisodeOutcome::Negative
        } else {
            EpisodeOutcome::Neutral
        }
    }
}

// ─── Configuration ──────────────────────────────────────────────────────────

/// Episode windowing and retention.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EpisodeConfig {
    /// A window closes once it has been open this many ticks.
    pub max_duration_ticks: u64,
    /// Episodes retained per context key; the oldest is dropped beyond this.
    pub max_episodes_per_context: usize,
}

impl Default for EpisodeConfig {
    fn default() -> Self {
        Self {
            max_duration_ticks: 100,
            max_episodes_per_context: 32,
        }
    }
}

// ─── Recorder ───────────────────────────────────────────────────────────────

struct OpenWindow {
    key: ContextKey,
    start_tick: u64,
    last_tick: u64,
    samples: Deque<TrajectorySample, MAX_TRAJECTORY_SAMPLES>,
    dropped: u32,
}

impl OpenWindow {
    fn begin(key: ContextKey, now: u64) -> Self {
        Self {
            key,
            start_tick: now,
            last_tick: now,
            samples: Deque::new(),
            dropped: 0,
        }
    }

    fn push(&mut self, sample: TrajectorySample, now: u64) {
        if self.samples.is_full() {
            self.samples.pop_front();
            self.dropped = self.dropped.saturating_add(1);
        }
        // room was made above
        let _ = self.samples.push_back(sample);
        self.last_tick = now;
    }
}

/// Turns the per-tick sample stream into closed episodes.
pub struct EpisodeRecorder {
    config: EpisodeConfig,
    next_id: u64,
    open: Option<OpenWindow>,
}

impl EpisodeRecorder {
    /// Recorder with no open window.
    pub fn new(config: EpisodeConfig) -> Self {
        Self {
            config,
            next_id: 0,
            open: None,
        }
    }

    /// Continue numbering from `next_id` (after a warm start).
    pub fn with_next_id(mut self, next_id: u64) -> Self {
        self.next_id = next_id;
        self
    }

    /// Key of the open window, if any.
    pub fn current_key(&self) -> Option<ContextKey> {
        self.open.as_ref().map(|w| w.key)
    }

    /// Samples in the open window.
    pub fn open_len(&self) -> usize {
        self.open.as_ref().map_or(0, |w| w.samples.len())
    }

    /// Record one tick. Returns the episode closed by this tick, if any.
    ///
    /// The tick's own sample always lands in the (possibly new) open window.
    pub fn record(
        &mut self,
        key: ContextKey,
        sample: TrajectorySample,
        now: u64,
    ) -> Option<InteractionEpisode> {
        let reason = match &self.open {
            Some(w) if w.key != key => Some(CloseReason::ContextChanged),
            Some(w) if now.saturating_sub(w.start_tick) >= self.config.max_duration_ticks => {
                Some(CloseReason::MaxDuration)
            }
            _ => None,
        };
        if self.open.is_none() {
            self.open = Some(OpenWindow::begin(key, now));
        }

        let closed = reason.and_then(|r| {
            let ep = self.close(r);
            self.open = Some(OpenWindow::begin(key, now));
            ep
        });

        if let Some(w) = self.open.as_mut() {
            w.push(sample, now);
        }
        closed
    }

    /// Close whatever is open.
    pub fn end_session(&mut self) -> Option<InteractionEpisode> {
        self.close(CloseReason::SessionEnd)
    }

    fn close(&mut self, reason: CloseReason) -> Option<InteractionEpisode> {
        let w = self.open.take()?;
        if w.samples.is_empty() {
            return None;
        }
        let samples: Vec<TrajectorySample> = w.samples.iter().copied().collect();
        let id = EpisodeId(self.next_id);
        let mut ep = InteractionEpisode::new(id, w.key, w.start_tick, w.last_tick, reason, &samples)?;
        ep.dropped_samples = w.dropped;
        self.next_id += 1;
        debug!(
            episode = id.0,
            context = %w.key,
            ticks = ep.duration_ticks(),
            reason = ?reason,
            "episode closed"
        );
        Some(ep)
    }
}

impl Default for EpisodeRecorder {
    fn default() -> Self {
        Self::new(EpisodeConfig::default())
    }
}

// ─── Log ────────────────────────────────────────────────────────────────────

/// Result of [`EpisodeLog::append`].
#[derive(Clone, Debug)]
pub struct Appended {
    /// Shared handle to the stored episode.
    pub episode: Arc<InteractionEpisode>,
    /// True if this is the first episode ever seen for its key.
    pub new_key: bool,
}

/// Closed episodes, bounded per context key.
#[derive(Default)]
pub struct EpisodeLog {
    config: EpisodeConfig,
    by_key: HashMap<ContextKey, Vec<Arc<InteractionEpisode>>>,
    total_appended: u64,
}

impl EpisodeLog {
    /// Empty log.
    pub fn new(config: EpisodeConfig) -> Self {
        Self {
            config,
            by_key: HashMap::new(),
            total_appended: 0,
        }
    }

    /// File an episode under its key, dropping the oldest beyond the retention bound.
    pub fn append(&mut self, episode: InteractionEpisode) -> Appended {
        let key = episode.context_key;
        let episode = Arc::new(episode);
        let new_key = !self.by_key.contains_key(&key);
        let list = self.by_key.entry(key).or_default();
        list.push(Arc::clone(&episode));
        let cap = self.config.max_episodes_per_context.max(1);
        if list.len() > cap {
            let excess = list.len() - cap;
            list.drain(..excess);
        }
        self.total_appended += 1;
        Appended { episode, new_key }
    }

    /// Retained episodes for a key, oldest first.
    pub fn episodes_for(&self, key: &ContextKey) -> &[Arc<InteractionEpisode>] {
        self.by_key.get(key).map_or(&[], |v| v.as_slice())
    }

    /// Every key with at least one episode, sorted.
    pub fn all_keys(&self) -> BTreeSet<ContextKey> {
        self.by_key.keys().copied().collect()
    }

    /// Retained episodes across all keys.
    pub fn episode_count(&self) -> usize {
        self.by_key.values().map(Vec::len).sum()
    }

    /// Episodes ever appended, including ones since dropped.
    pub fn total_appended(&self) -> u64 {
        self.total_appended
    }

    /// Number of observed keys.
    pub fn key_count(&self) -> usize {
        self.by_key.len()
    }

    /// Immutable view for the recomputation worker. Episodes are shared, not copied.
    pub fn snapshot(&self) -> EpisodeSnapshot {
        let mut contexts: Vec<(ContextKey, Vec<Arc<InteractionEpisode>>)> = self
            .by_key
            .iter()
            .map(|(k, v)| (*k, v.clone()))
            .collect();
        contexts.sort_by(|a, b| a.0.cmp(&b.0));
        EpisodeSnapshot {
            contexts,
            total_appended: self.total_appended,
        }
    }
}

/// Frozen, key-sorted view of the episode log.
#[derive(Clone, Debug, Default)]
pub struct EpisodeSnapshot {
    contexts: Vec<(ContextKey, Vec<Arc<InteractionEpisode>>)>,
    total_appended: u64,
}

impl EpisodeSnapshot {
    /// Snapshot from explicit per-key episode lists.
    pub fn from_contexts(contexts: Vec<(ContextKey, Vec<Arc<InteractionEpisode>>)>) -> Self {
        let mut contexts = contexts;
        contexts.sort_by(|a, b| a.0.cmp(&b.0));
        contexts.dedup_by(|a, b| a.0 == b.0);
        let total_appended = contexts.iter().map(|(_, v)| v.len() as u64).sum();
        Self {
            contexts,
            total_appended,
        }
    }

    /// `(key, episodes)` pairs in key order.
    pub fn contexts(&self) -> &[(ContextKey, Vec<Arc<InteractionEpisode>>)] {
        &self.contexts
    }

    /// Episodes for one key.
    pub fn episodes_for(&self, key: &ContextKey) -> &[Arc<InteractionEpisode>] {
        self.contexts
            .binary_search_by(|(k, _)| k.cmp(key))
            .map_or(&[], |i| self.contexts[i].1.as_slice())
    }

    /// Number of keys.
    pub fn key_count(&self) -> usize {
        self.contexts.len()
    }

    /// Episodes appended to the log when the snapshot was taken.
    pub fn total_appended(&self) -> u64 {
        self.total_appended
    }
}
