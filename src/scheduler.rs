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

//! Out-of-band recomputation of coherence groups.
//!
//! The tick loop reports closed episodes. Once enough relational novelty has
//! accumulated, a [`RecomputationJob`] carrying an immutable episode snapshot
//! is handed to a worker thread, which builds the relational graph, partitions
//! it and publishes the resulting [`GroupTable`] with one atomic swap.
//!
//! ```text
//! tick loop ──job──▶ worker: graph ─▶ min-cut ─▶ bleeding edges ─▶ publish
//!     ▲                                                                │
//!     └───────────── AccumulatorStore::sync_groups() ◀── ArcSwap ◀─────┘
//! ```
//!
//! Jobs are generation-stamped. A job whose generation is older than the most
//! recently requested one is discarded without publishing.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use tracing::{debug, info, warn};

use crate::bleeding::{find_bleeding_edges, BleedingEdge, Granularity};
use crate::episodes::EpisodeSnapshot;
use crate::error::{CcfError, CcfResult};
use crate::graph::{GraphConfig, RelationalGraphBuilder};
use crate::groups::{GroupTable, PublishedGroups};
use crate::mincut::{MinCutPartitioner, PartitionConfig};
use crate::phase::Personality;
use crate::storage::DurableStore;

/// Trigger cadence and execution mode.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ScheduleConfig {
    /// Without a new key, recompute after this many episodes per observed context.
    pub episodes_per_context: u64,
    /// Never recompute before this many episodes have closed since the last run.
    pub min_episodes_between: u64,
    /// Run on a worker thread. `false` recomputes inline on the caller.
    pub background: bool,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            episodes_per_context: 10,
            min_episodes_between: 10,
            background: true,
        }
    }
}

/// Work item for the recomputation worker.
#[derive(Clone, Debug)]
pub struct RecomputationJob {
    /// Generation the resulting table is stamped with.
    pub generation: u64,
    /// Episodes to build the graph from.
    pub snapshot: EpisodeSnapshot,
    /// Personality-modulated cut threshold.
    pub cut_threshold: f32,
    /// Personality-modulated leakage target.
    pub leakage_target: f32,
}

/// What happened to a job.
#[derive(Clone, Debug, PartialEq)]
pub enum RecomputationOutcome {
    /// A new table went live.
    Published {
        /// Generation of the table.
        generation: u64,
        /// Graph nodes partitioned.
        nodes: usize,
        /// Groups in the table.
        groups: usize,
        /// Severed share of similarity.
        leakage_ratio: f32,
        /// Resolution judgement against the leakage target.
        granularity: Granularity,
        /// Similarity edges the partition severed, in graph index order.
        bleeding_edges: Vec<BleedingEdge>,
    },
    /// Too few nodes to partition; the previous table stays live.
    Retained {
        /// Generation of the job.
        generation: u64,
        /// Graph nodes found.
        nodes: usize,
    },
    /// A newer job was requested first; nothing was published.
    Superseded {
        /// Generation of the discarded job.
        generation: u64,
        /// Newest requested generation at discard time.
        latest: u64,
    },
}

impl RecomputationOutcome {
    /// Generation of the job this outcome belongs to.
    pub fn generation(&self) -> u64 {
        match self {
            Self::Published { generation, .. }
            | Self::Retained { generation, .. }
            | Self::Superseded { generation, .. } => *generation,
        }
    }
}

// ─── Worker ─────────────────────────────────────────────────────────────────

/// Graph build + partition + publish. Owned by the worker thread, or by the
/// scheduler itself in inline mode.
struct Worker {
    builder: RelationalGraphBuilder,
    partitioner: MinCutPartitioner,
    published: PublishedGroups,
    requested: Arc<AtomicU64>,
}

impl Worker {
    fn superseded(&self, generation: u64) -> Option<RecomputationOutcome> {
        let latest = self.requested.load(Ordering::Acquire);
        (generation < latest).then(|| {
            warn!(generation, latest, "recomputation superseded, discarding");
            RecomputationOutcome::Superseded { generation, latest }
        })
    }

    fn run(&mut self, job: RecomputationJob) -> RecomputationOutcome {
        if let Some(out) = self.superseded(job.generation) {
            return out;
        }

        let graph = self.builder.build(&job.snapshot);
        let nodes = graph.node_count();
        if nodes < 2 {
            debug!(generation = job.generation, nodes, "too few nodes, keeping current groups");
            return RecomputationOutcome::Retained {
                generation: job.generation,
                nodes,
            };
        }

        let partition = self.partitioner.partition_with_threshold(&graph, job.cut_threshold);
        let leakage = find_bleeding_edges(&graph, &partition);
        let granularity = leakage.assess(job.leakage_target);

        if let Some(out) = self.superseded(job.generation) {
            return out;
        }
        let table = GroupTable::from_partition(job.generation, partition.to_keys(&graph));
        let groups = table.group_count();
        if !self.published.publish(table) {
            let latest = self.published.generation();
            warn!(generation = job.generation, latest, "newer table already published");
            return RecomputationOutcome::Superseded {
                generation: job.generation,
                latest,
            };
        }

        let leakage_ratio = leakage.leakage_ratio();
        info!(
            generation = job.generation,
            nodes,
            edges = graph.edge_count(),
            groups,
            bleeding_edges = leakage.edges.len(),
            leakage_ratio,
            ?granularity,
            approximate = partition.approximate,
            "coherence groups published"
        );
        RecomputationOutcome::Published {
            generation: job.generation,
            nodes,
            groups,
            leakage_ratio,
            granularity,
            bleeding_edges: leakage.edges,
        }
    }
}

fn worker_loop(
    mut worker: Worker,
    jobs: Receiver<RecomputationJob>,
    outcomes: Sender<RecomputationOutcome>,
) {
    while let Ok(mut job) = jobs.recv() {
        // Only the newest queued job is worth computing.
        while let Ok(newer) = jobs.try_recv() {
            let _ = outcomes.send(RecomputationOutcome::Superseded {
                generation: job.generation,
                latest: newer.generation,
            });
            job = newer;
        }
        if outcomes.send(worker.run(job)).is_err() {
            break;
        }
    }
    debug!("recomputation worker stopped");
}

enum Mode {
    Inline(Box<Worker>),
    Background {
        jobs: Option<Sender<RecomputationJob>>,
        handle: Option<JoinHandle<()>>,
    },
}

// ─── Scheduler ──────────────────────────────────────────────────────────────

/// Decides when to recompute and dispatches the work.
pub struct RecomputationScheduler {
    config: ScheduleConfig,
    partition: PartitionConfig,
    published: PublishedGroups,
    requested: Arc<AtomicU64>,
    episodes_since: u64,
    new_key_since: bool,
    mode: Mode,
    outcomes_tx: Sender<RecomputationOutcome>,
    outcomes_rx: Receiver<RecomputationOutcome>,
}

impl RecomputationScheduler {
    /// Scheduler publishing into `published`. Spawns the worker thread when
    /// `schedule.background` is set.
    pub fn new(
        schedule: ScheduleConfig,
        graph: GraphConfig,
        partition: PartitionConfig,
        published: PublishedGroups,
        store: Option<Arc<dyn DurableStore>>,
    ) -> CcfResult<Self> {
        let requested = Arc::new(AtomicU64::new(published.generation()));
        let mut builder = RelationalGraphBuilder::new(graph);
        if let Some(store) = store {
            builder = builder.with_store(store);
        }
        let worker = Worker {
            builder,
            partitioner: MinCutPartitioner::new(partition.clone()),
            published: published.clone(),
            requested: Arc::clone(&requested),
        };
        let (outcomes_tx, outcomes_rx) = crossbeam_channel::unbounded();

        let mode = if schedule.background {
            let (jobs_tx, jobs_rx) = crossbeam_channel::unbounded();
            let tx = outcomes_tx.clone();
            let handle = std::thread::Builder::new()
                .name("ccf-recompute".into())
                .spawn(move || worker_loop(worker, jobs_rx, tx))
                .map_err(|_| CcfError::WorkerUnavailable)?;
            Mode::Background {
                jobs: Some(jobs_tx),
                handle: Some(handle),
            }
        } else {
            Mode::Inline(Box::new(worker))
        };

        Ok(Self {
            config: schedule,
            partition,
            published,
            requested,
            episodes_since: 0,
            new_key_since: false,
            mode,
            outcomes_tx,
            outcomes_rx,
        })
    }

    /// Cadence configuration.
    pub fn config(&self) -> &ScheduleConfig {
        &self.config
    }

    /// Handle to the published table.
    pub fn published(&self) -> &PublishedGroups {
        &self.published
    }

    /// Highest generation requested so far.
    pub fn requested_generation(&self) -> u64 {
        self.requested.load(Ordering::Acquire)
    }

    /// Episodes closed since the last dispatch.
    pub fn episodes_since_last(&self) -> u64 {
        self.episodes_since
    }

    /// Count one closed episode. `new_key` marks the first episode of a key.
    pub fn note_episode(&mut self, new_key: bool) {
        self.episodes_since += 1;
        self.new_key_since |= new_key;
    }

    /// Trigger rule for `observed_contexts` keys in the log.
    ///
    /// ```text
    /// due = since ≥ min_episodes_between
    ///     ∧ (new key seen ∨ since ≥ episodes_per_context × observed_contexts)
    /// ```
    pub fn is_due(&self, observed_contexts: usize) -> bool {
        if self.episodes_since < self.config.min_episodes_between {
            return false;
        }
        let volume = self
            .config
            .episodes_per_context
            .saturating_mul(observed_contexts as u64);
        self.new_key_since || self.episodes_since >= volume
    }

    /// Dispatch a job if due. `snapshot` is only taken when a job is sent.
    pub fn maybe_request(
        &mut self,
        observed_contexts: usize,
        snapshot: impl FnOnce() -> EpisodeSnapshot,
        personality: &Personality,
    ) -> CcfResult<Option<u64>> {
        if !self.is_due(observed_contexts) {
            return Ok(None);
        }
        self.request(snapshot(), personality).map(Some)
    }

    /// Dispatch a job unconditionally and reset the trigger counters.
    pub fn request(&mut self, snapshot: EpisodeSnapshot, personality: &Personality) -> CcfResult<u64> {
        let generation = self.requested.fetch_add(1, Ordering::AcqRel) + 1;
        let job = RecomputationJob {
            generation,
            snapshot,
            cut_threshold: personality.modulate_cut_threshold(self.partition.base_cut_threshold),
            leakage_target: personality.modulate_leakage_target(self.partition.base_leakage_target),
        };
        debug!(
            generation,
            keys = job.snapshot.key_count(),
            episodes_since = self.episodes_since,
            cut_threshold = job.cut_threshold,
            "recomputation requested"
        );
        self.episodes_since = 0;
        self.new_key_since = false;

        match &mut self.mode {
            Mode::Inline(worker) => {
                let outcome = worker.run(job);
                let _ = self.outcomes_tx.send(outcome);
            }
            Mode::Background { jobs, .. } => {
                let tx = jobs.as_ref().ok_or(CcfError::WorkerUnavailable)?;
                tx.send(job).map_err(|_| CcfError::WorkerUnavailable)?;
            }
        }
        Ok(generation)
    }

    /// Outcomes reported since the last poll, oldest first. Never blocks.
    pub fn poll(&self) -> Vec<RecomputationOutcome> {
        self.outcomes_rx.try_iter().collect()
    }

    /// Wait up to `timeout` for the next outcome.
    pub fn recv_outcome_timeout(&self, timeout: Duration) -> Option<RecomputationOutcome> {
        self.outcomes_rx.recv_timeout(timeout).ok()
    }
}

impl Drop for RecomputationScheduler {
    fn drop(&mut self) {
        if let Mode::Background { jobs, handle } = &mut self.mode {
            // Closing the channel ends the worker loop.
            jobs.take();
            if let Some(handle) = handle.take() {
                if handle.join().is_err() {
                    warn!("recomputation worker panicked");
                }
            }
        }
    }
}

impl core::fmt::Debug for RecomputationScheduler {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RecomputationScheduler")
            .field("config", &self.config)
            .field("requested", &self.requested_generation())
            .field("published", &self.published.generation())
            .field("episodes_since", &self.episodes_since)
            .field("new_key_since", &self.new_key_since)
            .finish()
    }
}
