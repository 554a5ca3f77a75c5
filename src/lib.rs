//! # ccf-relational
//!
//! Contextual Coherence Fields: earned relational trust, grouped by experience.
//!
//! Patent pending: US Provisional Application 63/988,438 (priority date 23 Feb 2026).
//!
//! ---
//!
//! ## Trust is situational
//!
//! A robot should never express more social confidence than it has earned in
//! the situation it is in. A single global comfort scalar cannot do this, so
//! every situational fingerprint (a [`ContextKey`]) maps to its own earned
//! trust value. Which fingerprints are *the same relationship* is not
//! configured: it is discovered from how interactions in them actually unfold.
//!
//! **Context-keyed accumulators.** Trust grows with repeated positive
//! interaction, drops on startles, and relaxes toward an earned floor when a
//! context is left idle.
//!
//! **The minimum gate.** Effective coherence is `min(instant, context)`.
//! > "Both must be true, or I stay reserved."
//!
//! **Min-cut grouping.** Closed interaction episodes are summarised as
//! trajectory embeddings; contexts whose trajectories look alike are joined by
//! weighted edges, and recursive Stoer-Wagner bisection cuts the graph where
//! the similarity is weakest. Each resulting group shares one accumulator.
//! > "This room feels like that room."
//!
//! ## The pipeline
//!
//! ```text
//! FeatureSnapshot → ContextKey → GroupId → CoherenceAccumulator
//!                                   ↑            │ min(instant, ·)
//!                            GroupTable (ArcSwap)  ▼
//!                                   ↑        PhaseClassifier → SocialPhase
//!   EpisodeLog → RelationalGraph → MinCut ──┘
//!        ↑            (background worker)
//!   EpisodeRecorder ← (tension, effective coherence, energy) per tick
//! ```
//!
//! ## Module overview
//!
//! | Module | Key types | What it does |
//! |--------|-----------|--------------|
//! | [`fingerprint`] | [`ContextKey`], [`FingerprintBuilder`] | Banded features → context key |
//! | [`accumulator`] | [`CoherenceAccumulator`], [`AccumulatorStore`] | Per-group trust with earned floor, lazy decay, merge/split |
//! | [`phase`] | [`SocialPhase`], [`PhaseClassifier`], [`Personality`] | Four-quadrant classifier with Schmitt-trigger hysteresis |
//! | [`episodes`] | [`InteractionEpisode`], [`EpisodeLog`] | Bounded interaction trajectories |
//! | [`graph`] | [`RelationalGraph`], [`RelationalGraphBuilder`] | Trajectory-similarity graph with caching |
//! | [`mincut`] | [`MinCutPartitioner`] | Recursive Stoer-Wagner partitioning |
//! | [`bleeding`] | [`LeakageReport`] | Severed cross-group similarity |
//! | [`groups`] | [`GroupTable`], [`PublishedGroups`] | Generation-stamped group assignment, atomically published |
//! | [`scheduler`] | [`RecomputationScheduler`] | Novelty-driven background recomputation |
//! | [`storage`] | [`DurableStore`], [`MemoryStore`] | Durable KV / vector-search collaborator |
//! | [`persist`] | [`PersistenceQueue`] | Write-behind batches with backoff |
//! | [`engine`] | [`CoherenceEngine`] | The tick-driven control loop |
//! | [`seg`] | [`seg::CcfSegSnapshot`] | Serialisable trust-field snapshot (requires `serde` feature) |
//!
//! ## Quick start
//!
//! ```rust
//! use ccf_relational::{CoherenceEngine, EngineConfig, TickInput, InteractionOutcome, SocialPhase};
//! use ccf_relational::fingerprint::*;
//!
//! let mut engine = CoherenceEngine::in_memory(EngineConfig::default()).unwrap();
//! let input = TickInput {
//!     features: FeatureSnapshot::complete(
//!         BrightnessBand::Bright,
//!         NoiseBand::Quiet,
//!         PresenceSignature::Close,
//!         MotionContext::Static,
//!         Orientation::Upright,
//!         TimePeriod::Day,
//!     ),
//!     tension: 0.1,
//!     instant_coherence: 0.9,
//!     energy: 0.5,
//!     outcome: Some(InteractionOutcome::Positive),
//! };
//! let report = engine.tick(0, &input);
//! assert!(report.effective_coherence <= 0.9);
//! assert_eq!(engine.current_phase().quadrant, SocialPhase::ShyObserver);
//! ```
//!
//! ## License
//!
//! Business Source License 1.1. Free for evaluation and non-production use.
//! Change date: 23 February 2032, then Apache License 2.0.
//! Commercial production use requires a license from Flout Labs (cbyrne@floutlabs.com).

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod error;
pub mod fingerprint;
pub mod accumulator;
pub mod phase;
pub mod episodes;
pub mod graph;
pub mod mincut;
pub mod bleeding;
pub mod groups;
pub mod scheduler;
pub mod storage;
pub mod persist;
pub mod config;
pub mod engine;
#[cfg(feature = "serde")]
pub mod seg;

pub use accumulator::{AccumulatorConfig, AccumulatorStore, CoherenceAccumulator};
pub use bleeding::{BleedingEdge, Granularity, LeakageReport};
pub use config::{EngineConfig, InteractionConfig};
pub use engine::{CoherenceEngine, InteractionOutcome, TickInput, TickReport};
pub use episodes::{EpisodeLog, EpisodeRecorder, InteractionEpisode, TrajectorySample};
pub use error::{CcfError, CcfResult};
pub use fingerprint::{ContextKey, FeatureSnapshot, FingerprintBuilder};
pub use graph::{RelationalGraph, RelationalGraphBuilder, TrajectoryEmbedding};
pub use groups::{CoherenceGroup, GroupId, GroupTable, PublishedGroups};
pub use mincut::{MinCutPartitioner, Partition};
pub use persist::PersistenceQueue;
pub use phase::{Personality, PhaseClassification, PhaseClassifier, PhaseSpace, SocialPhase};
pub use scheduler::{RecomputationOutcome, RecomputationScheduler, ScheduleConfig};
pub use storage::{DurableStore, MemoryStore};
