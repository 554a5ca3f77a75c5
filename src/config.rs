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

//! Aggregate engine configuration.

use crate::accumulator::AccumulatorConfig;
use crate::episodes::EpisodeConfig;
use crate::error::{CcfError, CcfResult};
use crate::graph::GraphConfig;
use crate::mincut::PartitionConfig;
use crate::persist::PersistenceConfig;
use crate::phase::{Personality, PhaseSpace};
use crate::scheduler::ScheduleConfig;

/// Every tunable of a [`CoherenceEngine`](crate::engine::CoherenceEngine).
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct EngineConfig {
    /// Phase thresholds.
    pub phase: PhaseSpace,
    /// Personality modulators.
    pub personality: Personality,
    /// Unmodulated interaction magnitudes.
    pub interaction: InteractionConfig,
    /// Idle decay.
    pub accumulator: AccumulatorConfig,
    /// Episode windowing and retention.
    pub episodes: EpisodeConfig,
    /// Relational graph construction.
    pub graph: GraphConfig,
    /// Min-cut partitioning.
    pub partition: PartitionConfig,
    /// Recomputation cadence.
    pub schedule: ScheduleConfig,
    /// Persistence retry policy.
    pub persistence: PersistenceConfig,
}

/// Base deltas before personality scaling.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct InteractionConfig {
    /// Base positive delta, scaled by `recovery_speed`.
    pub base_gain: f32,
    /// Base negative delta, scaled by `startle_sensitivity`.
    pub base_drop: f32,
}

impl Default for InteractionConfig {
    fn default() -> Self {
        Self {
            base_gain: 0.05,
            base_drop: 0.2,
        }
    }
}

fn unit(name: &str, v: f32) -> CcfResult<()> {
    if (0.0..=1.0).contains(&v) {
        Ok(())
    } else {
        Err(CcfError::InvalidConfig(format!("{name} must lie in [0, 1], got {v}")))
    }
}

fn nonzero(name: &str, v: u64) -> CcfResult<()> {
    if v == 0 {
        Err(CcfError::InvalidConfig(format!("{name} must be positive")))
    } else {
        Ok(())
    }
}

impl EngineConfig {
    /// Reject configurations the engine cannot run with.
    pub fn validate(&self) -> CcfResult<()> {
        if !self.phase.is_consistent() {
            return Err(CcfError::InvalidConfig(
                "phase exit thresholds must not exceed enter thresholds".into(),
            ));
        }
        unit("personality.curiosity_drive", self.personality.curiosity_drive)?;
        unit("personality.startle_sensitivity", self.personality.startle_sensitivity)?;
        unit("personality.recovery_speed", self.personality.recovery_speed)?;
        unit("interaction.base_gain", self.interaction.base_gain)?;
        unit("interaction.base_drop", self.interaction.base_drop)?;
        unit("accumulator.decay_rate", self.accumulator.decay_rate)?;
        unit("graph.edge_threshold", self.graph.edge_threshold)?;
        nonzero("episodes.max_duration_ticks", self.episodes.max_duration_ticks)?;
        nonzero("episodes.max_episodes_per_context", self.episodes.max_episodes_per_context as u64)?;
        nonzero("persistence.max_pending_batches", self.persistence.max_pending_batches as u64)?;
        if self.partition.base_cut_threshold.is_nan() || self.partition.base_cut_threshold < 0.0 {
            return Err(CcfError::InvalidConfig(
                "partition.base_cut_threshold must be non-negative".into(),
            ));
        }
        unit("partition.base_leakage_target", self.partition.base_leakage_target)?;
        if self.persistence.initial_backoff_ticks > self.persistence.max_backoff_ticks {
            return Err(CcfError::InvalidConfig(
                "persistence.initial_backoff_ticks exceeds max_backoff_ticks".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert_eq!(EngineConfig::default().validate(), Ok(()));
    }

    #[test]
    fn test_inverted_phase_thresholds_rejected() {
        let mut cfg = EngineConfig::default();
        cfg.phase.coherence_high_exit = 0.9;
        assert!(matches!(cfg.validate(), Err(CcfError::InvalidConfig(_))));
    }

    #[test]
    fn test_out_of_range_personality_rejected() {
        let mut cfg = EngineConfig::default();
        cfg.personality.curiosity_drive = 1.5;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("curiosity_drive"), "err={}", err);
    }

    #[test]
    fn test_zero_window_rejected() {
        let mut cfg = EngineConfig::default();
        cfg.episodes.max_duration_ticks = 0;
        assert!(cfg.validate().is_err());
    }
}
