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

//! CCF_SEG: portable snapshot of the trust field for persistence and transport.
//!
//! A snapshot holds every group accumulator together with the group's member
//! keys, the personality, and the generation of the group table the
//! accumulators were keyed by. Keys are stored in full, so restoring needs no
//! live sensor reads.
//!
//! ```text
//! CcfSegSnapshot
//!   version, generation, created_at, last_active_at, total_interactions
//!   personality: { curiosity_drive, startle_sensitivity, recovery_speed }
//!   groups: [ { id, members[], coherence_value, interaction_count, ticks } ]
//! ```
//!
//! This module requires the `serde` feature.

use crate::accumulator::{AccumulatorStore, CoherenceAccumulator};
use crate::error::{CcfError, CcfResult};
use crate::fingerprint::ContextKey;
use crate::groups::{GroupId, GroupTable};
use crate::phase::Personality;

/// Current CCF_SEG format version.
pub const CCF_SEG_VERSION: u16 = 2;

/// A serializable snapshot of an [`AccumulatorStore`] and [`Personality`].
///
/// # Example
///
/// ```rust,ignore
/// use ccf_relational::seg::CcfSegSnapshot;
///
/// let snapshot = CcfSegSnapshot::from_store(&store, &personality, 0, 0);
/// let json = serde_json::to_string(&snapshot).unwrap();
/// let restored: CcfSegSnapshot = serde_json::from_str(&json).unwrap();
/// ```
#[derive(serde::Serialize, serde::Deserialize, Clone, Debug, PartialEq)]
pub struct CcfSegSnapshot {
    /// Format version. Always [`CCF_SEG_VERSION`] for newly created snapshots.
    pub version: u16,
    /// Generation of the group table the accumulators were keyed by.
    pub generation: u64,
    /// Unix timestamp (seconds) when the field was first created. 0 if unknown.
    pub created_at: i64,
    /// Unix timestamp (seconds) of the most recent interaction.
    pub last_active_at: i64,
    /// Positive interactions summed over all groups.
    pub total_interactions: u64,
    /// Personality modulators at snapshot time.
    pub personality: PersonalityRecord,
    /// Group accumulators, ordered by group id.
    pub groups: Vec<GroupRecord>,
}

/// Serializable representation of [`Personality`] modulators.
#[derive(serde::Serialize, serde::Deserialize, Clone, Debug, PartialEq)]
pub struct PersonalityRecord {
    /// Curiosity drive [0.0, 1.0].
    pub curiosity_drive: f32,
    /// Startle sensitivity [0.0, 1.0].
    pub startle_sensitivity: f32,
    /// Recovery speed [0.0, 1.0].
    pub recovery_speed: f32,
}

impl From<&Personality> for PersonalityRecord {
    fn from(p: &Personality) -> Self {
        Self {
            curiosity_drive: p.curiosity_drive,
            startle_sensitivity: p.startle_sensitivity,
            recovery_speed: p.recovery_speed,
        }
    }
}

impl From<&PersonalityRecord> for Personality {
    fn from(r: &PersonalityRecord) -> Self {
        Self {
            curiosity_drive: r.curiosity_drive,
            startle_sensitivity: r.startle_sensitivity,
            recovery_speed: r.recovery_speed,
        }
    }
}

/// One group's accumulator and membership.
#[derive(serde::Serialize, serde::Deserialize, Clone, Debug, PartialEq)]
pub struct GroupRecord {
    /// Group id (smallest member key).
    pub id: ContextKey,
    /// Member keys, sorted. A singleton lists only its id.
    pub members: Vec<ContextKey>,
    /// Accumulated coherence value [0.0, 1.0].
    pub coherence_value: f32,
    /// Positive interactions recorded for this group.
    pub interaction_count: u32,
    /// Tick of the most recent interaction.
    pub last_interaction_tick: u64,
    /// Tick up to which idle decay was applied.
    pub last_decay_tick: u64,
}

impl GroupRecord {
    fn accumulator(&self) -> CoherenceAccumulator {
        CoherenceAccumulator {
            value: self.coherence_value.clamp(0.0, 1.0),
            interaction_count: self.interaction_count,
            last_interaction_tick: self.last_interaction_tick,
            last_decay_tick: self.last_decay_tick,
        }
    }
}

impl CcfSegSnapshot {
    /// Build a snapshot from a live [`AccumulatorStore`] and [`Personality`].
    ///
    /// - `created_at`: Unix timestamp when the field was originally created (0 if unknown).
    /// - `last_active_at`: Unix timestamp of the most recent interaction (0 if unknown).
    pub fn from_store(
        store: &AccumulatorStore,
        personality: &Personality,
        created_at: i64,
        last_active_at: i64,
    ) -> Self {
        let table = store.table();
        let mut groups: Vec<GroupRecord> = store
            .iter()
            .map(|(gid, acc)| GroupRecord {
                id: gid.representative(),
                members: table
                    .members_of(gid)
                    .map_or_else(|| vec![gid.representative()], <[ContextKey]>::to_vec),
                coherence_value: acc.value,
                interaction_count: acc.interaction_count,
                last_interaction_tick: acc.last_interaction_tick,
                last_decay_tick: acc.last_decay_tick,
            })
            .collect();
        groups.sort_by(|a, b| a.id.cmp(&b.id));
        let total_interactions = groups.iter().map(|g| u64::from(g.interaction_count)).sum();

        Self {
            version: CCF_SEG_VERSION,
            generation: table.generation(),
            created_at,
            last_active_at,
            total_interactions,
            personality: PersonalityRecord::from(personality),
            groups,
        }
    }

    /// Number of group entries in this snapshot.
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// The group record `key` belongs to, if any.
    pub fn find_group(&self, key: &ContextKey) -> Option<&GroupRecord> {
        self.groups
            .iter()
            .find(|g| g.id == *key || g.members.binary_search(key).is_ok())
    }

    /// Group table implied by the recorded memberships.
    pub fn group_table(&self) -> GroupTable {
        GroupTable::from_partition(
            self.generation,
            self.groups.iter().map(|g| g.members.iter().copied()),
        )
    }

    /// Install every recorded accumulator into `store` under the snapshot's
    /// group table. Groups the store already holds keep their live state.
    ///
    /// Returns the number of accumulators installed.
    pub fn restore_into(&self, store: &mut AccumulatorStore) -> CcfResult<usize> {
        if self.version != CCF_SEG_VERSION {
            return Err(CcfError::Storage(format!(
                "unsupported CCF_SEG version {} (expected {})",
                self.version, CCF_SEG_VERSION
            )));
        }
        if store.table().generation() < self.generation {
            store.apply_table(std::sync::Arc::new(self.group_table()));
        }
        let mut installed = 0;
        for g in &self.groups {
            if store.restore(GroupId(g.id), g.accumulator()) {
                installed += 1;
            }
        }
        Ok(installed)
    }
}
