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

//! Coherence groups and the published group-assignment table.
//!
//! A [`GroupTable`] is the output of one recomputation cycle. It is immutable
//! once built and is handed to readers through [`PublishedGroups`], a single
//! `ArcSwap` slot: readers hold whichever `Arc` they loaded and never see a
//! half-written table.
//!
//! # Invariants
//!
//! - Groups are disjoint. A key absent from the table is its own singleton group.
//! - A group's id is its smallest member key.
//! - Publication is monotonic in `generation`.

use std::collections::BTreeSet;
use std::sync::Arc;

use arc_swap::{ArcSwap, Guard};
use hashbrown::HashMap;

use crate::fingerprint::ContextKey;

/// Identifier of a coherence group: its smallest member key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GroupId(pub ContextKey);

impl GroupId {
    /// Representative key of the group.
    pub fn representative(&self) -> ContextKey {
        self.0
    }
}

impl core::fmt::Display for GroupId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "group[{}]", self.0)
    }
}

/// A set of context keys sharing one trust accumulator.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CoherenceGroup {
    /// Group id (smallest member).
    pub id: GroupId,
    /// Members, sorted ascending.
    pub members: Vec<ContextKey>,
}

impl CoherenceGroup {
    /// Build a group from arbitrary members. Returns `None` for an empty set.
    pub fn from_members(members: impl IntoIterator<Item = ContextKey>) -> Option<Self> {
        let members: Vec<ContextKey> = members
            .into_iter()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let first = *members.first()?;
        Some(Self {
            id: GroupId(first),
            members,
        })
    }

    /// True if the group holds a single key.
    pub fn is_singleton(&self) -> bool {
        self.members.len() == 1
    }
}

/// Generation-stamped mapping from context key to coherence group.
#[derive(Clone, Debug, Default)]
pub struct GroupTable {
    generation: u64,
    assignment: HashMap<ContextKey, GroupId>,
    groups: Vec<CoherenceGroup>,
}

impl GroupTable {
    /// The empty generation-0 table: every key is a singleton.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a table from a partition. Empty member sets are skipped and a
    /// key listed twice stays with the first group that claimed it.
    pub fn from_partition<I, G>(generation: u64, partition: I) -> Self
    where
        I: IntoIterator<Item = G>,
        G: IntoIterator<Item = ContextKey>,
    {
        let mut assignment = HashMap::new();
        let mut groups = Vec::new();
        for members in partition {
            let fresh: Vec<ContextKey> = members
                .into_iter()
                .filter(|k| !assignment.contains_key(k))
                .collect();
            let Some(group) = CoherenceGroup::from_members(fresh) else {
                continue;
            };
            for m in &group.members {
                assignment.insert(*m, group.id);
            }
            groups.push(group);
        }
        groups.sort_by(|a, b| a.id.cmp(&b.id));
        Self {
            generation,
            assignment,
            groups,
        }
    }

    /// Recomputation cycle that produced this table.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Group of `key`. Keys not in the table are their own singleton group.
    pub fn group_of(&self, key: &ContextKey) -> GroupId {
        self.assignment.get(key).copied().unwrap_or(GroupId(*key))
    }

    /// True if the key was part of the partition.
    pub fn contains(&self, key: &ContextKey) -> bool {
        self.assignment.contains_key(key)
    }

    /// All groups, sorted by id.
    pub fn groups(&self) -> &[CoherenceGroup] {
        &self.groups
    }

    /// Members of a group, if the table knows it.
    pub fn members_of(&self, id: &GroupId) -> Option<&[ContextKey]> {
        self.groups
            .binary_search_by(|g| g.id.cmp(id))
            .ok()
            .map(|i| self.groups[i].members.as_slice())
    }

    /// Number of groups in the table.
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// Number of assigned keys.
    pub fn key_count(&self) -> usize {
        self.assignment.len()
    }

    /// Iterate over `(key, group)` assignments in arbitrary order.
    pub fn assignments(&self) -> impl Iterator<Item = (&ContextKey, &GroupId)> {
        self.assignment.iter()
    }
}

// ─── Publication ────────────────────────────────────────────────────────────

/// Shared slot holding the latest published [`GroupTable`].
///
/// Cloning shares the slot. Loads never block and never observe a torn table.
#[derive(Clone, Debug)]
pub struct PublishedGroups {
    slot: Arc<ArcSwap<GroupTable>>,
}

impl PublishedGroups {
    /// Slot holding the empty generation-0 table.
    pub fn new() -> Self {
        Self {
            slot: Arc::new(ArcSwap::from_pointee(GroupTable::empty())),
        }
    }

    /// Current table.
    pub fn load(&self) -> Arc<GroupTable> {
        self.slot.load_full()
    }

    /// Generation of the current table.
    pub fn generation(&self) -> u64 {
        self.slot.load().generation
    }

    /// Swap in `table` if it is newer than what is published.
    ///
    /// Returns `false` and leaves the slot untouched when a table of the same
    /// or a later generation is already visible.
    pub fn publish(&self, table: GroupTable) -> bool {
        let next = Arc::new(table);
        let mut current = self.slot.load_full();
        loop {
            if current.generation >= next.generation {
                return false;
            }
            let prev = self.slot.compare_and_swap(&current, Arc::clone(&next));
            if Arc::ptr_eq(&prev, &current) {
                return true;
            }
            current = Guard::into_inner(prev);
        }
    }
}

impl Default for PublishedGroups {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
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

    #[test]
    fn test_group_id_is_smallest_member() {
        let a = key(BrightnessBand::Dark, NoiseBand::Quiet);
        let b = key(BrightnessBand::Bright, NoiseBand::Loud);
        let g = CoherenceGroup::from_members([b, a]).unwrap();
        assert_eq!(g.id, GroupId(a));
        assert_eq!(g.members, vec![a, b]);
    }

    #[test]
    fn test_unassigned_key_is_singleton() {
        let table = GroupTable::empty();
        let k = key(BrightnessBand::Dim, NoiseBand::Moderate);
        assert_eq!(table.group_of(&k), GroupId(k));
        assert!(!table.contains(&k));
    }

    #[test]
    fn test_from_partition_is_disjoint() {
        let a = key(BrightnessBand::Dark, NoiseBand::Quiet);
        let b = key(BrightnessBand::Dim, NoiseBand::Quiet);
        let c = key(BrightnessBand::Bright, NoiseBand::Quiet);
        let table = GroupTable::from_partition(1, vec![vec![a, b], vec![b, c], vec![]]);
        assert_eq!(table.group_count(), 2);
        assert_eq!(table.group_of(&b), GroupId(a));
        assert_eq!(table.group_of(&c), GroupId(c));
        assert_eq!(table.members_of(&GroupId(a)), Some(&[a, b][..]));
    }

    #[test]
    fn test_publish_is_monotonic() {
        let slot = PublishedGroups::new();
        let reader = slot.clone();
        let held = reader.load();
        assert!(slot.publish(GroupTable::from_partition(2, Vec::<Vec<ContextKey>>::new())));
        assert!(!slot.publish(GroupTable::from_partition(1, Vec::<Vec<ContextKey>>::new())));
        assert_eq!(reader.generation(), 2);
        // Earlier readers keep their own Arc.
        assert_eq!(held.generation(), 0);
    }
}
