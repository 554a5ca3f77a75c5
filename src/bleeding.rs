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

//! Bleeding edges: similarity severed by a partition.
//!
//! Every edge whose endpoints land in different groups is reported. The
//! severed share of total similarity is then compared with a leakage target
//! to judge whether the grouping is too fine or too coarse.

use crate::fingerprint::ContextKey;
use crate::graph::RelationalGraph;
use crate::groups::GroupId;
use crate::mincut::Partition;

/// Below `target × COARSE_FRACTION` a partition with merged groups is judged too coarse.
pub const COARSE_FRACTION: f32 = 0.25;

/// An edge crossing a group boundary.
#[derive(Clone, Debug, PartialEq)]
pub struct BleedingEdge {
    /// Lower-index endpoint.
    pub a: ContextKey,
    /// Higher-index endpoint.
    pub b: ContextKey,
    /// Group of `a`.
    pub group_a: GroupId,
    /// Group of `b`.
    pub group_b: GroupId,
    /// Severed similarity.
    pub weight: f32,
}

/// Grouping resolution relative to the leakage target.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Granularity {
    /// Too much similarity is being severed.
    TooFine,
    /// Leakage within the target band.
    Matched,
    /// Almost nothing severed while distinct keys share groups.
    TooCoarse,
}

/// Bleeding edges of a partition and their totals.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LeakageReport {
    /// Crossing edges in index order.
    pub edges: Vec<BleedingEdge>,
    /// Sum of crossing weights.
    pub severed_weight: f32,
    /// Sum of all edge weights.
    pub total_weight: f32,
    /// Groups in the partition.
    pub group_count: usize,
    /// Largest group size.
    pub largest_group: usize,
}

impl LeakageReport {
    /// `severed / total`, 0.0 for an edgeless graph.
    pub fn leakage_ratio(&self) -> f32 {
        if self.total_weight <= 0.0 {
            0.0
        } else {
            (self.severed_weight / self.total_weight).clamp(0.0, 1.0)
        }
    }

    /// Judge the partition against `target` (a leakage ratio).
    pub fn assess(&self, target: f32) -> Granularity {
        let ratio = self.leakage_ratio();
        if ratio > target {
            Granularity::TooFine
        } else if ratio < target * COARSE_FRACTION && self.largest_group > 1 {
            Granularity::TooCoarse
        } else {
            Granularity::Matched
        }
    }
}

/// Enumerate edges crossing group boundaries.
pub fn find_bleeding_edges(graph: &RelationalGraph, partition: &Partition) -> LeakageReport {
    let assignment = partition.assignment(graph.node_count());
    let ids: Vec<Option<GroupId>> = partition
        .groups()
        .iter()
        .map(|g| g.iter().filter_map(|&i| graph.key(i)).min().map(GroupId))
        .collect();

    let mut report = LeakageReport {
        group_count: partition.len(),
        largest_group: partition.groups().iter().map(Vec::len).max().unwrap_or(0),
        ..LeakageReport::default()
    };
    for (i, j, w) in graph.edges() {
        report.total_weight += w;
        let (Some(gi), Some(gj)) = (assignment[i], assignment[j]) else {
            continue;
        };
        if gi == gj {
            continue;
        }
        let (Some(a), Some(b), Some(group_a), Some(group_b)) =
            (graph.key(i), graph.key(j), ids[gi], ids[gj])
        else {
            continue;
        };
        report.severed_weight += w;
        report.edges.push(BleedingEdge {
            a,
            b,
            group_a,
            group_b,
            weight: w,
        });
    }
    report
}
