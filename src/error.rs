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

//! Error types shared across the crate.
//!
//! Every fallible operation returns [`CcfResult`]. Recovery policy (substitute an
//! `Unknown` band, retry a storage batch, retain the previous partition) lives at
//! the engine boundary, not here.

use thiserror::Error;

use crate::fingerprint::Dimension;

/// Errors produced by the coherence engine and its collaborators.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CcfError {
    /// A required feature band was missing from the sensor snapshot.
    #[error("invalid context: missing {0} band")]
    InvalidContext(Dimension),

    /// A configuration value is out of its accepted range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The durable storage collaborator rejected an operation.
    #[error("storage error: {0}")]
    Storage(String),

    /// The background recomputation worker is no longer accepting jobs.
    #[error("recomputation worker unavailable")]
    WorkerUnavailable,
}

/// Result alias used throughout the crate.
pub type CcfResult<T> = Result<T, CcfError>;
