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

//! Write-behind persistence with tick-based retry.
//!
//! In-memory state is authoritative. Batches that the durable store rejects
//! stay queued and are retried with exponential backoff measured in ticks.
//! Batches are written strictly in submission order; once the queue exceeds
//! its bound the oldest batch is folded into the one behind it, keeping only
//! the last operation per key.

use std::collections::VecDeque;
use std::sync::Arc;

use hashbrown::HashSet;
use tracing::{debug, warn};

use crate::error::CcfResult;
use crate::storage::{DurableStore, StoreKey, StoreOp};

/// Retry and bounding policy.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PersistenceConfig {
    /// Wait after the first failure.
    pub initial_backoff_ticks: u64,
    /// Upper bound on the wait between attempts.
    pub max_backoff_ticks: u64,
    /// Queued batches kept before the oldest is folded into the next.
    pub max_pending_batches: usize,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            initial_backoff_ticks: 10,
            max_backoff_ticks: 1000,
            max_pending_batches: 256,
        }
    }
}

impl PersistenceConfig {
    /// Backoff after `failures` consecutive failures (`failures ≥ 1`).
    pub fn backoff(&self, failures: u32) -> u64 {
        let shift = failures.saturating_sub(1).min(63);
        self.initial_backoff_ticks
            .saturating_mul(1u64 << shift)
            .min(self.max_backoff_ticks)
    }
}

#[derive(Debug)]
struct PendingBatch {
    ops: Vec<StoreOp>,
    failures: u32,
    next_attempt: u64,
}

/// Result of one flush pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Batches written.
    pub written: usize,
    /// True when the head batch failed and is waiting for its backoff.
    pub blocked: bool,
    /// Batches still queued.
    pub pending: usize,
}

/// FIFO of store batches awaiting a successful write.
pub struct PersistenceQueue {
    store: Arc<dyn DurableStore>,
    config: PersistenceConfig,
    pending: VecDeque<PendingBatch>,
    folded: u64,
}

impl PersistenceQueue {
    /// Queue in front of `store`.
    pub fn new(store: Arc<dyn DurableStore>, config: PersistenceConfig) -> Self {
        Self {
            store,
            config,
            pending: VecDeque::new(),
            folded: 0,
        }
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<dyn DurableStore> {
        &self.store
    }

    /// Batches waiting to be written.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Batches folded into a later one because the queue was full.
    pub fn folded_count(&self) -> u64 {
        self.folded
    }

    /// Queue `ops` and attempt a flush. Empty batches are ignored.
    pub fn submit(&mut self, ops: Vec<StoreOp>, now: u64) -> FlushReport {
        if !ops.is_empty() {
            self.pending.push_back(PendingBatch {
                ops,
                failures: 0,
                next_attempt: now,
            });
            while self.pending.len() > self.config.max_pending_batches.max(1) {
                let Some(oldest) = self.pending.pop_front() else {
                    break;
                };
                let Some(next) = self.pending.front_mut() else {
                    self.pending.push_front(oldest);
                    break;
                };
                let mut ops = oldest.ops;
                ops.append(&mut next.ops);
                next.ops = last_write_per_key(ops);
                // The merged batch keeps the head's retry schedule.
                next.failures = oldest.failures;
                next.next_attempt = oldest.next_attempt;
                let merged_ops = next.ops.len();
                self.folded += 1;
                warn!(
                    ops = merged_ops,
                    failures = oldest.failures,
                    total_folded = self.folded,
                    "persistence queue full, folding oldest batch into the next"
                );
            }
        }
        self.flush(now)
    }

    /// Write queued batches in order until one fails or is still backing off.
    pub fn flush(&mut self, now: u64) -> FlushReport {
        let mut report = FlushReport::default();
        while let Some(head) = self.pending.front_mut() {
            if head.next_attempt > now {
                report.blocked = true;
                break;
            }
            match self.store.batch(&head.ops) {
                Ok(()) => {
                    if head.failures > 0 {
                        debug!(failures = head.failures, "persistence batch recovered");
                    }
                    self.pending.pop_front();
                    report.written += 1;
                }
                Err(err) => {
                    head.failures += 1;
                    let failures = head.failures;
                    let wait = self.config.backoff(failures);
                    head.next_attempt = now.saturating_add(wait);
                    warn!(
                        error = %err,
                        failures,
                        retry_in = wait,
                        pending = self.pending.len(),
                        "persistence batch failed"
                    );
                    report.blocked = true;
                    break;
                }
            }
        }
        report.pending = self.pending.len();
        report
    }

    /// Write everything now, ignoring backoff. Stops at the first failure.
    pub fn drain(&mut self) -> CcfResult<usize> {
        let mut written = 0;
        while let Some(head) = self.pending.front() {
            self.store.batch(&head.ops)?;
            self.pending.pop_front();
            written += 1;
        }
        Ok(written)
    }
}

/// Drop every operation overwritten by a later one on the same key.
fn last_write_per_key(ops: Vec<StoreOp>) -> Vec<StoreOp> {
    let mut seen: HashSet<StoreKey> = HashSet::with_capacity(ops.len());
    let mut kept: Vec<StoreOp> = ops
        .into_iter()
        .rev()
        .filter(|op| seen.insert(op.key().clone()))
        .collect();
    kept.reverse();
    kept
}

impl core::fmt::Debug for PersistenceQueue {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PersistenceQueue")
            .field("config", &self.config)
            .field("pending", &self.pending.len())
            .field("folded", &self.folded)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CcfError;
    use crate::fingerprint::ContextKey;
    use crate::graph::TrajectoryEmbedding;
    use crate::storage::{MemoryStore, SearchHit, StoreKey, StoreValue};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Store that rejects batches while `failing` is set.
    #[derive(Default)]
    struct FlakyStore {
        inner: MemoryStore,
        failing: AtomicBool,
        attempts: AtomicUsize,
    }

    impl DurableStore for FlakyStore {
        fn get(&self, key: &StoreKey) -> CcfResult<Option<StoreValue>> {
            self.inner.get(key)
        }

        fn batch(&self, ops: &[StoreOp]) -> CcfResult<()> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            if self.failing.load(Ordering::SeqCst) {
                return Err(CcfError::Storage("unavailable".into()));
            }
            self.inner.batch(ops)
        }

        fn search(&self, query: &TrajectoryEmbedding, top_k: usize) -> CcfResult<Vec<SearchHit>> {
            self.inner.search(query, top_k)
        }

        fn scan(&self, prefix: &str) -> CcfResult<Vec<(StoreKey, StoreValue)>> {
            self.inner.scan(prefix)
        }
    }

    fn op(i: u64) -> Vec<StoreOp> {
        vec![StoreOp::Delete(StoreKey(format!("k/{i}")))]
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let cfg = PersistenceConfig::default();
        assert_eq!(cfg.backoff(1), 10);
        assert_eq!(cfg.backoff(2), 20);
        assert_eq!(cfg.backoff(4), 80);
        assert_eq!(cfg.backoff(20), 1000);
        assert_eq!(cfg.backoff(200), 1000);
    }

    #[test]
    fn test_successful_submit_writes_immediately() {
        let mut q = PersistenceQueue::new(Arc::new(MemoryStore::new()), PersistenceConfig::default());
        let r = q.submit(op(1), 0);
        assert_eq!(r.written, 1);
        assert_eq!(r.pending, 0);
        assert!(!r.blocked);
    }

    #[test]
    fn test_failed_batch_waits_for_backoff() {
        let store = Arc::new(FlakyStore::default());
        store.failing.store(true, Ordering::SeqCst);
        let mut q = PersistenceQueue::new(store.clone(), PersistenceConfig::default());

        let r = q.submit(op(1), 100);
        assert!(r.blocked);
        assert_eq!(r.pending, 1);
        assert_eq!(store.attempts.load(Ordering::SeqCst), 1);

        // Within the backoff window nothing is attempted.
        q.flush(105);
        assert_eq!(store.attempts.load(Ordering::SeqCst), 1);

        store.failing.store(false, Ordering::SeqCst);
        let r = q.flush(110);
        assert_eq!(r.written, 1);
        assert_eq!(r.pending, 0);
    }

    #[test]
    fn test_order_preserved_behind_failed_head() {
        let store = Arc::new(FlakyStore::default());
        store.failing.store(true, Ordering::SeqCst);
        let mut q = PersistenceQueue::new(store.clone(), PersistenceConfig::default());
        q.submit(op(1), 0);
        let r = q.submit(op(2), 1);
        assert_eq!(r.written, 0);
        assert_eq!(q.pending(), 2);

        store.failing.store(false, Ordering::SeqCst);
        assert_eq!(q.drain().unwrap(), 2);
        assert_eq!(q.pending(), 0);
    }

    #[test]
    fn test_full_queue_folds_oldest_batches() {
        let store = Arc::new(FlakyStore::default());
        store.failing.store(true, Ordering::SeqCst);
        let cfg = PersistenceConfig { max_pending_batches: 3, ..PersistenceConfig::default() };
        let mut q = PersistenceQueue::new(store.clone(), cfg);
        for i in 0..5 {
            q.submit(op(i), i);
        }
        assert_eq!(q.pending(), 3);
        assert_eq!(q.folded_count(), 2);

        store.failing.store(false, Ordering::SeqCst);
        assert_eq!(q.drain().unwrap(), 3);
        assert_eq!(store.inner.len(), 0);
    }

    #[test]
    fn test_folded_write_survives_until_overwritten() {
        let store = Arc::new(FlakyStore::default());
        store.failing.store(true, Ordering::SeqCst);
        let cfg = PersistenceConfig { max_pending_batches: 2, ..PersistenceConfig::default() };
        let mut q = PersistenceQueue::new(store.clone(), cfg);
        let acc = |v: f32| {
            let mut a = crate::accumulator::CoherenceAccumulator::new(0);
            a.value = v;
            StoreValue::Accumulator { group: crate::groups::GroupId(ContextKey::UNKNOWN), accumulator: a }
        };
        let key = StoreKey("acc/quiet".into());
        let gone = StoreKey("acc/retired".into());

        // The only write of `acc/quiet`, then a retire, then unrelated traffic.
        q.submit(vec![StoreOp::Set(key.clone(), acc(0.4))], 0);
        q.submit(vec![StoreOp::Set(gone.clone(), acc(0.1))], 1);
        q.submit(vec![StoreOp::Delete(gone.clone())], 2);
        q.submit(op(9), 3);
        assert_eq!(q.pending(), 2);

        store.failing.store(false, Ordering::SeqCst);
        q.drain().unwrap();
        assert_eq!(store.inner.get(&key).unwrap(), Some(acc(0.4)));
        assert_eq!(store.inner.get(&gone).unwrap(), None);
    }

    #[test]
    fn test_folding_keeps_last_write_per_key() {
        let k = StoreKey("k/1".into());
        let ops = vec![StoreOp::Delete(k.clone()), StoreOp::Delete(StoreKey("k/2".into())), StoreOp::Delete(k.clone())];
        let kept = last_write_per_key(ops);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[1].key(), &k);
    }

    #[test]
    fn test_empty_batch_is_ignored() {
        let mut q = PersistenceQueue::new(Arc::new(MemoryStore::new()), PersistenceConfig::default());
        let r = q.submit(Vec::new(), 0);
        assert_eq!(r, FlushReport::default());
    }
}
