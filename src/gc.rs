use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use log::warn;

use crate::arena::ItemId;

#[derive(Debug, Clone)]
pub struct GcConfig {
    pub sweep_interval: Duration,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(5 * 60),
        }
    }
}

#[derive(Default)]
struct LedgerInner {
    counts: HashMap<ItemId, u64>,
    pending: Vec<ItemId>,
}

/// Reference counters and the pending-garbage list.
///
/// Guarded by its own mutex, separate from tree-structure mutation:
/// view-side callbacks bump counters concurrently with controller-thread
/// structural changes. Eviction is two-phase — a decrement to zero only
/// queues the node; the timed sweep collects whatever is *still* at zero.
#[derive(Default)]
pub struct RefLedger {
    inner: Mutex<LedgerInner>,
}

impl RefLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment every node in an ancestor chain (node first, root last).
    pub fn bump_chain(&self, chain: &[ItemId]) {
        let mut inner = self.inner.lock().expect("ref ledger poisoned");
        for id in chain {
            *inner.counts.entry(*id).or_insert(0) += 1;
        }
    }

    /// Decrement every node in an ancestor chain. Nodes that reach zero
    /// are queued for the next sweep (once; re-queuing happens only on a
    /// later decrement-to-zero after a re-reference).
    pub fn drop_chain(&self, chain: &[ItemId]) {
        let mut inner = self.inner.lock().expect("ref ledger poisoned");
        for id in chain {
            let count = match inner.counts.get_mut(id) {
                Some(count) if *count > 0 => {
                    *count -= 1;
                    *count
                }
                _ => {
                    warn!("refcount underflow for {id:?}");
                    continue;
                }
            };
            if count == 0 && !inner.pending.contains(id) {
                inner.pending.push(*id);
            }
        }
    }

    pub fn count(&self, id: ItemId) -> u64 {
        let inner = self.inner.lock().expect("ref ledger poisoned");
        inner.counts.get(&id).copied().unwrap_or(0)
    }

    pub fn pending_len(&self) -> usize {
        let inner = self.inner.lock().expect("ref ledger poisoned");
        inner.pending.len()
    }

    /// Remove a destroyed node from both tables so no dangling entry
    /// survives a watcher removal or subtree free.
    pub fn purge(&self, id: ItemId) {
        let mut inner = self.inner.lock().expect("ref ledger poisoned");
        inner.counts.remove(&id);
        inner.pending.retain(|entry| *entry != id);
    }

    /// Drain the pending list, returning the nodes still at zero. Nodes
    /// re-referenced since queuing are silently skipped and not re-queued.
    pub fn take_sweepable(&self) -> Vec<ItemId> {
        let mut inner = self.inner.lock().expect("ref ledger poisoned");
        let pending = std::mem::take(&mut inner.pending);
        pending
            .into_iter()
            .filter(|id| inner.counts.get(id).copied().unwrap_or(0) == 0)
            .collect()
    }
}

/// Fixed-interval gate for sweeps.
pub struct GcTimer {
    interval: Duration,
    last_sweep: Instant,
}

impl GcTimer {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_sweep: Instant::now(),
        }
    }

    pub fn due(&self, now: Instant) -> bool {
        now.duration_since(self.last_sweep) >= self.interval
    }

    pub fn mark_swept(&mut self, now: Instant) {
        self.last_sweep = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::TreeArena;
    use crate::item::TreeItem;
    use std::path::PathBuf;

    fn ids(count: usize) -> Vec<ItemId> {
        let mut arena = TreeArena::new();
        (0..count)
            .map(|i| arena.insert_detached(TreeItem::new(PathBuf::from(format!("/n{i}")), true)))
            .collect()
    }

    #[test]
    fn bump_then_drop_restores_counts() {
        let ledger = RefLedger::new();
        let chain = ids(3);
        ledger.bump_chain(&chain);
        ledger.bump_chain(&chain);
        ledger.drop_chain(&chain);
        for id in &chain {
            assert_eq!(ledger.count(*id), 1);
        }
        ledger.drop_chain(&chain);
        for id in &chain {
            assert_eq!(ledger.count(*id), 0);
        }
        assert_eq!(ledger.pending_len(), 3);
    }

    #[test]
    fn rereferenced_node_is_skipped_at_sweep_and_not_requeued() {
        let ledger = RefLedger::new();
        let chain = ids(1);
        ledger.bump_chain(&chain);
        ledger.drop_chain(&chain);
        assert_eq!(ledger.pending_len(), 1);

        // Re-referenced between queue and sweep.
        ledger.bump_chain(&chain);
        assert!(ledger.take_sweepable().is_empty());
        assert_eq!(ledger.pending_len(), 0);

        // A later decrement-to-zero queues it again.
        ledger.drop_chain(&chain);
        assert_eq!(ledger.take_sweepable(), chain);
    }

    #[test]
    fn purge_removes_pending_entry() {
        let ledger = RefLedger::new();
        let chain = ids(1);
        ledger.bump_chain(&chain);
        ledger.drop_chain(&chain);
        ledger.purge(chain[0]);
        assert!(ledger.take_sweepable().is_empty());
        assert_eq!(ledger.count(chain[0]), 0);
    }

    #[test]
    fn double_queue_is_collapsed() {
        let ledger = RefLedger::new();
        let chain = ids(1);
        ledger.bump_chain(&chain);
        ledger.drop_chain(&chain);
        ledger.bump_chain(&chain);
        ledger.drop_chain(&chain);
        assert_eq!(ledger.pending_len(), 1);
    }

    #[test]
    fn timer_gates_on_interval() {
        let mut timer = GcTimer::new(Duration::from_millis(50));
        let start = Instant::now();
        assert!(!timer.due(start));
        assert!(timer.due(start + Duration::from_millis(60)));
        timer.mark_swept(start + Duration::from_millis(60));
        assert!(!timer.due(start + Duration::from_millis(70)));
    }
}
