// this_file: src/work_queue.rs

//! Pending tile computations, collapsed to at most one entry per slot.
//!
//! The dedup index records every slot that has an entry waiting in the
//! queue. Submitting for an indexed slot overwrites the waiting entry in
//! place (latest parameters win, FIFO position kept). A worker's dequeue
//! removes the slot from the index under the same queue lock, so a slot that
//! changes again after being claimed is queued afresh rather than dropped.
//!
//! Lock order is always queue first, then index.

use crate::grid::{PlanePoint, SlotIndex, TexelPoint, TileRequest};
use crate::queue::{Closed, ControlledQueue, RecvMode, Received};
use log::{debug, trace};
use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Request to compute one tile into one slot. Identity is `slot`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WorkItem {
    /// Destination slot
    pub slot: SlotIndex,
    /// Plane coordinate of the tile's top-left sample
    pub origin: PlanePoint,
    /// Plane units per sample
    pub scale: f64,
    /// Top-left texel of the slot in the pixel buffer
    pub dest: TexelPoint,
}

impl From<TileRequest> for WorkItem {
    fn from(request: TileRequest) -> Self {
        Self {
            slot: request.slot,
            origin: request.origin,
            scale: request.scale,
            dest: request.dest,
        }
    }
}

/// What `submit` did with an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    /// Appended as a new entry
    Queued,
    /// Overwrote the entry already waiting for the same slot
    Replaced,
}

/// Work queue with per-slot deduplication.
#[derive(Debug, Default)]
pub struct WorkQueue {
    queue: ControlledQueue<WorkItem>,
    pending: Mutex<HashSet<SlotIndex>>,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn pending(&self) -> MutexGuard<'_, HashSet<SlotIndex>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue `item`, or overwrite the entry already waiting for its slot.
    pub fn submit(&self, item: WorkItem) -> Result<Submission, Closed> {
        let mut entries = self.queue.lock();
        if entries.is_closed() {
            return Err(Closed);
        }
        let mut pending = self.pending();
        if pending.contains(&item.slot) {
            if let Some(waiting) = entries.iter_mut().find(|w| w.slot == item.slot) {
                trace!("Replacing queued work for slot {:?}", item.slot);
                *waiting = item;
                return Ok(Submission::Replaced);
            }
            debug!("Slot {:?} indexed but not queued, re-queueing", item.slot);
        }
        let slot = item.slot;
        entries.push_back(item)?;
        pending.insert(slot);
        Ok(Submission::Queued)
    }

    /// Block until an item is available. `Err(Closed)` once shut down.
    pub fn take(&self) -> Result<WorkItem, Closed> {
        match self.claim(RecvMode::Block) {
            Received::Item(item) => Ok(item),
            Received::Empty | Received::Closed => Err(Closed),
        }
    }

    /// Claim an item if one is waiting.
    pub fn try_take(&self) -> Result<Option<WorkItem>, Closed> {
        match self.claim(RecvMode::Poll) {
            Received::Item(item) => Ok(Some(item)),
            Received::Empty => Ok(None),
            Received::Closed => Err(Closed),
        }
    }

    fn claim(&self, mode: RecvMode) -> Received<WorkItem> {
        self.queue.receive_inspect(mode, |item| {
            self.pending().remove(&item.slot);
        })
    }

    /// Whether `slot` has an entry waiting.
    pub fn is_pending(&self, slot: SlotIndex) -> bool {
        let _entries = self.queue.lock();
        self.pending().contains(&slot)
    }

    /// Number of slots in the dedup index.
    pub fn pending_len(&self) -> usize {
        let _entries = self.queue.lock();
        self.pending().len()
    }

    /// Number of waiting entries.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Close the queue and forget every waiting entry. Controller only.
    pub fn close(&self) -> bool {
        let closed = self.queue.close();
        if closed {
            let _entries = self.queue.lock();
            self.pending().clear();
        }
        closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{mpsc, Arc};
    use std::thread;
    use std::time::Duration;

    fn item(slot: usize, re: f64) -> WorkItem {
        WorkItem {
            slot: SlotIndex(slot),
            origin: PlanePoint::new(re, 0.0),
            scale: 0.01,
            dest: TexelPoint { x: slot * 8, y: 0 },
        }
    }

    #[test]
    fn repeated_submissions_collapse_to_latest() {
        let queue = WorkQueue::new();
        assert_eq!(queue.submit(item(3, 0.0)), Ok(Submission::Queued));
        for n in 1..10 {
            assert_eq!(queue.submit(item(3, n as f64)), Ok(Submission::Replaced));
        }
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.pending_len(), 1);
        let taken = queue.try_take().unwrap().unwrap();
        assert_eq!(taken.origin.re, 9.0);
        assert!(queue.try_take().unwrap().is_none());
    }

    #[test]
    fn replacement_keeps_fifo_position() {
        let queue = WorkQueue::new();
        for slot in 0..4 {
            queue.submit(item(slot, 0.0)).unwrap();
        }
        queue.submit(item(1, 5.0)).unwrap();
        let order: Vec<_> = std::iter::from_fn(|| queue.try_take().unwrap())
            .map(|w| (w.slot.0, w.origin.re))
            .collect();
        assert_eq!(order, vec![(0, 0.0), (1, 5.0), (2, 0.0), (3, 0.0)]);
    }

    #[test]
    fn claimed_slot_is_queued_again() {
        let queue = WorkQueue::new();
        queue.submit(item(7, 1.0)).unwrap();
        assert!(queue.is_pending(SlotIndex(7)));
        let claimed = queue.take().unwrap();
        assert_eq!(claimed.slot, SlotIndex(7));
        assert!(!queue.is_pending(SlotIndex(7)));

        assert_eq!(queue.submit(item(7, 2.0)), Ok(Submission::Queued));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn closed_queue_rejects_submit_and_take() {
        let queue = WorkQueue::new();
        queue.submit(item(0, 0.0)).unwrap();
        assert!(queue.close());
        assert_eq!(queue.submit(item(1, 0.0)), Err(Closed));
        assert_eq!(queue.take(), Err(Closed));
        assert!(!queue.is_pending(SlotIndex(0)));
    }

    #[test]
    fn close_releases_blocked_taker() {
        let queue = Arc::new(WorkQueue::new());
        let (tx, rx) = mpsc::channel();
        let taker = Arc::clone(&queue);
        let handle = thread::spawn(move || tx.send(taker.take()).unwrap());
        thread::sleep(Duration::from_millis(30));
        queue.close();
        let outcome = rx.recv_timeout(Duration::from_secs(5)).expect("taker stuck");
        assert_eq!(outcome, Err(Closed));
        handle.join().unwrap();
    }
}
