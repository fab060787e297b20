// this_file: src/queue.rs

//! Single-controller FIFO queue shared by producers and consumers.
//!
//! Every stage of the tile pipeline (pending work, free buffers, finished
//! tiles) is a [`ControlledQueue`]. The queue is unbounded, guarded by one
//! mutex, and wakes blocked receivers through a single-slot signal channel:
//! at most one "data is available" token is ever outstanding, so `send`
//! never blocks. Exactly one party, the controller, closes the queue; after
//! that every send fails and every receive reports [`Received::Closed`].

use crossbeam::channel::{self, Receiver, Sender};
use std::collections::vec_deque;
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;

/// Signal that a queue has been closed by its controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("queue closed")]
pub struct Closed;

/// A send on a closed queue. Hands the rejected value back.
#[derive(PartialEq, Eq, Clone, Copy)]
pub struct SendError<T>(pub T);

impl<T> SendError<T> {
    /// Recover the value that could not be sent.
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> fmt::Debug for SendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SendError { .. }")
    }
}

impl<T> fmt::Display for SendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("sending on a closed queue")
    }
}

impl<T> std::error::Error for SendError<T> {}

impl<T> From<SendError<T>> for Closed {
    fn from(_: SendError<T>) -> Self {
        Closed
    }
}

/// How a receive behaves on an empty queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecvMode {
    /// Suspend until an item arrives or the queue is closed
    Block,
    /// Return [`Received::Empty`] immediately
    Poll,
}

/// Outcome of a receive.
#[derive(Debug, PartialEq, Eq)]
pub enum Received<T> {
    /// An item was dequeued
    Item(T),
    /// Nothing available right now (only with [`RecvMode::Poll`])
    Empty,
    /// The queue is closed and will never yield again
    Closed,
}

struct State<T> {
    items: VecDeque<T>,
    // Dropped on close, which disconnects the channel and wakes all waiters.
    signal: Option<Sender<()>>,
}

impl<T> State<T> {
    fn is_closed(&self) -> bool {
        self.signal.is_none()
    }

    fn notify(&self) {
        if let Some(signal) = &self.signal {
            // Full means a token is already waiting for some receiver.
            let _ = signal.try_send(());
        }
    }
}

/// FIFO queue with one controller and any number of producers and consumers.
pub struct ControlledQueue<T> {
    state: Mutex<State<T>>,
    signal: Receiver<()>,
}

impl<T> ControlledQueue<T> {
    /// Create an empty, open queue.
    pub fn new() -> Self {
        let (tx, rx) = channel::bounded(1);
        Self {
            state: Mutex::new(State {
                items: VecDeque::new(),
                signal: Some(tx),
            }),
            signal: rx,
        }
    }

    fn state(&self) -> MutexGuard<'_, State<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append `value`, waking one blocked receiver.
    pub fn send(&self, value: T) -> Result<(), SendError<T>> {
        let mut state = self.state();
        if state.is_closed() {
            return Err(SendError(value));
        }
        state.items.push_back(value);
        state.notify();
        Ok(())
    }

    /// Dequeue the oldest item according to `mode`.
    pub fn receive(&self, mode: RecvMode) -> Received<T> {
        self.receive_inspect(mode, |_| {})
    }

    /// Like [`receive`](Self::receive), but runs `inspect` on the dequeued
    /// item before the queue lock is released.
    pub fn receive_inspect<F>(&self, mode: RecvMode, inspect: F) -> Received<T>
    where
        F: FnOnce(&T),
    {
        loop {
            {
                let mut state = self.state();
                if state.is_closed() {
                    return Received::Closed;
                }
                if let Some(value) = state.items.pop_front() {
                    inspect(&value);
                    // Pass the wake-up on so other blocked receivers see the rest.
                    if !state.items.is_empty() {
                        state.notify();
                    }
                    return Received::Item(value);
                }
                if mode == RecvMode::Poll {
                    return Received::Empty;
                }
            }
            // Err means the controller dropped the sender; the next pass returns Closed.
            let _ = self.signal.recv();
        }
    }

    /// Blocking receive.
    pub fn recv(&self) -> Result<T, Closed> {
        match self.receive(RecvMode::Block) {
            Received::Item(value) => Ok(value),
            Received::Empty | Received::Closed => Err(Closed),
        }
    }

    /// Non-blocking receive. `Ok(None)` means empty, not closed.
    pub fn try_recv(&self) -> Result<Option<T>, Closed> {
        match self.receive(RecvMode::Poll) {
            Received::Item(value) => Ok(Some(value)),
            Received::Empty => Ok(None),
            Received::Closed => Err(Closed),
        }
    }

    /// Close the queue, discarding anything still queued.
    ///
    /// Returns `true` for the call that performed the transition; later
    /// calls do nothing. Only the controller may call this.
    pub fn close(&self) -> bool {
        let mut state = self.state();
        if state.signal.take().is_none() {
            return false;
        }
        let discarded = std::mem::take(&mut state.items);
        drop(state);
        // Items may return resources to other queues on drop; do it unlocked.
        drop(discarded);
        true
    }

    /// Whether [`close`](Self::close) has run.
    pub fn is_closed(&self) -> bool {
        self.state().is_closed()
    }

    /// Number of queued items.
    pub fn len(&self) -> usize {
        self.state().items.len()
    }

    /// Whether nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Direct locked access to the queued items, for scan-and-replace.
    pub fn lock(&self) -> Locked<'_, T> {
        Locked { state: self.state() }
    }
}

impl<T> Default for ControlledQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for ControlledQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state();
        f.debug_struct("ControlledQueue")
            .field("len", &state.items.len())
            .field("closed", &state.is_closed())
            .finish()
    }
}

/// Exclusive view of a queue's items.
///
/// Entries can be inspected and overwritten in place but not reordered or
/// removed, so FIFO order of the other entries is preserved.
pub struct Locked<'a, T> {
    state: MutexGuard<'a, State<T>>,
}

impl<'a, T> Locked<'a, T> {
    /// Whether the queue has been closed.
    pub fn is_closed(&self) -> bool {
        self.state.is_closed()
    }

    /// Number of queued items.
    pub fn len(&self) -> usize {
        self.state.items.len()
    }

    /// Whether nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.state.items.is_empty()
    }

    /// Iterate oldest-first.
    pub fn iter(&self) -> vec_deque::Iter<'_, T> {
        self.state.items.iter()
    }

    /// Iterate oldest-first with write access to each entry.
    pub fn iter_mut(&mut self) -> vec_deque::IterMut<'_, T> {
        self.state.items.iter_mut()
    }

    /// Append while holding the lock. Wakes a receiver like `send`.
    pub fn push_back(&mut self, value: T) -> Result<(), SendError<T>> {
        if self.state.is_closed() {
            return Err(SendError(value));
        }
        self.state.items.push_back(value);
        self.state.notify();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{mpsc, Arc};
    use std::thread;
    use std::time::Duration;

    const WAIT: Duration = Duration::from_secs(5);

    #[test]
    fn items_come_out_in_fifo_order() {
        let queue = ControlledQueue::new();
        for i in 0..5 {
            queue.send(i).unwrap();
        }
        let got: Vec<i32> = (0..5).map(|_| queue.recv().unwrap()).collect();
        assert_eq!(got, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn poll_distinguishes_empty_from_closed() {
        let queue: ControlledQueue<u8> = ControlledQueue::new();
        assert_eq!(queue.receive(RecvMode::Poll), Received::Empty);
        assert_eq!(queue.try_recv(), Ok(None));
        assert!(queue.close());
        assert_eq!(queue.receive(RecvMode::Poll), Received::Closed);
        assert_eq!(queue.try_recv(), Err(Closed));
    }

    #[test]
    fn send_after_close_hands_value_back() {
        let queue = ControlledQueue::new();
        queue.send(1).unwrap();
        queue.close();
        let err = queue.send(7).unwrap_err();
        assert_eq!(err.into_inner(), 7);
        assert!(queue.is_empty(), "close discards queued items");
    }

    #[test]
    fn close_transitions_only_once() {
        let queue: ControlledQueue<()> = ControlledQueue::new();
        assert!(queue.close());
        assert!(!queue.close());
        assert!(queue.is_closed());
    }

    #[test]
    fn close_wakes_every_blocked_receiver() {
        let queue: Arc<ControlledQueue<u32>> = Arc::new(ControlledQueue::new());
        let (done_tx, done_rx) = mpsc::channel();
        let mut handles = Vec::new();
        for _ in 0..4 {
            let queue = Arc::clone(&queue);
            let done_tx = done_tx.clone();
            handles.push(thread::spawn(move || {
                let outcome = queue.receive(RecvMode::Block);
                done_tx.send(outcome == Received::Closed).unwrap();
            }));
        }
        thread::sleep(Duration::from_millis(50));
        queue.close();
        for _ in 0..4 {
            let closed = done_rx.recv_timeout(WAIT).expect("receiver stuck after close");
            assert!(closed);
        }
        for handle in handles {
            handle.join().unwrap();
        }
    }

    #[test]
    fn burst_of_sends_reaches_all_blocked_receivers() {
        let queue: Arc<ControlledQueue<u32>> = Arc::new(ControlledQueue::new());
        let (got_tx, got_rx) = mpsc::channel();
        for _ in 0..4 {
            let queue = Arc::clone(&queue);
            let got_tx = got_tx.clone();
            thread::spawn(move || {
                if let Ok(value) = queue.recv() {
                    got_tx.send(value).unwrap();
                }
            });
        }
        thread::sleep(Duration::from_millis(50));
        for i in 0..4 {
            queue.send(i).unwrap();
        }
        let mut got: Vec<u32> = (0..4)
            .map(|_| got_rx.recv_timeout(WAIT).expect("lost wake-up"))
            .collect();
        got.sort_unstable();
        assert_eq!(got, vec![0, 1, 2, 3]);
        queue.close();
    }

    #[test]
    fn locked_replace_keeps_other_entries_in_order() {
        let queue = ControlledQueue::new();
        for i in 0..4 {
            queue.send(i).unwrap();
        }
        {
            let mut locked = queue.lock();
            if let Some(entry) = locked.iter_mut().find(|v| **v == 2) {
                *entry = 20;
            }
            locked.push_back(4).unwrap();
        }
        let got: Vec<i32> = (0..5).map(|_| queue.recv().unwrap()).collect();
        assert_eq!(got, vec![0, 1, 20, 3, 4]);
    }

    #[test]
    fn inspect_runs_before_item_is_returned() {
        let queue = ControlledQueue::new();
        queue.send("tile").unwrap();
        let mut seen = None;
        let outcome = queue.receive_inspect(RecvMode::Poll, |item| seen = Some(*item));
        assert_eq!(outcome, Received::Item("tile"));
        assert_eq!(seen, Some("tile"));
    }
}
