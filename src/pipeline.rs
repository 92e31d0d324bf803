//! Frame hand-off between the user and the codec.
//!
//! A bounded queue carries whole frames; every frame is owned by exactly one
//! side at a time and ordering is strictly FIFO. Cancellation is an EOS
//! shutdown: pending frames drain, further sends fail.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

use crate::error::{JxsError, Result};

#[derive(Debug)]
struct QueueState<T> {
    items: VecDeque<T>,
    capacity: usize,
    shutdown: bool,
}

/// Bounded MPSC-style frame queue with blocking and non-blocking operation.
#[derive(Debug)]
pub struct FrameQueue<T> {
    state: Mutex<QueueState<T>>,
    not_empty: Condvar,
    not_full: Condvar,
}

impl<T> FrameQueue<T> {
    pub fn new(capacity: usize) -> Self {
        FrameQueue {
            state: Mutex::new(QueueState {
                items: VecDeque::with_capacity(capacity),
                capacity: capacity.max(1),
                shutdown: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        }
    }

    pub fn send(&self, item: T, blocking: bool) -> Result<()> {
        let mut state = self.state.lock().map_err(|_| JxsError::Undefined)?;
        loop {
            if state.shutdown {
                return Err(JxsError::FifoShutdown);
            }
            if state.items.len() < state.capacity {
                state.items.push_back(item);
                self.not_empty.notify_one();
                return Ok(());
            }
            if !blocking {
                return Err(JxsError::EmptyQueue);
            }
            state = self.not_full.wait(state).map_err(|_| JxsError::Undefined)?;
        }
    }

    pub fn recv(&self, blocking: bool) -> Result<T> {
        let mut state = self.state.lock().map_err(|_| JxsError::Undefined)?;
        loop {
            if let Some(item) = state.items.pop_front() {
                self.not_full.notify_one();
                return Ok(item);
            }
            if state.shutdown {
                return Err(JxsError::FifoShutdown);
            }
            if !blocking {
                return Err(JxsError::EmptyQueue);
            }
            state = self.not_empty.wait(state).map_err(|_| JxsError::Undefined)?;
        }
    }

    /// EOS: pending items stay readable, further sends fail.
    pub fn shutdown(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.shutdown = true;
        }
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    pub fn len(&self) -> usize {
        self.state.lock().map(|s| s.items.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_order() {
        let q = FrameQueue::new(4);
        q.send(1, false).unwrap();
        q.send(2, false).unwrap();
        assert_eq!(q.recv(false).unwrap(), 1);
        assert_eq!(q.recv(false).unwrap(), 2);
    }

    #[test]
    fn test_non_blocking_empty_and_full() {
        let q = FrameQueue::new(1);
        assert_eq!(q.recv(false), Err(JxsError::EmptyQueue));
        q.send(1, false).unwrap();
        assert_eq!(q.send(2, false), Err(JxsError::EmptyQueue));
    }

    #[test]
    fn test_shutdown_drains_then_fails() {
        let q = FrameQueue::new(4);
        q.send(7, false).unwrap();
        q.shutdown();
        assert_eq!(q.send(8, false), Err(JxsError::FifoShutdown));
        assert_eq!(q.recv(false).unwrap(), 7);
        assert_eq!(q.recv(false), Err(JxsError::FifoShutdown));
    }
}
