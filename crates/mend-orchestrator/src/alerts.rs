//! Bounded operator alert queue

use mend_core::Alert;
use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use tracing::debug;

/// FIFO of operator alerts; the oldest entry is dropped when full
#[derive(Debug)]
pub struct AlertQueue {
    capacity: usize,
    queue: Mutex<VecDeque<Alert>>,
}

impl AlertQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn push(&self, message: impl Into<String>) {
        let alert = Alert::new(message);
        let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
        if queue.len() == self.capacity {
            if let Some(dropped) = queue.pop_front() {
                debug!("Alert queue full, dropping: {}", dropped.message);
            }
        }
        queue.push_back(alert);
    }

    /// Return every queued alert, oldest first, and clear the queue
    pub fn drain(&self) -> Vec<Alert> {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for AlertQueue {
    fn default() -> Self {
        Self::new(100)
    }
}
