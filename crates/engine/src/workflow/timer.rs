use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// In-memory min-heap of pending resume instants.
///
/// Only a hint for when to poll next. Entries can be stale (the execution
/// was canceled or resumed elsewhere); the durable timer table decides.
#[derive(Debug, Default)]
pub struct TimerIndex {
    heap: Mutex<BinaryHeap<Reverse<(DateTime<Utc>, Uuid)>>>,
}

impl TimerIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, execution_id: Uuid, resume_at: DateTime<Utc>) {
        let mut heap = self.heap.lock().unwrap_or_else(|e| e.into_inner());
        heap.push(Reverse((resume_at, execution_id)));
    }

    /// Replace the contents with timers loaded from the store
    pub fn rebuild(&self, timers: impl IntoIterator<Item = (Uuid, DateTime<Utc>)>) {
        let mut heap = self.heap.lock().unwrap_or_else(|e| e.into_inner());
        heap.clear();
        heap.extend(timers.into_iter().map(|(id, at)| Reverse((at, id))));
    }

    pub fn next_due(&self) -> Option<DateTime<Utc>> {
        let heap = self.heap.lock().unwrap_or_else(|e| e.into_inner());
        heap.peek().map(|Reverse((at, _))| *at)
    }

    /// Remove and return every entry due at or before `now`
    pub fn pop_due(&self, now: DateTime<Utc>) -> Vec<Uuid> {
        let mut heap = self.heap.lock().unwrap_or_else(|e| e.into_inner());
        let mut due = Vec::new();
        while let Some(Reverse((at, id))) = heap.peek() {
            if *at > now {
                break;
            }
            due.push(*id);
            heap.pop();
        }
        due
    }

    pub fn len(&self) -> usize {
        self.heap.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
