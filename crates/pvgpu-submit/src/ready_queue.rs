//! Ready queue the engine dequeues from.
//!
//! # Implementations
//! - `PriorityQueue` - FIFO within a priority level, higher levels first

use std::cmp::Reverse;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use crate::request::Request;

/// Accessed only under the engine's queue lock.
pub trait ReadyQueue: Send {
    fn push(&mut self, rq: Arc<Request>);

    /// Put `rq` ahead of everything at its priority. Used to unwind
    /// in-flight requests on reset.
    fn push_front(&mut self, rq: Arc<Request>);

    fn peek(&self) -> Option<&Arc<Request>>;

    fn pop(&mut self) -> Option<Arc<Request>>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Default)]
pub struct PriorityQueue {
    levels: BTreeMap<Reverse<i32>, VecDeque<Arc<Request>>>,
    len: usize,
}

impl PriorityQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ReadyQueue for PriorityQueue {
    fn push(&mut self, rq: Arc<Request>) {
        self.levels
            .entry(Reverse(rq.priority()))
            .or_default()
            .push_back(rq);
        self.len += 1;
    }

    fn push_front(&mut self, rq: Arc<Request>) {
        self.levels
            .entry(Reverse(rq.priority()))
            .or_default()
            .push_front(rq);
        self.len += 1;
    }

    fn peek(&self) -> Option<&Arc<Request>> {
        self.levels.values().next().and_then(|level| level.front())
    }

    fn pop(&mut self) -> Option<Arc<Request>> {
        let mut level = self.levels.first_entry()?;
        let rq = level.get_mut().pop_front();
        if level.get().is_empty() {
            level.remove();
        }
        if rq.is_some() {
            self.len -= 1;
        }
        rq
    }

    fn len(&self) -> usize {
        self.len
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::Context;

    fn rq(id: u64, priority: i32) -> Arc<Request> {
        let ctx = Context {
            id,
            gpa: 0,
            lrc_desc: 0,
        };
        Request::new(id, ctx, priority)
    }

    fn drain(q: &mut PriorityQueue) -> Vec<u64> {
        std::iter::from_fn(|| q.pop()).map(|r| r.id()).collect()
    }

    #[test]
    fn test_fifo_within_level() {
        let mut q = PriorityQueue::new();
        for id in 1..=3 {
            q.push(rq(id, 0));
        }
        assert_eq!(q.len(), 3);
        assert_eq!(q.peek().map(|r| r.id()), Some(1));
        assert_eq!(drain(&mut q), vec![1, 2, 3]);
        assert!(q.is_empty());
    }

    #[test]
    fn test_higher_priority_first() {
        let mut q = PriorityQueue::new();
        q.push(rq(1, 0));
        q.push(rq(2, 5));
        q.push(rq(3, -1));
        q.push(rq(4, 5));
        assert_eq!(drain(&mut q), vec![2, 4, 1, 3]);
    }

    #[test]
    fn test_push_front() {
        let mut q = PriorityQueue::new();
        q.push(rq(3, 0));
        q.push_front(rq(2, 0));
        q.push_front(rq(1, 0));
        assert_eq!(drain(&mut q), vec![1, 2, 3]);
    }
}
