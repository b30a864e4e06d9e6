//! Deferred tasklet execution.
//!
//! Engines schedule their tasklet by pushing their id onto a bounded
//! lock-free queue; one named worker thread drains it. A per-engine
//! pending bit keeps an engine on the queue at most once. When the queue
//! is full the caller runs the tasklet itself.

use crossbeam_queue::ArrayQueue;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle, Thread};
use std::time::Duration;

use pvgpu_core::error::Result;
use pvgpu_core::{kdebug, kwarn};

use crate::engine::EngineSubmitter;

const IDLE_PARK: Duration = Duration::from_millis(1);

pub struct TaskletQueue {
    queue: ArrayQueue<usize>,
    pending: Box<[AtomicBool]>,
    worker: OnceLock<Thread>,
    shutdown: AtomicBool,
}

impl TaskletQueue {
    pub fn new(engines: usize, depth: usize) -> Self {
        Self {
            queue: ArrayQueue::new(depth.max(1)),
            pending: (0..engines).map(|_| AtomicBool::new(false)).collect(),
            worker: OnceLock::new(),
            shutdown: AtomicBool::new(false),
        }
    }

    /// Ask the worker to run `engine`'s tasklet. Returns false if the
    /// caller must run it inline: queue full, shut down, or unknown engine.
    pub fn schedule(&self, engine: usize) -> bool {
        if self.shutdown.load(Ordering::Acquire) {
            return false;
        }
        let Some(pending) = self.pending.get(engine) else {
            return false;
        };
        if pending.swap(true, Ordering::AcqRel) {
            return true;
        }
        if self.queue.push(engine).is_err() {
            pending.store(false, Ordering::Release);
            return false;
        }
        if let Some(worker) = self.worker.get() {
            worker.unpark();
        }
        true
    }

    fn pop(&self) -> Option<usize> {
        let engine = self.queue.pop()?;
        if let Some(pending) = self.pending.get(engine) {
            pending.store(false, Ordering::Release);
        }
        Some(engine)
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

/// Owns the tasklet thread.
pub struct TaskletWorker {
    queue: Arc<TaskletQueue>,
    handle: Option<JoinHandle<()>>,
}

impl TaskletWorker {
    pub fn spawn(queue: Arc<TaskletQueue>, engines: Vec<Arc<EngineSubmitter>>) -> Result<Self> {
        let inner = Arc::clone(&queue);
        let handle = thread::Builder::new()
            .name("pvgpu-tasklet".into())
            .spawn(move || worker_loop(inner, engines))?;
        let _ = queue.worker.set(handle.thread().clone());
        Ok(Self {
            queue,
            handle: Some(handle),
        })
    }

    /// Stop the thread after it drains what is queued, and join it.
    pub fn shutdown(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        self.queue.shutdown.store(true, Ordering::Release);
        handle.thread().unpark();
        if handle.join().is_err() {
            kwarn!("tasklet worker panicked");
        }
    }
}

impl Drop for TaskletWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(queue: Arc<TaskletQueue>, engines: Vec<Arc<EngineSubmitter>>) {
    kdebug!("tasklet worker up, {} engine(s)", engines.len());
    loop {
        match queue.pop() {
            Some(id) => match engines.get(id) {
                Some(engine) => engine.run_tasklet(),
                None => kwarn!("tasklet for unknown engine {}", id),
            },
            None => {
                if queue.shutdown.load(Ordering::Acquire) {
                    break;
                }
                thread::park_timeout(IDLE_PARK);
            }
        }
    }
    kdebug!("tasklet worker down");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schedule_dedups_pending() {
        let q = TaskletQueue::new(2, 8);
        assert!(q.schedule(0));
        assert!(q.schedule(0));
        assert_eq!(q.len(), 1);
        assert!(q.schedule(1));
        assert_eq!(q.pop(), Some(0));
        assert!(q.schedule(0));
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn test_full_queue_falls_back_inline() {
        let q = TaskletQueue::new(3, 1);
        assert!(q.schedule(0));
        assert!(!q.schedule(1));
        // the rejected engine can be scheduled once there is room
        assert_eq!(q.pop(), Some(0));
        assert!(q.schedule(1));
    }

    #[test]
    fn test_unknown_engine_and_shutdown() {
        let q = TaskletQueue::new(1, 4);
        assert!(!q.schedule(5));
        q.shutdown.store(true, Ordering::Release);
        assert!(!q.schedule(0));
        assert!(q.is_empty());
    }
}
