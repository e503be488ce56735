//! Worker pool draining the shared Waiting set.
//!
//! ## Design
//!
//! A binary heap behind a mutex and condvar. Higher priority pops first;
//! equal priorities pop in submission order. Workers are plain threads
//! because executors block on I/O.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::{Condvar, Mutex};

use super::job::JobId;

/// Called on a worker thread for every popped job.
pub type JobHandler = Arc<dyn Fn(JobId) + Send + Sync>;

#[derive(Debug, PartialEq, Eq)]
struct QueuedJob {
    priority: i32,
    seq: u64,
    id: JobId,
}

impl Ord for QueuedJob {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for QueuedJob {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Default)]
struct QueueState {
    heap: BinaryHeap<QueuedJob>,
    next_seq: u64,
    shutdown: bool,
}

#[derive(Debug, Default)]
struct Queue {
    state: Mutex<QueueState>,
    available: Condvar,
}

impl Queue {
    /// Block until a job is available. `None` once shut down.
    fn pop(&self) -> Option<JobId> {
        let mut state = self.state.lock();
        loop {
            if state.shutdown {
                return None;
            }
            if let Some(job) = state.heap.pop() {
                return Some(job.id);
            }
            self.available.wait(&mut state);
        }
    }
}

pub struct WorkerPool {
    queue: Arc<Queue>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    pub fn start(workers: usize, handler: JobHandler) -> std::io::Result<Self> {
        let queue = Arc::new(Queue::default());
        let mut handles = Vec::with_capacity(workers);

        for index in 0..workers.max(1) {
            let queue = Arc::clone(&queue);
            let handler = Arc::clone(&handler);
            let handle = std::thread::Builder::new()
                .name(format!("querygate-worker-{index}"))
                .spawn(move || {
                    while let Some(id) = queue.pop() {
                        handler(id);
                    }
                    tracing::debug!(worker = index, "worker stopped");
                })?;
            handles.push(handle);
        }

        tracing::info!(workers = handles.len(), "worker pool started");
        Ok(WorkerPool {
            queue,
            handles: Mutex::new(handles),
        })
    }

    /// Queue a job. Returns false once the pool is shut down.
    pub fn submit(&self, id: JobId, priority: i32) -> bool {
        let mut state = self.queue.state.lock();
        if state.shutdown {
            return false;
        }
        let seq = state.next_seq;
        state.next_seq += 1;
        state.heap.push(QueuedJob { priority, seq, id });
        drop(state);
        self.queue.available.notify_one();
        true
    }

    /// Jobs queued but not yet picked up
    pub fn queued(&self) -> usize {
        self.queue.state.lock().heap.len()
    }

    pub fn is_shut_down(&self) -> bool {
        self.queue.state.lock().shutdown
    }

    /// Stop accepting work, wait for running jobs to finish and return the
    /// ids that were never picked up, highest priority first.
    pub fn shutdown(&self) -> Vec<JobId> {
        let pending = {
            let mut state = self.queue.state.lock();
            state.shutdown = true;
            let heap = std::mem::take(&mut state.heap);
            heap.into_sorted_vec()
                .into_iter()
                .rev()
                .map(|job| job.id)
                .collect()
        };
        self.queue.available.notify_all();

        let handles = std::mem::take(&mut *self.handles.lock());
        for handle in handles {
            if handle.join().is_err() {
                tracing::error!("worker thread panicked");
            }
        }
        pending
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}
