//! Cooperative GC worker: drains a queue of [`GcTask`] trait objects one
//! step at a time, deferring final release of anything popped while a
//! checkpoint is in flight.
//!
//! Grounded on `crates/engine/src/background.rs`'s `BackgroundScheduler`,
//! narrowed from a generic priority queue of closures to the specific
//! run-one-step/free protocol [`GcTask`] names, and from worker *threads* to
//! a single cooperative task driven by repeated [`GcWorker::run_once`]
//! calls from the database task's own loop.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use duskdb_core::GcTask;
use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace};

/// What one [`GcWorker::run_once`] call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GcStep {
    /// The queue was empty; nothing ran.
    Idle,
    /// The front task did one unit of work but is not done yet.
    Progressed,
    /// The front task reported done and was popped (freed immediately or
    /// deferred to the to-free list, depending on checkpoint state).
    Completed,
}

/// Queue of retired index structures awaiting incremental teardown.
pub struct GcWorker {
    queue: Mutex<VecDeque<Box<dyn GcTask>>>,
    to_free: Mutex<Vec<Box<dyn GcTask>>>,
    not_empty: Condvar,
    checkpoint_in_flight: AtomicBool,
}

impl GcWorker {
    /// An empty worker.
    pub fn new() -> Self {
        GcWorker {
            queue: Mutex::new(VecDeque::new()),
            to_free: Mutex::new(Vec::new()),
            not_empty: Condvar::new(),
            checkpoint_in_flight: AtomicBool::new(false),
        }
    }

    /// Enqueue a retired structure's incremental teardown. Wakes anyone
    /// blocked in [`GcWorker::wait_for_work`].
    pub fn schedule(&self, task: Box<dyn GcTask>) {
        self.queue.lock().push_back(task);
        self.not_empty.notify_one();
    }

    /// Tell the worker whether a checkpoint is currently in flight. Call
    /// this from the same place that drives [`duskdb_concurrency::checkpoint::CheckpointCoordinator`].
    pub fn set_checkpoint_in_flight(&self, in_flight: bool) {
        self.checkpoint_in_flight.store(in_flight, Ordering::SeqCst);
    }

    /// Number of tasks still in the active queue (not counting the
    /// to-free list).
    pub fn queue_len(&self) -> usize {
        self.queue.lock().len()
    }

    /// Number of tasks withheld pending the in-flight checkpoint's commit.
    pub fn to_free_len(&self) -> usize {
        self.to_free.lock().len()
    }

    /// Run one unit of work against the front task. Yielding cooperatively
    /// after every work unit is the caller's responsibility: this call
    /// always returns after at most one unit of work.
    pub fn run_once(&self) -> GcStep {
        let mut queue = self.queue.lock();
        let Some(front) = queue.front_mut() else {
            return GcStep::Idle;
        };
        let done = front.step();
        if !done {
            trace!("gc task progressed");
            return GcStep::Progressed;
        }

        let task = queue.pop_front().expect("front just yielded Some");
        drop(queue);

        if self.checkpoint_in_flight.load(Ordering::SeqCst) {
            debug!("gc task done, deferred: checkpoint in flight");
            self.to_free.lock().push(task);
        } else {
            debug!("gc task done, freed immediately");
            task.free();
        }
        GcStep::Completed
    }

    /// Block until [`GcWorker::schedule`] adds work, or `timeout` elapses.
    /// Returns `true` if woken by new work, `false` on timeout.
    pub fn wait_for_work(&self, timeout: Duration) -> bool {
        let mut queue = self.queue.lock();
        if !queue.is_empty() {
            return true;
        }
        let result = self.not_empty.wait_for(&mut queue, timeout);
        !queue.is_empty() && !result.timed_out()
    }

    /// Release every task withheld in the to-free list. Call this once a
    /// checkpoint commits.
    pub fn drain_to_free(&self) -> usize {
        let tasks: Vec<_> = std::mem::take(&mut *self.to_free.lock());
        let count = tasks.len();
        for task in tasks {
            task.free();
        }
        if count > 0 {
            debug!(count, "drained to-free gc tasks after checkpoint commit");
        }
        count
    }
}

impl Default for GcWorker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::sync::atomic::AtomicBool as SharedBool;
    use std::sync::Arc;

    struct CountingTask {
        steps_remaining: Cell<u32>,
        freed: Arc<SharedBool>,
    }

    impl GcTask for CountingTask {
        fn step(&mut self) -> bool {
            let remaining = self.steps_remaining.get();
            if remaining == 0 {
                return true;
            }
            self.steps_remaining.set(remaining - 1);
            remaining - 1 == 0
        }

        fn free(self: Box<Self>) {
            self.freed.store(true, Ordering::SeqCst);
        }
    }

    #[test]
    fn idle_queue_reports_idle() {
        let worker = GcWorker::new();
        assert_eq!(worker.run_once(), GcStep::Idle);
    }

    #[test]
    fn task_completes_after_its_step_count_and_frees_immediately() {
        let worker = GcWorker::new();
        let freed = Arc::new(SharedBool::new(false));
        worker.schedule(Box::new(CountingTask {
            steps_remaining: Cell::new(2),
            freed: freed.clone(),
        }));

        assert_eq!(worker.run_once(), GcStep::Progressed);
        assert_eq!(worker.run_once(), GcStep::Completed);
        assert!(freed.load(Ordering::SeqCst));
        assert_eq!(worker.queue_len(), 0);
    }

    #[test]
    fn completed_task_is_deferred_while_checkpoint_in_flight() {
        let worker = GcWorker::new();
        worker.set_checkpoint_in_flight(true);
        let freed = Arc::new(SharedBool::new(false));
        worker.schedule(Box::new(CountingTask {
            steps_remaining: Cell::new(0),
            freed: freed.clone(),
        }));

        assert_eq!(worker.run_once(), GcStep::Completed);
        assert!(!freed.load(Ordering::SeqCst));
        assert_eq!(worker.to_free_len(), 1);

        let drained = worker.drain_to_free();
        assert_eq!(drained, 1);
        assert!(freed.load(Ordering::SeqCst));
    }

    #[test]
    fn wait_for_work_returns_immediately_when_queue_nonempty() {
        let worker = GcWorker::new();
        worker.schedule(Box::new(CountingTask {
            steps_remaining: Cell::new(0),
            freed: Arc::new(SharedBool::new(false)),
        }));
        assert!(worker.wait_for_work(Duration::from_millis(1)));
    }

    #[test]
    fn wait_for_work_times_out_on_empty_queue() {
        let worker = GcWorker::new();
        assert!(!worker.wait_for_work(Duration::from_millis(5)));
    }
}
