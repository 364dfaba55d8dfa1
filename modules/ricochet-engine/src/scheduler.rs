//! Serialized task queue.
//!
//! Every channel delivery and every handler poll runs as a task on a shared
//! `Scheduler`. The first caller to schedule onto an idle queue drains it;
//! tasks scheduled while a drain is in progress are appended and run after
//! the current task returns. This flattens re-entrant publishes into a FIFO
//! loop instead of recursion.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

type Task = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct Queue {
    tasks: VecDeque<Task>,
    draining: bool,
}

#[derive(Clone, Default)]
pub struct Scheduler {
    queue: Arc<Mutex<Queue>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a task. Runs it (and everything it enqueues) before returning
    /// unless a drain is already in progress.
    pub fn schedule(&self, task: impl FnOnce() + Send + 'static) {
        {
            let mut queue = self.lock();
            queue.tasks.push_back(Box::new(task));
            if queue.draining {
                return;
            }
            queue.draining = true;
        }
        self.drain();
    }

    /// Whether a drain loop is currently running (on any thread).
    pub fn is_draining(&self) -> bool {
        self.lock().draining
    }

    pub fn pending(&self) -> usize {
        self.lock().tasks.len()
    }

    fn drain(&self) {
        let guard = DrainGuard { scheduler: self };
        loop {
            // Emptiness check and flag reset happen under one lock so a task
            // scheduled from another thread is never stranded.
            let task = {
                let mut queue = self.lock();
                match queue.tasks.pop_front() {
                    Some(task) => task,
                    None => {
                        queue.draining = false;
                        break;
                    }
                }
            };
            task();
        }
        std::mem::forget(guard);
    }

    fn lock(&self) -> MutexGuard<'_, Queue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let queue = self.lock();
        f.debug_struct("Scheduler")
            .field("pending", &queue.tasks.len())
            .field("draining", &queue.draining)
            .finish()
    }
}

/// Releases the drain flag if a task panics, so the remaining tasks run on
/// the next `schedule` call.
struct DrainGuard<'a> {
    scheduler: &'a Scheduler,
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.scheduler.lock().draining = false;
    }
}
