// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Fire-and-forget job execution for recompute work.
//!
//! Jobs run at most once; there is no retry and no cancellation. Each job
//! gets a [`Deadline`] derived from the queue's execution timeout and is
//! expected to check it between units of work.
//!
//! ```text
//! submit ──► Queued ──worker picks up──► Running ──► Done
//! ```

use crate::error::BudgetError;
use crossbeam::channel::{self, Sender};
use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Point in time after which a job must stop.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    expires_at: Option<Instant>,
}

impl Deadline {
    pub fn none() -> Self {
        Self { expires_at: None }
    }

    pub fn after(timeout: Duration) -> Self {
        Self {
            expires_at: Instant::now().checked_add(timeout),
        }
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }

    /// # Errors
    ///
    /// Returns [`BudgetError::TaskTimedOut`] once the deadline has passed.
    pub fn check(&self) -> Result<(), BudgetError> {
        if self.is_expired() {
            Err(BudgetError::TaskTimedOut)
        } else {
            Ok(())
        }
    }
}

/// Identifier assigned by a queue on submit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of a submitted job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Queued,
    Running,
    /// Finished, successfully or not.
    Done,
}

type JobFn = Box<dyn FnOnce(&Deadline) -> Result<(), BudgetError> + Send + 'static>;

/// A labelled unit of background work.
pub struct Job {
    label: String,
    run: JobFn,
}

impl Job {
    pub fn new<F>(label: impl Into<String>, run: F) -> Self
    where
        F: FnOnce(&Deadline) -> Result<(), BudgetError> + Send + 'static,
    {
        Self {
            label: label.into(),
            run: Box::new(run),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job").field("label", &self.label).finish()
    }
}

/// Counters over finished jobs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub completed: u64,
    pub failed: u64,
}

/// Asynchronous, at-most-once job queue.
pub trait TaskQueue: Send + Sync {
    /// Hands `job` to the queue and returns without waiting for it.
    ///
    /// # Errors
    ///
    /// Returns [`BudgetError::QueueClosed`] if the queue no longer accepts work.
    fn submit(&self, job: Job) -> Result<JobId, BudgetError>;

    /// State of a job previously returned by [`TaskQueue::submit`].
    fn state(&self, id: JobId) -> Option<TaskState>;
}

/// Bookkeeping shared by the queue front-end and its workers.
#[derive(Debug, Default)]
struct Tracker {
    next_id: AtomicU64,
    /// Only unfinished jobs are kept; finished ids are inferred from `next_id`.
    states: DashMap<JobId, TaskState>,
    pending: Mutex<usize>,
    idle: Condvar,
    completed: AtomicU64,
    failed: AtomicU64,
}

impl Tracker {
    fn enqueue(&self) -> JobId {
        let id = JobId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.states.insert(id, TaskState::Queued);
        *self.pending.lock() += 1;
        id
    }

    fn abandon(&self, id: JobId) {
        self.states.remove(&id);
        self.finish_one();
    }

    fn run(&self, id: JobId, job: Job, timeout: Option<Duration>) {
        self.states.insert(id, TaskState::Running);
        let deadline = timeout.map_or_else(Deadline::none, Deadline::after);
        let Job { label, run } = job;

        let started = Instant::now();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| run(&deadline)));
        match outcome {
            Ok(Ok(())) => {
                self.completed.fetch_add(1, Ordering::SeqCst);
                debug!(job = %id, %label, elapsed = ?started.elapsed(), "job done");
            }
            Ok(Err(error)) => {
                self.failed.fetch_add(1, Ordering::SeqCst);
                warn!(job = %id, %label, %error, "job failed");
            }
            Err(_) => {
                self.failed.fetch_add(1, Ordering::SeqCst);
                warn!(job = %id, %label, "job panicked");
            }
        }

        self.states.remove(&id);
        self.finish_one();
    }

    fn finish_one(&self) {
        let mut pending = self.pending.lock();
        *pending = pending.saturating_sub(1);
        if *pending == 0 {
            self.idle.notify_all();
        }
    }

    fn state(&self, id: JobId) -> Option<TaskState> {
        if let Some(state) = self.states.get(&id) {
            return Some(*state);
        }
        (id.0 < self.next_id.load(Ordering::SeqCst)).then_some(TaskState::Done)
    }

    fn wait_idle(&self) {
        let mut pending = self.pending.lock();
        while *pending > 0 {
            self.idle.wait(&mut pending);
        }
    }

    fn stats(&self) -> QueueStats {
        QueueStats {
            completed: self.completed.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
        }
    }
}

/// Fixed set of worker threads fed through a `crossbeam` channel.
///
/// There is no mutual exclusion between jobs: two jobs touching the same
/// account may run at the same time.
pub struct WorkerPool {
    sender: Mutex<Option<Sender<(JobId, Job)>>>,
    workers: Vec<JoinHandle<()>>,
    tracker: Arc<Tracker>,
}

impl WorkerPool {
    pub fn new(workers: usize, timeout: Duration) -> Self {
        let (sender, receiver) = channel::unbounded::<(JobId, Job)>();
        let tracker = Arc::new(Tracker::default());

        let workers = (0..workers.max(1))
            .map(|_| {
                let receiver = receiver.clone();
                let tracker = Arc::clone(&tracker);
                thread::spawn(move || {
                    while let Ok((id, job)) = receiver.recv() {
                        tracker.run(id, job, Some(timeout));
                    }
                })
            })
            .collect();

        Self {
            sender: Mutex::new(Some(sender)),
            workers,
            tracker,
        }
    }

    /// Blocks until every submitted job, including jobs submitted by other
    /// jobs, has finished.
    pub fn wait_idle(&self) {
        self.tracker.wait_idle();
    }

    pub fn stats(&self) -> QueueStats {
        self.tracker.stats()
    }

    /// Stops accepting jobs. Queued jobs still run.
    pub fn close(&self) {
        self.sender.lock().take();
    }
}

impl TaskQueue for WorkerPool {
    fn submit(&self, job: Job) -> Result<JobId, BudgetError> {
        let sender = self.sender.lock().clone().ok_or(BudgetError::QueueClosed)?;
        let id = self.tracker.enqueue();
        debug!(job = %id, label = job.label(), "job queued");
        if sender.send((id, job)).is_err() {
            self.tracker.abandon(id);
            return Err(BudgetError::QueueClosed);
        }
        Ok(id)
    }

    fn state(&self, id: JobId) -> Option<TaskState> {
        self.tracker.state(id)
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.close();
        let current = thread::current().id();
        for worker in self.workers.drain(..) {
            // The last handle may be released from inside a job.
            if worker.thread().id() != current {
                let _ = worker.join();
            }
        }
    }
}

/// Runs each job synchronously inside `submit`.
///
/// Useful for deterministic replay; jobs submitted by a running job run
/// nested before `submit` returns.
#[derive(Debug, Default)]
pub struct InlineQueue {
    tracker: Tracker,
    timeout: Option<Duration>,
}

impl InlineQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            tracker: Tracker::default(),
            timeout: Some(timeout),
        }
    }

    pub fn stats(&self) -> QueueStats {
        self.tracker.stats()
    }
}

impl TaskQueue for InlineQueue {
    fn submit(&self, job: Job) -> Result<JobId, BudgetError> {
        let id = self.tracker.enqueue();
        self.tracker.run(id, job, self.timeout);
        Ok(id)
    }

    fn state(&self, id: JobId) -> Option<TaskState> {
        self.tracker.state(id)
    }
}
