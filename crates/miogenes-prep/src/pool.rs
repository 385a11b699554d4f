//! Bounded worker pool for one pipeline phase
//!
//! Tasks run on a dedicated rayon pool. Results stream back over a crossbeam
//! channel to the calling thread, which handles them one at a time. Anything
//! that must have a single writer (the validation cache logs) therefore lives
//! in the result handler, never in the task.
//!
//! A panicking task is caught on its worker and reported as
//! [`TaskOutcome::Panicked`]; the remaining tasks of the phase still run.

use anyhow::{Context, Result};
use crossbeam::channel;
use rayon::prelude::*;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};

/// What happened to one task
#[derive(Debug)]
pub enum TaskOutcome<R> {
    Done(R),
    /// Never started: cancellation was requested first
    Cancelled,
    /// The task panicked; holds the panic message
    Panicked(String),
}

/// Counts for one finished phase
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PhaseStats {
    /// Tasks that ran, including those that panicked
    pub completed: usize,
    pub cancelled: usize,
    pub panicked: usize,
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

pub struct WorkerPool {
    pool: rayon::ThreadPool,
    workers: usize,
}

impl WorkerPool {
    pub fn new(workers: usize) -> Result<Self> {
        let workers = workers.max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("miogenes-worker-{}", i))
            .build()
            .context("Failed to create worker thread pool")?;
        log::info!("WorkerPool::new: Using {} parallel workers", workers);
        Ok(Self { pool, workers })
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Run `work` once for every task and feed each outcome to `on_result`.
    ///
    /// Completion order is arbitrary. Once `cancel` is set, tasks that have
    /// not started report [`TaskOutcome::Cancelled`] while running ones
    /// finish normally. If `on_result` fails, remaining tasks are skipped the
    /// same way and the first error is returned after the pool drains.
    pub fn run_phase<T, R, E, W, H>(
        &self,
        tasks: &[T],
        cancel: &AtomicBool,
        work: W,
        mut on_result: H,
    ) -> Result<PhaseStats, E>
    where
        T: Sync,
        R: Send,
        W: Fn(&T) -> R + Sync,
        H: FnMut(&T, TaskOutcome<R>) -> Result<(), E>,
    {
        let (tx, rx) = channel::unbounded::<(usize, TaskOutcome<R>)>();
        let abort = AtomicBool::new(false);
        let mut stats = PhaseStats::default();
        let mut first_error = None;

        std::thread::scope(|scope| {
            let abort = &abort;
            let work = &work;
            scope.spawn(move || {
                self.pool.install(|| {
                    tasks
                        .par_iter()
                        .enumerate()
                        .for_each_with(tx, |tx, (index, task)| {
                            let outcome = if cancel.load(Ordering::Relaxed)
                                || abort.load(Ordering::Relaxed)
                            {
                                TaskOutcome::Cancelled
                            } else {
                                match panic::catch_unwind(AssertUnwindSafe(|| work(task))) {
                                    Ok(result) => TaskOutcome::Done(result),
                                    Err(payload) => TaskOutcome::Panicked(panic_message(&*payload)),
                                }
                            };
                            let _ = tx.send((index, outcome));
                        });
                });
            });

            // Ends once every sender clone inside the pool is dropped
            for (index, outcome) in rx {
                match outcome {
                    TaskOutcome::Done(_) => stats.completed += 1,
                    TaskOutcome::Cancelled => stats.cancelled += 1,
                    TaskOutcome::Panicked(_) => {
                        stats.completed += 1;
                        stats.panicked += 1;
                    }
                }
                if first_error.is_some() {
                    continue;
                }
                if let Err(e) = on_result(&tasks[index], outcome) {
                    abort.store(true, Ordering::Relaxed);
                    first_error = Some(e);
                }
            }
        });

        match first_error {
            Some(e) => Err(e),
            None => Ok(stats),
        }
    }
}
