//! Bounded worker pool for chunk transfers
//!
//! Tasks are claimed in order from a shared counter by scoped worker threads
//! named `portex-upload-N`. Each task's output lands in the slot of its
//! index, so results come back in task order whatever order workers finish
//! in. The first task to exhaust its retries aborts the pool: workers stop
//! claiming new tasks and the error is returned once all of them have joined.

use crate::config::ClientConfig;
use parking_lot::Mutex;
use portex_core::{Error, Result};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

/// Retry and concurrency settings for one batch of tasks
#[derive(Debug, Clone)]
pub(crate) struct WorkerPool {
    workers: usize,
    max_retries: u32,
    backoff: Duration,
}

impl WorkerPool {
    pub(crate) fn from_config(config: &ClientConfig) -> Self {
        Self {
            workers: config.upload_workers.max(1),
            max_retries: config.max_retries,
            backoff: Duration::from_millis(config.retry_backoff_ms),
        }
    }

    /// Run `task` on every item of `tasks`, returning outputs in task order.
    ///
    /// # Errors
    ///
    /// `UploadWorker` naming `sheet` and the failing chunk index once a task
    /// fails with a non-retryable error or runs out of retries.
    pub(crate) fn run<T, R, F>(&self, sheet: &str, tasks: &[T], task: F) -> Result<Vec<R>>
    where
        T: Sync,
        R: Send,
        F: Fn(usize, &T) -> Result<R> + Sync,
    {
        let total = tasks.len();
        if total == 0 {
            return Ok(Vec::new());
        }
        let slots: Vec<Mutex<Option<R>>> = (0..total).map(|_| Mutex::new(None)).collect();
        let next = AtomicUsize::new(0);
        let abort = AtomicBool::new(false);
        let failure: Mutex<Option<Error>> = Mutex::new(None);

        let worker = || loop {
            if abort.load(Ordering::Acquire) {
                break;
            }
            let index = next.fetch_add(1, Ordering::AcqRel);
            if index >= total {
                break;
            }
            match self.attempt(sheet, index, &tasks[index], &task) {
                Ok(output) => *slots[index].lock() = Some(output),
                Err(e) => {
                    abort.store(true, Ordering::Release);
                    failure.lock().get_or_insert(e);
                    break;
                }
            }
        };

        let threads = self.workers.min(total);
        debug!(target: "portex::sync", sheet, chunks = total, threads, "Starting upload workers");
        std::thread::scope(|scope| {
            let mut handles = Vec::with_capacity(threads);
            for i in 0..threads {
                let spawned = std::thread::Builder::new()
                    .name(format!("portex-upload-{}", i))
                    .spawn_scoped(scope, &worker);
                match spawned {
                    Ok(handle) => handles.push(handle),
                    Err(e) => {
                        abort.store(true, Ordering::Release);
                        failure.lock().get_or_insert(Error::Io(e));
                        break;
                    }
                }
            }
            for handle in handles {
                if handle.join().is_err() {
                    failure
                        .lock()
                        .get_or_insert(Error::InvalidState(format!("upload worker for '{}' panicked", sheet)));
                }
            }
        });

        if let Some(e) = failure.into_inner() {
            return Err(e);
        }
        slots
            .into_iter()
            .enumerate()
            .map(|(i, slot)| {
                slot.into_inner()
                    .ok_or_else(|| Error::InvalidState(format!("chunk {} of '{}' produced no result", i, sheet)))
            })
            .collect()
    }

    fn attempt<T, R, F>(&self, sheet: &str, chunk: usize, item: &T, task: &F) -> Result<R>
    where
        F: Fn(usize, &T) -> Result<R>,
    {
        let mut attempts: u32 = 0;
        loop {
            attempts += 1;
            match task(chunk, item) {
                Ok(output) => return Ok(output),
                Err(e) if e.is_retryable() && attempts <= self.max_retries => {
                    warn!(target: "portex::sync", sheet, chunk, attempt = attempts, error = %e, "Chunk failed, retrying");
                    std::thread::sleep(self.backoff * attempts);
                }
                Err(e) => {
                    return Err(Error::UploadWorker {
                        sheet: sheet.to_string(),
                        chunk,
                        attempts,
                        message: e.to_string(),
                    })
                }
            }
        }
    }
}
