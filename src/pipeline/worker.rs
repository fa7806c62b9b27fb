//! Single-slot background worker
//!
//! One named thread fed through a capacity-one channel. Posting never blocks:
//! the caller is expected to post only when no task is outstanding.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{bounded, Sender, TrySendError};
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, error, info};

/// A unit of work for the worker thread
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Why a task was not accepted. The task is dropped either way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PostError {
    #[error("a task is already pending")]
    Full,
    #[error("worker is not running")]
    Stopped,
}

struct WorkerThread {
    sender: Sender<Task>,
    handle: JoinHandle<()>,
}

/// Executes tasks one at a time on a dedicated thread
pub struct BackgroundWorker {
    thread: Mutex<Option<WorkerThread>>,
    running: Arc<AtomicBool>,
}

impl BackgroundWorker {
    pub fn new() -> Self {
        Self {
            thread: Mutex::new(None),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Spawn the worker thread. No-op while it is already running.
    pub fn start(&self, name: &str) -> std::io::Result<()> {
        let mut thread = self.thread.lock();
        if thread.is_some() {
            return Ok(());
        }

        let (sender, receiver) = bounded::<Task>(1);
        let running = self.running.clone();
        running.store(true, Ordering::Release);

        let spawned = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                for task in receiver.iter() {
                    if catch_unwind(AssertUnwindSafe(task)).is_err() {
                        error!("Worker task panicked");
                    }
                }
                running.store(false, Ordering::Release);
                debug!("worker loop exited");
            });

        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                self.running.store(false, Ordering::Release);
                return Err(e);
            }
        };

        *thread = Some(WorkerThread { sender, handle });
        info!(name, "Worker started");
        Ok(())
    }

    /// Let the pending task finish, then join the thread.
    ///
    /// Must not be called from a task running on this worker.
    pub fn stop(&self) {
        let Some(WorkerThread { sender, handle }) = self.thread.lock().take() else {
            return;
        };
        drop(sender);
        if handle.join().is_err() {
            error!("Worker thread terminated abnormally");
        }
        self.running.store(false, Ordering::Release);
        info!("Worker stopped");
    }

    /// Hand a task to the worker without blocking
    pub fn post(&self, task: Task) -> Result<(), PostError> {
        let thread = self.thread.lock();
        let Some(worker) = thread.as_ref() else {
            return Err(PostError::Stopped);
        };
        worker.sender.try_send(task).map_err(|e| match e {
            TrySendError::Full(_) => PostError::Full,
            TrySendError::Disconnected(_) => PostError::Stopped,
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

impl Default for BackgroundWorker {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for BackgroundWorker {
    fn drop(&mut self) {
        self.stop();
    }
}
