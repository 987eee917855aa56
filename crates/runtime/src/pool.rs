use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{Sender, unbounded};
use tracing::{debug, error};

type Job<S> = Box<dyn FnOnce(&mut S) + Send>;

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
#[error("worker pool is shut down")]
pub struct PoolClosed;

/// Runs `f`, turning a panic into its message.
pub fn catch_panic<T>(f: impl FnOnce() -> T) -> Result<T, String> {
    panic::catch_unwind(AssertUnwindSafe(f)).map_err(panic_message)
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    match payload.downcast::<String>() {
        Ok(message) => *message,
        Err(payload) => match payload.downcast::<&'static str>() {
            Ok(message) => (*message).to_string(),
            Err(_) => "unknown panic".to_string(),
        },
    }
}

/// Persistent pool of OS threads.
///
/// Each worker builds its own state once and keeps it for its lifetime, so
/// per-worker caches are never shared. Jobs are handed out through one
/// channel to whichever worker is idle.
pub struct WorkerPool<S> {
    sender: Option<Sender<Job<S>>>,
    workers: Vec<JoinHandle<()>>,
}

impl<S: 'static> WorkerPool<S> {
    pub fn new<F>(size: usize, init: F) -> std::io::Result<Self>
    where
        F: Fn(usize) -> S + Send + Sync + 'static,
    {
        let size = size.max(1);
        let (sender, receiver) = unbounded::<Job<S>>();
        let init = Arc::new(init);

        let mut workers = Vec::with_capacity(size);
        for index in 0..size {
            let receiver = receiver.clone();
            let init = Arc::clone(&init);
            let handle = thread::Builder::new()
                .name(format!("eval-worker-{index}"))
                .spawn(move || {
                    let mut state = init(index);
                    for job in receiver.iter() {
                        // A panicking job must not take the worker with it.
                        if let Err(message) = catch_panic(|| job(&mut state)) {
                            error!(worker = index, %message, "job panicked");
                        }
                    }
                    debug!(worker = index, "worker stopped");
                })?;
            workers.push(handle);
        }

        Ok(Self {
            sender: Some(sender),
            workers,
        })
    }

    /// Available hardware concurrency, at least one.
    pub fn default_size() -> usize {
        thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    pub fn execute(&self, job: impl FnOnce(&mut S) + Send + 'static) -> Result<(), PoolClosed> {
        let sender = self.sender.as_ref().ok_or(PoolClosed)?;
        sender.send(Box::new(job)).map_err(|_| PoolClosed)
    }
}

impl<S> Drop for WorkerPool<S> {
    fn drop(&mut self) {
        // Closing the channel ends every worker loop once the queue is empty.
        self.sender.take();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}
