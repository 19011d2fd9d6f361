// SPDX-License-Identifier: GPL-3.0-only

//! Single background thread running sandbox jobs in submission order

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::thread::JoinHandle;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Runs submitted jobs one at a time on a dedicated named thread
///
/// A panicking job is logged and the worker keeps going. Dropping the
/// worker lets queued jobs finish, then joins the thread.
pub struct SequentialWorker {
    name: String,
    sender: Option<mpsc::UnboundedSender<Job>>,
    handle: Option<JoinHandle<()>>,
}

impl SequentialWorker {
    pub fn spawn(name: &str) -> std::io::Result<Self> {
        let (sender, mut receiver) = mpsc::unbounded_channel::<Job>();
        let thread_name = name.to_string();

        let handle = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                debug!(worker = %thread_name, "Worker started");
                while let Some(job) = receiver.blocking_recv() {
                    if catch_unwind(AssertUnwindSafe(job)).is_err() {
                        error!(worker = %thread_name, "Job panicked");
                    }
                }
                debug!(worker = %thread_name, "Worker finished");
            })?;

        info!(worker = name, "Spawned sequential worker");
        Ok(Self {
            name: name.to_string(),
            sender: Some(sender),
            handle: Some(handle),
        })
    }

    /// Queue `job`; `false` once the worker is shut down
    pub fn submit<F>(&self, job: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        match &self.sender {
            Some(sender) => sender.send(Box::new(job)).is_ok(),
            None => false,
        }
    }

    /// Stop accepting jobs, drain the queue and join the thread
    pub fn shutdown(&mut self) {
        self.sender.take();
        if let Some(handle) = self.handle.take() {
            if handle.thread().id() == std::thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                error!(worker = %self.name, "Worker thread panicked");
            }
        }
    }
}

impl Drop for SequentialWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}
