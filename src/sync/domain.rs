//! Execution queue: one worker thread per domain, FIFO jobs.
//!
//! Submission never blocks on the work itself. Completion is only observable
//! through the domain's [`Fence`]: [`signal`](ExecutionQueue::signal) enqueues
//! a marker that advances the fence once every earlier job has run.

use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;

use super::fence::{Domain, Fence, FenceToken};
use crate::util::{Error, Result};

type Job = Box<dyn FnOnce() + Send + 'static>;

enum Command {
    Run(Job),
    Stop,
}

/// Handle to a domain's worker.
pub struct ExecutionQueue {
    domain: Domain,
    fence: Arc<Fence>,
    /// Reservation and send happen under this lock so fence values reach the
    /// worker in the order they were handed out.
    tx: Mutex<Option<Sender<Command>>>,
    handle: Option<JoinHandle<()>>,
}

impl ExecutionQueue {
    pub fn spawn(domain: Domain) -> Result<Self> {
        let (tx, rx) = channel::<Command>();
        let handle = thread::Builder::new()
            .name(format!("nbtf-{}", domain.name()))
            .spawn(move || worker_loop(domain, rx))?;
        Ok(Self {
            domain,
            fence: Arc::new(Fence::new(domain)),
            tx: Mutex::new(Some(tx)),
            handle: Some(handle),
        })
    }

    pub fn domain(&self) -> Domain {
        self.domain
    }

    pub fn fence(&self) -> &Arc<Fence> {
        &self.fence
    }

    /// Enqueue a job; returns immediately.
    pub fn submit<F>(&self, job: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let tx = self.tx.lock();
        let tx = tx.as_ref().ok_or(Error::QueueClosed(self.domain.name()))?;
        tx.send(Command::Run(Box::new(job)))
            .map_err(|_| Error::QueueClosed(self.domain.name()))
    }

    /// Enqueue a fence signal behind all previously submitted jobs.
    pub fn signal(&self) -> Result<FenceToken> {
        let tx = self.tx.lock();
        let tx = tx.as_ref().ok_or(Error::QueueClosed(self.domain.name()))?;
        let token = self.fence.reserve();
        let fence = self.fence.clone();
        tx.send(Command::Run(Box::new(move || fence.signal(token.value))))
            .map_err(|_| Error::QueueClosed(self.domain.name()))?;
        Ok(token)
    }

    /// Stall this queue until `token` on `other` is reached.
    pub fn wait_on(&self, other: Arc<Fence>, token: FenceToken) -> Result<()> {
        let domain = self.domain;
        self.submit(move || {
            if !other.wait(token) {
                tracing::warn!(%domain, %token, "queue wait released without completion");
            }
        })
    }

    /// Stop accepting work, let queued jobs finish and join the worker.
    pub fn shutdown(&mut self) {
        if let Some(tx) = self.tx.lock().take() {
            let _ = tx.send(Command::Stop);
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for ExecutionQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(domain: Domain, rx: Receiver<Command>) {
    while let Ok(cmd) = rx.recv() {
        match cmd {
            Command::Run(job) => {
                // A panicking job must not take the queue (and its fence) down with it
                if std::panic::catch_unwind(std::panic::AssertUnwindSafe(job)).is_err() {
                    tracing::error!(%domain, "job panicked");
                }
            }
            Command::Stop => break,
        }
    }
    tracing::trace!(%domain, "queue stopped");
}
