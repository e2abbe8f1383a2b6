//! Fixed pool of threads running deferred request work.
//!
//! Jobs queue on a bounded channel, so a burst of slow requests blocks the
//! event loops instead of growing memory without limit.
use std::io;
use std::panic;
use std::thread;
use std::thread::JoinHandle;

use crossbeam_channel::{
    bounded,
    Receiver,
    Sender,
};
use log::{
    debug,
    warn,
};
use thiserror::Error;

type Job = Box<dyn FnOnce() + Send + 'static>;

#[derive(Error, Debug)]
#[error("worker pool is shut down")]
pub struct PoolClosed;

pub struct WorkerPool {
    sender: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Start `size` workers sharing a queue of `depth` pending jobs.
    pub fn new(size: usize, depth: usize) -> io::Result<WorkerPool> {
        let size = size.max(1);
        let (sender, receiver) = bounded::<Job>(depth.max(1));
        let mut workers = Vec::with_capacity(size);
        for i in 0..size {
            let receiver = receiver.clone();
            let handle = thread::Builder::new()
                .name(format!("davbridge-worker-{}", i))
                .spawn(move || {
                    worker_loop(receiver);
                })?;
            workers.push(handle);
        }
        debug!("started {} workers", size);
        Ok(WorkerPool {
            sender: Some(sender),
            workers,
        })
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Queue `job`, waiting for room if the queue is full.
    pub fn submit<F>(&self, job: F) -> Result<(), PoolClosed>
    where
        F: FnOnce() + Send + 'static,
    {
        match &self.sender {
            Some(v) => v.send(Box::new(job)).map_err(|_| PoolClosed),
            None => Err(PoolClosed),
        }
    }
}

/// Closes the queue and waits for queued jobs to drain.
impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.sender = None;
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                warn!("worker exited abnormally");
            }
        }
    }
}

fn worker_loop(receiver: Receiver<Job>) {
    while let Ok(job) = receiver.recv() {
        if let Err(e) = panic::catch_unwind(panic::AssertUnwindSafe(job)) {
            warn!("job panicked: {:?}", e);
        }
    }
}
