//! In-process worker pool over crossbeam channels.

use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{self as chan, Receiver, RecvTimeoutError, Sender};
use tracing::{debug, error, warn};

use super::{QueueError, TaskHandle, TaskQueue, WaitError};

type Reply = Option<Vec<u8>>;

struct Job {
    payload: Vec<u8>,
    reply: Sender<Reply>,
}

/// A fixed set of worker threads pulling from one shared job channel.
///
/// Each worker owns the task function built for it by the factory passed to
/// [`LocalPool::start`], so per-worker state (such as a fetch directory) is
/// only ever touched by one task at a time.
pub struct LocalPool {
    jobs: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl LocalPool {
    /// Spawn `workers` threads; `make_task(id)` builds worker `id`'s task fn.
    ///
    /// A task returns `None` when it cannot produce a reply. A task that
    /// panics also yields `None`, and its worker keeps serving.
    pub fn start<F, T>(workers: usize, mut make_task: F) -> io::Result<Self>
    where
        F: FnMut(usize) -> T,
        T: FnMut(&[u8]) -> Reply + Send + 'static,
    {
        let (jobs, queue) = chan::unbounded::<Job>();
        let mut handles = Vec::with_capacity(workers);
        for id in 0..workers {
            let task = make_task(id);
            let queue = queue.clone();
            let handle = thread::Builder::new()
                .name(format!("census-worker-{id}"))
                .spawn(move || work(id, &queue, task))?;
            handles.push(handle);
        }
        Ok(Self {
            jobs: Some(jobs),
            workers: handles,
        })
    }

    /// Close the queue and wait for every worker to finish its current job.
    pub fn shutdown(mut self) {
        self.jobs.take();
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                warn!("worker thread panicked outside a task");
            }
        }
    }
}

impl Drop for LocalPool {
    /// Closes the queue without joining, so a stuck task cannot hang the caller.
    fn drop(&mut self) {
        self.jobs.take();
    }
}

fn work<T>(id: usize, queue: &Receiver<Job>, mut task: T)
where
    T: FnMut(&[u8]) -> Reply,
{
    debug!(worker = id, "worker started");
    for job in queue.iter() {
        let reply = match panic::catch_unwind(AssertUnwindSafe(|| task(&job.payload))) {
            Ok(reply) => reply,
            Err(_) => {
                error!(worker = id, "task panicked");
                None
            }
        };
        // The handle may already have been abandoned.
        let _ = job.reply.send(reply);
    }
    debug!(worker = id, "worker stopped");
}

impl TaskQueue for LocalPool {
    type Handle = LocalHandle;

    fn submit(&self, payload: Vec<u8>) -> Result<LocalHandle, QueueError> {
        let jobs = self.jobs.as_ref().ok_or(QueueError::Closed)?;
        let (reply, result) = chan::bounded(1);
        jobs.send(Job { payload, reply })
            .map_err(|_| QueueError::Closed)?;
        Ok(LocalHandle { result })
    }
}

/// Waits on the reply channel of one job.
pub struct LocalHandle {
    result: Receiver<Reply>,
}

impl TaskHandle for LocalHandle {
    fn get(&mut self, timeout: Option<Duration>) -> Result<Reply, WaitError> {
        match timeout {
            Some(timeout) => match self.result.recv_timeout(timeout) {
                Ok(reply) => Ok(reply),
                Err(RecvTimeoutError::Timeout) => Err(WaitError::Timeout),
                // The worker went away without replying.
                Err(RecvTimeoutError::Disconnected) => Ok(None),
            },
            None => Ok(self.result.recv().unwrap_or(None)),
        }
    }
}
