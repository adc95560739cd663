// SPDX-License-Identifier: MPL-2.0
//! Single-worker execution contexts for the video and audio paths.
//!
//! Each [`Worker`] is one named thread draining a queue of jobs in submission
//! order. The playback loop submits with [`Worker::dispatch`], which never
//! blocks. A [`QueueBound::Bounded`] queue rejects the job when full; an
//! [`QueueBound::Unbounded`] queue always accepts it and relies on the loop's
//! read-ahead backpressure to stay small.
//!
//! A job that fails or panics is logged (and failures are reported through
//! the session's [`EventDispatcher`]); the worker keeps running so later
//! frames are still processed.

use crate::error::PlaybackError;
use crate::player::cancel::{CancelToken, CompletionLatch, LatchGuard};
use crate::player::events::EventDispatcher;
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, error, warn};

/// A unit of work run on a worker thread.
pub type Job = Box<dyn FnOnce() -> Result<(), PlaybackError> + Send + 'static>;

/// Why a job was not queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("worker queue is full")]
    Full,
    #[error("worker is shut down")]
    Closed,
}

/// Capacity of a worker queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueBound {
    Bounded(usize),
    Unbounded,
}

#[derive(Debug)]
enum JobSender {
    Bounded(mpsc::Sender<Job>),
    Unbounded(mpsc::UnboundedSender<Job>),
}

enum JobReceiver {
    Bounded(mpsc::Receiver<Job>),
    Unbounded(mpsc::UnboundedReceiver<Job>),
}

impl JobReceiver {
    fn blocking_recv(&mut self) -> Option<Job> {
        match self {
            Self::Bounded(receiver) => receiver.blocking_recv(),
            Self::Unbounded(receiver) => receiver.blocking_recv(),
        }
    }
}

fn job_channel(bound: QueueBound) -> (JobSender, JobReceiver) {
    match bound {
        QueueBound::Bounded(depth) => {
            let (sender, receiver) = mpsc::channel(depth.max(1));
            (JobSender::Bounded(sender), JobReceiver::Bounded(receiver))
        }
        QueueBound::Unbounded => {
            let (sender, receiver) = mpsc::unbounded_channel();
            (JobSender::Unbounded(sender), JobReceiver::Unbounded(receiver))
        }
    }
}

/// A named thread with a FIFO job queue.
#[derive(Debug)]
pub struct Worker {
    name: &'static str,
    sender: Option<JobSender>,
    handle: Option<JoinHandle<()>>,
    finished: Arc<CompletionLatch>,
}

impl Worker {
    /// Spawns the worker thread.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the thread cannot be spawned.
    pub fn spawn(
        name: &'static str,
        bound: QueueBound,
        cancel: Arc<CancelToken>,
        events: Arc<EventDispatcher>,
    ) -> std::io::Result<Self> {
        let (sender, mut receiver) = job_channel(bound);
        let finished = Arc::new(CompletionLatch::new());
        let latch = Arc::clone(&finished);

        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let _done = LatchGuard(&latch);
                while let Some(job) = receiver.blocking_recv() {
                    if cancel.is_cancelled() {
                        break;
                    }
                    run_job(name, job, &events);
                }
                debug!(worker = name, "worker exiting");
            })?;

        Ok(Self {
            name,
            sender: Some(sender),
            handle: Some(handle),
            finished,
        })
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Queues `job` without blocking.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Full`] if a bounded queue is at capacity and
    /// [`DispatchError::Closed`] after shutdown.
    pub fn dispatch(&self, job: Job) -> Result<(), DispatchError> {
        match self.sender.as_ref().ok_or(DispatchError::Closed)? {
            JobSender::Bounded(sender) => sender.try_send(job).map_err(|e| match e {
                TrySendError::Full(_) => DispatchError::Full,
                TrySendError::Closed(_) => DispatchError::Closed,
            }),
            JobSender::Unbounded(sender) => sender.send(job).map_err(|_| DispatchError::Closed),
        }
    }

    /// Closes the queue and waits up to `timeout` for queued jobs to finish.
    ///
    /// Returns `true` if the thread exited and was joined. On timeout the
    /// thread is detached and `false` is returned.
    pub fn shutdown(&mut self, timeout: Duration) -> bool {
        self.sender.take();
        let Some(handle) = self.handle.take() else {
            return true;
        };

        if self.finished.wait_timeout(timeout) {
            if handle.join().is_err() {
                error!(worker = self.name, "worker thread panicked");
            }
            true
        } else {
            warn!(
                worker = self.name,
                timeout_ms = timeout.as_millis(),
                "worker did not finish in time, detaching"
            );
            false
        }
    }
}

fn run_job(name: &'static str, job: Job, events: &EventDispatcher) {
    match catch_unwind(AssertUnwindSafe(job)) {
        Ok(Ok(()) | Err(PlaybackError::Cancelled)) => {}
        Ok(Err(err)) => {
            warn!(worker = name, %err, "job failed");
            events.report_error(err);
        }
        Err(payload) => {
            error!(worker = name, message = panic_message(payload.as_ref()), "job panicked");
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}
