use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_channel::{Receiver, Sender, TrySendError};
use futures::future::BoxFuture;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub type TaskResult<T> = core::result::Result<T, TaskError>;

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("task queue is full ({0} pending)")]
    QueueFull(usize),

    #[error("task queue is shut down")]
    Closed,

    #[error("task registry lock poisoned")]
    RegistryPoisoned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    AddRating,
    PointsHistory,
    ResyncMissed,
    ResyncAll,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskKind::AddRating => "add_rating",
            TaskKind::PointsHistory => "points_history",
            TaskKind::ResyncMissed => "resync_missed",
            TaskKind::ResyncAll => "resync_all",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Completed,
    Cancelled,
    Panicked,
}

struct Job {
    id: Uuid,
    kind: TaskKind,
    token: CancellationToken,
    finished: Arc<AtomicBool>,
    done: oneshot::Sender<TaskStatus>,
    work: BoxFuture<'static, ()>,
}

/// Handle to one submitted unit of work.
#[derive(Debug)]
pub struct TaskTicket {
    pub id: Uuid,
    pub kind: TaskKind,
    done: oneshot::Receiver<TaskStatus>,
}

impl TaskTicket {
    /// Resolves once a worker has finished with the task
    pub async fn wait(self) -> TaskStatus {
        self.done.await.unwrap_or(TaskStatus::Cancelled)
    }
}

#[derive(Debug)]
struct TrackedTask {
    kind: TaskKind,
    finished: Arc<AtomicBool>,
}

#[derive(Debug, Default)]
struct TaskRegistry {
    tasks: HashMap<Uuid, TrackedTask>,
}

impl TaskRegistry {
    fn cleanup_complete(&mut self) {
        self.tasks.retain(|id, task| {
            let finished = task.finished.load(Ordering::Acquire);
            if finished {
                tracing::trace!(task = %id, kind = %task.kind, "pruning finished task");
            }
            !finished
        });
    }
}

/// Bounded queue of detached work drained by a single worker.
///
/// Jobs run one at a time in submission order, so a live rating can never overlap a resync
/// walking the same messages. Submitting never waits: a full queue is reported straight back
/// to the caller. The registry lock only guards bookkeeping and is never held across an await.
#[derive(Debug)]
pub struct TaskQueue {
    sender: Sender<Job>,
    registry: Mutex<TaskRegistry>,
    cancel: CancellationToken,
    worker: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl TaskQueue {
    pub fn new(capacity: usize, cancel: CancellationToken) -> Self {
        let (sender, receiver) = async_channel::bounded(capacity.max(1));
        let worker = tokio::spawn(run_worker(receiver));

        tracing::info!(capacity = capacity.max(1), "task queue started");

        Self {
            sender,
            registry: Mutex::new(TaskRegistry::default()),
            cancel,
            worker: tokio::sync::Mutex::new(Some(worker)),
        }
    }

    pub fn submit<F>(&self, kind: TaskKind, work: F) -> TaskResult<TaskTicket>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let id = Uuid::new_v4();
        let finished = Arc::new(AtomicBool::new(false));
        let (done, receiver) = oneshot::channel();

        let job = Job {
            id,
            kind,
            token: self.cancel.child_token(),
            finished: finished.clone(),
            done,
            work: Box::pin(work),
        };

        let mut registry = self
            .registry
            .lock()
            .map_err(|_| TaskError::RegistryPoisoned)?;
        registry.cleanup_complete();

        self.sender.try_send(job).map_err(|e| match e {
            TrySendError::Full(_) => TaskError::QueueFull(self.sender.len()),
            TrySendError::Closed(_) => TaskError::Closed,
        })?;

        registry.tasks.insert(id, TrackedTask { kind, finished });
        tracing::debug!(task = %id, kind = %kind, in_flight = registry.tasks.len(), "task submitted");

        Ok(TaskTicket {
            id,
            kind,
            done: receiver,
        })
    }

    /// Submitted tasks that have not finished yet
    pub fn in_flight(&self) -> usize {
        match self.registry.lock() {
            Ok(mut registry) => {
                registry.cleanup_complete();
                registry.tasks.len()
            }
            Err(_) => 0,
        }
    }

    /// Cancels everything outstanding, closes the queue and waits for the worker to exit
    pub async fn shutdown(&self) {
        tracing::info!(in_flight = self.in_flight(), "stopping task queue");
        self.cancel.cancel();
        self.sender.close();

        if let Some(worker) = self.worker.lock().await.take()
            && let Err(e) = worker.await
        {
            tracing::error!(error = ?e, "task worker ended abnormally");
        }
        tracing::info!("task queue stopped");
    }
}

async fn run_worker(receiver: Receiver<Job>) {
    while let Ok(job) = receiver.recv().await {
        let status = if job.token.is_cancelled() {
            TaskStatus::Cancelled
        } else {
            let mut handle = tokio::spawn(job.work);
            tokio::select! {
                joined = &mut handle => match joined {
                    Ok(()) => TaskStatus::Completed,
                    Err(e) => {
                        tracing::error!(task = %job.id, kind = %job.kind, error = ?e, "task panicked");
                        TaskStatus::Panicked
                    }
                },
                _ = job.token.cancelled() => {
                    handle.abort();
                    TaskStatus::Cancelled
                }
            }
        };

        job.finished.store(true, Ordering::Release);
        tracing::debug!(task = %job.id, kind = %job.kind, status = ?status, "task finished");
        _ = job.done.send(status);
    }
}
