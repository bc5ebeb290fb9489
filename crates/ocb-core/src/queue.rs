//! Bounded job queue.
//!
//! Submissions go into a bounded `mpsc` channel whose capacity is injected at
//! construction; a dispatcher task pulls jobs only when one of the `workers`
//! permits is free, so at most `workers` jobs run at once and at most
//! `capacity` wait. Submission never blocks the update loop: a full queue is
//! reported as [`Error::QueueFull`] and the rejected job (with its workspace)
//! is dropped on the spot.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard,
    },
};

use async_trait::async_trait;
use tokio::{
    sync::{mpsc, Semaphore},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{
    domain::{ChatId, JobId},
    errors::Error,
    job::{Job, JobOutcome, NewJob},
    Result,
};

#[derive(Clone, Copy, Debug)]
pub struct QueueConfig {
    /// Jobs allowed to wait for a worker.
    pub capacity: usize,
    /// Jobs allowed to run concurrently.
    pub workers: usize,
}

/// Runs one job to completion. The job (and its workspace) is consumed.
#[async_trait]
pub trait JobRunner: Send + Sync {
    async fn run(&self, job: Job) -> JobOutcome;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobState {
    Queued,
    Running,
}

#[derive(Clone, Debug)]
pub struct ActiveJob {
    pub id: JobId,
    pub chat_id: ChatId,
    pub file_name: String,
    pub state: JobState,
    cancel: CancellationToken,
}

/// Receipt for an accepted submission.
#[derive(Clone, Copy, Debug)]
pub struct Submitted {
    pub id: JobId,
    /// Jobs waiting in the channel right after this one was added (1 = next up).
    pub position: usize,
}

#[derive(Default)]
struct Registry {
    jobs: Mutex<HashMap<JobId, ActiveJob>>,
}

impl Registry {
    fn lock(&self) -> MutexGuard<'_, HashMap<JobId, ActiveJob>> {
        self.jobs.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn insert(&self, job: ActiveJob) {
        self.lock().insert(job.id, job);
    }

    fn remove(&self, id: JobId) {
        self.lock().remove(&id);
    }

    fn mark_running(&self, id: JobId) {
        if let Some(j) = self.lock().get_mut(&id) {
            j.state = JobState::Running;
        }
    }
}

#[derive(Clone)]
pub struct JobQueue {
    tx: mpsc::Sender<Job>,
    cfg: QueueConfig,
    next_id: Arc<AtomicU64>,
    registry: Arc<Registry>,
}

impl JobQueue {
    /// Create the queue and spawn its dispatcher on the current runtime.
    ///
    /// The dispatcher stops once every `JobQueue` clone is dropped, the
    /// channel drains and the last running job finishes.
    pub fn start(cfg: QueueConfig, runner: Arc<dyn JobRunner>) -> (Self, JoinHandle<()>) {
        let cfg = QueueConfig {
            capacity: cfg.capacity.max(1),
            workers: cfg.workers.max(1),
        };
        let (tx, rx) = mpsc::channel(cfg.capacity);
        let registry = Arc::new(Registry::default());

        let handle = tokio::spawn(dispatch(rx, cfg.workers, runner, registry.clone()));
        info!(
            capacity = cfg.capacity,
            workers = cfg.workers,
            "job queue started"
        );

        (
            Self {
                tx,
                cfg,
                next_id: Arc::new(AtomicU64::new(1)),
                registry,
            },
            handle,
        )
    }

    pub fn config(&self) -> QueueConfig {
        self.cfg
    }

    /// Jobs waiting for a worker.
    pub fn pending(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    /// Jobs currently holding a worker.
    pub fn running(&self) -> usize {
        self.registry
            .lock()
            .values()
            .filter(|j| j.state == JobState::Running)
            .count()
    }

    pub fn try_submit(&self, new_job: NewJob) -> Result<Submitted> {
        let id = JobId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let cancel = CancellationToken::new();
        let job = new_job.into_job(id, cancel.clone());

        self.registry.insert(ActiveJob {
            id,
            chat_id: job.chat_id,
            file_name: job.file_name.clone(),
            state: JobState::Queued,
            cancel,
        });

        match self.tx.try_send(job) {
            Ok(()) => Ok(Submitted {
                id,
                position: self.pending().max(1),
            }),
            Err(mpsc::error::TrySendError::Full(job)) => {
                self.registry.remove(id);
                warn!(job_id = %id, chat_id = job.chat_id.0, "job queue full, rejecting");
                Err(Error::QueueFull {
                    capacity: self.cfg.capacity,
                })
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.registry.remove(id);
                Err(Error::External("job queue is shut down".to_string()))
            }
        }
    }

    /// Queued and running jobs of one chat, oldest first.
    pub fn active_for_chat(&self, chat_id: ChatId) -> Vec<ActiveJob> {
        let mut jobs: Vec<ActiveJob> = self
            .registry
            .lock()
            .values()
            .filter(|j| j.chat_id == chat_id)
            .cloned()
            .collect();
        jobs.sort_by_key(|j| j.id);
        jobs
    }

    /// Request cancellation of every queued or running job of a chat.
    ///
    /// Returns how many jobs were signalled. Each job still cleans up its
    /// workspace when it unwinds.
    pub fn cancel_chat(&self, chat_id: ChatId) -> usize {
        let registry = self.registry.lock();
        let mut n = 0;
        for job in registry.values().filter(|j| j.chat_id == chat_id) {
            if !job.cancel.is_cancelled() {
                job.cancel.cancel();
                n += 1;
            }
        }
        n
    }
}

async fn dispatch(
    mut rx: mpsc::Receiver<Job>,
    workers: usize,
    runner: Arc<dyn JobRunner>,
    registry: Arc<Registry>,
) {
    let permits = Arc::new(Semaphore::new(workers));

    loop {
        // Take a worker slot first so waiting jobs stay in the bounded channel.
        let Ok(permit) = permits.clone().acquire_owned().await else {
            break;
        };
        let Some(job) = rx.recv().await else {
            break;
        };

        let id = job.id;
        registry.mark_running(id);

        let runner = runner.clone();
        let registry = registry.clone();
        tokio::spawn(async move {
            let _permit = permit;
            // Run in a nested task so a panic still releases the slot and the registry entry.
            match tokio::spawn(async move { runner.run(job).await }).await {
                Ok(outcome) => info!(job_id = %id, outcome = outcome.label(), "job finished"),
                Err(e) => error!(job_id = %id, "job task failed: {e}"),
            }
            registry.remove(id);
        });
    }

    // Every permit back means every spawned job has finished.
    let _ = permits.acquire_many(workers as u32).await;
    info!("job queue dispatcher stopped");
}
