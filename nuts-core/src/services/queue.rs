//! In-process sync job queue
//!
//! Jobs are accepted on an unbounded channel and run by a dispatcher task on
//! a small pool of blocking threads. Retryable failures are retried with
//! exponential backoff; anything else ends the job.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use uuid::Uuid;

use crate::config::SyncConfig;
use crate::domain::result::{Error, Result};
use crate::domain::{SyncJob, SyncReport, SyncType};
use crate::ports::SyncQueue;
use crate::services::{CancellationToken, SyncService};

/// Upper bound on a single backoff delay
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Finished outcomes kept until collected; older ones are dropped first
const MAX_RETAINED_OUTCOMES: usize = 1024;

/// Final result of one accepted job
#[derive(Debug)]
pub struct JobOutcome {
    pub job: SyncJob,
    pub attempts: u32,
    pub result: Result<SyncReport>,
}

/// Finished outcomes waiting to be collected, oldest dropped past capacity
struct OutcomeBuffer {
    entries: Mutex<VecDeque<JobOutcome>>,
    capacity: usize,
}

impl OutcomeBuffer {
    fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    fn push(&self, outcome: JobOutcome) {
        let mut entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        while entries.len() >= self.capacity {
            if let Some(dropped) = entries.pop_front() {
                tracing::debug!(
                    connection_id = %dropped.job.connection_id,
                    "uncollected sync outcome dropped"
                );
            }
        }
        entries.push_back(outcome);
    }

    fn take(&self) -> Vec<JobOutcome> {
        let mut entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        entries.drain(..).collect()
    }
}

#[derive(Debug, Clone, Copy)]
struct RetryPolicy {
    max_attempts: u32,
    initial_backoff: Duration,
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based), doubled each time, with up to 20% jitter
    fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let base = self
            .initial_backoff
            .saturating_mul(1u32 << exp)
            .min(MAX_BACKOFF);
        let jitter_ms = (base.as_millis() as u64 / 5).max(1);
        base + Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
    }
}

/// Bounded worker pool behind the [`SyncQueue`] port
pub struct LocalSyncQueue {
    sender: Mutex<Option<mpsc::UnboundedSender<SyncJob>>>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    outcomes: Arc<OutcomeBuffer>,
    cancel: CancellationToken,
}

impl LocalSyncQueue {
    /// Start the dispatcher; must be called inside a tokio runtime
    pub fn start(sync: Arc<SyncService>, config: &SyncConfig) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let outcomes = Arc::new(OutcomeBuffer::new(MAX_RETAINED_OUTCOMES));
        let cancel = CancellationToken::new();
        let policy = RetryPolicy {
            max_attempts: config.max_attempts.max(1),
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
        };

        let dispatcher = tokio::spawn(dispatch(
            receiver,
            sync,
            Arc::new(Semaphore::new(config.workers.max(1))),
            policy,
            Arc::clone(&outcomes),
            cancel.clone(),
        ));

        tracing::debug!(workers = config.workers, "sync queue started");
        Self {
            sender: Mutex::new(Some(sender)),
            dispatcher: Mutex::new(Some(dispatcher)),
            outcomes,
            cancel,
        }
    }

    /// Stop accepting jobs and wait for every accepted job to finish
    ///
    /// Returns the outcomes of jobs finished since the last call.
    pub async fn shutdown(&self) -> Vec<JobOutcome> {
        drop(self.sender.lock().unwrap_or_else(|p| p.into_inner()).take());
        let dispatcher = self.dispatcher.lock().unwrap_or_else(|p| p.into_inner()).take();
        if let Some(handle) = dispatcher {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "sync dispatcher panicked");
            }
        }
        self.take_outcomes()
    }

    /// Ask running jobs to stop at their next checkpoint and skip queued ones
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Outcomes of jobs finished so far, clearing them
    ///
    /// Only the most recent outcomes are kept between calls.
    pub fn take_outcomes(&self) -> Vec<JobOutcome> {
        self.outcomes.take()
    }
}

#[async_trait]
impl SyncQueue for LocalSyncQueue {
    async fn enqueue_bank_sync(
        &self,
        user_id: Uuid,
        connection_id: Uuid,
        sync_type: SyncType,
    ) -> Result<()> {
        let job = SyncJob {
            user_id,
            connection_id,
            sync_type,
        };
        let guard = self.sender.lock().unwrap_or_else(|p| p.into_inner());
        let sender = guard
            .as_ref()
            .ok_or_else(|| Error::validation("sync queue is shut down"))?;
        sender
            .send(job)
            .map_err(|_| Error::validation("sync queue is shut down"))?;
        tracing::debug!(connection_id = %connection_id, sync_type = %sync_type, "sync job accepted");
        Ok(())
    }
}

async fn dispatch(
    mut receiver: mpsc::UnboundedReceiver<SyncJob>,
    sync: Arc<SyncService>,
    semaphore: Arc<Semaphore>,
    policy: RetryPolicy,
    outcomes: Arc<OutcomeBuffer>,
    cancel: CancellationToken,
) {
    let mut workers = JoinSet::new();

    while let Some(job) = receiver.recv().await {
        let permit = match Arc::clone(&semaphore).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => break,
        };
        let sync = Arc::clone(&sync);
        let outcomes = Arc::clone(&outcomes);
        let cancel = cancel.clone();
        workers.spawn(async move {
            let outcome = run_job(sync, job, policy, &cancel).await;
            outcomes.push(outcome);
            drop(permit);
        });

        while let Some(joined) = workers.try_join_next() {
            if let Err(e) = joined {
                tracing::error!(error = %e, "sync worker panicked");
            }
        }
    }

    while let Some(joined) = workers.join_next().await {
        if let Err(e) = joined {
            tracing::error!(error = %e, "sync worker panicked");
        }
    }
    tracing::debug!("sync queue drained");
}

async fn run_job(
    sync: Arc<SyncService>,
    job: SyncJob,
    policy: RetryPolicy,
    cancel: &CancellationToken,
) -> JobOutcome {
    let mut attempt = 0;
    loop {
        attempt += 1;
        let result = if cancel.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            let sync = Arc::clone(&sync);
            let token = cancel.clone();
            let (connection_id, sync_type) = (job.connection_id, job.sync_type);
            tokio::task::spawn_blocking(move || sync.sync_connection(connection_id, sync_type, &token))
                .await
                .unwrap_or_else(|e| Err(Error::Persistence(format!("sync worker failed: {}", e))))
        };

        match result {
            Err(e) if e.is_retryable() && attempt < policy.max_attempts => {
                let delay = policy.backoff(attempt);
                tracing::warn!(
                    connection_id = %job.connection_id,
                    attempt,
                    max_attempts = policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "sync attempt failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            result => {
                if let Err(e) = &result {
                    tracing::error!(
                        connection_id = %job.connection_id,
                        attempts = attempt,
                        error = %e,
                        "sync job gave up"
                    );
                }
                return JobOutcome {
                    job,
                    attempts: attempt,
                    result,
                };
            }
        }
    }
}
