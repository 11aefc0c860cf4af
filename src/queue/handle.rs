//! Caller-facing handle to a running queue.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dc_core::events::{EventBus, Subscription};
use dc_core::{Error, JobId, JobSnapshot, Result};
use tokio::sync::{mpsc, oneshot};

use super::ingress::validate_source;
use super::scheduler::Command;
use super::{CancelOutcome, QueueSnapshot, SubmitOutcome, ThumbnailStatus};
use crate::thumbnails::ThumbnailService;

/// Cheap, cloneable handle to the scheduler.
///
/// Every call only enqueues a request for the scheduler task and waits for
/// its reply; none of them waits for conversion work. Once the queue has
/// shut down, calls fail with [`Error::Internal`].
#[derive(Clone)]
pub struct QueueHandle {
    commands: mpsc::UnboundedSender<Command>,
    events: Arc<EventBus>,
    thumbnails: Arc<ThumbnailService>,
}

impl QueueHandle {
    pub(crate) fn new(
        commands: mpsc::UnboundedSender<Command>,
        events: Arc<EventBus>,
        thumbnails: Arc<ThumbnailService>,
    ) -> Self {
        Self {
            commands,
            events,
            thumbnails,
        }
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .map_err(|_| Error::Internal("queue is shut down".into()))?;
        rx.await
            .map_err(|_| Error::Internal("queue stopped before replying".into()))
    }

    /// Submit a batch of paths. Each path gets its own outcome, in order;
    /// invalid paths are rejected without affecting the rest of the batch.
    pub async fn submit(&self, paths: Vec<PathBuf>) -> Vec<SubmitOutcome> {
        let mut candidates = Vec::with_capacity(paths.len());
        for path in paths {
            let verdict = validate_source(&path).await;
            candidates.push((path, verdict));
        }
        let fallback: Vec<PathBuf> = candidates.iter().map(|(p, _)| p.clone()).collect();

        match self
            .request(|reply| Command::Submit { candidates, reply })
            .await
        {
            Ok(outcomes) => outcomes,
            Err(e) => fallback
                .into_iter()
                .map(|path| SubmitOutcome {
                    path,
                    result: Err(Error::Internal(e.to_string())),
                })
                .collect(),
        }
    }

    /// Submit one path.
    pub async fn submit_one(&self, path: impl Into<PathBuf>) -> Result<JobId> {
        self.submit(vec![path.into()])
            .await
            .pop()
            .map(|o| o.result)
            .unwrap_or_else(|| Err(Error::Internal("empty submission result".into())))
    }

    /// Cancel a job. A queued job is cancelled immediately; a running job is
    /// asked to stop and reports `Cancelled` through the event stream once
    /// it has.
    pub async fn cancel(&self, job_id: JobId) -> Result<CancelOutcome> {
        self.request(|reply| Command::Cancel { job_id, reply })
            .await?
    }

    /// Stop admitting jobs. Running jobs continue. Returns whether the queue
    /// was running before.
    pub async fn pause(&self) -> Result<bool> {
        self.request(|reply| Command::Pause { reply }).await
    }

    /// Resume admission. Returns whether the queue was paused before.
    pub async fn resume(&self) -> Result<bool> {
        self.request(|reply| Command::Resume { reply }).await
    }

    pub async fn status(&self) -> Result<QueueSnapshot> {
        self.request(|reply| Command::Status { reply }).await
    }

    pub async fn job(&self, job_id: JobId) -> Result<JobSnapshot> {
        self.request(|reply| Command::Job { job_id, reply }).await?
    }

    /// Remove finished jobs from the table; failed ones only if
    /// `include_failed`. Returns how many were removed.
    pub async fn clear_completed(&self, include_failed: bool) -> Result<usize> {
        self.request(|reply| Command::ClearCompleted {
            include_failed,
            reply,
        })
        .await
    }

    /// Cached thumbnail for `path`, or `Pending` while one is rendered.
    pub async fn thumbnail(&self, path: &Path) -> Result<ThumbnailStatus> {
        self.thumbnails.request(path).await
    }

    /// Forget the cached thumbnail or failure for `path`; the next
    /// [`thumbnail`](Self::thumbnail) call renders it again.
    pub async fn invalidate_thumbnail(&self, path: &Path) -> bool {
        self.thumbnails.invalidate(path).await
    }

    /// Live event stream, starting now.
    pub fn subscribe(&self) -> Subscription {
        self.events.subscribe()
    }

    /// Stop admission, cancel queued and running jobs, and wait until every
    /// worker has reported. Idempotent.
    pub async fn shutdown(&self) {
        if self.request(|reply| Command::Shutdown { reply }).await.is_err() {
            tracing::debug!("queue already stopped");
        }
    }

    /// Whether the scheduler task is still accepting requests.
    pub fn is_running(&self) -> bool {
        !self.commands.is_closed()
    }
}
