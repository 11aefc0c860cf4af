//! The conversion queue.
//!
//! A single scheduler task owns every [`Job`](dc_core::Job). Callers talk to
//! it through a cloneable [`QueueHandle`]; workers report back to it over a
//! channel instead of touching job state. Admission is strict FIFO, bounded
//! by the concurrency limit and gated by the pause flag. Pause never preempts
//! running work.
//!
//! ```no_run
//! use std::sync::Arc;
//! use dropconvert::queue::{ConversionQueue, QueueOptions};
//! # async fn demo(converter: Arc<dyn dc_core::Converter>, thumbnailer: Arc<dyn dc_core::Thumbnailer>) -> dc_core::Result<()> {
//! let queue = ConversionQueue::start(QueueOptions::default(), converter, thumbnailer);
//! let mut events = queue.subscribe();
//! let outcomes = queue.submit(vec!["/drop/a.mp4".into(), "/drop/b.heic".into()]).await;
//! while let Some(event) = events.recv().await {
//!     println!("{:?}", event.payload);
//! }
//! # Ok(())
//! # }
//! ```

mod handle;
mod ingress;
mod scheduler;
mod worker;

use std::path::PathBuf;
use std::sync::Arc;

use dc_core::config::Config;
use dc_core::events::EventBus;
use dc_core::{Converter, JobId, JobSnapshot, JobState, Thumbnail, Thumbnailer};
use serde::Serialize;
use tokio::sync::mpsc;

use crate::thumbnails::ThumbnailService;

pub use handle::QueueHandle;
pub use ingress::validate_source;
pub(crate) use worker::panic_message;

/// Scheduler settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueOptions {
    /// Maximum number of jobs running at once. Values below 1 are raised to 1.
    pub concurrency_limit: usize,
    /// Refuse a path that already has a queued or running job.
    pub reject_duplicates: bool,
    /// Done/cancelled jobs kept before the oldest are trimmed.
    pub max_completed: usize,
    /// Thumbnails rendered at once.
    pub thumbnail_concurrency: usize,
    /// Start with admission paused.
    pub start_paused: bool,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl QueueOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            concurrency_limit: config.queue.concurrency_limit,
            reject_duplicates: config.queue.reject_duplicates,
            max_completed: config.queue.max_completed,
            thumbnail_concurrency: config.thumbnails.concurrency,
            start_paused: false,
        }
    }

    pub fn with_concurrency(mut self, limit: usize) -> Self {
        self.concurrency_limit = limit;
        self
    }
}

/// Per-path result of a submission.
#[derive(Debug)]
pub struct SubmitOutcome {
    pub path: PathBuf,
    pub result: dc_core::Result<JobId>,
}

/// What a cancel request did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome", content = "state")]
pub enum CancelOutcome {
    /// The job was queued and is now cancelled.
    Cancelled,
    /// The job is running; it becomes cancelled once its worker stops.
    Requested,
    /// The job had already finished; nothing changed.
    Finished(JobState),
}

/// Consistent point-in-time view of the queue.
#[derive(Debug, Clone, Serialize)]
pub struct QueueSnapshot {
    /// `Queued` and `Running` jobs, in submission order.
    pub active: Vec<JobSnapshot>,
    /// `Done`, `Failed` and `Cancelled` jobs, in submission order.
    pub completed: Vec<JobSnapshot>,
    pub paused: bool,
    pub concurrency_limit: usize,
}

impl QueueSnapshot {
    pub fn running(&self) -> usize {
        self.active
            .iter()
            .filter(|j| j.state == JobState::Running)
            .count()
    }

    pub fn queued(&self) -> usize {
        self.active.len() - self.running()
    }

    pub fn find(&self, id: JobId) -> Option<&JobSnapshot> {
        self.active
            .iter()
            .chain(self.completed.iter())
            .find(|j| j.id == id)
    }
}

/// Answer to a thumbnail request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "thumbnail")]
pub enum ThumbnailStatus {
    Ready(Thumbnail),
    /// Being rendered; a `ThumbnailReady` event follows.
    Pending,
}

/// Entry point for starting a queue.
pub struct ConversionQueue;

impl ConversionQueue {
    /// Spawn the scheduler on the current tokio runtime and return a handle
    /// to it. The scheduler runs until [`QueueHandle::shutdown`] is called or
    /// every handle has been dropped.
    pub fn start(
        options: QueueOptions,
        converter: Arc<dyn Converter>,
        thumbnailer: Arc<dyn Thumbnailer>,
    ) -> QueueHandle {
        let events = Arc::new(EventBus::new());
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (report_tx, report_rx) = mpsc::unbounded_channel();

        let thumbnail_reports = report_tx.clone();
        let thumbnails = Arc::new(ThumbnailService::new(
            thumbnailer,
            options.thumbnail_concurrency,
            move |path, thumbnail| {
                let _ = thumbnail_reports.send(scheduler::Report::Thumbnail { path, thumbnail });
            },
        ));

        let scheduler = scheduler::Scheduler::new(options, converter, Arc::clone(&events), report_tx);
        tokio::spawn(scheduler.run(command_rx, report_rx));

        QueueHandle::new(command_tx, events, thumbnails)
    }
}
