//! The scheduler task: sole owner of the job table.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dc_core::events::{EventBus, EventPayload};
use dc_core::{
    ConversionContext, ConversionRequest, Converter, Error, FailureReason, Job, JobId, JobSnapshot,
    JobState, ProgressSender, Result, Thumbnail,
};
use tokio::sync::{mpsc, oneshot};
use tokio::task::{self, JoinError, JoinSet};
use tokio_util::sync::CancellationToken;

use super::worker::{self, Outcome};
use super::{CancelOutcome, QueueOptions, QueueSnapshot, SubmitOutcome};

/// Requests from [`QueueHandle`](super::QueueHandle)s.
pub(crate) enum Command {
    Submit {
        /// Each requested path with its ingress verdict.
        candidates: Vec<(PathBuf, Result<PathBuf>)>,
        reply: oneshot::Sender<Vec<SubmitOutcome>>,
    },
    Cancel {
        job_id: JobId,
        reply: oneshot::Sender<Result<CancelOutcome>>,
    },
    Pause {
        reply: oneshot::Sender<bool>,
    },
    Resume {
        reply: oneshot::Sender<bool>,
    },
    Status {
        reply: oneshot::Sender<QueueSnapshot>,
    },
    Job {
        job_id: JobId,
        reply: oneshot::Sender<Result<JobSnapshot>>,
    },
    ClearCompleted {
        include_failed: bool,
        reply: oneshot::Sender<usize>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Asynchronous reports from workers and the thumbnail service.
pub(crate) enum Report {
    Progress {
        job_id: JobId,
        progress: f32,
        speed: Option<String>,
    },
    Thumbnail {
        path: PathBuf,
        thumbnail: Thumbnail,
    },
}

struct RunningJob {
    cancellation: CancellationToken,
}

pub(crate) struct Scheduler {
    options: QueueOptions,
    converter: Arc<dyn Converter>,
    events: Arc<EventBus>,
    reports: mpsc::UnboundedSender<Report>,

    /// All jobs, keyed by submission sequence.
    jobs: BTreeMap<u64, Job>,
    index: HashMap<JobId, u64>,
    next_seq: u64,
    /// Queued jobs in admission order.
    pending: VecDeque<JobId>,
    running: HashMap<JobId, RunningJob>,
    workers: JoinSet<(JobId, Outcome)>,
    /// Owning job of each worker task, for exits that carry no outcome.
    tasks: HashMap<task::Id, JobId>,

    paused: bool,
    had_active: bool,
    shutting_down: bool,
    shutdown_waiters: Vec<oneshot::Sender<()>>,
}

impl Scheduler {
    pub(crate) fn new(
        options: QueueOptions,
        converter: Arc<dyn Converter>,
        events: Arc<EventBus>,
        reports: mpsc::UnboundedSender<Report>,
    ) -> Self {
        let paused = options.start_paused;
        Self {
            options: QueueOptions {
                concurrency_limit: options.concurrency_limit.max(1),
                ..options
            },
            converter,
            events,
            reports,
            jobs: BTreeMap::new(),
            index: HashMap::new(),
            next_seq: 0,
            pending: VecDeque::new(),
            running: HashMap::new(),
            workers: JoinSet::new(),
            tasks: HashMap::new(),
            paused,
            had_active: false,
            shutting_down: false,
            shutdown_waiters: Vec::new(),
        }
    }

    /// Event loop. Reports are drained before commands and worker exits, so
    /// a job's last progress is applied before its terminal transition.
    pub(crate) async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut reports: mpsc::UnboundedReceiver<Report>,
    ) {
        tracing::info!(
            concurrency_limit = self.options.concurrency_limit,
            "conversion queue started"
        );
        let mut commands_open = true;

        loop {
            if self.shutting_down && self.workers.is_empty() {
                break;
            }

            tokio::select! {
                biased;
                Some(report) = reports.recv() => self.handle_report(report),
                cmd = commands.recv(), if commands_open => match cmd {
                    Some(cmd) => self.handle_command(cmd),
                    None => {
                        tracing::debug!("all queue handles dropped");
                        commands_open = false;
                        self.begin_shutdown();
                    }
                },
                Some(joined) = self.workers.join_next_with_id() => self.handle_worker_exit(joined),
                else => break,
            }
        }

        drop(commands);
        drop(reports);
        self.events.close();
        for waiter in self.shutdown_waiters.drain(..) {
            let _ = waiter.send(());
        }
        tracing::info!("conversion queue stopped");
    }

    fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Submit { candidates, reply } => {
                let _ = reply.send(self.submit(candidates));
            }
            Command::Cancel { job_id, reply } => {
                let _ = reply.send(self.cancel(job_id));
            }
            Command::Pause { reply } => {
                let _ = reply.send(self.set_paused(true));
            }
            Command::Resume { reply } => {
                let _ = reply.send(self.set_paused(false));
            }
            Command::Status { reply } => {
                let _ = reply.send(self.snapshot());
            }
            Command::Job { job_id, reply } => {
                let snapshot = self
                    .job(job_id)
                    .map(|job| job.snapshot(self.paused))
                    .ok_or_else(|| Error::not_found("job", job_id));
                let _ = reply.send(snapshot);
            }
            Command::ClearCompleted {
                include_failed,
                reply,
            } => {
                let _ = reply.send(self.clear_completed(include_failed));
            }
            Command::Shutdown { reply } => {
                self.shutdown_waiters.push(reply);
                self.begin_shutdown();
            }
        }
    }

    // -- Ingress -------------------------------------------------------------

    fn submit(&mut self, candidates: Vec<(PathBuf, Result<PathBuf>)>) -> Vec<SubmitOutcome> {
        let mut outcomes = Vec::with_capacity(candidates.len());

        for (path, verdict) in candidates {
            let result = verdict.and_then(|source| self.enqueue(source));
            if let Err(e) = &result {
                tracing::warn!(path = %path.display(), error = %e, "submission rejected");
            }
            outcomes.push(SubmitOutcome { path, result });
        }

        self.admit();
        self.check_drained();
        outcomes
    }

    fn enqueue(&mut self, source: PathBuf) -> Result<JobId> {
        if self.shutting_down {
            return Err(Error::Internal("queue is shutting down".into()));
        }
        if self.options.reject_duplicates && self.has_active_job_for(&source) {
            return Err(Error::AlreadyQueued(source));
        }

        let job = Job::new(source);
        let job_id = job.id();
        tracing::info!(job_id = %job_id, source = %job.source_path().display(), kind = %job.kind(), "job queued");
        self.events.publish(EventPayload::JobAdded {
            job_id,
            source_path: job.source_path().to_path_buf(),
            kind: job.kind(),
        });

        self.next_seq += 1;
        self.index.insert(job_id, self.next_seq);
        self.jobs.insert(self.next_seq, job);
        self.pending.push_back(job_id);
        Ok(job_id)
    }

    fn has_active_job_for(&self, source: &Path) -> bool {
        self.jobs
            .values()
            .any(|j| j.state().is_active() && j.source_path() == source)
    }

    // -- Admission -----------------------------------------------------------

    /// Start queued jobs, oldest first, while there is capacity and the
    /// queue is neither paused nor shutting down.
    fn admit(&mut self) {
        while !self.paused
            && !self.shutting_down
            && self.running.len() < self.options.concurrency_limit
        {
            let Some(job_id) = self.pending.pop_front() else {
                break;
            };
            if let Err(e) = self.start_job(job_id) {
                tracing::error!(job_id = %job_id, error = %e, "failed to start job");
            }
        }
    }

    fn start_job(&mut self, job_id: JobId) -> Result<()> {
        let job = self
            .job_mut(job_id)
            .ok_or_else(|| Error::not_found("job", job_id))?;
        job.start()?;
        let request = ConversionRequest {
            job_id,
            source_path: job.source_path().to_path_buf(),
            kind: job.kind(),
        };
        tracing::info!(job_id = %job_id, source = %request.source_path.display(), "job started");
        self.publish_transition(job_id, JobState::Queued);

        let cancellation = CancellationToken::new();
        let reports = self.reports.clone();
        let ctx = ConversionContext::new(
            cancellation.clone(),
            ProgressSender::new(move |progress, speed| {
                let _ = reports.send(Report::Progress {
                    job_id,
                    progress,
                    speed: speed.map(str::to_owned),
                });
            }),
        );

        let task = self
            .workers
            .spawn(worker::run(Arc::clone(&self.converter), request, ctx));
        self.tasks.insert(task.id(), job_id);
        self.running.insert(job_id, RunningJob { cancellation });
        Ok(())
    }

    // -- Worker results ------------------------------------------------------

    fn handle_report(&mut self, report: Report) {
        match report {
            Report::Progress {
                job_id,
                progress,
                speed,
            } => {
                let Some(job) = self.job_mut(job_id) else {
                    return;
                };
                if job.record_progress(progress, speed) {
                    let payload = EventPayload::JobProgress {
                        job_id,
                        progress: job.progress(),
                        speed: job.speed().map(str::to_owned),
                    };
                    self.events.publish(payload);
                }
            }
            Report::Thumbnail { path, thumbnail } => {
                let mut matched = Vec::new();
                for job in self.jobs.values_mut() {
                    if job.source_path() == path.as_path() {
                        job.set_thumbnail(thumbnail.clone());
                        matched.push(job.id());
                    }
                }
                if matched.is_empty() {
                    self.events.publish(EventPayload::ThumbnailReady {
                        job_id: None,
                        source_path: path,
                        thumbnail,
                    });
                } else {
                    for job_id in matched {
                        self.events.publish(EventPayload::ThumbnailReady {
                            job_id: Some(job_id),
                            source_path: path.clone(),
                            thumbnail: thumbnail.clone(),
                        });
                    }
                }
            }
        }
    }

    fn handle_worker_exit(
        &mut self,
        joined: std::result::Result<(task::Id, (JobId, Outcome)), JoinError>,
    ) {
        match joined {
            Ok((task_id, (job_id, outcome))) => {
                self.tasks.remove(&task_id);
                self.finish(job_id, outcome);
            }
            Err(e) => {
                // Workers contain panics themselves; this only fires if the
                // task was torn down from outside.
                tracing::error!(error = %e, "worker task ended abnormally");
                match self.tasks.remove(&e.id()) {
                    Some(job_id) => self.finish(
                        job_id,
                        Outcome::Failed(FailureReason::internal(format!("worker lost: {e}"))),
                    ),
                    None => tracing::warn!(task_id = %e.id(), "exit of an untracked worker task"),
                }
            }
        }
    }

    fn finish(&mut self, job_id: JobId, outcome: Outcome) {
        if self.running.remove(&job_id).is_none() {
            tracing::warn!(job_id = %job_id, "outcome for a job that is not running");
        }
        let Some(job) = self.job_mut(job_id) else {
            return;
        };

        let result = match outcome {
            Outcome::Done(output) => {
                tracing::info!(job_id = %job_id, output = %output.display(), "job done");
                job.complete(output)
            }
            Outcome::Failed(reason) => {
                tracing::warn!(job_id = %job_id, kind = ?reason.kind, error = %reason.message, "job failed");
                job.fail(reason)
            }
            Outcome::Cancelled => {
                tracing::info!(job_id = %job_id, "job cancelled");
                job.cancel()
            }
        };

        match result {
            Ok(()) => self.publish_transition(job_id, JobState::Running),
            Err(e) => tracing::error!(job_id = %job_id, error = %e, "dropping worker outcome"),
        }

        self.trim_completed();
        self.admit();
        self.check_drained();
    }

    // -- Control -------------------------------------------------------------

    fn cancel(&mut self, job_id: JobId) -> Result<CancelOutcome> {
        let state = self
            .job(job_id)
            .map(Job::state)
            .ok_or_else(|| Error::not_found("job", job_id))?;

        match state {
            JobState::Queued => {
                if let Some(job) = self.job_mut(job_id) {
                    job.cancel()?;
                }
                self.pending.retain(|id| *id != job_id);
                tracing::info!(job_id = %job_id, "queued job cancelled");
                self.publish_transition(job_id, JobState::Queued);
                self.trim_completed();
                self.check_drained();
                Ok(CancelOutcome::Cancelled)
            }
            JobState::Running => {
                if let Some(running) = self.running.get(&job_id) {
                    if !running.cancellation.is_cancelled() {
                        tracing::info!(job_id = %job_id, "cancellation requested");
                        running.cancellation.cancel();
                    }
                }
                Ok(CancelOutcome::Requested)
            }
            terminal => Ok(CancelOutcome::Finished(terminal)),
        }
    }

    /// Returns whether the flag changed. Events are only published on change.
    fn set_paused(&mut self, paused: bool) -> bool {
        if self.paused == paused {
            return false;
        }
        self.paused = paused;
        if paused {
            tracing::info!("queue paused");
            self.events.publish(EventPayload::QueuePaused);
        } else {
            tracing::info!("queue resumed");
            self.events.publish(EventPayload::QueueResumed);
            self.admit();
        }
        true
    }

    fn clear_completed(&mut self, include_failed: bool) -> usize {
        let before = self.jobs.len();
        self.retain_jobs(|job| match job.state() {
            JobState::Done | JobState::Cancelled => false,
            JobState::Failed => !include_failed,
            JobState::Queued | JobState::Running => true,
        });
        before - self.jobs.len()
    }

    /// Keep at most `max_completed` done/cancelled jobs, dropping those that
    /// finished first. Failed jobs stay until cleared explicitly.
    fn trim_completed(&mut self) {
        let mut finished: Vec<(chrono::DateTime<chrono::Utc>, u64)> = self
            .jobs
            .iter()
            .filter(|(_, j)| matches!(j.state(), JobState::Done | JobState::Cancelled))
            .filter_map(|(seq, j)| j.finished_at().map(|at| (at, *seq)))
            .collect();
        if finished.len() <= self.options.max_completed {
            return;
        }
        finished.sort();
        let excess = finished.len() - self.options.max_completed;
        for (_, seq) in finished.into_iter().take(excess) {
            if let Some(job) = self.jobs.remove(&seq) {
                self.index.remove(&job.id());
                tracing::debug!(job_id = %job.id(), "trimmed finished job");
            }
        }
    }

    fn begin_shutdown(&mut self) {
        if self.shutting_down {
            return;
        }
        tracing::info!(running = self.running.len(), queued = self.pending.len(), "shutting down queue");
        self.shutting_down = true;

        for job_id in std::mem::take(&mut self.pending) {
            if let Some(job) = self.job_mut(job_id) {
                if job.cancel().is_ok() {
                    self.publish_transition(job_id, JobState::Queued);
                }
            }
        }
        for running in self.running.values() {
            running.cancellation.cancel();
        }
        self.check_drained();
    }

    // -- Helpers -------------------------------------------------------------

    fn job(&self, job_id: JobId) -> Option<&Job> {
        self.index.get(&job_id).and_then(|seq| self.jobs.get(seq))
    }

    fn job_mut(&mut self, job_id: JobId) -> Option<&mut Job> {
        let seq = self.index.get(&job_id)?;
        self.jobs.get_mut(seq)
    }

    fn retain_jobs(&mut self, mut keep: impl FnMut(&Job) -> bool) {
        let index = &mut self.index;
        self.jobs.retain(|_, job| {
            let kept = keep(job);
            if !kept {
                index.remove(&job.id());
            }
            kept
        });
    }

    /// Publish `JobStateChanged` from `old_state` to the job's current state.
    fn publish_transition(&self, job_id: JobId, old_state: JobState) {
        let Some(job) = self.job(job_id) else {
            return;
        };
        self.events.publish(EventPayload::JobStateChanged {
            job_id,
            old_state,
            new_state: job.state(),
            output_path: job.output_path().map(Path::to_path_buf),
            error: job.error().cloned(),
        });
    }

    /// Publish `QueueDrained` when the last active job leaves the queue.
    fn check_drained(&mut self) {
        let active = self.jobs.values().any(|j| j.state().is_active());
        if self.had_active && !active {
            tracing::info!("queue drained");
            self.events.publish(EventPayload::QueueDrained);
        }
        self.had_active = active;
    }

    fn snapshot(&self) -> QueueSnapshot {
        let (active, completed): (Vec<_>, Vec<_>) = self
            .jobs
            .values()
            .map(|j| j.snapshot(self.paused))
            .partition(|s| s.state.is_active());
        QueueSnapshot {
            active,
            completed,
            paused: self.paused,
            concurrency_limit: self.options.concurrency_limit,
        }
    }
}
