//! Job model and lifecycle state machine.
//!
//! ```text
//! Queued ──start──▶ Running ──complete──▶ Done
//!    │                 ├────fail────────▶ Failed
//!    └────cancel───────┴────cancel──────▶ Cancelled
//! ```
//!
//! `Done`, `Failed` and `Cancelled` are terminal. A "paused" job is not a
//! state of its own: it is a `Queued` job observed while the queue's pause
//! flag is set, see [`DisplayState::project`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::ids::JobId;
use crate::thumbnail::Thumbnail;

const VIDEO_EXTENSIONS: &[&str] = &[
    "mov", "mp4", "m4v", "mkv", "avi", "webm", "wmv", "flv", "mpg", "mpeg", "3gp", "mts", "m2ts",
];

const IMAGE_EXTENSIONS: &[&str] = &[
    "heic", "heif", "jpg", "jpeg", "png", "gif", "webp", "bmp", "tif", "tiff", "avif",
];

/// Coarse file classification, used for grouping only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Video,
    Image,
    Other,
}

impl JobKind {
    /// Classify by (case-insensitive) file extension.
    pub fn from_path(path: &Path) -> Self {
        let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
            return JobKind::Other;
        };
        let ext = ext.to_ascii_lowercase();
        if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
            JobKind::Video
        } else if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
            JobKind::Image
        } else {
            JobKind::Other
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            JobKind::Video => "video",
            JobKind::Image => "image",
            JobKind::Other => "other",
        })
    }
}

/// Stored lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Queued,
    Running,
    Done,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Done | JobState::Failed | JobState::Cancelled)
    }

    /// `Queued` or `Running`: the "active" side of a status snapshot.
    pub fn is_active(self) -> bool {
        !self.is_terminal()
    }

    pub fn can_transition_to(self, next: JobState) -> bool {
        use JobState::*;
        matches!(
            (self, next),
            (Queued, Running) | (Queued, Cancelled) | (Running, Done | Failed | Cancelled)
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            JobState::Queued => "queued",
            JobState::Running => "running",
            JobState::Done => "done",
            JobState::Failed => "failed",
            JobState::Cancelled => "cancelled",
        })
    }
}

/// State as presented to an observer, with the queue's pause flag applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisplayState {
    Queued,
    Paused,
    Running,
    Done,
    Failed,
    Cancelled,
}

impl DisplayState {
    pub fn project(state: JobState, queue_paused: bool) -> Self {
        match state {
            JobState::Queued if queue_paused => DisplayState::Paused,
            JobState::Queued => DisplayState::Queued,
            JobState::Running => DisplayState::Running,
            JobState::Done => DisplayState::Done,
            JobState::Failed => DisplayState::Failed,
            JobState::Cancelled => DisplayState::Cancelled,
        }
    }
}

/// Classification of a job failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    /// The capability rejected this file (unsupported, corrupt, tool error).
    Conversion,
    /// The engine failed (worker crash, lost task).
    Internal,
}

/// Why a job ended in `Failed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureReason {
    pub kind: FailureKind,
    pub message: String,
}

impl FailureReason {
    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Internal,
            message: message.into(),
        }
    }
}

impl From<&Error> for FailureReason {
    fn from(err: &Error) -> Self {
        Self {
            kind: err.failure_kind(),
            message: err.to_string(),
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// One file's conversion job.
///
/// Only the scheduler holds `Job` values; everything else sees
/// [`JobSnapshot`]s. All mutation goes through the transition methods, which
/// enforce the state machine and the output/error invariants.
#[derive(Debug, Clone)]
pub struct Job {
    id: JobId,
    source_path: PathBuf,
    kind: JobKind,
    state: JobState,
    progress: f32,
    speed: Option<String>,
    output_path: Option<PathBuf>,
    error: Option<FailureReason>,
    thumbnail: Option<Thumbnail>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

impl Job {
    /// A new `Queued` job for `source_path`.
    pub fn new(source_path: PathBuf) -> Self {
        let kind = JobKind::from_path(&source_path);
        Self {
            id: JobId::new(),
            source_path,
            kind,
            state: JobState::Queued,
            progress: 0.0,
            speed: None,
            output_path: None,
            error: None,
            thumbnail: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn source_path(&self) -> &Path {
        &self.source_path
    }

    pub fn kind(&self) -> JobKind {
        self.kind
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn progress(&self) -> f32 {
        self.progress
    }

    pub fn speed(&self) -> Option<&str> {
        self.speed.as_deref()
    }

    pub fn output_path(&self) -> Option<&Path> {
        self.output_path.as_deref()
    }

    pub fn error(&self) -> Option<&FailureReason> {
        self.error.as_ref()
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    /// Admission: `Queued -> Running`.
    pub fn start(&mut self) -> Result<()> {
        self.transition(JobState::Running, "start")?;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    /// Record a progress report. Progress never moves backwards and is
    /// ignored outside `Running`. Returns `true` if anything changed.
    pub fn record_progress(&mut self, progress: f32, speed: Option<String>) -> bool {
        if self.state != JobState::Running {
            return false;
        }
        let mut changed = false;
        let progress = if progress.is_finite() {
            progress.clamp(0.0, 1.0)
        } else {
            self.progress
        };
        if progress > self.progress {
            self.progress = progress;
            changed = true;
        }
        if speed.is_some() && speed != self.speed {
            self.speed = speed;
            changed = true;
        }
        changed
    }

    /// `Running -> Done`, recording where the output went.
    pub fn complete(&mut self, output_path: PathBuf) -> Result<()> {
        self.transition(JobState::Done, "complete")?;
        self.progress = 1.0;
        self.output_path = Some(output_path);
        Ok(())
    }

    /// `Running -> Failed` with a classified reason.
    pub fn fail(&mut self, reason: FailureReason) -> Result<()> {
        self.transition(JobState::Failed, "fail")?;
        self.error = Some(reason);
        Ok(())
    }

    /// `Queued | Running -> Cancelled`. Cancelling an already cancelled job
    /// succeeds without effect.
    pub fn cancel(&mut self) -> Result<()> {
        if self.state == JobState::Cancelled {
            return Ok(());
        }
        self.transition(JobState::Cancelled, "cancel")
    }

    pub fn set_thumbnail(&mut self, thumbnail: Thumbnail) {
        self.thumbnail = Some(thumbnail);
    }

    fn transition(&mut self, next: JobState, action: &'static str) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(Error::InvalidTransition {
                job_id: self.id,
                from: self.state,
                action,
            });
        }
        self.state = next;
        if next.is_terminal() {
            self.finished_at = Some(Utc::now());
        }
        Ok(())
    }

    /// Read-only copy of this job, with the pause projection applied.
    pub fn snapshot(&self, queue_paused: bool) -> JobSnapshot {
        JobSnapshot {
            id: self.id,
            source_path: self.source_path.clone(),
            kind: self.kind,
            state: self.state,
            display_state: DisplayState::project(self.state, queue_paused),
            progress: self.progress,
            speed: self.speed.clone(),
            output_path: self.output_path.clone(),
            error: self.error.clone(),
            thumbnail: self.thumbnail.clone(),
            created_at: self.created_at,
            started_at: self.started_at,
            finished_at: self.finished_at,
        }
    }
}

/// Point-in-time, read-only view of a [`Job`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub id: JobId,
    pub source_path: PathBuf,
    pub kind: JobKind,
    pub state: JobState,
    pub display_state: DisplayState,
    pub progress: f32,
    pub speed: Option<String>,
    pub output_path: Option<PathBuf>,
    pub error: Option<FailureReason>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub thumbnail: Option<Thumbnail>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}
