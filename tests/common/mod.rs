//! Shared test harness for integration tests.
//!
//! Provides [`TestHarness`] which starts a [`ConversionQueue`] over a
//! scriptable [`FakeConverter`] and [`FakeThumbnailer`], subscribes to its
//! events, and owns a temp directory for source files.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dc_core::events::{Event, EventPayload, Subscription};
use dc_core::{
    ConversionContext, ConversionRequest, Converter, Error, JobId, JobState, Result, Thumbnail,
    Thumbnailer,
};
use dropconvert::queue::{ConversionQueue, QueueHandle, QueueOptions};
use parking_lot::Mutex;
use tempfile::TempDir;
use tokio::sync::Semaphore;

const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

/// What the fake converter does for a given file name.
#[derive(Debug, Clone)]
pub enum Behavior {
    /// Return `<source>.out` immediately.
    Succeed,
    /// Fail with a conversion error.
    Fail(String),
    /// Panic inside the worker.
    Panic,
    /// Wait for a permit from [`FakeConverter::release`] or for cancellation.
    Block,
    /// Report each value as progress, then succeed.
    Progress(Vec<f32>),
    /// Wait for cancellation, then return `Ok` anyway.
    IgnoreCancel,
}

/// Converter whose behavior is scripted per file name.
pub struct FakeConverter {
    default: Behavior,
    scripts: Mutex<HashMap<String, Behavior>>,
    gate: Semaphore,
    running: AtomicUsize,
    max_running: AtomicUsize,
    started: Mutex<Vec<PathBuf>>,
}

impl FakeConverter {
    pub fn new(default: Behavior) -> Self {
        Self {
            default,
            scripts: Mutex::new(HashMap::new()),
            gate: Semaphore::new(0),
            running: AtomicUsize::new(0),
            max_running: AtomicUsize::new(0),
            started: Mutex::new(Vec::new()),
        }
    }

    pub fn script(&self, file_name: &str, behavior: Behavior) {
        self.scripts.lock().insert(file_name.to_string(), behavior);
    }

    /// Let `n` blocked conversions finish, in the order they started waiting.
    pub fn release(&self, n: usize) {
        self.gate.add_permits(n);
    }

    /// Highest number of conversions observed running at once.
    pub fn max_running(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }

    /// Source paths in the order conversions started.
    pub fn started(&self) -> Vec<PathBuf> {
        self.started.lock().clone()
    }

    fn behavior_for(&self, path: &Path) -> Behavior {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.scripts
            .lock()
            .get(&name)
            .cloned()
            .unwrap_or_else(|| self.default.clone())
    }
}

struct RunningGuard<'a>(&'a AtomicUsize);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Converter for FakeConverter {
    async fn convert(&self, request: &ConversionRequest, ctx: &ConversionContext) -> Result<PathBuf> {
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now, Ordering::SeqCst);
        let _guard = RunningGuard(&self.running);
        self.started.lock().push(request.source_path.clone());

        let output = request.source_path.with_extension("out");
        match self.behavior_for(&request.source_path) {
            Behavior::Succeed => Ok(output),
            Behavior::Fail(message) => Err(Error::Conversion(message)),
            Behavior::Panic => panic!("fake converter panicked"),
            Behavior::Block => {
                tokio::select! {
                    _ = ctx.cancellation.cancelled() => Err(Error::Cancelled),
                    permit = self.gate.acquire() => {
                        permit.map_err(|e| Error::Internal(e.to_string()))?.forget();
                        Ok(output)
                    }
                }
            }
            Behavior::Progress(steps) => {
                for step in steps {
                    ctx.checkpoint()?;
                    ctx.report(step, Some("1.5"))?;
                    tokio::task::yield_now().await;
                }
                Ok(output)
            }
            Behavior::IgnoreCancel => {
                ctx.cancellation.cancelled().await;
                Ok(output)
            }
        }
    }
}

/// Thumbnailer that encodes the file name as the "image".
#[derive(Default)]
pub struct FakeThumbnailer {
    pub calls: AtomicUsize,
}

#[async_trait]
impl Thumbnailer for FakeThumbnailer {
    async fn generate(&self, path: &Path) -> Result<Thumbnail> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if name.contains("broken") {
            return Err(Error::Conversion("cannot decode".into()));
        }
        Ok(Thumbnail::jpeg(name.into_bytes()))
    }
}

/// A running queue plus everything needed to drive and observe it.
pub struct TestHarness {
    pub queue: QueueHandle,
    pub converter: Arc<FakeConverter>,
    pub thumbnailer: Arc<FakeThumbnailer>,
    pub events: Subscription,
    pub dir: TempDir,
}

impl TestHarness {
    /// Queue with the given concurrency limit whose conversions block until
    /// released.
    pub fn new(concurrency_limit: usize) -> Self {
        Self::with(
            QueueOptions::default().with_concurrency(concurrency_limit),
            Behavior::Block,
        )
    }

    pub fn with(options: QueueOptions, default: Behavior) -> Self {
        let converter = Arc::new(FakeConverter::new(default));
        let thumbnailer = Arc::new(FakeThumbnailer::default());
        let queue = ConversionQueue::start(options, converter.clone(), thumbnailer.clone());
        let events = queue.subscribe();
        let dir = tempfile::tempdir().expect("failed to create temp dir");

        Self {
            queue,
            converter,
            thumbnailer,
            events,
            dir,
        }
    }

    /// Create a non-empty source file in the temp dir.
    pub fn file(&self, name: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        std::fs::write(&path, b"media").expect("failed to write fixture");
        path
    }

    /// Submit one file that must be accepted.
    pub async fn submit(&self, path: &Path) -> JobId {
        self.queue
            .submit_one(path)
            .await
            .unwrap_or_else(|e| panic!("submit {} failed: {e}", path.display()))
    }

    pub async fn next_event(&mut self) -> Event {
        tokio::time::timeout(EVENT_TIMEOUT, self.events.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event stream closed")
    }

    /// Skip events until one matches.
    pub async fn wait_for(&mut self, mut pred: impl FnMut(&EventPayload) -> bool) -> Event {
        loop {
            let event = self.next_event().await;
            if pred(&event.payload) {
                return event;
            }
        }
    }

    /// Wait until `job_id` enters `state`.
    pub async fn wait_state(&mut self, job_id: JobId, state: JobState) -> Event {
        self.wait_for(|p| {
            matches!(p, EventPayload::JobStateChanged { job_id: id, new_state, .. }
                if *id == job_id && *new_state == state)
        })
        .await
    }

    /// Collect every event up to and including the next `QueueDrained`.
    pub async fn until_drained(&mut self) -> Vec<Event> {
        let mut seen = Vec::new();
        loop {
            let event = self.next_event().await;
            let done = matches!(event.payload, EventPayload::QueueDrained);
            seen.push(event);
            if done {
                return seen;
            }
        }
    }
}

/// `(job_id, old, new)` for every state change in `events`.
pub fn transitions(events: &[Event]) -> Vec<(JobId, JobState, JobState)> {
    events
        .iter()
        .filter_map(|e| match &e.payload {
            EventPayload::JobStateChanged {
                job_id,
                old_state,
                new_state,
                ..
            } => Some((*job_id, *old_state, *new_state)),
            _ => None,
        })
        .collect()
}
