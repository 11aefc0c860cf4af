//! Queue event stream.
//!
//! [`EventBus`] fans every published event out to one unbounded channel per
//! subscriber. Each subscriber sees events in publication order, nothing is
//! dropped for a slow reader, and a subscriber only receives events
//! published after it subscribed (there is no replay buffer).

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::sync::mpsc;

use crate::ids::{EventId, JobId};
use crate::job::{FailureReason, JobKind, JobState};
use crate::thumbnail::Thumbnail;

/// Payload describing what happened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    // -- Job lifecycle -------------------------------------------------------
    JobAdded {
        job_id: JobId,
        source_path: PathBuf,
        kind: JobKind,
    },
    JobProgress {
        job_id: JobId,
        progress: f32,
        speed: Option<String>,
    },
    JobStateChanged {
        job_id: JobId,
        old_state: JobState,
        new_state: JobState,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        output_path: Option<PathBuf>,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        error: Option<FailureReason>,
    },

    // -- Queue ---------------------------------------------------------------
    QueuePaused,
    QueueResumed,
    /// The queue went from having active jobs to having none.
    QueueDrained,

    // -- Thumbnails ----------------------------------------------------------
    /// `job_id` is `None` when the file has no job in the queue.
    ThumbnailReady {
        job_id: Option<JobId>,
        source_path: PathBuf,
        thumbnail: Thumbnail,
    },
}

impl EventPayload {
    /// The job this event is about, if any.
    pub fn job_id(&self) -> Option<JobId> {
        match self {
            EventPayload::JobAdded { job_id, .. }
            | EventPayload::JobProgress { job_id, .. }
            | EventPayload::JobStateChanged { job_id, .. } => Some(*job_id),
            EventPayload::ThumbnailReady { job_id, .. } => *job_id,
            EventPayload::QueuePaused | EventPayload::QueueResumed | EventPayload::QueueDrained => {
                None
            }
        }
    }
}

/// A published event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    /// Bus-wide publication counter, strictly increasing.
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub payload: EventPayload,
}

#[derive(Default)]
struct BusInner {
    next_sequence: u64,
    subscribers: Vec<mpsc::UnboundedSender<Event>>,
    closed: bool,
}

/// Fan-out event bus.
#[derive(Default)]
pub struct EventBus {
    inner: Mutex<BusInner>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a new subscriber. It receives every event published from now
    /// on, until the bus is closed.
    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner.lock();
        if !inner.closed {
            inner.subscribers.push(tx);
        }
        Subscription { rx }
    }

    /// Publish an event to all current subscribers.
    ///
    /// Sequence assignment and delivery happen under one lock, so concurrent
    /// publishers cannot interleave differently for different subscribers.
    /// Subscribers whose receiving end is gone are pruned.
    pub fn publish(&self, payload: EventPayload) -> Event {
        let mut inner = self.inner.lock();
        inner.next_sequence += 1;
        let event = Event {
            id: EventId::new(),
            sequence: inner.next_sequence,
            timestamp: Utc::now(),
            payload,
        };
        if !inner.closed {
            inner
                .subscribers
                .retain(|tx| tx.send(event.clone()).is_ok());
        }
        tracing::trace!(sequence = event.sequence, payload = ?event.payload, "event published");
        event
    }

    /// Detach every subscriber. Their streams end after the events already
    /// delivered; later publications go nowhere.
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        inner.closed = true;
        inner.subscribers.clear();
    }

    pub fn subscriber_count(&self) -> usize {
        let mut inner = self.inner.lock();
        inner.subscribers.retain(|tx| !tx.is_closed());
        inner.subscribers.len()
    }
}

/// Receiving end of an [`EventBus`] subscription.
#[derive(Debug)]
pub struct Subscription {
    rx: mpsc::UnboundedReceiver<Event>,
}

impl Subscription {
    /// Wait for the next event. `None` once the bus has been closed and all
    /// delivered events were consumed.
    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.recv().await
    }

    /// Next already-delivered event, without waiting.
    pub fn try_recv(&mut self) -> Option<Event> {
        self.rx.try_recv().ok()
    }

    /// Drain everything delivered so far.
    pub fn drain(&mut self) -> Vec<Event> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }
}
