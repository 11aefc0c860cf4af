//! Seams to the work the queue delegates: converting a file and rendering a
//! thumbnail. The queue only knows these traits; `dc-av` provides the
//! ffmpeg/ImageMagick implementations.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::ids::JobId;
use crate::job::JobKind;
use crate::thumbnail::Thumbnail;

/// Sender for reporting progress from within a conversion.
///
/// Wraps a callback that receives a fraction (0.0 -- 1.0) and an optional
/// speed label such as `"2.1x"`.
pub struct ProgressSender {
    callback: Box<dyn Fn(f32, Option<&str>) + Send + Sync>,
}

impl ProgressSender {
    pub fn new(callback: impl Fn(f32, Option<&str>) + Send + Sync + 'static) -> Self {
        Self {
            callback: Box::new(callback),
        }
    }

    /// A sender that discards all reports.
    pub fn noop() -> Self {
        Self {
            callback: Box::new(|_, _| {}),
        }
    }

    pub fn send(&self, progress: f32, speed: Option<&str>) {
        (self.callback)(progress, speed);
    }
}

impl std::fmt::Debug for ProgressSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressSender").finish_non_exhaustive()
    }
}

/// What to convert.
#[derive(Debug, Clone)]
pub struct ConversionRequest {
    pub job_id: JobId,
    pub source_path: PathBuf,
    pub kind: JobKind,
}

/// Per-job execution context handed to a [`Converter`].
#[derive(Debug, Clone)]
pub struct ConversionContext {
    /// Cancelled when the job's cancellation is requested.
    pub cancellation: CancellationToken,
    pub progress: Arc<ProgressSender>,
}

impl ConversionContext {
    pub fn new(cancellation: CancellationToken, progress: ProgressSender) -> Self {
        Self {
            cancellation,
            progress: Arc::new(progress),
        }
    }

    /// A context that is never cancelled and reports nowhere.
    pub fn detached() -> Self {
        Self::new(CancellationToken::new(), ProgressSender::noop())
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Cancellation checkpoint: `Err(Cancelled)` once cancellation was
    /// requested.
    pub fn checkpoint(&self) -> Result<()> {
        if self.cancellation.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Report progress, then pass a checkpoint.
    pub fn report(&self, progress: f32, speed: Option<&str>) -> Result<()> {
        self.progress.send(progress, speed);
        self.checkpoint()
    }
}

/// Converts one source file and returns where the output was written.
///
/// Implementations must observe [`ConversionContext::checkpoint`] often enough
/// that a cancelled job stops in bounded time, and must not leave partial
/// output behind when they return an error.
#[async_trait]
pub trait Converter: Send + Sync {
    async fn convert(&self, request: &ConversionRequest, ctx: &ConversionContext) -> Result<PathBuf>;
}

/// Renders a small preview of a file.
#[async_trait]
pub trait Thumbnailer: Send + Sync {
    async fn generate(&self, path: &Path) -> Result<Thumbnail>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn checkpoint_trips_after_cancel() {
        let ctx = ConversionContext::detached();
        assert!(ctx.checkpoint().is_ok());
        ctx.cancellation.cancel();
        assert!(matches!(ctx.checkpoint(), Err(Error::Cancelled)));
    }

    #[test]
    fn report_forwards_then_checks() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let ctx = ConversionContext::new(
            CancellationToken::new(),
            ProgressSender::new(move |p, s| sink.lock().push((p, s.map(str::to_owned)))),
        );
        ctx.report(0.25, Some("1.0x")).unwrap();
        ctx.cancellation.cancel();
        assert!(ctx.report(0.5, None).is_err());
        assert_eq!(
            *seen.lock(),
            vec![(0.25, Some("1.0x".to_string())), (0.5, None)]
        );
    }
}
