//! Cache-or-compute thumbnail service.
//!
//! Thumbnails are rendered outside the conversion queue with their own
//! concurrency limit, so previews never take a conversion slot. Each path is
//! rendered at most once; later requests are answered from the cache.

use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::mapref::entry::Entry as MapEntry;
use dashmap::DashMap;
use dc_core::{Error, Result, Thumbnail, Thumbnailer};
use futures::FutureExt;
use tokio::sync::Semaphore;

use crate::queue::{panic_message, ThumbnailStatus};

type ReadyCallback = Box<dyn Fn(PathBuf, Thumbnail) + Send + Sync>;

#[derive(Debug, Clone)]
enum Entry {
    Pending,
    Ready(Thumbnail),
    Failed(String),
}

pub struct ThumbnailService {
    thumbnailer: Arc<dyn Thumbnailer>,
    entries: DashMap<PathBuf, Entry>,
    permits: Arc<Semaphore>,
    on_ready: ReadyCallback,
}

impl ThumbnailService {
    /// `on_ready` is called once per rendered thumbnail, from the rendering
    /// task.
    pub fn new(
        thumbnailer: Arc<dyn Thumbnailer>,
        concurrency: usize,
        on_ready: impl Fn(PathBuf, Thumbnail) + Send + Sync + 'static,
    ) -> Self {
        Self {
            thumbnailer,
            entries: DashMap::new(),
            permits: Arc::new(Semaphore::new(concurrency.max(1))),
            on_ready: Box::new(on_ready),
        }
    }

    /// Return the cached thumbnail for `path`, or start rendering it and
    /// return [`ThumbnailStatus::Pending`]. A previous render failure is
    /// returned as an error without retrying.
    pub async fn request(self: &Arc<Self>, path: &Path) -> Result<ThumbnailStatus> {
        let path = canonical(path).await?;

        match self.entries.entry(path.clone()) {
            MapEntry::Occupied(entry) => match entry.get() {
                Entry::Ready(thumbnail) => Ok(ThumbnailStatus::Ready(thumbnail.clone())),
                Entry::Pending => Ok(ThumbnailStatus::Pending),
                Entry::Failed(message) => Err(Error::Conversion(message.clone())),
            },
            MapEntry::Vacant(entry) => {
                entry.insert(Entry::Pending);
                tokio::spawn(Arc::clone(self).render(path));
                Ok(ThumbnailStatus::Pending)
            }
        }
    }

    /// Drop the cached entry for `path` so the next request renders again.
    /// Returns whether anything was cached.
    pub async fn invalidate(&self, path: &Path) -> bool {
        let key = canonical(path).await.unwrap_or_else(|_| path.to_path_buf());
        let removed = self.entries.remove(&key).is_some();
        if removed {
            tracing::debug!(path = %key.display(), "thumbnail invalidated");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    async fn render(self: Arc<Self>, path: PathBuf) {
        let Ok(_permit) = self.permits.acquire().await else {
            return;
        };
        tracing::debug!(path = %path.display(), "rendering thumbnail");

        let rendered = AssertUnwindSafe(self.thumbnailer.generate(&path))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                Err(Error::Internal(format!(
                    "thumbnailer crashed: {}",
                    panic_message(panic.as_ref())
                )))
            });

        match rendered {
            Ok(thumbnail) => {
                tracing::debug!(path = %path.display(), bytes = thumbnail.len(), "thumbnail ready");
                self.entries
                    .insert(path.clone(), Entry::Ready(thumbnail.clone()));
                (self.on_ready)(path, thumbnail);
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "thumbnail failed");
                self.entries.insert(path, Entry::Failed(e.to_string()));
            }
        }
    }
}

async fn canonical(path: &Path) -> Result<PathBuf> {
    match tokio::fs::canonicalize(path).await {
        Ok(p) => Ok(p),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(Error::invalid_path(path, "file does not exist"))
        }
        Err(e) => Err(Error::invalid_path(path, e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::mpsc;

    struct Counting {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl Thumbnailer for Counting {
        async fn generate(&self, _path: &Path) -> Result<Thumbnail> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(Error::Conversion("cannot decode".into()));
            }
            Ok(Thumbnail::jpeg(b"\xff\xd8jpeg".to_vec()))
        }
    }

    fn service(fail: bool) -> (Arc<ThumbnailService>, Arc<Counting>, mpsc::UnboundedReceiver<PathBuf>) {
        let thumbnailer = Arc::new(Counting {
            calls: AtomicUsize::new(0),
            fail,
        });
        let (tx, rx) = mpsc::unbounded_channel();
        let svc = ThumbnailService::new(thumbnailer.clone(), 2, move |path, _| {
            let _ = tx.send(path);
        });
        (Arc::new(svc), thumbnailer, rx)
    }

    async fn settle<F: Fn() -> bool>(done: F) {
        for _ in 0..100 {
            if done() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn renders_once_then_serves_from_cache() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.heic");
        std::fs::write(&file, b"img").unwrap();
        let (svc, thumbnailer, mut ready) = service(false);

        assert_matches!(svc.request(&file).await, Ok(ThumbnailStatus::Pending));
        let notified = ready.recv().await.unwrap();
        assert_eq!(notified, std::fs::canonicalize(&file).unwrap());

        assert_matches!(svc.request(&file).await, Ok(ThumbnailStatus::Ready(t)) if t.mime == "image/jpeg");
        assert_matches!(svc.request(&file).await, Ok(ThumbnailStatus::Ready(_)));
        assert_eq!(thumbnailer.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failure_is_cached() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("broken.mov");
        std::fs::write(&file, b"???").unwrap();
        let (svc, thumbnailer, _ready) = service(true);

        assert_matches!(svc.request(&file).await, Ok(ThumbnailStatus::Pending));
        settle(|| thumbnailer.calls.load(Ordering::SeqCst) == 1).await;
        settle(|| {
            svc.entries
                .iter()
                .any(|e| matches!(e.value(), Entry::Failed(_)))
        })
        .await;

        assert_matches!(svc.request(&file).await, Err(Error::Conversion(m)) if m.contains("cannot decode"));
        assert_eq!(thumbnailer.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn missing_file_is_rejected() {
        let (svc, thumbnailer, _ready) = service(false);
        let err = svc.request(Path::new("/no/such/file.png")).await.unwrap_err();
        assert_matches!(err, Error::InvalidPath { .. });
        assert_eq!(thumbnailer.calls.load(Ordering::SeqCst), 0);
        assert!(svc.is_empty());
    }

    #[tokio::test]
    async fn invalidate_forces_rerender() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.png");
        std::fs::write(&file, b"img").unwrap();
        let (svc, thumbnailer, mut ready) = service(false);

        svc.request(&file).await.unwrap();
        ready.recv().await.unwrap();
        assert!(svc.invalidate(&file).await);
        assert!(!svc.invalidate(&file).await);

        assert_matches!(svc.request(&file).await, Ok(ThumbnailStatus::Pending));
        ready.recv().await.unwrap();
        assert_eq!(thumbnailer.calls.load(Ordering::SeqCst), 2);
    }

    struct Exploding;

    #[async_trait]
    impl Thumbnailer for Exploding {
        async fn generate(&self, _path: &Path) -> Result<Thumbnail> {
            panic!("decoder blew up")
        }
    }

    #[tokio::test]
    async fn panicking_thumbnailer_is_a_cached_failure() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.heic");
        std::fs::write(&file, b"img").unwrap();
        let svc = Arc::new(ThumbnailService::new(Arc::new(Exploding), 1, |_, _| {}));

        assert_matches!(svc.request(&file).await, Ok(ThumbnailStatus::Pending));
        settle(|| {
            svc.entries
                .iter()
                .any(|e| matches!(e.value(), Entry::Failed(_)))
        })
        .await;
        assert_matches!(
            svc.request(&file).await,
            Err(Error::Conversion(m)) if m.contains("thumbnailer crashed") && m.contains("decoder blew up")
        );
    }
}
