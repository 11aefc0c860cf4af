//! The tool-backed [`Thumbnailer`].
//!
//! Videos: first frame through ffmpeg. Formats the `image` crate can decode
//! are resized in-process on the blocking pool. Everything else (HEIC in
//! particular) goes through ImageMagick.

use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use dc_core::{Error, JobKind, Result, Thumbnail, Thumbnailer};
use image::codecs::jpeg::JpegEncoder;
use image::ImageFormat;

use crate::command::ToolCommand;
use crate::magick;
use crate::tools::{ToolRegistry, FFMPEG, MAGICK};

const JPEG_QUALITY: u8 = 80;
const TOOL_TIMEOUT: Duration = Duration::from_secs(30);

/// Renders JPEG thumbnails fitted into a `size`x`size` box.
#[derive(Debug, Clone)]
pub struct ToolThumbnailer {
    tools: ToolRegistry,
    size: u32,
}

impl ToolThumbnailer {
    pub fn new(tools: ToolRegistry, size: u32) -> Self {
        Self { tools, size }
    }

    async fn from_video(&self, path: &Path) -> Result<Vec<u8>> {
        let ffmpeg = self.tools.require(FFMPEG)?;
        let output = ToolCommand::new(ffmpeg.path.clone())
            .args(video_args(path, self.size))
            .timeout(TOOL_TIMEOUT)
            .execute()
            .await?;
        Ok(output.stdout)
    }

    async fn from_magick(&self, path: &Path) -> Result<Vec<u8>> {
        let program = self.tools.require(MAGICK)?;
        magick::thumbnail(&program.path, path, self.size, TOOL_TIMEOUT).await
    }
}

/// ffmpeg arguments grabbing the first frame as MJPEG on stdout.
pub fn video_args(input: &Path, size: u32) -> Vec<String> {
    let input = input.to_string_lossy().to_string();
    let scale = format!("scale={size}:-1");
    [
        "-hide_banner",
        "-loglevel",
        "error",
        "-ss",
        "00:00:00",
        "-i",
        input.as_str(),
        "-vframes",
        "1",
        "-vf",
        scale.as_str(),
        "-f",
        "image2",
        "-c:v",
        "mjpeg",
        "pipe:1",
    ]
    .map(String::from)
    .to_vec()
}

/// Whether the `image` crate can decode this file.
fn decodable_in_process(path: &Path) -> bool {
    ImageFormat::from_path(path)
        .map(|f| f.reading_enabled())
        .unwrap_or(false)
}

/// Decode, shrink and JPEG-encode on the current thread.
fn render_in_process(path: &Path, size: u32) -> Result<Vec<u8>> {
    let img = image::open(path).map_err(|e| Error::Conversion(format!("cannot decode image: {e}")))?;
    let rgb = img.thumbnail(size, size).to_rgb8();
    let mut out = Cursor::new(Vec::new());
    JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY)
        .encode_image(&rgb)
        .map_err(|e| Error::Internal(format!("jpeg encoding failed: {e}")))?;
    Ok(out.into_inner())
}

#[async_trait]
impl Thumbnailer for ToolThumbnailer {
    async fn generate(&self, path: &Path) -> Result<Thumbnail> {
        let bytes = if JobKind::from_path(path) == JobKind::Video {
            self.from_video(path).await?
        } else if decodable_in_process(path) {
            let owned: PathBuf = path.to_path_buf();
            let size = self.size;
            let rendered = tokio::task::spawn_blocking(move || render_in_process(&owned, size))
                .await
                .map_err(|e| Error::Internal(format!("thumbnail task failed: {e}")))?;
            match rendered {
                Ok(bytes) => bytes,
                Err(e) if self.tools.is_available(MAGICK) => {
                    tracing::debug!(path = %path.display(), error = %e, "in-process decode failed; trying magick");
                    self.from_magick(path).await?
                }
                Err(e) => return Err(e),
            }
        } else {
            self.from_magick(path).await?
        };

        if bytes.is_empty() {
            return Err(Error::Conversion(format!(
                "no thumbnail produced for {}",
                path.display()
            )));
        }
        tracing::debug!(path = %path.display(), bytes = bytes.len(), "thumbnail generated");
        Ok(Thumbnail::jpeg(bytes))
    }
}
