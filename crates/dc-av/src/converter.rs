//! The tool-backed [`Converter`]: videos go through ffmpeg to H.264 MP4,
//! HEIC/HEIF photos through ImageMagick to JPEG.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use dc_core::config::ConversionConfig;
use dc_core::{ConversionContext, ConversionRequest, Converter, Error, Result};

use crate::destination::{Destination, DestinationResolver};
use crate::tools::{ToolRegistry, FFMPEG, MAGICK};
use crate::{ffmpeg, magick};

/// How a source file is converted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// ffmpeg to `.mp4`.
    Video,
    /// ImageMagick to `.jpg`.
    Image,
}

impl Route {
    /// Route for `path` by extension, or `None` if unsupported.
    pub fn for_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "mov" | "mkv" | "avi" | "m4v" | "webm" | "mp4" => Some(Route::Video),
            "heic" | "heif" => Some(Route::Image),
            _ => None,
        }
    }

    pub fn tool(self) -> &'static str {
        match self {
            Route::Video => FFMPEG,
            Route::Image => MAGICK,
        }
    }

    pub fn output_extension(self) -> &'static str {
        match self {
            Route::Video => ".mp4",
            Route::Image => ".jpg",
        }
    }
}

/// Converts files with the external tools found in a [`ToolRegistry`].
#[derive(Debug)]
pub struct ToolConverter {
    tools: ToolRegistry,
    config: ConversionConfig,
    destinations: DestinationResolver,
}

impl ToolConverter {
    pub fn new(tools: ToolRegistry, config: ConversionConfig) -> Self {
        let destinations = DestinationResolver::new(&config);
        Self {
            tools,
            config,
            destinations,
        }
    }
}

#[async_trait]
impl Converter for ToolConverter {
    async fn convert(&self, request: &ConversionRequest, ctx: &ConversionContext) -> Result<PathBuf> {
        let source = &request.source_path;
        let route = Route::for_path(source)
            .ok_or_else(|| Error::Conversion("unsupported format".into()))?;
        let program = self.tools.require(route.tool())?.path.clone();

        ctx.checkpoint()?;
        let Destination { path, placeholder } =
            self.destinations.resolve(source, route.output_extension())?;
        tracing::info!(job_id = %request.job_id, source = %source.display(), dest = %path.display(), tool = route.tool(), "converting");
        ctx.progress.send(0.0, None);

        let result = match route {
            Route::Video => {
                let args = ffmpeg::build_args(&self.config, source, &path);
                ffmpeg::run(&program, &args, ctx).await
            }
            Route::Image => magick::convert(&program, source, &path, ctx).await,
        };

        if result.is_err() && placeholder {
            remove_partial(&path);
        }
        self.destinations.release(&path);
        result.map(|()| path)
    }
}

/// Remove a partial output or unused placeholder.
fn remove_partial(dest: &Path) {
    match std::fs::remove_file(dest) {
        Ok(()) => tracing::debug!(dest = %dest.display(), "removed partial output"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(dest = %dest.display(), error = %e, "failed to remove partial output"),
    }
}
