//! Application configuration types.
//!
//! The top-level [`Config`] is deserialized from TOML by the application
//! crate. Every section defaults sensibly so an empty file is valid.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// Top-level Config
// ---------------------------------------------------------------------------

/// Root application configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub queue: QueueConfig,
    pub tools: ToolsConfig,
    pub conversion: ConversionConfig,
    pub thumbnails: ThumbnailConfig,
}

impl Config {
    /// Reject settings the engine cannot run with.
    pub fn check(&self) -> Result<()> {
        if self.queue.concurrency_limit == 0 {
            return Err(Error::Validation(
                "queue.concurrency_limit must be at least 1".into(),
            ));
        }
        if self.thumbnails.concurrency == 0 {
            return Err(Error::Validation(
                "thumbnails.concurrency must be at least 1".into(),
            ));
        }
        if self.conversion.max_size == 0 {
            return Err(Error::Validation(
                "conversion.max_size must be greater than 0".into(),
            ));
        }
        if self.thumbnails.size == 0 {
            return Err(Error::Validation(
                "thumbnails.size must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    /// Return a list of validation warnings (non-fatal issues).
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if HardwareAccelerator::parse(&self.conversion.hardware_accelerator).is_none() {
            warnings.push(format!(
                "conversion.hardware_accelerator '{}' is unknown; the software encoder will be used",
                self.conversion.hardware_accelerator
            ));
        }

        for (name, path) in [
            ("ffmpeg_path", &self.tools.ffmpeg_path),
            ("magick_path", &self.tools.magick_path),
        ] {
            if let Some(path) = path {
                if !path.exists() {
                    warnings.push(format!("tools.{name} {} does not exist", path.display()));
                }
            }
        }

        if !self.conversion.exclude_patterns.is_empty()
            && self.conversion.default_dest_dir.as_os_str().is_empty()
        {
            warnings.push(
                "conversion.exclude_patterns is set but default_dest_dir is empty".into(),
            );
        }

        if self.queue.max_completed == 0 {
            warnings.push(
                "queue.max_completed is 0; finished jobs are dropped from status immediately".into(),
            );
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Queue
// ---------------------------------------------------------------------------

/// Scheduler settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Maximum number of jobs running at once.
    pub concurrency_limit: usize,
    /// Refuse a path that already has a queued or running job.
    pub reject_duplicates: bool,
    /// Done/cancelled jobs kept in the table before the oldest are trimmed.
    pub max_completed: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: 2,
            reject_duplicates: true,
            max_completed: 1000,
        }
    }
}

// ---------------------------------------------------------------------------
// Tools
// ---------------------------------------------------------------------------

/// Explicit paths to external tools. Unset means "look on `PATH`".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub ffmpeg_path: Option<PathBuf>,
    pub magick_path: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Conversion
// ---------------------------------------------------------------------------

/// Hardware video encoder selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HardwareAccelerator {
    None,
    Amd,
    Nvidia,
}

impl HardwareAccelerator {
    /// Parse a configured name. Empty means [`HardwareAccelerator::None`];
    /// unknown names return `None`.
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "" | "none" => Some(HardwareAccelerator::None),
            "amd" => Some(HardwareAccelerator::Amd),
            "nvidia" => Some(HardwareAccelerator::Nvidia),
            _ => None,
        }
    }
}

/// Video bitrate preset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoQuality {
    Low,
    Medium,
    #[default]
    High,
}

/// What to do when the destination file already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollisionPolicy {
    /// Pick `name (N).ext`.
    #[default]
    Rename,
    Overwrite,
    Error,
}

/// Conversion settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversionConfig {
    /// Longest edge of converted video, in pixels.
    pub max_size: u32,
    /// `none`, `amd` or `nvidia`. Kept as text so an unknown value degrades
    /// to the software encoder with a warning instead of failing to load.
    pub hardware_accelerator: String,
    pub video_quality: VideoQuality,
    /// Extra ffmpeg arguments, split on whitespace.
    pub ffmpeg_custom_args: String,
    pub collision: CollisionPolicy,
    /// Destination for sources whose directory matches an exclude pattern.
    pub default_dest_dir: PathBuf,
    pub exclude_patterns: Vec<String>,
}

impl ConversionConfig {
    /// The configured accelerator, falling back to software encoding.
    pub fn accelerator(&self) -> HardwareAccelerator {
        HardwareAccelerator::parse(&self.hardware_accelerator).unwrap_or(HardwareAccelerator::None)
    }
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            max_size: 1920,
            hardware_accelerator: "none".into(),
            video_quality: VideoQuality::default(),
            ffmpeg_custom_args: String::new(),
            collision: CollisionPolicy::default(),
            default_dest_dir: PathBuf::from("~/Pictures"),
            exclude_patterns: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Thumbnails
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThumbnailConfig {
    /// Thumbnails generated at once, independent of the conversion limit.
    pub concurrency: usize,
    /// Bounding box edge, in pixels.
    pub size: u32,
}

impl Default for ThumbnailConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            size: 200,
        }
    }
}
