//! # dc-av
//!
//! External tool integration for dropconvert.
//!
//! - **Tool discovery** ([`ToolRegistry`]) -- locate ffmpeg and ImageMagick.
//! - **Command execution** ([`ToolCommand`]) -- async builder with
//!   cancellation and timeout support.
//! - **Conversion** ([`ToolConverter`]) -- the [`dc_core::Converter`] used in
//!   production: ffmpeg for video, ImageMagick for HEIC.
//! - **Thumbnails** ([`ToolThumbnailer`]) -- the [`dc_core::Thumbnailer`]
//!   used in production.
//! - **Destinations** ([`DestinationResolver`]) -- output placement and
//!   collision handling.

pub mod command;
pub mod converter;
pub mod destination;
pub mod ffmpeg;
pub mod magick;
mod process;
pub mod thumbnail;
pub mod tools;

pub use command::{ToolCommand, ToolOutput};
pub use converter::{Route, ToolConverter};
pub use destination::{Destination, DestinationResolver};
pub use thumbnail::ToolThumbnailer;
pub use tools::{ToolConfig, ToolInfo, ToolRegistry};
