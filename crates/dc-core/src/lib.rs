//! dc-core: shared types for the dropconvert workspace.
//!
//! Typed ids, the error taxonomy, the job model and its state machine, the
//! event bus, configuration types and the capability traits the queue calls
//! into.

pub mod capability;
pub mod config;
pub mod error;
pub mod events;
pub mod ids;
pub mod job;
pub mod thumbnail;

pub use capability::{ConversionContext, ConversionRequest, Converter, ProgressSender, Thumbnailer};
pub use error::{Error, Result};
pub use ids::*;
pub use job::*;
pub use thumbnail::Thumbnail;
