//! Dropconvert - background conversion queue for dropped media files
//!
//! This library crate exposes the queue engine for the CLI and for
//! integration testing.

pub mod config;
pub mod queue;
pub mod thumbnails;
