//! Shared utility functions.
//!
//! - `fs`: atomic file replacement for output artifacts
//! - `format`: human-readable formatting for summaries

mod format;
mod fs;

pub use format::{format_duration, truncate_display};
pub use fs::write_atomically;
