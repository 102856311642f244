//! Data models for harvested posts.

mod post;

pub use post::{FailureEntry, FailureKind, Outcome, PostRecord, DATE_FORMAT};
