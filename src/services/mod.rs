//! Service layer for postharvest business logic.
//!
//! This module contains domain logic separated from UI concerns.
//! Services report progress through events so the CLI can render them.

pub mod scrape;

pub use scrape::{RetryPolicy, RunReport, ScrapeConfig, ScrapeEvent, Scheduler, TaskState};
