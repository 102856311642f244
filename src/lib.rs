//! postharvest - bulk metadata harvester for social-media post links.
//!
//! Raw input is validated into canonical post URLs, each URL is rendered in
//! a pooled browser session, and the extracted post metadata is written to a
//! delimited table.

pub mod browser;
pub mod cli;
pub mod config;
pub mod extract;
pub mod links;
pub mod models;
pub mod services;
pub mod sink;
pub mod utils;
