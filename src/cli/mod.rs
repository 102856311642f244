//! Command-line interface for postharvest.

mod commands;
pub mod progress;

pub use commands::{
    exit_status_for, is_verbose, run, RunStatus, EXIT_INTERRUPTED, EXIT_SETUP, EXIT_SINK,
};
pub use progress::progress_println;
