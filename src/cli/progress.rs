//! Multi-progress display for concurrent scrapes.
//!
//! Also provides global progress context for coordinating output from
//! any part of the application during progress display.

use std::sync::{Mutex, OnceLock, PoisonError, RwLock};
use std::time::Duration;

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

use crate::utils::truncate_display;

/// Global reference to active progress display for coordinating output.
static ACTIVE_PROGRESS: OnceLock<RwLock<Option<MultiProgress>>> = OnceLock::new();

fn get_active_progress() -> &'static RwLock<Option<MultiProgress>> {
    ACTIVE_PROGRESS.get_or_init(|| RwLock::new(None))
}

/// Set the global active progress display.
pub fn set_active_progress(multi: Option<MultiProgress>) {
    if let Ok(mut guard) = get_active_progress().write() {
        *guard = multi;
    }
}

/// Print a message that coordinates with any active progress display.
/// Falls back to println! if no progress display is active.
pub fn progress_println(message: &str) {
    if let Ok(guard) = get_active_progress().read() {
        if let Some(ref multi) = *guard {
            let _ = multi.println(message);
            return;
        }
    }
    println!("{}", message);
}

fn style(template: &str) -> ProgressStyle {
    ProgressStyle::default_bar()
        .template(template)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▓░")
}

/// Summary bar plus one line per in-flight URL.
pub struct ScrapeProgress {
    slots: Mutex<Vec<Slot>>,
    summary_bar: ProgressBar,
}

struct Slot {
    bar: ProgressBar,
    url: Option<String>,
}

impl ScrapeProgress {
    pub fn new(num_slots: usize, total: u64) -> Self {
        let multi = MultiProgress::new();

        let summary_bar = multi.add(ProgressBar::new(total));
        summary_bar.set_style(style(
            "{spinner:.green} {msg} [{bar:30.cyan/blue}] {pos}/{len}",
        ));
        summary_bar.set_message("Scraping");

        let slots = (0..num_slots)
            .map(|_| {
                let bar = multi.add(ProgressBar::new_spinner());
                bar.set_style(style("  {spinner:.dim} {wide_msg}"));
                bar.set_message("idle");
                Slot { bar, url: None }
            })
            .collect();

        set_active_progress(Some(multi));

        Self {
            slots: Mutex::new(slots),
            summary_bar,
        }
    }

    /// Show `url` on a free slot.
    pub fn start(&self, url: &str) {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(slot) = slots.iter_mut().find(|s| s.url.is_none()) {
            slot.url = Some(url.to_string());
            slot.bar.set_style(style("  {spinner:.cyan} {wide_msg}"));
            slot.bar.set_message(truncate_display(url, 60));
            slot.bar.enable_steady_tick(Duration::from_millis(100));
        }
    }

    /// Free the slot showing `url`; terminal outcomes advance the summary.
    pub fn finish(&self, url: &str, terminal: bool) {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(slot) = slots.iter_mut().find(|s| s.url.as_deref() == Some(url)) {
            slot.url = None;
            slot.bar.disable_steady_tick();
            slot.bar.set_style(style("  {spinner:.dim} {wide_msg}"));
            slot.bar.set_message("idle");
        }
        if terminal {
            self.summary_bar.inc(1);
        }
    }

    pub fn set_summary(&self, succeeded: usize, failed: usize) {
        self.summary_bar
            .set_message(format!("Succeeded: {} | Failed: {}", succeeded, failed));
    }

    /// Finish all progress bars and clear the display.
    pub fn clear(&self) {
        let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        for slot in slots.iter() {
            slot.bar.finish_and_clear();
        }
        self.summary_bar.finish_and_clear();
        set_active_progress(None);
    }
}
