//! Validate links command.

use std::path::Path;

use anyhow::Context;
use console::style;

use crate::config::Settings;
use crate::links::{read_lines, validate_lines, write_links, ValidationReport};

/// Read raw input, validate it and print the counts.
pub(super) fn load_and_validate(input: &Path) -> anyhow::Result<ValidationReport> {
    let lines = read_lines(input)
        .with_context(|| format!("Failed to read input file {}", input.display()))?;
    let report = validate_lines(&lines);

    println!(
        "{} {} unique post link(s) from {} line(s)",
        style("✓").green(),
        report.accepted.len(),
        report.lines_read
    );
    if report.rejected > 0 {
        println!(
            "  {} {} line(s) without a valid post link",
            style("→").dim(),
            report.rejected
        );
    }
    if report.duplicates > 0 {
        println!(
            "  {} {} duplicate link(s) dropped",
            style("→").dim(),
            report.duplicates
        );
    }
    Ok(report)
}

/// Write the cleaned links file for `input`.
pub fn cmd_validate(settings: &Settings, input: &Path) -> anyhow::Result<()> {
    let report = load_and_validate(input)?;
    write_links(&settings.links_path, &report.accepted).with_context(|| {
        format!(
            "Failed to write links file {}",
            settings.links_path.display()
        )
    })?;
    println!(
        "{} Wrote {}",
        style("✓").green(),
        settings.links_path.display()
    );
    Ok(())
}
