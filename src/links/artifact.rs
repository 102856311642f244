//! Reading link lists and writing the cleaned link artifact.

use std::fs;
use std::io::{self, Write};
use std::path::Path;

use tracing::info;

use super::CanonicalUrl;
use crate::utils::write_atomically;

/// Read a UTF-8 text file as lines.
pub fn read_lines(path: &Path) -> io::Result<Vec<String>> {
    let content = fs::read_to_string(path)?;
    let content = content.strip_prefix('\u{feff}').unwrap_or(&content);
    Ok(content.lines().map(str::to_string).collect())
}

/// Write canonical URLs, one per line, replacing the file atomically.
pub fn write_links(path: &Path, urls: &[CanonicalUrl]) -> io::Result<()> {
    write_atomically(path, |w| {
        for url in urls {
            writeln!(w, "{}", url)?;
        }
        Ok(())
    })?;
    info!("Wrote {} canonical links to {}", urls.len(), path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::links::validate_lines;

    #[test]
    fn artifact_round_trips_through_validator() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cleaned_links.txt");

        let first = validate_lines([
            "\u{feff}https://twitter.com/Alice/status/111?s=20",
            "https://x.com/bob/status/222/",
        ]);
        write_links(&path, &first.accepted).unwrap();

        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "https://x.com/alice/status/111\nhttps://x.com/bob/status/222\n"
        );

        let second = validate_lines(read_lines(&path).unwrap());
        assert_eq!(second.accepted, first.accepted);
        assert_eq!(second.rejected, 0);
    }
}
