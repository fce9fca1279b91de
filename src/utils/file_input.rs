//! Reading scan targets from plain text files
//!
//! One target per line; blank lines and `#` comments are skipped and
//! duplicates are dropped while keeping first-seen order.

use crate::error::{ScanError, ScanResult};
use crate::utils::target_parser::Target;
use std::collections::HashSet;
use std::path::Path;

/// Read targets from a file.
pub fn targets_from_file<P: AsRef<Path>>(path: P) -> ScanResult<Vec<Target>> {
    let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
        ScanError::ConfigError(format!(
            "Failed to read target file {}: {}",
            path.as_ref().display(),
            e
        ))
    })?;
    parse_target_lines(&content)
}

/// Parse target lines; the first invalid entry aborts with its line number.
pub fn parse_target_lines(content: &str) -> ScanResult<Vec<Target>> {
    let mut seen = HashSet::new();
    let mut targets = Vec::new();

    for (index, line) in content.lines().enumerate() {
        let line = line.split('#').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }
        let target = Target::new(line).map_err(|e| {
            ScanError::InvalidTarget(format!("line {}: {}", index + 1, e))
        })?;
        if seen.insert(target.host().to_string()) {
            targets.push(target);
        }
    }

    Ok(targets)
}
