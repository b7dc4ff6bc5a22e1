// src/gps/replay.rs
//! Recorded track files: one JSON reading per line

use crate::error::{Result, TrackerError};
use crate::tracker::Reading;

/// Parse one line of a track file.
///
/// Blank lines and lines starting with `#` are skipped.
pub fn parse_replay_line(line: &str) -> Result<Option<Reading>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }

    serde_json::from_str(line)
        .map(Some)
        .map_err(|e| TrackerError::Parse(format!("Invalid track line: {}", e)))
}
