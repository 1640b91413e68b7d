//! Parsing of ffmpeg `-progress` output.

use once_cell::sync::Lazy;
use regex_lite::Regex;
use std::time::Duration;

// Both keys carry microseconds; out_time_ms is misnamed upstream.
static OUT_TIME: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"^out_time_(?:us|ms)=(\d+)$").ok());

/// One meaningful line of progress output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressLine {
    /// Output timestamp reached so far.
    Position(Duration),
    /// ffmpeg has written its last progress block.
    End,
}

/// Parses a single `key=value` line.
pub fn parse_progress_line(line: &str) -> Option<ProgressLine> {
    let line = line.trim();
    if line == "progress=end" {
        return Some(ProgressLine::End);
    }

    let caps = OUT_TIME.as_ref()?.captures(line)?;
    let micros = caps.get(1)?.as_str().parse::<u64>().ok()?;
    Some(ProgressLine::Position(Duration::from_micros(micros)))
}
