//! Whole-second progress de-duplication.

use std::time::Duration;

/// Rounds a stream time down to whole seconds.
pub fn whole_seconds(time: Duration) -> u64 {
    time.as_secs()
}

/// Emits each whole-second position at most once, in increasing order.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProgressTracker {
    last_reported: Option<u64>,
}

impl ProgressTracker {
    pub fn reset(&mut self) {
        self.last_reported = None;
    }

    /// Returns the second to report, if `position` moved past the last one.
    pub fn observe(&mut self, position: Duration) -> Option<u64> {
        let seconds = whole_seconds(position);
        match self.last_reported {
            Some(last) if seconds <= last => None,
            _ => {
                self.last_reported = Some(seconds);
                Some(seconds)
            }
        }
    }

    pub fn last_reported(&self) -> Option<u64> {
        self.last_reported
    }
}
