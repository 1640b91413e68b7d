use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of the controller across conversions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    /// No usable pipeline; the next conversion builds one.
    #[default]
    NeedsBuild,
    /// A pipeline is built and idle.
    Ready,
    /// The start transition is in flight.
    Starting,
    /// Converting; the progress timer is active.
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunState {
    /// Whether the state ends a run.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NeedsBuild => "needs_build",
            Self::Ready => "ready",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}
