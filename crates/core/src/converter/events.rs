//! Notifications sent to the controller's owner.

use serde::Serialize;
use tokio::sync::mpsc;

use super::error::ConverterError;

/// One event of a conversion run.
///
/// Per run: at most one `Duration`, then any number of `Progress`, then
/// exactly one of `Completion` or `Error`. Cancelled runs end silently.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Notification {
    /// Total length of the source.
    Duration { seconds: u64 },
    /// Position reached so far.
    Progress { seconds: u64 },
    /// The destination has been written completely.
    Completion,
    /// The run failed after it started.
    Error { message: String },
}

impl Notification {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completion | Self::Error { .. })
    }

    /// The failure this notification reports, if it is an `Error`.
    pub fn into_error(self) -> Option<ConverterError> {
        match self {
            Self::Error { message } => Some(ConverterError::runtime(message)),
            _ => None,
        }
    }
}

pub type Notifications = mpsc::UnboundedReceiver<Notification>;
pub(crate) type NotificationSender = mpsc::UnboundedSender<Notification>;
