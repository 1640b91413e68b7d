//! Error types for the engine layer.

use std::path::PathBuf;
use thiserror::Error;

use super::types::StageKind;

/// Errors raised by an engine backend.
#[derive(Debug, Error)]
pub enum EngineError {
    /// An external binary the backend depends on is missing.
    #[error("Binary not found at path: {path}")]
    BinaryNotFound { path: PathBuf },

    /// Listing the installed elements failed.
    #[error("Failed to list {what}: {reason}")]
    ListingFailed { what: String, reason: String },

    /// A required element is not installed.
    #[error("No such element: {element}")]
    ElementUnavailable { element: String },

    /// An encode description could not be understood.
    #[error("Invalid encode description: {reason}")]
    InvalidDescription { reason: String },

    /// The stage has not been added to the graph.
    #[error("Graph has no {stage} stage")]
    StageMissing { stage: StageKind },

    /// The stage must be stopped before it can be reconfigured.
    #[error("The {stage} stage is not stopped")]
    StageBusy { stage: StageKind },

    /// Two stages could not be linked.
    #[error("Could not link {from} to {to}: {reason}")]
    LinkRefused {
        from: StageKind,
        to: StageKind,
        reason: String,
    },

    /// Failed to inspect the source stream.
    #[error("Failed to probe source: {reason}")]
    ProbeFailed { reason: String },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    pub fn element_unavailable(element: impl Into<String>) -> Self {
        Self::ElementUnavailable {
            element: element.into(),
        }
    }

    pub fn invalid_description(reason: impl Into<String>) -> Self {
        Self::InvalidDescription {
            reason: reason.into(),
        }
    }

    pub fn link_refused(from: StageKind, to: StageKind, reason: impl Into<String>) -> Self {
        Self::LinkRefused {
            from,
            to,
            reason: reason.into(),
        }
    }
}
