//! Error types for the converter module.

use thiserror::Error;

use super::capabilities::CodecFamily;

/// Errors raised while building a conversion pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConstructError {
    /// The file-backed source stage could not be created.
    #[error("Could not create the file reader")]
    SourceUnavailable,

    /// The auto-detecting decoder stage could not be created.
    #[error("Could not create the decoder")]
    DecoderUnavailable,

    /// The profile's encode description could not be instantiated.
    #[error("Could not create the encoder for profile '{profile}'")]
    EncoderUnavailable { profile: String },

    /// The file-backed sink stage could not be created.
    #[error("Could not create the file writer")]
    SinkUnavailable,

    /// The static links between stages could not be made.
    #[error("Could not link the pipeline stages")]
    LinkFailure,
}

/// Errors surfaced by the conversion controller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConverterError {
    /// Building the pipeline failed.
    #[error(transparent)]
    Construct(#[from] ConstructError),

    /// The pipeline refused to start.
    #[error("{message}")]
    StartFailure { message: String },

    /// The pipeline failed while running. Only delivered as a notification.
    #[error("{message}")]
    Runtime { message: String },

    /// An optional codec is not installed.
    #[error("The plugin necessary for {codec} file access was not found")]
    CapabilityMissing { codec: CodecFamily },

    /// A conversion is already running.
    #[error("A conversion is already running")]
    Busy,

    /// The controller task has shut down.
    #[error("Conversion controller is no longer running")]
    ControllerClosed,
}

impl ConverterError {
    /// Creates a new start failure error.
    pub fn start_failure(message: impl Into<String>) -> Self {
        Self::StartFailure {
            message: message.into(),
        }
    }

    /// Creates a new runtime error.
    pub fn runtime(message: impl Into<String>) -> Self {
        Self::Runtime {
            message: message.into(),
        }
    }

    /// Whether the same request may succeed if tried again later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Busy | Self::StartFailure { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capability_message() {
        let err = ConverterError::CapabilityMissing {
            codec: CodecFamily::Mp3,
        };
        assert_eq!(
            err.to_string(),
            "The plugin necessary for mp3 file access was not found"
        );
    }

    #[test]
    fn test_construct_is_transparent() {
        let err: ConverterError = ConstructError::EncoderUnavailable {
            profile: "CD Quality, Lossy".to_string(),
        }
        .into();
        assert_eq!(
            err.to_string(),
            "Could not create the encoder for profile 'CD Quality, Lossy'"
        );
        assert!(!err.is_retryable());
        assert!(ConverterError::Busy.is_retryable());
    }
}
