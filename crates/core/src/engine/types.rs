//! Types shared by every engine backend.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::mpsc;

/// One of the four stages a conversion graph is made of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    /// Reads the source file.
    Source,
    /// Detects the container/codec and decodes to raw audio.
    Decoder,
    /// Normalises and re-encodes according to the profile.
    Encoder,
    /// Writes the destination file.
    Sink,
}

impl StageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Source => "source",
            Self::Decoder => "decoder",
            Self::Encoder => "encoder",
            Self::Sink => "sink",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What to instantiate for a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageSpec<'a> {
    /// File-backed source.
    FileSource,
    /// Generic decoder that discovers the stream type at runtime.
    AutoDecoder,
    /// Encoder built from an engine-specific description.
    Encoder {
        description: &'a str,
        /// Prefix the description with a sample format/rate normalisation step.
        normalize: bool,
    },
    /// File-backed sink.
    FileSink { allow_overwrite: bool },
}

impl StageSpec<'_> {
    pub fn kind(&self) -> StageKind {
        match self {
            Self::FileSource => StageKind::Source,
            Self::AutoDecoder => StageKind::Decoder,
            Self::Encoder { .. } => StageKind::Encoder,
            Self::FileSink { .. } => StageKind::Sink,
        }
    }
}

/// Engine-level state of a graph or stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    #[default]
    Null,
    Ready,
    Paused,
    Playing,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Null => "null",
            Self::Ready => "ready",
            Self::Paused => "paused",
            Self::Playing => "playing",
        };
        f.write_str(name)
    }
}

/// Result of requesting a state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateChange {
    /// The state was reached synchronously.
    Success,
    /// The engine accepted the request and will finish it later.
    Async,
    /// Reached, but the graph cannot preroll (live sources).
    NoPreroll,
    /// The change failed.
    Failure,
}

/// Current and pending state as reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StateSnapshot {
    pub current: EngineState,
    pub pending: Option<EngineState>,
}

impl StateSnapshot {
    pub fn settled(current: EngineState) -> Self {
        Self {
            current,
            pending: None,
        }
    }

    /// Playing now, or on the way to playing.
    pub fn is_playing(&self) -> bool {
        self.current == EngineState::Playing || self.pending == Some(EngineState::Playing)
    }
}

/// An output endpoint exposed by the decoder once it has inspected the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pad {
    pub name: String,
    /// Media type description, e.g. `audio/flac, rate=44100, channels=2`.
    pub caps: String,
}

impl Pad {
    pub fn new(name: impl Into<String>, caps: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            caps: caps.into(),
        }
    }

    pub fn is_audio(&self) -> bool {
        self.caps.starts_with("audio/")
    }
}

/// Messages posted by a graph on its bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusMessage {
    Error {
        /// Stage that raised the error, when known.
        source: Option<String>,
        message: String,
        debug: Option<String>,
    },
    Warning {
        source: Option<String>,
        message: String,
    },
    EndOfStream,
}

impl BusMessage {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            source: None,
            message: message.into(),
            debug: None,
        }
    }
}

pub type BusSender = mpsc::UnboundedSender<BusMessage>;
pub type BusReceiver = mpsc::UnboundedReceiver<BusMessage>;

/// Outcome of instantiating a throwaway graph from a description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchOutcome {
    /// The graph could be instantiated; warnings are not fatal.
    Built { warnings: Vec<String> },
    /// Nothing could be instantiated.
    Failed { error: String },
}
