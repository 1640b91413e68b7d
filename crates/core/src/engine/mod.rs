//! Media engine abstraction.
//!
//! The controller never talks to a codec library directly. It drives a
//! [`Graph`] of four stages (file source, auto-detecting decoder, encoder,
//! file sink) produced by an [`Engine`], and listens to the graph's bus for
//! errors and end-of-stream.
//!
//! [`FfmpegEngine`] is the production backend. Tests use
//! [`crate::testing::MockEngine`].

mod error;
pub mod ffmpeg;
mod traits;
mod types;

pub use error::EngineError;
pub use ffmpeg::FfmpegEngine;
pub use traits::{Engine, Graph, PadDiscoveredFn, PadLinker};
pub use types::{
    BusMessage, BusReceiver, BusSender, EngineState, LaunchOutcome, Pad, StageKind, StageSpec,
    StateChange, StateSnapshot,
};
