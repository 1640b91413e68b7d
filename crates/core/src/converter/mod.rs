//! Conversion controller.
//!
//! This module drives one conversion at a time through an engine [`Graph`]:
//!
//! - builds the `source -> decoder ~> encoder -> sink` pipeline on demand
//! - starts it and waits briefly for early failures
//! - polls the position and reports whole-second progress
//! - turns bus errors and end-of-stream into notifications
//! - cancels a running conversion and removes the partial file
//!
//! It also answers whether optional codecs are installed.
//!
//! # Example
//!
//! ```ignore
//! use soundconv_core::{new_controller, AudioProfile, ControllerConfig, FfmpegEngine, Notification};
//!
//! let engine = Arc::new(FfmpegEngine::detect(&EngineConfig::default()).await?);
//! let profile = Arc::new(AudioProfile::new("cdlossy", "CD Quality, Lossy", "-c:a libvorbis -q:a 6 -f ogg", "ogg"));
//! let (controller, mut notifications) = new_controller(engine, profile, ControllerConfig::default());
//!
//! controller.convert("file:///music/track.flac", "file:///music/track.ogg").await?;
//! while let Some(notification) = notifications.recv().await {
//!     if notification.is_terminal() {
//!         break;
//!     }
//! }
//! ```
//!
//! [`Graph`]: crate::engine::Graph

mod actor;
mod builder;
mod capabilities;
mod error;
mod events;
mod handle;
mod link;
mod progress;
mod state;

pub use builder::{build, Pipeline};
pub use capabilities::{require, supports, supports_profile, CodecFamily, SupportedCodecs};
pub use error::{ConstructError, ConverterError};
pub use events::{Notification, Notifications};
pub use handle::{new_controller, ControllerHandle};
pub use link::{DynamicLink, LinkOutcome};
pub use progress::ProgressTracker;
pub use state::RunState;
