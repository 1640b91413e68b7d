//! Testing utilities and mock implementations.
//!
//! [`MockEngine`] stands in for a real media engine so the conversion
//! controller can be exercised without codecs or subprocesses.
//!
//! # Example
//!
//! ```rust,ignore
//! use soundconv_core::testing::{fixtures, MockEngine, StartBehavior};
//!
//! let engine = MockEngine::new();
//! engine.set_start_behavior(StartBehavior::Async { settle_after: Duration::from_millis(50) });
//! let profile = fixtures::vorbis_profile();
//! ```

mod mock_engine;

pub use mock_engine::{MockEngine, MockGraph, StartBehavior};

/// Test fixtures and helper functions.
pub mod fixtures {
    use std::sync::Arc;

    use crate::profile::AudioProfile;

    /// The lossy CD profile, with an encoder description the mock understands.
    pub fn vorbis_profile() -> Arc<AudioProfile> {
        Arc::new(AudioProfile::new(
            "cdlossy",
            "CD Quality, Lossy",
            "vorbisenc quality=0.6 ! oggmux",
            "ogg",
        ))
    }

    /// A lossless profile for the mock engine.
    pub fn flac_profile() -> Arc<AudioProfile> {
        Arc::new(AudioProfile::new(
            "cdlossless",
            "CD Quality, Lossless",
            "flacenc ! flactag",
            "flac",
        ))
    }
}
