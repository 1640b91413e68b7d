//! Optional codec capability detection.
//!
//! Each probe asks the engine whether the one element a codec family
//! depends on can be instantiated. It is a presence check only and keeps no
//! state between calls.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::error::ConverterError;
use crate::engine::{Engine, LaunchOutcome};
use crate::metrics::CAPABILITY_PROBES;
use crate::profile::Profile;

/// Codec families whose support is optional.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodecFamily {
    /// MPEG-1 Layer 3.
    Mp3,
    /// WavPack lossless.
    WavPack,
    /// AAC in the MP4/M4A container family.
    Aac,
    Musepack,
    /// Windows Media Audio.
    Wma,
}

impl CodecFamily {
    pub const ALL: [CodecFamily; 5] = [
        Self::Mp3,
        Self::WavPack,
        Self::Aac,
        Self::Musepack,
        Self::Wma,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mp3 => "mp3",
            Self::WavPack => "wav",
            Self::Aac => "aac",
            Self::Musepack => "musepack",
            Self::Wma => "wma",
        }
    }

    /// Guesses the family from a file extension.
    pub fn for_extension(extension: &str) -> Option<Self> {
        match extension.to_ascii_lowercase().as_str() {
            "mp3" => Some(Self::Mp3),
            "wv" => Some(Self::WavPack),
            "m4a" | "mp4" | "aac" => Some(Self::Aac),
            "mpc" | "mp+" | "mpp" => Some(Self::Musepack),
            "wma" | "asf" => Some(Self::Wma),
            _ => None,
        }
    }
}

impl fmt::Display for CodecFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether the engine can handle `codec`.
pub fn supports<E: Engine + ?Sized>(engine: &E, codec: CodecFamily) -> bool {
    let element = engine.codec_element(codec);
    let supported = engine.element_available(element);

    tracing::debug!(codec = %codec, element, supported, "Probed codec support");
    CAPABILITY_PROBES
        .with_label_values(&[codec.as_str(), if supported { "supported" } else { "missing" }])
        .inc();

    supported
}

/// Like [`supports`], but returns an error naming the missing codec.
pub fn require<E: Engine + ?Sized>(engine: &E, codec: CodecFamily) -> Result<(), ConverterError> {
    if supports(engine, codec) {
        Ok(())
    } else {
        Err(ConverterError::CapabilityMissing { codec })
    }
}

/// Whether a throwaway graph can be built from the profile's description.
///
/// Instantiation warnings are logged and still count as supported.
pub fn supports_profile<E: Engine + ?Sized>(engine: &E, profile: &dyn Profile) -> bool {
    match engine.launch_check(profile.pipeline_description()) {
        LaunchOutcome::Built { warnings } => {
            for warning in warnings {
                tracing::warn!(profile = profile.name(), "{}", warning);
            }
            true
        }
        LaunchOutcome::Failed { error } => {
            tracing::debug!(profile = profile.name(), error = %error, "Profile not supported");
            false
        }
    }
}

/// Snapshot of every optional codec probe.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupportedCodecs {
    pub mp3: bool,
    pub wavpack: bool,
    pub aac: bool,
    pub musepack: bool,
    pub wma: bool,
}

impl SupportedCodecs {
    /// Runs all probes against `engine`.
    pub fn detect<E: Engine + ?Sized>(engine: &E) -> Self {
        Self {
            mp3: supports(engine, CodecFamily::Mp3),
            wavpack: supports(engine, CodecFamily::WavPack),
            aac: supports(engine, CodecFamily::Aac),
            musepack: supports(engine, CodecFamily::Musepack),
            wma: supports(engine, CodecFamily::Wma),
        }
    }

    pub fn get(&self, codec: CodecFamily) -> bool {
        match codec {
            CodecFamily::Mp3 => self.mp3,
            CodecFamily::WavPack => self.wavpack,
            CodecFamily::Aac => self.aac,
            CodecFamily::Musepack => self.musepack,
            CodecFamily::Wma => self.wma,
        }
    }

    /// Families that are available.
    pub fn available(&self) -> Vec<CodecFamily> {
        CodecFamily::ALL
            .into_iter()
            .filter(|codec| self.get(*codec))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_for_extension() {
        assert_eq!(CodecFamily::for_extension("MP3"), Some(CodecFamily::Mp3));
        assert_eq!(CodecFamily::for_extension("m4a"), Some(CodecFamily::Aac));
        assert_eq!(CodecFamily::for_extension("wv"), Some(CodecFamily::WavPack));
        assert_eq!(CodecFamily::for_extension("flac"), None);
    }

    #[test]
    fn test_available_codecs() {
        let codecs = SupportedCodecs {
            mp3: true,
            wma: true,
            ..Default::default()
        };
        assert_eq!(codecs.available(), vec![CodecFamily::Mp3, CodecFamily::Wma]);
        assert!(!codecs.get(CodecFamily::Aac));
    }

    #[test]
    fn test_serialize_snapshot() {
        let json = serde_json::to_string(&SupportedCodecs::default()).unwrap();
        assert_eq!(
            json,
            r#"{"mp3":false,"wavpack":false,"aac":false,"musepack":false,"wma":false}"#
        );
    }
}
