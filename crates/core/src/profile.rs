//! Encoding profiles.
//!
//! To the controller a profile is opaque: a display name and an encode
//! description that only the engine interprets.

use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::path::{Path, PathBuf};

/// An encoding target.
pub trait Profile: Send + Sync + Debug {
    /// Human-readable name, used in error messages.
    fn name(&self) -> &str;

    /// Engine-specific encode description.
    fn pipeline_description(&self) -> &str;
}

/// A profile loaded from configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioProfile {
    /// Short identifier used on the command line.
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// ffmpeg output options, e.g. `-c:a libvorbis -q:a 6 -f ogg`.
    pub pipeline: String,
    /// File extension of the output, without the dot.
    pub extension: String,
}

impl AudioProfile {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        pipeline: impl Into<String>,
        extension: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            pipeline: pipeline.into(),
            extension: extension.into(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Destination path for `source`: same stem, this profile's extension.
    ///
    /// Written next to the source unless `output_dir` is given. If that would
    /// be the source itself, `.converted` is added to the stem.
    pub fn destination_for(&self, source: &Path, output_dir: Option<&Path>) -> PathBuf {
        let stem = source
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "output".to_string());
        let dir = output_dir
            .map(Path::to_path_buf)
            .or_else(|| source.parent().map(Path::to_path_buf))
            .unwrap_or_default();

        let destination = dir.join(format!("{}.{}", stem, self.extension));
        if destination == source {
            dir.join(format!("{}.converted.{}", stem, self.extension))
        } else {
            destination
        }
    }
}

impl Profile for AudioProfile {
    fn name(&self) -> &str {
        &self.name
    }

    fn pipeline_description(&self) -> &str {
        &self.pipeline
    }
}

/// Profiles available when none are configured.
pub fn builtin_profiles() -> Vec<AudioProfile> {
    vec![
        AudioProfile::new(
            "cdlossy",
            "CD Quality, Lossy",
            "-c:a libvorbis -q:a 6 -f ogg",
            "ogg",
        )
        .with_description("Ogg Vorbis, variable bitrate around 192 kbit/s"),
        AudioProfile::new(
            "cdlossless",
            "CD Quality, Lossless",
            "-c:a flac -compression_level 8 -f flac",
            "flac",
        )
        .with_description("Free Lossless Audio Codec"),
        AudioProfile::new("mp3", "MP3", "-c:a libmp3lame -q:a 2 -f mp3", "mp3")
            .with_description("MPEG Layer 3, variable bitrate around 190 kbit/s"),
        AudioProfile::new("aac", "AAC", "-c:a aac -b:a 192k -f ipod", "m4a")
            .with_description("AAC in an MPEG-4 container"),
        AudioProfile::new("opus", "Opus", "-c:a libopus -b:a 128k -f opus", "opus")
            .with_description("Opus in an Ogg container"),
        AudioProfile::new("wav", "WAV", "-c:a pcm_s16le -f wav", "wav")
            .with_description("Uncompressed 16-bit PCM"),
    ]
}

/// Finds a profile by id.
pub fn find_profile<'a>(profiles: &'a [AudioProfile], id: &str) -> Option<&'a AudioProfile> {
    profiles.iter().find(|p| p.id == id)
}
