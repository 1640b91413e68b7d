use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::profile::{builtin_profiles, find_profile, AudioProfile};

/// Root configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub controller: ControllerConfig,
    /// Available profiles; the built-in catalogue when not configured.
    #[serde(default = "builtin_profiles")]
    pub profiles: Vec<AudioProfile>,
    /// Id of the profile used when none is requested.
    #[serde(default = "default_profile_id")]
    pub default_profile: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            controller: ControllerConfig::default(),
            profiles: builtin_profiles(),
            default_profile: default_profile_id(),
        }
    }
}

impl Config {
    /// Looks up a profile by id, falling back to the default profile.
    pub fn profile(&self, id: Option<&str>) -> Option<&AudioProfile> {
        find_profile(&self.profiles, id.unwrap_or(&self.default_profile))
    }
}

fn default_profile_id() -> String {
    "cdlossy".to_string()
}

/// Media engine configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    /// Path to ffmpeg binary
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: PathBuf,
    /// Path to ffprobe binary
    #[serde(default = "default_ffprobe_path")]
    pub ffprobe_path: PathBuf,
    /// Log level passed to ffmpeg
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: default_ffmpeg_path(),
            ffprobe_path: default_ffprobe_path(),
            log_level: default_log_level(),
        }
    }
}

impl EngineConfig {
    /// Sets the ffmpeg binary path.
    pub fn with_ffmpeg_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.ffmpeg_path = path.into();
        self
    }

    /// Sets the ffprobe binary path.
    pub fn with_ffprobe_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.ffprobe_path = path.into();
        self
    }

    /// Sets the ffmpeg log level.
    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }
}

fn default_ffmpeg_path() -> PathBuf {
    PathBuf::from("ffmpeg")
}

fn default_ffprobe_path() -> PathBuf {
    PathBuf::from("ffprobe")
}

fn default_log_level() -> String {
    "error".to_string()
}

/// Conversion controller configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct ControllerConfig {
    /// How long `convert` waits for an asynchronous start to fail
    #[serde(default = "default_start_timeout_ms")]
    pub start_timeout_ms: u64,
    /// Interval between position polls while converting
    #[serde(default = "default_progress_interval_ms")]
    pub progress_interval_ms: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            start_timeout_ms: default_start_timeout_ms(),
            progress_interval_ms: default_progress_interval_ms(),
        }
    }
}

impl ControllerConfig {
    pub fn start_timeout(&self) -> Duration {
        Duration::from_millis(self.start_timeout_ms)
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }

    /// Sets the start wait.
    pub fn with_start_timeout(mut self, timeout: Duration) -> Self {
        self.start_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Sets the progress poll interval.
    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval_ms = interval.as_millis() as u64;
        self
    }
}

fn default_start_timeout_ms() -> u64 {
    500
}

fn default_progress_interval_ms() -> u64 {
    250
}
