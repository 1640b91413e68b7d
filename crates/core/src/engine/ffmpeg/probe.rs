//! Source inspection with ffprobe.

use serde::Deserialize;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

use super::file_url;
use crate::engine::{EngineError, Pad};

/// What ffprobe found in a source file.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceProbe {
    pub duration: Option<Duration>,
    /// First name of the detected container, e.g. `flac` or `mov`.
    pub format: String,
    pub audio_streams: Vec<AudioStream>,
    /// Streams of any other type, counted but never linked.
    pub other_streams: usize,
}

/// An audio stream inside a source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioStream {
    pub index: u32,
    pub codec: String,
    pub sample_rate: Option<u32>,
    pub channels: Option<u8>,
}

impl AudioStream {
    /// The pad this stream is exposed as.
    pub fn pad(&self) -> Pad {
        let mut caps = format!("audio/{}", self.codec);
        if let Some(rate) = self.sample_rate {
            caps.push_str(&format!(", rate={rate}"));
        }
        if let Some(channels) = self.channels {
            caps.push_str(&format!(", channels={channels}"));
        }
        Pad::new(format!("src_{}", self.index), caps)
    }
}

/// Runs ffprobe on `path`.
pub async fn probe_source(ffprobe: &Path, path: &Path) -> Result<SourceProbe, EngineError> {
    let output = Command::new(ffprobe)
        .args([
            "-v",
            "error",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
        ])
        .arg(file_url(path))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                EngineError::BinaryNotFound {
                    path: ffprobe.to_path_buf(),
                }
            } else {
                EngineError::Io(e)
            }
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let reason = stderr
            .lines()
            .rev()
            .find(|l| !l.trim().is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("ffprobe exited with code: {:?}", output.status.code()));
        return Err(EngineError::ProbeFailed { reason });
    }

    parse_probe_output(&String::from_utf8_lossy(&output.stdout))
}

/// Parses ffprobe JSON output.
pub fn parse_probe_output(output: &str) -> Result<SourceProbe, EngineError> {
    #[derive(Deserialize)]
    struct ProbeOutput {
        format: ProbeFormat,
        #[serde(default)]
        streams: Vec<ProbeStream>,
    }

    #[derive(Deserialize)]
    struct ProbeFormat {
        format_name: String,
        duration: Option<String>,
    }

    #[derive(Deserialize)]
    struct ProbeStream {
        index: u32,
        codec_type: Option<String>,
        codec_name: Option<String>,
        sample_rate: Option<String>,
        channels: Option<u8>,
    }

    let probe: ProbeOutput = serde_json::from_str(output).map_err(|e| EngineError::ProbeFailed {
        reason: format!("Failed to parse ffprobe output: {}", e),
    })?;

    let duration = probe
        .format
        .duration
        .as_deref()
        .and_then(|d| d.parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d >= 0.0)
        .map(Duration::from_secs_f64);

    let format = probe
        .format
        .format_name
        .split(',')
        .next()
        .unwrap_or("unknown")
        .to_string();

    let mut audio_streams = Vec::new();
    let mut other_streams = 0;
    for stream in probe.streams {
        if stream.codec_type.as_deref() == Some("audio") {
            audio_streams.push(AudioStream {
                index: stream.index,
                codec: stream.codec_name.unwrap_or_else(|| "unknown".to_string()),
                sample_rate: stream.sample_rate.and_then(|r| r.parse().ok()),
                channels: stream.channels,
            });
        } else {
            other_streams += 1;
        }
    }

    Ok(SourceProbe {
        duration,
        format,
        audio_streams,
        other_streams,
    })
}
