//! ffmpeg command-line backend.

mod catalog;
mod description;
mod graph;
mod probe;
mod progress;

pub use catalog::{ElementCatalog, ElementKind};
pub use description::{EncoderSpec, NORMALIZE_FILTER};
pub use graph::FfmpegGraph;
pub use probe::{parse_probe_output, probe_source, AudioStream, SourceProbe};

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::EngineConfig;
use crate::converter::CodecFamily;
use crate::engine::{Engine, EngineError, LaunchOutcome};

/// Synthetic source used to check that an encode description can be built.
const LAUNCH_CHECK_SOURCE: &str = "filter:anullsrc";

/// Names a local file for ffmpeg, so a leading `-` is never read as an option.
pub(crate) fn file_url(path: &Path) -> OsString {
    let mut url = OsString::from("file:");
    url.push(path.as_os_str());
    url
}

#[derive(Debug)]
pub(crate) struct FfmpegSettings {
    pub(crate) ffmpeg_path: PathBuf,
    pub(crate) ffprobe_path: PathBuf,
    pub(crate) log_level: String,
    pub(crate) catalog: ElementCatalog,
}

/// Engine that runs conversions through the ffmpeg binaries.
#[derive(Debug, Clone)]
pub struct FfmpegEngine {
    settings: Arc<FfmpegSettings>,
}

impl FfmpegEngine {
    /// Detects the installed ffmpeg elements and creates the engine.
    pub async fn detect(config: &EngineConfig) -> Result<Self, EngineError> {
        let catalog = ElementCatalog::detect(&config.ffmpeg_path).await?;
        Ok(Self::with_catalog(config, catalog))
    }

    /// Creates the engine from an already known element catalog.
    pub fn with_catalog(config: &EngineConfig, catalog: ElementCatalog) -> Self {
        Self {
            settings: Arc::new(FfmpegSettings {
                ffmpeg_path: config.ffmpeg_path.clone(),
                ffprobe_path: config.ffprobe_path.clone(),
                log_level: config.log_level.clone(),
                catalog,
            }),
        }
    }

    pub fn catalog(&self) -> &ElementCatalog {
        &self.settings.catalog
    }
}

impl Engine for FfmpegEngine {
    type Graph = FfmpegGraph;

    fn name(&self) -> &str {
        "ffmpeg"
    }

    fn element_available(&self, element: &str) -> bool {
        self.settings.catalog.contains_qualified(element)
    }

    fn codec_element(&self, codec: CodecFamily) -> &'static str {
        match codec {
            CodecFamily::Mp3 => "decoder:mp3",
            CodecFamily::WavPack => "encoder:wavpack",
            CodecFamily::Aac => "demuxer:mov,mp4,m4a,3gp,3g2,mj2",
            CodecFamily::Musepack => "decoder:mpc8",
            CodecFamily::Wma => "decoder:wmav2",
        }
    }

    fn launch_check(&self, encode_description: &str) -> LaunchOutcome {
        if !self.element_available(LAUNCH_CHECK_SOURCE) {
            return LaunchOutcome::Failed {
                error: format!("No such element: {LAUNCH_CHECK_SOURCE}"),
            };
        }

        let spec = match EncoderSpec::parse(encode_description) {
            Ok(spec) => spec,
            Err(e) => {
                return LaunchOutcome::Failed {
                    error: e.to_string(),
                }
            }
        };

        let missing: Vec<String> = spec
            .required_elements()
            .into_iter()
            .filter(|(kind, name)| !self.settings.catalog.contains(*kind, name))
            .map(|(kind, name)| format!("{kind}:{name}"))
            .collect();

        if missing.is_empty() {
            LaunchOutcome::Built {
                warnings: spec.warnings,
            }
        } else {
            LaunchOutcome::Failed {
                error: format!("No such element: {}", missing.join(", ")),
            }
        }
    }

    fn new_graph(&self, name: &str) -> FfmpegGraph {
        FfmpegGraph::new(name, Arc::clone(&self.settings))
    }
}
