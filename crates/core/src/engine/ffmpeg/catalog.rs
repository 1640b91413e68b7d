//! Installed ffmpeg element detection.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

use crate::engine::EngineError;

/// Kinds of elements ffmpeg can list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementKind {
    Encoder,
    Decoder,
    Muxer,
    Demuxer,
    Filter,
    InputProtocol,
    OutputProtocol,
}

impl ElementKind {
    pub const ALL: [ElementKind; 7] = [
        Self::Encoder,
        Self::Decoder,
        Self::Muxer,
        Self::Demuxer,
        Self::Filter,
        Self::InputProtocol,
        Self::OutputProtocol,
    ];

    /// Prefix used in qualified element names such as `encoder:flac`.
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Encoder => "encoder",
            Self::Decoder => "decoder",
            Self::Muxer => "muxer",
            Self::Demuxer => "demuxer",
            Self::Filter => "filter",
            Self::InputProtocol => "input",
            Self::OutputProtocol => "output",
        }
    }

    fn from_prefix(prefix: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.prefix() == prefix)
    }

    fn listing_flag(&self) -> &'static str {
        match self {
            Self::Encoder => "-encoders",
            Self::Decoder => "-decoders",
            Self::Muxer => "-muxers",
            Self::Demuxer => "-demuxers",
            Self::Filter => "-filters",
            Self::InputProtocol | Self::OutputProtocol => "-protocols",
        }
    }
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

/// Elements known to the installed ffmpeg.
#[derive(Debug, Clone, Default)]
pub struct ElementCatalog {
    elements: HashMap<ElementKind, HashSet<String>>,
}

impl ElementCatalog {
    /// Detect installed elements by running the ffmpeg listing commands.
    pub async fn detect(ffmpeg: &Path) -> Result<Self, EngineError> {
        let mut catalog = Self::default();
        let mut protocols: Option<String> = None;

        for kind in ElementKind::ALL {
            let output = match kind {
                ElementKind::InputProtocol | ElementKind::OutputProtocol => {
                    if protocols.is_none() {
                        protocols = Some(run_listing(ffmpeg, kind).await?);
                    }
                    protocols.clone().unwrap_or_default()
                }
                _ => run_listing(ffmpeg, kind).await?,
            };

            for name in Self::parse_listing(kind, &output) {
                catalog.insert(kind, name);
            }
        }

        tracing::debug!(
            encoders = catalog.count(ElementKind::Encoder),
            decoders = catalog.count(ElementKind::Decoder),
            muxers = catalog.count(ElementKind::Muxer),
            demuxers = catalog.count(ElementKind::Demuxer),
            filters = catalog.count(ElementKind::Filter),
            "Detected ffmpeg elements"
        );

        Ok(catalog)
    }

    /// Parses the output of an ffmpeg listing command.
    pub fn parse_listing(kind: ElementKind, output: &str) -> Vec<String> {
        match kind {
            ElementKind::Filter => output
                .lines()
                .filter_map(|line| {
                    let tokens: Vec<&str> = line.split_whitespace().collect();
                    // " T.C acompressor   A->A   Audio compressor."
                    if tokens.len() >= 3 && tokens[2].contains("->") {
                        Some(tokens[1].to_string())
                    } else {
                        None
                    }
                })
                .collect(),
            ElementKind::InputProtocol | ElementKind::OutputProtocol => {
                let wanted = if kind == ElementKind::InputProtocol {
                    "Input:"
                } else {
                    "Output:"
                };
                let mut in_section = false;
                let mut names = Vec::new();
                for line in output.lines() {
                    let trimmed = line.trim();
                    if trimmed.ends_with(':') {
                        in_section = trimmed == wanted;
                        continue;
                    }
                    if in_section && !trimmed.is_empty() {
                        names.push(trimmed.to_string());
                    }
                }
                names
            }
            _ => {
                let mut past_header = false;
                let mut names = Vec::new();
                for line in output.lines() {
                    let trimmed = line.trim();
                    if !past_header {
                        past_header = !trimmed.is_empty() && trimmed.chars().all(|c| c == '-');
                        continue;
                    }
                    let mut tokens = trimmed.split_whitespace();
                    let (Some(_flags), Some(name)) = (tokens.next(), tokens.next()) else {
                        continue;
                    };
                    names.push(name.to_string());
                }
                names
            }
        }
    }

    /// Adds an element. Comma-separated names are also added part by part.
    pub fn insert(&mut self, kind: ElementKind, name: impl Into<String>) {
        let name = name.into();
        let set = self.elements.entry(kind).or_default();
        if name.contains(',') {
            for part in name.split(',').filter(|p| !p.is_empty()) {
                set.insert(part.to_string());
            }
        }
        set.insert(name);
    }

    pub fn contains(&self, kind: ElementKind, name: &str) -> bool {
        self.elements
            .get(&kind)
            .is_some_and(|set| set.contains(name))
    }

    /// Looks up a qualified name such as `decoder:mp3`.
    pub fn contains_qualified(&self, qualified: &str) -> bool {
        let Some((prefix, name)) = qualified.split_once(':') else {
            return false;
        };
        ElementKind::from_prefix(prefix).is_some_and(|kind| self.contains(kind, name))
    }

    pub fn count(&self, kind: ElementKind) -> usize {
        self.elements.get(&kind).map_or(0, HashSet::len)
    }

    pub fn is_empty(&self) -> bool {
        self.elements.values().all(HashSet::is_empty)
    }
}

async fn run_listing(ffmpeg: &Path, kind: ElementKind) -> Result<String, EngineError> {
    let output = Command::new(ffmpeg)
        .args(["-hide_banner", kind.listing_flag()])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .output()
        .await
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                EngineError::BinaryNotFound {
                    path: ffmpeg.to_path_buf(),
                }
            } else {
                EngineError::Io(e)
            }
        })?;

    if !output.status.success() {
        return Err(EngineError::ListingFailed {
            what: kind.listing_flag().trim_start_matches('-').to_string(),
            reason: format!("ffmpeg exited with code: {:?}", output.status.code()),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}
