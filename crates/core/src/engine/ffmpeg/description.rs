//! Encode descriptions for the ffmpeg backend.
//!
//! A profile's pipeline description is a list of ffmpeg output options,
//! for example `-c:a libvorbis -q:a 6 -f ogg`. Inputs, mappings and
//! overwrite flags belong to the graph and are refused or dropped here.

use super::catalog::ElementKind;
use crate::engine::EngineError;

/// Filter that normalises sample format, rate and layout before encoding.
pub const NORMALIZE_FILTER: &str = "aresample";

/// A parsed encode description.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EncoderSpec {
    /// Audio codec passed to `-c:a`.
    pub codec: String,
    /// Output container passed to `-f`.
    pub muxer: Option<String>,
    /// Audio filter chain, applied in order.
    pub filters: Vec<String>,
    /// Remaining output options, kept verbatim.
    pub args: Vec<String>,
    /// Non-fatal problems found while parsing.
    pub warnings: Vec<String>,
}

impl EncoderSpec {
    /// Parses an ffmpeg output option list.
    pub fn parse(description: &str) -> Result<Self, EngineError> {
        let tokens: Vec<&str> = description.split_whitespace().collect();
        if tokens.is_empty() {
            return Err(EngineError::invalid_description("description is empty"));
        }

        let mut spec = EncoderSpec::default();
        let mut codec = None;
        let mut i = 0;

        while i < tokens.len() {
            let token = tokens[i];
            let value = tokens.get(i + 1).copied();

            match token {
                "-c:a" | "-acodec" | "-codec:a" => {
                    codec = Some(required_value(token, value)?.to_string());
                    i += 2;
                }
                "-f" => {
                    spec.muxer = Some(required_value(token, value)?.to_string());
                    i += 2;
                }
                "-af" | "-filter:a" => {
                    let chain = required_value(token, value)?;
                    spec.filters.extend(
                        chain
                            .split(',')
                            .filter(|f| !f.is_empty())
                            .map(str::to_string),
                    );
                    i += 2;
                }
                "-vn" | "-sn" | "-dn" => {
                    i += 1;
                }
                "-i" => {
                    return Err(EngineError::invalid_description(
                        "inputs cannot be part of an encode description",
                    ));
                }
                "-y" | "-n" => {
                    spec.warnings
                        .push(format!("ignoring {token}; overwrite is set by the sink"));
                    i += 1;
                }
                "-map" => {
                    spec.warnings
                        .push("ignoring -map; streams are selected by the decoder".to_string());
                    i += if value.is_some() { 2 } else { 1 };
                }
                option if is_option(option) => {
                    spec.args.push(option.to_string());
                    match value {
                        Some(v) if !is_option(v) || is_number(v) => {
                            spec.args.push(v.to_string());
                            i += 2;
                        }
                        _ => i += 1,
                    }
                }
                stray => {
                    spec.warnings.push(format!("ignoring stray token '{stray}'"));
                    i += 1;
                }
            }
        }

        spec.codec = codec
            .ok_or_else(|| EngineError::invalid_description("no audio codec given (-c:a)"))?;
        Ok(spec)
    }

    /// Prepends the normalisation filter unless it is already first.
    pub fn with_normalization(mut self) -> Self {
        if self.filters.first().map(String::as_str) != Some(NORMALIZE_FILTER) {
            self.filters.insert(0, NORMALIZE_FILTER.to_string());
        }
        self
    }

    /// Elements that must be installed for this description to work.
    pub fn required_elements(&self) -> Vec<(ElementKind, String)> {
        let mut required = vec![(ElementKind::Encoder, self.codec.clone())];
        if let Some(muxer) = &self.muxer {
            required.push((ElementKind::Muxer, muxer.clone()));
        }
        for filter in &self.filters {
            let name = filter.split('=').next().unwrap_or(filter);
            required.push((ElementKind::Filter, name.to_string()));
        }
        required
    }

    /// Output options in the order ffmpeg expects them.
    pub fn output_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if !self.filters.is_empty() {
            args.extend(["-af".to_string(), self.filters.join(",")]);
        }
        args.extend(["-c:a".to_string(), self.codec.clone()]);
        args.extend(self.args.iter().cloned());
        if let Some(muxer) = &self.muxer {
            args.extend(["-f".to_string(), muxer.clone()]);
        }
        args
    }
}

fn required_value<'a>(option: &str, value: Option<&'a str>) -> Result<&'a str, EngineError> {
    match value {
        Some(v) if !is_option(v) => Ok(v),
        _ => Err(EngineError::invalid_description(format!(
            "{option} needs a value"
        ))),
    }
}

fn is_option(token: &str) -> bool {
    token.starts_with('-') && token.len() > 1
}

fn is_number(token: &str) -> bool {
    token.parse::<f64>().is_ok()
}
