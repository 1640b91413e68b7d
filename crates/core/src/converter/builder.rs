//! Pipeline construction.

use std::sync::Arc;

use super::error::ConstructError;
use super::link::DynamicLink;
use crate::engine::{BusReceiver, Engine, Graph, StageKind, StageSpec};
use crate::metrics::PIPELINE_BUILDS;
use crate::profile::Profile;

/// A built graph together with its bus and dynamic link.
///
/// Dropping the pipeline drops the graph, which stops it.
pub struct Pipeline<G: Graph> {
    pub graph: G,
    pub bus: BusReceiver,
    pub link: Arc<DynamicLink>,
}

/// Builds the `source -> decoder ~> encoder -> sink` graph for `profile`.
///
/// The decoder-to-encoder link is made later, when the decoder exposes its
/// first output pad. A failure to make that link is only logged here; the
/// graph reports it on the bus once it runs.
pub fn build<E: Engine>(
    engine: &E,
    profile: &dyn Profile,
) -> Result<Pipeline<E::Graph>, ConstructError> {
    let result = try_build(engine, profile);

    let label = match &result {
        Ok(_) => "success",
        Err(ConstructError::SourceUnavailable) => "source_unavailable",
        Err(ConstructError::DecoderUnavailable) => "decoder_unavailable",
        Err(ConstructError::EncoderUnavailable { .. }) => "encoder_unavailable",
        Err(ConstructError::SinkUnavailable) => "sink_unavailable",
        Err(ConstructError::LinkFailure) => "link_failure",
    };
    PIPELINE_BUILDS.with_label_values(&[label]).inc();

    result
}

fn try_build<E: Engine>(
    engine: &E,
    profile: &dyn Profile,
) -> Result<Pipeline<E::Graph>, ConstructError> {
    let mut graph = engine.new_graph("converter");

    graph.add_stage(StageSpec::FileSource).map_err(|e| {
        tracing::debug!(error = %e, "Could not create source stage");
        ConstructError::SourceUnavailable
    })?;

    graph.add_stage(StageSpec::AutoDecoder).map_err(|e| {
        tracing::debug!(error = %e, "Could not create decoder stage");
        ConstructError::DecoderUnavailable
    })?;

    graph
        .add_stage(StageSpec::Encoder {
            description: profile.pipeline_description(),
            normalize: true,
        })
        .map_err(|e| {
            tracing::debug!(profile = profile.name(), error = %e, "Could not create encoder stage");
            ConstructError::EncoderUnavailable {
                profile: profile.name().to_string(),
            }
        })?;

    graph
        .add_stage(StageSpec::FileSink {
            allow_overwrite: true,
        })
        .map_err(|e| {
            tracing::debug!(error = %e, "Could not create sink stage");
            ConstructError::SinkUnavailable
        })?;

    let link = Arc::new(DynamicLink::new(StageKind::Encoder));
    if let Err(e) =
        graph.connect_pad_discovered(StageKind::Decoder, Arc::clone(&link).into_handler())
    {
        tracing::warn!(error = %e, "Could not watch the decoder for new pads");
    }

    for (from, to) in [
        (StageKind::Source, StageKind::Decoder),
        (StageKind::Encoder, StageKind::Sink),
    ] {
        graph.link(from, to).map_err(|e| {
            tracing::debug!(error = %e, "Could not link stages");
            ConstructError::LinkFailure
        })?;
    }

    let bus = graph.subscribe();

    tracing::debug!(engine = engine.name(), profile = profile.name(), "Built pipeline");

    Ok(Pipeline { graph, bus, link })
}
