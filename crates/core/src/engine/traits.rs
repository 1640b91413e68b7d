//! Trait definitions for the engine layer.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::error::EngineError;
use super::types::{
    BusReceiver, LaunchOutcome, Pad, StageKind, StageSpec, StateChange, StateSnapshot,
};
use super::EngineState;
use crate::converter::CodecFamily;

/// Callback invoked each time the decoder exposes a new output pad.
pub type PadDiscoveredFn = Box<dyn FnMut(&mut dyn PadLinker, &Pad) + Send + 'static>;

/// Handed to a [`PadDiscoveredFn`] so it can complete the dynamic link.
pub trait PadLinker {
    /// Links `pad` to the input of the `target` stage.
    fn link_pad(&mut self, pad: &Pad, target: StageKind) -> Result<(), EngineError>;
}

/// A media engine able to build conversion graphs.
pub trait Engine: Send + Sync + 'static {
    type Graph: Graph;

    /// Returns the name of this engine implementation.
    fn name(&self) -> &str;

    /// Instantiates the named element and releases it again.
    ///
    /// This is a presence check only; it says nothing about whether the
    /// element works on real data.
    fn element_available(&self, element: &str) -> bool;

    /// The element that handling `codec` depends on in this engine.
    fn codec_element(&self, codec: CodecFamily) -> &'static str;

    /// Instantiates a throwaway `synthetic source -> encode description`
    /// graph and reports whether it could be built.
    fn launch_check(&self, encode_description: &str) -> LaunchOutcome;

    /// Creates an empty graph.
    fn new_graph(&self, name: &str) -> Self::Graph;
}

/// A graph of stages owned by exactly one controller.
///
/// Dropping a graph stops it.
#[async_trait]
pub trait Graph: Send + 'static {
    /// Returns the receiving end of a fresh bus subscription.
    fn subscribe(&mut self) -> BusReceiver;

    /// Instantiates a stage and adds it to the graph.
    fn add_stage(&mut self, spec: StageSpec<'_>) -> Result<(), EngineError>;

    /// Statically links two stages.
    fn link(&mut self, from: StageKind, to: StageKind) -> Result<(), EngineError>;

    /// Registers the callback fired when `stage` exposes an output pad.
    fn connect_pad_discovered(
        &mut self,
        stage: StageKind,
        handler: PadDiscoveredFn,
    ) -> Result<(), EngineError>;

    /// Puts a single stage back into its stopped state.
    fn reset_stage(&mut self, stage: StageKind) -> Result<(), EngineError>;

    /// Binds a file location to a source or sink stage. The stage must be stopped.
    fn set_location(&mut self, stage: StageKind, location: &Path) -> Result<(), EngineError>;

    /// Reads back the location bound to a source or sink stage.
    fn location(&self, stage: StageKind) -> Option<PathBuf>;

    /// Requests a state change for the whole graph.
    async fn set_state(&mut self, target: EngineState) -> StateChange;

    /// Waits for a pending state change to settle.
    ///
    /// With `Some(timeout)` the wait is bounded and returns
    /// [`StateChange::Async`] if the change is still in flight. `None` waits
    /// until the change has either completed or failed.
    async fn wait_state(&mut self, timeout: Option<Duration>) -> (StateChange, StateSnapshot);

    /// Reads the current and pending state without waiting.
    fn current_state(&self) -> StateSnapshot;

    /// Total stream duration, if known.
    fn query_duration(&self) -> Option<Duration>;

    /// Current stream position, if known.
    fn query_position(&self) -> Option<Duration>;
}
