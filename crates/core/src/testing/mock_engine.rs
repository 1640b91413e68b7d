//! Mock media engine for testing.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::converter::CodecFamily;
use crate::engine::{
    BusMessage, BusReceiver, BusSender, Engine, EngineError, EngineState, Graph, LaunchOutcome,
    Pad, PadDiscoveredFn, PadLinker, StageKind, StageSpec, StateChange, StateSnapshot,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// How a mock graph reacts to being set to playing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum StartBehavior {
    /// Reaches playing synchronously.
    #[default]
    Immediate,
    /// Accepts asynchronously and reaches playing after `settle_after`.
    Async { settle_after: Duration },
    /// Accepts asynchronously and never settles.
    Pending,
    /// Refuses synchronously, optionally posting an error first.
    Fail { message: Option<String> },
    /// Accepts asynchronously, then fails with an error on the bus.
    FailAsync { message: String },
}

#[derive(Debug, Clone, Copy, Default)]
struct Transition {
    current: EngineState,
    pending: Option<EngineState>,
    failed: bool,
}

impl Transition {
    fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            current: self.current,
            pending: self.pending,
        }
    }
}

#[derive(Default)]
struct GraphState {
    stages: HashMap<StageKind, Option<PathBuf>>,
    stage_states: HashMap<StageKind, EngineState>,
    links: HashSet<(StageKind, StageKind)>,
    handler: Option<PadDiscoveredFn>,
    dynamic_links: Vec<String>,
    bus: Vec<BusSender>,
    position: Option<Duration>,
}

impl GraphState {
    fn post(&mut self, message: BusMessage) {
        self.bus.retain(|tx| tx.send(message.clone()).is_ok());
    }
}

struct LatestGraph {
    state: Arc<Mutex<GraphState>>,
    transition: Arc<watch::Sender<Transition>>,
}

#[derive(Default)]
struct MockState {
    missing_elements: HashSet<String>,
    failing_stages: HashSet<StageKind>,
    failing_links: HashSet<(StageKind, StageKind)>,
    start_behavior: StartBehavior,
    duration: Option<Duration>,
    launch_warnings: Vec<String>,
    graphs_built: usize,
    latest: Option<LatestGraph>,
}

/// Mock implementation of the Engine trait.
///
/// Provides controllable behavior for testing:
/// - Make elements, stages or links unavailable
/// - Choose how graphs react to being started
/// - Fire pad discovery and bus messages on the most recent graph
/// - Inspect what the controller did to that graph
///
/// # Example
///
/// ```rust,ignore
/// use soundconv_core::testing::MockEngine;
///
/// let engine = MockEngine::new();
/// engine.set_duration(Some(Duration::from_secs(180)));
///
/// let (controller, mut notifications) = new_controller(Arc::new(engine.clone()), profile, config);
/// controller.convert("/music/in.flac", "/music/out.ogg").await?;
///
/// engine.discover_pad("src_0", "audio/x-flac");
/// engine.finish_with_output(b"OggS")?;
/// ```
#[derive(Clone, Default)]
pub struct MockEngine {
    inner: Arc<Mutex<MockState>>,
}

impl MockEngine {
    /// Create a new mock engine where everything is available.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make an element unavailable, for capability probes and encoder descriptions.
    pub fn remove_element(&self, element: impl Into<String>) {
        lock(&self.inner).missing_elements.insert(element.into());
    }

    /// Make adding a stage of this kind fail.
    pub fn fail_stage(&self, stage: StageKind) {
        lock(&self.inner).failing_stages.insert(stage);
    }

    /// Make a link between two stages fail. `Decoder -> Encoder` affects the dynamic link.
    pub fn fail_link(&self, from: StageKind, to: StageKind) {
        lock(&self.inner).failing_links.insert((from, to));
    }

    /// Allow a previously failing link again.
    pub fn allow_link(&self, from: StageKind, to: StageKind) {
        lock(&self.inner).failing_links.remove(&(from, to));
    }

    pub fn set_start_behavior(&self, behavior: StartBehavior) {
        lock(&self.inner).start_behavior = behavior;
    }

    /// Duration reported by every graph.
    pub fn set_duration(&self, duration: Option<Duration>) {
        lock(&self.inner).duration = duration;
    }

    /// Warnings returned by launch checks.
    pub fn set_launch_warnings(&self, warnings: Vec<String>) {
        lock(&self.inner).launch_warnings = warnings;
    }

    /// Number of graphs created so far.
    pub fn graphs_built(&self) -> usize {
        lock(&self.inner).graphs_built
    }

    fn latest(&self) -> Option<(Arc<Mutex<GraphState>>, Arc<watch::Sender<Transition>>)> {
        lock(&self.inner)
            .latest
            .as_ref()
            .map(|g| (Arc::clone(&g.state), Arc::clone(&g.transition)))
    }

    fn with_latest<T>(&self, f: impl FnOnce(&mut GraphState) -> T) -> Option<T> {
        let (state, _) = self.latest()?;
        let mut guard = lock(&state);
        Some(f(&mut guard))
    }

    /// Position reported by the most recent graph.
    pub fn set_position(&self, position: Option<Duration>) {
        self.with_latest(|g| g.position = position);
    }

    /// Expose a decoder pad on the most recent graph.
    ///
    /// Returns false when no graph or no pad handler exists.
    pub fn discover_pad(&self, name: &str, caps: &str) -> bool {
        let Some((state, _)) = self.latest() else {
            return false;
        };
        // Taken out so the handler can lock the graph through the linker.
        let Some(mut handler) = lock(&state).handler.take() else {
            return false;
        };

        let fail = lock(&self.inner)
            .failing_links
            .contains(&(StageKind::Decoder, StageKind::Encoder));
        let mut linker = MockLinker {
            graph: Arc::clone(&state),
            fail,
        };
        handler(&mut linker, &Pad::new(name, caps));

        lock(&state).handler = Some(handler);
        true
    }

    /// Pads linked to the encoder on the most recent graph.
    pub fn dynamic_links(&self) -> Vec<String> {
        self.with_latest(|g| g.dynamic_links.clone())
            .unwrap_or_default()
    }

    /// Post an error on the most recent graph's bus.
    pub fn post_error(&self, message: &str) {
        self.with_latest(|g| g.post(BusMessage::error(message)));
    }

    /// Post a warning on the most recent graph's bus.
    pub fn post_warning(&self, message: &str) {
        self.with_latest(|g| {
            g.post(BusMessage::Warning {
                source: Some("mock".to_string()),
                message: message.to_string(),
            })
        });
    }

    /// Post end-of-stream on the most recent graph's bus.
    pub fn post_eos(&self) {
        self.with_latest(|g| g.post(BusMessage::EndOfStream));
    }

    /// Write `bytes` to the sink location, then post end-of-stream.
    pub fn finish_with_output(&self, bytes: &[u8]) -> std::io::Result<()> {
        if let Some(location) = self.sink_location() {
            std::fs::write(location, bytes)?;
        }
        self.post_eos();
        Ok(())
    }

    /// Write `bytes` to the sink location without ending the stream.
    pub fn write_output(&self, bytes: &[u8]) -> std::io::Result<()> {
        match self.sink_location() {
            Some(location) => std::fs::write(location, bytes),
            None => Ok(()),
        }
    }

    /// Location bound to the sink of the most recent graph.
    pub fn sink_location(&self) -> Option<PathBuf> {
        self.with_latest(|g| g.stages.get(&StageKind::Sink).cloned().flatten())
            .flatten()
    }

    /// Current and pending state of the most recent graph.
    pub fn engine_state(&self) -> Option<StateSnapshot> {
        self.latest().map(|(_, t)| t.borrow().snapshot())
    }
}

impl Engine for MockEngine {
    type Graph = MockGraph;

    fn name(&self) -> &str {
        "mock"
    }

    fn element_available(&self, element: &str) -> bool {
        !lock(&self.inner).missing_elements.contains(element)
    }

    fn codec_element(&self, codec: CodecFamily) -> &'static str {
        match codec {
            CodecFamily::Mp3 => "mad",
            CodecFamily::WavPack => "wavpackenc",
            CodecFamily::Aac => "ffdemux_mov_mp4_m4a_3gp_3g2_mj2",
            CodecFamily::Musepack => "musepackdec",
            CodecFamily::Wma => "ffdec_wmav2",
        }
    }

    fn launch_check(&self, encode_description: &str) -> LaunchOutcome {
        let state = lock(&self.inner);
        let elements = description_elements(encode_description);
        if elements.is_empty() {
            return LaunchOutcome::Failed {
                error: "empty pipeline".to_string(),
            };
        }
        match elements
            .into_iter()
            .find(|e| state.missing_elements.contains(*e))
        {
            Some(missing) => LaunchOutcome::Failed {
                error: format!("no element \"{missing}\""),
            },
            None => LaunchOutcome::Built {
                warnings: state.launch_warnings.clone(),
            },
        }
    }

    fn new_graph(&self, _name: &str) -> MockGraph {
        let (transition, _) = watch::channel(Transition::default());
        let graph = MockGraph {
            engine: Arc::clone(&self.inner),
            state: Arc::new(Mutex::new(GraphState::default())),
            transition: Arc::new(transition),
            settle: None,
        };

        let mut inner = lock(&self.inner);
        inner.graphs_built += 1;
        inner.latest = Some(LatestGraph {
            state: Arc::clone(&graph.state),
            transition: Arc::clone(&graph.transition),
        });
        graph
    }
}

/// Element names of a `a ! b prop=1 ! c` style description.
fn description_elements(description: &str) -> Vec<&str> {
    description
        .split('!')
        .filter_map(|part| part.split_whitespace().next())
        .collect()
}

struct MockLinker {
    graph: Arc<Mutex<GraphState>>,
    fail: bool,
}

impl PadLinker for MockLinker {
    fn link_pad(&mut self, pad: &Pad, target: StageKind) -> Result<(), EngineError> {
        let mut graph = lock(&self.graph);
        if self.fail || !graph.stages.contains_key(&target) {
            return Err(EngineError::link_refused(
                StageKind::Decoder,
                target,
                "mock link failure",
            ));
        }
        graph.dynamic_links.push(pad.name.clone());
        Ok(())
    }
}

/// Graph created by [`MockEngine`].
pub struct MockGraph {
    engine: Arc<Mutex<MockState>>,
    state: Arc<Mutex<GraphState>>,
    transition: Arc<watch::Sender<Transition>>,
    settle: Option<JoinHandle<()>>,
}

impl MockGraph {
    fn settle_to(&self, transition: Transition) {
        self.transition.send_replace(transition);
    }

    fn set_all_stages(&self, state: EngineState) {
        let mut graph = lock(&self.state);
        let kinds: Vec<StageKind> = graph.stages.keys().copied().collect();
        for kind in kinds {
            graph.stage_states.insert(kind, state);
        }
    }
}

impl Drop for MockGraph {
    fn drop(&mut self) {
        if let Some(settle) = self.settle.take() {
            settle.abort();
        }
    }
}

#[async_trait]
impl Graph for MockGraph {
    fn subscribe(&mut self) -> BusReceiver {
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.state).bus.push(tx);
        rx
    }

    fn add_stage(&mut self, spec: StageSpec<'_>) -> Result<(), EngineError> {
        let kind = spec.kind();
        {
            let engine = lock(&self.engine);
            if engine.failing_stages.contains(&kind) {
                return Err(EngineError::element_unavailable(kind.as_str()));
            }
            if let StageSpec::Encoder { description, .. } = spec {
                if let Some(missing) = description_elements(description)
                    .into_iter()
                    .find(|e| engine.missing_elements.contains(*e))
                {
                    return Err(EngineError::element_unavailable(missing));
                }
            }
        }

        let mut graph = lock(&self.state);
        graph.stages.insert(kind, None);
        graph.stage_states.insert(kind, EngineState::Null);
        Ok(())
    }

    fn link(&mut self, from: StageKind, to: StageKind) -> Result<(), EngineError> {
        if lock(&self.engine).failing_links.contains(&(from, to)) {
            return Err(EngineError::link_refused(from, to, "mock link failure"));
        }
        let mut graph = lock(&self.state);
        for stage in [from, to] {
            if !graph.stages.contains_key(&stage) {
                return Err(EngineError::StageMissing { stage });
            }
        }
        graph.links.insert((from, to));
        Ok(())
    }

    fn connect_pad_discovered(
        &mut self,
        stage: StageKind,
        handler: PadDiscoveredFn,
    ) -> Result<(), EngineError> {
        let mut graph = lock(&self.state);
        if !graph.stages.contains_key(&stage) {
            return Err(EngineError::StageMissing { stage });
        }
        graph.handler = Some(handler);
        Ok(())
    }

    fn reset_stage(&mut self, stage: StageKind) -> Result<(), EngineError> {
        let mut graph = lock(&self.state);
        if !graph.stages.contains_key(&stage) {
            return Err(EngineError::StageMissing { stage });
        }
        graph.stage_states.insert(stage, EngineState::Null);
        Ok(())
    }

    fn set_location(&mut self, stage: StageKind, location: &Path) -> Result<(), EngineError> {
        let mut graph = lock(&self.state);
        if graph.stage_states.get(&stage) != Some(&EngineState::Null) {
            return Err(EngineError::StageBusy { stage });
        }
        match graph.stages.get_mut(&stage) {
            Some(slot) => {
                *slot = Some(location.to_path_buf());
                Ok(())
            }
            None => Err(EngineError::StageMissing { stage }),
        }
    }

    fn location(&self, stage: StageKind) -> Option<PathBuf> {
        lock(&self.state).stages.get(&stage).cloned().flatten()
    }

    async fn set_state(&mut self, target: EngineState) -> StateChange {
        if let Some(settle) = self.settle.take() {
            settle.abort();
        }

        if target != EngineState::Playing {
            self.set_all_stages(target);
            self.settle_to(Transition {
                current: target,
                pending: None,
                failed: false,
            });
            return StateChange::Success;
        }

        let behavior = lock(&self.engine).start_behavior.clone();
        match behavior {
            StartBehavior::Immediate => {
                self.set_all_stages(EngineState::Playing);
                self.settle_to(Transition {
                    current: EngineState::Playing,
                    pending: None,
                    failed: false,
                });
                StateChange::Success
            }
            StartBehavior::Async { settle_after } => {
                self.set_all_stages(EngineState::Playing);
                self.settle_to(Transition {
                    current: EngineState::Ready,
                    pending: Some(EngineState::Playing),
                    failed: false,
                });
                let transition = Arc::clone(&self.transition);
                self.settle = Some(tokio::spawn(async move {
                    tokio::time::sleep(settle_after).await;
                    transition.send_replace(Transition {
                        current: EngineState::Playing,
                        pending: None,
                        failed: false,
                    });
                }));
                StateChange::Async
            }
            StartBehavior::Pending => {
                self.set_all_stages(EngineState::Playing);
                self.settle_to(Transition {
                    current: EngineState::Ready,
                    pending: Some(EngineState::Playing),
                    failed: false,
                });
                StateChange::Async
            }
            StartBehavior::Fail { message } => {
                if let Some(message) = message {
                    lock(&self.state).post(BusMessage::error(message));
                }
                self.settle_to(Transition {
                    current: EngineState::Null,
                    pending: None,
                    failed: true,
                });
                StateChange::Failure
            }
            StartBehavior::FailAsync { message } => {
                lock(&self.state).post(BusMessage::error(message));
                self.settle_to(Transition {
                    current: EngineState::Ready,
                    pending: None,
                    failed: true,
                });
                StateChange::Async
            }
        }
    }

    async fn wait_state(&mut self, timeout: Option<Duration>) -> (StateChange, StateSnapshot) {
        let mut rx = self.transition.subscribe();
        let settled = async {
            rx.wait_for(|t| t.pending.is_none())
                .await
                .map(|t| *t)
                .unwrap_or_default()
        };

        let transition = match timeout {
            Some(limit) => match tokio::time::timeout(limit, settled).await {
                Ok(t) => t,
                Err(_) => return (StateChange::Async, self.current_state()),
            },
            None => settled.await,
        };

        let change = if transition.failed {
            StateChange::Failure
        } else {
            StateChange::Success
        };
        (change, transition.snapshot())
    }

    fn current_state(&self) -> StateSnapshot {
        self.transition.borrow().snapshot()
    }

    fn query_duration(&self) -> Option<Duration> {
        lock(&self.engine).duration
    }

    fn query_position(&self) -> Option<Duration> {
        lock(&self.state).position
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_launch_check_respects_missing_elements() {
        let engine = MockEngine::new();
        assert!(matches!(
            engine.launch_check("vorbisenc quality=0.6 ! oggmux"),
            LaunchOutcome::Built { .. }
        ));

        engine.remove_element("oggmux");
        assert!(matches!(
            engine.launch_check("vorbisenc ! oggmux"),
            LaunchOutcome::Failed { .. }
        ));
        assert!(!engine.element_available("oggmux"));
    }

    #[tokio::test]
    async fn test_async_start_settles() {
        let engine = MockEngine::new();
        engine.set_start_behavior(StartBehavior::Async {
            settle_after: Duration::from_millis(10),
        });
        let mut graph = engine.new_graph("test");

        assert_eq!(graph.set_state(EngineState::Playing).await, StateChange::Async);
        assert!(graph.current_state().is_playing());

        let (change, snapshot) = graph.wait_state(None).await;
        assert_eq!(change, StateChange::Success);
        assert_eq!(snapshot.current, EngineState::Playing);
    }

    #[test]
    fn test_discover_pad_without_graph() {
        let engine = MockEngine::new();
        assert!(!engine.discover_pad("src_0", "audio/x-raw"));
        assert!(engine.dynamic_links().is_empty());
    }
}
