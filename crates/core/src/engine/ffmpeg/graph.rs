//! Conversion graph backed by an ffmpeg child process.
//!
//! Building the graph only records stages and links. Moving it to
//! [`EngineState::Playing`] is asynchronous: a worker task probes the
//! source, offers each stream to the pad-discovered handler, and spawns
//! ffmpeg for the stream that got linked. Progress is read from
//! `-progress pipe:1`; the exit status becomes end-of-stream or an error.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use super::catalog::ElementKind;
use super::description::EncoderSpec;
use super::probe::{probe_source, AudioStream};
use super::progress::{parse_progress_line, ProgressLine};
use super::{file_url, FfmpegSettings};
use crate::engine::{
    BusMessage, BusReceiver, BusSender, EngineError, EngineState, Graph, Pad, PadDiscoveredFn,
    PadLinker, StageKind, StageSpec, StateChange, StateSnapshot,
};

const STDERR_TAIL_LINES: usize = 20;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Clone, Copy, Default)]
struct Transition {
    current: EngineState,
    pending: Option<EngineState>,
    failed: bool,
}

impl Transition {
    fn settled(current: EngineState) -> Self {
        Self {
            current,
            pending: None,
            failed: false,
        }
    }

    fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            current: self.current,
            pending: self.pending,
        }
    }
}

#[derive(Debug, Default)]
struct Timing {
    duration: Option<Duration>,
    position: Option<Duration>,
}

/// Fan-out of bus messages to every subscriber.
#[derive(Clone, Default)]
struct Bus {
    subscribers: Arc<Mutex<Vec<BusSender>>>,
}

impl Bus {
    fn subscribe(&self) -> BusReceiver {
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.subscribers).push(tx);
        rx
    }

    fn post(&self, message: BusMessage) {
        lock(&self.subscribers).retain(|tx| tx.send(message.clone()).is_ok());
    }
}

#[derive(Debug)]
struct Stage {
    state: EngineState,
    location: Option<PathBuf>,
    encoder: Option<EncoderSpec>,
    allow_overwrite: bool,
}

impl Stage {
    fn new() -> Self {
        Self {
            state: EngineState::Null,
            location: None,
            encoder: None,
            allow_overwrite: false,
        }
    }
}

/// Everything the worker needs to run one conversion.
struct Job {
    settings: Arc<FfmpegSettings>,
    source: PathBuf,
    destination: PathBuf,
    encoder: EncoderSpec,
    allow_overwrite: bool,
    handler: Option<Arc<Mutex<PadDiscoveredFn>>>,
    has_encoder: bool,
    bus: Bus,
    timing: Arc<Mutex<Timing>>,
    transition: Arc<watch::Sender<Transition>>,
}

/// A graph driven by the ffmpeg command-line tools.
pub struct FfmpegGraph {
    name: String,
    settings: Arc<FfmpegSettings>,
    stages: HashMap<StageKind, Stage>,
    links: HashSet<(StageKind, StageKind)>,
    pad_handler: Option<Arc<Mutex<PadDiscoveredFn>>>,
    bus: Bus,
    timing: Arc<Mutex<Timing>>,
    transition: Arc<watch::Sender<Transition>>,
    worker: Option<JoinHandle<()>>,
}

impl FfmpegGraph {
    pub(super) fn new(name: &str, settings: Arc<FfmpegSettings>) -> Self {
        let (transition, _) = watch::channel(Transition::default());
        Self {
            name: name.to_string(),
            settings,
            stages: HashMap::new(),
            links: HashSet::new(),
            pad_handler: None,
            bus: Bus::default(),
            timing: Arc::new(Mutex::new(Timing::default())),
            transition: Arc::new(transition),
            worker: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn stage(&self, kind: StageKind) -> Result<&Stage, EngineError> {
        self.stages
            .get(&kind)
            .ok_or(EngineError::StageMissing { stage: kind })
    }

    fn stage_mut(&mut self, kind: StageKind) -> Result<&mut Stage, EngineError> {
        self.stages
            .get_mut(&kind)
            .ok_or(EngineError::StageMissing { stage: kind })
    }

    fn require(&self, kind: ElementKind, name: &str) -> Result<(), EngineError> {
        if self.settings.catalog.contains(kind, name) {
            Ok(())
        } else {
            Err(EngineError::element_unavailable(format!("{kind}:{name}")))
        }
    }

    async fn stop_worker(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.abort();
            let _ = worker.await;
        }
    }

    fn set_all_stages(&mut self, state: EngineState) {
        for stage in self.stages.values_mut() {
            stage.state = state;
        }
    }

    /// Collects what the worker needs, or explains why the graph cannot start.
    fn prepare_job(&self) -> Result<Job, String> {
        for kind in [
            StageKind::Source,
            StageKind::Decoder,
            StageKind::Encoder,
            StageKind::Sink,
        ] {
            if !self.stages.contains_key(&kind) {
                return Err(format!("Graph has no {kind} stage"));
            }
        }
        for (from, to) in [
            (StageKind::Source, StageKind::Decoder),
            (StageKind::Encoder, StageKind::Sink),
        ] {
            if !self.links.contains(&(from, to)) {
                return Err(format!("{from} is not linked to {to}"));
            }
        }

        let source = self.stages[&StageKind::Source]
            .location
            .clone()
            .ok_or_else(|| "No source location set".to_string())?;
        let sink = &self.stages[&StageKind::Sink];
        let destination = sink
            .location
            .clone()
            .ok_or_else(|| "No destination location set".to_string())?;
        let encoder = self.stages[&StageKind::Encoder]
            .encoder
            .clone()
            .ok_or_else(|| "Encoder stage has no description".to_string())?;

        Ok(Job {
            settings: Arc::clone(&self.settings),
            source,
            destination,
            encoder,
            allow_overwrite: sink.allow_overwrite,
            handler: self.pad_handler.clone(),
            has_encoder: true,
            bus: self.bus.clone(),
            timing: Arc::clone(&self.timing),
            transition: Arc::clone(&self.transition),
        })
    }
}

impl Drop for FfmpegGraph {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.abort();
        }
    }
}

#[async_trait]
impl Graph for FfmpegGraph {
    fn subscribe(&mut self) -> BusReceiver {
        self.bus.subscribe()
    }

    fn add_stage(&mut self, spec: StageSpec<'_>) -> Result<(), EngineError> {
        let mut stage = Stage::new();
        match spec {
            StageSpec::FileSource => self.require(ElementKind::InputProtocol, "file")?,
            StageSpec::AutoDecoder => {
                if self.settings.catalog.count(ElementKind::Demuxer) == 0 {
                    return Err(EngineError::element_unavailable("demuxer:*"));
                }
            }
            StageSpec::Encoder {
                description,
                normalize,
            } => {
                let mut encoder = EncoderSpec::parse(description)?;
                if normalize {
                    encoder = encoder.with_normalization();
                }
                for warning in &encoder.warnings {
                    tracing::warn!(graph = %self.name, "{}", warning);
                }
                for (kind, name) in encoder.required_elements() {
                    self.require(kind, &name)?;
                }
                stage.encoder = Some(encoder);
            }
            StageSpec::FileSink { allow_overwrite } => {
                self.require(ElementKind::OutputProtocol, "file")?;
                stage.allow_overwrite = allow_overwrite;
            }
        }

        tracing::trace!(graph = %self.name, stage = %spec.kind(), "Added stage");
        self.stages.insert(spec.kind(), stage);
        Ok(())
    }

    fn link(&mut self, from: StageKind, to: StageKind) -> Result<(), EngineError> {
        self.stage(from)?;
        self.stage(to)?;
        match (from, to) {
            (StageKind::Source, StageKind::Decoder) | (StageKind::Encoder, StageKind::Sink) => {
                self.links.insert((from, to));
                Ok(())
            }
            (StageKind::Decoder, StageKind::Encoder) => Err(EngineError::link_refused(
                from,
                to,
                "decoder pads only exist once the stream is inspected",
            )),
            _ => Err(EngineError::link_refused(from, to, "incompatible stages")),
        }
    }

    fn connect_pad_discovered(
        &mut self,
        stage: StageKind,
        handler: PadDiscoveredFn,
    ) -> Result<(), EngineError> {
        self.stage(stage)?;
        if stage != StageKind::Decoder {
            return Err(EngineError::StageMissing { stage });
        }
        self.pad_handler = Some(Arc::new(Mutex::new(handler)));
        Ok(())
    }

    fn reset_stage(&mut self, stage: StageKind) -> Result<(), EngineError> {
        self.stage_mut(stage)?.state = EngineState::Null;
        Ok(())
    }

    fn set_location(&mut self, stage: StageKind, location: &Path) -> Result<(), EngineError> {
        if !matches!(stage, StageKind::Source | StageKind::Sink) {
            return Err(EngineError::StageMissing { stage });
        }
        let entry = self.stage_mut(stage)?;
        if entry.state != EngineState::Null {
            return Err(EngineError::StageBusy { stage });
        }
        entry.location = Some(location.to_path_buf());
        Ok(())
    }

    fn location(&self, stage: StageKind) -> Option<PathBuf> {
        self.stages.get(&stage).and_then(|s| s.location.clone())
    }

    async fn set_state(&mut self, target: EngineState) -> StateChange {
        let now = *self.transition.borrow();

        if target != EngineState::Playing {
            self.stop_worker().await;
            self.set_all_stages(target);
            if target == EngineState::Null {
                *lock(&self.timing) = Timing::default();
            }
            self.transition.send_replace(Transition::settled(target));
            return StateChange::Success;
        }

        if now.current == EngineState::Playing && now.pending.is_none() && !now.failed {
            return StateChange::Success;
        }
        if now.pending == Some(EngineState::Playing) {
            return StateChange::Async;
        }

        let job = match self.prepare_job() {
            Ok(job) => job,
            Err(message) => {
                tracing::debug!(graph = %self.name, error = %message, "Graph cannot start");
                self.bus.post(BusMessage::Error {
                    source: Some(self.name.clone()),
                    message,
                    debug: None,
                });
                self.transition.send_replace(Transition {
                    current: now.current,
                    pending: None,
                    failed: true,
                });
                return StateChange::Failure;
            }
        };

        self.stop_worker().await;
        *lock(&self.timing) = Timing::default();
        self.set_all_stages(EngineState::Playing);
        self.transition.send_replace(Transition {
            current: EngineState::Ready,
            pending: Some(EngineState::Playing),
            failed: false,
        });
        self.worker = Some(tokio::spawn(run_job(job)));
        StateChange::Async
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

        if transition.failed {
            (StateChange::Failure, transition.snapshot())
        } else {
            (StateChange::Success, transition.snapshot())
        }
    }

    fn current_state(&self) -> StateSnapshot {
        self.transition.borrow().snapshot()
    }

    fn query_duration(&self) -> Option<Duration> {
        lock(&self.timing).duration
    }

    fn query_position(&self) -> Option<Duration> {
        lock(&self.timing).position
    }
}

/// Hands discovered streams to the encoder, one at most.
struct StreamLinker {
    has_encoder: bool,
    offered: Option<u32>,
    linked: Option<u32>,
}

impl PadLinker for StreamLinker {
    fn link_pad(&mut self, pad: &Pad, target: StageKind) -> Result<(), EngineError> {
        if target != StageKind::Encoder || !self.has_encoder {
            return Err(EngineError::link_refused(
                StageKind::Decoder,
                target,
                "decoder pads can only feed the encoder",
            ));
        }
        if !pad.is_audio() {
            return Err(EngineError::link_refused(
                StageKind::Decoder,
                target,
                format!("{} is not an audio pad", pad.name),
            ));
        }
        if self.linked.is_some() {
            return Err(EngineError::link_refused(
                StageKind::Decoder,
                target,
                "encoder input is already linked",
            ));
        }
        self.linked = self.offered;
        Ok(())
    }
}

fn offer_pads(
    handler: Option<&Arc<Mutex<PadDiscoveredFn>>>,
    has_encoder: bool,
    streams: &[AudioStream],
) -> Option<u32> {
    let handler = handler?;
    let mut linker = StreamLinker {
        has_encoder,
        offered: None,
        linked: None,
    };
    let mut guard = lock(handler);
    let callback = &mut *guard;
    for stream in streams {
        linker.offered = Some(stream.index);
        callback(&mut linker, &stream.pad());
    }
    linker.linked
}

fn fail(job: &Job, source: &str, message: String, debug: Option<String>) {
    job.bus.post(BusMessage::Error {
        source: Some(source.to_string()),
        message,
        debug,
    });
    job.transition.send_replace(Transition {
        current: EngineState::Ready,
        pending: None,
        failed: true,
    });
}

/// Reads one line, replacing invalid UTF-8. Returns `None` at end of stream.
///
/// The pipe is drained until the child closes it, whatever the encoding.
async fn next_line_lossy<R: AsyncBufRead + Unpin>(reader: &mut R) -> Option<String> {
    let mut buf = Vec::new();
    match reader.read_until(b'\n', &mut buf).await {
        Ok(0) => None,
        Ok(_) => {
            let line = String::from_utf8_lossy(&buf);
            Some(line.trim_end_matches(['\n', '\r']).to_string())
        }
        Err(e) => {
            tracing::debug!(error = %e, "Stopped reading ffmpeg output");
            None
        }
    }
}

async fn run_job(job: Job) {
    let probe = match probe_source(&job.settings.ffprobe_path, &job.source).await {
        Ok(probe) => probe,
        Err(e) => {
            fail(&job, "decoder", e.to_string(), Some(job.source.display().to_string()));
            return;
        }
    };

    tracing::debug!(
        source = %job.source.display(),
        format = %probe.format,
        audio_streams = probe.audio_streams.len(),
        other_streams = probe.other_streams,
        "Probed source"
    );

    let Some(stream) = offer_pads(job.handler.as_ref(), job.has_encoder, &probe.audio_streams)
    else {
        fail(
            &job,
            "decoder",
            "Stream contains no audio that could be decoded".to_string(),
            Some(format!("format: {}", probe.format)),
        );
        return;
    };

    lock(&job.timing).duration = probe.duration;

    let mut args: Vec<OsString> = [
        "-hide_banner",
        "-nostdin",
        "-loglevel",
        job.settings.log_level.as_str(),
        if job.allow_overwrite { "-y" } else { "-n" },
        "-i",
    ]
    .into_iter()
    .map(OsString::from)
    .collect();
    args.push(file_url(&job.source));
    args.push("-map".into());
    args.push(format!("0:{stream}").into());
    args.push("-vn".into());
    args.extend(job.encoder.output_args().into_iter().map(OsString::from));
    args.extend(["-progress", "pipe:1", "-nostats"].map(OsString::from));
    args.push(file_url(&job.destination));

    tracing::debug!(args = ?args, "Spawning ffmpeg");

    let mut child = match Command::new(&job.settings.ffmpeg_path)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
    {
        Ok(child) => child,
        Err(e) => {
            let message = if e.kind() == std::io::ErrorKind::NotFound {
                EngineError::BinaryNotFound {
                    path: job.settings.ffmpeg_path.clone(),
                }
                .to_string()
            } else {
                e.to_string()
            };
            fail(&job, "encoder", message, None);
            return;
        }
    };

    job.transition
        .send_replace(Transition::settled(EngineState::Playing));

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let timing = Arc::clone(&job.timing);

    let read_progress = async move {
        let Some(stdout) = stdout else { return };
        let mut reader = BufReader::new(stdout);
        while let Some(line) = next_line_lossy(&mut reader).await {
            if let Some(ProgressLine::Position(position)) = parse_progress_line(&line) {
                lock(&timing).position = Some(position);
            }
        }
    };

    let read_errors = async move {
        let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
        let Some(stderr) = stderr else { return tail };
        let mut reader = BufReader::new(stderr);
        while let Some(line) = next_line_lossy(&mut reader).await {
            if line.trim().is_empty() {
                continue;
            }
            if tail.len() == STDERR_TAIL_LINES {
                tail.pop_front();
            }
            tail.push_back(line);
        }
        tail
    };

    let ((), tail) = tokio::join!(read_progress, read_errors);

    match child.wait().await {
        Ok(status) if status.success() => {
            tracing::debug!(destination = %job.destination.display(), "ffmpeg finished");
            job.bus.post(BusMessage::EndOfStream);
        }
        Ok(status) => {
            let message = tail
                .back()
                .cloned()
                .unwrap_or_else(|| format!("FFmpeg exited with code: {:?}", status.code()));
            let debug = Vec::from(tail).join("\n");
            job.bus.post(BusMessage::Error {
                source: Some("encoder".to_string()),
                message,
                debug: (!debug.is_empty()).then_some(debug),
            });
        }
        Err(e) => {
            job.bus.post(BusMessage::Error {
                source: Some("encoder".to_string()),
                message: e.to_string(),
                debug: None,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ffmpeg::catalog::ElementCatalog;

    fn settings() -> Arc<FfmpegSettings> {
        let mut catalog = ElementCatalog::default();
        catalog.insert(ElementKind::InputProtocol, "file");
        catalog.insert(ElementKind::OutputProtocol, "file");
        catalog.insert(ElementKind::Demuxer, "flac");
        catalog.insert(ElementKind::Encoder, "flac");
        catalog.insert(ElementKind::Muxer, "flac");
        catalog.insert(ElementKind::Filter, "aresample");
        Arc::new(FfmpegSettings {
            ffmpeg_path: PathBuf::from("ffmpeg"),
            ffprobe_path: PathBuf::from("ffprobe"),
            log_level: "error".to_string(),
            catalog,
        })
    }

    fn built_graph() -> FfmpegGraph {
        let mut graph = FfmpegGraph::new("test", settings());
        graph.add_stage(StageSpec::FileSource).unwrap();
        graph.add_stage(StageSpec::AutoDecoder).unwrap();
        graph
            .add_stage(StageSpec::Encoder {
                description: "-c:a flac -f flac",
                normalize: true,
            })
            .unwrap();
        graph
            .add_stage(StageSpec::FileSink {
                allow_overwrite: true,
            })
            .unwrap();
        graph
    }

    #[test]
    fn test_missing_encoder_element() {
        let mut graph = FfmpegGraph::new("test", settings());
        let err = graph
            .add_stage(StageSpec::Encoder {
                description: "-c:a libvorbis -f ogg",
                normalize: false,
            })
            .unwrap_err();
        assert!(matches!(err, EngineError::ElementUnavailable { .. }));
    }

    #[test]
    fn test_static_links() {
        let mut graph = built_graph();
        graph.link(StageKind::Source, StageKind::Decoder).unwrap();
        graph.link(StageKind::Encoder, StageKind::Sink).unwrap();
        assert!(graph.link(StageKind::Decoder, StageKind::Encoder).is_err());
        assert!(graph.link(StageKind::Sink, StageKind::Source).is_err());
    }

    #[test]
    fn test_link_requires_stages() {
        let mut graph = FfmpegGraph::new("test", settings());
        graph.add_stage(StageSpec::FileSource).unwrap();
        let err = graph.link(StageKind::Source, StageKind::Decoder).unwrap_err();
        assert!(matches!(
            err,
            EngineError::StageMissing {
                stage: StageKind::Decoder
            }
        ));
    }

    #[test]
    fn test_set_location_requires_stopped_stage() {
        let mut graph = built_graph();
        let path = Path::new("/tmp/in.flac");
        graph.set_location(StageKind::Source, path).unwrap();
        assert_eq!(graph.location(StageKind::Source), Some(path.to_path_buf()));

        graph.stages.get_mut(&StageKind::Source).unwrap().state = EngineState::Playing;
        assert!(matches!(
            graph.set_location(StageKind::Source, path),
            Err(EngineError::StageBusy { .. })
        ));

        graph.reset_stage(StageKind::Source).unwrap();
        graph.set_location(StageKind::Source, path).unwrap();
        assert!(graph.set_location(StageKind::Encoder, path).is_err());
    }

    #[tokio::test]
    async fn test_start_without_locations_fails() {
        let mut graph = built_graph();
        graph.link(StageKind::Source, StageKind::Decoder).unwrap();
        graph.link(StageKind::Encoder, StageKind::Sink).unwrap();
        let mut bus = graph.subscribe();

        assert_eq!(graph.set_state(EngineState::Playing).await, StateChange::Failure);
        match bus.try_recv() {
            Ok(BusMessage::Error { message, .. }) => {
                assert_eq!(message, "No source location set")
            }
            other => panic!("unexpected bus message: {other:?}"),
        }

        assert_eq!(graph.set_state(EngineState::Null).await, StateChange::Success);
        assert_eq!(graph.current_state(), StateSnapshot::settled(EngineState::Null));
    }

    #[tokio::test]
    async fn test_wait_state_when_settled() {
        let mut graph = built_graph();
        let (change, snapshot) = graph.wait_state(Some(Duration::from_millis(10))).await;
        assert_eq!(change, StateChange::Success);
        assert_eq!(snapshot.current, EngineState::Null);
    }

    #[test]
    fn test_offer_pads_links_first_audio_stream() {
        let streams = vec![
            AudioStream {
                index: 1,
                codec: "aac".to_string(),
                sample_rate: None,
                channels: None,
            },
            AudioStream {
                index: 2,
                codec: "ac3".to_string(),
                sample_rate: None,
                channels: None,
            },
        ];
        let handler: PadDiscoveredFn = Box::new(|linker, pad| {
            let _ = linker.link_pad(pad, StageKind::Encoder);
        });
        let handler = Arc::new(Mutex::new(handler));
        assert_eq!(offer_pads(Some(&handler), true, &streams), Some(1));
        assert_eq!(offer_pads(None, true, &streams), None);
    }

    #[tokio::test]
    async fn test_line_reader_survives_invalid_utf8() {
        let mut input: &[u8] = b"caf\xe9 tag\nnext\r\nlast";
        assert_eq!(
            next_line_lossy(&mut input).await.as_deref(),
            Some("caf\u{fffd} tag")
        );
        assert_eq!(next_line_lossy(&mut input).await.as_deref(), Some("next"));
        assert_eq!(next_line_lossy(&mut input).await.as_deref(), Some("last"));
        assert_eq!(next_line_lossy(&mut input).await, None);
    }
}
