//! The controller task.
//!
//! One task owns the run state, the pipeline, its bus and the progress
//! timer. Commands, bus messages and timer ticks are handled one at a time
//! from a single `select!` loop.

use std::future::pending;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

use super::builder::{self, Pipeline};
use super::error::ConverterError;
use super::events::{Notification, NotificationSender};
use super::progress::{whole_seconds, ProgressTracker};
use super::state::RunState;
use crate::config::ControllerConfig;
use crate::engine::{
    BusMessage, BusReceiver, Engine, EngineState, Graph, StageKind, StateChange,
};
use crate::metrics::{CONVERSIONS_TOTAL, CONVERSION_DURATION};
use crate::profile::Profile;

const START_FAILURE_MESSAGE: &str = "Error starting converting pipeline";

pub(crate) enum Command {
    Convert {
        source: PathBuf,
        destination: PathBuf,
        reply: oneshot::Sender<Result<(), ConverterError>>,
    },
    Cancel {
        reply: oneshot::Sender<()>,
    },
    SetProfile {
        profile: Arc<dyn Profile>,
        reply: oneshot::Sender<()>,
    },
    RunState {
        reply: oneshot::Sender<RunState>,
    },
}

pub(crate) struct ControllerActor<E: Engine> {
    engine: Arc<E>,
    profile: Arc<dyn Profile>,
    /// Profile to switch to once the live run ends.
    next_profile: Option<Arc<dyn Profile>>,
    config: ControllerConfig,
    commands: mpsc::Receiver<Command>,
    notifications: NotificationSender,
    state: RunState,
    pipeline: Option<Pipeline<E::Graph>>,
    timer: Option<Interval>,
    progress: ProgressTracker,
    /// Whether the current run has sent its `Duration` notification.
    duration_reported: bool,
    started_at: Option<Instant>,
}

impl<E: Engine> ControllerActor<E> {
    pub(crate) fn new(
        engine: Arc<E>,
        profile: Arc<dyn Profile>,
        config: ControllerConfig,
        commands: mpsc::Receiver<Command>,
        notifications: NotificationSender,
    ) -> Self {
        Self {
            engine,
            profile,
            next_profile: None,
            config,
            commands,
            notifications,
            state: RunState::NeedsBuild,
            pipeline: None,
            timer: None,
            progress: ProgressTracker::default(),
            duration_reported: false,
            started_at: None,
        }
    }

    pub(crate) async fn run(mut self) {
        tracing::debug!(
            engine = self.engine.name(),
            profile = self.profile.name(),
            "Conversion controller started"
        );

        loop {
            tokio::select! {
                biased;

                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                message = next_message(&mut self.pipeline) => {
                    self.handle_bus_message(message).await;
                }
                _ = next_tick(&mut self.timer) => self.on_tick(),
            }
        }

        self.shutdown().await;
        tracing::debug!("Conversion controller stopped");
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Convert {
                source,
                destination,
                reply,
            } => {
                let result = self.convert(&source, &destination).await;
                let duration = result.as_ref().ok().copied().flatten();
                let _ = reply.send(result.map(|_| ()));

                // Only after the caller has its answer.
                if let Some(seconds) = duration {
                    self.report_duration(seconds);
                }
            }
            Command::Cancel { reply } => {
                self.cancel().await;
                let _ = reply.send(());
            }
            Command::SetProfile { profile, reply } => {
                self.set_profile(profile).await;
                let _ = reply.send(());
            }
            Command::RunState { reply } => {
                let _ = reply.send(self.state);
            }
        }
    }

    /// Starts a conversion and returns the source duration in whole seconds,
    /// when the engine knows it.
    async fn convert(
        &mut self,
        source: &Path,
        destination: &Path,
    ) -> Result<Option<u64>, ConverterError> {
        if self.state == RunState::Running {
            return Err(ConverterError::Busy);
        }

        if self.pipeline.is_none() {
            let pipeline = builder::build(self.engine.as_ref(), self.profile.as_ref())?;
            self.pipeline = Some(pipeline);
            self.set_run_state(RunState::Ready);
        }

        self.set_run_state(RunState::Starting);
        if let Err(message) = self.start_graph(source, destination).await {
            tracing::error!(source = %source.display(), error = %message, "Conversion failed to start");
            if let Some(pipeline) = self.pipeline.as_mut() {
                pipeline.graph.set_state(EngineState::Null).await;
            }
            CONVERSIONS_TOTAL.with_label_values(&["start_failed"]).inc();
            self.teardown();
            return Err(ConverterError::start_failure(message));
        }

        let duration = self
            .pipeline
            .as_ref()
            .and_then(|p| p.graph.query_duration());
        if duration.is_none() {
            tracing::warn!(source = %source.display(), "Could not get file duration");
        }

        let period = self.config.progress_interval();
        let mut timer = interval_at(Instant::now() + period, period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
        self.timer = Some(timer);
        self.progress.reset();
        self.duration_reported = false;
        self.started_at = Some(Instant::now());
        self.set_run_state(RunState::Running);

        tracing::debug!(
            source = %source.display(),
            destination = %destination.display(),
            "Conversion started"
        );

        Ok(duration.map(whole_seconds))
    }

    /// Binds the locations and requests the playing state.
    ///
    /// Returns the message to report when the graph refuses to start.
    async fn start_graph(&mut self, source: &Path, destination: &Path) -> Result<(), String> {
        let start_timeout = self.config.start_timeout();
        let Some(pipeline) = self.pipeline.as_mut() else {
            return Err(START_FAILURE_MESSAGE.to_string());
        };
        let graph = &mut pipeline.graph;

        for (stage, location) in [(StageKind::Source, source), (StageKind::Sink, destination)] {
            graph.reset_stage(stage).map_err(|e| e.to_string())?;
            graph
                .set_location(stage, location)
                .map_err(|e| e.to_string())?;
        }

        let mut change = graph.set_state(EngineState::Playing).await;
        if change == StateChange::Async {
            let (settled, snapshot) = graph.wait_state(Some(start_timeout)).await;
            tracing::trace!(?settled, ?snapshot, "Start wait finished");
            change = settled;
        }

        if change == StateChange::Failure {
            return Err(take_error(&mut pipeline.bus)
                .unwrap_or_else(|| START_FAILURE_MESSAGE.to_string()));
        }

        Ok(())
    }

    fn on_tick(&mut self) {
        let Some(pipeline) = self.pipeline.as_ref() else {
            self.timer = None;
            return;
        };

        let snapshot = pipeline.graph.current_state();
        if !snapshot.is_playing() {
            tracing::debug!(state = %snapshot.current, "Graph no longer playing, stopping progress timer");
            self.timer = None;
            return;
        }

        // Some sources only know their length once data flows.
        let late_duration = if !self.duration_reported && self.progress.last_reported().is_none() {
            pipeline.graph.query_duration()
        } else {
            None
        };
        let position = pipeline.graph.query_position();

        if let Some(duration) = late_duration {
            self.report_duration(whole_seconds(duration));
        }
        match position {
            Some(position) => {
                if let Some(seconds) = self.progress.observe(position) {
                    self.notify(Notification::Progress { seconds });
                }
            }
            None => tracing::debug!("Could not get current file position"),
        }
    }

    async fn handle_bus_message(&mut self, message: BusMessage) {
        match message {
            BusMessage::Warning { source, message } => {
                tracing::warn!(source = ?source, "{}", message);
            }
            BusMessage::Error {
                source,
                message,
                debug: detail,
            } => {
                if self.state != RunState::Running {
                    tracing::debug!(error = %message, state = %self.state, "Ignoring bus error");
                    return;
                }
                tracing::error!(source = ?source, detail = ?detail, "Conversion failed: {}", message);
                self.finish(RunState::Failed).await;
                self.notify(Notification::Error { message });
            }
            BusMessage::EndOfStream => {
                if self.state != RunState::Running {
                    tracing::debug!(state = %self.state, "Ignoring end of stream");
                    return;
                }
                self.finish(RunState::Completed).await;
                self.notify(Notification::Completion);
            }
        }
    }

    /// Ends the live run with `outcome` and discards the graph.
    async fn finish(&mut self, outcome: RunState) {
        self.timer = None;
        if let Some(pipeline) = self.pipeline.as_mut() {
            pipeline.graph.set_state(EngineState::Null).await;
        }
        self.set_run_state(outcome);
        self.record_outcome(outcome);
        self.teardown();
    }

    async fn cancel(&mut self) {
        let Some(pipeline) = self.pipeline.as_mut() else {
            tracing::debug!("Nothing to cancel");
            return;
        };

        let (_, snapshot) = pipeline.graph.wait_state(None).await;
        if snapshot.current != EngineState::Playing {
            tracing::debug!(state = %snapshot.current, "Graph not playing, nothing to cancel");
            return;
        }

        pipeline.graph.set_state(EngineState::Null).await;
        self.timer = None;

        if let Some(location) = pipeline.graph.location(StageKind::Sink) {
            match tokio::fs::remove_file(&location).await {
                Ok(()) => tracing::debug!(path = %location.display(), "Removed partial output"),
                Err(e) => tracing::warn!(path = %location.display(), "Unable to delete file; {}", e),
            }
        }

        self.set_run_state(RunState::Cancelled);
        self.record_outcome(RunState::Cancelled);
        self.teardown();
    }

    async fn set_profile(&mut self, profile: Arc<dyn Profile>) {
        if self.state == RunState::Running {
            tracing::debug!(
                profile = profile.name(),
                "Conversion running, profile change takes effect afterwards"
            );
            self.next_profile = Some(profile);
            return;
        }

        tracing::debug!(profile = profile.name(), "Profile changed");
        self.profile = profile;
        self.next_profile = None;
        if let Some(mut pipeline) = self.pipeline.take() {
            pipeline.graph.set_state(EngineState::Null).await;
        }
        self.set_run_state(RunState::NeedsBuild);
    }

    async fn shutdown(&mut self) {
        self.timer = None;
        if let Some(mut pipeline) = self.pipeline.take() {
            pipeline.graph.set_state(EngineState::Null).await;
        }
    }

    /// Drops the graph so the next conversion builds a fresh one.
    fn teardown(&mut self) {
        self.pipeline = None;
        self.timer = None;
        self.started_at = None;
        self.progress.reset();
        self.duration_reported = false;
        if let Some(profile) = self.next_profile.take() {
            tracing::debug!(profile = profile.name(), "Profile changed");
            self.profile = profile;
        }
        self.set_run_state(RunState::NeedsBuild);
    }

    fn record_outcome(&self, outcome: RunState) {
        let result = outcome.to_string();
        CONVERSIONS_TOTAL.with_label_values(&[result.as_str()]).inc();
        if let Some(started_at) = self.started_at {
            CONVERSION_DURATION.observe(started_at.elapsed().as_secs_f64());
        }
    }

    fn set_run_state(&mut self, state: RunState) {
        if self.state != state {
            tracing::trace!(from = %self.state, to = %state, "Run state changed");
            self.state = state;
        }
    }

    fn report_duration(&mut self, seconds: u64) {
        self.duration_reported = true;
        self.notify(Notification::Duration { seconds });
    }

    fn notify(&self, notification: Notification) {
        if self.notifications.send(notification).is_err() {
            tracing::trace!("Notification receiver dropped");
        }
    }
}

/// First error waiting on the bus, if any. Other messages are consumed.
fn take_error(bus: &mut BusReceiver) -> Option<String> {
    while let Ok(message) = bus.try_recv() {
        match message {
            BusMessage::Error { message, .. } => return Some(message),
            BusMessage::Warning { source, message } => {
                tracing::warn!(source = ?source, "{}", message);
            }
            BusMessage::EndOfStream => {}
        }
    }
    None
}

async fn next_message<G: Graph>(pipeline: &mut Option<Pipeline<G>>) -> BusMessage {
    match pipeline {
        Some(pipeline) => match pipeline.bus.recv().await {
            Some(message) => message,
            None => pending().await,
        },
        None => pending().await,
    }
}

async fn next_tick(timer: &mut Option<Interval>) -> Instant {
    match timer {
        Some(timer) => timer.tick().await,
        None => pending().await,
    }
}
