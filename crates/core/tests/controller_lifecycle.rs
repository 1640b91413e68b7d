//! Conversion controller lifecycle integration tests.
//!
//! These tests drive the controller against the mock engine:
//! - Lazy build and rebuild after every terminal outcome
//! - Start failures, synchronous and asynchronous
//! - Duration and de-duplicated progress reporting
//! - Completion, runtime errors and cancellation
//! - One-shot dynamic linking

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::time::{sleep, timeout};

use soundconv_core::{
    converter::{ConstructError, ConverterError, Notification, Notifications, RunState},
    location,
    new_controller,
    testing::{fixtures, MockEngine, StartBehavior},
    ControllerConfig, ControllerHandle,
};

/// Test helper owning a controller wired to a mock engine.
struct TestHarness {
    engine: MockEngine,
    controller: ControllerHandle,
    notifications: Notifications,
    source: PathBuf,
    destination: PathBuf,
    _dir: TempDir,
}

impl TestHarness {
    fn new() -> Self {
        Self::with_engine(MockEngine::new())
    }

    fn with_engine(engine: MockEngine) -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let source = dir.path().join("track.flac");
        std::fs::write(&source, b"fLaC").expect("Failed to write source");
        let destination = dir.path().join("track.ogg");

        let (controller, notifications) = new_controller(
            Arc::new(engine.clone()),
            fixtures::vorbis_profile(),
            ControllerConfig::default(),
        );

        Self {
            engine,
            controller,
            notifications,
            source,
            destination,
            _dir: dir,
        }
    }

    async fn convert(&self) -> Result<(), ConverterError> {
        self.controller
            .convert(
                self.source.to_str().unwrap(),
                self.destination.to_str().unwrap(),
            )
            .await
    }

    async fn run_state(&self) -> RunState {
        self.controller.run_state().await.unwrap()
    }

    async fn next_notification(&mut self) -> Notification {
        timeout(Duration::from_secs(10), self.notifications.recv())
            .await
            .expect("Timed out waiting for notification")
            .expect("Notification channel closed")
    }

    /// Collects notifications up to and including the terminal one.
    async fn until_terminal(&mut self) -> Vec<Notification> {
        let mut seen = Vec::new();
        loop {
            let notification = self.next_notification().await;
            let terminal = notification.is_terminal();
            seen.push(notification);
            if terminal {
                return seen;
            }
        }
    }

    /// Lets the controller run for a while and returns what it sent.
    async fn drain_for(&mut self, period: Duration) -> Vec<Notification> {
        sleep(period).await;
        let mut seen = Vec::new();
        while let Ok(notification) = self.notifications.try_recv() {
            seen.push(notification);
        }
        seen
    }
}

// =============================================================================
// Successful conversion
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_three_minute_conversion_reports_duration_progress_and_completion() {
    let mut h = TestHarness::new();
    h.engine.set_duration(Some(Duration::from_secs(180)));

    h.convert().await.unwrap();
    assert_eq!(h.run_state().await, RunState::Running);

    assert!(h.engine.discover_pad("src_0", "audio/x-raw, rate=44100"));
    assert_eq!(h.engine.dynamic_links(), vec!["src_0"]);

    // Positions change between the 250 ms ticks.
    h.engine.set_position(Some(Duration::from_millis(1200)));
    sleep(Duration::from_millis(300)).await;
    h.engine.set_position(Some(Duration::from_millis(2500)));
    sleep(Duration::from_millis(250)).await;
    h.engine.set_position(Some(Duration::from_millis(2900)));
    sleep(Duration::from_millis(250)).await;
    h.engine.set_position(Some(Duration::from_secs(180)));
    sleep(Duration::from_millis(250)).await;

    h.engine.finish_with_output(b"OggS encoded audio").unwrap();

    let notifications = h.until_terminal().await;
    assert_eq!(
        notifications,
        vec![
            Notification::Duration { seconds: 180 },
            Notification::Progress { seconds: 1 },
            Notification::Progress { seconds: 2 },
            Notification::Progress { seconds: 180 },
            Notification::Completion,
        ]
    );

    let written = std::fs::metadata(&h.destination).unwrap();
    assert!(written.len() > 0);
    assert_eq!(h.run_state().await, RunState::NeedsBuild);
}

#[tokio::test(start_paused = true)]
async fn test_accepts_file_uris() {
    let mut h = TestHarness::new();
    let source = location::to_uri(&h.source);
    let destination = location::to_uri(&h.destination);

    h.controller.convert(&source, &destination).await.unwrap();
    assert_eq!(h.engine.sink_location(), Some(h.destination.clone()));

    h.engine.post_eos();
    assert_eq!(h.until_terminal().await, vec![Notification::Completion]);
}

#[tokio::test(start_paused = true)]
async fn test_missing_duration_skips_duration_notification() {
    let mut h = TestHarness::new();

    h.convert().await.unwrap();
    h.engine.set_position(Some(Duration::from_secs(3)));
    sleep(Duration::from_millis(300)).await;
    h.engine.post_eos();

    assert_eq!(
        h.until_terminal().await,
        vec![Notification::Progress { seconds: 3 }, Notification::Completion]
    );
}

#[tokio::test(start_paused = true)]
async fn test_late_duration_is_reported_before_first_progress() {
    let mut h = TestHarness::new();

    h.convert().await.unwrap();
    h.engine.set_duration(Some(Duration::from_secs(60)));
    h.engine.set_position(Some(Duration::from_secs(1)));
    sleep(Duration::from_millis(300)).await;
    h.engine.set_position(Some(Duration::from_secs(2)));
    sleep(Duration::from_millis(250)).await;
    h.engine.post_eos();

    assert_eq!(
        h.until_terminal().await,
        vec![
            Notification::Duration { seconds: 60 },
            Notification::Progress { seconds: 1 },
            Notification::Progress { seconds: 2 },
            Notification::Completion,
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_duration_known_after_progress_is_not_reported() {
    let mut h = TestHarness::new();

    h.convert().await.unwrap();
    h.engine.set_position(Some(Duration::from_secs(1)));
    sleep(Duration::from_millis(300)).await;
    h.engine.set_duration(Some(Duration::from_secs(60)));
    h.engine.set_position(Some(Duration::from_secs(2)));
    sleep(Duration::from_millis(250)).await;
    h.engine.post_eos();

    assert_eq!(
        h.until_terminal().await,
        vec![
            Notification::Progress { seconds: 1 },
            Notification::Progress { seconds: 2 },
            Notification::Completion,
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_no_progress_after_completion() {
    let mut h = TestHarness::new();

    h.convert().await.unwrap();
    h.engine.post_eos();
    assert_eq!(h.until_terminal().await, vec![Notification::Completion]);

    h.engine.set_position(Some(Duration::from_secs(5)));
    h.engine.post_error("late error");
    assert!(h.drain_for(Duration::from_secs(2)).await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_warnings_do_not_end_the_run() {
    let mut h = TestHarness::new();

    h.convert().await.unwrap();
    h.engine.post_warning("Could not read tags");
    assert!(h.drain_for(Duration::from_millis(600)).await.is_empty());
    assert_eq!(h.run_state().await, RunState::Running);

    h.engine.post_eos();
    assert_eq!(h.until_terminal().await, vec![Notification::Completion]);
}

// =============================================================================
// Rebuild policy
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_rebuilds_after_every_terminal_outcome() {
    let mut h = TestHarness::new();
    assert_eq!(h.run_state().await, RunState::NeedsBuild);
    assert_eq!(h.engine.graphs_built(), 0);

    // Completion
    h.convert().await.unwrap();
    assert_eq!(h.engine.graphs_built(), 1);
    h.engine.post_eos();
    h.until_terminal().await;

    // Runtime error
    h.convert().await.unwrap();
    assert_eq!(h.engine.graphs_built(), 2);
    h.engine.post_error("Internal data stream error");
    h.until_terminal().await;

    // Cancellation
    h.convert().await.unwrap();
    assert_eq!(h.engine.graphs_built(), 3);
    h.controller.cancel().await.unwrap();

    h.convert().await.unwrap();
    assert_eq!(h.engine.graphs_built(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_convert_while_running_is_busy() {
    let mut h = TestHarness::new();

    h.convert().await.unwrap();
    assert_eq!(h.convert().await, Err(ConverterError::Busy));
    assert_eq!(h.engine.graphs_built(), 1);

    h.engine.post_eos();
    assert_eq!(h.until_terminal().await, vec![Notification::Completion]);
}

#[tokio::test(start_paused = true)]
async fn test_profile_change_waits_for_running_conversion() {
    let mut h = TestHarness::new();
    h.engine.remove_element("flacenc");

    h.convert().await.unwrap();
    h.controller
        .set_profile(fixtures::flac_profile())
        .await
        .unwrap();
    assert_eq!(h.run_state().await, RunState::Running);

    h.engine.post_eos();
    assert_eq!(h.until_terminal().await, vec![Notification::Completion]);

    // The next build uses the new profile.
    assert_eq!(
        h.convert().await,
        Err(ConverterError::Construct(ConstructError::EncoderUnavailable {
            profile: "CD Quality, Lossless".to_string()
        }))
    );
}

#[tokio::test(start_paused = true)]
async fn test_profile_change_when_idle_forces_rebuild() {
    let h = TestHarness::new();

    h.controller
        .set_profile(fixtures::flac_profile())
        .await
        .unwrap();
    assert_eq!(h.run_state().await, RunState::NeedsBuild);

    h.convert().await.unwrap();
    assert_eq!(h.engine.graphs_built(), 1);
}

// =============================================================================
// Build and start failures
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_missing_encoder_element_fails_convert() {
    let mut h = TestHarness::new();
    h.engine.remove_element("vorbisenc");

    let result = h.convert().await;
    assert_eq!(
        result,
        Err(ConverterError::Construct(
            ConstructError::EncoderUnavailable {
                profile: "CD Quality, Lossy".to_string()
            }
        ))
    );
    assert!(!h.destination.exists());
    assert_eq!(h.run_state().await, RunState::NeedsBuild);
    assert!(h.drain_for(Duration::from_secs(1)).await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_sync_start_failure_prefers_bus_error() {
    let h = TestHarness::new();
    h.engine.set_start_behavior(StartBehavior::Fail {
        message: Some("Could not open resource for reading".to_string()),
    });

    assert_eq!(
        h.convert().await,
        Err(ConverterError::StartFailure {
            message: "Could not open resource for reading".to_string()
        })
    );
    assert_eq!(h.run_state().await, RunState::NeedsBuild);
}

#[tokio::test(start_paused = true)]
async fn test_sync_start_failure_without_bus_error() {
    let h = TestHarness::new();
    h.engine
        .set_start_behavior(StartBehavior::Fail { message: None });

    assert_eq!(
        h.convert().await,
        Err(ConverterError::StartFailure {
            message: "Error starting converting pipeline".to_string()
        })
    );

    // The failed graph is discarded.
    h.engine.set_start_behavior(StartBehavior::Immediate);
    h.convert().await.unwrap();
    assert_eq!(h.engine.graphs_built(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_async_start_failure_within_start_window() {
    let h = TestHarness::new();
    h.engine.set_start_behavior(StartBehavior::FailAsync {
        message: "Stream doesn't contain enough data".to_string(),
    });

    assert_eq!(
        h.convert().await,
        Err(ConverterError::StartFailure {
            message: "Stream doesn't contain enough data".to_string()
        })
    );
    assert_eq!(h.run_state().await, RunState::NeedsBuild);
}

#[tokio::test(start_paused = true)]
async fn test_async_start_settling_inside_start_window() {
    let mut h = TestHarness::new();
    h.engine.set_start_behavior(StartBehavior::Async {
        settle_after: Duration::from_millis(100),
    });
    h.engine.set_duration(Some(Duration::from_secs(42)));

    h.convert().await.unwrap();
    assert_eq!(h.run_state().await, RunState::Running);
    assert_eq!(
        h.next_notification().await,
        Notification::Duration { seconds: 42 }
    );
}

#[tokio::test(start_paused = true)]
async fn test_slow_start_is_still_running() {
    let mut h = TestHarness::new();
    h.engine.set_start_behavior(StartBehavior::Pending);

    // The start wait elapses without a verdict.
    h.convert().await.unwrap();
    assert_eq!(h.run_state().await, RunState::Running);

    // Still on its way to playing, so progress is polled.
    h.engine.set_position(Some(Duration::from_secs(1)));
    assert_eq!(
        h.drain_for(Duration::from_millis(300)).await,
        vec![Notification::Progress { seconds: 1 }]
    );
}

// =============================================================================
// Runtime errors
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_runtime_error_reports_once_and_keeps_output() {
    let mut h = TestHarness::new();

    h.convert().await.unwrap();
    h.engine.write_output(b"partial").unwrap();
    h.engine.post_error("Internal data stream error");
    h.engine.post_eos();

    assert_eq!(
        h.until_terminal().await,
        vec![Notification::Error {
            message: "Internal data stream error".to_string()
        }]
    );
    assert!(h.drain_for(Duration::from_secs(1)).await.is_empty());
    assert!(h.destination.exists());
    assert_eq!(h.run_state().await, RunState::NeedsBuild);
}

#[tokio::test(start_paused = true)]
async fn test_refused_dynamic_link_surfaces_as_runtime_error() {
    let mut h = TestHarness::new();
    h.engine.fail_link(
        soundconv_core::engine::StageKind::Decoder,
        soundconv_core::engine::StageKind::Encoder,
    );

    h.convert().await.unwrap();
    assert!(h.engine.discover_pad("src_0", "video/x-raw"));
    assert!(h.engine.dynamic_links().is_empty());

    h.engine.post_error("Internal data flow error.");
    assert_eq!(
        h.until_terminal().await,
        vec![Notification::Error {
            message: "Internal data flow error.".to_string()
        }]
    );
}

// =============================================================================
// Dynamic linking
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_second_pad_discovery_is_ignored() {
    let h = TestHarness::new();

    h.convert().await.unwrap();
    h.engine.discover_pad("src_0", "audio/x-raw");
    h.engine.discover_pad("src_1", "audio/x-raw");

    assert_eq!(h.engine.dynamic_links(), vec!["src_0"]);
}

#[tokio::test(start_paused = true)]
async fn test_pad_after_refused_link_gets_linked() {
    use soundconv_core::engine::StageKind;

    let h = TestHarness::new();
    h.engine.fail_link(StageKind::Decoder, StageKind::Encoder);

    h.convert().await.unwrap();
    h.engine.discover_pad("src_0", "audio/x-raw");
    h.engine.allow_link(StageKind::Decoder, StageKind::Encoder);
    h.engine.discover_pad("src_1", "audio/x-raw");

    assert_eq!(h.engine.dynamic_links(), vec!["src_1"]);
}

// =============================================================================
// Cancellation
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_cancel_before_convert_is_noop() {
    let mut h = TestHarness::new();

    h.controller.cancel().await.unwrap();

    assert_eq!(h.run_state().await, RunState::NeedsBuild);
    assert_eq!(h.engine.graphs_built(), 0);
    assert!(h.drain_for(Duration::from_secs(1)).await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_cancel_removes_partial_output() {
    let mut h = TestHarness::new();

    h.convert().await.unwrap();
    h.engine.write_output(b"partial").unwrap();
    assert!(h.destination.exists());

    h.controller.cancel().await.unwrap();

    assert!(!h.destination.exists());
    assert_eq!(h.run_state().await, RunState::NeedsBuild);

    // Nothing is reported for a cancelled run, even if the engine keeps talking.
    h.engine.post_eos();
    h.engine.set_position(Some(Duration::from_secs(10)));
    assert!(h.drain_for(Duration::from_secs(1)).await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_cancel_without_output_file() {
    let h = TestHarness::new();

    h.convert().await.unwrap();
    // Nothing written yet; deletion fails and is only logged.
    h.controller.cancel().await.unwrap();

    assert_eq!(h.run_state().await, RunState::NeedsBuild);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_waits_for_pending_start() {
    let h = TestHarness::new();
    h.engine.set_start_behavior(StartBehavior::Async {
        settle_after: Duration::from_secs(2),
    });

    h.convert().await.unwrap();
    h.engine.write_output(b"partial").unwrap();
    h.controller.cancel().await.unwrap();

    assert!(!h.destination.exists());
    assert_eq!(h.run_state().await, RunState::NeedsBuild);
}

// =============================================================================
// Shutdown
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_dropping_handle_stops_controller() {
    let TestHarness {
        engine,
        controller,
        mut notifications,
        source,
        destination,
        _dir,
    } = TestHarness::new();

    controller
        .convert(source.to_str().unwrap(), destination.to_str().unwrap())
        .await
        .unwrap();
    drop(controller);

    let closed = timeout(Duration::from_secs(5), notifications.recv())
        .await
        .expect("Controller did not shut down");
    assert_eq!(closed, None);
    assert_eq!(
        engine.engine_state().map(|s| s.current),
        Some(soundconv_core::engine::EngineState::Null)
    );
}
