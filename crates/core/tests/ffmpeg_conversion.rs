//! End-to-end conversions through the installed ffmpeg binaries.
//!
//! Each test returns early when ffmpeg is not installed or lacks the
//! `lavfi` test sources.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::process::Command;
use tokio::time::timeout;

use soundconv_core::{
    builtin_profiles, find_profile, new_controller, AudioProfile, ControllerConfig,
    ControllerHandle, ConverterError, EngineConfig, FfmpegEngine, Notification, Notifications,
    RunState,
};

async fn engine() -> Option<FfmpegEngine> {
    match FfmpegEngine::detect(&EngineConfig::default()).await {
        Ok(engine) => Some(engine),
        Err(e) => {
            eprintln!("skipping: {e}");
            None
        }
    }
}

/// Writes a sine tone of `seconds` to `path` as FLAC.
async fn generate_tone(path: &Path, seconds: u32) -> bool {
    let status = Command::new("ffmpeg")
        .args(["-hide_banner", "-loglevel", "error", "-y", "-f", "lavfi", "-i"])
        .arg(format!("sine=frequency=440:duration={seconds}"))
        .args(["-c:a", "flac"])
        .arg(path)
        .status()
        .await;
    matches!(status, Ok(s) if s.success())
}

fn controller(engine: FfmpegEngine, profile_id: &str) -> (ControllerHandle, Notifications) {
    let profiles = builtin_profiles();
    let profile = find_profile(&profiles, profile_id)
        .cloned()
        .expect("builtin profile exists");
    new_controller(
        Arc::new(engine),
        Arc::new(profile),
        ControllerConfig::default().with_start_timeout(Duration::from_secs(2)),
    )
}

async fn until_terminal(notifications: &mut Notifications) -> Vec<Notification> {
    let mut seen = Vec::new();
    loop {
        let notification = timeout(Duration::from_secs(30), notifications.recv())
            .await
            .expect("Timed out waiting for notification")
            .expect("Notification channel closed");
        let terminal = notification.is_terminal();
        seen.push(notification);
        if terminal {
            return seen;
        }
    }
}

#[tokio::test]
async fn test_flac_to_wav() {
    let Some(engine) = engine().await else {
        return;
    };
    let dir = TempDir::new().unwrap();
    let source = dir.path().join("tone.flac");
    let destination = dir.path().join("tone.wav");
    if !generate_tone(&source, 3).await {
        eprintln!("skipping: lavfi sources unavailable");
        return;
    }

    let (controller, mut notifications) = controller(engine, "wav");
    controller
        .convert(source.to_str().unwrap(), destination.to_str().unwrap())
        .await
        .unwrap();

    let seen = until_terminal(&mut notifications).await;
    assert_eq!(seen.last(), Some(&Notification::Completion));
    for notification in &seen {
        if let Notification::Duration { seconds } = notification {
            assert_eq!(*seconds, 3);
        }
    }

    let written = std::fs::metadata(&destination).unwrap();
    assert!(written.len() > 44);
    assert_eq!(controller.run_state().await.unwrap(), RunState::NeedsBuild);
}

#[tokio::test]
async fn test_missing_source_reports_error() {
    let Some(engine) = engine().await else {
        return;
    };
    let dir = TempDir::new().unwrap();
    let source = dir.path().join("missing.flac");
    let destination = dir.path().join("missing.wav");

    let (controller, mut notifications) = controller(engine, "wav");
    match controller
        .convert(source.to_str().unwrap(), destination.to_str().unwrap())
        .await
    {
        // Probing may fail inside or after the start window.
        Err(e) => assert!(e.is_retryable(), "unexpected error: {e}"),
        Ok(()) => {
            let seen = until_terminal(&mut notifications).await;
            assert!(matches!(seen.last(), Some(Notification::Error { .. })));
        }
    }
    assert!(!destination.exists());
}

#[tokio::test]
async fn test_cancel_removes_output() {
    let Some(engine) = engine().await else {
        return;
    };
    let dir = TempDir::new().unwrap();
    let source = dir.path().join("long.flac");
    let destination = dir.path().join("long.wav");
    if !generate_tone(&source, 30).await {
        eprintln!("skipping: lavfi sources unavailable");
        return;
    }

    // Encodes at playback speed so the run is still live when cancelled.
    let realtime = AudioProfile::new(
        "realtime",
        "Realtime WAV",
        "-af arealtime -c:a pcm_s16le -f wav",
        "wav",
    );
    let (controller, _notifications) = new_controller(
        Arc::new(engine),
        Arc::new(realtime),
        ControllerConfig::default().with_start_timeout(Duration::from_secs(2)),
    );
    match controller
        .convert(source.to_str().unwrap(), destination.to_str().unwrap())
        .await
    {
        Ok(()) => {}
        Err(ConverterError::Construct(e)) => {
            eprintln!("skipping: {e}");
            return;
        }
        Err(e) => panic!("conversion did not start: {e}"),
    }
    tokio::time::sleep(Duration::from_millis(500)).await;
    controller.cancel().await.unwrap();

    assert!(!destination.exists());
    assert_eq!(controller.run_state().await.unwrap(), RunState::NeedsBuild);
}
