//! Sequential conversion of a batch of files.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Result};
use tokio::signal;
use tracing::{error, info, warn};

use soundconv_core::{
    converter::{require, supports_profile, CodecFamily},
    location, new_controller, AudioProfile, ControllerConfig, ControllerHandle, ConverterError,
    Engine, Notification, Notifications,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    /// The engine cannot read this kind of file; nothing was attempted.
    Skipped(ConverterError),
    Failed(ConverterError),
    Cancelled,
}

/// Converts `files` one at a time with a single controller.
///
/// Files whose codec is not installed are skipped. Ctrl-C cancels the
/// current file and skips the rest.
pub async fn convert_files<E: Engine>(
    engine: Arc<E>,
    profile: AudioProfile,
    config: ControllerConfig,
    files: &[PathBuf],
    output_dir: Option<&Path>,
) -> Result<()> {
    if !supports_profile(engine.as_ref(), &profile) {
        warn!(
            "Profile {} may not be usable with the installed {}",
            profile.id,
            engine.name()
        );
    }

    let destinations: Vec<PathBuf> = files
        .iter()
        .map(|file| profile.destination_for(file, output_dir))
        .collect();
    let (controller, mut notifications) =
        new_controller(Arc::clone(&engine), Arc::new(profile), config);

    let mut failed = 0;
    let mut skipped = 0;
    for (source, destination) in files.iter().zip(&destinations) {
        let outcome = match check_readable(engine.as_ref(), source) {
            Err(e) => Outcome::Skipped(e),
            Ok(()) => {
                info!("Converting {:?} -> {:?}", source, destination);
                convert_one(&controller, &mut notifications, source, destination).await
            }
        };

        match outcome {
            Outcome::Completed => info!("Wrote {:?}", destination),
            Outcome::Skipped(e) => {
                warn!("Skipping {:?}: {}", source, e);
                skipped += 1;
            }
            Outcome::Failed(e) => {
                error!("Failed to convert {:?}: {}", source, e);
                failed += 1;
            }
            Outcome::Cancelled => {
                info!("Cancelled, skipping remaining files");
                bail!("Conversion cancelled");
            }
        }
    }

    if skipped > 0 {
        info!("{} of {} files skipped", skipped, files.len());
    }
    if failed > 0 {
        bail!("{} of {} conversions failed", failed, files.len());
    }
    Ok(())
}

/// Fails with `CapabilityMissing` when the file needs an optional codec
/// the engine lacks.
fn check_readable<E: Engine + ?Sized>(engine: &E, source: &Path) -> Result<(), ConverterError> {
    match source
        .extension()
        .and_then(|ext| ext.to_str())
        .and_then(CodecFamily::for_extension)
    {
        Some(codec) => require(engine, codec),
        None => Ok(()),
    }
}

async fn convert_one(
    controller: &ControllerHandle,
    notifications: &mut Notifications,
    source: &Path,
    destination: &Path,
) -> Outcome {
    if let Err(e) = controller
        .convert(&location::to_uri(source), &location::to_uri(destination))
        .await
    {
        return Outcome::Failed(e);
    }

    let name = source
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let mut duration = None;

    loop {
        tokio::select! {
            notification = notifications.recv() => {
                let Some(notification) = notification else {
                    return Outcome::Failed(ConverterError::ControllerClosed);
                };
                match notification {
                    Notification::Duration { seconds } => duration = Some(seconds),
                    Notification::Progress { seconds } => print_progress(&name, seconds, duration),
                    Notification::Completion => {
                        eprintln!();
                        return Outcome::Completed;
                    }
                    failure @ Notification::Error { .. } => {
                        eprintln!();
                        return match failure.into_error() {
                            Some(e) => Outcome::Failed(e),
                            None => Outcome::Failed(ConverterError::runtime("Conversion failed")),
                        };
                    }
                }
            }
            _ = signal::ctrl_c() => {
                eprintln!();
                if let Err(e) = controller.cancel().await {
                    warn!("Failed to cancel conversion: {}", e);
                }
                return Outcome::Cancelled;
            }
        }
    }
}

fn print_progress(name: &str, seconds: u64, duration: Option<u64>) {
    let line = match duration {
        Some(total) if total > 0 => {
            let percent = (seconds.min(total) * 100) / total;
            format!("{name}: {seconds}s / {total}s ({percent}%)")
        }
        _ => format!("{name}: {seconds}s"),
    };
    let mut stderr = std::io::stderr().lock();
    let _ = write!(stderr, "\r{line}");
    let _ = stderr.flush();
}
