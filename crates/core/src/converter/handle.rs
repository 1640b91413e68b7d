use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

use super::actor::{Command, ControllerActor};
use super::error::ConverterError;
use super::events::Notifications;
use super::state::RunState;
use crate::config::ControllerConfig;
use crate::engine::Engine;
use crate::location;
use crate::profile::Profile;

const COMMAND_BUFFER: usize = 16;

/// Handle for driving a conversion controller.
///
/// This is cheaply cloneable. The controller shuts down, stopping any live
/// conversion, once every handle has been dropped.
#[derive(Clone)]
pub struct ControllerHandle {
    tx: mpsc::Sender<Command>,
}

/// Spawns a controller bound to `profile`.
///
/// Must be called from within a tokio runtime. Returns the handle and the
/// receiving end of the controller's notifications.
pub fn new_controller<E: Engine>(
    engine: Arc<E>,
    profile: Arc<dyn Profile>,
    config: ControllerConfig,
) -> (ControllerHandle, Notifications) {
    let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
    let (notifications_tx, notifications_rx) = mpsc::unbounded_channel();

    let actor = ControllerActor::new(engine, profile, config, rx, notifications_tx);
    tokio::spawn(actor.run());

    (ControllerHandle { tx }, notifications_rx)
}

impl ControllerHandle {
    /// Starts converting `source_uri` into `destination_uri`.
    ///
    /// Returns once the conversion is running or has failed to start. The
    /// outcome of a running conversion arrives as a notification.
    pub async fn convert(
        &self,
        source_uri: &str,
        destination_uri: &str,
    ) -> Result<(), ConverterError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Convert {
            source: location::to_path(source_uri),
            destination: location::to_path(destination_uri),
            reply,
        })
        .await?;
        rx.await.map_err(|_| ConverterError::ControllerClosed)?
    }

    /// Stops the running conversion and deletes its partial output.
    ///
    /// Does nothing when no conversion is playing.
    pub async fn cancel(&self) -> Result<(), ConverterError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Cancel { reply }).await?;
        rx.await.map_err(|_| ConverterError::ControllerClosed)
    }

    /// Replaces the profile. A running conversion keeps the old one.
    pub async fn set_profile(&self, profile: Arc<dyn Profile>) -> Result<(), ConverterError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::SetProfile { profile, reply }).await?;
        rx.await.map_err(|_| ConverterError::ControllerClosed)
    }

    pub async fn run_state(&self) -> Result<RunState, ConverterError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::RunState { reply }).await?;
        rx.await.map_err(|_| ConverterError::ControllerClosed)
    }

    async fn send(&self, command: Command) -> Result<(), ConverterError> {
        self.tx
            .send(command)
            .await
            .map_err(|_| ConverterError::ControllerClosed)
    }
}
