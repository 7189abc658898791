use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;

use super::config::{ConfigError, ConfigField, ConfigPatch, ThermalConfig};
use super::governor::{Governor, GovernorSnapshot, Mode};
use crate::api::commands::GovernorCommand;
use crate::tracing::prelude::*;

const COMMAND_QUEUE_DEPTH: usize = 16;

#[derive(Debug, Error)]
pub enum HandleError {
    #[error("governor task is not running")]
    Stopped,

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Drives a [`Governor`] on its poll interval.
///
/// The poller is the only owner of the governor. Cycles and commands run
/// one at a time on the same task, so a cycle never overlaps another cycle
/// or a mode change.
pub struct Poller {
    governor: Governor,
    cmd_rx: mpsc::Receiver<GovernorCommand>,
    state_tx: watch::Sender<GovernorSnapshot>,
}

/// Cloneable access to a running [`Poller`].
#[derive(Debug, Clone)]
pub struct GovernorHandle {
    cmd_tx: mpsc::Sender<GovernorCommand>,
    state_rx: watch::Receiver<GovernorSnapshot>,
}

impl Poller {
    pub fn new(governor: Governor) -> (Self, GovernorHandle) {
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        let (state_tx, state_rx) = watch::channel(governor.snapshot());

        (
            Self {
                governor,
                cmd_rx,
                state_tx,
            },
            GovernorHandle { cmd_tx, state_rx },
        )
    }

    /// Poll until `shutdown` is cancelled, then release the ceiling.
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!(
            poll_ms = self.governor.config().poll_ms,
            sensor_id = self.governor.config().sensor_id,
            "Thermal governor started"
        );

        // Polling starts with an immediate cycle.
        let mut next_cycle = self.governor.mode().should_poll().then(Instant::now);
        let mut commands_open = true;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("Thermal governor shutdown requested");
                    break;
                }

                cmd = self.cmd_rx.recv(), if commands_open => {
                    let Some(cmd) = cmd else {
                        debug!("All governor handles dropped");
                        commands_open = false;
                        continue;
                    };

                    let was_polling = self.governor.mode().should_poll();
                    let interval_changed = self.handle(cmd).await;
                    next_cycle = match (was_polling, self.governor.mode().should_poll()) {
                        (_, false) => None,
                        (false, true) => Some(Instant::now()),
                        (true, true) if interval_changed => {
                            Some(Instant::now() + self.governor.poll_interval())
                        }
                        (true, true) => next_cycle,
                    };
                }

                _ = sleep_until(next_cycle.unwrap_or_else(Instant::now)), if next_cycle.is_some() => {
                    let outcome = self.governor.cycle().await;
                    trace!(?outcome, "Control cycle complete");
                    next_cycle = Some(Instant::now() + self.governor.poll_interval());
                    self.publish();
                }
            }
        }

        self.governor.release().await;
        self.publish();
        info!("Thermal governor stopped");
    }

    /// Apply one command. Returns true when the poll interval changed.
    async fn handle(&mut self, cmd: GovernorCommand) -> bool {
        match cmd {
            GovernorCommand::SetEnabled { enabled, reply } => {
                let mode = self.governor.set_enabled(enabled).await;
                self.publish();
                if reply.send(mode).is_err() {
                    debug!("SetEnabled caller went away");
                }
                false
            }

            GovernorCommand::SetSuspended { suspended, reply } => {
                let mode = self.governor.set_suspended(suspended);
                self.publish();
                if reply.send(mode).is_err() {
                    debug!("SetSuspended caller went away");
                }
                false
            }

            GovernorCommand::MarkExternalChange { reply } => {
                self.governor.mark_external_change();
                self.publish();
                if reply.send(()).is_err() {
                    debug!("MarkExternalChange caller went away");
                }
                false
            }

            GovernorCommand::UpdateConfig { patch, reply } => {
                let result = self.governor.update_config(&patch).cloned();
                match &result {
                    Ok(_) => self.publish(),
                    Err(e) => warn!(error = %e, "Rejected configuration change"),
                }
                let interval_changed = result.is_ok() && patch.touches(ConfigField::PollMs);
                if reply.send(result).is_err() {
                    debug!("UpdateConfig caller went away");
                }
                interval_changed
            }
        }
    }

    fn publish(&self) {
        self.state_tx.send_replace(self.governor.snapshot());
    }
}

impl GovernorHandle {
    /// Latest published state.
    pub fn snapshot(&self) -> GovernorSnapshot {
        self.state_rx.borrow().clone()
    }

    pub async fn set_enabled(&self, enabled: bool) -> Result<Mode, HandleError> {
        self.request(|reply| GovernorCommand::SetEnabled { enabled, reply })
            .await
    }

    pub async fn set_suspended(&self, suspended: bool) -> Result<Mode, HandleError> {
        self.request(|reply| GovernorCommand::SetSuspended { suspended, reply })
            .await
    }

    pub async fn mark_external_change(&self) -> Result<(), HandleError> {
        self.request(|reply| GovernorCommand::MarkExternalChange { reply })
            .await
    }

    pub async fn update_config(&self, patch: ConfigPatch) -> Result<ThermalConfig, HandleError> {
        let result = self
            .request(|reply| GovernorCommand::UpdateConfig { patch, reply })
            .await?;
        Ok(result?)
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> GovernorCommand,
    ) -> Result<T, HandleError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(command(tx))
            .await
            .map_err(|_| HandleError::Stopped)?;
        rx.await.map_err(|_| HandleError::Stopped)
    }
}
