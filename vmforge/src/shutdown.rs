//! Guest shutdown.
//!
//! ```text
//! Running ──command sent──→ Stopping ──not running──→ Stopped
//!                              │
//!                              └──deadline──→ TimedOut
//! ```
//!
//! Without a shutdown command, or with shutdown disabled, the VM is forcibly
//! stopped and nothing is polled. The guest may lose unsynced data then.

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use vmforge_shared::constants::SHUTDOWN_POLL_INTERVAL_MS;
use vmforge_shared::errors::{ForgeError, ForgeResult};

use crate::communicator::Communicator;
use crate::driver::Driver;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownState {
    Running,
    Stopping,
    Stopped,
    TimedOut,
}

/// Drives one VM from running to stopped.
#[derive(Debug, Clone)]
pub struct ShutdownController {
    command: Option<String>,
    disabled: bool,
    timeout: Duration,
    poll_interval: Duration,
    post_shutdown_delay: Duration,
    state: ShutdownState,
}

impl ShutdownController {
    /// `command` is run in the guest; an empty command counts as none.
    pub fn new(command: Option<String>, timeout: Duration) -> Self {
        Self {
            command: command.filter(|c| !c.trim().is_empty()),
            disabled: false,
            timeout,
            poll_interval: Duration::from_millis(SHUTDOWN_POLL_INTERVAL_MS),
            post_shutdown_delay: Duration::ZERO,
            state: ShutdownState::Running,
        }
    }

    pub fn with_disabled(mut self, disabled: bool) -> Self {
        self.disabled = disabled;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Pause after a graceful stop so the hypervisor releases the VM files.
    pub fn with_post_shutdown_delay(mut self, delay: Duration) -> Self {
        self.post_shutdown_delay = delay;
        self
    }

    pub fn state(&self) -> ShutdownState {
        self.state
    }

    /// Whether [`shutdown`](Self::shutdown) will send a command and poll,
    /// given whether a communicator is available.
    pub fn is_graceful(&self, has_communicator: bool) -> bool {
        !self.disabled && self.command.is_some() && has_communicator
    }

    pub async fn shutdown(
        &mut self,
        cancel: &CancellationToken,
        driver: &dyn Driver,
        communicator: Option<&dyn Communicator>,
        vm_name: &str,
    ) -> ForgeResult<()> {
        let graceful = match (&self.command, communicator) {
            (Some(command), Some(comm)) if !self.disabled => Some((command.clone(), comm)),
            _ => None,
        };

        match graceful {
            Some((command, comm)) => self.graceful(cancel, driver, comm, vm_name, &command).await,
            None => self.forced(driver, vm_name).await,
        }
    }

    async fn forced(&mut self, driver: &dyn Driver, vm_name: &str) -> ForgeResult<()> {
        tracing::info!(vm = vm_name, "Forcibly stopping VM");
        self.state = ShutdownState::Stopping;
        driver.stop(vm_name).await?;
        self.state = ShutdownState::Stopped;
        Ok(())
    }

    async fn graceful(
        &mut self,
        cancel: &CancellationToken,
        driver: &dyn Driver,
        comm: &dyn Communicator,
        vm_name: &str,
        command: &str,
    ) -> ForgeResult<()> {
        tracing::info!(vm = vm_name, command, "Sending shutdown command");
        self.state = ShutdownState::Stopping;

        let output = comm
            .start(command)
            .await
            .map_err(|e| e.context("failed to send shutdown command"))?;
        if !output.success() {
            // The session often dies with the guest, so a non-zero exit is
            // expected and the poll below decides.
            tracing::debug!(exit_code = output.exit_code, "Shutdown command exited non-zero");
        }

        let deadline = Instant::now() + self.timeout;
        loop {
            if cancel.is_cancelled() {
                return Err(ForgeError::Cancelled("shutdown cancelled".into()));
            }

            if !driver.is_running(vm_name).await? {
                self.state = ShutdownState::Stopped;
                tracing::info!(vm = vm_name, "VM shut down");
                break;
            }

            if Instant::now() >= deadline {
                self.state = ShutdownState::TimedOut;
                return Err(ForgeError::Timeout(
                    "timeout waiting for VM to shut down".into(),
                ));
            }

            tracing::info!(vm = vm_name, "VM still running, waiting for shutdown");
            tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(ForgeError::Cancelled("shutdown cancelled".into()));
                }
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }

        if !self.post_shutdown_delay.is_zero() {
            tracing::debug!(
                delay_ms = self.post_shutdown_delay.as_millis() as u64,
                "Waiting after shutdown"
            );
            tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(ForgeError::Cancelled("shutdown cancelled".into()));
                }
                _ = tokio::time::sleep(self.post_shutdown_delay) => {}
            }
        }

        Ok(())
    }
}
