use tokio_util::sync::CancellationToken;
use vmforge_shared::errors::{ForgeError, ForgeResult};

use crate::pipeline::{BuildState, Step, StepAction};

/// Runs the user's inline shell commands in the guest, in order.
pub struct StepProvision {
    commands: Vec<String>,
}

impl StepProvision {
    pub fn new(commands: Vec<String>) -> Self {
        Self { commands }
    }

    async fn provision(&self, cancel: &CancellationToken, state: &BuildState) -> ForgeResult<()> {
        let comm = state.require_communicator()?;

        for (i, command) in self.commands.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(ForgeError::Cancelled("provisioning cancelled".into()));
            }

            state.ui.say(&format!("Provisioning with shell: {command}"));
            let output = comm.start(command).await?.check(command)?;
            if !output.stdout.is_empty() {
                state.ui.message(&output.stdout);
            }
            tracing::info!(index = i, command = %command, "Provisioner command finished");
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl Step for StepProvision {
    fn name(&self) -> &'static str {
        "provision"
    }

    async fn run(&mut self, cancel: &CancellationToken, state: &mut BuildState) -> StepAction {
        if self.commands.is_empty() {
            return StepAction::Continue;
        }
        match self.provision(cancel, state).await {
            Ok(()) => StepAction::Continue,
            Err(e) => state.fail(e.context("error running provisioner")),
        }
    }
}
