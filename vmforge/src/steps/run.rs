use tokio_util::sync::CancellationToken;
use vmforge_shared::errors::ForgeResult;

use crate::pipeline::{BuildState, Step, StepAction};

/// Boots the VM.
#[derive(Default)]
pub struct StepRun {
    vm_name: Option<String>,
}

impl StepRun {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl Step for StepRun {
    fn name(&self) -> &'static str {
        "run"
    }

    async fn run(&mut self, _cancel: &CancellationToken, state: &mut BuildState) -> StepAction {
        let vm_name = match state.require_vm_name() {
            Ok(name) => name.to_string(),
            Err(e) => return state.fail(e),
        };

        state.ui.say("Starting the virtual machine...");
        if let Err(e) = state.driver.start(&vm_name).await {
            return state.fail(e.context("error starting VM"));
        }

        tracing::info!(vm = %vm_name, "VM started");
        state.instance_id = Some(vm_name.clone());
        self.vm_name = Some(vm_name);
        StepAction::Continue
    }

    async fn cleanup(&mut self, state: &mut BuildState) -> ForgeResult<()> {
        let Some(vm_name) = self.vm_name.as_deref() else {
            return Ok(());
        };

        let running = state
            .driver
            .is_running(vm_name)
            .await
            .map_err(|e| e.context("error checking VM state"))?;
        if !running {
            return Ok(());
        }

        state.ui.say("Stopping virtual machine...");
        state
            .driver
            .stop(vm_name)
            .await
            .map_err(|e| e.context("error shutting down VM"))
    }
}
