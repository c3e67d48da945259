use tokio_util::sync::CancellationToken;

use crate::pipeline::{BuildState, Step, StepAction};
use crate::shutdown::ShutdownController;

/// Stops the guest before export, gracefully when possible.
pub struct StepShutdown {
    controller: ShutdownController,
}

impl StepShutdown {
    pub fn new(controller: ShutdownController) -> Self {
        Self { controller }
    }
}

#[async_trait::async_trait]
impl Step for StepShutdown {
    fn name(&self) -> &'static str {
        "shutdown"
    }

    async fn run(&mut self, cancel: &CancellationToken, state: &mut BuildState) -> StepAction {
        let vm_name = match state.require_vm_name() {
            Ok(name) => name.to_string(),
            Err(e) => return state.fail(e),
        };

        let comm = state.communicator.clone();
        if self.controller.is_graceful(comm.is_some()) {
            state.ui.say("Gracefully halting virtual machine...");
        } else {
            state.ui.say("Forcibly halting virtual machine...");
        }

        let result = self
            .controller
            .shutdown(cancel, state.driver.as_ref(), comm.as_deref(), &vm_name)
            .await;

        match result {
            Ok(()) => {
                tracing::info!(vm = %vm_name, state = ?self.controller.state(), "VM shut down");
                StepAction::Continue
            }
            Err(e) => state.fail(e.context("error shutting down VM")),
        }
    }
}
