use tokio_util::sync::CancellationToken;

use crate::driver::scripts;
use crate::pipeline::{BuildState, Step, StepAction};

/// Adds the primary hard drive to a freshly created VM.
pub struct StepCreateDisk {
    size_mib: u64,
}

impl StepCreateDisk {
    pub fn new(size_mib: u64) -> Self {
        Self { size_mib }
    }
}

#[async_trait::async_trait]
impl Step for StepCreateDisk {
    fn name(&self) -> &'static str {
        "create_disk"
    }

    async fn run(&mut self, _cancel: &CancellationToken, state: &mut BuildState) -> StepAction {
        let vm_name = match state.require_vm_name() {
            Ok(name) => name.to_string(),
            Err(e) => return state.fail(e),
        };

        state.ui.say("Creating hard drive...");
        let size = self.size_mib.to_string();
        let result = state
            .driver
            .execute_script(scripts::ADD_DRIVE, &[&vm_name, "--size", &size])
            .await;

        match result {
            Ok(_) => {
                tracing::info!(vm = %vm_name, size_mib = self.size_mib, "Hard drive added");
                StepAction::Continue
            }
            Err(e) => state.fail(e.context("error creating hard drive")),
        }
    }
}
