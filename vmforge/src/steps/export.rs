use std::path::PathBuf;

use tokio_util::sync::CancellationToken;
use vmforge_shared::errors::{ForgeError, ForgeResult};

use crate::driver::scripts;
use crate::pipeline::{BuildState, Step, StepAction};

/// Final step: removes the build-time port forward and waits for the user
/// to export the VM bundle.
///
/// UTM's scripting surface cannot export, so the export itself is manual and
/// this step only gates on the user's confirmation.
pub struct StepExport {
    format: String,
    output_dir: PathBuf,
    output_filename: Option<String>,
    skip_nat_mapping: bool,
    skip_export: bool,
}

impl StepExport {
    pub fn new(
        format: impl Into<String>,
        output_dir: impl Into<PathBuf>,
        output_filename: Option<String>,
        skip_nat_mapping: bool,
        skip_export: bool,
    ) -> Self {
        Self {
            format: format.into(),
            output_dir: output_dir.into(),
            output_filename,
            skip_nat_mapping,
            skip_export,
        }
    }

    fn export_path(&self, vm_name: &str) -> PathBuf {
        let stem = self
            .output_filename
            .as_deref()
            .filter(|f| !f.is_empty())
            .unwrap_or(vm_name);
        self.output_dir.join(format!("{stem}.{}", self.format))
    }

    async fn clear_port_forward(&self, vm_name: &str, state: &BuildState) -> ForgeResult<()> {
        let Some(port) = state.comm_host_port else {
            return Ok(());
        };
        if self.skip_nat_mapping {
            return Ok(());
        }

        state.ui.message("Clearing port forwarding rule...");
        let port = port.to_string();
        state
            .driver
            .execute_script(scripts::CLEAR_PORT_FORWARDS, &[vm_name, "--index", "1", &port])
            .await
            .map_err(|e| e.context("error removing port forwarding rule"))?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl Step for StepExport {
    fn name(&self) -> &'static str {
        "export"
    }

    async fn run(&mut self, cancel: &CancellationToken, state: &mut BuildState) -> StepAction {
        if self.skip_export {
            state.ui.say("Skipping export of virtual machine...");
            return StepAction::Continue;
        }

        let vm_name = match state.require_vm_name() {
            Ok(name) => name.to_string(),
            Err(e) => return state.fail(e),
        };

        state.ui.say("Preparing to export the VM...");
        if let Err(e) = self.clear_port_forward(&vm_name, state).await {
            return state.fail(e);
        }

        let path = self.export_path(&vm_name);
        state.ui.say(&format!(
            "Exporting virtual machine to {} (manual step)",
            path.display()
        ));

        let query = format!(
            "Confirm you have exported the VM to path [{}] [Y/n]:",
            path.display()
        );
        let ui = state.ui.clone();
        let answer = tokio::select! {
            answer = ui.ask(&query) => answer,
            _ = cancel.cancelled() => {
                return state.fail(ForgeError::Cancelled(
                    "waiting for export confirmation cancelled".into(),
                ));
            }
        };
        match answer {
            Ok(a) if a == "y" || a == "Y" => {
                tracing::info!(vm = %vm_name, path = %path.display(), "Export confirmed");
                state.export_path = Some(path);
                StepAction::Continue
            }
            Ok(_) => {
                state.ui.error("Export halted by user.");
                StepAction::Halt
            }
            Err(e) => state.fail(e.context("error waiting for export confirmation")),
        }
    }
}
