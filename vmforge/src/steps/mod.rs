//! Build steps.
//!
//! Each step holds only the configuration it needs and reports failures
//! through [`BuildState::fail`], wrapping the low-level error with the
//! operation that failed ("error creating VM: ...").

mod attach_iso;
mod cleanup_temp_keys;
mod connect;
mod create_disk;
mod create_vm;
mod download;
mod export;
mod import;
mod output_dir;
mod port_forward;
mod provision;
mod run;
mod shutdown;
mod ssh_key_pair;
mod upload_version;

pub use attach_iso::StepAttachIsos;
pub use cleanup_temp_keys::StepCleanupTempKeys;
pub use connect::{CommunicatorFactory, StepConnect};
pub use create_disk::StepCreateDisk;
pub use create_vm::StepCreateVm;
pub use download::{DownloadTarget, StepDownload};
pub use export::StepExport;
pub use import::StepImport;
pub use output_dir::StepOutputDir;
pub use port_forward::StepPortForwarding;
pub use provision::StepProvision;
pub use run::StepRun;
pub use shutdown::StepShutdown;
pub use ssh_key_pair::StepSshKeyPair;
pub use upload_version::StepUploadVersion;

use vmforge_shared::errors::ForgeResult;

use crate::pipeline::BuildState;

/// Cleanup shared by the create and import steps.
///
/// The VM stays registered only when `keep_registered` is set and the build
/// neither halted nor was cancelled.
async fn deregister_vm(
    vm_name: &str,
    keep_registered: bool,
    state: &BuildState,
) -> ForgeResult<()> {
    if keep_registered && !state.is_cancelled() && !state.is_halted() {
        state
            .ui
            .say("Keeping virtual machine registered with UTM (keep_registered = true)");
        return Ok(());
    }

    state.ui.say("Deregistering and deleting VM...");
    tracing::info!(vm = vm_name, "Deleting VM");
    state
        .driver
        .delete(vm_name)
        .await
        .map_err(|e| e.context("error deleting VM"))
}
