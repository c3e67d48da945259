use tokio_util::sync::CancellationToken;
use vmforge_shared::errors::ForgeResult;

use crate::pipeline::{BuildState, Step, StepAction};

/// Removes the temporary public key from the guest's `authorized_keys`
/// once provisioning is done. Failures are reported but never stop the
/// build.
pub struct StepCleanupTempKeys {
    clear_authorized_keys: bool,
}

impl StepCleanupTempKeys {
    pub fn new(clear_authorized_keys: bool) -> Self {
        Self {
            clear_authorized_keys,
        }
    }
}

/// `sed` script deleting every line that holds `public_key`.
fn removal_command(public_key: &str) -> String {
    let pattern = public_key.trim().replace('/', "\\/");
    format!(
        "sed -i.bak '/{pattern}/d' ~/.ssh/authorized_keys; rm -f ~/.ssh/authorized_keys.bak"
    )
}

async fn remove_key(public_key: &str, state: &BuildState) -> ForgeResult<()> {
    let comm = state.require_communicator()?;
    let command = removal_command(public_key);
    comm.start(&command).await?.check("sed")?;
    Ok(())
}

#[async_trait::async_trait]
impl Step for StepCleanupTempKeys {
    fn name(&self) -> &'static str {
        "cleanup_temp_keys"
    }

    async fn run(&mut self, _cancel: &CancellationToken, state: &mut BuildState) -> StepAction {
        if !self.clear_authorized_keys || state.communicator.is_none() {
            return StepAction::Continue;
        }
        // Only a generated key is ours to remove.
        let Some(public_key) = state.ssh_public_key.clone() else {
            return StepAction::Continue;
        };

        state.ui.say("Trying to remove ephemeral keys from authorized_keys files");
        if let Err(e) = remove_key(&public_key, state).await {
            tracing::warn!(error = %e, "Failed to remove temporary key from guest");
            state
                .ui
                .error("Error cleaning up ~/.ssh/authorized_keys; please clean up keys manually");
        }
        StepAction::Continue
    }
}
