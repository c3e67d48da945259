use tokio_util::sync::CancellationToken;
use vmforge_shared::errors::ForgeResult;

use crate::pipeline::{BuildState, Step, StepAction};

/// Writes the host's UTM version into the guest.
pub struct StepUploadVersion {
    path: String,
}

impl StepUploadVersion {
    /// An empty `path` disables the upload.
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }

    async fn upload(&self, state: &BuildState) -> ForgeResult<()> {
        let version = state
            .driver
            .version()
            .await
            .map_err(|e| e.context("error reading version for metadata upload"))?;

        state
            .ui
            .say(&format!("Uploading UTM version info ({version})"));
        let comm = state.require_communicator()?;
        comm.upload(&self.path, version.as_bytes())
            .await
            .map_err(|e| e.context("error uploading UTM version"))?;

        tracing::info!(path = %self.path, version = %version, "Uploaded UTM version");
        Ok(())
    }
}

#[async_trait::async_trait]
impl Step for StepUploadVersion {
    fn name(&self) -> &'static str {
        "upload_version"
    }

    async fn run(&mut self, _cancel: &CancellationToken, state: &mut BuildState) -> StepAction {
        if self.path.is_empty() {
            return StepAction::Continue;
        }
        match self.upload(state).await {
            Ok(()) => StepAction::Continue,
            Err(e) => state.fail(e),
        }
    }
}
