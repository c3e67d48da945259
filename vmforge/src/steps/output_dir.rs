use std::path::{Path, PathBuf};

use tokio_util::sync::CancellationToken;
use vmforge_shared::errors::{ForgeError, ForgeResult};

use crate::pipeline::{BuildState, Step, StepAction};

/// Creates the output directory, refusing to reuse a non-empty one unless
/// forced. Removes it again if the build does not finish.
pub struct StepOutputDir {
    path: PathBuf,
    force: bool,
    created: bool,
}

impl StepOutputDir {
    pub fn new(path: impl Into<PathBuf>, force: bool) -> Self {
        Self {
            path: path.into(),
            force,
            created: false,
        }
    }
}

#[async_trait::async_trait]
impl Step for StepOutputDir {
    fn name(&self) -> &'static str {
        "output_dir"
    }

    async fn run(&mut self, _cancel: &CancellationToken, state: &mut BuildState) -> StepAction {
        match prepare_dir(&self.path, self.force, state).await {
            Ok(()) => {
                self.created = true;
                StepAction::Continue
            }
            Err(e) => state.fail(e),
        }
    }

    async fn cleanup(&mut self, state: &mut BuildState) -> ForgeResult<()> {
        if !self.created || !(state.is_cancelled() || state.is_halted()) {
            return Ok(());
        }

        state.ui.say("Deleting output directory...");
        match tokio::fs::remove_dir_all(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ForgeError::Io(e).context("error deleting output directory")),
        }
    }
}

async fn prepare_dir(path: &Path, force: bool, state: &BuildState) -> ForgeResult<()> {
    if is_non_empty_dir(path).await? {
        if !force {
            return Err(ForgeError::Config(format!(
                "Output directory exists: {}\nUse --force to delete it prior to building.",
                path.display()
            )));
        }
        state.ui.say("Deleting previous output directory...");
        tokio::fs::remove_dir_all(path).await?;
    }

    tracing::info!(path = %path.display(), "Creating output directory");
    tokio::fs::create_dir_all(path).await?;
    Ok(())
}

async fn is_non_empty_dir(path: &Path) -> ForgeResult<bool> {
    match tokio::fs::read_dir(path).await {
        Ok(mut entries) => Ok(entries.next_entry().await?.is_some()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}
