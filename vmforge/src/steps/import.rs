use tokio_util::sync::CancellationToken;
use vmforge_shared::errors::{ForgeError, ForgeResult};

use super::deregister_vm;
use crate::pipeline::{BuildState, Step, StepAction};

/// Registers an existing `.utm` bundle with UTM.
///
/// UTM names the imported VM after the bundle, so `name` must match the
/// bundle's file stem.
pub struct StepImport {
    name: String,
    keep_registered: bool,
    imported: bool,
}

impl StepImport {
    pub fn new(name: impl Into<String>, keep_registered: bool) -> Self {
        Self {
            name: name.into(),
            keep_registered,
            imported: false,
        }
    }
}

#[async_trait::async_trait]
impl Step for StepImport {
    fn name(&self) -> &'static str {
        "import"
    }

    async fn run(&mut self, _cancel: &CancellationToken, state: &mut BuildState) -> StepAction {
        let Some(path) = state.vm_path.clone() else {
            return state.fail(ForgeError::Internal(
                "vm_path not set, download step must run first".into(),
            ));
        };

        state.ui.say(&format!("Importing VM {}", path.display()));
        if let Err(e) = state.driver.import(&self.name, &path).await {
            return state.fail(e.context("error importing VM"));
        }

        self.imported = true;
        state.vm_name = Some(self.name.clone());
        tracing::info!(vm = %self.name, path = %path.display(), "VM imported");
        StepAction::Continue
    }

    async fn cleanup(&mut self, state: &mut BuildState) -> ForgeResult<()> {
        if !self.imported {
            return Ok(());
        }
        deregister_vm(&self.name, self.keep_registered, state).await
    }
}
