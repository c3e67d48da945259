use tokio_util::sync::CancellationToken;
use vmforge_shared::errors::{ForgeError, ForgeResult};

use crate::driver::scripts;
use crate::pipeline::{BuildState, Step, StepAction};

/// Attaches the boot ISO as a removable drive.
pub struct StepAttachIsos {
    attach_boot_iso: bool,
}

impl StepAttachIsos {
    pub fn new(attach_boot_iso: bool) -> Self {
        Self { attach_boot_iso }
    }
}

async fn attach(vm_name: &str, iso: &std::path::Path, state: &BuildState) -> ForgeResult<()> {
    let resolved = tokio::fs::canonicalize(iso).await.map_err(|e| {
        ForgeError::ResourceAcquisition(format!(
            "error resolving symlink for ISO {}: {e}",
            iso.display()
        ))
    })?;

    state.ui.message(&format!("Mounting ISO {}", resolved.display()));
    let resolved = resolved.to_string_lossy();
    state
        .driver
        .execute_script(scripts::ATTACH_ISO, &[vm_name, "--iso", &resolved])
        .await
        .map_err(|e| e.context("error mounting ISO"))?;
    Ok(())
}

#[async_trait::async_trait]
impl Step for StepAttachIsos {
    fn name(&self) -> &'static str {
        "attach_isos"
    }

    async fn run(&mut self, _cancel: &CancellationToken, state: &mut BuildState) -> StepAction {
        let iso = match (&state.iso_path, self.attach_boot_iso) {
            (Some(path), true) => path.clone(),
            _ => {
                state.ui.message("No ISOs to mount; continuing...");
                return StepAction::Continue;
            }
        };
        let vm_name = match state.require_vm_name() {
            Ok(name) => name.to_string(),
            Err(e) => return state.fail(e),
        };

        state.ui.say("Mounting ISOs...");
        match attach(&vm_name, &iso, state).await {
            Ok(()) => StepAction::Continue,
            Err(e) => state.fail(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::mock_state;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_nothing_to_mount() {
        let (mut state, driver, ui) = mock_state();
        state.vm_name = Some("foo".into());

        let mut step = StepAttachIsos::new(true);
        assert_eq!(
            step.run(&CancellationToken::new(), &mut state).await,
            StepAction::Continue
        );
        assert_eq!(ui.messages(), vec!["No ISOs to mount; continuing..."]);
        assert!(driver.state().script_calls.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_resolves_symlink_before_attaching() {
        let tmp = TempDir::new().unwrap();
        let real = tmp.path().join("real.iso");
        std::fs::write(&real, b"iso").unwrap();
        let link = tmp.path().join("link.iso");
        std::os::unix::fs::symlink(&real, &link).unwrap();

        let (mut state, driver, _ui) = mock_state();
        state.vm_name = Some("foo".into());
        state.iso_path = Some(link);

        let mut step = StepAttachIsos::new(true);
        assert_eq!(
            step.run(&CancellationToken::new(), &mut state).await,
            StepAction::Continue
        );

        let real = std::fs::canonicalize(&real).unwrap();
        assert_eq!(
            driver.state().script_calls,
            vec![vec![
                "attach_iso.applescript".to_string(),
                "foo".to_string(),
                "--iso".to_string(),
                real.display().to_string(),
            ]]
        );
    }

    #[tokio::test]
    async fn test_unresolvable_iso_is_resource_error() {
        let (mut state, driver, _ui) = mock_state();
        state.vm_name = Some("foo".into());
        state.iso_path = Some("/nonexistent/boot.iso".into());

        let mut step = StepAttachIsos::new(true);
        assert_eq!(
            step.run(&CancellationToken::new(), &mut state).await,
            StepAction::Halt
        );
        assert!(matches!(
            state.error(),
            Some(ForgeError::ResourceAcquisition(_))
        ));
        assert!(driver.state().script_calls.is_empty());
    }
}
