//! Shared build context.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use vmforge_shared::errors::{ForgeError, ForgeResult};

use super::StepAction;
use crate::communicator::Communicator;
use crate::driver::Driver;
use crate::ui::Ui;

/// Typed record threaded through every step of one build.
///
/// Each field has a single owner that writes it:
///
/// | field | written by |
/// |---|---|
/// | `communicator` | connect step |
/// | `ssh_private_key_file` | SSH key pair step |
/// | `ssh_public_key` | SSH key pair step (temporary keys only) |
/// | `vm_name` | create / import step |
/// | `vm_path` | download step (bundle build) |
/// | `iso_path` | download step (ISO build) |
/// | `comm_host_port` | port forwarding step |
/// | `instance_id` | run step |
/// | `export_path` | export step |
/// | `generated_data` | any step, additive |
///
/// The error and the halted/cancelled markers are private: steps record
/// failures with [`BuildState::fail`], and only the runner sets the markers.
pub struct BuildState {
    pub driver: Arc<dyn Driver>,
    pub ui: Arc<dyn Ui>,
    pub communicator: Option<Arc<dyn Communicator>>,
    pub ssh_private_key_file: Option<PathBuf>,
    pub ssh_public_key: Option<String>,

    pub vm_name: Option<String>,
    pub vm_path: Option<PathBuf>,
    pub iso_path: Option<PathBuf>,
    pub comm_host_port: Option<u16>,
    pub instance_id: Option<String>,
    pub export_path: Option<PathBuf>,

    /// Values exposed to the artifact, e.g. `SourceImageURL`.
    pub generated_data: BTreeMap<String, serde_json::Value>,

    error: Option<ForgeError>,
    cancelled: bool,
    halted: bool,
}

impl BuildState {
    pub fn new(driver: Arc<dyn Driver>, ui: Arc<dyn Ui>) -> Self {
        Self {
            driver,
            ui,
            communicator: None,
            ssh_private_key_file: None,
            ssh_public_key: None,
            vm_name: None,
            vm_path: None,
            iso_path: None,
            comm_host_port: None,
            instance_id: None,
            export_path: None,
            generated_data: BTreeMap::new(),
            error: None,
            cancelled: false,
            halted: false,
        }
    }

    /// Record a step failure, show it to the user and tell the runner to
    /// halt.
    ///
    /// Only the first error is kept; later ones are logged and dropped so
    /// the user sees the root cause.
    pub fn fail(&mut self, err: ForgeError) -> StepAction {
        self.ui.error(&err.to_string());
        match &self.error {
            Some(first) => {
                tracing::warn!(
                    error = %err,
                    first_error = %first,
                    "Dropping error, build already failed"
                );
            }
            None => {
                tracing::error!(error = %err, "Build step failed");
                self.error = Some(err);
            }
        }
        StepAction::Halt
    }

    pub fn error(&self) -> Option<&ForgeError> {
        self.error.as_ref()
    }

    pub fn take_error(&mut self) -> Option<ForgeError> {
        self.error.take()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    /// Set by the runner when the cancellation token fired.
    pub fn mark_cancelled(&mut self) {
        self.cancelled = true;
    }

    /// Set by the runner when a step halted or failed.
    pub fn mark_halted(&mut self) {
        self.halted = true;
    }

    /// The VM name, or an internal error if no create/import step ran.
    pub fn require_vm_name(&self) -> ForgeResult<&str> {
        self.vm_name.as_deref().ok_or_else(|| {
            ForgeError::Internal("vm_name not set, create or import step must run first".into())
        })
    }

    pub fn require_communicator(&self) -> ForgeResult<Arc<dyn Communicator>> {
        self.communicator.clone().ok_or_else(|| {
            ForgeError::Internal("communicator not set, connect step must run first".into())
        })
    }
}

impl std::fmt::Debug for BuildState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuildState")
            .field("vm_name", &self.vm_name)
            .field("vm_path", &self.vm_path)
            .field("iso_path", &self.iso_path)
            .field("comm_host_port", &self.comm_host_port)
            .field("instance_id", &self.instance_id)
            .field("export_path", &self.export_path)
            .field("error", &self.error)
            .field("cancelled", &self.cancelled)
            .field("halted", &self.halted)
            .finish_non_exhaustive()
    }
}
