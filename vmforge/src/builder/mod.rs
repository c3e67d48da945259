//! The two UTM builders and what they share.
//!
//! A builder validates its configuration in [`Builder::prepare`], then
//! assembles a fixed list of steps and hands it to the [`Runner`].
//!
//! | builder | source | first steps |
//! |---|---|---|
//! | [`IsoBuilder`] | installation ISO | download, output dir, SSH key, create VM, create disk, attach ISO |
//! | [`BundleBuilder`] | existing `.utm` bundle | output dir, SSH key, download, import |
//!
//! Both end with port forwarding, run, connect, version upload,
//! provisioning, temporary key cleanup, shutdown and export.

pub mod bundle;
pub mod config;
pub mod iso;

use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use vmforge_shared::errors::{ForgeError, ForgeResult};

pub use bundle::{BundleBuilder, BundleConfig};
pub use iso::{IsoBuilder, IsoConfig};

use crate::artifact::Artifact;
use crate::communicator::{Communicator, SshCommunicator};
use crate::driver::Driver;
use crate::net::PortAllocator;
use crate::pipeline::{BuildState, Runner, Step};
use crate::shutdown::ShutdownController;
use crate::steps::{
    CommunicatorFactory, StepCleanupTempKeys, StepConnect, StepExport, StepPortForwarding,
    StepProvision, StepRun, StepShutdown, StepSshKeyPair, StepUploadVersion,
};
use crate::ui::Ui;
use config::{
    CommConfig, ExportConfig, OutputConfig, ProvisionConfig, ShutdownConfig, VersionFileConfig,
};

/// Collaborators and flags for one build invocation.
pub struct BuildEnv {
    pub driver: Arc<dyn Driver>,
    pub ui: Arc<dyn Ui>,
    /// Replace an existing non-empty output directory.
    pub force: bool,
    /// Ask before every step.
    pub debug: bool,
    /// Overrides the SSH communicator, e.g. with a mock in tests.
    pub communicator_factory: Option<CommunicatorFactory>,
}

impl BuildEnv {
    pub fn new(driver: Arc<dyn Driver>, ui: Arc<dyn Ui>) -> Self {
        Self {
            driver,
            ui,
            force: false,
            debug: false,
            communicator_factory: None,
        }
    }

    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_communicator_factory(mut self, factory: CommunicatorFactory) -> Self {
        self.communicator_factory = Some(factory);
        self
    }
}

#[async_trait::async_trait]
pub trait Builder: Send + Sync {
    /// Apply defaults and validate. Returns warnings to show the user;
    /// every problem found is reported in one [`ForgeError::Config`].
    fn prepare(&mut self) -> ForgeResult<Vec<String>>;

    /// Name of the build, used as the console prefix.
    fn build_name(&self) -> &str;

    /// Run the build to completion.
    async fn run(&self, cancel: &CancellationToken, env: BuildEnv) -> ForgeResult<Artifact>;
}

/// Factory logging in as the configured user over the system `ssh` client.
pub fn ssh_factory(comm: &CommConfig) -> CommunicatorFactory {
    let username = comm.ssh_username.clone();
    Arc::new(move |target| {
        let ssh = SshCommunicator::new(target.host.clone(), target.port, username.clone())
            .with_private_key(target.private_key_file.clone());
        Arc::new(ssh) as Arc<dyn Communicator>
    })
}

/// Key selection step. In debug mode a generated key is also saved as
/// `<build_name>.pem`.
pub(crate) fn key_pair_step(
    comm: &CommConfig,
    build_name: &str,
    env: &BuildEnv,
) -> Box<dyn Step> {
    let debug_key = env.debug.then(|| PathBuf::from(format!("{build_name}.pem")));
    Box::new(
        StepSshKeyPair::new(
            comm.communicator,
            comm.ssh_private_key_file.clone(),
            comm.temporary_key_pair_type,
            format!("vmforge-{build_name}"),
        )
        .with_debug_key_path(debug_key),
    )
}

/// Configuration for the steps both builders end with.
pub(crate) struct TailConfig<'a> {
    pub output: &'a OutputConfig,
    pub export: &'a ExportConfig,
    pub shutdown: &'a ShutdownConfig,
    pub comm: &'a CommConfig,
    pub version_file: &'a VersionFileConfig,
    pub provision: &'a ProvisionConfig,
    pub skip_export: bool,
}

/// Port forwarding through export, run included.
pub(crate) fn tail_steps(cfg: TailConfig<'_>, env: &BuildEnv) -> Vec<Box<dyn Step>> {
    let comm = cfg.comm;
    let factory = env
        .communicator_factory
        .clone()
        .unwrap_or_else(|| ssh_factory(comm));

    let shutdown = ShutdownController::new(
        Some(cfg.shutdown.shutdown_command.clone()),
        cfg.shutdown.timeout(),
    )
    .with_disabled(cfg.shutdown.disable_shutdown)
    .with_post_shutdown_delay(cfg.shutdown.post_shutdown_delay());

    let output_filename = Some(cfg.output.output_filename.clone()).filter(|f| !f.is_empty());

    vec![
        Box::new(StepPortForwarding::new(
            comm.communicator,
            comm.ssh_port,
            PortAllocator::new(comm.host_port_min, comm.host_port_max),
            comm.skip_nat_mapping,
        )),
        Box::new(StepRun::new()),
        Box::new(StepConnect::new(
            comm.communicator,
            comm.ssh_host.clone(),
            factory,
            comm.ssh_timeout(),
            comm.handshake_interval(),
        )),
        Box::new(StepUploadVersion::new(cfg.version_file.path())),
        Box::new(StepProvision::new(cfg.provision.provision.clone())),
        Box::new(StepCleanupTempKeys::new(comm.ssh_clear_authorized_keys)),
        Box::new(StepShutdown::new(shutdown)),
        Box::new(StepExport::new(
            cfg.export.format.clone(),
            cfg.output.output_dir.clone(),
            output_filename,
            comm.skip_nat_mapping,
            cfg.skip_export,
        )),
    ]
}

/// Run `steps` and turn the final state into an artifact or an error.
pub(crate) async fn run_pipeline(
    steps: Vec<Box<dyn Step>>,
    cancel: &CancellationToken,
    env: &BuildEnv,
    output: &OutputConfig,
) -> ForgeResult<Artifact> {
    let mut state = BuildState::new(env.driver.clone(), env.ui.clone());
    Runner::new(steps)
        .with_debug(env.debug)
        .run(cancel, &mut state)
        .await;

    if let Some(err) = state.take_error() {
        return Err(err);
    }
    if state.is_cancelled() {
        return Err(ForgeError::Cancelled("build was cancelled".into()));
    }
    if state.is_halted() {
        return Err(ForgeError::Cancelled("build was halted".into()));
    }

    let vm_name = state.require_vm_name()?.to_string();
    let mut artifact_state = std::collections::BTreeMap::new();
    artifact_state.insert(
        "generated_data".to_string(),
        serde_json::to_value(&state.generated_data)
            .map_err(|e| ForgeError::Internal(format!("generated data: {e}")))?,
    );

    let artifact = Artifact::from_dir(vm_name, &output.output_dir, artifact_state)?;
    tracing::info!(
        id = artifact.id(),
        dir = %artifact.dir().display(),
        files = artifact.files().len(),
        "Build finished"
    );
    Ok(artifact)
}
