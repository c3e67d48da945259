//! Builds a VM from an installation ISO.

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use vmforge_shared::constants::defaults;
use vmforge_shared::errors::ForgeResult;

use super::config::{
    CommConfig, ExportConfig, HwConfig, OutputConfig, ProvisionConfig, ShutdownConfig,
    VersionFileConfig, VmBackend, config_message, finish,
};
use super::{BuildEnv, Builder, TailConfig, key_pair_step, run_pipeline, tail_steps};
use crate::artifact::Artifact;
use crate::pipeline::Step;
use crate::steps::{
    DownloadTarget, StepAttachIsos, StepCreateDisk, StepCreateVm, StepDownload, StepOutputDir,
};

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct IsoConfig {
    /// Name of this build, used in default names.
    #[serde(default)]
    pub build_name: String,

    #[serde(flatten)]
    pub output: OutputConfig,
    #[serde(flatten)]
    pub hw: HwConfig,
    #[serde(flatten)]
    pub export: ExportConfig,
    #[serde(flatten)]
    pub shutdown: ShutdownConfig,
    #[serde(flatten)]
    pub comm: CommConfig,
    #[serde(flatten)]
    pub version_file: VersionFileConfig,
    #[serde(flatten)]
    pub provision: ProvisionConfig,

    /// Single installation media source. Merged in front of `iso_urls`.
    #[serde(default)]
    pub iso_url: String,

    /// Sources tried in order until one resolves.
    #[serde(default)]
    pub iso_urls: Vec<String>,

    /// `sha256:<hex>`, a bare hex digest, or `none`.
    #[serde(default)]
    pub iso_checksum: Option<String>,

    /// Primary disk size in MiB.
    ///
    /// Default: `40960`
    #[serde(default)]
    pub disk_size: u64,

    /// Default: `aarch64`
    #[serde(default)]
    pub vm_arch: String,

    /// `qemu` or `apple`.
    ///
    /// Default: `qemu`
    #[serde(default)]
    pub vm_backend: String,

    /// Default: `vmforge-<build_name>-<unix time>`
    #[serde(default)]
    pub vm_name: String,

    /// Leave the VM registered with UTM after a successful build.
    #[serde(default)]
    pub keep_registered: bool,

    #[serde(default)]
    pub skip_export: bool,
}

impl IsoConfig {
    /// Every configured ISO source, `iso_url` first.
    pub fn sources(&self) -> Vec<String> {
        let mut sources = Vec::with_capacity(self.iso_urls.len() + 1);
        if !self.iso_url.is_empty() {
            sources.push(self.iso_url.clone());
        }
        sources.extend(self.iso_urls.iter().filter(|u| !u.is_empty()).cloned());
        sources
    }

    pub fn prepare(&mut self) -> ForgeResult<Vec<String>> {
        let mut errs = Vec::new();
        let mut warnings = Vec::new();

        if self.build_name.is_empty() {
            self.build_name = "iso".to_string();
        }
        self.export.prepare(&mut errs);
        self.output.prepare(&self.build_name);
        self.hw.prepare();
        self.shutdown.prepare(&mut errs);
        self.comm.prepare(&mut errs);
        self.version_file.prepare(self.comm.communicator, &mut errs);
        self.provision.prepare(self.comm.communicator, &mut errs);

        if self.sources().is_empty() {
            errs.push("one of iso_url or iso_urls must be specified".into());
        }
        match self.iso_checksum.as_deref().map(str::trim) {
            None | Some("") => warnings.push(
                "No iso_checksum given, the installation media will not be verified.".into(),
            ),
            Some(_) => {}
        }

        if self.disk_size == 0 {
            self.disk_size = defaults::DISK_SIZE_MIB;
        }
        if self.vm_arch.is_empty() {
            self.vm_arch = defaults::VM_ARCH.to_string();
        }
        if self.vm_backend.is_empty() {
            self.vm_backend = defaults::VM_BACKEND.to_string();
        }
        if let Err(e) = self.vm_backend.parse::<VmBackend>() {
            errs.push(config_message(e));
        }
        if self.vm_name.is_empty() {
            self.vm_name = format!(
                "vmforge-{}-{}",
                self.build_name,
                chrono::Utc::now().timestamp()
            );
        }

        warnings.extend(self.shutdown.warning());
        finish(errs, warnings)
    }
}

/// Creates a VM, installs from ISO and provisions it.
#[derive(Debug, Clone)]
pub struct IsoBuilder {
    config: IsoConfig,
}

impl IsoBuilder {
    pub fn new(config: IsoConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &IsoConfig {
        &self.config
    }

    fn steps(&self, env: &BuildEnv) -> ForgeResult<Vec<Box<dyn Step>>> {
        let cfg = &self.config;
        let backend: VmBackend = cfg.vm_backend.parse()?;

        let mut steps: Vec<Box<dyn Step>> = vec![
            Box::new(StepDownload::new(
                "ISO",
                cfg.sources(),
                cfg.iso_checksum.clone(),
                DownloadTarget::Iso,
            )),
            Box::new(StepOutputDir::new(cfg.output.output_dir.clone(), env.force)),
            key_pair_step(&cfg.comm, &cfg.build_name, env),
            Box::new(StepCreateVm::new(
                cfg.vm_name.clone(),
                backend,
                cfg.vm_arch.clone(),
                cfg.hw.cpus,
                u64::from(cfg.hw.memory),
                cfg.keep_registered,
            )),
            Box::new(StepCreateDisk::new(cfg.disk_size)),
            Box::new(StepAttachIsos::new(true)),
        ];
        steps.extend(tail_steps(
            TailConfig {
                output: &cfg.output,
                export: &cfg.export,
                shutdown: &cfg.shutdown,
                comm: &cfg.comm,
                version_file: &cfg.version_file,
                provision: &cfg.provision,
                skip_export: cfg.skip_export,
            },
            env,
        ));
        Ok(steps)
    }
}

#[async_trait::async_trait]
impl Builder for IsoBuilder {
    fn prepare(&mut self) -> ForgeResult<Vec<String>> {
        self.config.prepare()
    }

    fn build_name(&self) -> &str {
        &self.config.build_name
    }

    async fn run(&self, cancel: &CancellationToken, env: BuildEnv) -> ForgeResult<Artifact> {
        let steps = self.steps(&env)?;
        tracing::info!(vm = %self.config.vm_name, steps = steps.len(), "Starting ISO build");
        run_pipeline(steps, cancel, &env, &self.config.output).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vmforge_shared::ForgeError;

    fn minimal() -> IsoConfig {
        serde_json::from_value(serde_json::json!({
            "build_name": "foo",
            "iso_url": "file:///tmp/install.iso",
            "iso_checksum": "none",
            "ssh_username": "admin",
            "shutdown_command": "sudo shutdown -h now",
        }))
        .unwrap()
    }

    #[test]
    fn test_prepare_defaults() {
        let mut cfg = minimal();
        let warnings = cfg.prepare().unwrap();

        assert!(warnings.is_empty());
        assert_eq!(cfg.hw.cpus, 1);
        assert_eq!(cfg.hw.memory, 512);
        assert_eq!(cfg.disk_size, 40960);
        assert_eq!(cfg.vm_arch, "aarch64");
        assert_eq!(cfg.vm_backend.parse::<VmBackend>().unwrap().utm_code(), "QeMu");
        assert_eq!(cfg.export.format, "utm");
        assert_eq!(cfg.version_file.path(), ".utm_version");
        assert_eq!(cfg.output.output_dir, std::path::PathBuf::from("output-foo"));
        assert!(cfg.vm_name.starts_with("vmforge-foo-"));
    }

    #[test]
    fn test_prepare_collects_every_problem() {
        let mut cfg: IsoConfig = serde_json::from_value(serde_json::json!({
            "vm_backend": "hyperv",
            "format": "ova",
        }))
        .unwrap();

        let err = cfg.prepare().unwrap_err();
        let ForgeError::Config(msg) = err else {
            panic!("expected config error, got {err:?}");
        };
        assert!(msg.contains("vm_backend must be either 'apple' or 'qemu'"));
        assert!(msg.contains("invalid format, only 'utm' is allowed"));
        assert!(msg.contains("ssh_username must be specified"));
        assert!(msg.contains("one of iso_url or iso_urls must be specified"));
    }

    #[test]
    fn test_missing_shutdown_command_and_checksum_warn() {
        let mut cfg = minimal();
        cfg.shutdown.shutdown_command.clear();
        cfg.iso_checksum = None;

        let warnings = cfg.prepare().unwrap();
        assert_eq!(warnings.len(), 2);
        assert!(warnings[1].contains("may result in data loss"));
    }

    #[test]
    fn test_sources_merge_url_first() {
        let mut cfg = minimal();
        cfg.iso_urls = vec!["b.iso".into(), String::new()];
        assert_eq!(cfg.sources(), vec!["file:///tmp/install.iso", "b.iso"]);
    }

    #[test]
    fn test_step_order() {
        let mut cfg = minimal();
        cfg.prepare().unwrap();
        let builder = IsoBuilder::new(cfg);
        let env = BuildEnv::new(
            std::sync::Arc::new(crate::driver::MockDriver::new()),
            std::sync::Arc::new(crate::ui::MockUi::new()),
        );

        let names: Vec<_> = builder
            .steps(&env)
            .unwrap()
            .iter()
            .map(|s| s.name())
            .collect();
        assert_eq!(
            names,
            vec![
                "download",
                "output_dir",
                "ssh_key_pair",
                "create_vm",
                "create_disk",
                "attach_isos",
                "port_forwarding",
                "run",
                "connect",
                "upload_version",
                "provision",
                "cleanup_temp_keys",
                "shutdown",
                "export",
            ]
        );
    }
}
