//! Builds a VM from an existing `.utm` bundle.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use vmforge_shared::errors::ForgeResult;

use super::config::{
    CommConfig, ExportConfig, OutputConfig, ProvisionConfig, ShutdownConfig, VersionFileConfig,
    finish,
};
use super::{BuildEnv, Builder, TailConfig, key_pair_step, run_pipeline, tail_steps};
use crate::artifact::Artifact;
use crate::pipeline::Step;
use crate::steps::{DownloadTarget, StepDownload, StepImport, StepOutputDir};

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct BundleConfig {
    #[serde(default)]
    pub build_name: String,

    #[serde(flatten)]
    pub output: OutputConfig,
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

    /// Path (or `file://` URL) of the source bundle. Required.
    #[serde(default)]
    pub source_path: String,

    /// Checked only when the source is a regular file.
    #[serde(default)]
    pub checksum: Option<String>,

    /// Must equal the bundle's file name without extension, since UTM keeps
    /// that name on import.
    ///
    /// Default: the source bundle's file stem
    #[serde(default)]
    pub vm_name: String,

    #[serde(default)]
    pub keep_registered: bool,

    #[serde(default)]
    pub skip_export: bool,
}

impl BundleConfig {
    pub fn prepare(&mut self) -> ForgeResult<Vec<String>> {
        let mut errs = Vec::new();
        let mut warnings = Vec::new();

        if self.build_name.is_empty() {
            self.build_name = "utm".to_string();
        }
        self.export.prepare(&mut errs);
        self.output.prepare(&self.build_name);
        self.shutdown.prepare(&mut errs);
        self.comm.prepare(&mut errs);
        self.version_file.prepare(self.comm.communicator, &mut errs);
        self.provision.prepare(self.comm.communicator, &mut errs);

        if self.source_path.is_empty() {
            errs.push("source_path is required".into());
        } else if self.vm_name.is_empty() {
            let path = self.source_path.strip_prefix("file://").unwrap_or(&self.source_path);
            match Path::new(path).file_stem() {
                Some(stem) => self.vm_name = stem.to_string_lossy().into_owned(),
                None => errs.push(format!("cannot derive vm_name from {}", self.source_path)),
            }
        }

        warnings.extend(self.shutdown.warning());
        finish(errs, warnings)
    }
}

/// Imports a bundle, provisions it and exports the result.
#[derive(Debug, Clone)]
pub struct BundleBuilder {
    config: BundleConfig,
}

impl BundleBuilder {
    pub fn new(config: BundleConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BundleConfig {
        &self.config
    }

    fn steps(&self, env: &BuildEnv) -> Vec<Box<dyn Step>> {
        let cfg = &self.config;
        let mut steps: Vec<Box<dyn Step>> = vec![
            Box::new(StepOutputDir::new(cfg.output.output_dir.clone(), env.force)),
            key_pair_step(&cfg.comm, &cfg.build_name, env),
            Box::new(StepDownload::new(
                "VM bundle",
                vec![cfg.source_path.clone()],
                cfg.checksum.clone(),
                DownloadTarget::Vm,
            )),
            Box::new(StepImport::new(cfg.vm_name.clone(), cfg.keep_registered)),
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
        steps
    }
}

#[async_trait::async_trait]
impl Builder for BundleBuilder {
    fn prepare(&mut self) -> ForgeResult<Vec<String>> {
        self.config.prepare()
    }

    fn build_name(&self) -> &str {
        &self.config.build_name
    }

    async fn run(&self, cancel: &CancellationToken, env: BuildEnv) -> ForgeResult<Artifact> {
        let steps = self.steps(&env);
        tracing::info!(
            vm = %self.config.vm_name,
            source = %self.config.source_path,
            "Starting bundle build"
        );
        run_pipeline(steps, cancel, &env, &self.config.output).await
    }
}
