use tokio_util::sync::CancellationToken;
use vmforge_shared::errors::ForgeResult;

use super::deregister_vm;
use crate::builder::config::VmBackend;
use crate::driver::scripts;
use crate::pipeline::{BuildState, Step, StepAction};

/// Creates and sizes a fresh VM for the ISO builder.
pub struct StepCreateVm {
    name: String,
    backend: VmBackend,
    arch: String,
    cpus: u32,
    memory_mib: u64,
    keep_registered: bool,
    created: bool,
}

impl StepCreateVm {
    pub fn new(
        name: impl Into<String>,
        backend: VmBackend,
        arch: impl Into<String>,
        cpus: u32,
        memory_mib: u64,
        keep_registered: bool,
    ) -> Self {
        Self {
            name: name.into(),
            backend,
            arch: arch.into(),
            cpus,
            memory_mib,
            keep_registered,
            created: false,
        }
    }

    async fn create(&mut self, state: &BuildState) -> ForgeResult<()> {
        let driver = &state.driver;
        let output = driver
            .execute_script(
                scripts::CREATE_VM,
                &[
                    "--name",
                    &self.name,
                    "--backend",
                    self.backend.utm_code(),
                    "--arch",
                    &self.arch,
                ],
            )
            .await?;
        // From here on the VM exists and must be deregistered on failure.
        self.created = true;
        tracing::info!(vm = %self.name, id = %output, "VM created");

        let cpus = self.cpus.to_string();
        let memory = self.memory_mib.to_string();
        driver
            .execute_script(
                scripts::CUSTOMIZE_VM,
                &[&self.name, "--cpus", &cpus, "--memory", &memory],
            )
            .await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl Step for StepCreateVm {
    fn name(&self) -> &'static str {
        "create_vm"
    }

    async fn run(&mut self, _cancel: &CancellationToken, state: &mut BuildState) -> StepAction {
        state.ui.say("Creating virtual machine...");
        let result = self.create(state).await;
        if self.created {
            state.vm_name = Some(self.name.clone());
        }
        match result {
            Ok(()) => StepAction::Continue,
            Err(e) => state.fail(e.context("error creating VM")),
        }
    }

    async fn cleanup(&mut self, state: &mut BuildState) -> ForgeResult<()> {
        if !self.created {
            return Ok(());
        }
        deregister_vm(&self.name, self.keep_registered, state).await
    }
}
