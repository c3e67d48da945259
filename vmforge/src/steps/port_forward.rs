use tokio_util::sync::CancellationToken;
use vmforge_shared::errors::ForgeResult;

use crate::builder::config::CommType;
use crate::driver::scripts;
use crate::net::{PortAllocator, PortLease};
use crate::pipeline::{BuildState, Step, StepAction};

/// NIC index of the emulated VLAN interface the forward is added to.
const NAT_INTERFACE_INDEX: &str = "1";

/// Forwards a host port to the guest's communicator port.
pub struct StepPortForwarding {
    comm_type: CommType,
    guest_port: u16,
    allocator: PortAllocator,
    skip_nat_mapping: bool,
    lease: Option<PortLease>,
}

impl StepPortForwarding {
    pub fn new(
        comm_type: CommType,
        guest_port: u16,
        allocator: PortAllocator,
        skip_nat_mapping: bool,
    ) -> Self {
        Self {
            comm_type,
            guest_port,
            allocator,
            skip_nat_mapping,
            lease: None,
        }
    }

    async fn forward(
        &mut self,
        cancel: &CancellationToken,
        state: &BuildState,
    ) -> ForgeResult<u16> {
        let vm_name = state.require_vm_name()?;

        state.ui.say("Looking for available communicator port...");
        let mut lease = self.allocator.allocate(cancel).await?;
        // UTM binds the host side itself.
        lease.release();
        let host_port = lease.port();
        self.lease = Some(lease);

        state.ui.message(&format!(
            "Creating forwarding rule for communicator (guest port {}, host port {host_port})",
            self.guest_port
        ));
        let host = host_port.to_string();
        let guest = self.guest_port.to_string();
        state
            .driver
            .execute_script(
                scripts::ADD_PORT_FORWARD,
                &[
                    vm_name,
                    "--index",
                    NAT_INTERFACE_INDEX,
                    "tcp",
                    "127.0.0.1",
                    &host,
                    &guest,
                ],
            )
            .await
            .map_err(|e| e.context("error creating port forwarding rule"))?;

        Ok(host_port)
    }
}

#[async_trait::async_trait]
impl Step for StepPortForwarding {
    fn name(&self) -> &'static str {
        "port_forwarding"
    }

    async fn run(&mut self, cancel: &CancellationToken, state: &mut BuildState) -> StepAction {
        if self.comm_type == CommType::None {
            tracing::debug!("No communicator, skipping port forwarding");
            return StepAction::Continue;
        }

        if self.skip_nat_mapping {
            tracing::info!(port = self.guest_port, "Skipping NAT port forwarding");
            state.comm_host_port = Some(self.guest_port);
            return StepAction::Continue;
        }

        match self.forward(cancel, state).await {
            Ok(port) => {
                tracing::info!(host_port = port, guest_port = self.guest_port, "Port forward added");
                state.comm_host_port = Some(port);
                StepAction::Continue
            }
            Err(e) => state.fail(e),
        }
    }

    async fn cleanup(&mut self, _state: &mut BuildState) -> ForgeResult<()> {
        if let Some(lease) = self.lease.as_mut() {
            lease.close();
        }
        Ok(())
    }
}
