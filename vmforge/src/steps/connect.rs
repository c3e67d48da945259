use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use vmforge_shared::errors::{ForgeError, ForgeResult};

use crate::builder::config::CommType;
use crate::communicator::{CommTarget, Communicator};
use crate::pipeline::{BuildState, Step, StepAction};

/// Builds a communicator for a reachable guest.
pub type CommunicatorFactory = Arc<dyn Fn(&CommTarget) -> Arc<dyn Communicator> + Send + Sync>;

/// Waits until the guest's command channel answers.
pub struct StepConnect {
    comm_type: CommType,
    host: String,
    factory: CommunicatorFactory,
    timeout: Duration,
    interval: Duration,
}

impl StepConnect {
    pub fn new(
        comm_type: CommType,
        host: impl Into<String>,
        factory: CommunicatorFactory,
        timeout: Duration,
        interval: Duration,
    ) -> Self {
        Self {
            comm_type,
            host: host.into(),
            factory,
            timeout,
            interval,
        }
    }

    async fn wait_for(
        &self,
        cancel: &CancellationToken,
        comm: &dyn Communicator,
        target: &CommTarget,
    ) -> ForgeResult<()> {
        let deadline = Instant::now() + self.timeout;
        let mut attempt = 0u32;

        loop {
            if cancel.is_cancelled() {
                return Err(ForgeError::Cancelled("waiting for SSH cancelled".into()));
            }

            attempt += 1;
            match comm.start("true").await {
                Ok(output) if output.success() => {
                    tracing::info!(
                        host = %target.host,
                        port = target.port,
                        attempt,
                        "Connected to guest"
                    );
                    return Ok(());
                }
                Ok(output) => {
                    tracing::debug!(attempt, exit_code = output.exit_code, "Handshake command failed");
                }
                Err(e) => {
                    tracing::debug!(attempt, error = %e, "Guest not reachable yet");
                }
            }

            if Instant::now() + self.interval > deadline {
                return Err(ForgeError::Timeout("timeout waiting for SSH".into()));
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(ForgeError::Cancelled("waiting for SSH cancelled".into()));
                }
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
    }
}

#[async_trait::async_trait]
impl Step for StepConnect {
    fn name(&self) -> &'static str {
        "connect"
    }

    async fn run(&mut self, cancel: &CancellationToken, state: &mut BuildState) -> StepAction {
        if self.comm_type == CommType::None {
            return StepAction::Continue;
        }

        let Some(port) = state.comm_host_port else {
            return state.fail(ForgeError::Internal(
                "comm_host_port not set, port forwarding step must run first".into(),
            ));
        };

        let target = CommTarget {
            host: self.host.clone(),
            port,
            private_key_file: state.ssh_private_key_file.clone(),
        };

        state.ui.say("Waiting for SSH to become available...");
        let comm = (self.factory)(&target);
        match self.wait_for(cancel, comm.as_ref(), &target).await {
            Ok(()) => {
                state.ui.say("Connected to SSH!");
                state.communicator = Some(comm);
                StepAction::Continue
            }
            Err(e) => state.fail(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::communicator::{MockCommunicator, RemoteOutput};
    use crate::testing::mock_state;
    use parking_lot::Mutex;

    fn factory(
        comm: Arc<MockCommunicator>,
        seen: Arc<Mutex<Vec<CommTarget>>>,
    ) -> CommunicatorFactory {
        Arc::new(move |target| {
            seen.lock().push(target.clone());
            comm.clone() as Arc<dyn Communicator>
        })
    }

    fn step(comm_type: CommType, f: CommunicatorFactory, timeout_ms: u64) -> StepConnect {
        StepConnect::new(
            comm_type,
            "127.0.0.1",
            f,
            Duration::from_millis(timeout_ms),
            Duration::from_millis(10),
        )
    }

    #[tokio::test]
    async fn test_connects_after_retries() {
        let comm = Arc::new(MockCommunicator::new());
        comm.fail_next("connection refused");
        comm.fail_next("connection refused");
        let seen = Arc::new(Mutex::new(Vec::new()));

        let (mut state, _driver, _ui) = mock_state();
        state.comm_host_port = Some(2222);

        let mut step = step(CommType::Ssh, factory(comm.clone(), seen.clone()), 5_000);
        assert_eq!(
            step.run(&CancellationToken::new(), &mut state).await,
            StepAction::Continue
        );
        assert!(state.communicator.is_some());
        assert_eq!(
            *seen.lock(),
            vec![CommTarget {
                host: "127.0.0.1".into(),
                port: 2222,
                private_key_file: None,
            }]
        );
        assert_eq!(comm.commands(), vec!["true", "true", "true"]);
    }

    #[tokio::test]
    async fn test_times_out() {
        let comm = Arc::new(MockCommunicator::new());
        comm.respond(
            "true",
            RemoteOutput {
                exit_code: 255,
                ..Default::default()
            },
        );
        let (mut state, _driver, _ui) = mock_state();
        state.comm_host_port = Some(2222);

        let mut step = step(CommType::Ssh, factory(comm, Default::default()), 50);
        assert_eq!(
            step.run(&CancellationToken::new(), &mut state).await,
            StepAction::Halt
        );
        assert!(state.error().unwrap().is_timeout());
        assert!(state.communicator.is_none());
    }

    #[tokio::test]
    async fn test_cancelled() {
        let comm = Arc::new(MockCommunicator::new());
        let (mut state, _driver, _ui) = mock_state();
        state.comm_host_port = Some(2222);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let mut step = step(CommType::Ssh, factory(comm.clone(), Default::default()), 5_000);
        assert_eq!(step.run(&cancel, &mut state).await, StepAction::Halt);
        assert!(state.error().unwrap().is_cancelled());
        assert!(comm.commands().is_empty());
    }

    #[tokio::test]
    async fn test_no_communicator_skips() {
        let comm = Arc::new(MockCommunicator::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (mut state, _driver, _ui) = mock_state();

        let mut step = step(CommType::None, factory(comm, seen.clone()), 50);
        assert_eq!(
            step.run(&CancellationToken::new(), &mut state).await,
            StepAction::Continue
        );
        assert!(seen.lock().is_empty());
        assert!(state.communicator.is_none());
    }

    #[tokio::test]
    async fn test_target_uses_configured_host_and_key() {
        let comm = Arc::new(MockCommunicator::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (mut state, _driver, _ui) = mock_state();
        // Without a NAT rule the guest port is used as is.
        state.comm_host_port = Some(22);
        state.ssh_private_key_file = Some("/tmp/vmforge-ssh/id_ed25519".into());

        let mut step = StepConnect::new(
            CommType::Ssh,
            "192.168.64.5",
            factory(comm, seen.clone()),
            Duration::from_secs(5),
            Duration::from_millis(10),
        );
        assert_eq!(
            step.run(&CancellationToken::new(), &mut state).await,
            StepAction::Continue
        );

        let target = seen.lock()[0].clone();
        assert_eq!(target.host, "192.168.64.5");
        assert_eq!(target.port, 22);
        assert_eq!(
            target.private_key_file.as_deref(),
            Some(std::path::Path::new("/tmp/vmforge-ssh/id_ed25519"))
        );
    }
}
