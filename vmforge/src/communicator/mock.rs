use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;
use vmforge_shared::errors::{ForgeError, ForgeResult};

use super::{Communicator, RemoteOutput};

#[derive(Debug, Default)]
struct MockCommState {
    commands: Vec<String>,
    uploads: Vec<(String, Vec<u8>)>,
    responses: HashMap<String, RemoteOutput>,
    start_errs: VecDeque<String>,
}

/// Recording communicator for tests.
///
/// Commands succeed with empty output unless a response was registered with
/// [`MockCommunicator::respond`]. Queued connection errors fail the next
/// `start` calls one by one.
#[derive(Debug, Default)]
pub struct MockCommunicator {
    state: Mutex<MockCommState>,
}

impl MockCommunicator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, command: impl Into<String>, output: RemoteOutput) {
        self.state.lock().responses.insert(command.into(), output);
    }

    /// Make the next `start` call fail as if the guest were unreachable.
    pub fn fail_next(&self, msg: impl Into<String>) {
        self.state.lock().start_errs.push_back(msg.into());
    }

    pub fn commands(&self) -> Vec<String> {
        self.state.lock().commands.clone()
    }

    pub fn uploads(&self) -> Vec<(String, Vec<u8>)> {
        self.state.lock().uploads.clone()
    }
}

#[async_trait::async_trait]
impl Communicator for MockCommunicator {
    async fn start(&self, command: &str) -> ForgeResult<RemoteOutput> {
        let mut state = self.state.lock();
        state.commands.push(command.to_string());
        if let Some(msg) = state.start_errs.pop_front() {
            return Err(ForgeError::command("ssh", msg));
        }
        Ok(state.responses.get(command).cloned().unwrap_or_default())
    }

    async fn upload(&self, path: &str, data: &[u8]) -> ForgeResult<()> {
        self.state
            .lock()
            .uploads
            .push((path.to_string(), data.to_vec()));
        Ok(())
    }
}
