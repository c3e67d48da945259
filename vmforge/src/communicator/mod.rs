//! Remote command channel into the guest.
//!
//! Used for provisioning, version upload and graceful shutdown. The SSH
//! protocol itself is delegated to the system `ssh` client.

mod keygen;
mod mock;
mod ssh;

use std::path::PathBuf;

use vmforge_shared::errors::{ForgeError, ForgeResult};

pub use keygen::{KeyPair, KeyType, generate_key_pair};
#[cfg(all(test, unix))]
pub(crate) use keygen::fake_keygen;
pub use mock::MockCommunicator;
pub use ssh::SshCommunicator;

/// Where and how to reach the guest once its port is known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommTarget {
    pub host: String,
    pub port: u16,
    /// Key from the config, or the temporary key created for this build.
    pub private_key_file: Option<PathBuf>,
}

/// Result of one remote command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl RemoteOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Turn a non-zero exit into an error naming `command`.
    pub fn check(self, command: &str) -> ForgeResult<Self> {
        if self.success() {
            Ok(self)
        } else {
            Err(ForgeError::command(
                command,
                format!("exit status {}: {}", self.exit_code, self.stderr),
            ))
        }
    }
}

#[async_trait::async_trait]
pub trait Communicator: Send + Sync {
    /// Run `command` through the guest's shell.
    async fn start(&self, command: &str) -> ForgeResult<RemoteOutput>;

    /// Write `data` to `path` on the guest, replacing any existing file.
    async fn upload(&self, path: &str, data: &[u8]) -> ForgeResult<()>;
}
