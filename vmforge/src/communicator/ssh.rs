use std::path::PathBuf;

use vmforge_shared::errors::{ForgeError, ForgeResult};

use super::{Communicator, RemoteOutput};
use crate::util::{CommandOutput, run_command, run_with_stdin};

/// `ssh` exits with this code when the connection itself failed.
const SSH_CONNECTION_FAILURE: i32 = 255;

/// Communicator that shells out to the system OpenSSH client.
#[derive(Debug, Clone)]
pub struct SshCommunicator {
    ssh_path: PathBuf,
    host: String,
    port: u16,
    username: String,
    private_key_file: Option<PathBuf>,
}

impl SshCommunicator {
    pub fn new(host: impl Into<String>, port: u16, username: impl Into<String>) -> Self {
        Self {
            ssh_path: PathBuf::from("ssh"),
            host: host.into(),
            port,
            username: username.into(),
            private_key_file: None,
        }
    }

    pub fn with_private_key(mut self, key: Option<PathBuf>) -> Self {
        self.private_key_file = key;
        self
    }

    pub fn with_ssh_path(mut self, ssh_path: PathBuf) -> Self {
        self.ssh_path = ssh_path;
        self
    }

    fn args(&self, remote_command: &str) -> Vec<String> {
        let mut args: Vec<String> = [
            "-o",
            "BatchMode=yes",
            "-o",
            "StrictHostKeyChecking=no",
            "-o",
            "UserKnownHostsFile=/dev/null",
            "-o",
            "LogLevel=ERROR",
            "-o",
            "ConnectTimeout=10",
            "-p",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        args.push(self.port.to_string());

        if let Some(key) = &self.private_key_file {
            args.push("-i".into());
            args.push(key.display().to_string());
        }

        args.push(format!("{}@{}", self.username, self.host));
        args.push(remote_command.to_string());
        args
    }

    fn remote_output(&self, output: CommandOutput) -> ForgeResult<RemoteOutput> {
        let exit_code = output.code.unwrap_or(-1);
        if exit_code == SSH_CONNECTION_FAILURE {
            return Err(ForgeError::command("ssh", output.stderr));
        }
        Ok(RemoteOutput {
            exit_code,
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }
}

#[async_trait::async_trait]
impl Communicator for SshCommunicator {
    async fn start(&self, command: &str) -> ForgeResult<RemoteOutput> {
        tracing::debug!(host = %self.host, port = self.port, command, "Running remote command");
        let output = run_command(&self.ssh_path, &self.args(command)).await?;
        self.remote_output(output)
    }

    async fn upload(&self, path: &str, data: &[u8]) -> ForgeResult<()> {
        tracing::debug!(path, bytes = data.len(), "Uploading file to guest");
        let command = format!("cat > {}", shell_quote(path));
        let output = run_with_stdin(&self.ssh_path, &self.args(&command), data).await?;
        self.remote_output(output)?.check(&command).map(|_| ())
    }
}

/// Single-quote `s` for a POSIX shell.
fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}
