use std::path::{Path, PathBuf};

use tokio_util::sync::CancellationToken;
use vmforge_shared::constants::binaries;
use vmforge_shared::errors::{ForgeError, ForgeResult};

use crate::builder::config::CommType;
use crate::communicator::{KeyPair, KeyType, generate_key_pair};
use crate::pipeline::{BuildState, Step, StepAction};

/// Picks the private key the communicator logs in with.
///
/// A configured key is only checked for readability. Otherwise a temporary
/// pair is generated and its public half published for the guest. The
/// temporary files live until cleanup.
pub struct StepSshKeyPair {
    comm_type: CommType,
    private_key_file: Option<PathBuf>,
    key_type: KeyType,
    comment: String,
    debug_key_path: Option<PathBuf>,
    keygen: PathBuf,
    pair: Option<KeyPair>,
}

impl StepSshKeyPair {
    pub fn new(
        comm_type: CommType,
        private_key_file: Option<PathBuf>,
        key_type: KeyType,
        comment: impl Into<String>,
    ) -> Self {
        Self {
            comm_type,
            private_key_file,
            key_type,
            comment: comment.into(),
            debug_key_path: None,
            keygen: PathBuf::from(binaries::SSH_KEYGEN),
            pair: None,
        }
    }

    /// Also write the temporary private key here, for debugging the guest.
    pub fn with_debug_key_path(mut self, path: Option<PathBuf>) -> Self {
        self.debug_key_path = path;
        self
    }

    pub fn with_keygen_path(mut self, keygen: PathBuf) -> Self {
        self.keygen = keygen;
        self
    }

    async fn use_existing(&self, path: &Path, state: &mut BuildState) -> ForgeResult<()> {
        state.ui.say("Using existing SSH private key");
        tokio::fs::metadata(path)
            .await
            .map_err(|e| ForgeError::Io(e).context("error reading SSH private key file"))?;
        state.ssh_private_key_file = Some(path.to_path_buf());
        Ok(())
    }

    async fn create_temporary(&mut self, state: &mut BuildState) -> ForgeResult<()> {
        state.ui.say("Creating temporary SSH key for instance...");
        let pair = generate_key_pair(&self.keygen, self.key_type, &self.comment)
            .await
            .map_err(|e| e.context("error creating temporary SSH key"))?;

        if let Some(path) = &self.debug_key_path {
            state
                .ui
                .message(&format!("Saving key for debug purposes: {}", path.display()));
            save_debug_key(pair.private_key_file(), path)
                .await
                .map_err(|e| e.context("error saving debug key"))?;
        }

        tracing::info!(
            key_type = %self.key_type,
            dir = %pair.dir().display(),
            "Created temporary SSH key pair"
        );
        state.ssh_private_key_file = Some(pair.private_key_file().to_path_buf());
        state.ssh_public_key = Some(pair.public_key().to_string());
        self.pair = Some(pair);
        Ok(())
    }
}

async fn save_debug_key(from: &Path, to: &Path) -> ForgeResult<()> {
    tokio::fs::copy(from, to).await?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(to, std::fs::Permissions::from_mode(0o600)).await?;
    }
    Ok(())
}

#[async_trait::async_trait]
impl Step for StepSshKeyPair {
    fn name(&self) -> &'static str {
        "ssh_key_pair"
    }

    async fn run(&mut self, _cancel: &CancellationToken, state: &mut BuildState) -> StepAction {
        if self.comm_type == CommType::None {
            return StepAction::Continue;
        }

        let result = match self.private_key_file.clone() {
            Some(path) => self.use_existing(&path, state).await,
            None => self.create_temporary(state).await,
        };
        match result {
            Ok(()) => StepAction::Continue,
            Err(e) => state.fail(e),
        }
    }

    async fn cleanup(&mut self, _state: &mut BuildState) -> ForgeResult<()> {
        // Dropping the pair removes its directory.
        if let Some(pair) = self.pair.take() {
            tracing::debug!(dir = %pair.dir().display(), "Removing temporary SSH key pair");
        }
        Ok(())
    }
}
