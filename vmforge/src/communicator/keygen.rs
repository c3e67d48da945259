//! Temporary SSH key pairs, created with the system `ssh-keygen`.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tempfile::TempDir;
use vmforge_shared::errors::ForgeResult;

use crate::util::run_command;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyType {
    #[default]
    Ed25519,
    Ecdsa,
    Rsa,
}

impl KeyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyType::Ed25519 => "ed25519",
            KeyType::Ecdsa => "ecdsa",
            KeyType::Rsa => "rsa",
        }
    }
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A key pair living in its own temp directory.
///
/// The files are removed when the pair is dropped.
#[derive(Debug)]
pub struct KeyPair {
    dir: TempDir,
    private_key: PathBuf,
    public_key: String,
}

impl KeyPair {
    pub fn private_key_file(&self) -> &Path {
        &self.private_key
    }

    /// OpenSSH `authorized_keys` line, without trailing newline.
    pub fn public_key(&self) -> &str {
        &self.public_key
    }

    pub fn dir(&self) -> &Path {
        self.dir.path()
    }
}

/// Run `keygen` to create an unencrypted key pair tagged with `comment`.
pub async fn generate_key_pair(
    keygen: &Path,
    key_type: KeyType,
    comment: &str,
) -> ForgeResult<KeyPair> {
    let dir = tempfile::Builder::new().prefix("vmforge-ssh-").tempdir()?;
    let private_key = dir.path().join(format!("id_{key_type}"));

    let mut args: Vec<String> = vec!["-q".into(), "-t".into(), key_type.to_string()];
    if key_type == KeyType::Rsa {
        args.extend(["-b".into(), "4096".into()]);
    }
    args.extend([
        "-N".into(),
        String::new(),
        "-C".into(),
        comment.to_string(),
        "-f".into(),
        private_key.display().to_string(),
    ]);

    run_command(keygen, &args).await?.into_result("ssh-keygen")?;

    let public_key = tokio::fs::read_to_string(private_key.with_extension("pub"))
        .await?
        .trim()
        .to_string();
    tracing::debug!(key_type = %key_type, dir = %dir.path().display(), "Generated SSH key pair");

    Ok(KeyPair {
        dir,
        private_key,
        public_key,
    })
}

/// Test double writing fixed key material wherever `-f` points.
#[cfg(all(test, unix))]
pub(crate) fn fake_keygen(dir: &Path) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join("ssh-keygen");
    let script = r#"#!/bin/sh
while [ $# -gt 0 ]; do
  if [ "$1" = "-f" ]; then out="$2"; fi
  shift
done
echo "PRIVATE KEY" > "$out"
echo "ssh-ed25519 AAAAC3Nza/C1lZDI1NTE5 vmforge" > "$out.pub"
"#;
    std::fs::write(&path, script).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}
