use std::io::Read;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;
use vmforge_shared::errors::{ForgeError, ForgeResult};

use crate::pipeline::{BuildState, Step, StepAction};

/// Which state field the resolved source is written to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadTarget {
    Iso,
    Vm,
}

/// Resolves the first usable local source among `sources`.
///
/// Remote fetching is out of scope: a source is usable when it names an
/// existing path, optionally as a `file://` URL.
pub struct StepDownload {
    description: String,
    sources: Vec<String>,
    checksum: Option<String>,
    target: DownloadTarget,
}

impl StepDownload {
    pub fn new(
        description: impl Into<String>,
        sources: Vec<String>,
        checksum: Option<String>,
        target: DownloadTarget,
    ) -> Self {
        Self {
            description: description.into(),
            sources,
            checksum,
            target,
        }
    }

    async fn resolve(
        &self,
        cancel: &CancellationToken,
        state: &BuildState,
    ) -> ForgeResult<(String, PathBuf)> {
        let expected = parse_checksum(self.checksum.as_deref())?;
        let mut failures = Vec::new();

        for source in &self.sources {
            if cancel.is_cancelled() {
                return Err(ForgeError::Cancelled(format!(
                    "download of {} cancelled",
                    self.description
                )));
            }

            state.ui.say(&format!("Retrieving {}", self.description));
            state.ui.message(&format!("Trying {source}"));
            match resolve_source(source, expected.as_deref()).await {
                Ok(path) => return Ok((source.clone(), path)),
                Err(e) => {
                    tracing::debug!(source = %source, error = %e, "Source unusable");
                    state.ui.message(&format!("Error with {source}: {e}"));
                    failures.push(format!("{source}: {e}"));
                }
            }
        }

        if failures.is_empty() {
            failures.push("no sources configured".to_string());
        }
        Err(ForgeError::ResourceAcquisition(failures.join("; "))
            .context(format!("error downloading {}", self.description)))
    }
}

#[async_trait::async_trait]
impl Step for StepDownload {
    fn name(&self) -> &'static str {
        "download"
    }

    async fn run(&mut self, cancel: &CancellationToken, state: &mut BuildState) -> StepAction {
        let (source, path) = match self.resolve(cancel, state).await {
            Ok(found) => found,
            Err(e) => return state.fail(e),
        };

        tracing::info!(source = %source, path = %path.display(), "Resolved {}", self.description);
        match self.target {
            DownloadTarget::Iso => state.iso_path = Some(path),
            DownloadTarget::Vm => state.vm_path = Some(path),
        }
        state
            .generated_data
            .insert("SourceImageURL".to_string(), serde_json::Value::String(source));
        StepAction::Continue
    }
}

/// Accepts `sha256:<hex>`, a bare hex digest, or `none`/empty for no check.
fn parse_checksum(checksum: Option<&str>) -> ForgeResult<Option<String>> {
    let raw = match checksum.map(str::trim) {
        None | Some("") => return Ok(None),
        Some(c) if c.eq_ignore_ascii_case("none") => return Ok(None),
        Some(c) => c,
    };

    let digest = match raw.split_once(':') {
        Some((kind, digest)) if kind.eq_ignore_ascii_case("sha256") => digest,
        Some((kind, _)) => {
            return Err(ForgeError::Config(format!(
                "unsupported checksum type '{kind}', only sha256 is supported"
            )));
        }
        None => raw,
    };

    if digest.len() != 64 || hex::decode(digest).is_err() {
        return Err(ForgeError::Config(format!(
            "invalid sha256 checksum '{digest}'"
        )));
    }
    Ok(Some(digest.to_ascii_lowercase()))
}

async fn resolve_source(source: &str, expected: Option<&str>) -> ForgeResult<PathBuf> {
    let path = PathBuf::from(source.strip_prefix("file://").unwrap_or(source));
    let meta = tokio::fs::metadata(&path).await?;

    if let Some(expected) = expected
        && meta.is_file()
    {
        let actual = sha256_file(path.clone()).await?;
        if actual != expected {
            return Err(ForgeError::ResourceAcquisition(format!(
                "checksum mismatch for {}: expected {expected}, got {actual}",
                path.display()
            )));
        }
    }
    Ok(path)
}

async fn sha256_file(path: PathBuf) -> ForgeResult<String> {
    tokio::task::spawn_blocking(move || hash_file(&path))
        .await
        .map_err(|e| ForgeError::Internal(format!("checksum task failed: {e}")))?
}

fn hash_file(path: &Path) -> ForgeResult<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}
