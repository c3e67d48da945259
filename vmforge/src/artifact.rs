//! Build output descriptor.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use vmforge_shared::constants::BUILDER_ID;
use vmforge_shared::errors::{ForgeError, ForgeResult};
use walkdir::WalkDir;

/// Files produced by one successful build.
#[derive(Debug, Clone)]
pub struct Artifact {
    id: String,
    dir: PathBuf,
    files: Vec<PathBuf>,
    state: BTreeMap<String, serde_json::Value>,
}

impl Artifact {
    /// Collect every non-directory entry below `dir`.
    pub fn from_dir(
        id: impl Into<String>,
        dir: impl Into<PathBuf>,
        state: BTreeMap<String, serde_json::Value>,
    ) -> ForgeResult<Self> {
        let dir = dir.into();
        let mut files = Vec::new();

        for entry in WalkDir::new(&dir).follow_links(false).sort_by_file_name() {
            let entry = entry.map_err(|e| {
                ForgeError::Io(std::io::Error::other(format!(
                    "failed to walk directory {}: {e}",
                    dir.display()
                )))
            })?;
            if !entry.file_type().is_dir() {
                files.push(entry.into_path());
            }
        }

        Ok(Self {
            id: id.into(),
            dir,
            files,
            state,
        })
    }

    pub fn builder_id(&self) -> &'static str {
        BUILDER_ID
    }

    /// The VM name.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    pub fn state(&self, name: &str) -> Option<&serde_json::Value> {
        self.state.get(name)
    }

    /// Remove the output directory. Already gone is fine.
    pub fn destroy(&self) -> ForgeResult<()> {
        match std::fs::remove_dir_all(&self.dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

impl fmt::Display for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VM files in directory: {}", self.dir.display())
    }
}
