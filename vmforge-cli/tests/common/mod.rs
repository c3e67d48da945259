#![allow(dead_code)]

use assert_cmd::Command;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;

/// Isolated working directory and a command that cannot see a real UTM.
pub struct TestContext {
    pub dir: TempDir,
}

impl TestContext {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("Failed to create temp dir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// `vmforge` running inside the temp dir with an empty search path, so
    /// `utmctl` and `osascript` are never found.
    pub fn new_cmd(&self) -> Command {
        let bin_path = env!("CARGO_BIN_EXE_vmforge");
        let mut cmd = Command::new(bin_path);
        cmd.timeout(Duration::from_secs(30));
        cmd.current_dir(self.path());
        cmd.env("PATH", self.path());
        cmd.env("VMFORGE_UTMCTL_DIR", self.path());
        cmd.env_remove("RUST_LOG");
        cmd
    }

    pub fn write_config(&self, name: &str, content: &str) -> PathBuf {
        let path = self.path().join(name);
        std::fs::write(&path, content).expect("Failed to write config");
        path
    }
}

pub const ISO_YAML: &str = "\
type: iso
build_name: ubuntu
iso_url: /isos/ubuntu.iso
iso_checksum: none
ssh_username: ubuntu
shutdown_command: sudo shutdown -h now
";
