//! Fixtures for vmforge integration tests.
//!
//! [`TestBuild`] owns a temp directory with fake install media and a fake
//! `.utm` bundle, plus the mock driver, ui and communicator a build runs
//! against.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tempfile::TempDir;
use vmforge::builder::BuildEnv;
use vmforge::communicator::{CommTarget, Communicator, MockCommunicator};
use vmforge::driver::MockDriver;
use vmforge::steps::CommunicatorFactory;
use vmforge::ui::MockUi;

/// sha256 of [`ISO_CONTENT`].
pub const ISO_SHA256: &str = "b4390c1f1fdb3b17686a1bfd2c28e736cc463dfaf37589b21323d256c74cbb7c";

/// Bytes written to the fake ISO.
pub const ISO_CONTENT: &[u8] = b"fake install media";

pub struct TestBuild {
    pub dir: TempDir,
    pub driver: Arc<MockDriver>,
    pub ui: Arc<MockUi>,
    pub comm: Arc<MockCommunicator>,
    /// Every target the communicator factory was called with.
    pub connections: Arc<Mutex<Vec<CommTarget>>>,
}

impl TestBuild {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("Failed to create temp dir"),
            driver: Arc::new(MockDriver::new()),
            ui: Arc::new(MockUi::new()),
            comm: Arc::new(MockCommunicator::new()),
            connections: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn output_dir(&self) -> PathBuf {
        self.path().join("output")
    }

    /// Write the fake ISO and return its path.
    pub fn iso(&self) -> PathBuf {
        let path = self.path().join("install.iso");
        std::fs::write(&path, ISO_CONTENT).expect("Failed to write ISO");
        path
    }

    /// Create a fake bundle directory `<name>.utm` and return its path.
    pub fn bundle(&self, name: &str) -> PathBuf {
        let path = self.path().join(format!("{name}.utm"));
        std::fs::create_dir_all(path.join("Data")).expect("Failed to create bundle");
        std::fs::write(path.join("config.plist"), b"<plist/>").expect("Failed to write plist");
        path
    }

    /// Write a placeholder private key so builds skip key generation.
    pub fn key(&self) -> PathBuf {
        let path = self.path().join("id_ed25519");
        std::fs::write(&path, b"PRIVATE KEY").expect("Failed to write key");
        path
    }

    /// Factory handing out the shared mock communicator.
    pub fn factory(&self) -> CommunicatorFactory {
        let comm = self.comm.clone();
        let connections = self.connections.clone();
        Arc::new(move |target| {
            connections.lock().push(target.clone());
            comm.clone() as Arc<dyn Communicator>
        })
    }

    /// Build environment wired to the mocks.
    pub fn env(&self) -> BuildEnv {
        BuildEnv::new(self.driver.clone(), self.ui.clone())
            .with_communicator_factory(self.factory())
    }

    /// Simulate the user exporting the bundle into the output directory.
    pub fn place_export(&self, file_name: &str) -> PathBuf {
        let out = self.output_dir();
        std::fs::create_dir_all(&out).expect("Failed to create output dir");
        let path = out.join(file_name);
        std::fs::create_dir_all(path.join("Data")).expect("Failed to create export");
        std::fs::write(path.join("config.plist"), b"<plist/>").expect("Failed to write plist");
        path
    }
}

impl Default for TestBuild {
    fn default() -> Self {
        Self::new()
    }
}
