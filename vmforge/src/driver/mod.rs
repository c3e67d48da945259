//! Hypervisor control surface.
//!
//! [`Driver`] exposes VM lifecycle primitives keyed by VM name. Steps only
//! ever see `Arc<dyn Driver>`, so the real [`UtmDriver`] and the recording
//! [`MockDriver`] are interchangeable.

mod mock;
pub mod scripts;
mod utm;

use std::path::Path;

use vmforge_shared::errors::ForgeResult;

pub use mock::{MockDriver, MockDriverState};
pub use utm::{UtmDriver, parse_version};

/// Operations a build needs from the hypervisor.
///
/// Implementations must be safe to query from a polling loop while another
/// task mutates their running state, hence `Send + Sync` and `&self`
/// receivers throughout.
#[async_trait::async_trait]
pub trait Driver: Send + Sync {
    /// Remove the VM from the hypervisor registry. Not idempotent.
    async fn delete(&self, name: &str) -> ForgeResult<()>;

    /// Register the bundle at `path`.
    ///
    /// The control surface cannot rename on import, so the bundle's internal
    /// name must already equal `name`.
    async fn import(&self, name: &str, path: &Path) -> ForgeResult<()>;

    /// Whether the VM should still be considered running.
    ///
    /// `started`, `stopping` and `paused` all report true. Other transitional
    /// states are not recognized; only use this to decide whether to keep
    /// waiting for shutdown.
    async fn is_running(&self, name: &str) -> ForgeResult<bool>;

    async fn start(&self, name: &str) -> ForgeResult<()>;

    /// Request a forced power-off. Returns before the VM has stopped.
    async fn stop(&self, name: &str) -> ForgeResult<()>;

    /// Run `utmctl` with `args`, returning trimmed stdout.
    async fn utmctl(&self, args: &[&str]) -> ForgeResult<String>;

    /// Run an embedded AppleScript (see [`scripts`]) with `args`.
    async fn execute_script(&self, script: &str, args: &[&str]) -> ForgeResult<String>;

    /// Preflight check that the control surface is usable.
    async fn verify(&self) -> ForgeResult<()>;

    /// Installed UTM version as `major.minor.patch`.
    async fn version(&self) -> ForgeResult<String>;
}
