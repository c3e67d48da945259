//! vmforge - build orchestration for UTM virtual machine images.
//!
//! A build creates or imports a VM, attaches install media, forwards a
//! host port to the guest's SSH server, boots it, provisions it, shuts it
//! down and hands the result over as an [`Artifact`].
//!
//! The moving parts:
//!
//! - [`driver`]: controls UTM through `utmctl` and AppleScript
//! - [`pipeline`]: the step runner and the typed [`BuildState`]
//! - [`steps`]: every build step
//! - [`net`]: host port allocation
//! - [`shutdown`]: graceful or forced guest shutdown
//! - [`builder`]: the ISO and bundle builders and their configuration

pub mod artifact;
pub mod builder;
pub mod communicator;
pub mod driver;
pub mod net;
pub mod pipeline;
pub mod shutdown;
pub mod steps;
pub mod ui;
pub mod util;

pub use artifact::Artifact;
pub use builder::{BuildEnv, Builder, BundleBuilder, BundleConfig, IsoBuilder, IsoConfig};
pub use driver::{Driver, MockDriver, UtmDriver};
pub use pipeline::{BuildState, Runner, Step, StepAction};
pub use ui::{ConsoleUi, MockUi, Ui};
pub use vmforge_shared::{ForgeError, ForgeResult};
