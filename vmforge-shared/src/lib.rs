//! vmforge shared - error taxonomy and constants
//!
//! Used by both the orchestration engine (`vmforge`) and the command-line
//! front end (`vmforge-cli`).

pub mod constants;
pub mod errors;

pub use errors::{ForgeError, ForgeResult};
