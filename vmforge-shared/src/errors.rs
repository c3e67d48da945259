//! Error types for the build orchestration engine.
//!
//! Errors are categorized by where they originate:
//! - [`ForgeError::Config`]: invalid or missing build parameters (user-fixable)
//! - [`ForgeError::ControlSurfaceUnavailable`]: `utmctl`/`osascript` missing
//! - [`ForgeError::Command`]: one automation invocation exited non-zero
//! - [`ForgeError::Timeout`] / [`ForgeError::Cancelled`]: build aborted
//! - [`ForgeError::ResourceAcquisition`]: no port, unresolvable media, no source
//!
//! Steps wrap low-level errors with [`ForgeError::context`] so the message a
//! user sees names the operation that failed:
//!
//! ```
//! use vmforge_shared::ForgeError;
//!
//! let err = ForgeError::command("utmctl", "Virtual machine not found.")
//!     .context("error deleting VM");
//! assert_eq!(
//!     err.to_string(),
//!     "error deleting VM: utmctl error: Virtual machine not found."
//! );
//! ```

use std::io;
use thiserror::Error;

/// Result alias used across the workspace.
pub type ForgeResult<T> = Result<T, ForgeError>;

#[derive(Debug, Error)]
pub enum ForgeError {
    /// Invalid or missing build parameters, detected before any step runs.
    #[error("configuration error: {0}")]
    Config(String),

    /// The automation binaries cannot be located or fail preflight.
    #[error("control surface unavailable: {0}")]
    ControlSurfaceUnavailable(String),

    /// An automation invocation exited non-zero.
    #[error("{program} error: {stderr}")]
    Command { program: String, stderr: String },

    /// A polling loop exceeded its deadline.
    #[error("timeout: {0}")]
    Timeout(String),

    /// The build was cancelled or halted without a more specific error.
    #[error("{0}")]
    Cancelled(String),

    /// A host resource (port, media path, source bundle) could not be acquired.
    #[error("resource acquisition failed: {0}")]
    ResourceAcquisition(String),

    #[error("io: {0}")]
    Io(#[from] io::Error),

    /// A prerequisite step did not run, or similar programming error.
    #[error("internal: {0}")]
    Internal(String),

    /// An error annotated with the operation that produced it.
    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<ForgeError>,
    },
}

impl ForgeError {
    /// Create a command error from a program name and its captured stderr.
    pub fn command(program: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self::Command {
            program: program.into(),
            stderr: stderr.into(),
        }
    }

    /// Wrap this error with the operation that failed.
    pub fn context(self, context: impl Into<String>) -> Self {
        Self::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// The innermost error, skipping any [`ForgeError::Context`] layers.
    pub fn root(&self) -> &ForgeError {
        match self {
            Self::Context { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self.root(), Self::Timeout(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.root(), Self::Cancelled(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_display_chains() {
        let err = ForgeError::Timeout("timeout waiting for VM to shut down".into())
            .context("error shutting down VM");
        assert_eq!(
            err.to_string(),
            "error shutting down VM: timeout: timeout waiting for VM to shut down"
        );
    }

    #[test]
    fn test_root_skips_context_layers() {
        let err = ForgeError::ResourceAcquisition("no free port".into())
            .context("inner")
            .context("outer");
        assert!(matches!(err.root(), ForgeError::ResourceAcquisition(_)));
        assert!(!err.is_timeout());
    }

    #[test]
    fn test_kind_predicates() {
        assert!(ForgeError::Cancelled("build was cancelled".into()).is_cancelled());
        assert!(
            ForgeError::Timeout("x".into())
                .context("error shutting down VM")
                .is_timeout()
        );
    }

    #[test]
    fn test_io_conversion() {
        let err: ForgeError = io::Error::new(io::ErrorKind::NotFound, "gone").into();
        assert!(matches!(err, ForgeError::Io(_)));
        assert_eq!(err.to_string(), "io: gone");
    }
}
