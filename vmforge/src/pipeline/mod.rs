//! Step pipeline.
//!
//! ## Architecture
//!
//! A build is a fixed list of [`Step`]s executed by [`Runner`]:
//!
//! ```text
//! run(1) → run(2) → ... → run(k)   (stops on Halt, error or cancellation)
//!                           │
//! cleanup(k) → ... → cleanup(1)    (always, reverse order)
//! ```
//!
//! Steps share one [`BuildState`]. Each step reads what earlier steps wrote
//! and writes its own outputs; the runner only looks at the error, halted
//! and cancelled markers.

mod runner;
mod state;

use tokio_util::sync::CancellationToken;
use vmforge_shared::errors::ForgeResult;

pub use runner::Runner;
pub use state::BuildState;

/// What the runner should do after a step's `run`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepAction {
    Continue,
    Halt,
}

/// One unit of build work.
///
/// `run` is called at most once. `cleanup` is called exactly once after
/// `run` returned, whatever the outcome, and may use state the step kept
/// from its own `run`.
#[async_trait::async_trait]
pub trait Step: Send {
    /// Name used in logs.
    fn name(&self) -> &'static str;

    async fn run(&mut self, cancel: &CancellationToken, state: &mut BuildState) -> StepAction;

    /// Release what `run` acquired. Errors are reported, never escalated.
    async fn cleanup(&mut self, _state: &mut BuildState) -> ForgeResult<()> {
        Ok(())
    }
}
