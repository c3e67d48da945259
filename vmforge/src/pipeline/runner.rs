use std::time::Instant;

use tokio_util::sync::CancellationToken;

use super::{BuildState, Step, StepAction};

/// Sequences steps and enforces halt, cancel and cleanup ordering.
pub struct Runner {
    steps: Vec<Box<dyn Step>>,
    debug: bool,
}

impl Runner {
    pub fn new(steps: Vec<Box<dyn Step>>) -> Self {
        Self {
            steps,
            debug: false,
        }
    }

    /// Ask for confirmation before every step. Any answer other than
    /// empty, `y` or `Y` halts the build.
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Run the steps in order, then clean up every step that ran in
    /// reverse order.
    ///
    /// Outcome is left in `state`: the error (if any), plus the halted and
    /// cancelled markers.
    pub async fn run(mut self, cancel: &CancellationToken, state: &mut BuildState) {
        let build_start = Instant::now();
        let mut executed = 0usize;

        for step in self.steps.iter_mut() {
            let name = step.name();

            if cancel.is_cancelled() {
                tracing::info!(step = name, "Build cancelled before step");
                state.mark_cancelled();
                break;
            }

            if self.debug && !confirm_step(name, cancel, state).await {
                state.mark_halted();
                break;
            }

            tracing::info!(step = name, "Running step");
            let step_start = Instant::now();
            executed += 1;
            let action = step.run(cancel, state).await;
            tracing::info!(
                step = name,
                ?action,
                duration_ms = step_start.elapsed().as_millis() as u64,
                "Step finished"
            );

            let mut stop = false;
            if cancel.is_cancelled() {
                state.mark_cancelled();
                stop = true;
            }
            if action == StepAction::Halt || state.error().is_some() {
                state.mark_halted();
                stop = true;
            }
            if stop {
                break;
            }
        }

        for step in self.steps[..executed].iter_mut().rev() {
            let name = step.name();
            tracing::debug!(step = name, "Cleaning up step");
            if let Err(e) = step.cleanup(state).await {
                tracing::warn!(step = name, error = %e, "Step cleanup failed");
                state.ui.error(&format!("Error cleaning up {}: {}", name, e));
            }
        }

        tracing::info!(
            steps_run = executed,
            cancelled = state.is_cancelled(),
            halted = state.is_halted(),
            duration_ms = build_start.elapsed().as_millis() as u64,
            "Pipeline finished"
        );
    }
}

/// Debug pause before a step. Returns false when the build should halt.
async fn confirm_step(name: &str, cancel: &CancellationToken, state: &mut BuildState) -> bool {
    let query = format!("Pausing before step {}. Continue? [Y/n]:", name);
    let ui = state.ui.clone();
    let answer = tokio::select! {
        answer = ui.ask(&query) => answer,
        _ = cancel.cancelled() => {
            state.mark_cancelled();
            return false;
        }
    };
    match answer {
        Ok(answer) => {
            let proceed = matches!(answer.trim(), "" | "y" | "Y");
            if !proceed {
                state.ui.say("Build halted from debug pause.");
            }
            proceed
        }
        Err(e) => {
            state.fail(e.context("error during debug pause"));
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::mock_state;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use vmforge_shared::errors::{ForgeError, ForgeResult};

    type Log = Arc<Mutex<Vec<String>>>;

    /// Step that records its calls and does what it is told.
    struct Scripted {
        name: &'static str,
        log: Log,
        action: StepAction,
        fail: bool,
        cleanup_err: bool,
        cancel_during_run: bool,
    }

    impl Scripted {
        fn new(name: &'static str, log: &Log) -> Self {
            Self {
                name,
                log: log.clone(),
                action: StepAction::Continue,
                fail: false,
                cleanup_err: false,
                cancel_during_run: false,
            }
        }
    }

    #[async_trait::async_trait]
    impl Step for Scripted {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn run(&mut self, cancel: &CancellationToken, state: &mut BuildState) -> StepAction {
            self.log.lock().push(format!("run:{}", self.name));
            if self.cancel_during_run {
                cancel.cancel();
            }
            if self.fail {
                return state.fail(ForgeError::Internal(format!("{} failed", self.name)));
            }
            self.action
        }

        async fn cleanup(&mut self, _state: &mut BuildState) -> ForgeResult<()> {
            self.log.lock().push(format!("cleanup:{}", self.name));
            if self.cleanup_err {
                return Err(ForgeError::Internal("cleanup boom".into()));
            }
            Ok(())
        }
    }

    fn entries(log: &Log) -> Vec<String> {
        log.lock().clone()
    }

    #[tokio::test]
    async fn test_all_continue_cleans_up_in_reverse() {
        let log = Log::default();
        let (mut state, _driver, _ui) = mock_state();
        let steps: Vec<Box<dyn Step>> = vec![
            Box::new(Scripted::new("a", &log)),
            Box::new(Scripted::new("b", &log)),
            Box::new(Scripted::new("c", &log)),
        ];

        Runner::new(steps)
            .run(&CancellationToken::new(), &mut state)
            .await;

        assert_eq!(
            entries(&log),
            vec!["run:a", "run:b", "run:c", "cleanup:c", "cleanup:b", "cleanup:a"]
        );
        assert!(!state.is_halted());
        assert!(!state.is_cancelled());
    }

    #[tokio::test]
    async fn test_halt_stops_forward_steps() {
        let log = Log::default();
        let (mut state, _driver, _ui) = mock_state();
        let mut b = Scripted::new("b", &log);
        b.action = StepAction::Halt;
        let steps: Vec<Box<dyn Step>> = vec![
            Box::new(Scripted::new("a", &log)),
            Box::new(b),
            Box::new(Scripted::new("c", &log)),
        ];

        Runner::new(steps)
            .run(&CancellationToken::new(), &mut state)
            .await;

        assert_eq!(
            entries(&log),
            vec!["run:a", "run:b", "cleanup:b", "cleanup:a"]
        );
        assert!(state.is_halted());
    }

    #[tokio::test]
    async fn test_error_without_halt_still_stops() {
        let log = Log::default();
        let (mut state, _driver, _ui) = mock_state();
        let mut a = Scripted::new("a", &log);
        a.fail = true;
        a.action = StepAction::Continue;
        let steps: Vec<Box<dyn Step>> =
            vec![Box::new(a), Box::new(Scripted::new("b", &log))];

        Runner::new(steps)
            .run(&CancellationToken::new(), &mut state)
            .await;

        assert_eq!(entries(&log), vec!["run:a", "cleanup:a"]);
        assert!(state.is_halted());
        assert_eq!(state.error().unwrap().to_string(), "internal: a failed");
    }

    #[tokio::test]
    async fn test_cancel_before_first_step_runs_nothing() {
        let log = Log::default();
        let (mut state, _driver, _ui) = mock_state();
        let cancel = CancellationToken::new();
        cancel.cancel();

        Runner::new(vec![Box::new(Scripted::new("a", &log))])
            .run(&cancel, &mut state)
            .await;

        assert!(entries(&log).is_empty());
        assert!(state.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancel_during_step() {
        let log = Log::default();
        let (mut state, _driver, _ui) = mock_state();
        let mut a = Scripted::new("a", &log);
        a.cancel_during_run = true;
        let steps: Vec<Box<dyn Step>> =
            vec![Box::new(a), Box::new(Scripted::new("b", &log))];

        Runner::new(steps)
            .run(&CancellationToken::new(), &mut state)
            .await;

        assert_eq!(entries(&log), vec!["run:a", "cleanup:a"]);
        assert!(state.is_cancelled());
        assert!(!state.is_halted());
    }

    #[tokio::test]
    async fn test_cleanup_error_is_reported_not_escalated() {
        let log = Log::default();
        let (mut state, _driver, ui) = mock_state();
        let mut a = Scripted::new("a", &log);
        a.cleanup_err = true;
        let mut b = Scripted::new("b", &log);
        b.fail = true;
        let steps: Vec<Box<dyn Step>> = vec![Box::new(a), Box::new(b)];

        Runner::new(steps)
            .run(&CancellationToken::new(), &mut state)
            .await;

        assert_eq!(
            entries(&log),
            vec!["run:a", "run:b", "cleanup:b", "cleanup:a"]
        );
        assert_eq!(state.error().unwrap().to_string(), "internal: b failed");
        assert!(
            ui.errors()
                .iter()
                .any(|e| e == "Error cleaning up a: internal: cleanup boom")
        );
    }

    #[tokio::test]
    async fn test_debug_pause_negative_answer_halts_before_step() {
        let log = Log::default();
        let (mut state, _driver, ui) = mock_state();
        ui.push_answer("y");
        ui.push_answer("n");
        let steps: Vec<Box<dyn Step>> = vec![
            Box::new(Scripted::new("a", &log)),
            Box::new(Scripted::new("b", &log)),
        ];

        Runner::new(steps)
            .with_debug(true)
            .run(&CancellationToken::new(), &mut state)
            .await;

        assert_eq!(entries(&log), vec!["run:a", "cleanup:a"]);
        assert!(state.is_halted());
        assert!(state.error().is_none());
        assert_eq!(ui.asked().len(), 2);
    }

    #[tokio::test]
    async fn test_debug_pause_empty_answer_continues() {
        let log = Log::default();
        let (mut state, _driver, ui) = mock_state();
        ui.push_answer("");

        Runner::new(vec![Box::new(Scripted::new("a", &log))])
            .with_debug(true)
            .run(&CancellationToken::new(), &mut state)
            .await;

        assert_eq!(entries(&log), vec!["run:a", "cleanup:a"]);
        assert!(!state.is_halted());
    }
}
