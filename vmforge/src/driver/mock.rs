//! In-memory recording driver for tests.

use std::path::{Path, PathBuf};

use parking_lot::{Mutex, MutexGuard};
use vmforge_shared::errors::{ForgeError, ForgeResult};

use super::Driver;

/// Everything the mock records and every canned answer it gives.
///
/// `*_errs` lists are consumed per call: the n-th call fails with the n-th
/// entry if there is one, and succeeds afterwards. An empty entry lets that
/// call succeed.
#[derive(Debug)]
pub struct MockDriverState {
    pub delete_calls: Vec<String>,
    pub delete_err: Option<String>,

    pub import_calls: Vec<(String, PathBuf)>,
    pub import_err: Option<String>,

    pub is_running_calls: usize,
    pub is_running_name: Option<String>,
    pub running: bool,
    pub is_running_err: Option<String>,

    pub start_calls: Vec<String>,
    pub start_err: Option<String>,

    pub stop_calls: Vec<String>,
    pub stop_err: Option<String>,

    pub utmctl_calls: Vec<Vec<String>>,
    pub utmctl_errs: Vec<String>,
    pub utmctl_result: String,

    /// Script name first, then its arguments.
    pub script_calls: Vec<Vec<String>>,
    pub script_errs: Vec<String>,
    pub script_result: String,

    pub verify_called: bool,
    pub verify_err: Option<String>,

    pub version_called: bool,
    pub version_result: String,
    pub version_err: Option<String>,
}

impl Default for MockDriverState {
    fn default() -> Self {
        Self {
            delete_calls: Vec::new(),
            delete_err: None,
            import_calls: Vec::new(),
            import_err: None,
            is_running_calls: 0,
            is_running_name: None,
            running: false,
            is_running_err: None,
            start_calls: Vec::new(),
            start_err: None,
            stop_calls: Vec::new(),
            stop_err: None,
            utmctl_calls: Vec::new(),
            utmctl_errs: Vec::new(),
            utmctl_result: String::new(),
            script_calls: Vec::new(),
            script_errs: Vec::new(),
            script_result: String::new(),
            verify_called: false,
            verify_err: None,
            version_called: false,
            version_result: "4.5.2".to_string(),
            version_err: None,
        }
    }
}

/// Test double for [`Driver`].
///
/// All state sits behind one mutex so a spawned task can flip `running`
/// while a shutdown poll loop reads it. `start` sets `running`, `stop`
/// clears it.
#[derive(Debug, Default)]
pub struct MockDriver {
    state: Mutex<MockDriverState>,
}

impl MockDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock and inspect or configure the recorded state.
    pub fn state(&self) -> MutexGuard<'_, MockDriverState> {
        self.state.lock()
    }

    pub fn set_running(&self, running: bool) {
        self.state.lock().running = running;
    }
}

fn mock_err(msg: &str) -> ForgeError {
    ForgeError::command("mock", msg)
}

fn check(err: &Option<String>) -> ForgeResult<()> {
    match err {
        Some(msg) => Err(mock_err(msg)),
        None => Ok(()),
    }
}

#[async_trait::async_trait]
impl Driver for MockDriver {
    async fn delete(&self, name: &str) -> ForgeResult<()> {
        let mut state = self.state.lock();
        state.delete_calls.push(name.to_string());
        check(&state.delete_err)
    }

    async fn import(&self, name: &str, path: &Path) -> ForgeResult<()> {
        let mut state = self.state.lock();
        state
            .import_calls
            .push((name.to_string(), path.to_path_buf()));
        check(&state.import_err)
    }

    async fn is_running(&self, name: &str) -> ForgeResult<bool> {
        let mut state = self.state.lock();
        state.is_running_calls += 1;
        state.is_running_name = Some(name.to_string());
        check(&state.is_running_err)?;
        Ok(state.running)
    }

    async fn start(&self, name: &str) -> ForgeResult<()> {
        let mut state = self.state.lock();
        state.start_calls.push(name.to_string());
        check(&state.start_err)?;
        state.running = true;
        Ok(())
    }

    async fn stop(&self, name: &str) -> ForgeResult<()> {
        let mut state = self.state.lock();
        state.stop_calls.push(name.to_string());
        check(&state.stop_err)?;
        state.running = false;
        Ok(())
    }

    async fn utmctl(&self, args: &[&str]) -> ForgeResult<String> {
        let mut state = self.state.lock();
        state
            .utmctl_calls
            .push(args.iter().map(|a| a.to_string()).collect());
        if let Some(msg) = state.utmctl_errs.get(state.utmctl_calls.len() - 1)
            && !msg.is_empty()
        {
            return Err(mock_err(msg));
        }
        Ok(state.utmctl_result.clone())
    }

    async fn execute_script(&self, script: &str, args: &[&str]) -> ForgeResult<String> {
        let mut state = self.state.lock();
        let mut call = vec![script.to_string()];
        call.extend(args.iter().map(|a| a.to_string()));
        state.script_calls.push(call);
        if let Some(msg) = state.script_errs.get(state.script_calls.len() - 1)
            && !msg.is_empty()
        {
            return Err(mock_err(msg));
        }
        Ok(state.script_result.clone())
    }

    async fn verify(&self) -> ForgeResult<()> {
        let mut state = self.state.lock();
        state.verify_called = true;
        check(&state.verify_err)
    }

    async fn version(&self) -> ForgeResult<String> {
        let mut state = self.state.lock();
        state.version_called = true;
        check(&state.version_err)?;
        Ok(state.version_result.clone())
    }
}
