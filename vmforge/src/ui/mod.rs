//! User-facing output sink and prompt.

use std::collections::VecDeque;
use std::io::Write;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader, Lines};
use tokio::sync::Mutex;
use vmforge_shared::errors::{ForgeError, ForgeResult};

/// Output sink shared by every step of a build.
#[async_trait::async_trait]
pub trait Ui: Send + Sync {
    /// Announce a new phase.
    fn say(&self, msg: &str);

    /// Detail under the current phase.
    fn message(&self, msg: &str);

    fn error(&self, msg: &str);

    /// Prompt and wait for one line of input, without the trailing newline.
    async fn ask(&self, query: &str) -> ForgeResult<String>;
}

type InputLines = Lines<BufReader<Box<dyn AsyncRead + Send + Unpin>>>;

/// Terminal implementation writing to stdout/stderr and reading stdin.
///
/// One buffered reader lives as long as the Ui, so lines piped in ahead of
/// a prompt are kept for the prompts that follow.
pub struct ConsoleUi {
    prefix: String,
    input: Mutex<InputLines>,
}

impl ConsoleUi {
    /// `prefix` is the builder type shown before every line.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self::with_input(prefix, tokio::io::stdin())
    }

    /// Console Ui answering prompts from `input` instead of stdin.
    pub fn with_input(
        prefix: impl Into<String>,
        input: impl AsyncRead + Send + Unpin + 'static,
    ) -> Self {
        let input: Box<dyn AsyncRead + Send + Unpin> = Box::new(input);
        Self {
            prefix: prefix.into(),
            input: Mutex::new(BufReader::new(input).lines()),
        }
    }
}

impl std::fmt::Debug for ConsoleUi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsoleUi")
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl Ui for ConsoleUi {
    fn say(&self, msg: &str) {
        println!("==> {}: {}", self.prefix, msg);
    }

    fn message(&self, msg: &str) {
        println!("    {}: {}", self.prefix, msg);
    }

    fn error(&self, msg: &str) {
        eprintln!("==> {}: {}", self.prefix, msg);
    }

    async fn ask(&self, query: &str) -> ForgeResult<String> {
        print!("==> {}: {} ", self.prefix, query);
        std::io::stdout().flush()?;

        let mut lines = self.input.lock().await;
        match lines.next_line().await? {
            Some(line) => Ok(line.trim().to_string()),
            None => Err(ForgeError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "stdin closed while waiting for an answer",
            ))),
        }
    }
}

#[derive(Debug, Default)]
struct MockUiState {
    said: Vec<String>,
    messages: Vec<String>,
    errors: Vec<String>,
    asked: Vec<String>,
    answers: VecDeque<String>,
}

/// Recording Ui with scripted answers, for tests.
#[derive(Debug, Default)]
pub struct MockUi {
    state: parking_lot::Mutex<MockUiState>,
}

impl MockUi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ui that answers each prompt with the next entry of `answers`.
    pub fn with_answers<I, S>(answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let ui = Self::default();
        ui.state.lock().answers = answers.into_iter().map(Into::into).collect();
        ui
    }

    pub fn push_answer(&self, answer: impl Into<String>) {
        self.state.lock().answers.push_back(answer.into());
    }

    pub fn said(&self) -> Vec<String> {
        self.state.lock().said.clone()
    }

    pub fn messages(&self) -> Vec<String> {
        self.state.lock().messages.clone()
    }

    pub fn errors(&self) -> Vec<String> {
        self.state.lock().errors.clone()
    }

    pub fn asked(&self) -> Vec<String> {
        self.state.lock().asked.clone()
    }
}

#[async_trait::async_trait]
impl Ui for MockUi {
    fn say(&self, msg: &str) {
        self.state.lock().said.push(msg.to_string());
    }

    fn message(&self, msg: &str) {
        self.state.lock().messages.push(msg.to_string());
    }

    fn error(&self, msg: &str) {
        self.state.lock().errors.push(msg.to_string());
    }

    async fn ask(&self, query: &str) -> ForgeResult<String> {
        let mut state = self.state.lock();
        state.asked.push(query.to_string());
        state
            .answers
            .pop_front()
            .ok_or_else(|| ForgeError::Internal(format!("no scripted answer for {:?}", query)))
    }
}
