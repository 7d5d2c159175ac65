//! Scripted [`CommandRunner`] for tests.
//!
//! Responses are matched by substring against the rendered command, first
//! registered rule wins, and unmatched commands succeed silently. Every call
//! is recorded so tests can assert on what would have run.

use crate::command::CommandSpec;
use crate::runner::{CommandOutput, CommandRunner, ExitOutcome};
use crate::RuntimeError;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

type Hook = Arc<dyn Fn() + Send + Sync>;

#[derive(Clone)]
pub struct MockResponse {
    outcome: ExitOutcome,
    stdout: String,
    stderr: String,
    lines: Vec<String>,
    files: Vec<(PathBuf, String)>,
    hook: Option<Hook>,
}

impl MockResponse {
    pub fn ok() -> Self {
        Self::exit(0)
    }

    pub fn exit(code: i32) -> Self {
        Self {
            outcome: ExitOutcome::Exited(code),
            stdout: String::new(),
            stderr: String::new(),
            lines: Vec::new(),
            files: Vec::new(),
            hook: None,
        }
    }

    pub fn declined() -> Self {
        Self {
            outcome: ExitOutcome::ElevationDeclined,
            ..Self::ok()
        }
    }

    #[must_use]
    pub fn stdout(mut self, text: &str) -> Self {
        self.stdout = text.to_owned();
        self
    }

    #[must_use]
    pub fn stderr(mut self, text: &str) -> Self {
        self.stderr = text.to_owned();
        self
    }

    /// Lines delivered one by one to a streaming caller.
    #[must_use]
    pub fn lines<I, S>(mut self, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.lines = lines.into_iter().map(Into::into).collect();
        self
    }

    /// Write `content` to `path` when the command runs, creating parents.
    #[must_use]
    pub fn creates(mut self, path: impl Into<PathBuf>, content: &str) -> Self {
        self.files.push((path.into(), content.to_owned()));
        self
    }

    /// Invoke `hook` when the command starts, e.g. to request cancellation.
    #[must_use]
    pub fn hook(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.hook = Some(Arc::new(hook));
        self
    }
}

struct Rule {
    needle: String,
    response: MockResponse,
}

#[derive(Default)]
struct MockState {
    rules: Vec<Rule>,
    calls: Vec<CommandSpec>,
}

#[derive(Default)]
pub struct MockRunner {
    state: Mutex<MockState>,
}

impl MockRunner {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn on(self, needle: &str, response: MockResponse) -> Self {
        if let Ok(mut state) = self.state.lock() {
            state.rules.push(Rule {
                needle: needle.to_owned(),
                response,
            });
        }
        self
    }

    pub fn calls(&self) -> Vec<CommandSpec> {
        self.state
            .lock()
            .map(|s| s.calls.clone())
            .unwrap_or_default()
    }

    pub fn rendered_calls(&self) -> Vec<String> {
        self.calls().iter().map(CommandSpec::render).collect()
    }

    pub fn privileged_calls(&self) -> Vec<CommandSpec> {
        self.calls().into_iter().filter(|c| c.privileged).collect()
    }

    fn respond(&self, spec: &CommandSpec) -> Result<MockResponse, RuntimeError> {
        let mut state = self
            .state
            .lock()
            .map_err(|e| RuntimeError::ExecFailed(format!("mutex poisoned: {e}")))?;
        state.calls.push(spec.clone());
        let rendered = spec.render();
        let response = state
            .rules
            .iter()
            .find(|r| rendered.contains(&r.needle))
            .map_or_else(MockResponse::ok, |r| r.response.clone());
        drop(state);

        for (path, content) in &response.files {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, content)?;
        }
        if let Some(hook) = &response.hook {
            hook();
        }
        Ok(response)
    }
}

impl CommandRunner for MockRunner {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, RuntimeError> {
        let response = self.respond(spec)?;
        let stdout = if response.stdout.is_empty() && !response.lines.is_empty() {
            let mut text = response.lines.join("\n");
            text.push('\n');
            text
        } else {
            response.stdout
        };
        Ok(CommandOutput {
            outcome: response.outcome,
            stdout,
            stderr: response.stderr,
        })
    }

    fn run_streaming(
        &self,
        spec: &CommandSpec,
        on_line: &mut dyn FnMut(&str),
        cancel: &dyn Fn() -> bool,
    ) -> Result<ExitOutcome, RuntimeError> {
        let response = self.respond(spec)?;
        for line in &response.lines {
            if cancel() {
                return Ok(ExitOutcome::Cancelled);
            }
            on_line(line);
        }
        if cancel() {
            return Ok(ExitOutcome::Cancelled);
        }
        Ok(response.outcome)
    }
}
