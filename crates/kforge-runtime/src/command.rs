use std::fmt::Write as _;
use std::path::PathBuf;

/// Quote `s` for POSIX `sh`. Strings made only of unambiguous characters are
/// returned as-is so logs stay readable.
pub fn shell_quote(s: &str) -> String {
    let plain = !s.is_empty()
        && s.bytes().all(|b| {
            b.is_ascii_alphanumeric()
                || matches!(b, b'_' | b'-' | b'.' | b'/' | b':' | b'=' | b'@' | b'%' | b'+' | b',')
        });
    if plain {
        s.to_owned()
    } else {
        format!("'{}'", s.replace('\'', "'\\''"))
    }
}

/// One external invocation: program, arguments, working directory,
/// environment and whether it needs root.
///
/// Commands are kept structured until the execution boundary. Only there are
/// they rendered to shell text, through [`shell_quote`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub workdir: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    pub privileged: bool,
    /// Only honored when the spec is rendered into a [`CommandChain`].
    pub allow_failure: bool,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            workdir: None,
            env: Vec::new(),
            privileged: false,
            allow_failure: false,
        }
    }

    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.workdir = Some(dir.into());
        self
    }

    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    #[must_use]
    pub fn as_root(mut self) -> Self {
        self.privileged = true;
        self
    }

    #[must_use]
    pub fn tolerate_failure(mut self) -> Self {
        self.allow_failure = true;
        self
    }

    /// Whether running this spec under an elevator requires a shell wrapper.
    pub fn needs_shell(&self) -> bool {
        self.workdir.is_some() || !self.env.is_empty() || self.allow_failure
    }

    fn render_invocation(&self) -> String {
        let mut out = String::new();
        for (key, value) in &self.env {
            let _ = write!(out, "{key}={} ", shell_quote(value));
        }
        out.push_str(&shell_quote(&self.program));
        for arg in &self.args {
            out.push(' ');
            out.push_str(&shell_quote(arg));
        }
        out
    }

    /// Shell text equivalent to executing this spec.
    pub fn render(&self) -> String {
        let mut text = self.render_invocation();
        if let Some(dir) = &self.workdir {
            text = format!("cd {} && {text}", shell_quote(&dir.to_string_lossy()));
        }
        if self.allow_failure {
            text = format!("{{ {text} || true; }}");
        }
        text
    }
}

/// Steps joined with `&&`: the first failing step stops the chain and its
/// exit code is the chain's exit code.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandChain {
    steps: Vec<CommandSpec>,
}

impl CommandChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, step: CommandSpec) {
        self.steps.push(step);
    }

    #[must_use]
    pub fn then(mut self, step: CommandSpec) -> Self {
        self.steps.push(step);
        self
    }

    pub fn extend(&mut self, other: CommandChain) {
        self.steps.extend(other.steps);
    }

    pub fn steps(&self) -> &[CommandSpec] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn render(&self) -> String {
        self.steps
            .iter()
            .map(CommandSpec::render)
            .collect::<Vec<_>>()
            .join(" && ")
    }

    /// A single privileged spec that runs the whole chain, so elevation is
    /// requested once. Trivial one-step chains are executed directly; anything
    /// else goes through `sh -c`.
    pub fn to_privileged(&self) -> CommandSpec {
        if let [only] = self.steps.as_slice() {
            if !only.needs_shell() {
                return only.clone().as_root();
            }
        }
        CommandSpec::new("sh")
            .arg("-c")
            .arg(self.render())
            .as_root()
    }
}

impl From<CommandSpec> for CommandChain {
    fn from(step: CommandSpec) -> Self {
        Self { steps: vec![step] }
    }
}

impl FromIterator<CommandSpec> for CommandChain {
    fn from_iter<I: IntoIterator<Item = CommandSpec>>(iter: I) -> Self {
        Self {
            steps: iter.into_iter().collect(),
        }
    }
}
