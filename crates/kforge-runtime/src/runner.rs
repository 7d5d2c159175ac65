use crate::command::{CommandChain, CommandSpec};
use crate::RuntimeError;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Read, Write};
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::str::FromStr;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Exit code reported for a cancelled streaming command. No real process can
/// exit with a negative code.
pub const CANCELLED_EXIT_CODE: i32 = -2;

const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// How long a cancelled child gets between SIGTERM and SIGKILL, and how long
/// we then wait for it to be reaped.
const TERM_GRACE: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitOutcome {
    Exited(i32),
    /// The cancel check fired and the child was terminated.
    Cancelled,
    /// The elevation layer reported that authentication was dismissed or refused.
    ElevationDeclined,
}

impl ExitOutcome {
    pub fn success(self) -> bool {
        self == ExitOutcome::Exited(0)
    }

    pub fn code(self) -> i32 {
        match self {
            ExitOutcome::Exited(code) => code,
            ExitOutcome::Cancelled => CANCELLED_EXIT_CODE,
            ExitOutcome::ElevationDeclined => 126,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub outcome: ExitOutcome,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.outcome.success()
    }
}

/// Executes [`CommandSpec`]s. The pipeline only talks to this trait so tests
/// can substitute a scripted runner.
pub trait CommandRunner: Send + Sync {
    /// Run to completion with buffered output.
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, RuntimeError>;

    /// Run with stdout and stderr delivered line by line to `on_line` and
    /// appended to the build log. `cancel` is polled between lines; when it
    /// returns true the child is terminated and [`ExitOutcome::Cancelled`] is
    /// returned.
    fn run_streaming(
        &self,
        spec: &CommandSpec,
        on_line: &mut dyn FnMut(&str),
        cancel: &dyn Fn() -> bool,
    ) -> Result<ExitOutcome, RuntimeError>;

    fn run_privileged(&self, chain: &CommandChain) -> Result<CommandOutput, RuntimeError> {
        self.run(&chain.to_privileged())
    }

    fn run_privileged_streaming(
        &self,
        chain: &CommandChain,
        on_line: &mut dyn FnMut(&str),
        cancel: &dyn Fn() -> bool,
    ) -> Result<ExitOutcome, RuntimeError> {
        self.run_streaming(&chain.to_privileged(), on_line, cancel)
    }

    /// Trimmed stdout of a successful run, `None` on any failure.
    fn capture(&self, spec: &CommandSpec) -> Option<String> {
        match self.run(spec) {
            Ok(out) if out.success() => Some(out.stdout.trim().to_owned()),
            Ok(out) => {
                debug!("{} exited with {}", spec.render(), out.outcome.code());
                None
            }
            Err(e) => {
                debug!("{} failed: {e}", spec.render());
                None
            }
        }
    }
}

/// Release string of the running kernel, `Unknown` when `uname` fails.
pub fn running_release(runner: &dyn CommandRunner) -> String {
    runner
        .capture(&CommandSpec::new("uname").arg("-r"))
        .filter(|r| !r.is_empty())
        .unwrap_or_else(|| "Unknown".to_owned())
}

/// Executable lookup on the host `PATH`.
pub trait ToolLookup: Send + Sync {
    fn has(&self, name: &str) -> bool;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTools;

impl ToolLookup for SystemTools {
    fn has(&self, name: &str) -> bool {
        Command::new("which")
            .arg(name)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Elevation {
    /// `pkexec` when installed, otherwise `sudo`.
    #[default]
    Auto,
    Pkexec,
    Sudo,
}

impl Elevation {
    pub fn resolve(self, tools: &dyn ToolLookup) -> Result<&'static str, RuntimeError> {
        match self {
            Elevation::Pkexec => Ok("pkexec"),
            Elevation::Sudo => Ok("sudo"),
            Elevation::Auto if tools.has("pkexec") => Ok("pkexec"),
            Elevation::Auto if tools.has("sudo") => Ok("sudo"),
            Elevation::Auto => Err(RuntimeError::ElevationUnavailable),
        }
    }
}

impl FromStr for Elevation {
    type Err = RuntimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Elevation::Auto),
            "pkexec" | "polkit" => Ok(Elevation::Pkexec),
            "sudo" => Ok(Elevation::Sudo),
            other => Err(RuntimeError::ExecFailed(format!(
                "unknown elevation method '{other}' (expected auto, pkexec or sudo)"
            ))),
        }
    }
}

/// Runs commands on the host.
///
/// Unprivileged streaming children are placed in their own process group so
/// cancellation reaches every process a build spawned, not only the top-level
/// `make`. Privileged children stay in the caller's foreground group: sudo and
/// text polkit agents read the password from the terminal, and a background
/// group would be stopped with SIGTTIN on that read.
pub struct ProcessRunner {
    log_path: Option<PathBuf>,
    elevation: Elevation,
    tools: Box<dyn ToolLookup>,
}

impl ProcessRunner {
    pub fn new(elevation: Elevation) -> Self {
        Self {
            log_path: None,
            elevation,
            tools: Box::new(SystemTools),
        }
    }

    /// Append every streamed command and its output to `path`.
    #[must_use]
    pub fn with_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_path = Some(path.into());
        self
    }

    #[must_use]
    pub fn with_tools(mut self, tools: Box<dyn ToolLookup>) -> Self {
        self.tools = tools;
        self
    }

    pub fn log_path(&self) -> Option<&Path> {
        self.log_path.as_deref()
    }

    fn build_command(&self, spec: &CommandSpec) -> Result<(Command, Option<&'static str>), RuntimeError> {
        if spec.privileged {
            let elevator = self.elevation.resolve(self.tools.as_ref())?;
            let mut cmd = Command::new(elevator);
            if spec.needs_shell() {
                cmd.arg("sh").arg("-c").arg(spec.render());
            } else {
                cmd.arg(&spec.program).args(&spec.args);
            }
            return Ok((cmd, Some(elevator)));
        }
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args);
        if let Some(dir) = &spec.workdir {
            cmd.current_dir(dir);
        }
        cmd.envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        Ok((cmd, None))
    }

    fn open_log(&self) -> Result<Option<File>, RuntimeError> {
        let Some(path) = &self.log_path else {
            return Ok(None);
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Some(file))
    }

    fn spawn_error(spec: &CommandSpec, source: std::io::Error) -> RuntimeError {
        RuntimeError::Spawn {
            program: spec.program.clone(),
            source,
        }
    }

    /// Stop a cancelled child: SIGCONT first so a stopped target can act on
    /// the SIGTERM, then SIGKILL once [`TERM_GRACE`] has passed. Returns once
    /// the child is reaped or the grace period after SIGKILL has run out.
    fn terminate(child: &mut Child, grouped: bool) {
        let Ok(pid) = i32::try_from(child.id()) else {
            let _ = child.kill();
            let _ = child.wait();
            return;
        };
        let target = if grouped { -pid } else { pid };
        debug!("terminating {pid} (own process group: {grouped})");
        signal(target, libc::SIGCONT);
        signal(target, libc::SIGTERM);
        if reap_within(child, TERM_GRACE) {
            return;
        }
        warn!("process {pid} ignored SIGTERM, sending SIGKILL");
        signal(target, libc::SIGKILL);
        if !reap_within(child, TERM_GRACE) {
            warn!("process {pid} did not exit after SIGKILL; leaving it behind");
        }
    }
}

/// Send `sig` to `target`, a pid or a negated process group id.
fn signal(target: i32, sig: i32) {
    // SAFETY: kill() only sends a signal; target is a child pid or the
    // negated id of the process group created for that child at spawn time.
    #[allow(unsafe_code)]
    let ret = unsafe { libc::kill(target, sig) };
    if ret != 0 {
        let errno = std::io::Error::last_os_error();
        if errno.raw_os_error() == Some(libc::ESRCH) {
            debug!("{target} already exited");
        } else {
            // EPERM: an elevated child may no longer be ours to signal.
            warn!("failed to send signal {sig} to {target}: {errno}");
        }
    }
}

/// Poll for the child's exit for up to `limit`. True once it was reaped.
fn reap_within(child: &mut Child, limit: Duration) -> bool {
    let deadline = Instant::now() + limit;
    loop {
        match child.try_wait() {
            Ok(Some(_)) => return true,
            Ok(None) if Instant::now() < deadline => thread::sleep(Duration::from_millis(50)),
            Ok(None) => return false,
            Err(e) => {
                debug!("waiting for cancelled child failed: {e}");
                return true;
            }
        }
    }
}

/// Whether a streamed spec gets its own process group. Elevated commands must
/// stay in the foreground group to prompt on the terminal.
fn isolates_process_group(spec: &CommandSpec) -> bool {
    !spec.privileged
}

fn exit_code(status: ExitStatus) -> i32 {
    status
        .code()
        .or_else(|| status.signal().map(|s| 128 + s))
        .unwrap_or(1)
}

fn outcome_of(status: ExitStatus, elevator: Option<&str>) -> ExitOutcome {
    let code = exit_code(status);
    // pkexec: 126 when the dialog was dismissed, 127 when authorization failed.
    if elevator == Some("pkexec") && matches!(code, 126 | 127) {
        ExitOutcome::ElevationDeclined
    } else {
        ExitOutcome::Exited(code)
    }
}

fn spawn_reader<R: Read + Send + 'static>(source: R, tx: Sender<String>) -> JoinHandle<()> {
    thread::spawn(move || {
        let mut reader = BufReader::new(source);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) | Err(_) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf);
                    let line = line.trim_end_matches(['\n', '\r']);
                    if tx.send(line.to_owned()).is_err() {
                        break;
                    }
                }
            }
        }
    })
}

impl CommandRunner for ProcessRunner {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, RuntimeError> {
        let (mut cmd, elevator) = self.build_command(spec)?;
        debug!("running: {}", spec.render());
        let output = cmd
            .stdin(Stdio::null())
            .output()
            .map_err(|e| Self::spawn_error(spec, e))?;
        Ok(CommandOutput {
            outcome: outcome_of(output.status, elevator),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    fn run_streaming(
        &self,
        spec: &CommandSpec,
        on_line: &mut dyn FnMut(&str),
        cancel: &dyn Fn() -> bool,
    ) -> Result<ExitOutcome, RuntimeError> {
        let (mut cmd, elevator) = self.build_command(spec)?;
        let rendered = spec.render();
        let mut log = self.open_log()?;
        if let Some(f) = log.as_mut() {
            writeln!(f, "\n--- Running command: {rendered} ---")?;
            f.flush()?;
        }
        debug!("streaming: {rendered}");

        let grouped = isolates_process_group(spec);
        if grouped {
            cmd.process_group(0);
        }
        let mut child = cmd
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Self::spawn_error(spec, e))?;

        let (tx, rx) = mpsc::channel();
        let mut readers = Vec::with_capacity(2);
        if let Some(out) = child.stdout.take() {
            readers.push(spawn_reader(out, tx.clone()));
        }
        if let Some(err) = child.stderr.take() {
            readers.push(spawn_reader(err, tx.clone()));
        }
        drop(tx);

        loop {
            if cancel() {
                Self::terminate(&mut child, grouped);
                if let Some(f) = log.as_mut() {
                    let _ = writeln!(f, "--- Cancelled by user ---");
                    let _ = f.flush();
                }
                // Reader threads are detached: a grandchild that escaped the
                // process group could keep a pipe open indefinitely.
                drop(readers);
                return Ok(ExitOutcome::Cancelled);
            }
            match rx.recv_timeout(POLL_INTERVAL) {
                Ok(line) => {
                    if let Some(f) = log.as_mut() {
                        writeln!(f, "{line}")?;
                        f.flush()?;
                    }
                    on_line(&line);
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        for reader in readers {
            let _ = reader.join();
        }
        let status = child.wait()?;
        Ok(outcome_of(status, elevator))
    }
}
