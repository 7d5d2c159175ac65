//! Host interaction for kforge.
//!
//! Structured commands and their shell rendering, the `CommandRunner` trait
//! with the process-backed runner (streaming, cancellation, privilege
//! escalation), distribution/bootloader/initramfs detection and the command
//! generators derived from it, build dependency planning, hardware probing,
//! and a scripted mock runner for tests.

pub mod command;
pub mod deps;
pub mod environment;
pub mod hardware;
pub mod mock;
pub mod prereq;
pub mod runner;

pub use command::{shell_quote, CommandChain, CommandSpec};
pub use deps::{dependency_plan, DependencyPlan};
pub use environment::{
    Bootloader, DistroFamily, EnvironmentInfo, EnvironmentProbe, GrubSetup, InitramfsTool,
};
pub use hardware::probe_hardware;
pub use prereq::{check_build_tools, format_missing, MissingPrereq};
pub use runner::{
    running_release, CommandOutput, CommandRunner, Elevation, ExitOutcome, ProcessRunner,
    SystemTools, ToolLookup, CANCELLED_EXIT_CODE,
};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("runtime I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to start '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("no privilege escalation tool found (install polkit's pkexec or sudo)")]
    ElevationUnavailable,
    #[error("command execution failed: {0}")]
    ExecFailed(String),
}
