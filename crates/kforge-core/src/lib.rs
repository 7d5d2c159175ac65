//! Orchestration for kforge.
//!
//! `BuildPipeline` drives one `BuildJob` through download, configure, build
//! and install, reporting to a `ProgressSink` and a `Notifier`. `JobHandle`
//! runs it off the caller's thread with cooperative cancellation. Kernel
//! removal, the update check, user settings and the workspace lock live
//! here as well.

pub mod build;
pub mod concurrency;
pub mod install;
pub mod job;
pub mod lifecycle;
pub mod notify;
pub mod pipeline;
pub mod progress;
pub mod removal;
pub mod settings;
pub mod updates;

pub use build::{build_commands, count_sources, BuildProgress};
pub use concurrency::{install_signal_handler, WorkspaceLock};
pub use install::{install_chain, query_release};
pub use job::{BuildJob, CancelToken, JobHandle, JobOutcome, JobSnapshot};
pub use lifecycle::{validate_transition, BuildStage};
pub use notify::{NoopNotifier, Notifier};
pub use pipeline::{BuildPipeline, InstallSummary};
pub use progress::{FnSink, NullSink, ProgressEvent, ProgressSink, ProgressValue};
pub use removal::{remove_kernel, RemovalReport, RemovalTarget};
pub use settings::Settings;
pub use updates::{base_version, check_for_update};

use thiserror::Error;

/// Why a pipeline stage gave up. Every variant terminates the job.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("download failed: {0}")]
    TransferFailed(String),
    #[error("extraction failed (exit code {code})")]
    ExtractionFailed { code: i32 },
    #[error("extraction failed: {0} not found")]
    ExtractionVerificationFailed(String),
    #[error("configuration failed: {0}")]
    ConfigureFailed(String),
    #[error("build failed (exit code {code}); see {log}")]
    CompileFailed { code: i32, log: String },
    #[error("could not determine the built kernel release: {0}")]
    ReleaseQueryFailed(String),
    #[error("no installable artifact found: {0}")]
    ArtifactMissing(String),
    #[error("installation failed (exit code {code})")]
    InstallFailed { code: i32 },
    #[error("removal failed (exit code {code}): {detail}")]
    RemovalFailed { code: i32, detail: String },
    #[error("refusing to remove the running kernel {0}")]
    RunningKernel(String),
    #[error("authentication was declined")]
    ElevationDeclined,
    #[error("workspace error: {0}")]
    Workspace(String),
}

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("{0}")]
    Schema(#[from] kforge_schema::SchemaError),
    #[error("store error: {0}")]
    Store(#[from] kforge_store::StoreError),
    #[error("runtime error: {0}")]
    Runtime(#[from] kforge_runtime::RuntimeError),
    #[error("remote error: {0}")]
    Remote(#[from] kforge_remote::RemoteError),
    #[error("{0}")]
    Pipeline(#[from] PipelineError),
    #[error("invalid stage transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },
    #[error("build workspace is in use by another kforge process ({0})")]
    WorkspaceBusy(String),
    #[error("invalid settings in {path}: {source}")]
    Settings {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("build worker panicked")]
    WorkerPanicked,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
