use crate::lifecycle::{validate_transition, BuildStage};
use crate::pipeline::{BuildPipeline, InstallSummary};
use crate::progress::ProgressValue;
use crate::CoreError;
use kforge_schema::{local_version, normalize_name_tag, validate_version, KernelProfile};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use tracing::debug;

/// Shared cancellation flag. Requesting cancellation more than once is
/// harmless.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Stage and progress as last published by the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobSnapshot {
    pub stage: BuildStage,
    pub progress: ProgressValue,
}

/// One install run. Owned by the pipeline while it runs; the caller keeps a
/// [`JobHandle`]. A job is never reused: a retry is a new job.
#[derive(Debug)]
pub struct BuildJob {
    version: String,
    profile: KernelProfile,
    name_tag: String,
    cleanup_after_success: bool,
    stage: BuildStage,
    progress: ProgressValue,
    cancel: CancelToken,
    status: Arc<Mutex<JobSnapshot>>,
}

impl BuildJob {
    /// Validates `version` and normalizes `name_tag` (blank means `custom`)
    /// before anything touches the host.
    pub fn new(
        version: &str,
        profile: KernelProfile,
        name_tag: Option<&str>,
    ) -> Result<Self, CoreError> {
        let version = version.trim();
        validate_version(version)?;
        let name_tag = normalize_name_tag(name_tag)?;
        let snapshot = JobSnapshot {
            stage: BuildStage::Downloading,
            progress: ProgressValue::percent(0),
        };
        Ok(Self {
            version: version.to_owned(),
            profile,
            name_tag,
            cleanup_after_success: false,
            stage: snapshot.stage,
            progress: snapshot.progress,
            cancel: CancelToken::new(),
            status: Arc::new(Mutex::new(snapshot)),
        })
    }

    #[must_use]
    pub fn cleanup_after_success(mut self, cleanup: bool) -> Self {
        self.cleanup_after_success = cleanup;
        self
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn profile(&self) -> &KernelProfile {
        &self.profile
    }

    pub fn name_tag(&self) -> &str {
        &self.name_tag
    }

    /// `-{name_tag}-{profile suffix}`, written to `CONFIG_LOCALVERSION`.
    pub fn local_version(&self) -> String {
        local_version(&self.name_tag, &self.profile.suffix)
    }

    pub fn wants_cleanup(&self) -> bool {
        self.cleanup_after_success
    }

    pub fn stage(&self) -> BuildStage {
        self.stage
    }

    pub fn progress(&self) -> ProgressValue {
        self.progress
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub(crate) fn advance(&mut self, to: BuildStage) -> Result<(), CoreError> {
        validate_transition(self.stage, to)?;
        debug!("job {}: {} -> {to}", self.version, self.stage);
        self.stage = to;
        self.publish();
        Ok(())
    }

    pub(crate) fn set_progress(&mut self, value: ProgressValue) {
        self.progress = value;
        self.publish();
    }

    fn publish(&self) {
        if let Ok(mut status) = self.status.lock() {
            *status = JobSnapshot {
                stage: self.stage,
                progress: self.progress,
            };
        }
    }

    /// Run `pipeline` on a dedicated worker thread.
    pub fn spawn(mut self, pipeline: BuildPipeline) -> Result<JobHandle, CoreError> {
        let cancel = self.cancel.clone();
        let status = Arc::clone(&self.status);
        let thread = std::thread::Builder::new()
            .name("kforge-build".to_owned())
            .spawn(move || pipeline.full_install(&mut self))?;
        Ok(JobHandle {
            cancel,
            status,
            thread,
        })
    }
}

#[derive(Debug)]
pub enum JobOutcome {
    Succeeded(InstallSummary),
    Failed(CoreError),
    Cancelled,
}

impl JobOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// The caller's view of a running job.
pub struct JobHandle {
    cancel: CancelToken,
    status: Arc<Mutex<JobSnapshot>>,
    thread: JoinHandle<JobOutcome>,
}

impl JobHandle {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn snapshot(&self) -> Option<JobSnapshot> {
        self.status.lock().ok().map(|s| *s)
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    pub fn join(self) -> JobOutcome {
        self.thread
            .join()
            .unwrap_or(JobOutcome::Failed(CoreError::WorkerPanicked))
    }
}
