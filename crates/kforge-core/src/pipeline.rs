use crate::build::{build_commands, build_phase, BuildProgress};
use crate::install::{install_chain, query_release, InstallTarget};
use crate::job::{BuildJob, CancelToken, JobOutcome};
use crate::lifecycle::BuildStage;
use crate::notify::{NoopNotifier, Notifier};
use crate::progress::{NullSink, ProgressEvent, ProgressSink, ProgressValue};
use crate::{CoreError, PipelineError};
use kforge_remote::{ArchiveFetcher, FetchOutcome, TransferProgress};
use kforge_runtime::{running_release, CommandRunner, CommandSpec, EnvironmentInfo, ExitOutcome};
use kforge_schema::{apply_profile, ArchiveSource, DownloadSources, KernelConfig, SchemaError};
use kforge_store::{InstallHistoryStore, InstalledKernelRecord, StoreError, WorkspaceLayout};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, info, warn};

/// Options forced off after the profile is applied. Each one breaks
/// unattended builds on at least one supported distribution.
const FORCED_EMPTY: &[&str] = &["CONFIG_SYSTEM_TRUSTED_KEYS", "CONFIG_SYSTEM_REVOCATION_KEYS"];
const FORCED_DISABLED: &[&str] = &["CONFIG_DEBUG_INFO_BTF", "CONFIG_MODULE_SIG"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallSummary {
    pub version: String,
    /// Release string reported by the build system, as it appears in `/boot`.
    pub release: String,
    pub profile: String,
    pub history_recorded: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Continue,
    Cancelled,
}

/// Drives a [`BuildJob`] through download, configure, build and install.
///
/// Stages run strictly in order on the calling thread. External commands go
/// through the [`CommandRunner`]; every streamed line lands in the build log.
/// Cancellation is polled per output line, per downloaded chunk and at every
/// stage boundary.
pub struct BuildPipeline {
    env: EnvironmentInfo,
    runner: Arc<dyn CommandRunner>,
    fetcher: Arc<dyn ArchiveFetcher>,
    layout: WorkspaceLayout,
    history: InstallHistoryStore,
    sources: DownloadSources,
    boot_dir: PathBuf,
    home: Option<PathBuf>,
    jobs: usize,
    sink: Box<dyn ProgressSink>,
    notifier: Arc<dyn Notifier>,
}

impl BuildPipeline {
    pub fn new(
        env: EnvironmentInfo,
        runner: Arc<dyn CommandRunner>,
        fetcher: Arc<dyn ArchiveFetcher>,
        layout: WorkspaceLayout,
        history: InstallHistoryStore,
    ) -> Self {
        Self {
            env,
            runner,
            fetcher,
            layout,
            history,
            sources: DownloadSources::default(),
            boot_dir: PathBuf::from("/boot"),
            home: std::env::var_os("HOME").map(PathBuf::from),
            jobs: std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get),
            sink: Box::new(NullSink),
            notifier: Arc::new(NoopNotifier),
        }
    }

    #[must_use]
    pub fn with_sources(mut self, sources: DownloadSources) -> Self {
        self.sources = sources;
        self
    }

    #[must_use]
    pub fn with_boot_dir(mut self, boot_dir: impl Into<PathBuf>) -> Self {
        self.boot_dir = boot_dir.into();
        self
    }

    #[must_use]
    pub fn with_home(mut self, home: Option<PathBuf>) -> Self {
        self.home = home;
        self
    }

    #[must_use]
    pub fn with_jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs.max(1);
        self
    }

    #[must_use]
    pub fn with_progress(mut self, sink: impl ProgressSink + 'static) -> Self {
        self.sink = Box::new(sink);
        self
    }

    #[must_use]
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn layout(&self) -> &WorkspaceLayout {
        &self.layout
    }

    pub fn environment(&self) -> &EnvironmentInfo {
        &self.env
    }

    /// Run every stage of `job`. The job ends in exactly one of `Done`,
    /// `Failed` or `Cancelled`; a failure is reported to the sink once,
    /// with a readable cause, before this returns.
    pub fn full_install(&self, job: &mut BuildJob) -> JobOutcome {
        info!(
            "installing Linux {} with profile {} (tag {})",
            job.version(),
            job.profile().name,
            job.name_tag()
        );
        match self.run_stages(job) {
            Ok(Some(summary)) => {
                if job.wants_cleanup() {
                    self.step(job, "Cleaning up build files...", 100);
                    if let Err(e) = self.layout.remove_all() {
                        warn!("cleanup after install failed: {e}");
                    }
                }
                if let Err(e) = job.advance(BuildStage::Done) {
                    warn!("{e}");
                }
                JobOutcome::Succeeded(summary)
            }
            Ok(None) => self.finish_cancelled(job),
            Err(e) => self.finish_failed(job, e),
        }
    }

    fn run_stages(&self, job: &mut BuildJob) -> Result<Option<InstallSummary>, CoreError> {
        let source = self.sources.resolve(job.version())?;
        let source_dir = self.layout.source_dir(&source.unpacked_dir);

        if self.download(job, &source, &source_dir)? == Step::Cancelled
            || job.is_cancel_requested()
        {
            return Ok(None);
        }

        job.advance(BuildStage::Configuring)?;
        if self.configure(job, &source_dir)? == Step::Cancelled || job.is_cancel_requested() {
            return Ok(None);
        }

        job.advance(BuildStage::Building)?;
        if self.build(job, &source_dir)? == Step::Cancelled || job.is_cancel_requested() {
            return Ok(None);
        }

        job.advance(BuildStage::Installing)?;
        self.install(job, &source_dir)
    }

    fn download(
        &self,
        job: &mut BuildJob,
        source: &ArchiveSource,
        source_dir: &Path,
    ) -> Result<Step, CoreError> {
        let version = job.version().to_owned();
        self.step(job, format!("Preparing download for Linux {version}..."), 0);
        self.layout.initialize().map_err(workspace_error)?;
        // A previous run may have left another version's tree, packages or
        // a partial archive behind.
        self.layout.clear_except_log().map_err(workspace_error)?;

        let archive = self.layout.archive_path(&source.file_name);
        self.step(job, format!("Downloading {}...", source.file_name), 5);
        let cancel = job.cancel_token();
        let outcome = {
            let mut on_progress = |p: TransferProgress| {
                if let Some(fraction) = p.fraction() {
                    let percent = download_percent(fraction);
                    if job.progress().definite().is_some_and(|current| percent > current) {
                        self.step(
                            job,
                            format!(
                                "Downloading {} ({} / {} MiB)",
                                source.file_name,
                                p.received >> 20,
                                p.total.unwrap_or_default() >> 20
                            ),
                            percent,
                        );
                    }
                }
            };
            self.fetcher
                .fetch(&source.url, &archive, &mut on_progress, &|| cancel.is_cancelled())
        };
        match outcome {
            Ok(FetchOutcome::Completed { bytes }) => debug!("downloaded {bytes} bytes"),
            Ok(FetchOutcome::Cancelled) => return Ok(Step::Cancelled),
            Err(e) => return Err(PipelineError::TransferFailed(e.to_string()).into()),
        }
        self.notifier.download_complete(&version);
        self.step(job, "Download complete. Extracting...", 15);

        job.advance(BuildStage::Extracting)?;
        self.step(job, format!("Extracting linux-{version}..."), 17);
        let extract = CommandSpec::new("tar")
            .arg("-xf")
            .arg(archive.to_string_lossy())
            .current_dir(self.layout.root());
        match self.stream(&extract, &cancel)? {
            ExitOutcome::Exited(0) => {}
            ExitOutcome::Cancelled => return Ok(Step::Cancelled),
            other => return Err(PipelineError::ExtractionFailed { code: other.code() }.into()),
        }

        let marker = source_dir.join("Makefile");
        if !marker.is_file() {
            return Err(PipelineError::ExtractionVerificationFailed(
                marker.display().to_string(),
            )
            .into());
        }
        self.step(job, "Extraction complete.", 20);
        Ok(Step::Continue)
    }

    fn configure(&self, job: &mut BuildJob, source_dir: &Path) -> Result<Step, CoreError> {
        let cancel = job.cancel_token();
        let config_path = source_dir.join(".config");

        self.step(job, "Copying current kernel configuration...", 22);
        match self.seed_config(&config_path)? {
            Some(origin) => info!("seeded .config from {origin}"),
            None => {
                warn!("no configuration of an installed kernel found, starting from defconfig");
                self.step(job, "No existing kernel configuration found, using defconfig...", 23);
                let defconfig = make(source_dir).arg("defconfig");
                match self.stream(&defconfig, &cancel)? {
                    ExitOutcome::Exited(0) => {}
                    ExitOutcome::Cancelled => return Ok(Step::Cancelled),
                    other => {
                        return Err(PipelineError::ConfigureFailed(format!(
                            "make defconfig exited with {}",
                            other.code()
                        ))
                        .into())
                    }
                }
            }
        }

        let profile_name = job.profile().name.clone();
        self.step(job, format!("Applying profile: {profile_name}..."), 25);
        if let Err(e) = apply_profile(job.profile(), &config_path) {
            warn!("applying profile {profile_name} failed: {e}");
            self.step(job, format!("Warning applying profile: {e}"), 25);
        }

        let local_version = job.local_version();
        if let Err(e) = force_settings(&config_path, &local_version) {
            warn!("could not pre-edit .config: {e}");
        }
        // Text edits alone do not survive olddefconfig in every case, so the
        // kernel's own editor enforces them as well.
        let edit = CommandSpec::new("bash")
            .args(["scripts/config", "--file", ".config"])
            .args(["--set-str", "LOCALVERSION", local_version.as_str()])
            .args(["--set-str", "SYSTEM_TRUSTED_KEYS", ""])
            .args(["--set-str", "SYSTEM_REVOCATION_KEYS", ""])
            .args(["--disable", "DEBUG_INFO_BTF"])
            .args(["--disable", "MODULE_SIG"])
            .current_dir(source_dir);
        match self.stream(&edit, &cancel)? {
            ExitOutcome::Exited(0) => {}
            ExitOutcome::Cancelled => return Ok(Step::Cancelled),
            other => {
                return Err(PipelineError::ConfigureFailed(format!(
                    "scripts/config exited with {}",
                    other.code()
                ))
                .into())
            }
        }

        self.step(job, "Running make olddefconfig...", 28);
        match self.stream(&make(source_dir).arg("olddefconfig"), &cancel)? {
            ExitOutcome::Exited(0) => {}
            ExitOutcome::Cancelled => return Ok(Step::Cancelled),
            other => {
                return Err(PipelineError::ConfigureFailed(format!(
                    "make olddefconfig exited with {}",
                    other.code()
                ))
                .into())
            }
        }
        self.step(job, "Configuration complete.", 30);
        Ok(Step::Continue)
    }

    /// Copy the running kernel's configuration into `config_path`. Tries
    /// `/boot/config-$(uname -r)`, then `/proc/config.gz`, then the newest
    /// `/boot/config-*`. `None` when nothing was found.
    fn seed_config(&self, config_path: &Path) -> Result<Option<String>, CoreError> {
        let running = running_release(self.runner.as_ref());
        if running != "Unknown" {
            let exact = self.boot_dir.join(format!("config-{running}"));
            if exact.is_file() {
                std::fs::copy(&exact, config_path)?;
                return Ok(Some(exact.display().to_string()));
            }
        }

        if let Ok(out) = self
            .runner
            .run(&CommandSpec::new("zcat").arg("/proc/config.gz"))
        {
            if out.success() && out.stdout.contains("CONFIG_") {
                std::fs::write(config_path, out.stdout)?;
                return Ok(Some("/proc/config.gz".to_owned()));
            }
        }

        if let Some(newest) = newest_boot_config(&self.boot_dir) {
            std::fs::copy(&newest, config_path)?;
            return Ok(Some(newest.display().to_string()));
        }
        Ok(None)
    }

    fn build(&self, job: &mut BuildJob, source_dir: &Path) -> Result<Step, CoreError> {
        let cancel = job.cancel_token();
        let family = self.env.distro_family;
        self.step(
            job,
            format!("{} ({} parallel jobs)", build_phase(family), self.jobs),
            30,
        );
        let mut progress = BuildProgress::for_tree(source_dir);
        debug!("expecting about {} compile steps", progress.estimate());

        for command in build_commands(family, source_dir, self.jobs) {
            let outcome = {
                let mut on_line = |line: &str| {
                    if let Some((message, percent)) = progress.observe(line) {
                        self.step(job, message, percent);
                    }
                };
                self.runner
                    .run_streaming(&command, &mut on_line, &|| cancel.is_cancelled())?
            };
            match outcome {
                ExitOutcome::Exited(0) => {}
                ExitOutcome::Cancelled => return Ok(Step::Cancelled),
                other => {
                    if let Err(e) = self.layout.clear_except_log() {
                        warn!("could not clean build workspace: {e}");
                    }
                    return Err(PipelineError::CompileFailed {
                        code: other.code(),
                        log: self.layout.log_file().display().to_string(),
                    }
                    .into());
                }
            }
        }
        self.step(job, "Build complete.", 90);
        Ok(Step::Continue)
    }

    fn install(
        &self,
        job: &mut BuildJob,
        source_dir: &Path,
    ) -> Result<Option<InstallSummary>, CoreError> {
        let cancel = job.cancel_token();
        self.step(job, "Installing kernel...", 92);
        let release = query_release(self.runner.as_ref(), source_dir)?;

        self.step(job, format!("Preparing installation of {release}..."), 93);
        let target = InstallTarget {
            workspace: self.layout.root(),
            source_dir,
            release: &release,
            boot_dir: &self.boot_dir,
            home: self.home.as_deref(),
        };
        let chain = install_chain(&self.env, self.runner.as_ref(), &target)?;

        self.step(job, "Finalizing installation (may require password)...", 95);
        let outcome = {
            let mut on_line = |line: &str| {
                let line = line.trim();
                if !line.is_empty() {
                    self.step(job, line.chars().take(80).collect::<String>(), 96);
                }
            };
            self.runner
                .run_privileged_streaming(&chain, &mut on_line, &|| cancel.is_cancelled())?
        };
        match outcome {
            ExitOutcome::Exited(0) => {}
            ExitOutcome::Cancelled => return Ok(None),
            ExitOutcome::ElevationDeclined => return Err(PipelineError::ElevationDeclined.into()),
            ExitOutcome::Exited(code) => return Err(PipelineError::InstallFailed { code }.into()),
        }

        let profile = job.profile().name.clone();
        let history_recorded = match self
            .history
            .append(InstalledKernelRecord::new(&release, &profile))
        {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    "could not record {release} in {}: {e}",
                    self.history.path().display()
                );
                false
            }
        };

        self.step(job, "Installation complete!", 100);
        self.notifier.build_complete(&release, true);
        self.notifier.reboot_required();
        Ok(Some(InstallSummary {
            version: job.version().to_owned(),
            release,
            profile,
            history_recorded,
        }))
    }

    fn finish_failed(&self, job: &mut BuildJob, error: CoreError) -> JobOutcome {
        warn!("install of {} failed: {error}", job.version());
        if let Err(e) = job.advance(BuildStage::Failed) {
            debug!("{e}");
        }
        self.report(job, error.to_string(), ProgressValue::Error);
        self.notifier.build_complete(job.version(), false);
        JobOutcome::Failed(error)
    }

    fn finish_cancelled(&self, job: &mut BuildJob) -> JobOutcome {
        info!("install of {} cancelled", job.version());
        if let Err(e) = job.advance(BuildStage::Cancelled) {
            debug!("{e}");
        }
        if let Err(e) = self.layout.remove_all() {
            warn!("could not remove build workspace after cancel: {e}");
        }
        self.report(job, "Build cancelled by user.", ProgressValue::Cancelled);
        JobOutcome::Cancelled
    }

    fn stream(&self, spec: &CommandSpec, cancel: &CancelToken) -> Result<ExitOutcome, CoreError> {
        Ok(self
            .runner
            .run_streaming(spec, &mut |line| debug!("{line}"), &|| cancel.is_cancelled())?)
    }

    /// Report a definite percentage. The bar never moves backwards.
    fn step(&self, job: &mut BuildJob, message: impl Into<String>, percent: u8) {
        let floor = job.progress().definite().unwrap_or(0);
        self.report(job, message, ProgressValue::percent(percent.max(floor)));
    }

    fn report(&self, job: &mut BuildJob, message: impl Into<String>, value: ProgressValue) {
        job.set_progress(value);
        self.sink.report(ProgressEvent::new(message, value));
    }
}

fn make(source_dir: &Path) -> CommandSpec {
    CommandSpec::new("make")
        .current_dir(source_dir)
        .env("LC_ALL", "C")
}

fn workspace_error(e: StoreError) -> CoreError {
    PipelineError::Workspace(e.to_string()).into()
}

/// Transfer progress mapped onto 5-15%.
fn download_percent(fraction: f64) -> u8 {
    5 + (fraction.clamp(0.0, 1.0) * 10.0) as u8
}

/// Overwrite the local version and the options known to break unattended
/// builds.
fn force_settings(config_path: &Path, local_version: &str) -> Result<(), SchemaError> {
    let text = std::fs::read_to_string(config_path)?;
    let mut config = KernelConfig::parse(&text);
    config.set("CONFIG_LOCALVERSION", &format!("\"{local_version}\""));
    for key in FORCED_EMPTY {
        config.set(key, "\"\"");
    }
    for key in FORCED_DISABLED {
        config.set(key, "n");
    }
    config.write(config_path)
}

fn newest_boot_config(boot_dir: &Path) -> Option<PathBuf> {
    std::fs::read_dir(boot_dir)
        .ok()?
        .flatten()
        .filter(|e| e.file_name().to_string_lossy().starts_with("config-"))
        .filter_map(|e| {
            let modified = e.metadata().and_then(|m| m.modified()).unwrap_or(SystemTime::UNIX_EPOCH);
            e.file_type()
                .is_ok_and(|t| t.is_file())
                .then(|| (modified, e.path()))
        })
        .max()
        .map(|(_, path)| path)
}
