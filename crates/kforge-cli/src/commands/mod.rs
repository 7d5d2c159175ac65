pub mod check_update;
pub mod completions;
pub mod deps;
pub mod env;
pub mod history;
pub mod install;
pub mod man_pages;
pub mod profiles;
pub mod remove;
pub mod versions;

use crate::notifier::DesktopNotifier;
use indicatif::{ProgressBar, ProgressStyle};
use kforge_core::{NoopNotifier, Notifier, Settings};
use kforge_runtime::{
    probe_hardware, running_release, CommandRunner, EnvironmentInfo, EnvironmentProbe,
    ProcessRunner, SystemTools,
};
use kforge_schema::ProfileCatalog;
use kforge_store::InstallHistoryStore;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_CANCELLED: u8 = 2;
pub const EXIT_BUSY: u8 = 3;

/// What every host-facing command needs: settings, the detected
/// environment and a way to run commands.
pub struct Host {
    pub settings: Settings,
    pub env: EnvironmentInfo,
    pub tools: SystemTools,
    runner: ProcessRunner,
    notify: bool,
}

impl Host {
    /// Detects the environment once for this invocation.
    pub fn detect(settings: Settings, notify: bool) -> Self {
        let tools = SystemTools;
        let runner = ProcessRunner::new(settings.elevation);
        let env = EnvironmentProbe::new(&tools, &runner).detect();
        tracing::debug!(
            "detected {} ({}), bootloader {}, initramfs {}",
            env.distro_name,
            env.distro_family,
            env.bootloader,
            env.initramfs_tool
        );
        Self {
            settings,
            env,
            tools,
            runner,
            notify: notify && has_graphical_session(),
        }
    }

    pub fn runner(&self) -> &dyn CommandRunner {
        &self.runner
    }

    /// A runner that also appends streamed output to the build log.
    pub fn build_runner(&self) -> Arc<dyn CommandRunner> {
        Arc::new(
            ProcessRunner::new(self.settings.elevation)
                .with_log(self.settings.layout().log_file()),
        )
    }

    pub fn running_release(&self) -> String {
        running_release(&self.runner)
    }

    pub fn catalog(&self) -> ProfileCatalog {
        ProfileCatalog::new(&probe_hardware(&self.runner, Path::new("/")))
    }

    pub fn history(&self, catalog: &ProfileCatalog) -> InstallHistoryStore {
        self.settings.history_store(catalog)
    }

    pub fn notifier(&self) -> Arc<dyn Notifier> {
        if self.notify && self.settings.notifications {
            Arc::new(DesktopNotifier)
        } else {
            Arc::new(NoopNotifier)
        }
    }
}

/// Notifications need a graphical session.
fn has_graphical_session() -> bool {
    std::env::var_os("DISPLAY").is_some() || std::env::var_os("WAYLAND_DISPLAY").is_some()
}

pub fn json_pretty(value: &impl serde::Serialize) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("JSON serialization failed: {e}"))
}

pub fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .expect("valid template")
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    pb.set_message(msg.to_owned());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

pub fn spin_ok(pb: &ProgressBar, msg: &str) {
    pb.set_style(ProgressStyle::with_template("{msg}").expect("valid template"));
    pb.finish_with_message(format!("✓ {msg}"));
}

pub fn spin_fail(pb: &ProgressBar, msg: &str) {
    pb.set_style(ProgressStyle::with_template("{msg}").expect("valid template"));
    pb.finish_with_message(format!("✗ {msg}"));
}

/// A 0-100 bar for the install pipeline.
pub fn percent_bar() -> ProgressBar {
    let pb = ProgressBar::new(100);
    pb.set_style(
        ProgressStyle::with_template("{elapsed_precise} [{bar:40.cyan/blue}] {pos:>3}% {wide_msg}")
            .expect("valid template")
            .progress_chars("=> "),
    );
    pb.enable_steady_tick(Duration::from_millis(200));
    pb
}

pub fn colorize_channel(channel: &str) -> String {
    use console::Style;
    match channel {
        "mainline" => Style::new().yellow().apply_to(channel).to_string(),
        "stable" => Style::new().green().apply_to(channel).to_string(),
        "longterm" => Style::new().cyan().apply_to(channel).to_string(),
        other => other.to_owned(),
    }
}

/// Ask before doing something that changes the system. `--yes` skips the
/// question; without a terminal to ask on, the answer is no.
pub fn confirm(prompt: &str, assume_yes: bool) -> Result<bool, String> {
    if assume_yes {
        return Ok(true);
    }
    if !console::user_attended() {
        return Err(format!("{prompt} (no terminal to confirm on; pass --yes)"));
    }
    dialoguer::Confirm::new()
        .with_prompt(prompt)
        .default(false)
        .interact()
        .map_err(|e| format!("confirmation failed: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_pretty_serializes_object() {
        let val = serde_json::json!({"version": "6.12.4"});
        let result = json_pretty(&val).unwrap();
        assert!(result.contains("\"version\""));
        assert!(result.contains("\"6.12.4\""));
    }

    #[test]
    fn colorize_channel_keeps_text() {
        for channel in ["mainline", "stable", "longterm"] {
            assert!(colorize_channel(channel).contains(channel));
        }
        assert_eq!(colorize_channel("linux-next"), "linux-next");
    }

    #[test]
    fn exit_codes_are_distinct() {
        let codes = [EXIT_SUCCESS, EXIT_FAILURE, EXIT_CANCELLED, EXIT_BUSY];
        for (i, a) in codes.iter().enumerate() {
            for b in &codes[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn assume_yes_skips_prompt() {
        assert_eq!(confirm("Remove kernel?", true), Ok(true));
    }

    #[test]
    fn bars_can_finish() {
        let pb = spinner("fetching...");
        spin_ok(&pb, "done");
        let pb = percent_bar();
        pb.set_position(42);
        pb.finish_and_clear();
    }
}
