use kforge_core::Notifier;

/// Desktop notifications through the session's notification daemon.
/// Delivery failures are logged and otherwise ignored.
#[derive(Debug, Clone, Copy, Default)]
pub struct DesktopNotifier;

fn send(summary: &str, body: &str, icon: &str) {
    if let Err(e) = notify_rust::Notification::new()
        .appname("kforge")
        .summary(summary)
        .body(body)
        .icon(icon)
        .timeout(notify_rust::Timeout::Milliseconds(5000))
        .show()
    {
        tracing::debug!("desktop notification failed (non-fatal): {e}");
    }
}

impl Notifier for DesktopNotifier {
    fn new_version_available(&self, version: &str) {
        send(
            "New kernel version available",
            &format!("Linux {version} is available for download."),
            "software-update-available",
        );
    }

    fn download_complete(&self, version: &str) {
        send(
            "Download complete",
            &format!("Linux {version} has been downloaded successfully."),
            "emblem-downloads",
        );
    }

    fn build_complete(&self, version: &str, success: bool) {
        if success {
            send(
                "Build complete",
                &format!("Linux {version} has been compiled and installed successfully."),
                "emblem-ok-symbolic",
            );
        } else {
            send(
                "Build error",
                &format!("Compilation of Linux {version} has failed."),
                "dialog-error",
            );
        }
    }

    fn reboot_required(&self) {
        send(
            "Reboot required",
            "Reboot the system to use the new kernel.",
            "system-reboot",
        );
    }
}
