/// Semantic events for a desktop notification collaborator. Implementations
/// own titles, icons and urgency; delivery failures must not reach the
/// pipeline.
pub trait Notifier: Send + Sync {
    fn new_version_available(&self, version: &str);
    fn download_complete(&self, version: &str);
    fn build_complete(&self, version: &str, success: bool);
    fn reboot_required(&self);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn new_version_available(&self, _version: &str) {}
    fn download_complete(&self, _version: &str) {}
    fn build_complete(&self, _version: &str, _success: bool) {}
    fn reboot_required(&self) {}
}
