use crate::notify::Notifier;
use kforge_remote::latest_stable;
use kforge_schema::{compare_versions, KernelVersion};
use std::cmp::Ordering;
use tracing::{debug, info};

/// Upstream version a release string was built from: `6.8.0-45-generic`
/// gives `6.8.0`. `None` when the release does not start with a version.
pub fn base_version(release: &str) -> Option<String> {
    let base = release.trim().split(['-', '+', '_']).next()?;
    let mut parts = base.split('.');
    let numeric = |p: Option<&str>| p.is_some_and(|s| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()));
    if !numeric(parts.next()) || !numeric(parts.next()) || !parts.all(|p| numeric(Some(p))) {
        return None;
    }
    Some(base.to_owned())
}

/// The latest stable release when it is newer than the running kernel.
/// Notifies `notifier` when one is found.
pub fn check_for_update(
    running: &str,
    versions: &[KernelVersion],
    notifier: &dyn Notifier,
) -> Option<KernelVersion> {
    let Some(current) = base_version(running) else {
        debug!("cannot derive a base version from '{running}'");
        return None;
    };
    let latest = latest_stable(versions).filter(|v| !v.is_mainline)?;
    if compare_versions(&latest.version, &current) != Ordering::Greater {
        debug!("running {current}, latest stable {} is not newer", latest.version);
        return None;
    }
    info!("Linux {} is available (running {current})", latest.version);
    notifier.new_version_available(&latest.version);
    Some(latest.clone())
}
