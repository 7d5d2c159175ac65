//! Data model and pure transforms for kforge.
//!
//! This crate holds everything that does not touch the host: kernel version
//! strings and the kernel.org release listing parser, download source routing,
//! the static profile catalog with its hardware-derived variant, `.config`
//! text transforms, and validation of the user-supplied local-version tag.

pub mod kconfig;
pub mod profile;
pub mod tag;
pub mod version;

pub use kconfig::{apply_profile, KernelConfig};
pub use profile::{
    hardware_overrides, ConfigOverrides, HardwareSignals, KernelProfile, ProfileCatalog, ProfileId,
};
pub use tag::{local_version, normalize_name_tag, validate_release, DEFAULT_NAME_TAG};
pub use version::{
    compare_versions, is_release_candidate, parse_release_listing, validate_version,
    ArchiveFormat, ArchiveSource, DownloadSources, KernelVersion, ReleaseChannel,
};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid kernel version '{0}': expected MAJOR.MINOR[.PATCH][-rcN]")]
    InvalidVersion(String),
    #[error("invalid kernel release '{0}'")]
    InvalidRelease(String),
    #[error("invalid name tag '{0}': must be 1-32 characters of [a-z0-9-], starting with a letter or digit")]
    InvalidNameTag(String),
    #[error("unknown profile '{0}'")]
    UnknownProfile(String),
}
