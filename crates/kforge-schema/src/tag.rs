use crate::SchemaError;

pub const DEFAULT_NAME_TAG: &str = "custom";

/// Normalize the user-supplied name token. `None` or blank input yields
/// [`DEFAULT_NAME_TAG`]. The result is lower-case because Debian package
/// names derived from the release string reject upper case.
pub fn normalize_name_tag(tag: Option<&str>) -> Result<String, SchemaError> {
    let raw = match tag.map(str::trim) {
        None | Some("") => return Ok(DEFAULT_NAME_TAG.to_owned()),
        Some(t) => t,
    };
    let lowered = raw.to_ascii_lowercase();
    let valid = lowered.len() <= 32
        && lowered
            .bytes()
            .next()
            .is_some_and(|b| b.is_ascii_alphanumeric())
        && lowered
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-');
    if valid {
        Ok(lowered)
    } else {
        Err(SchemaError::InvalidNameTag(raw.to_owned()))
    }
}

/// The `LOCALVERSION` string: `-{tag}-{suffix}`.
pub fn local_version(name_tag: &str, suffix: &str) -> String {
    format!("-{name_tag}-{suffix}")
}

/// A kernel release string as it appears in `/boot` and `/usr/lib/modules`.
/// Rejects anything that could escape those directories when interpolated
/// into a path.
pub fn validate_release(release: &str) -> Result<(), SchemaError> {
    let valid = !release.is_empty()
        && release.len() <= 128
        && !release.contains("..")
        && release
            .bytes()
            .next()
            .is_some_and(|b| b.is_ascii_alphanumeric())
        && release
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'-' | b'_' | b'+'));
    if valid {
        Ok(())
    } else {
        Err(SchemaError::InvalidRelease(release.to_owned()))
    }
}
