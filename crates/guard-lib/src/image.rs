//! Container image reference helpers
//!
//! A reference looks like `[registry[:port]/]path[:tag][@digest]`. The tag
//! separator is only recognised when the last `:` comes after the last `/`,
//! otherwise the colon belongs to a registry port.

/// Tag reported for references without an explicit tag
pub const DEFAULT_TAG: &str = "latest";

/// Strip any `@sha256:...` digest pin
fn strip_digest(image: &str) -> &str {
    match image.find('@') {
        Some(idx) => &image[..idx],
        None => image,
    }
}

/// Byte offset of the tag separator, if the reference carries a tag
fn tag_separator(reference: &str) -> Option<usize> {
    let colon = reference.rfind(':')?;
    match reference.rfind('/') {
        Some(slash) if colon < slash => None,
        _ => Some(colon),
    }
}

/// Extract the tag portion of an image reference.
///
/// Returns `"latest"` when no tag is present.
pub fn extract_tag(image: &str) -> String {
    let reference = strip_digest(image);
    match tag_separator(reference) {
        Some(idx) => reference[idx + 1..].to_string(),
        None => DEFAULT_TAG.to_string(),
    }
}

/// Repository part of an image reference (registry and path, no tag or digest)
pub fn repository(image: &str) -> &str {
    let reference = strip_digest(image);
    match tag_separator(reference) {
        Some(idx) => &reference[..idx],
        None => reference,
    }
}

/// Replace the tag of an image reference.
///
/// Any digest pin is dropped: an explicit tag always supersedes it.
pub fn replace_tag(image: &str, new_tag: &str) -> String {
    format!("{}:{}", repository(image), new_tag)
}
