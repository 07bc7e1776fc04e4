//! Path grammar for the resource tree.
//!
//! Paths are `/`-separated UTF-8 segments. An absolute path starts with
//! `/` and resolves from the root; a relative path resolves from a base
//! entry. The leading slash is the only place an empty segment is
//! tolerated: `a//b` and `a/` are malformed.

use crate::config::HubConfig;
use crate::error::{Error, Result};

/// Characters permitted inside a path segment.
fn is_segment_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.')
}

/// True when the path cannot name an entry at all: over the byte
/// budget, carrying a character outside the permitted set, or holding
/// an empty segment anywhere but the leading slash.
pub fn is_malformed(path: &str, cfg: &HubConfig) -> bool {
    if path.len() > cfg.max_path_bytes {
        return true;
    }
    if path.chars().any(|c| c != '/' && !is_segment_char(c)) {
        return true;
    }
    let body = path.strip_prefix('/').unwrap_or(path);
    !body.is_empty() && body.split('/').any(|segment| segment.is_empty())
}

pub fn is_absolute(path: &str) -> bool {
    path.starts_with('/')
}

/// Split into segments, checking each against the name budget. The
/// empty path (or a bare `/`) names the base itself.
pub fn segments<'a>(path: &'a str, cfg: &HubConfig) -> Result<Vec<&'a str>> {
    if is_malformed(path, cfg) {
        return Err(Error::BadParameter(format!("malformed path {path:?}")));
    }
    let body = path.strip_prefix('/').unwrap_or(path);
    if body.is_empty() {
        return Ok(Vec::new());
    }
    let mut out = Vec::new();
    for segment in body.split('/') {
        if segment.len() > cfg.max_name_bytes {
            return Err(Error::BadParameter(format!(
                "segment {:?} exceeds {} bytes",
                segment, cfg.max_name_bytes
            )));
        }
        out.push(segment);
    }
    Ok(out)
}
