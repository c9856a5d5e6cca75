use chrono::NaiveDateTime;
use regex::Regex;

use super::RemoteFile;
use crate::error::SyncError;

/// Keep files whose path contains a match for `pattern` (search, not full match)
/// and, when `cutoff` is set, whose modification time is strictly after it.
pub fn select_files(
    files: Vec<RemoteFile>,
    pattern: &str,
    cutoff: Option<NaiveDateTime>,
) -> Result<Vec<RemoteFile>, SyncError> {
    let matcher = Regex::new(pattern).map_err(|e| SyncError::InvalidPattern {
        pattern: pattern.to_string(),
        message: e.to_string(),
    })?;
    tracing::info!(stage = "match", pattern, "searching for files matching pattern");
    let matched: Vec<RemoteFile> =
        files.into_iter().filter(|f| matcher.is_match(&f.filepath)).collect();
    if matched.is_empty() {
        tracing::warn!(stage = "match", pattern, "found no files matching pattern");
    } else {
        tracing::info!(stage = "match", pattern, count = matched.len(), "found matching files");
    }
    for f in &matched {
        tracing::info!(stage = "match", path = %f.filepath, "found file");
    }

    let Some(cutoff) = cutoff else {
        return Ok(matched);
    };
    let before = matched.len();
    let selected: Vec<RemoteFile> =
        matched.into_iter().filter(|f| f.last_modified.naive_utc() > cutoff).collect();
    let cutoff_s = crate::parse::format_state_timestamp(&cutoff);
    if selected.is_empty() && before > 0 {
        tracing::warn!(stage = "cutoff", cutoff = %cutoff_s, "no matching files modified after cutoff");
    } else {
        tracing::info!(
            stage = "cutoff",
            cutoff = %cutoff_s,
            count = selected.len(),
            skipped = before - selected.len(),
            "files modified after cutoff"
        );
    }
    Ok(selected)
}

/// Last path segment of a remote path; local file names are flattened to it.
pub fn remote_basename(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    trimmed.rsplit('/').next().unwrap_or(trimmed)
}

/// Relative path leading back out of `entry` after a successful `CWD entry`:
/// one `..` per separator in the entry plus one for the entry itself.
pub fn restore_path(entry: &str) -> String {
    let height = entry.matches('/').count();
    let mut s = String::from("..");
    for _ in 0..height {
        s.push_str("/..");
    }
    s
}

/// Normalize a path-like string for internal use:
/// - converts backslashes to forward slashes
/// - collapses repeated slashes
/// - optionally preserves a trailing slash
pub fn normalize_path(p: &str, preserve_trailing_slash: bool) -> String {
    if p.is_empty() {
        return String::new();
    }
    let mut s = p.replace('\\', "/");
    while s.contains("//") {
        s = s.replace("//", "/");
    }
    if !preserve_trailing_slash {
        // keep root "/"
        while s.len() > 1 && s.ends_with('/') {
            s.pop();
        }
    }
    s
}

/// Absolute remote path reported for a listing entry: `/` + entry, one leading slash.
pub fn remote_filepath(entry: &str) -> String {
    normalize_path(&format!("/{}", entry), false)
}
