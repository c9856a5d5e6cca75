use chrono::{SubsecRound, Utc};

use super::helpers::{remote_filepath, restore_path};
use super::session::ConnectionManager;
use super::{FtpLike, RemoteFile};
use crate::error::{RemoteError, RemoteErrorKind, SyncError};

/// List the files under `root`. Directories are probed with CWD; with
/// `recursive` they are descended (always fully once entered), otherwise skipped.
/// Zero-size files are left out. Only a missing `root` or a lost connection
/// fails the walk; metadata problems degrade the entry instead.
pub fn list_files(
    manager: &mut ConnectionManager,
    root: &str,
    recursive: bool,
) -> Result<Vec<RemoteFile>, SyncError> {
    let entries = match manager.with_reconnect("nlst", |s| Ok(s.nlst(root)?)) {
        Ok(v) => v,
        Err(SyncError::Remote(e)) if e.kind == RemoteErrorKind::NotFound => {
            // 450/550 is also how some servers report an empty directory
            if !is_directory(manager, root)? {
                return Err(SyncError::PathNotFound(root.to_string()));
            }
            tracing::debug!(stage = "walk", path = root, reply = %e, "empty root listing refused");
            Vec::new()
        }
        Err(e) => return Err(e),
    };
    let mut files = Vec::new();
    walk_entries(manager, root, entries, recursive, &mut files)?;
    if files.is_empty() {
        tracing::warn!(stage = "walk", path = root, "Found no files at \"{}\"", root);
    } else {
        let count = files.len();
        tracing::info!(stage = "walk", path = root, count, "Found {} files in \"{}\"", count, root);
    }
    Ok(files)
}

fn walk_entries(
    manager: &mut ConnectionManager,
    prefix: &str,
    entries: Vec<String>,
    recursive: bool,
    out: &mut Vec<RemoteFile>,
) -> Result<(), SyncError> {
    tracing::debug!(stage = "walk", path = prefix, count = entries.len(), "listed entries");
    for entry in entries {
        if matches!(super::helpers::remote_basename(&entry), "." | "..") {
            continue;
        }
        if is_directory(manager, &entry)? {
            if recursive {
                walk_subdirectory(manager, &entry, out)?;
            }
            continue;
        }
        if is_empty_file(manager, &entry)? {
            tracing::debug!(stage = "walk", path = %entry, "skipping empty file");
            continue;
        }
        out.push(describe_file(manager, &entry)?);
    }
    Ok(())
}

fn walk_subdirectory(
    manager: &mut ConnectionManager,
    dir: &str,
    out: &mut Vec<RemoteFile>,
) -> Result<(), SyncError> {
    match manager.with_reconnect("nlst", |s| Ok(s.nlst(dir)?)) {
        Ok(entries) => walk_entries(manager, dir, entries, true, out),
        Err(SyncError::Remote(e)) if e.kind == RemoteErrorKind::NotFound => {
            // some servers answer an empty directory with 450/550
            tracing::warn!(stage = "walk", path = dir, error = %e, "cannot list directory, skipping");
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// CWD into `entry` then straight back out. A refused CWD means "not a directory".
fn is_directory(manager: &mut ConnectionManager, entry: &str) -> Result<bool, SyncError> {
    best_effort(manager.with_reconnect("cwd", |s| Ok(probe_directory(s, entry)?)), false)
}

/// Probe with restoration: the working directory is always walked back after
/// a successful CWD, whatever the caller does with the answer.
pub(crate) fn probe_directory(sess: &mut dyn FtpLike, entry: &str) -> Result<bool, RemoteError> {
    match sess.cwd(entry) {
        Ok(()) => {}
        Err(e) if e.is_disconnect() => return Err(e),
        Err(_) => return Ok(false),
    }
    let back = restore_path(entry);
    match sess.cwd(&back) {
        Ok(()) => Ok(true),
        Err(e) if e.is_disconnect() => Err(e),
        Err(e) => {
            tracing::warn!(path = entry, back = %back, error = %e, "could not restore working directory");
            Ok(true)
        }
    }
}

fn is_empty_file(manager: &mut ConnectionManager, entry: &str) -> Result<bool, SyncError> {
    let size = manager.with_reconnect("size", |s| Ok(s.size(entry)?));
    // unknown size keeps the file
    best_effort(size.map(|n| n == 0), false)
}

fn describe_file(manager: &mut ConnectionManager, entry: &str) -> Result<RemoteFile, SyncError> {
    let reply = best_effort(manager.with_reconnect("mdtm", |s| Ok(Some(s.mdtm(entry)?))), None)?;
    let parsed = reply.as_deref().and_then(crate::parse::parse_mdtm_reply);
    let filepath = remote_filepath(entry);
    Ok(match parsed {
        Some(last_modified) => RemoteFile { filepath, last_modified, modified_known: true },
        None => {
            tracing::warn!(
                stage = "walk",
                path = %filepath,
                "cannot read m_time for file, defaulting to current time"
            );
            RemoteFile { filepath, last_modified: Utc::now().trunc_subsecs(0), modified_known: false }
        }
    })
}

/// Metadata calls never fail the walk, except when the connection is gone for good.
fn best_effort<T>(res: Result<T, SyncError>, fallback: T) -> Result<T, SyncError> {
    match res {
        Ok(v) => Ok(v),
        Err(e) if e.is_fatal() => Err(e),
        Err(e) => {
            tracing::debug!(error = %e, "metadata query failed");
            Ok(fallback)
        }
    }
}
