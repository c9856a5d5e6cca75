// transfer module: remote discovery, selection and download orchestration
mod download;
mod enumeration;
mod ftp_like;
mod helpers;
mod session;

use std::path::Path;
use std::time::Instant;

use chrono::{DateTime, NaiveDateTime, Utc};
use indicatif::ProgressBar;

use crate::config::{CheckpointScope, FileGroup, SyncConfig};
use crate::error::SyncError;
use crate::state::SyncState;

pub use download::{download_file, local_target};
pub use enumeration::list_files;
pub use ftp_like::{FtpLike, SuppaAdapter};
pub use helpers::{normalize_path, remote_basename, restore_path, select_files};
pub use session::{
    ConnectionManager, Connector, Endpoint, FailureReason, FtpConnector, NextStep,
    ProtocolVariant, classify_failure, next_step,
};

/// A regular, non-empty remote file found by the walker.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteFile {
    /// Absolute remote path with exactly one leading `/`.
    pub filepath: String,
    /// Second precision; "now" when the server could not report it.
    pub last_modified: DateTime<Utc>,
    pub modified_known: bool,
}

/// A file that could not be downloaded; the run went on without it.
#[derive(Debug, Clone)]
pub struct FileFailure {
    pub filepath: String,
    pub error: SyncError,
}

/// Outcome of one run.
#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    /// `Some` exactly when the state file should be rewritten.
    pub new_state: Option<SyncState>,
    pub files_downloaded: u64,
    pub bytes: u64,
    pub failures: Vec<FileFailure>,
    pub reconnects: u32,
    pub elapsed_secs: f64,
}

impl SyncReport {
    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }
}

/// Cutoff for this run: the persisted checkpoint first, then the configured
/// `start_date`. Outside incremental mode there is none.
pub fn resolve_cutoff(
    config: &SyncConfig,
    prior: &SyncState,
) -> Result<Option<NaiveDateTime>, SyncError> {
    if !config.incremental_mode {
        return Ok(None);
    }
    if let Some(t) = prior.start_date {
        return Ok(Some(t));
    }
    config.start_date()
}

/// Run one sync with a fresh connection manager built from `config`.
pub fn run_sync(
    config: &SyncConfig,
    prior: &SyncState,
    connector: Box<dyn Connector>,
) -> Result<SyncReport, SyncError> {
    let mut manager =
        ConnectionManager::new(config.endpoint(), connector).with_policy(config.retry_policy());
    run_sync_with(&mut manager, config, prior, &ProgressBar::hidden())
}

/// Run one sync over `manager`. The session is closed before returning, on
/// success and on error alike.
pub fn run_sync_with(
    manager: &mut ConnectionManager,
    config: &SyncConfig,
    prior: &SyncState,
    progress: &ProgressBar,
) -> Result<SyncReport, SyncError> {
    let started = Instant::now();
    let result = sync_groups(manager, config, prior, progress);
    manager.close();
    progress.finish_and_clear();
    result.map(|mut report| {
        report.reconnects = manager.reconnects();
        report.elapsed_secs = started.elapsed().as_secs_f64();
        report
    })
}

fn sync_groups(
    manager: &mut ConnectionManager,
    config: &SyncConfig,
    prior: &SyncState,
    progress: &ProgressBar,
) -> Result<SyncReport, SyncError> {
    let cutoff = resolve_cutoff(config, prior)?;
    if let Some(c) = &cutoff {
        tracing::info!(cutoff = %crate::parse::format_state_timestamp(c), "incremental run");
    }
    manager.connect()?;

    let mut report = SyncReport::default();
    let mut pool: Vec<DateTime<Utc>> = Vec::new();
    for group in config.groups() {
        if config.checkpoint_scope == CheckpointScope::LastGroup {
            pool.clear();
        }
        let downloaded = sync_group(manager, group, &config.target_dir, cutoff, progress, &mut report)?;
        pool.extend(downloaded.iter().filter(|f| f.modified_known).map(|f| f.last_modified));
    }

    if report.has_failures() {
        tracing::warn!(
            failures = report.failures.len(),
            "some files failed to download, keeping the previous checkpoint"
        );
        return Ok(report);
    }
    report.new_state = next_checkpoint(prior, &pool);
    Ok(report)
}

/// Walk, select and download one group. Returns the files that landed locally.
fn sync_group(
    manager: &mut ConnectionManager,
    group: &FileGroup,
    target_dir: &Path,
    cutoff: Option<NaiveDateTime>,
    progress: &ProgressBar,
    report: &mut SyncReport,
) -> Result<Vec<RemoteFile>, SyncError> {
    tracing::info!(
        remote = %group.remote_path,
        target = %target_dir.display(),
        "Downloading: data from {} -> {}",
        group.remote_path,
        target_dir.display()
    );
    let found = list_files(manager, &group.remote_path, true)?;
    let selected = select_files(found, &group.search_pattern, cutoff)?;
    progress.inc_length(selected.len() as u64);

    let mut downloaded = Vec::with_capacity(selected.len());
    for file in selected {
        progress.set_message(remote_basename(&file.filepath).to_string());
        match download_file(manager, target_dir, &file) {
            Ok(bytes) => {
                tracing::debug!(stage = "download", path = %file.filepath, bytes, "downloaded");
                report.files_downloaded += 1;
                report.bytes += bytes;
                downloaded.push(file);
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                tracing::error!(stage = "download", path = %file.filepath, error = %e, "download failed");
                // reply state of the aborted transfer is unknown; start clean
                manager.close();
                report.failures.push(FileFailure { filepath: file.filepath, error: e });
            }
        }
        progress.inc(1);
    }
    Ok(downloaded)
}

/// Newest known modification time, if it moves the checkpoint forward.
fn next_checkpoint(prior: &SyncState, pool: &[DateTime<Utc>]) -> Option<SyncState> {
    let newest = pool.iter().max()?.naive_utc();
    match prior.start_date {
        Some(old) if newest <= old => {
            tracing::info!(
                checkpoint = %crate::parse::format_state_timestamp(&old),
                "checkpoint unchanged"
            );
            None
        }
        _ => {
            let mut next = prior.clone();
            next.start_date = Some(newest);
            Some(next)
        }
    }
}
