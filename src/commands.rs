use std::path::Path;

use anyhow::{Context, Result};

use crate::config::SyncConfig;
use crate::state::SyncState;
use crate::transfer::{self, ConnectionManager, Connector, FtpConnector, SyncReport};

/// Inputs of one `ftpsync` invocation.
#[derive(Debug, Clone, Copy)]
pub struct SyncArgs<'a> {
    pub config_path: &'a Path,
    pub state_path: Option<&'a Path>,
    pub progress: bool,
}

/// Binary entry: real FTP connector, summary line, non-zero exit on per-file failures.
pub fn handle_sync(args: SyncArgs<'_>) -> Result<()> {
    let config = SyncConfig::read_from(args.config_path)?;
    let connector = FtpConnector::new(config.tls_verify, config.timeout());
    let report = sync_with_connector(args, &config, Box::new(connector))?;
    crate::util::print_summary(
        report.files_downloaded,
        report.bytes,
        report.elapsed_secs,
        report.failures.len(),
    );
    if report.has_failures() {
        let failed: Vec<&str> = report.failures.iter().map(|f| f.filepath.as_str()).collect();
        anyhow::bail!("{} file(s) failed to download: {}", failed.len(), failed.join(", "));
    }
    tracing::info!("Data downloaded.");
    Ok(())
}

/// Load state, run the engine over `connector` and persist the new checkpoint.
pub fn sync_with_connector(
    args: SyncArgs<'_>,
    config: &SyncConfig,
    connector: Box<dyn Connector>,
) -> Result<SyncReport> {
    let prior = match args.state_path {
        Some(p) => SyncState::read_from(p)?,
        None => SyncState::default(),
    };
    let mut manager =
        ConnectionManager::new(config.endpoint(), connector).with_policy(config.retry_policy());
    let progress = crate::util::init_progress(args.progress, 0);
    let report = transfer::run_sync_with(&mut manager, config, &prior, &progress)
        .context("sync run failed")?;

    match (&report.new_state, args.state_path) {
        (Some(state), Some(path)) => {
            state.save_to(path)?;
            tracing::info!(
                path = %path.display(),
                start_date = ?state.start_date.map(|t| crate::parse::format_state_timestamp(&t)),
                "state updated"
            );
        }
        (Some(state), None) => {
            if let Some(t) = &state.start_date {
                tracing::info!(
                    start_date = %crate::parse::format_state_timestamp(t),
                    "no state file given, new checkpoint not persisted"
                );
            }
        }
        (None, _) => tracing::debug!("state left unchanged"),
    }
    Ok(report)
}
