use clap::Parser;

use ftpsync::cli::Cli;
use ftpsync::commands::{SyncArgs, handle_sync};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _log_guard = ftpsync::logging::init_logging(cli.verbose, cli.log_file.as_deref())?;

    let args = SyncArgs {
        config_path: &cli.config,
        state_path: cli.state.as_deref(),
        progress: cli.progress,
    };
    if let Err(e) = handle_sync(args) {
        tracing::error!(error = %format!("{:#}", e), "sync failed");
        return Err(e);
    }
    Ok(())
}
