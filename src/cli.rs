use std::path::PathBuf;

use clap::{ArgAction, Parser};

#[derive(Parser, Debug)]
#[clap(
    name = "ftpsync",
    author,
    version,
    about = "Incrementally download files from an FTP/FTPS server",
    long_about = None
)]
pub struct Cli {
    #[clap(short = 'c', long = "config", help = "Path to the JSON config file")]
    pub config: PathBuf,
    #[clap(
        short = 's',
        long = "state",
        help = "Path to the JSON state file holding the incremental checkpoint"
    )]
    pub state: Option<PathBuf>,
    #[clap(short, long, action = ArgAction::Count, help = "Raise log verbosity (-v debug, -vv trace)")]
    pub verbose: u8,
    #[clap(long = "log-file", help = "Also write logs to this file")]
    pub log_file: Option<PathBuf>,
    #[clap(long, help = "Show a progress bar over the selected files")]
    pub progress: bool,
}
