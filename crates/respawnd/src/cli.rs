use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "respawnd", version, about = "Self-updating daemon")]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Settings file to use instead of the per-user one
    #[arg(short = 'c', long = "config", global = true, env = "RESPAWN_CONFIG")]
    pub config_file: Option<PathBuf>,

    /// Release channel to follow
    #[arg(long, global = true, env = "RESPAWN_CHANNEL")]
    pub channel: Option<String>,

    /// Distribution host serving the release index
    #[arg(long, global = true, env = "RESPAWN_HOST")]
    pub host: Option<String>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the daemon with its auto-updater (default)
    Run,
    /// Check the channel once and upgrade if it moved
    Check,
    /// Move to another release channel
    Switch {
        /// Channel to switch to
        channel: String,
    },
    /// Download the latest build of the channel to a file
    Fetch {
        /// Where to write the executable
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Print the build variables
    Vars,
}
