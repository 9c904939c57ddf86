mod commands;
mod config;
mod error;
mod fetch;
mod item;
mod logging;
mod notify;
mod radar;
mod state;
mod text;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};

use crate::commands::run_command;

/// Command-line arguments for ai-news-radar
#[derive(Parser, Debug)]
#[command(name = "ai-news-radar")]
#[command(about = "Push new AI headlines from RSS feeds to a WeCom group robot")]
pub struct Cli {
    /// Config file (default: ./config.toml, then the user config dir)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// History file (overrides `state_file` from the config)
    #[arg(long, global = true)]
    pub state: Option<PathBuf>,

    /// Log level: trace, debug, info, warn or error
    #[arg(long, default_value = "info", global = true)]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Option<Cmd>,
}

/// Subcommands for ai-news-radar
#[derive(Subcommand, Debug)]
pub enum Cmd {
    /// Fetch, push new items and record them (the default)
    Run,

    /// Print what the next run would push, without sending or recording
    Preview,

    /// Show how many items have been delivered and when the last check ran
    Stats,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(&cli.log_level);

    info!("AI News Radar starting");
    match run_command(cli) {
        Ok(()) => {
            info!("AI News Radar finished");
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!("{:#}", err);
            ExitCode::FAILURE
        }
    }
}
