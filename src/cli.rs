use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use tracing::Level;

use crate::{config::Config, error::Error, router::SlotId};

/// The command line interface for controller bridge.
#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Cli {
    /// Path to a configuration file
    pub config: Option<PathBuf>,

    /// Serve websockets on this port instead of the configured one
    #[arg(long)]
    pub port: Option<u16>,

    /// How many engines to drive
    #[arg(long, value_enum)]
    pub engine_count: Option<EngineCount>,

    /// With a single engine, which slot it is
    #[arg(long, default_value = "A")]
    pub slot: String,

    /// Log level on stdout
    #[arg(long, default_value_t = Level::INFO)]
    pub log_level: Level,

    /// Also log to daily rotated files in this directory
    #[arg(long)]
    pub log_dir: Option<PathBuf>,

    /// Log level of the log files
    #[arg(long, default_value_t = Level::DEBUG)]
    pub file_log_level: Level,

    /// Subcommands
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// The number of engines driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum EngineCount {
    /// A single engine, see `--slot`.
    #[value(name = "1")]
    One,

    /// Engines A and B.
    #[value(name = "2")]
    Two,
}

/// Commands available in the command line interface.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Examples for user convenience.
    #[clap(subcommand)]
    Examples(Examples),
}

/// Helpful examples for users.
#[derive(Debug, Subcommand, Clone)]
pub enum Examples {
    /// Show an example of a configuration file's contents.
    Config,
}

/// Run a command which does not need the server.
pub fn handle_command(command: Commands) -> Result<(), Error> {
    match command {
        Commands::Examples(example) => match example {
            Examples::Config => {
                println!("{}", Config::example().serialize_pretty()?);
            }
        },
    }

    Ok(())
}

impl Cli {
    /// Apply command line overrides on top of a configuration.
    pub fn apply(&self, mut config: Config) -> Config {
        if let Some(port) = self.port {
            config.websocket.port = port;
        }

        match self.engine_count {
            Some(EngineCount::One) => config = config.with_slots(vec![SlotId::new(&self.slot)]),
            Some(EngineCount::Two) => {
                config = config.with_slots(vec![SlotId::new("A"), SlotId::new("B")])
            }
            None => {}
        }

        config
    }
}
