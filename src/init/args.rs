// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Debug, Parser)]
#[command(name = "taild", about = "Log-tailing daemon", version)]
pub struct Arguments {
    /// Set the log level
    #[arg(long, global = true, env = "TAILD_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Set the log format
    #[arg(
        value_enum,
        long,
        global = true,
        env = "TAILD_LOG_FORMAT",
        default_value = "text"
    )]
    pub log_format: LogFormatArg,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Clone, PartialEq, Eq, ValueEnum)]
pub enum LogFormatArg {
    Text,
    Json,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the daemon
    Start(Box<AgentRun>),

    /// Print the version
    Version,
}

#[derive(Debug, Args, Clone)]
pub struct AgentRun {
    /// Inputs file (YAML, `inputs:` list)
    #[arg(long, env = "TAILD_CONFIG", default_value = "taild.yaml")]
    pub config: PathBuf,

    /// Registry file holding per-file read positions
    #[arg(
        long,
        env = "TAILD_REGISTRY_FILE",
        default_value = "data/registry.json"
    )]
    pub registry_file: PathBuf,

    /// Batching window for registry flushes; 0s flushes after every update
    #[arg(
        long,
        env = "TAILD_REGISTRY_FLUSH",
        default_value = "0s",
        value_parser = humantime::parse_duration
    )]
    pub registry_flush: Duration,

    /// Queue size of the console sink
    #[arg(long, env = "TAILD_SINK_QUEUE_SIZE", default_value = "1024")]
    pub sink_queue_size: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_defaults() {
        let args = Arguments::parse_from(["taild", "start"]);
        match args.command {
            Some(Commands::Start(agent)) => {
                assert_eq!(agent.config, PathBuf::from("taild.yaml"));
                assert_eq!(agent.registry_flush, Duration::ZERO);
                assert_eq!(agent.sink_queue_size, 1024);
            }
            _ => panic!("expected start command"),
        }
    }

    #[test]
    fn test_flush_duration_parses() {
        let args =
            Arguments::parse_from(["taild", "start", "--registry-flush", "2s"]);
        match args.command {
            Some(Commands::Start(agent)) => {
                assert_eq!(agent.registry_flush, Duration::from_secs(2));
            }
            _ => panic!("expected start command"),
        }
    }
}
