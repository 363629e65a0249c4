//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

/// Command-line arguments for `spider`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "spider",
    version,
    about = "Provision and exercise the Spider task scheduler.",
    long_about = None
)]
pub struct CliArgs {
    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `SPIDER_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL", global = true)]
    pub log_level: Option<LogLevel>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Create the scheduler database, its user, grants and tables.
    InitDb(InitDbArgs),

    /// Create the stream-metadata indexes in the results cache.
    CreateResultsCacheIndices(ResultsCacheArgs),

    /// Run schedulers in-process over the in-memory store and print the
    /// final job status as JSON.
    Simulate(SimulateArgs),
}

#[derive(Debug, Clone, Args)]
pub struct InitDbArgs {
    /// Bootstrap configuration file (TOML).
    #[arg(long, short = 'c', value_name = "PATH")]
    pub config: PathBuf,

    /// Print the statements instead of running them.
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Debug, Clone, Args)]
pub struct ResultsCacheArgs {
    /// URI of the results cache, including the database name.
    #[arg(long, value_name = "URI")]
    pub uri: String,

    /// Collection holding stream metadata.
    #[arg(long, value_name = "NAME")]
    pub stream_collection: String,
}

#[derive(Debug, Clone, Args)]
pub struct SimulateArgs {
    /// Scheduler configuration file (TOML). Defaults are used when omitted.
    #[arg(long, short = 'c', value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Number of scheduler coordinators.
    #[arg(long, default_value_t = 3)]
    pub schedulers: usize,

    /// Number of tasks in the generated job.
    #[arg(long, default_value_t = 12)]
    pub tasks: usize,

    /// Make every K-th function call fail (0 = never).
    #[arg(long, value_name = "K", default_value_t = 0)]
    pub fail_every: usize,

    /// Retry budget of each generated task.
    #[arg(long, default_value_t = 2)]
    pub max_retry: u32,

    /// Give up after this many seconds.
    #[arg(long, default_value_t = 60)]
    pub timeout_secs: u64,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

pub fn parse() -> CliArgs {
    CliArgs::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_db_takes_short_config_flag() {
        let args = CliArgs::try_parse_from(["spider", "init-db", "-c", "clp.toml"]).unwrap();
        match args.command {
            Command::InitDb(init) => {
                assert_eq!(init.config, PathBuf::from("clp.toml"));
                assert!(!init.dry_run);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn results_cache_requires_both_flags() {
        assert!(
            CliArgs::try_parse_from(["spider", "create-results-cache-indices", "--uri", "mongodb://x/db"])
                .is_err()
        );
        let args = CliArgs::try_parse_from([
            "spider",
            "--log-level",
            "debug",
            "create-results-cache-indices",
            "--uri",
            "mongodb://localhost:27017/clp-query-results",
            "--stream-collection",
            "stream-files",
        ])
        .unwrap();
        assert!(matches!(args.log_level, Some(LogLevel::Debug)));
        assert!(matches!(args.command, Command::CreateResultsCacheIndices(_)));
    }

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        CliArgs::command().debug_assert();
    }
}
