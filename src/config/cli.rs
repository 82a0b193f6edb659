use std::{collections::BTreeSet, path::PathBuf};

use clap::{Args, Parser, Subcommand, ValueEnum, builder::BoolishValueParser};

use crate::domain::types::JobType;

/// Command-line arguments for the BharatMart binary.
#[derive(Debug, Parser)]
#[command(name = "bharatmart", version, about = "BharatMart API server and workers")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "BHARATMART_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the HTTP API.
    Serve(Box<ServeArgs>),
    /// Run background job consumers.
    Worker(WorkerArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    #[command(flatten)]
    pub deployment: DeploymentOverrides,

    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override the graceful shutdown timeout.
    #[arg(long = "server-graceful-shutdown-seconds", value_name = "SECONDS")]
    pub server_graceful_shutdown_seconds: Option<u64>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,
}

/// Selector overrides shared by every command.
#[derive(Debug, Args, Default, Clone)]
pub struct DeploymentOverrides {
    /// Override the cache backend (memory|redis|oci-cache|memcached).
    #[arg(long = "cache-type", value_name = "TYPE")]
    pub cache_type: Option<String>,

    /// Override the worker backend (in-process|bull-queue|oci-queue|sqs|none).
    #[arg(long = "worker-mode", value_name = "MODE")]
    pub worker_mode: Option<String>,

    /// Override the database backend (supabase|postgresql|oci-autonomous|mysql).
    #[arg(long = "database-type", value_name = "TYPE")]
    pub database_type: Option<String>,
}

#[derive(Debug, Args, Clone)]
pub struct WorkerArgs {
    #[command(flatten)]
    pub deployment: DeploymentOverrides,

    /// Which job queues this process consumes.
    #[arg(
        long = "worker-type",
        env = "WORKER_TYPE",
        value_enum,
        default_value_t = WorkerType::All
    )]
    pub worker_type: WorkerType,

    /// Override the number of concurrent handlers per queue.
    #[arg(long = "concurrency", value_name = "COUNT")]
    pub concurrency: Option<u32>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum WorkerType {
    Email,
    Order,
    Payment,
    All,
}

impl WorkerType {
    pub fn job_types(self) -> BTreeSet<JobType> {
        match self {
            WorkerType::Email => BTreeSet::from([JobType::Email]),
            WorkerType::Order => BTreeSet::from([JobType::Order]),
            WorkerType::Payment => BTreeSet::from([JobType::Payment]),
            WorkerType::All => JobType::ALL.into_iter().collect(),
        }
    }
}
