//! Configuration layer: typed settings with layered precedence
//! (file → `BHARATMART__*` env → well-known deployment env → CLI).

mod cli;
pub mod deployment;

use std::{net::SocketAddr, num::NonZeroU32, path::PathBuf, str::FromStr, time::Duration};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

pub use cli::{
    CliArgs, Command, DeploymentOverrides, ServeArgs, ServeOverrides, WorkerArgs, WorkerType,
};
pub use deployment::{
    CacheType, ConfigFallback, DatabaseType, DeploymentConfig, DeploymentMode, EnvSource,
    ProcessEnv, RawDeploymentSettings, SecretsProviderType, WorkerMode,
};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "bharatmart";
const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_REDIS_URL: &str = "redis://localhost:6379";
const DEFAULT_CACHE_NAMESPACE: &str = "bharatmart:cache:";
const DEFAULT_QUEUE_NAMESPACE: &str = "bharatmart:queue";
const DEFAULT_REDIS_COMMAND_TIMEOUT_MS: u64 = 2_000;
const DEFAULT_WORKER_CONCURRENCY: u32 = 5;
const DEFAULT_QUEUE_POLL_INTERVAL_MS: u64 = 250;
const DEFAULT_POSTGRES_HOST: &str = "localhost";
const DEFAULT_POSTGRES_PORT: u16 = 5432;
const DEFAULT_POSTGRES_DB: &str = "bharatmart";
const DEFAULT_POSTGRES_USER: &str = "postgres";
const DEFAULT_POSTGRES_MAX_CONNECTIONS: u32 = 10;
const DEFAULT_DATABASE_TIMEOUT_SECS: u64 = 10;

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub deployment: DeploymentConfig,
    pub cache: CacheSettings,
    pub queue: QueueSettings,
    pub database: DatabaseSettings,
    pub vault: VaultSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    pub graceful_shutdown: Duration,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub redis_url: String,
    pub namespace: String,
    pub command_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct QueueSettings {
    pub redis_url: String,
    pub namespace: String,
    pub concurrency: NonZeroU32,
    pub poll_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    pub supabase: SupabaseSettings,
    pub postgres: PostgresSettings,
    pub oracle: OracleSettings,
    pub request_timeout: Duration,
}

#[derive(Debug, Clone, Default)]
pub struct SupabaseSettings {
    pub url: Option<String>,
    pub service_role_key: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PostgresSettings {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: Option<String>,
    pub ssl: bool,
    pub max_connections: NonZeroU32,
}

impl PostgresSettings {
    pub fn connection_url(&self) -> String {
        let mut url = format!("postgresql://{}", self.user);
        if let Some(password) = self.password.as_deref() {
            url.push(':');
            url.push_str(password);
        }
        url.push_str(&format!("@{}:{}/{}", self.host, self.port, self.database));
        if self.ssl {
            url.push_str("?sslmode=require");
        }
        url
    }
}

#[derive(Debug, Clone, Default)]
pub struct OracleSettings {
    pub connection_string: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub wallet_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default)]
pub struct VaultSettings {
    pub ocid: Option<String>,
    pub endpoint: Option<String>,
    pub token: Option<String>,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence.
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    load_from(cli, &ProcessEnv)
}

/// Same as [`load`] with an explicit source for the well-known deployment variables.
pub fn load_from(cli: &CliArgs, env: &dyn EnvSource) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix("BHARATMART").separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;
    raw.apply_environment(env);

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Worker(args)) => raw.apply_worker_overrides(args),
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    deployment: RawDeploymentSettings,
    cache: RawCacheSettings,
    queue: RawQueueSettings,
    supabase: RawSupabaseSettings,
    postgres: RawPostgresSettings,
    oracle: RawOracleSettings,
    vault: RawVaultSettings,
    database: RawDatabaseSettings,
}

impl RawSettings {
    /// Overlay the flat variables the deployment tooling sets (`CACHE_TYPE`, `POSTGRES_HOST`, ...).
    fn apply_environment(&mut self, env: &dyn EnvSource) {
        let var = |key: &str| {
            env.var(key).and_then(|value| {
                let trimmed = value.trim();
                (!trimmed.is_empty()).then(|| trimmed.to_string())
            })
        };

        self.deployment.merge(RawDeploymentSettings::from_env(env));

        if let Some(port) = var("PORT") {
            self.server.port_text = Some(port);
        }
        if let Some(level) = var("LOG_LEVEL") {
            self.logging.level = Some(level);
        }

        if let Some(url) = var("CACHE_REDIS_URL").or_else(|| var("OCI_CACHE_ENDPOINT")) {
            self.cache.redis_url = Some(url);
        }
        if let Some(url) = var("QUEUE_REDIS_URL") {
            self.queue.redis_url = Some(url);
        }
        if let Some(concurrency) = var("WORKER_CONCURRENCY") {
            self.queue.concurrency_text = Some(concurrency);
        }

        if let Some(url) = var("SUPABASE_URL") {
            self.supabase.url = Some(url);
        }
        if let Some(key) = var("SUPABASE_SERVICE_ROLE_KEY") {
            self.supabase.service_role_key = Some(key);
        }

        if let Some(host) = var("POSTGRES_HOST") {
            self.postgres.host = Some(host);
        }
        if let Some(port) = var("POSTGRES_PORT") {
            self.postgres.port_text = Some(port);
        }
        if let Some(db) = var("POSTGRES_DB") {
            self.postgres.database = Some(db);
        }
        if let Some(user) = var("POSTGRES_USER") {
            self.postgres.user = Some(user);
        }
        if let Some(password) = var("POSTGRES_PASSWORD") {
            self.postgres.password = Some(password);
        }
        if let Some(ssl) = var("POSTGRES_SSL") {
            self.postgres.ssl = Some(ssl.eq_ignore_ascii_case("true"));
        }

        if let Some(value) = var("OCI_DB_CONNECTION_STRING") {
            self.oracle.connection_string = Some(value);
        }
        if let Some(value) = var("OCI_DB_USER") {
            self.oracle.user = Some(value);
        }
        if let Some(value) = var("OCI_DB_PASSWORD") {
            self.oracle.password = Some(value);
        }
        if let Some(value) = var("OCI_DB_WALLET_PATH") {
            self.oracle.wallet_path = Some(PathBuf::from(value));
        }

        if let Some(value) = var("OCI_VAULT_OCID") {
            self.vault.ocid = Some(value);
        }
        if let Some(value) = var("OCI_VAULT_ENDPOINT") {
            self.vault.endpoint = Some(value);
        }
        if let Some(value) = var("OCI_VAULT_TOKEN") {
            self.vault.token = Some(value);
        }
    }

    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        self.apply_deployment_overrides(&overrides.deployment);
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
            self.server.port_text = None;
        }
        if let Some(seconds) = overrides.server_graceful_shutdown_seconds {
            self.server.graceful_shutdown_seconds = Some(seconds);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
    }

    fn apply_worker_overrides(&mut self, args: &WorkerArgs) {
        self.apply_deployment_overrides(&args.deployment);
        if let Some(concurrency) = args.concurrency {
            self.queue.concurrency = Some(concurrency);
            self.queue.concurrency_text = None;
        }
        if let Some(level) = args.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
    }

    fn apply_deployment_overrides(&mut self, overrides: &DeploymentOverrides) {
        self.deployment.merge(RawDeploymentSettings {
            cache_type: overrides.cache_type.clone(),
            worker_mode: overrides.worker_mode.clone(),
            database_type: overrides.database_type.clone(),
            ..Default::default()
        });
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            deployment,
            cache,
            queue,
            supabase,
            postgres,
            oracle,
            vault,
            database,
        } = raw;

        let mut fallbacks = Vec::new();
        let server = build_server_settings(server, &mut fallbacks)?;
        let logging = build_logging_settings(logging, &mut fallbacks);
        let mut deployment = DeploymentConfig::resolve(&deployment);
        let cache = build_cache_settings(cache)?;
        let queue = build_queue_settings(queue, &mut fallbacks)?;
        let database =
            build_database_settings(database, supabase, postgres, oracle, &mut fallbacks)?;
        deployment.fallbacks.extend(fallbacks);
        let vault = build_vault_settings(vault);

        Ok(Self {
            server,
            logging,
            deployment,
            cache,
            queue,
            database,
            vault,
        })
    }
}

fn build_server_settings(
    server: RawServerSettings,
    fallbacks: &mut Vec<ConfigFallback>,
) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());

    let port = match server.port_text {
        Some(text) => positive_or_default(&text, "server.port", DEFAULT_PORT, fallbacks),
        None => match server.port.unwrap_or(DEFAULT_PORT) {
            0 => fall_back("server.port", "0", DEFAULT_PORT, fallbacks),
            port => port,
        },
    };

    let addr = parse_socket_addr(&host, port)
        .map_err(|reason| LoadError::invalid("server.addr", reason))?;

    let graceful_secs = server
        .graceful_shutdown_seconds
        .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS);
    if graceful_secs == 0 {
        return Err(LoadError::invalid(
            "server.graceful_shutdown_seconds",
            "must be greater than zero",
        ));
    }

    Ok(ServerSettings {
        addr,
        graceful_shutdown: Duration::from_secs(graceful_secs),
    })
}

fn build_logging_settings(
    logging: RawLoggingSettings,
    fallbacks: &mut Vec<ConfigFallback>,
) -> LoggingSettings {
    let level = match logging.level {
        Some(level) => match LevelFilter::from_str(level.trim()) {
            Ok(parsed) => parsed,
            Err(_) => {
                fallbacks.push(ConfigFallback {
                    key: "logging.level",
                    requested: level,
                    applied: LevelFilter::INFO.to_string(),
                });
                LevelFilter::INFO
            }
        },
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    LoggingSettings { level, format }
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let timeout_ms = cache
        .command_timeout_ms
        .unwrap_or(DEFAULT_REDIS_COMMAND_TIMEOUT_MS);
    if timeout_ms == 0 {
        return Err(LoadError::invalid(
            "cache.command_timeout_ms",
            "must be greater than zero",
        ));
    }

    Ok(CacheSettings {
        redis_url: cache
            .redis_url
            .unwrap_or_else(|| DEFAULT_REDIS_URL.to_string()),
        namespace: cache
            .namespace
            .unwrap_or_else(|| DEFAULT_CACHE_NAMESPACE.to_string()),
        command_timeout: Duration::from_millis(timeout_ms),
    })
}

fn build_queue_settings(
    queue: RawQueueSettings,
    fallbacks: &mut Vec<ConfigFallback>,
) -> Result<QueueSettings, LoadError> {
    let concurrency = match queue.concurrency_text {
        Some(text) => positive_or_default(
            &text,
            "queue.concurrency",
            DEFAULT_WORKER_CONCURRENCY,
            fallbacks,
        ),
        None => match queue.concurrency.unwrap_or(DEFAULT_WORKER_CONCURRENCY) {
            0 => fall_back("queue.concurrency", "0", DEFAULT_WORKER_CONCURRENCY, fallbacks),
            concurrency => concurrency,
        },
    };
    let concurrency = non_zero_u32(concurrency.into(), "queue.concurrency")?;

    let poll_ms = queue
        .poll_interval_ms
        .unwrap_or(DEFAULT_QUEUE_POLL_INTERVAL_MS);
    if poll_ms == 0 {
        return Err(LoadError::invalid(
            "queue.poll_interval_ms",
            "must be greater than zero",
        ));
    }

    let namespace = queue
        .namespace
        .unwrap_or_else(|| DEFAULT_QUEUE_NAMESPACE.to_string());
    if namespace.trim().is_empty() {
        return Err(LoadError::invalid(
            "queue.namespace",
            "namespace must not be empty",
        ));
    }

    Ok(QueueSettings {
        redis_url: queue
            .redis_url
            .unwrap_or_else(|| DEFAULT_REDIS_URL.to_string()),
        namespace,
        concurrency,
        poll_interval: Duration::from_millis(poll_ms),
    })
}

fn build_database_settings(
    database: RawDatabaseSettings,
    supabase: RawSupabaseSettings,
    postgres: RawPostgresSettings,
    oracle: RawOracleSettings,
    fallbacks: &mut Vec<ConfigFallback>,
) -> Result<DatabaseSettings, LoadError> {
    let port = match postgres.port_text {
        Some(text) => positive_or_default(&text, "postgres.port", DEFAULT_POSTGRES_PORT, fallbacks),
        None => postgres.port.unwrap_or(DEFAULT_POSTGRES_PORT),
    };
    let max_connections = non_zero_u32(
        postgres
            .max_connections
            .unwrap_or(DEFAULT_POSTGRES_MAX_CONNECTIONS)
            .into(),
        "postgres.max_connections",
    )?;

    let timeout_secs = database
        .request_timeout_seconds
        .unwrap_or(DEFAULT_DATABASE_TIMEOUT_SECS);
    if timeout_secs == 0 {
        return Err(LoadError::invalid(
            "database.request_timeout_seconds",
            "must be greater than zero",
        ));
    }

    Ok(DatabaseSettings {
        supabase: SupabaseSettings {
            url: supabase.url,
            service_role_key: supabase.service_role_key,
        },
        postgres: PostgresSettings {
            host: postgres
                .host
                .unwrap_or_else(|| DEFAULT_POSTGRES_HOST.to_string()),
            port,
            database: postgres
                .database
                .unwrap_or_else(|| DEFAULT_POSTGRES_DB.to_string()),
            user: postgres
                .user
                .unwrap_or_else(|| DEFAULT_POSTGRES_USER.to_string()),
            password: postgres.password,
            ssl: postgres.ssl.unwrap_or(false),
            max_connections,
        },
        oracle: OracleSettings {
            connection_string: oracle.connection_string,
            user: oracle.user,
            password: oracle.password,
            wallet_path: oracle.wallet_path,
        },
        request_timeout: Duration::from_secs(timeout_secs),
    })
}

fn build_vault_settings(vault: RawVaultSettings) -> VaultSettings {
    VaultSettings {
        ocid: vault.ocid,
        endpoint: vault.endpoint,
        token: vault.token,
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    #[serde(skip)]
    port_text: Option<String>,
    graceful_shutdown_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    redis_url: Option<String>,
    namespace: Option<String>,
    command_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawQueueSettings {
    redis_url: Option<String>,
    namespace: Option<String>,
    concurrency: Option<u32>,
    #[serde(skip)]
    concurrency_text: Option<String>,
    poll_interval_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawDatabaseSettings {
    request_timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSupabaseSettings {
    url: Option<String>,
    service_role_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawPostgresSettings {
    host: Option<String>,
    port: Option<u16>,
    #[serde(skip)]
    port_text: Option<String>,
    database: Option<String>,
    user: Option<String>,
    password: Option<String>,
    ssl: Option<bool>,
    max_connections: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawOracleSettings {
    connection_string: Option<String>,
    user: Option<String>,
    password: Option<String>,
    wallet_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawVaultSettings {
    ocid: Option<String>,
    endpoint: Option<String>,
    token: Option<String>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

/// Parses a positive number, recording a fallback to `default` when the text is
/// malformed or zero.
fn positive_or_default<T>(
    text: &str,
    key: &'static str,
    default: T,
    fallbacks: &mut Vec<ConfigFallback>,
) -> T
where
    T: FromStr + Default + PartialEq + Copy + std::fmt::Display,
{
    match text.trim().parse::<T>() {
        Ok(value) if value != T::default() => value,
        _ => fall_back(key, text, default, fallbacks),
    }
}

fn fall_back<T: Copy + std::fmt::Display>(
    key: &'static str,
    requested: &str,
    default: T,
    fallbacks: &mut Vec<ConfigFallback>,
) -> T {
    fallbacks.push(ConfigFallback {
        key,
        requested: requested.to_string(),
        applied: default.to_string(),
    });
    default
}

fn non_zero_u32(value: u64, key: &'static str) -> Result<NonZeroU32, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }

    let value_u32: u32 = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for u32"))?;

    NonZeroU32::new(value_u32).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[cfg(test)]
mod tests;
