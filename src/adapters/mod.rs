//! Capability adapters and their startup wiring.
//!
//! Each capability has one factory with a single `match` over the resolved deployment enum.
//! Factories never fail and never touch the network: unimplemented or misconfigured choices
//! log a warning and fall back to the local default. [`Adapters`] owns the chosen instances
//! for the life of the process.

pub mod cache;
pub mod database;
pub mod secrets;
pub mod workers;

use std::{collections::BTreeSet, sync::Arc, time::Duration};

use tracing::{info, warn};

use crate::{
    config::{
        CacheType, DatabaseSettings, DatabaseType, DeploymentConfig, SecretsProviderType,
        Settings, WorkerMode,
    },
    domain::types::JobType,
    infra::redis::RedisConnector,
};

use self::{
    cache::{CacheAdapter, MemoryCache, RedisCache},
    database::{
        DatabaseAdapter, InstrumentedDatabase, OracleDatabase, PostgresDatabase, SupabaseDatabase,
    },
    secrets::{EnvSecretsProvider, HttpVaultClient, SecretsProvider, VaultClient, VaultSecretsProvider},
    workers::{InProcessWorker, NoOpWorker, QueueWorker, RedisJobStore, WorkerAdapter},
};

const SOURCE: &str = "bharatmart::adapters";

fn unsupported(key: &'static str, requested: &str, applied: &'static str) {
    warn!(
        target = SOURCE,
        key,
        requested,
        applied,
        failure_kind = "configuration_fallback",
        "backend not available in this build, using default"
    );
}

pub fn create_cache_adapter(settings: &Settings) -> Arc<dyn CacheAdapter> {
    let cache_type = settings.deployment.cache_type;
    match cache_type {
        CacheType::Memory => Arc::new(MemoryCache::new()),
        CacheType::Redis | CacheType::OciCache => {
            match RedisConnector::new("cache", &settings.cache.redis_url, settings.cache.command_timeout) {
                Ok(connector) => Arc::new(RedisCache::new(connector, settings.cache.namespace.clone())),
                Err(err) => {
                    warn!(
                        target = SOURCE,
                        error = %err,
                        failure_kind = "configuration_fallback",
                        "remote cache url rejected, using memory cache"
                    );
                    Arc::new(MemoryCache::new())
                }
            }
        }
        CacheType::Memcached => {
            unsupported("CACHE_TYPE", &cache_type.to_string(), "memory");
            Arc::new(MemoryCache::new())
        }
    }
}

pub fn create_secrets_provider(settings: &Settings) -> Arc<dyn SecretsProvider> {
    let provider = settings.deployment.secrets_provider;
    match provider {
        SecretsProviderType::Env => Arc::new(EnvSecretsProvider::process()),
        SecretsProviderType::OciVault => {
            let client = match HttpVaultClient::from_settings(&settings.vault, settings.database.request_timeout) {
                Ok(client) => Some(Arc::new(client) as Arc<dyn VaultClient>),
                Err(secrets::SecretsError::NotConfigured) => None,
                Err(err) => {
                    warn!(
                        target = SOURCE,
                        error = %err,
                        failure_kind = "configuration_fallback",
                        "vault client could not be built, secrets come from the environment"
                    );
                    None
                }
            };
            Arc::new(VaultSecretsProvider::new(client))
        }
        SecretsProviderType::AwsSecrets | SecretsProviderType::AzureKeyVault => {
            unsupported("SECRETS_PROVIDER", &provider.to_string(), "env");
            Arc::new(EnvSecretsProvider::process())
        }
    }
}

/// `job_types` limits which queues a queue-backed worker consumes.
pub fn create_worker_adapter(
    settings: &Settings,
    job_types: BTreeSet<JobType>,
) -> Arc<dyn WorkerAdapter> {
    let mode = settings.deployment.worker_mode;
    match mode {
        WorkerMode::InProcess => Arc::new(InProcessWorker::new()),
        WorkerMode::BullQueue => {
            let queue = &settings.queue;
            match RedisConnector::new("queue", &queue.redis_url, settings.cache.command_timeout) {
                Ok(connector) => {
                    let store = Arc::new(RedisJobStore::new(connector, queue.namespace.clone()));
                    Arc::new(
                        QueueWorker::new(store, queue.concurrency.get() as usize, queue.poll_interval)
                            .with_job_types(job_types),
                    )
                }
                Err(err) => {
                    warn!(
                        target = SOURCE,
                        error = %err,
                        failure_kind = "configuration_fallback",
                        "queue url rejected, running jobs in process"
                    );
                    Arc::new(InProcessWorker::new())
                }
            }
        }
        WorkerMode::OciQueue | WorkerMode::Sqs => {
            unsupported("WORKER_MODE", &mode.to_string(), "in-process");
            Arc::new(InProcessWorker::new())
        }
        WorkerMode::None => Arc::new(NoOpWorker),
    }
}

pub fn create_database_adapter(
    deployment: &DeploymentConfig,
    database: &DatabaseSettings,
) -> Arc<dyn DatabaseAdapter> {
    let timeout = database.request_timeout;
    let supabase = || -> Arc<dyn DatabaseAdapter> {
        Arc::new(SupabaseDatabase::from_settings(&database.supabase, timeout))
    };

    let inner: Arc<dyn DatabaseAdapter> = match deployment.database_type {
        DatabaseType::Supabase => supabase(),
        DatabaseType::Postgresql => match PostgresDatabase::connect_lazy(&database.postgres, timeout) {
            Ok(postgres) => Arc::new(postgres),
            Err(err) => {
                warn!(
                    target = SOURCE,
                    error = %err,
                    failure_kind = "configuration_fallback",
                    "postgres settings rejected, using supabase"
                );
                supabase()
            }
        },
        DatabaseType::OciAutonomous => Arc::new(OracleDatabase::new(database.oracle.clone())),
        DatabaseType::Mysql => {
            unsupported("DATABASE_TYPE", &deployment.database_type.to_string(), "supabase");
            supabase()
        }
    };
    Arc::new(InstrumentedDatabase::new(inner))
}

/// The process-wide adapter instances. Built once at startup, shared by `Arc`, closed on
/// shutdown.
#[derive(Clone)]
pub struct Adapters {
    pub deployment: Arc<DeploymentConfig>,
    pub cache: Arc<dyn CacheAdapter>,
    pub secrets: Arc<dyn SecretsProvider>,
    pub workers: Arc<dyn WorkerAdapter>,
    pub database: Arc<dyn DatabaseAdapter>,
}

impl Adapters {
    /// Build every adapter for the API server.
    pub async fn from_config(settings: &Settings) -> Self {
        Self::build(settings, JobType::ALL.into_iter().collect()).await
    }

    /// Build every adapter for a worker process consuming only `job_types`.
    pub async fn for_workers(settings: &Settings, job_types: BTreeSet<JobType>) -> Self {
        Self::build(settings, job_types).await
    }

    async fn build(settings: &Settings, job_types: BTreeSet<JobType>) -> Self {
        let secrets = create_secrets_provider(settings);
        let database_settings = resolve_credentials(secrets.as_ref(), &settings.database).await;

        let adapters = Self {
            deployment: Arc::new(settings.deployment.clone()),
            cache: create_cache_adapter(settings),
            workers: create_worker_adapter(settings, job_types),
            database: create_database_adapter(&settings.deployment, &database_settings),
            secrets,
        };
        info!(
            target = SOURCE,
            cache = adapters.cache.backend().as_str(),
            secrets = adapters.secrets.backend().as_str(),
            workers = adapters.workers.backend().as_str(),
            database = adapters.database.backend().as_str(),
            "adapters initialised"
        );
        adapters
    }

    /// Close in dependency order: workers drain first so in-flight jobs can still reach the
    /// cache and database.
    pub async fn close(&self, timeout: Duration) {
        let shutdown = async {
            self.workers.close().await;
            self.cache.close().await;
            self.database.close().await;
        };
        if tokio::time::timeout(timeout, shutdown).await.is_err() {
            warn!(
                target = SOURCE,
                timeout_secs = timeout.as_secs(),
                "adapter shutdown did not finish in time"
            );
        } else {
            info!(target = SOURCE, "adapters closed");
        }
    }
}

/// Credentials stored in a secrets backend override the plain settings when the backend is a
/// vault, and fill gaps otherwise.
async fn resolve_credentials(
    secrets: &dyn SecretsProvider,
    database: &DatabaseSettings,
) -> DatabaseSettings {
    let prefer_secrets = secrets.backend() == secrets::SecretsBackend::Vault;
    let mut resolved = database.clone();

    if (prefer_secrets || resolved.supabase.service_role_key.is_none())
        && let Some(key) = secrets.get_secret("SUPABASE_SERVICE_ROLE_KEY").await
    {
        resolved.supabase.service_role_key = Some(key);
    }
    if (prefer_secrets || resolved.postgres.password.is_none())
        && let Some(password) = secrets.get_secret("DATABASE_PASSWORD").await
    {
        resolved.postgres.password = Some(password);
    }
    resolved
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::{
        adapters::{cache::CacheBackend, database::DatabaseBackend, workers::WorkerBackend},
        config::{CliArgs, load_from},
    };

    fn settings(pairs: &[(&str, &str)]) -> Settings {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let cli = CliArgs {
            config_file: None,
            command: None,
        };
        load_from(&cli, &env).expect("settings")
    }

    #[tokio::test]
    async fn defaults_select_local_backends() {
        let settings = settings(&[]);
        assert_eq!(create_cache_adapter(&settings).backend(), CacheBackend::Memory);
        assert_eq!(
            create_worker_adapter(&settings, BTreeSet::new()).backend(),
            WorkerBackend::InProcess
        );
        assert_eq!(
            create_database_adapter(&settings.deployment, &settings.database).backend(),
            DatabaseBackend::Supabase
        );
    }

    #[tokio::test]
    async fn unknown_cache_type_uses_memory() {
        let settings = settings(&[("CACHE_TYPE", "hazelcast")]);
        assert_eq!(settings.deployment.fallbacks.len(), 1);
        assert_eq!(create_cache_adapter(&settings).backend(), CacheBackend::Memory);
    }

    #[tokio::test]
    async fn unimplemented_backends_fall_back() {
        let settings = settings(&[
            ("CACHE_TYPE", "memcached"),
            ("WORKER_MODE", "sqs"),
            ("DATABASE_TYPE", "mysql"),
            ("SECRETS_PROVIDER", "aws-secrets"),
        ]);
        assert_eq!(create_cache_adapter(&settings).backend(), CacheBackend::Memory);
        assert_eq!(
            create_worker_adapter(&settings, BTreeSet::new()).backend(),
            WorkerBackend::InProcess
        );
        assert_eq!(
            create_database_adapter(&settings.deployment, &settings.database).backend(),
            DatabaseBackend::Supabase
        );
        assert_eq!(
            create_secrets_provider(&settings).backend(),
            secrets::SecretsBackend::Env
        );
    }

    #[tokio::test]
    async fn remote_choices_are_built_without_connecting() {
        let settings = settings(&[
            ("CACHE_TYPE", "redis"),
            ("CACHE_REDIS_URL", "redis://127.0.0.1:1"),
            ("WORKER_MODE", "bull-queue"),
            ("WORKER_CONCURRENCY", "2"),
            ("DATABASE_TYPE", "postgresql"),
        ]);
        assert_eq!(create_cache_adapter(&settings).backend(), CacheBackend::Redis);
        assert_eq!(
            create_worker_adapter(&settings, BTreeSet::from([JobType::Email])).backend(),
            WorkerBackend::Queue
        );
        assert_eq!(
            create_database_adapter(&settings.deployment, &settings.database).backend(),
            DatabaseBackend::Postgres
        );
    }

    #[tokio::test]
    async fn invalid_remote_cache_url_degrades_to_memory() {
        let settings = settings(&[("CACHE_TYPE", "oci-cache"), ("OCI_CACHE_ENDPOINT", "not a url")]);
        assert_eq!(create_cache_adapter(&settings).backend(), CacheBackend::Memory);
    }

    #[tokio::test]
    async fn no_worker_mode_discards_jobs() {
        let settings = settings(&[("WORKER_MODE", "none")]);
        assert_eq!(
            create_worker_adapter(&settings, BTreeSet::new()).backend(),
            WorkerBackend::NoOp
        );
    }

    #[tokio::test]
    async fn env_secrets_fill_missing_credentials() {
        let secrets = EnvSecretsProvider::from_vars([
            ("SUPABASE_SERVICE_ROLE_KEY".to_string(), "service-key".to_string()),
            ("DATABASE_PASSWORD".to_string(), "pw".to_string()),
        ]);
        let mut database = settings(&[]).database;
        database.postgres.password = Some("explicit".into());

        let resolved = resolve_credentials(&secrets, &database).await;
        assert_eq!(resolved.supabase.service_role_key.as_deref(), Some("service-key"));
        assert_eq!(resolved.postgres.password.as_deref(), Some("explicit"));
    }
}
