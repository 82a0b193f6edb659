//! Deployment-mode selection: which backend each capability uses in this process.
//!
//! The five selectors are resolved once during configuration loading. Unknown values never
//! fail startup; they fall back to the safe default and are kept in
//! [`DeploymentConfig::fallbacks`] so the caller can log them once telemetry is up.

use std::{collections::HashMap, fmt};

use serde::Deserialize;
use tracing::{info, warn};

/// Source of environment-style key/value lookups.
pub trait EnvSource {
    fn var(&self, key: &str) -> Option<String>;
}

/// Reads from the real process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

impl EnvSource for HashMap<String, String> {
    fn var(&self, key: &str) -> Option<String> {
        self.get(key).cloned()
    }
}

/// A closed set of recognised values for one selector variable.
trait Selector: Copy + Default + 'static {
    const KEY: &'static str;

    fn parse(value: &str) -> Option<Self>;
    fn as_str(self) -> &'static str;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeploymentMode {
    #[default]
    SingleVm,
    MultiTier,
    Kubernetes,
}

impl Selector for DeploymentMode {
    const KEY: &'static str = "DEPLOYMENT_MODE";

    fn parse(value: &str) -> Option<Self> {
        match value {
            "single-vm" => Some(Self::SingleVm),
            "multi-tier" => Some(Self::MultiTier),
            "kubernetes" => Some(Self::Kubernetes),
            _ => None,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::SingleVm => "single-vm",
            Self::MultiTier => "multi-tier",
            Self::Kubernetes => "kubernetes",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheType {
    #[default]
    Memory,
    Redis,
    OciCache,
    Memcached,
}

impl Selector for CacheType {
    const KEY: &'static str = "CACHE_TYPE";

    fn parse(value: &str) -> Option<Self> {
        match value {
            "memory" => Some(Self::Memory),
            "redis" => Some(Self::Redis),
            "oci-cache" => Some(Self::OciCache),
            "memcached" => Some(Self::Memcached),
            _ => None,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Redis => "redis",
            Self::OciCache => "oci-cache",
            Self::Memcached => "memcached",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SecretsProviderType {
    #[default]
    Env,
    OciVault,
    AwsSecrets,
    AzureKeyVault,
}

impl Selector for SecretsProviderType {
    const KEY: &'static str = "SECRETS_PROVIDER";

    fn parse(value: &str) -> Option<Self> {
        match value {
            "env" => Some(Self::Env),
            "oci-vault" => Some(Self::OciVault),
            "aws-secrets" => Some(Self::AwsSecrets),
            "azure-keyvault" => Some(Self::AzureKeyVault),
            _ => None,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Env => "env",
            Self::OciVault => "oci-vault",
            Self::AwsSecrets => "aws-secrets",
            Self::AzureKeyVault => "azure-keyvault",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WorkerMode {
    #[default]
    InProcess,
    BullQueue,
    OciQueue,
    Sqs,
    None,
}

impl Selector for WorkerMode {
    const KEY: &'static str = "WORKER_MODE";

    fn parse(value: &str) -> Option<Self> {
        match value {
            "in-process" => Some(Self::InProcess),
            "bull-queue" => Some(Self::BullQueue),
            "oci-queue" => Some(Self::OciQueue),
            "sqs" => Some(Self::Sqs),
            "none" => Some(Self::None),
            _ => None,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::InProcess => "in-process",
            Self::BullQueue => "bull-queue",
            Self::OciQueue => "oci-queue",
            Self::Sqs => "sqs",
            Self::None => "none",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DatabaseType {
    #[default]
    Supabase,
    Postgresql,
    OciAutonomous,
    Mysql,
}

impl Selector for DatabaseType {
    const KEY: &'static str = "DATABASE_TYPE";

    fn parse(value: &str) -> Option<Self> {
        match value {
            "supabase" => Some(Self::Supabase),
            "postgresql" => Some(Self::Postgresql),
            "oci-autonomous" => Some(Self::OciAutonomous),
            "mysql" => Some(Self::Mysql),
            _ => None,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Supabase => "supabase",
            Self::Postgresql => "postgresql",
            Self::OciAutonomous => "oci-autonomous",
            Self::Mysql => "mysql",
        }
    }
}

macro_rules! display_via_as_str {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl fmt::Display for $ty {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    f.write_str(Selector::as_str(*self))
                }
            }
        )+
    };
}

display_via_as_str!(
    DeploymentMode,
    CacheType,
    SecretsProviderType,
    WorkerMode,
    DatabaseType
);

/// A selector value that was not recognised and replaced by its default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigFallback {
    pub key: &'static str,
    pub requested: String,
    pub applied: String,
}

impl fmt::Display for ConfigFallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "unrecognised {}=`{}`, using `{}`",
            self.key, self.requested, self.applied
        )
    }
}

/// Unresolved selector strings as read from files, environment or CLI.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct RawDeploymentSettings {
    pub mode: Option<String>,
    pub cache_type: Option<String>,
    pub secrets_provider: Option<String>,
    pub worker_mode: Option<String>,
    pub database_type: Option<String>,
}

impl RawDeploymentSettings {
    pub fn from_env(env: &dyn EnvSource) -> Self {
        Self {
            mode: env.var(DeploymentMode::KEY),
            cache_type: env.var(CacheType::KEY),
            secrets_provider: env.var(SecretsProviderType::KEY),
            worker_mode: env.var(WorkerMode::KEY),
            database_type: env.var(DatabaseType::KEY),
        }
    }

    /// Overlay values present in `other` on top of `self`.
    pub fn merge(&mut self, other: RawDeploymentSettings) {
        if other.mode.is_some() {
            self.mode = other.mode;
        }
        if other.cache_type.is_some() {
            self.cache_type = other.cache_type;
        }
        if other.secrets_provider.is_some() {
            self.secrets_provider = other.secrets_provider;
        }
        if other.worker_mode.is_some() {
            self.worker_mode = other.worker_mode;
        }
        if other.database_type.is_some() {
            self.database_type = other.database_type;
        }
    }
}

/// Immutable backend selection for the lifetime of the process.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DeploymentConfig {
    pub mode: DeploymentMode,
    pub cache_type: CacheType,
    pub secrets_provider: SecretsProviderType,
    pub worker_mode: WorkerMode,
    pub database_type: DatabaseType,
    pub fallbacks: Vec<ConfigFallback>,
}

impl DeploymentConfig {
    pub fn resolve(raw: &RawDeploymentSettings) -> Self {
        let mut fallbacks = Vec::new();
        let mode = select(raw.mode.as_deref(), &mut fallbacks);
        let cache_type = select(raw.cache_type.as_deref(), &mut fallbacks);
        let secrets_provider = select(raw.secrets_provider.as_deref(), &mut fallbacks);
        let worker_mode = select(raw.worker_mode.as_deref(), &mut fallbacks);
        let database_type = select(raw.database_type.as_deref(), &mut fallbacks);

        Self {
            mode,
            cache_type,
            secrets_provider,
            worker_mode,
            database_type,
            fallbacks,
        }
    }

    pub fn from_env(env: &dyn EnvSource) -> Self {
        Self::resolve(&RawDeploymentSettings::from_env(env))
    }

    pub fn is_single_vm(&self) -> bool {
        self.mode == DeploymentMode::SingleVm
    }

    pub fn is_multi_tier(&self) -> bool {
        self.mode == DeploymentMode::MultiTier
    }

    pub fn is_kubernetes(&self) -> bool {
        self.mode == DeploymentMode::Kubernetes
    }

    /// True when jobs run in dedicated worker processes.
    pub fn should_use_workers(&self) -> bool {
        !matches!(self.worker_mode, WorkerMode::None | WorkerMode::InProcess)
    }

    pub fn should_use_external_cache(&self) -> bool {
        self.cache_type != CacheType::Memory
    }

    /// Emit the selector summary and one warning per fallback.
    pub fn log_summary(&self) {
        for fallback in &self.fallbacks {
            warn!(
                target = "bharatmart::config::deployment",
                key = fallback.key,
                requested = %fallback.requested,
                applied = %fallback.applied,
                failure_kind = "configuration_fallback",
                "unrecognised setting, using default"
            );
        }

        info!(
            target = "bharatmart::config::deployment",
            mode = %self.mode,
            cache = %self.cache_type,
            secrets = %self.secrets_provider,
            workers = %self.worker_mode,
            database = %self.database_type,
            external_cache = self.should_use_external_cache(),
            dedicated_workers = self.should_use_workers(),
            "deployment configuration resolved"
        );
    }
}

fn select<T: Selector>(value: Option<&str>, fallbacks: &mut Vec<ConfigFallback>) -> T {
    let Some(raw) = value else {
        return T::default();
    };
    let normalized = raw.trim().to_ascii_lowercase();
    if normalized.is_empty() {
        return T::default();
    }

    match T::parse(&normalized) {
        Some(parsed) => parsed,
        None => {
            let applied = T::default();
            fallbacks.push(ConfigFallback {
                key: T::KEY,
                requested: raw.to_string(),
                applied: applied.as_str().to_string(),
            });
            applied
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn empty_environment_yields_defaults() {
        let config = DeploymentConfig::from_env(&env(&[]));

        assert_eq!(config.mode, DeploymentMode::SingleVm);
        assert_eq!(config.cache_type, CacheType::Memory);
        assert_eq!(config.secrets_provider, SecretsProviderType::Env);
        assert_eq!(config.worker_mode, WorkerMode::InProcess);
        assert_eq!(config.database_type, DatabaseType::Supabase);
        assert!(config.fallbacks.is_empty());
        assert!(config.is_single_vm());
        assert!(!config.should_use_workers());
        assert!(!config.should_use_external_cache());
    }

    #[test]
    fn recognised_values_are_case_insensitive() {
        let config = DeploymentConfig::from_env(&env(&[
            ("DEPLOYMENT_MODE", "Kubernetes"),
            ("CACHE_TYPE", " oci-cache "),
            ("SECRETS_PROVIDER", "OCI-VAULT"),
            ("WORKER_MODE", "bull-queue"),
            ("DATABASE_TYPE", "postgresql"),
        ]));

        assert!(config.is_kubernetes());
        assert_eq!(config.cache_type, CacheType::OciCache);
        assert_eq!(config.secrets_provider, SecretsProviderType::OciVault);
        assert!(config.should_use_workers());
        assert!(config.should_use_external_cache());
        assert_eq!(config.database_type, DatabaseType::Postgresql);
        assert!(config.fallbacks.is_empty());
    }

    #[test]
    fn unknown_values_fall_back_and_are_recorded() {
        let config = DeploymentConfig::from_env(&env(&[
            ("CACHE_TYPE", "hazelcast"),
            ("WORKER_MODE", "kafka"),
            ("DEPLOYMENT_MODE", "serverless"),
        ]));

        assert_eq!(config.cache_type, CacheType::Memory);
        assert_eq!(config.worker_mode, WorkerMode::InProcess);
        assert_eq!(config.mode, DeploymentMode::SingleVm);
        assert_eq!(config.fallbacks.len(), 3);

        let cache = config
            .fallbacks
            .iter()
            .find(|fallback| fallback.key == "CACHE_TYPE")
            .expect("cache fallback recorded");
        assert_eq!(cache.requested, "hazelcast");
        assert_eq!(cache.applied, "memory");
    }

    #[test]
    fn merge_prefers_present_values() {
        let mut base = RawDeploymentSettings {
            cache_type: Some("redis".into()),
            worker_mode: Some("none".into()),
            ..Default::default()
        };
        base.merge(RawDeploymentSettings {
            worker_mode: Some("bull-queue".into()),
            ..Default::default()
        });

        assert_eq!(base.cache_type.as_deref(), Some("redis"));
        assert_eq!(base.worker_mode.as_deref(), Some("bull-queue"));
    }

    #[test]
    fn workers_disabled_mode_is_not_dedicated() {
        let config = DeploymentConfig::from_env(&env(&[("WORKER_MODE", "none")]));
        assert_eq!(config.worker_mode, WorkerMode::None);
        assert!(!config.should_use_workers());
    }
}
