//! Secrets capability: environment passthrough or a vault with environment fallback.

mod env;
mod vault;

use std::collections::BTreeMap;

use async_trait::async_trait;
use thiserror::Error;

pub use env::EnvSecretsProvider;
pub use vault::{HttpVaultClient, VaultClient, VaultSecretsProvider};

/// Secret names resolved by [`SecretsProvider::get_all_secrets`] on vault-backed providers.
pub const WELL_KNOWN_SECRETS: [&str; 4] = [
    "SUPABASE_SERVICE_ROLE_KEY",
    "DATABASE_PASSWORD",
    "JWT_SECRET",
    "API_KEY",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretsBackend {
    Env,
    Vault,
}

impl SecretsBackend {
    pub fn as_str(self) -> &'static str {
        match self {
            SecretsBackend::Env => "env",
            SecretsBackend::Vault => "oci-vault",
        }
    }
}

/// Failures of a remote secret store. Never escapes a [`SecretsProvider`].
#[derive(Debug, Error)]
pub enum SecretsError {
    #[error("vault is not configured")]
    NotConfigured,
    #[error("secret `{0}` not found in vault")]
    NotFound(String),
    #[error("vault unreachable: {0}")]
    Connectivity(String),
    #[error("vault returned an unreadable secret: {0}")]
    Decode(String),
}

#[async_trait]
pub trait SecretsProvider: Send + Sync {
    fn backend(&self) -> SecretsBackend;

    async fn get_secret(&self, name: &str) -> Option<String>;

    async fn get_all_secrets(&self) -> BTreeMap<String, String>;
}
