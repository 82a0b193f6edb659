use std::{collections::BTreeMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use dashmap::DashMap;
use serde::Deserialize;
use tracing::{debug, warn};
use url::Url;

use crate::config::{EnvSource, ProcessEnv, VaultSettings};

use super::{SecretsBackend, SecretsError, SecretsProvider, WELL_KNOWN_SECRETS};

const SOURCE: &str = "bharatmart::adapters::secrets::vault";
const SECRET_BY_NAME_PATH: &str = "20190301/secretbundles/actions/getByName";

/// Remote lookup of a single secret value.
#[async_trait]
pub trait VaultClient: Send + Sync {
    async fn fetch(&self, name: &str) -> Result<String, SecretsError>;
}

/// Fetches secret bundles by name from an OCI Vault compatible endpoint.
pub struct HttpVaultClient {
    http: reqwest::Client,
    endpoint: Url,
    vault_id: String,
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SecretBundle {
    secret_bundle_content: SecretBundleContent,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SecretBundleContent {
    #[serde(default)]
    content_type: Option<String>,
    content: String,
}

impl HttpVaultClient {
    /// Returns `NotConfigured` unless both the vault id and endpoint are present.
    pub fn from_settings(settings: &VaultSettings, timeout: Duration) -> Result<Self, SecretsError> {
        let (Some(vault_id), Some(endpoint)) = (settings.ocid.as_ref(), settings.endpoint.as_ref())
        else {
            return Err(SecretsError::NotConfigured);
        };

        let mut endpoint =
            Url::parse(endpoint).map_err(|err| SecretsError::Connectivity(err.to_string()))?;
        if !endpoint.path().ends_with('/') {
            let path = format!("{}/", endpoint.path());
            endpoint.set_path(&path);
        }

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| SecretsError::Connectivity(err.to_string()))?;

        Ok(Self {
            http,
            endpoint,
            vault_id: vault_id.clone(),
            token: settings.token.clone(),
        })
    }

    fn secret_url(&self, name: &str) -> Result<Url, SecretsError> {
        let mut url = self
            .endpoint
            .join(SECRET_BY_NAME_PATH)
            .map_err(|err| SecretsError::Connectivity(err.to_string()))?;
        url.query_pairs_mut()
            .append_pair("secretName", name)
            .append_pair("vaultId", &self.vault_id);
        Ok(url)
    }
}

#[async_trait]
impl VaultClient for HttpVaultClient {
    async fn fetch(&self, name: &str) -> Result<String, SecretsError> {
        let mut request = self.http.post(self.secret_url(name)?);
        if let Some(token) = self.token.as_deref() {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|err| SecretsError::Connectivity(err.to_string()))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(SecretsError::NotFound(name.to_string()));
        }
        let response = response
            .error_for_status()
            .map_err(|err| SecretsError::Connectivity(err.to_string()))?;

        let bundle: SecretBundle = response
            .json()
            .await
            .map_err(|err| SecretsError::Decode(err.to_string()))?;
        decode_bundle(bundle.secret_bundle_content)
    }
}

fn decode_bundle(content: SecretBundleContent) -> Result<String, SecretsError> {
    let is_base64 = content
        .content_type
        .as_deref()
        .is_none_or(|kind| kind.eq_ignore_ascii_case("BASE64"));
    if !is_base64 {
        return Ok(content.content);
    }

    let bytes = STANDARD
        .decode(content.content.as_bytes())
        .map_err(|err| SecretsError::Decode(err.to_string()))?;
    String::from_utf8(bytes).map_err(|err| SecretsError::Decode(err.to_string()))
}

/// Vault-backed provider. Successful fetches are cached for the life of the process; every
/// failure falls back to the environment variable with the same name.
pub struct VaultSecretsProvider {
    client: Option<Arc<dyn VaultClient>>,
    env: Arc<dyn EnvSource + Send + Sync>,
    cache: DashMap<String, String>,
}

impl VaultSecretsProvider {
    pub fn new(client: Option<Arc<dyn VaultClient>>) -> Self {
        Self::with_env(client, Arc::new(ProcessEnv))
    }

    pub fn with_env(
        client: Option<Arc<dyn VaultClient>>,
        env: Arc<dyn EnvSource + Send + Sync>,
    ) -> Self {
        if client.is_none() {
            warn!(
                target = SOURCE,
                "OCI_VAULT_OCID or OCI_VAULT_ENDPOINT not set, secrets will come from the environment"
            );
        }
        Self {
            client,
            env,
            cache: DashMap::new(),
        }
    }

    async fn fetch(&self, name: &str) -> Result<String, SecretsError> {
        match self.client.as_ref() {
            Some(client) => client.fetch(name).await,
            None => Err(SecretsError::NotConfigured),
        }
    }
}

#[async_trait]
impl SecretsProvider for VaultSecretsProvider {
    fn backend(&self) -> SecretsBackend {
        SecretsBackend::Vault
    }

    async fn get_secret(&self, name: &str) -> Option<String> {
        if let Some(cached) = self.cache.get(name) {
            return Some(cached.value().clone());
        }

        match self.fetch(name).await {
            Ok(value) => {
                self.cache.insert(name.to_string(), value.clone());
                debug!(target = SOURCE, secret = name, "secret loaded from vault");
                Some(value)
            }
            Err(SecretsError::NotConfigured) => self.env.var(name),
            Err(err) => {
                warn!(
                    target = SOURCE,
                    secret = name,
                    error = %err,
                    failure_kind = "connectivity",
                    "vault lookup failed, falling back to environment"
                );
                self.env.var(name)
            }
        }
    }

    async fn get_all_secrets(&self) -> BTreeMap<String, String> {
        let mut secrets = BTreeMap::new();
        for name in WELL_KNOWN_SECRETS {
            if let Some(value) = self.get_secret(name).await {
                secrets.insert(name.to_string(), value);
            }
        }
        secrets
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::HashMap,
        sync::atomic::{AtomicUsize, Ordering},
    };

    use super::*;

    struct CountingVault {
        calls: AtomicUsize,
        values: HashMap<String, String>,
    }

    #[async_trait]
    impl VaultClient for CountingVault {
        async fn fetch(&self, name: &str) -> Result<String, SecretsError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.values
                .get(name)
                .cloned()
                .ok_or_else(|| SecretsError::NotFound(name.to_string()))
        }
    }

    fn env(pairs: &[(&str, &str)]) -> Arc<dyn EnvSource + Send + Sync> {
        Arc::new(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<HashMap<_, _>>(),
        )
    }

    #[tokio::test]
    async fn unconfigured_vault_reads_environment() {
        let provider = VaultSecretsProvider::with_env(None, env(&[("X", "from-env")]));
        assert_eq!(provider.get_secret("X").await.as_deref(), Some("from-env"));
        assert_eq!(provider.get_secret("Y").await, None);
    }

    #[tokio::test]
    async fn second_lookup_is_served_from_cache() {
        let vault = Arc::new(CountingVault {
            calls: AtomicUsize::new(0),
            values: HashMap::from([("JWT_SECRET".to_string(), "vaulted".to_string())]),
        });
        let provider = VaultSecretsProvider::with_env(
            Some(vault.clone() as Arc<dyn VaultClient>),
            env(&[("JWT_SECRET", "from-env")]),
        );

        assert_eq!(provider.get_secret("JWT_SECRET").await.as_deref(), Some("vaulted"));
        assert_eq!(provider.get_secret("JWT_SECRET").await.as_deref(), Some("vaulted"));
        assert_eq!(vault.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_lookup_falls_back_and_is_not_cached() {
        let vault = Arc::new(CountingVault {
            calls: AtomicUsize::new(0),
            values: HashMap::new(),
        });
        let provider = VaultSecretsProvider::with_env(
            Some(vault.clone() as Arc<dyn VaultClient>),
            env(&[("API_KEY", "env-key")]),
        );

        assert_eq!(provider.get_secret("API_KEY").await.as_deref(), Some("env-key"));
        assert_eq!(provider.get_secret("API_KEY").await.as_deref(), Some("env-key"));
        assert_eq!(vault.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn all_secrets_only_covers_well_known_names() {
        let provider = VaultSecretsProvider::with_env(
            None,
            env(&[("JWT_SECRET", "j"), ("API_KEY", "a"), ("UNRELATED", "u")]),
        );

        let all = provider.get_all_secrets().await;
        assert_eq!(all.len(), 2);
        assert!(!all.contains_key("UNRELATED"));
    }

    #[test]
    fn base64_bundles_are_decoded() {
        let decoded = decode_bundle(SecretBundleContent {
            content_type: Some("BASE64".into()),
            content: STANDARD.encode("hunter2"),
        })
        .expect("decode");
        assert_eq!(decoded, "hunter2");
    }

    #[test]
    fn missing_settings_mean_not_configured() {
        let result = HttpVaultClient::from_settings(&VaultSettings::default(), Duration::from_secs(1));
        assert!(matches!(result, Err(SecretsError::NotConfigured)));
    }

    #[test]
    fn secret_url_carries_name_and_vault() {
        let client = HttpVaultClient::from_settings(
            &VaultSettings {
                ocid: Some("ocid1.vault.oc1..abc".into()),
                endpoint: Some("https://vault.example.com".into()),
                token: None,
            },
            Duration::from_secs(1),
        )
        .expect("configured");
        let url = client.secret_url("DB PASSWORD").expect("url");
        assert_eq!(
            url.as_str(),
            "https://vault.example.com/20190301/secretbundles/actions/getByName?secretName=DB+PASSWORD&vaultId=ocid1.vault.oc1..abc"
        );
    }
}
