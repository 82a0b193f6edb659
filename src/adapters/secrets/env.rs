use std::{collections::BTreeMap, sync::Arc};

use async_trait::async_trait;

use crate::config::{EnvSource, ProcessEnv};

use super::{SecretsBackend, SecretsProvider};

/// Reads secrets straight from the environment.
pub struct EnvSecretsProvider {
    env: Arc<dyn EnvSource + Send + Sync>,
    snapshot: Option<BTreeMap<String, String>>,
}

impl Default for EnvSecretsProvider {
    fn default() -> Self {
        Self::process()
    }
}

impl EnvSecretsProvider {
    pub fn process() -> Self {
        Self {
            env: Arc::new(ProcessEnv),
            snapshot: None,
        }
    }

    /// Provider over a fixed set of variables.
    pub fn from_vars(vars: impl IntoIterator<Item = (String, String)>) -> Self {
        let snapshot: BTreeMap<String, String> = vars.into_iter().collect();
        let lookup: std::collections::HashMap<String, String> =
            snapshot.clone().into_iter().collect();
        Self {
            env: Arc::new(lookup),
            snapshot: Some(snapshot),
        }
    }
}

#[async_trait]
impl SecretsProvider for EnvSecretsProvider {
    fn backend(&self) -> SecretsBackend {
        SecretsBackend::Env
    }

    async fn get_secret(&self, name: &str) -> Option<String> {
        self.env.var(name)
    }

    async fn get_all_secrets(&self) -> BTreeMap<String, String> {
        match &self.snapshot {
            Some(vars) => vars.clone(),
            None => std::env::vars().collect(),
        }
    }
}
