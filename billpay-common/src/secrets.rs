use std::collections::HashMap;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_secretsmanager::{config::Region, error::DisplayErrorContext, Client};
use serde_json::Value;

use crate::crypto::CryptoError;

/// Secrets are JSON documents; callers read a single string field out of one.
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// `Ok(None)` when the secret has no string payload or the field is missing.
    async fn get_secret(&self, name: &str, field: &str) -> Result<Option<String>, CryptoError>;
}

pub struct AwsSecretStore {
    client: Client,
}

impl AwsSecretStore {
    pub async fn new(region: &str) -> Self {
        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region.to_owned()))
            .load()
            .await;
        Self {
            client: Client::new(&aws_config),
        }
    }
}

fn secret_field(name: &str, raw: &str, field: &str) -> Result<Option<String>, CryptoError> {
    let document: HashMap<String, Value> =
        serde_json::from_str(raw).map_err(|e| CryptoError::Secret {
            name: name.to_owned(),
            reason: format!("secret is not a JSON object: {e}"),
        })?;
    Ok(document
        .get(field)
        .and_then(Value::as_str)
        .map(str::to_owned))
}

#[async_trait]
impl SecretStore for AwsSecretStore {
    async fn get_secret(&self, name: &str, field: &str) -> Result<Option<String>, CryptoError> {
        let output = self
            .client
            .get_secret_value()
            .secret_id(name)
            .send()
            .await
            .map_err(|e| CryptoError::Secret {
                name: name.to_owned(),
                reason: DisplayErrorContext(&e).to_string(),
            })?;

        match output.secret_string() {
            Some(raw) => secret_field(name, raw, field),
            None => Ok(None),
        }
    }
}

/// Fixed set of secrets, keyed by secret name and field.
#[derive(Default, Clone)]
pub struct StaticSecretStore {
    secrets: HashMap<(String, String), String>,
}

impl StaticSecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_secret(mut self, name: &str, field: &str, value: &str) -> Self {
        self.secrets
            .insert((name.to_owned(), field.to_owned()), value.to_owned());
        self
    }
}

#[async_trait]
impl SecretStore for StaticSecretStore {
    async fn get_secret(&self, name: &str, field: &str) -> Result<Option<String>, CryptoError> {
        Ok(self
            .secrets
            .get(&(name.to_owned(), field.to_owned()))
            .cloned())
    }
}
