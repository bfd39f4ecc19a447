use std::sync::Arc;

use billpay_common::audit::{AuditSink, PgAuditSink};
use billpay_common::crypto::{CryptoGateway, RemoteCryptoGateway};
use billpay_common::object_store::{ObjectStore, S3Config, S3ObjectStore};
use billpay_common::secrets::{AwsSecretStore, SecretStore};
use eyre::Result;
use tracing::info;

use crate::config::Config;

/// Configuration plus the external services a run talks to. Built once at startup and
/// shared by every run.
pub struct AppContext {
    pub config: Config,
    pub store: Arc<dyn ObjectStore>,
    pub crypto: Arc<dyn CryptoGateway>,
    pub secrets: Arc<dyn SecretStore>,
    pub audit: Arc<dyn AuditSink>,
}

impl AppContext {
    pub fn new(
        config: Config,
        store: Arc<dyn ObjectStore>,
        crypto: Arc<dyn CryptoGateway>,
        secrets: Arc<dyn SecretStore>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            config,
            store,
            crypto,
            secrets,
            audit,
        }
    }

    pub async fn from_config(config: Config) -> Result<Self> {
        let store = S3ObjectStore::from_config(S3Config {
            region: config.storage.aws_region.clone(),
            endpoint: config.storage.s3_endpoint.clone(),
        })
        .await;
        let secrets = AwsSecretStore::new(&config.storage.aws_region).await;
        let crypto = RemoteCryptoGateway::from_url(&config.crypto.crypto_service_url)?;
        let audit = PgAuditSink::connect_lazy(
            &config.audit_table,
            &config.database_url,
            config.max_pg_connections,
        )?;

        info!(
            input_bucket = config.storage.input_bucket,
            output_bucket = config.storage.output_bucket,
            crypto_service = config.crypto.crypto_service_url,
            "context initialized"
        );

        Ok(Self::new(
            config,
            Arc::new(store),
            Arc::new(crypto),
            Arc::new(secrets),
            Arc::new(audit),
        ))
    }
}
