//! Encryption fan-out: every output collection is serialized, encrypted and uploaded on
//! its own task.
//!
//! The first task to fail fails the stage. Tasks still running at that point are left
//! to finish on their own and their results are ignored.

use std::sync::Arc;

use billpay_common::crypto::CryptoGateway;
use billpay_common::object_store::ObjectStore;
use bytes::Bytes;
use futures::future::try_join_all;
use futures::FutureExt;
use indexmap::IndexMap;
use tracing::info;

use crate::classify::ClassifiedCollections;
use crate::config::{CryptoConfig, StorageConfig};
use crate::context::AppContext;
use crate::error::DedupError;

pub const OUTPUT_CONTENT_TYPE: &str = "application/octet-stream";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collection {
    Merged,
    Collisions,
}

impl Collection {
    pub fn select(self, collections: &ClassifiedCollections) -> &IndexMap<String, String> {
        match self {
            Collection::Merged => &collections.merged,
            Collection::Collisions => &collections.collisions,
        }
    }
}

/// Values in insertion order, one per line, no trailing newline.
pub fn serialize(collection: &IndexMap<String, String>) -> Bytes {
    let body = collection
        .values()
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join("\n");
    Bytes::from(body)
}

pub fn output_key(output_path: &str, collection_name: &str, extension: &str) -> String {
    format!("{output_path}{collection_name}.txt{extension}")
}

pub async fn encrypt_and_upload(
    context: &AppContext,
    collections: Arc<ClassifiedCollections>,
) -> Result<(), DedupError> {
    let outputs = [
        (Collection::Merged, &context.config.output.merged_collection),
        (Collection::Collisions, &context.config.output.collisions_collection),
    ];

    let tasks = outputs.into_iter().map(|(collection, name)| {
        let task = EncryptTask {
            store: context.store.clone(),
            crypto: context.crypto.clone(),
            storage: context.config.storage.clone(),
            crypto_config: context.config.crypto.clone(),
            name: name.clone(),
        };
        let collections = collections.clone();
        let name = name.clone();

        tokio::spawn(async move {
            let payload = serialize(collection.select(&collections));
            task.run(payload).await
        })
        .map(move |joined| match joined {
            Ok(result) => result,
            Err(e) => Err(DedupError::Encryption {
                collection: name,
                reason: format!("encryption task did not complete: {e}"),
            }),
        })
    });

    try_join_all(tasks).await?;
    Ok(())
}

struct EncryptTask {
    store: Arc<dyn ObjectStore>,
    crypto: Arc<dyn CryptoGateway>,
    storage: StorageConfig,
    crypto_config: CryptoConfig,
    name: String,
}

impl EncryptTask {
    async fn run(self, payload: Bytes) -> Result<(), DedupError> {
        let length = payload.len();
        let public_key = self
            .store
            .get(&self.storage.key_pairs_bucket, &self.crypto_config.public_key_path)
            .await
            .map_err(|e| self.failed(e))?;

        let ciphertext = self
            .crypto
            .pgp_encrypt(payload, length, public_key)
            .await
            .map_err(|e| self.failed(e))?;

        let key = output_key(
            &self.storage.output_path,
            &self.name,
            &self.crypto_config.pgp_extension,
        );
        self.store
            .put(&self.storage.output_bucket, &key, ciphertext, OUTPUT_CONTENT_TYPE)
            .await
            .map_err(|e| self.failed(e))?;

        info!(collection = self.name, key, bytes = length, "collection uploaded");
        metrics::counter!("collections_uploaded_total").increment(1);
        Ok(())
    }

    fn failed(&self, error: impl ToString) -> DedupError {
        DedupError::Encryption {
            collection: self.name.clone(),
            reason: error.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use billpay_common::crypto::MemoryCrypto;

    use super::*;
    use crate::test_utils::{staged, HarnessBuilder, OUTPUT_BUCKET};

    fn collections() -> ClassifiedCollections {
        let mut collections = ClassifiedCollections::new();
        collections.merged.insert("a_0".to_owned(), "first".to_owned());
        collections.merged.insert("a_1".to_owned(), "second".to_owned());
        collections.merged.insert("total".to_owned(), "3000003".to_owned());
        collections
            .collisions
            .insert("a_2".to_owned(), "repeated".to_owned());
        collections
    }

    #[test]
    fn test_serialize_joins_values_in_order() {
        assert_eq!(serialize(&collections().merged), "first\nsecond\n3000003");
        assert_eq!(serialize(&IndexMap::new()), "");
    }

    #[test]
    fn test_output_key() {
        assert_eq!(
            output_key("carpeta_salida/", "DIVIDENDOS", ".pgp"),
            "carpeta_salida/DIVIDENDOS.txt.pgp"
        );
    }

    #[tokio::test]
    async fn test_uploads_one_object_per_collection() {
        let harness = HarnessBuilder::new(staged(&[])).build();

        encrypt_and_upload(&harness.context, Arc::new(collections()))
            .await
            .unwrap();

        let merged_key = "carpeta_salida/00000177ACCAVAL_FUSIONADO.txt.pgp";
        let collisions_key = "carpeta_salida/DIVIDENDOS.txt.pgp";
        assert_eq!(
            harness.store.keys(OUTPUT_BUCKET),
            vec![merged_key, collisions_key]
        );

        let merged = harness.store.object(OUTPUT_BUCKET, merged_key).unwrap();
        assert_eq!(
            MemoryCrypto::open(&merged).unwrap(),
            Bytes::from("first\nsecond\n3000003")
        );
        let collisions = harness.store.object(OUTPUT_BUCKET, collisions_key).unwrap();
        assert_eq!(MemoryCrypto::open(&collisions).unwrap(), Bytes::from("repeated"));
        assert_eq!(
            harness.store.content_type(OUTPUT_BUCKET, collisions_key).as_deref(),
            Some(OUTPUT_CONTENT_TYPE)
        );
    }

    #[tokio::test]
    async fn test_empty_collision_report_is_still_uploaded() {
        let harness = HarnessBuilder::new(staged(&[])).build();
        let mut collections = collections();
        collections.collisions.clear();

        encrypt_and_upload(&harness.context, Arc::new(collections))
            .await
            .unwrap();

        let body = harness
            .store
            .object(OUTPUT_BUCKET, "carpeta_salida/DIVIDENDOS.txt.pgp")
            .unwrap();
        assert_eq!(MemoryCrypto::open(&body).unwrap(), Bytes::new());
    }

    #[tokio::test]
    async fn test_encrypt_failure_is_encryption_error() {
        let harness = HarnessBuilder::new(staged(&[]))
            .crypto(MemoryCrypto::new().failing_encrypt())
            .build();

        let result = encrypt_and_upload(&harness.context, Arc::new(collections())).await;

        assert!(matches!(result, Err(DedupError::Encryption { .. })));
    }

    #[tokio::test]
    async fn test_upload_failure_names_the_collection() {
        let store = staged(&[]).fail_on("put", "carpeta_salida/DIVIDENDOS.txt.pgp");
        let harness = HarnessBuilder::new(store).build();

        let result = encrypt_and_upload(&harness.context, Arc::new(collections())).await;

        match result {
            Err(DedupError::Encryption { collection, .. }) => {
                assert_eq!(collection, "DIVIDENDOS")
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
