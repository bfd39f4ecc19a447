//! Decryption stage: turns each staged ciphertext into classified records.

use billpay_common::audit::{AuditRecord, FILES_PER_RUN};
use tracing::{info, warn};

use crate::classify::{classify, ClassifiedCollections};
use crate::context::AppContext;
use crate::error::DedupError;

/// Name a staged file is known by: the last path segment of its key without the
/// encryption extension.
pub fn file_base_name(key: &str, extension: &str) -> String {
    let name = key.rsplit('/').next().unwrap_or(key);
    name.strip_suffix(extension).unwrap_or(name).to_owned()
}

/// Decrypt and classify `inputs` in order. The first file fills the `file_1` audit
/// fields; every later one overwrites the `file_2` fields.
pub async fn decrypt_inputs(
    context: &AppContext,
    inputs: &[String],
    collections: &mut ClassifiedCollections,
    audit: &mut AuditRecord,
) -> Result<(), DedupError> {
    audit.files_loaded = FILES_PER_RUN;

    for (position, key) in inputs.iter().enumerate() {
        let file_name = file_base_name(key, &context.config.crypto.pgp_extension);
        let lines = decrypt_file(context, key, &file_name, collections).await?;

        if position == 0 {
            audit.file_name_1 = file_name;
            audit.raw_count_file_1 = lines;
        } else {
            audit.file_name_2 = file_name;
            audit.raw_count_file_2 = lines;
        }
    }

    Ok(())
}

async fn decrypt_file(
    context: &AppContext,
    key: &str,
    file_name: &str,
    collections: &mut ClassifiedCollections,
) -> Result<usize, DedupError> {
    let storage = &context.config.storage;

    let passphrase = resolve_passphrase(context).await?;
    let private_key = context
        .store
        .get(&storage.key_pairs_bucket, &context.config.crypto.private_key_path)
        .await?;
    let ciphertext = context.store.get(&storage.input_bucket, key).await?;

    let plaintext = context
        .crypto
        .pgp_decrypt(ciphertext, &passphrase, private_key)
        .await
        .map_err(|e| DedupError::Decryption {
            file: key.to_owned(),
            reason: e.to_string(),
        })?
        .ok_or_else(|| DedupError::Decryption {
            file: key.to_owned(),
            reason: "no plaintext was produced".to_owned(),
        })?;

    info!(file = key, bytes = plaintext.len(), "file decrypted");
    let lines = classify(file_name, &plaintext[..], collections)?;
    metrics::counter!("records_read_total").increment(lines as u64);
    Ok(lines)
}

/// The configured passphrase is itself encrypted; its key lives in the secret store.
async fn resolve_passphrase(context: &AppContext) -> Result<String, DedupError> {
    let crypto = &context.config.crypto;
    if crypto.pgp_passphrase.is_empty() {
        return Err(DedupError::Configuration);
    }

    let cipher_key = context
        .secrets
        .get_secret(&crypto.cipher_secret_name, &crypto.cipher_secret_key)
        .await
        .map_err(DedupError::key_retrieval)?
        .filter(|key| !key.is_empty())
        .ok_or_else(|| {
            warn!(secret = crypto.cipher_secret_name, "cipher key is missing");
            DedupError::KeyRetrieval(format!(
                "secret {} has no {} field",
                crypto.cipher_secret_name, crypto.cipher_secret_key
            ))
        })?;

    let passphrase = context
        .crypto
        .decrypt(&crypto.pgp_passphrase, &cipher_key)
        .map_err(DedupError::key_retrieval)?;
    if passphrase.is_empty() {
        return Err(DedupError::KeyRetrieval(
            "decrypted passphrase is empty".to_owned(),
        ));
    }
    Ok(passphrase)
}
