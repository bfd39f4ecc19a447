use tracing::info;

use crate::context::AppContext;
use crate::error::DedupError;

/// Archive location for a staged input: the key with the input prefix swapped for the
/// processed prefix.
pub fn processed_key(key: &str, input_path: &str, processed_path: &str) -> String {
    let relative = key.strip_prefix(input_path).unwrap_or(key);
    format!("{processed_path}{relative}")
}

/// Move every input into the processed area, copying before deleting. The original is
/// only deleted once its copy exists, so a failure can leave an object in both places
/// but never in neither.
pub async fn archive_inputs(context: &AppContext, inputs: &[String]) -> Result<(), DedupError> {
    let storage = &context.config.storage;

    for key in inputs {
        let destination = processed_key(key, &storage.input_path, &storage.processed_path);

        context
            .store
            .copy(&storage.input_bucket, key, &destination)
            .await?;
        info!(source = key, destination, "input copied to processed area");

        context.store.delete(&storage.input_bucket, key).await?;
        info!(key, "input removed from staging area");
    }

    Ok(())
}
