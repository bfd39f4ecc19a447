use billpay_common::audit::AuditError;
use billpay_common::crypto::CryptoError;
use billpay_common::object_store::ObjectStoreError;
use thiserror::Error;

use crate::pipeline::Stage;

/// Enumeration of the failures a pipeline stage can raise.
#[derive(Error, Debug)]
pub enum DedupError {
    #[error("the PGP passphrase is not configured")]
    Configuration,
    #[error("failed to retrieve key material: {0}")]
    KeyRetrieval(String),
    #[error("failed to decrypt {file}: {reason}")]
    Decryption { file: String, reason: String },
    #[error("failed to encrypt {collection}: {reason}")]
    Encryption { collection: String, reason: String },
    #[error("object store operation failed: {0}")]
    ObjectStore(#[from] ObjectStoreError),
    #[error("expected exactly 2 input files, found {0}")]
    Precondition(usize),
    #[error("record {record_key} is malformed: {reason}")]
    MalformedRecord { record_key: String, reason: String },
    #[error("failed to read decrypted file {file}: {error}")]
    Read {
        file: String,
        #[source]
        error: std::io::Error,
    },
    #[error("audit row could not be written: {0}")]
    AuditConnection(#[from] AuditError),
}

impl DedupError {
    pub fn key_retrieval(error: CryptoError) -> Self {
        DedupError::KeyRetrieval(error.to_string())
    }
}

/// A stage failure, tagged with the stage that raised it. This is the single fatal error
/// an invocation reports.
#[derive(Error, Debug)]
#[error("pipeline failed while {stage}: {source}")]
pub struct PipelineError {
    pub stage: Stage,
    #[source]
    pub source: DedupError,
}

impl PipelineError {
    pub fn new(stage: Stage, source: DedupError) -> Self {
        Self { stage, source }
    }
}
