use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::{config::Region, error::DisplayErrorContext, primitives::ByteStream, Client};
use bytes::Bytes;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ObjectStoreError {
    #[error("object not found: s3://{bucket}/{key}")]
    NotFound { bucket: String, key: String },
    #[error("{operation} failed for s3://{bucket}/{key}: {reason}")]
    OperationFailed {
        operation: &'static str,
        bucket: String,
        key: String,
        reason: String,
    },
}

impl ObjectStoreError {
    fn failed(operation: &'static str, bucket: &str, key: &str, reason: impl Into<String>) -> Self {
        ObjectStoreError::OperationFailed {
            operation,
            bucket: bucket.to_owned(),
            key: key.to_owned(),
            reason: reason.into(),
        }
    }

    fn sdk<E: std::error::Error>(
        operation: &'static str,
        bucket: &str,
        key: &str,
        error: &E,
    ) -> Self {
        Self::failed(operation, bucket, key, DisplayErrorContext(error).to_string())
    }
}

/// Byte-level access to buckets. Implementations must be safe to share between the
/// concurrent upload tasks.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// List object keys under `prefix`, in whatever order the store returns them.
    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, ObjectStoreError>;

    async fn get(&self, bucket: &str, key: &str) -> Result<Bytes, ObjectStoreError>;

    async fn put(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        content_type: &str,
    ) -> Result<(), ObjectStoreError>;

    /// Copy an object to another key inside the same bucket.
    async fn copy(
        &self,
        bucket: &str,
        source_key: &str,
        destination_key: &str,
    ) -> Result<(), ObjectStoreError>;

    async fn delete(&self, bucket: &str, key: &str) -> Result<(), ObjectStoreError>;
}

/// Configuration for creating an S3 backed store.
pub struct S3Config {
    pub region: String,
    pub endpoint: Option<String>,
}

pub struct S3ObjectStore {
    client: Client,
}

impl S3ObjectStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Uses the default AWS credential chain. An explicit endpoint switches to path style
    /// addressing so MinIO and localstack work locally.
    pub async fn from_config(config: S3Config) -> Self {
        let region = Region::new(config.region.clone());
        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(region.clone())
            .load()
            .await;

        let mut builder = aws_sdk_s3::config::Builder::from(&aws_config).region(region);
        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }

        info!(
            region = config.region,
            endpoint = ?config.endpoint,
            "S3 object store initialized"
        );

        Self::new(Client::from_conf(builder.build()))
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, ObjectStoreError> {
        debug!(bucket, prefix, "listing keys");
        let mut keys = Vec::new();
        let mut continuation_token = None;
        loop {
            let mut cmd = self.client.list_objects_v2().bucket(bucket).prefix(prefix);
            if let Some(token) = continuation_token {
                cmd = cmd.continuation_token(token);
            }
            let output = cmd
                .send()
                .await
                .map_err(|e| ObjectStoreError::sdk("list", bucket, prefix, &e))?;

            if let Some(contents) = output.contents {
                keys.extend(contents.iter().filter_map(|o| o.key.clone()));
            }
            match output.next_continuation_token {
                Some(token) => continuation_token = Some(token),
                None => break,
            }
        }
        Ok(keys)
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<Bytes, ObjectStoreError> {
        let output = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                let reason = DisplayErrorContext(&e).to_string();
                if let aws_sdk_s3::operation::get_object::GetObjectError::NoSuchKey(_) =
                    e.into_service_error()
                {
                    ObjectStoreError::NotFound {
                        bucket: bucket.to_owned(),
                        key: key.to_owned(),
                    }
                } else {
                    ObjectStoreError::failed("get", bucket, key, reason)
                }
            })?;

        let body = output.body.collect().await.map_err(|e| {
            ObjectStoreError::failed("get", bucket, key, format!("failed to read body: {e}"))
        })?;

        Ok(body.into_bytes())
    }

    async fn put(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        content_type: &str,
    ) -> Result<(), ObjectStoreError> {
        let length = body.len();
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .content_length(length as i64)
            .content_type(content_type)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| ObjectStoreError::sdk("put", bucket, key, &e))?;

        info!(bucket, key, length, "uploaded object");
        Ok(())
    }

    async fn copy(
        &self,
        bucket: &str,
        source_key: &str,
        destination_key: &str,
    ) -> Result<(), ObjectStoreError> {
        let copy_source = format!("{bucket}/{}", urlencoding::encode(source_key));
        self.client
            .copy_object()
            .copy_source(copy_source)
            .bucket(bucket)
            .key(destination_key)
            .send()
            .await
            .map_err(|e| ObjectStoreError::sdk("copy", bucket, source_key, &e))?;
        Ok(())
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<(), ObjectStoreError> {
        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| ObjectStoreError::sdk("delete", bucket, key, &e))?;
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// In-memory store for tests and local runs. Listing is ordered by key.
///
/// Failures can be injected per operation and key (the prefix, for `list`), and every
/// successful mutation is appended to a journal so callers can assert on ordering.
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: Mutex<BTreeMap<(String, String), (Bytes, String)>>,
    failures: HashMap<(&'static str, String), String>,
    journal: Mutex<Vec<String>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_object(self, bucket: &str, key: &str, body: impl Into<Bytes>) -> Self {
        lock(&self.objects).insert(
            (bucket.to_owned(), key.to_owned()),
            (body.into(), "application/octet-stream".to_owned()),
        );
        self
    }

    /// Make `operation` ("list", "get", "put", "copy" or "delete") fail for `key`.
    pub fn fail_on(mut self, operation: &'static str, key: &str) -> Self {
        self.failures
            .insert((operation, key.to_owned()), format!("injected {operation} failure"));
        self
    }

    pub fn object(&self, bucket: &str, key: &str) -> Option<Bytes> {
        lock(&self.objects)
            .get(&(bucket.to_owned(), key.to_owned()))
            .map(|(body, _)| body.clone())
    }

    pub fn content_type(&self, bucket: &str, key: &str) -> Option<String> {
        lock(&self.objects)
            .get(&(bucket.to_owned(), key.to_owned()))
            .map(|(_, content_type)| content_type.clone())
    }

    pub fn keys(&self, bucket: &str) -> Vec<String> {
        lock(&self.objects)
            .keys()
            .filter(|(b, _)| b == bucket)
            .map(|(_, k)| k.clone())
            .collect()
    }

    pub fn journal(&self) -> Vec<String> {
        lock(&self.journal).clone()
    }

    fn check(
        &self,
        operation: &'static str,
        bucket: &str,
        key: &str,
    ) -> Result<(), ObjectStoreError> {
        match self.failures.get(&(operation, key.to_owned())) {
            Some(reason) => Err(ObjectStoreError::failed(operation, bucket, key, reason.clone())),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, ObjectStoreError> {
        self.check("list", bucket, prefix)?;
        Ok(self
            .keys(bucket)
            .into_iter()
            .filter(|key| key.starts_with(prefix))
            .collect())
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<Bytes, ObjectStoreError> {
        self.check("get", bucket, key)?;
        self.object(bucket, key).ok_or_else(|| ObjectStoreError::NotFound {
            bucket: bucket.to_owned(),
            key: key.to_owned(),
        })
    }

    async fn put(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        content_type: &str,
    ) -> Result<(), ObjectStoreError> {
        self.check("put", bucket, key)?;
        lock(&self.objects).insert(
            (bucket.to_owned(), key.to_owned()),
            (body, content_type.to_owned()),
        );
        lock(&self.journal).push(format!("put {bucket}/{key}"));
        Ok(())
    }

    async fn copy(
        &self,
        bucket: &str,
        source_key: &str,
        destination_key: &str,
    ) -> Result<(), ObjectStoreError> {
        self.check("copy", bucket, source_key)?;
        let mut objects = lock(&self.objects);
        let Some(source) = objects.get(&(bucket.to_owned(), source_key.to_owned())).cloned() else {
            return Err(ObjectStoreError::NotFound {
                bucket: bucket.to_owned(),
                key: source_key.to_owned(),
            });
        };
        objects.insert((bucket.to_owned(), destination_key.to_owned()), source);
        lock(&self.journal).push(format!("copy {bucket}/{source_key} -> {destination_key}"));
        Ok(())
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<(), ObjectStoreError> {
        self.check("delete", bucket, key)?;
        lock(&self.objects).remove(&(bucket.to_owned(), key.to_owned()));
        lock(&self.journal).push(format!("delete {bucket}/{key}"));
        Ok(())
    }
}
