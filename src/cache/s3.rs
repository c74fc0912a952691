use async_trait::async_trait;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use tracing::{debug, info};

use super::{CacheEntry, CacheStore, Fingerprint};
use crate::error::CacheError;

/// Cache entries stored as `s3://<bucket>/<prefix><fingerprint>.json`.
pub struct S3Cache {
    client: aws_sdk_s3::Client,
    bucket: String,
    prefix: String,
}

impl S3Cache {
    pub fn new(client: aws_sdk_s3::Client, bucket: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
            prefix: prefix.into(),
        }
    }

    pub fn object_key(&self, fingerprint: &Fingerprint) -> String {
        object_key(&self.prefix, fingerprint)
    }
}

fn object_key(prefix: &str, fingerprint: &Fingerprint) -> String {
    format!("{prefix}{fingerprint}.json")
}

#[async_trait]
impl CacheStore for S3Cache {
    async fn get(&self, fingerprint: &Fingerprint) -> Result<Option<CacheEntry>, CacheError> {
        let key = self.object_key(fingerprint);
        debug!(bucket = %self.bucket, key = %key, "Checking cache");

        let output = match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
        {
            Ok(output) => output,
            Err(err) => {
                if err.as_service_error().is_some_and(|e| e.is_no_such_key()) {
                    return Ok(None);
                }
                return Err(CacheError::Backend(format!(
                    "failed to read s3://{}/{key}: {}",
                    self.bucket,
                    DisplayErrorContext(&err)
                )));
            }
        };

        let bytes = output
            .body
            .collect()
            .await
            .map_err(|err| CacheError::Backend(format!("failed to read cache body: {err}")))?
            .into_bytes();
        let entry = serde_json::from_slice::<CacheEntry>(&bytes)?;
        Ok(Some(entry))
    }

    async fn put(&self, fingerprint: &Fingerprint, entry: &CacheEntry) -> Result<(), CacheError> {
        let key = self.object_key(fingerprint);
        let body = serde_json::to_vec(entry)?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .content_type("application/json")
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|err| {
                CacheError::Backend(format!(
                    "failed to write s3://{}/{key}: {}",
                    self.bucket,
                    DisplayErrorContext(&err)
                ))
            })?;

        info!(bucket = %self.bucket, key = %key, "Cached response");
        Ok(())
    }
}
