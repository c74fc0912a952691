mod memory;
mod s3;

pub use memory::MemoryCache;
pub use s3::S3Cache;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::error::CacheError;
use crate::query::Query;

// Cache key: hex SHA-256 of the folded question + model id
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn of(query: &Query, model_id: &str) -> Self {
        let folded = query.folded();
        let mut hasher = Sha256::new();
        // length-prefixed so "ab"+"c" and "a"+"bc" never collide
        hasher.update((folded.len() as u64).to_le_bytes());
        hasher.update(folded.as_bytes());
        hasher.update((model_id.len() as u64).to_le_bytes());
        hasher.update(model_id.as_bytes());
        Self(format!("{:x}", hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// Persisted cache entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub question: String,
    pub response: String,
    pub model_id: String,
    // ISO-8601 creation time
    pub timestamp: String,
}

#[async_trait]
pub trait CacheStore: Send + Sync {
    /// `Ok(None)` on a miss; `Err` only when the store itself failed.
    async fn get(&self, fingerprint: &Fingerprint) -> Result<Option<CacheEntry>, CacheError>;

    async fn put(&self, fingerprint: &Fingerprint, entry: &CacheEntry) -> Result<(), CacheError>;
}
