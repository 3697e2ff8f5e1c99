//! Delivery document storage (S3 / R2 through `object_store`)
//!
//! With a `[storage]` section the bucket is reached through the S3 API and
//! uploads/downloads can bypass the service via presigned URLs. Without it
//! documents live in an in-memory store and only the buffered upload path
//! works.

use axum::body::Bytes;
use axum::http::Method;
use object_store::aws::AmazonS3Builder;
use object_store::memory::InMemory;
use object_store::path::Path;
use object_store::signer::Signer;
use object_store::{ObjectStore, PutPayload};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use csops_common::config::StorageConfig;

use super::IntegrationError;

const MAX_FILE_NAME_LEN: usize = 120;

#[derive(Clone)]
pub struct DocumentStore {
    store: Arc<dyn ObjectStore>,
    signer: Option<Arc<dyn Signer>>,
    presign_ttl: Duration,
}

impl DocumentStore {
    pub fn from_config(config: Option<&StorageConfig>) -> Result<Self, IntegrationError> {
        let Some(config) = config else {
            info!("No storage configured, documents are kept in memory");
            return Ok(Self::in_memory());
        };

        let mut builder = AmazonS3Builder::new()
            .with_bucket_name(&config.bucket)
            .with_region(&config.region)
            .with_access_key_id(&config.access_key_id)
            .with_secret_access_key(&config.secret_access_key);
        if let Some(endpoint) = &config.endpoint {
            builder = builder.with_endpoint(endpoint);
        }
        let s3 = Arc::new(builder.build()?);

        info!(bucket = %config.bucket, "Document storage: S3 bucket");
        Ok(Self {
            store: s3.clone(),
            signer: Some(s3),
            presign_ttl: Duration::from_secs(config.presign_ttl_secs),
        })
    }

    pub fn in_memory() -> Self {
        Self {
            store: Arc::new(InMemory::new()),
            signer: None,
            presign_ttl: Duration::from_secs(0),
        }
    }

    pub fn can_sign(&self) -> bool {
        self.signer.is_some()
    }

    async fn sign(&self, method: Method, key: &str) -> Result<Option<String>, IntegrationError> {
        let Some(signer) = &self.signer else {
            return Ok(None);
        };
        let url = signer
            .signed_url(method, &Path::from(key), self.presign_ttl)
            .await?;
        Ok(Some(url.to_string()))
    }

    /// Presigned PUT URL, None when the backend cannot sign
    pub async fn presign_put(&self, key: &str) -> Result<Option<String>, IntegrationError> {
        self.sign(Method::PUT, key).await
    }

    /// Presigned GET URL, None when the backend cannot sign
    pub async fn presign_get(&self, key: &str) -> Result<Option<String>, IntegrationError> {
        self.sign(Method::GET, key).await
    }

    pub async fn put(&self, key: &str, data: Bytes) -> Result<(), IntegrationError> {
        let size = data.len();
        self.store
            .put(&Path::from(key), PutPayload::from(data))
            .await?;
        debug!(key = %key, size, "Stored document object");
        Ok(())
    }

    pub async fn get(&self, key: &str) -> Result<Bytes, IntegrationError> {
        let bytes = self.store.get(&Path::from(key)).await?.bytes().await?;
        Ok(bytes)
    }

    /// Whether the object exists (used to confirm presigned uploads)
    pub async fn exists(&self, key: &str) -> Result<bool, IntegrationError> {
        match self.store.head(&Path::from(key)).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Delete an object; a missing object is not an error
    pub async fn delete(&self, key: &str) -> Result<(), IntegrationError> {
        match self.store.delete(&Path::from(key)).await {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Keep letters, digits, `.`, `-` and `_`; everything else becomes `_`
pub fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name).trim();
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .take(MAX_FILE_NAME_LEN)
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "file".to_string()
    } else {
        cleaned.to_string()
    }
}

/// Object key of a delivery document
pub fn document_key(company_id: &str, delivery_id: &str, document_id: &str, file_name: &str) -> String {
    format!(
        "companies/{}/deliveries/{}/{}/{}",
        company_id,
        delivery_id,
        document_id,
        sanitize_file_name(file_name)
    )
}
