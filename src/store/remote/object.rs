use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use object_store::{path::Path, ObjectStore, PutPayload};
use url::Url;

use super::ObjectTransport;
use crate::errors::BackendError;

/// One named blob in an object store.
pub struct ObjectStoreTransport {
    store: Arc<dyn ObjectStore>,
    path: Path,
    display: String,
}

impl ObjectStoreTransport {
    pub fn new(store: Arc<dyn ObjectStore>, key: &str, display: impl Into<String>) -> Self {
        Self {
            store,
            path: Path::from(key),
            display: display.into(),
        }
    }

    /// Build from a `TOKENSTORE_OBJECT_URL`. Credentials come from the usual
    /// provider environment variables (`AWS_*`, `GOOGLE_*`, `AZURE_*`).
    pub fn from_url(url: &str, key: &str) -> Result<Self, BackendError> {
        let store = build_object_store(url)?;
        let display = format!("{}/{}", strip_query(url).trim_end_matches('/'), key);
        Ok(Self::new(store, key, display))
    }
}

#[async_trait]
impl ObjectTransport for ObjectStoreTransport {
    fn describe(&self) -> String {
        self.display.clone()
    }

    async fn fetch(&self) -> Result<Option<String>, BackendError> {
        let result = match self.store.get(&self.path).await {
            Ok(result) => result,
            Err(object_store::Error::NotFound { .. }) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let bytes = result.bytes().await?;
        String::from_utf8(bytes.to_vec())
            .map(Some)
            .map_err(|_| BackendError::Malformed("object is not valid UTF-8".into()))
    }

    async fn put(&self, contents: String) -> Result<(), BackendError> {
        let payload = PutPayload::from(Bytes::from(contents));
        self.store.put(&self.path, payload).await?;
        Ok(())
    }
}

fn build_object_store(url: &str) -> Result<Arc<dyn ObjectStore>, BackendError> {
    if url.starts_with("memory://") {
        return Ok(Arc::new(object_store::memory::InMemory::new()));
    }

    if let Some(path) = url.strip_prefix("file://") {
        std::fs::create_dir_all(path)?;
        let store = object_store::local::LocalFileSystem::new_with_prefix(path)?;
        return Ok(Arc::new(store));
    }

    if url.starts_with("http://") || url.starts_with("https://") {
        let store = object_store::http::HttpBuilder::new()
            .with_url(url)
            .build()?;
        return Ok(Arc::new(store));
    }

    let parsed = Url::parse(url)
        .map_err(|e| BackendError::Unavailable(format!("invalid object store URL: {}", e)))?;
    let bucket = parsed
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| BackendError::Unavailable("object store URL has no bucket".into()))?;

    match parsed.scheme() {
        "s3" => {
            let region = query_param(&parsed, "region").unwrap_or_else(|| "us-east-1".to_string());
            let mut builder = object_store::aws::AmazonS3Builder::from_env()
                .with_bucket_name(bucket)
                .with_region(region);
            // Custom endpoint for S3-compatible stores (MinIO, R2).
            if let Some(endpoint) = query_param(&parsed, "endpoint") {
                builder = builder.with_endpoint(endpoint).with_allow_http(true);
            }
            Ok(Arc::new(builder.build()?))
        }
        "gs" => {
            let store = object_store::gcp::GoogleCloudStorageBuilder::from_env()
                .with_bucket_name(bucket)
                .build()?;
            Ok(Arc::new(store))
        }
        "az" => {
            let store = object_store::azure::MicrosoftAzureBuilder::from_env()
                .with_container_name(bucket)
                .build()?;
            Ok(Arc::new(store))
        }
        other => Err(BackendError::Unavailable(format!(
            "unsupported object store scheme: {}",
            other
        ))),
    }
}

fn query_param(url: &Url, key: &str) -> Option<String> {
    url.query_pairs()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.into_owned())
}

fn strip_query(url: &str) -> &str {
    url.split('?').next().unwrap_or(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_missing_then_present() {
        let t = ObjectStoreTransport::from_url("memory://", "tokens.json.enc").unwrap();
        assert!(t.fetch().await.unwrap().is_none());

        t.put("enc:v1:abc".into()).await.unwrap();
        assert_eq!(t.fetch().await.unwrap().as_deref(), Some("enc:v1:abc"));

        t.put("enc:v1:def".into()).await.unwrap();
        assert_eq!(t.fetch().await.unwrap().as_deref(), Some("enc:v1:def"));
    }

    #[tokio::test]
    async fn test_local_filesystem_url() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("file://{}", dir.path().join("store").display());
        let t = ObjectStoreTransport::from_url(&url, "nested/tokens.json.enc").unwrap();

        t.put("payload".into()).await.unwrap();
        assert!(dir.path().join("store/nested/tokens.json.enc").exists());
        assert_eq!(t.fetch().await.unwrap().as_deref(), Some("payload"));
    }

    #[test]
    fn test_describe_drops_query_string() {
        let t = ObjectStoreTransport::new(
            Arc::new(object_store::memory::InMemory::new()),
            "k",
            "placeholder",
        );
        assert_eq!(t.describe(), "placeholder");
        assert_eq!(
            strip_query("s3://bucket?region=eu-west-1&endpoint=http://minio:9000"),
            "s3://bucket"
        );
    }

    #[test]
    fn test_unsupported_scheme() {
        assert!(matches!(
            ObjectStoreTransport::from_url("ftp://bucket", "k"),
            Err(BackendError::Unavailable(_))
        ));
        assert!(ObjectStoreTransport::from_url("not a url", "k").is_err());
    }

    #[test]
    fn test_query_param_decoding() {
        let url = Url::parse("s3://bucket?endpoint=http%3A%2F%2Fminio%3A9000&region=eu-west-1").unwrap();
        assert_eq!(query_param(&url, "endpoint").as_deref(), Some("http://minio:9000"));
        assert_eq!(query_param(&url, "region").as_deref(), Some("eu-west-1"));
        assert!(query_param(&url, "missing").is_none());
    }
}
