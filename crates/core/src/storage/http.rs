//! HTTP object storage (S3-style PUT).

use async_trait::async_trait;
use futures::Stream;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::{Body, Client};
use std::path::Path;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use super::error::StorageError;
use super::traits::ObjectStorage;
use super::url::{content_type_for, encode_key, public_url};
use crate::config::HttpStorageConfig;

/// Size of the chunks the request body is streamed in.
const CHUNK_SIZE: usize = 64 * 1024;

/// Uploads objects with `PUT {endpoint}/{bucket}/{key}`.
pub struct HttpStorage {
    client: Client,
    endpoint: String,
    bucket: String,
    token: Option<String>,
    public_url_prefix: String,
}

impl HttpStorage {
    /// Create a new HTTP storage client.
    pub fn new(
        config: &HttpStorageConfig,
        bucket: &str,
        public_url_prefix: &str,
    ) -> Result<Self, StorageError> {
        let mut builder = Client::builder();
        if config.timeout_secs > 0 {
            builder = builder.timeout(Duration::from_secs(config.timeout_secs));
        }
        let client = builder
            .build()
            .map_err(|e| StorageError::RequestFailed(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            bucket: bucket.trim_matches('/').to_string(),
            token: config.token.clone().filter(|t| !t.is_empty()),
            public_url_prefix: public_url_prefix.to_string(),
        })
    }

    /// URL the object is PUT to.
    fn object_url(&self, remote_key: &str) -> String {
        format!(
            "{}/{}/{}",
            self.endpoint,
            urlencoding::encode(&self.bucket),
            encode_key(remote_key)
        )
    }
}

/// Streams a file in chunks, reporting cumulative bytes handed to the
/// transport.
fn file_stream(
    file: File,
    progress_tx: Option<mpsc::Sender<u64>>,
) -> impl Stream<Item = Result<Vec<u8>, std::io::Error>> + Send + 'static {
    futures::stream::try_unfold((file, 0u64, progress_tx), |(mut file, sent, tx)| async move {
        let mut buf = vec![0u8; CHUNK_SIZE];
        let n = file.read(&mut buf).await?;
        if n == 0 {
            return Ok(None);
        }
        buf.truncate(n);

        let sent = sent + n as u64;
        if let Some(ref tx) = tx {
            // Receiver lagging is fine, the next update supersedes this one
            let _ = tx.try_send(sent);
        }
        trace!(bytes = sent, "Streamed chunk");

        Ok::<_, std::io::Error>(Some((buf, (file, sent, tx))))
    })
}

#[async_trait]
impl ObjectStorage for HttpStorage {
    fn name(&self) -> &str {
        "http"
    }

    async fn upload(
        &self,
        local_path: &Path,
        remote_key: &str,
        progress_tx: Option<mpsc::Sender<u64>>,
    ) -> Result<String, StorageError> {
        let file = File::open(local_path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::SourceNotFound {
                    path: local_path.to_path_buf(),
                }
            } else {
                StorageError::Io(e)
            }
        })?;
        let size = file.metadata().await?.len();

        let url = self.object_url(remote_key);
        debug!(url = %url, size, "Uploading object");

        let mut request = self
            .client
            .put(&url)
            .header(CONTENT_TYPE, content_type_for(local_path))
            .header(CONTENT_LENGTH, size)
            .body(Body::wrap_stream(file_stream(file, progress_tx)));

        if let Some(ref token) = self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                StorageError::RequestFailed("request timed out".to_string())
            } else if e.is_connect() {
                StorageError::RequestFailed(format!("connection failed: {}", e))
            } else {
                StorageError::RequestFailed(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StorageError::from_status(
                status.as_u16(),
                body.chars().take(200).collect::<String>(),
            ));
        }

        Ok(public_url(&self.public_url_prefix, remote_key))
    }

    async fn validate(&self) -> Result<(), StorageError> {
        reqwest::Url::parse(&self.endpoint).map_err(|e| {
            StorageError::NotConfigured(format!("invalid endpoint {}: {}", self.endpoint, e))
        })?;
        Ok(())
    }
}
