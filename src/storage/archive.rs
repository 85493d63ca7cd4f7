use async_trait::async_trait;
use chrono::Utc;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, RequestBuilder};
use tracing::{debug, info};

use super::{
    BackendError, CheckReport, ObjectMetadata, StorageBackend, StoredObject, response_text,
    validate_target_path,
};

const DEFAULT_ENDPOINT: &str = "https://s3.us.archive.org";
const DEFAULT_DOWNLOAD_BASE: &str = "https://archive.org/download";
const DETAILS_BASE: &str = "https://archive.org/details";

const DIAGNOSTIC_PREFIX: &str = "tws-diagnostic";
const DIAGNOSTIC_FILE: &str = "test.txt";
const DIAGNOSTIC_BODY: &str = "Diagnostic test file from songdrop";

/// Stores files as new Internet Archive items through its S3-like API.
///
/// Each upload creates its own item (bucket) named
/// `{prefix}-{stem}-{unix millis}`.
#[derive(Debug, Clone)]
pub struct InternetArchiveBackend {
    client: Client,
    access_key: String,
    secret_key: String,
    endpoint: String,
    download_base: String,
    identifier_prefix: String,
}

impl InternetArchiveBackend {
    pub const DEFAULT_PREFIX: &'static str = "tws-music";

    pub fn new(client: Client, access_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            client,
            access_key: access_key.into(),
            secret_key: secret_key.into(),
            endpoint: DEFAULT_ENDPOINT.to_owned(),
            download_base: DEFAULT_DOWNLOAD_BASE.to_owned(),
            identifier_prefix: Self::DEFAULT_PREFIX.to_owned(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_identifier_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.identifier_prefix = prefix.into();
        self
    }

    /// Item identifier for `target_path` at `millis`.
    pub fn identifier(&self, target_path: &str, millis: i64) -> String {
        let stem = target_path
            .rsplit_once('.')
            .map_or(target_path, |(stem, _)| stem);
        format!("{}-{}-{}", self.identifier_prefix, stem, millis)
    }

    pub fn download_url(&self, identifier: &str, target_path: &str) -> String {
        format!("{}/{}/{}", self.download_base, identifier, target_path)
    }

    /// Item page on archive.org.
    pub fn details_url(&self, identifier: &str) -> String {
        format!("{DETAILS_BASE}/{identifier}")
    }

    fn put_url(&self, identifier: &str, target_path: &str) -> String {
        format!(
            "{}/{}/{}",
            self.endpoint.trim_end_matches('/'),
            identifier,
            target_path
        )
    }

    /// PUT with S3-style `LOW` auth that creates the item if needed.
    fn authorized_put(&self, url: &str) -> RequestBuilder {
        self.client
            .put(url)
            .header(
                AUTHORIZATION,
                format!("LOW {}:{}", self.access_key, self.secret_key),
            )
            .header("x-archive-auto-make-bucket", "1")
    }
}

#[async_trait]
impl StorageBackend for InternetArchiveBackend {
    fn name(&self) -> &'static str {
        "internet-archive"
    }

    async fn store(
        &self,
        target_path: &str,
        bytes: &[u8],
        metadata: &ObjectMetadata,
    ) -> Result<StoredObject, BackendError> {
        validate_target_path(target_path)?;

        let identifier = self.identifier(target_path, Utc::now().timestamp_millis());
        let url = self.put_url(&identifier, target_path);
        debug!(%url, size = bytes.len(), "uploading to Internet Archive");

        let response = self
            .authorized_put(&url)
            .header("x-archive-meta-title", meta_value(&metadata.title))
            .header("x-archive-meta-creator", meta_value(&metadata.creator))
            .header(CONTENT_TYPE, metadata.content_type.as_str())
            .body(bytes.to_vec())
            .send()
            .await
            .map_err(|source| BackendError::Transport {
                backend: self.name(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(BackendError::Rejected {
                backend: self.name(),
                status: status.as_u16(),
                message: response_text(response).await,
                hint: credentials_hint(status.as_u16()),
            });
        }

        info!(%identifier, path = target_path, "stored on Internet Archive");
        Ok(StoredObject::new(self.download_url(&identifier, target_path))
            .with_page_url(self.details_url(&identifier)))
    }

    /// Upload a small text file to a fresh diagnostic item.
    async fn check(&self) -> Result<CheckReport, BackendError> {
        let identifier = format!("{DIAGNOSTIC_PREFIX}-{}", Utc::now().timestamp_millis());
        let url = self.put_url(&identifier, DIAGNOSTIC_FILE);
        debug!(%url, "checking Internet Archive credentials");

        let response = self
            .authorized_put(&url)
            .header(CONTENT_TYPE, "text/plain")
            .body(DIAGNOSTIC_BODY)
            .send()
            .await
            .map_err(|source| BackendError::Transport {
                backend: self.name(),
                source,
            })?;

        let status = response.status();
        Ok(CheckReport {
            backend: self.name(),
            ok: status.is_success(),
            status: Some(status.as_u16()),
            message: response_text(response).await,
            hint: credentials_hint(status.as_u16()),
            test_url: Some(self.download_url(&identifier, DIAGNOSTIC_FILE)),
        })
    }
}

fn credentials_hint(status: u16) -> Option<String> {
    matches!(status, 401 | 403).then(|| {
        "Check IA_ACCESS_KEY and IA_SECRET_KEY at https://archive.org/account/s3.php".to_owned()
    })
}

/// Bytes kept verbatim in `uri(...)` metadata values.
const META_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Metadata headers must be visible ASCII; anything else goes through the
/// archive's `uri(...)` percent-encoded form.
fn meta_value(value: &str) -> String {
    if value.bytes().all(|b| (0x20..0x7F).contains(&b)) {
        return value.to_owned();
    }
    format!("uri({})", utf8_percent_encode(value, META_ENCODE_SET))
}
