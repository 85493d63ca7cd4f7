//! Remote object hosts that uploaded songs are written to.
//!
//! Every backend takes a flat target path (`my-song.mp3`), the file bytes and
//! a little metadata, and answers with the public URL the file can be
//! streamed from.

mod archive;
mod github;
mod local;

pub use archive::InternetArchiveBackend;
pub use github::GitHubBackend;
pub use local::LocalBackend;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

/// Descriptive metadata sent along with an upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMetadata {
    /// Human title, the submitted short name.
    pub title: String,
    /// Uploader display name.
    pub creator: String,
    /// MIME type of the file.
    pub content_type: String,
}

/// Where a stored file can be found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    /// URL the file streams from.
    pub url: String,
    /// Human-facing page for the file, when the host has one.
    pub page_url: Option<String>,
}

impl StoredObject {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            page_url: None,
        }
    }

    pub fn with_page_url(mut self, page_url: impl Into<String>) -> Self {
        self.page_url = Some(page_url.into());
        self
    }
}

/// Outcome of a credentials and reachability check.
///
/// A host that answered but refused is reported with `ok == false`; only
/// transport and local I/O failures are errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckReport {
    pub backend: &'static str,
    pub ok: bool,
    /// HTTP status of the host's answer, for remote backends.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    /// Where the test object (or checked resource) can be viewed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_url: Option<String>,
}

/// A place uploaded files are stored.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    /// Store `bytes` at `target_path` and return where it ended up.
    async fn store(
        &self,
        target_path: &str,
        bytes: &[u8],
        metadata: &ObjectMetadata,
    ) -> Result<StoredObject, BackendError>;

    /// Verify that credentials work and the destination accepts writes.
    async fn check(&self) -> Result<CheckReport, BackendError>;
}

/// Errors raised by storage backends.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("request to {backend} failed: {source}")]
    Transport {
        backend: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{backend} rejected the upload ({status}): {message}")]
    Rejected {
        backend: &'static str,
        status: u16,
        message: String,
        hint: Option<String>,
    },

    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid target path: {0:?}")]
    InvalidPath(String),
}

impl BackendError {
    /// Operator-facing advice for fixing the failure, when there is any.
    pub fn hint(&self) -> Option<&str> {
        match self {
            Self::Rejected { hint, .. } => hint.as_deref(),
            _ => None,
        }
    }
}

/// Read a response body for an error message, falling back to the status.
pub(crate) async fn response_text(response: reqwest::Response) -> String {
    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    match text.trim() {
        "" => status.to_string(),
        trimmed => trimmed.to_owned(),
    }
}

/// Reject paths that could escape the target directory or repository root.
pub(crate) fn validate_target_path(path: &str) -> Result<(), BackendError> {
    let bad = path.is_empty()
        || path.contains(['/', '\\'])
        || path.contains("..")
        || path.chars().any(char::is_control);
    if bad {
        return Err(BackendError::InvalidPath(path.to_owned()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_path_validation() {
        assert!(validate_target_path("my-song.mp3").is_ok());
        for bad in ["", "../x.mp3", "a/b.mp3", "a\\b.mp3", "x\n.mp3"] {
            assert!(
                matches!(validate_target_path(bad), Err(BackendError::InvalidPath(_))),
                "expected {bad:?} to be rejected"
            );
        }
    }

    #[test]
    fn check_report_omits_empty_members() {
        let report = CheckReport {
            backend: "local",
            ok: true,
            status: None,
            message: "writable".into(),
            hint: None,
            test_url: None,
        };
        assert_eq!(
            serde_json::to_string(&report).unwrap(),
            r#"{"backend":"local","ok":true,"message":"writable"}"#
        );
    }

    #[test]
    fn hint_only_for_rejections() {
        let rejected = BackendError::Rejected {
            backend: "github",
            status: 404,
            message: "Not Found".into(),
            hint: Some("create it".into()),
        };
        assert_eq!(rejected.hint(), Some("create it"));
        assert_eq!(BackendError::InvalidPath("x".into()).hint(), None);
    }
}
