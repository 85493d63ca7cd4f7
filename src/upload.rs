//! The upload endpoint: turns a form submission into a stored song.
//!
//! [`UploadHandler::handle`] parses the body, checks required fields and
//! the shared password, validates the file and hands it to a
//! [`StorageBackend`]. [`UploadHandler::respond`] wraps the outcome in the
//! JSON shape the web front end expects.

use std::fmt;
use std::sync::Arc;

use http::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::error::ParseError;
use crate::parser::{DEFAULT_MAX_BYTES, MultipartConfig, MultipartParser};
use crate::storage::{BackendError, ObjectMetadata, StorageBackend};
use crate::types::{FilePart, ParseResult};

/// Uploader name used when no display name was submitted.
pub const ANONYMOUS: &str = "Anonymous";

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Settings for [`UploadHandler`].
#[derive(Clone)]
pub struct UploadConfig {
    /// Shared password every submission must carry.
    pub password: String,
    /// Largest accepted file in bytes (default: 100 MiB).
    pub max_file_size: usize,
    /// Parser settings.
    pub multipart: MultipartConfig,
}

impl UploadConfig {
    pub fn new(password: impl Into<String>) -> Self {
        Self {
            password: password.into(),
            max_file_size: DEFAULT_MAX_BYTES,
            multipart: MultipartConfig::default(),
        }
    }
}

impl fmt::Debug for UploadConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadConfig")
            .field("password", &"<redacted>")
            .field("max_file_size", &self.max_file_size)
            .field("multipart", &self.multipart)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Reasons an upload is refused.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("Missing required fields")]
    MissingRequiredField(Vec<String>),

    #[error("Invalid upload password")]
    AuthenticationFailure,

    #[error("Only MP3 files are allowed")]
    UnsupportedFile {
        filename: String,
        content_type: String,
    },

    #[error("File too large")]
    FileTooLarge { size: usize, limit: usize },

    #[error("Upload failed")]
    BackendFailure(#[from] BackendError),

    #[error("Method not allowed")]
    MethodNotAllowed,
}

impl UploadError {
    /// HTTP status the error is reported with.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Parse(_)
            | Self::MissingRequiredField(_)
            | Self::UnsupportedFile { .. }
            | Self::FileTooLarge { .. } => StatusCode::BAD_REQUEST,
            Self::AuthenticationFailure => StatusCode::UNAUTHORIZED,
            Self::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            Self::BackendFailure(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Extra context for the `details` member of the response.
    pub fn details(&self) -> Option<String> {
        match self {
            Self::MissingRequiredField(names) => Some(format!("missing: {}", names.join(", "))),
            Self::UnsupportedFile {
                filename,
                content_type,
            } => Some(format!("{filename} ({content_type})")),
            Self::FileTooLarge { size, limit } => Some(format!(
                "file is {:.2}MB, limit is {:.2}MB",
                megabytes(*size),
                megabytes(*limit)
            )),
            Self::BackendFailure(e) => Some(match e.hint() {
                Some(hint) => format!("{e}. {hint}"),
                None => e.to_string(),
            }),
            Self::Parse(_) | Self::AuthenticationFailure | Self::MethodNotAllowed => None,
        }
    }

    pub fn to_response(&self) -> UploadResponse {
        UploadResponse::failure(self.to_string(), self.details())
    }
}

fn megabytes(bytes: usize) -> f64 {
    bytes as f64 / (1024.0 * 1024.0)
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// What a successful upload produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadReceipt {
    /// Public streaming URL.
    pub url: String,
    /// Name the file was stored under.
    pub file_name: String,
    pub short_name: String,
    pub uploaded_by: String,
    /// Host page for the file (GitHub blob view, archive.org item).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_url: Option<String>,
}

/// JSON body returned by the upload endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UploadResponse {
    Success {
        success: bool,
        #[serde(flatten)]
        receipt: UploadReceipt,
        message: String,
    },
    Failure {
        success: bool,
        error: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        details: Option<String>,
    },
}

impl UploadResponse {
    pub fn success(receipt: UploadReceipt) -> Self {
        Self::Success {
            success: true,
            receipt,
            message: "File uploaded successfully!".to_owned(),
        }
    }

    pub fn failure(error: impl Into<String>, details: Option<String>) -> Self {
        Self::Failure {
            success: false,
            error: error.into(),
            details,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { success: true, .. })
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| format!("{{\"success\":false,\"error\":\"{e}\"}}"))
    }
}

/// A validated submission, ready to be stored.
#[derive(Debug, Clone)]
pub struct Submission {
    pub short_name: String,
    pub display_name: Option<String>,
    pub file: FilePart,
}

impl Submission {
    pub fn uploaded_by(&self) -> &str {
        self.display_name.as_deref().unwrap_or(ANONYMOUS)
    }
}

// ---------------------------------------------------------------------------
// Handler
// ---------------------------------------------------------------------------

/// Handles upload requests against one storage backend.
pub struct UploadHandler {
    config: UploadConfig,
    parser: MultipartParser,
    backend: Arc<dyn StorageBackend>,
}

impl UploadHandler {
    pub fn new(config: UploadConfig, backend: Arc<dyn StorageBackend>) -> Self {
        let parser = MultipartParser::with_config(config.multipart.clone());
        Self {
            config,
            parser,
            backend,
        }
    }

    pub fn config(&self) -> &UploadConfig {
        &self.config
    }

    /// Parse, validate and store one upload.
    ///
    /// # Errors
    ///
    /// See [`UploadError`]; a missing `Content-Type` is reported as
    /// [`ParseError::MissingBoundary`].
    pub async fn handle(
        &self,
        content_type: Option<&str>,
        body: &[u8],
    ) -> Result<UploadReceipt, UploadError> {
        let content_type = content_type.ok_or(ParseError::MissingBoundary)?;
        let form = self.parser.parse(body, content_type)?;
        let submission = self.validate(form)?;

        let file_name = target_file_name(&submission.short_name);
        let metadata = ObjectMetadata {
            title: submission.short_name.clone(),
            creator: submission.uploaded_by().to_owned(),
            content_type: submission.file.content_type.clone(),
        };

        let stored = self
            .backend
            .store(&file_name, &submission.file.bytes, &metadata)
            .await
            .inspect_err(|e| error!(backend = self.backend.name(), error = %e, "upload failed"))?;

        info!(
            backend = self.backend.name(),
            url = %stored.url,
            short_name = %submission.short_name,
            size = submission.file.len(),
            "upload stored"
        );

        Ok(UploadReceipt {
            url: stored.url,
            page_url: stored.page_url,
            file_name,
            uploaded_by: submission.uploaded_by().to_owned(),
            short_name: submission.short_name,
        })
    }

    /// Run [`handle`](Self::handle) and map the outcome to a status and body.
    pub async fn respond(
        &self,
        content_type: Option<&str>,
        body: &[u8],
    ) -> (StatusCode, UploadResponse) {
        match self.handle(content_type, body).await {
            Ok(receipt) => (StatusCode::OK, UploadResponse::success(receipt)),
            Err(e) => {
                if !matches!(e, UploadError::BackendFailure(_)) {
                    warn!(error = %e, details = e.details().as_deref(), "upload rejected");
                }
                (e.status(), e.to_response())
            }
        }
    }

    /// Check a parsed form: required fields, password, file type and size.
    pub fn validate(&self, mut form: ParseResult) -> Result<Submission, UploadError> {
        let missing = self.config.multipart.missing_fields(&form);
        if !missing.is_empty() {
            return Err(UploadError::MissingRequiredField(missing));
        }

        let password = form.non_empty_field("password").unwrap_or_default();
        if !constant_time_eq(password.as_bytes(), self.config.password.as_bytes()) {
            return Err(UploadError::AuthenticationFailure);
        }

        let file = form
            .file
            .take()
            .ok_or_else(|| UploadError::MissingRequiredField(vec![self.config.multipart.file_field_name.clone()]))?;

        if !file.is_mp3() {
            return Err(UploadError::UnsupportedFile {
                filename: file.filename,
                content_type: file.content_type,
            });
        }
        if file.len() > self.config.max_file_size {
            return Err(UploadError::FileTooLarge {
                size: file.len(),
                limit: self.config.max_file_size,
            });
        }

        let short_name = form
            .fields
            .remove("shortName")
            .ok_or_else(|| UploadError::MissingRequiredField(vec!["shortName".to_owned()]))?;
        let display_name = form.fields.remove("displayName").filter(|d| !d.is_empty());

        Ok(Submission {
            short_name,
            display_name,
            file,
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Storage name for a song: lower-cased short name with everything outside
/// `[a-z0-9]` replaced by `-`, plus `.mp3`.
///
/// Replacement is per UTF-16 code unit, so a character outside the Basic
/// Multilingual Plane (most emoji) becomes `--`. Names stored by earlier
/// uploaders were built that way.
pub fn target_file_name(short_name: &str) -> String {
    let mut name = String::with_capacity(short_name.len() + 4);
    for c in short_name.chars().flat_map(char::to_lowercase) {
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            name.push(c);
        } else {
            name.extend(std::iter::repeat_n('-', c.len_utf16()));
        }
    }
    name.push_str(".mp3");
    name
}

/// Compare secrets without an early exit on the first differing byte.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_name_sanitising() {
        assert_eq!(target_file_name("Test Song"), "test-song.mp3");
        assert_eq!(target_file_name("DJ_Mix #2!"), "dj-mix--2-.mp3");
        assert_eq!(target_file_name("ÉTÉ"), "-t-.mp3");
    }

    #[test]
    fn astral_characters_become_two_dashes() {
        assert_eq!(target_file_name("Song 🎵"), "song---.mp3");
        assert_eq!(target_file_name("日本"), "--.mp3");
    }

    #[test]
    fn constant_time_eq_matches_plain_eq() {
        assert!(constant_time_eq(b"secret", b"secret"));
        assert!(!constant_time_eq(b"secret", b"secreT"));
        assert!(!constant_time_eq(b"secret", b"secret!"));
        assert!(constant_time_eq(b"", b""));
    }

    #[test]
    fn status_codes() {
        assert_eq!(
            UploadError::from(ParseError::MissingBoundary).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            UploadError::AuthenticationFailure.status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            UploadError::MethodNotAllowed.status(),
            StatusCode::METHOD_NOT_ALLOWED
        );
        assert_eq!(
            UploadError::from(BackendError::InvalidPath("x".into())).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn failure_response_omits_empty_details() {
        let json = UploadError::AuthenticationFailure.to_response().to_json();
        assert_eq!(json, r#"{"success":false,"error":"Invalid upload password"}"#);
    }

    #[test]
    fn config_debug_hides_password() {
        let dbg = format!("{:?}", UploadConfig::new("hunter2"));
        assert!(!dbg.contains("hunter2"));
    }
}
