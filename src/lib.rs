//! # songdrop
//!
//! Upload endpoint for MP3 files submitted as `multipart/form-data`,
//! usable both as a Rust library and as a CLI/server.
//!
//! The heart of the crate is a **binary-safe multipart/form-data parser**.
//! It works on byte buffers throughout: only part headers and short text
//! values are ever decoded, so file payloads (including bytes in the
//! `0x80..=0xFF` range) come out exactly as they went in.
//!
//! Around it sit an [`UploadHandler`] (field validation, password gate,
//! file naming), pluggable [`StorageBackend`]s (GitHub, Internet Archive,
//! local directory), a hyper based [`server`] and a file-backed song
//! [`Library`].
//!
//! ## Quick start: parsing a form
//!
//! ```rust
//! use songdrop::parse_form;
//!
//! let body = b"--XYZ\r\n\
//!     Content-Disposition: form-data; name=\"shortName\"\r\n\r\n\
//!     Test Song\r\n\
//!     --XYZ\r\n\
//!     Content-Disposition: form-data; name=\"file\"; filename=\"song.mp3\"\r\n\
//!     Content-Type: audio/mpeg\r\n\r\n\
//!     \x00\xFF\x7F\r\n\
//!     --XYZ--\r\n";
//!
//! let form = parse_form(body, "multipart/form-data; boundary=XYZ").unwrap();
//! assert_eq!(form.field("shortName"), Some("Test Song"));
//!
//! let file = form.file.unwrap();
//! assert_eq!(file.filename, "song.mp3");
//! assert_eq!(file.bytes, [0x00, 0xFF, 0x7F]);
//! ```
//!
//! ## Quick start: custom settings
//!
//! ```rust
//! use songdrop::{MultipartConfig, ParseError, parse_form_with_config};
//!
//! let config = MultipartConfig {
//!     max_bytes: 16,
//!     ..MultipartConfig::default()
//! };
//! let err = parse_form_with_config(&[0u8; 32], "multipart/form-data; boundary=b", config)
//!     .unwrap_err();
//! assert!(matches!(err, ParseError::BodyTooLarge { limit: 16, actual: 32 }));
//! ```

mod encoder;
mod error;
mod output;
mod parser;
mod types;

pub mod config;
pub mod library;
pub mod logging;
pub mod server;
pub mod storage;
pub mod upload;

// Re-export public API.
pub use encoder::FormBuilder;
pub use error::ParseError;
pub use library::{Library, LibraryError, SongRecord};
pub use output::{format_debug, format_fields_only, format_json};
pub use parser::{DEFAULT_MAX_BYTES, MultipartConfig, MultipartParser, extract_boundary};
pub use storage::{BackendError, CheckReport, ObjectMetadata, StorageBackend, StoredObject};
pub use types::{FilePart, ParseResult, Part};
pub use upload::{UploadConfig, UploadError, UploadHandler, UploadReceipt, UploadResponse};

/// Parse a **complete** `multipart/form-data` body in one call.
///
/// This is a convenience wrapper around [`MultipartParser`] with default
/// settings.
///
/// # Errors
///
/// Returns [`ParseError`] if the content type declares no boundary or the
/// body exceeds the default size limit.
pub fn parse_form(body: &[u8], content_type: &str) -> Result<ParseResult, ParseError> {
    MultipartParser::new().parse(body, content_type)
}

/// Parse a **complete** body using custom [`MultipartConfig`] settings.
///
/// # Errors
///
/// Returns [`ParseError`] if the content type declares no boundary, the
/// body exceeds the configured limit, or (in strict mode) a part is
/// malformed.
pub fn parse_form_with_config(
    body: &[u8],
    content_type: &str,
    config: MultipartConfig,
) -> Result<ParseResult, ParseError> {
    MultipartParser::with_config(config).parse(body, content_type)
}
