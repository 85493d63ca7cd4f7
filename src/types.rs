use std::borrow::Cow;
use std::collections::BTreeMap;

use serde::{Serialize, Serializer};

// ---------------------------------------------------------------------------
// Part
// ---------------------------------------------------------------------------

/// One segment of a multipart body.
///
/// A `Part` borrows from the body it was cut out of; the payload is never
/// decoded, so it is safe to hold arbitrary binary data. Header values are
/// only owned when the header block was not valid UTF-8.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Part<'a> {
    /// The `name` parameter of `Content-Disposition`.
    pub name: Cow<'a, str>,
    /// The `filename` parameter, present only for file parts.
    pub filename: Option<Cow<'a, str>>,
    /// The declared `Content-Type` of the part, if any.
    pub content_type: Option<Cow<'a, str>>,
    /// Raw payload bytes.
    pub payload: &'a [u8],
}

impl Part<'_> {
    /// `true` when the part carries a non-empty `filename`.
    pub fn is_file(&self) -> bool {
        self.filename.is_some()
    }

    /// Payload decoded as text with surrounding whitespace trimmed.
    pub fn text_value(&self) -> String {
        String::from_utf8_lossy(self.payload).trim().to_owned()
    }
}

// ---------------------------------------------------------------------------
// FilePart
// ---------------------------------------------------------------------------

/// The file extracted from a form submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FilePart {
    /// Original filename as sent by the client.
    pub filename: String,
    /// Declared MIME type, or the configured default.
    pub content_type: String,
    /// File content, byte-for-byte.
    #[serde(rename = "size", serialize_with = "serialize_len")]
    pub bytes: Vec<u8>,
}

/// File content is reported by length only; it is never inlined in JSON.
fn serialize_len<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(bytes.len() as u64)
}

impl FilePart {
    /// Size of the file in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// `true` when the file is empty.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// `true` when the file looks like an MP3 by declared type or extension.
    pub fn is_mp3(&self) -> bool {
        self.content_type.to_ascii_lowercase().contains("audio/mpeg")
            || self.filename.to_ascii_lowercase().ends_with(".mp3")
    }
}

// ---------------------------------------------------------------------------
// ParseResult
// ---------------------------------------------------------------------------

/// A fully parsed form submission.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ParseResult {
    /// Text fields keyed by name. A repeated name keeps the last value.
    pub fields: BTreeMap<String, String>,
    /// The extracted file, if a file part was present.
    pub file: Option<FilePart>,
}

impl ParseResult {
    /// Look up a text field by exact name.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    /// Look up a text field, treating an empty value as absent.
    pub fn non_empty_field(&self, name: &str) -> Option<&str> {
        self.field(name).filter(|v| !v.is_empty())
    }

    /// `true` when neither fields nor a file were extracted.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.file.is_none()
    }
}
