use std::fmt;

/// Errors that can occur while parsing a `multipart/form-data` body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// The `Content-Type` header carries no usable `boundary` parameter.
    MissingBoundary,
    /// A part has a `Content-Disposition` header but no parsable `name`.
    ///
    /// Only surfaced when the parser runs in strict mode; otherwise such
    /// parts are skipped.
    MalformedSegment(String),
    /// The body exceeds the configured maximum size.
    BodyTooLarge {
        /// Configured limit in bytes.
        limit: usize,
        /// Actual body length in bytes.
        actual: usize,
    },
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingBoundary => write!(f, "no boundary found in Content-Type"),
            Self::MalformedSegment(reason) => write!(f, "malformed multipart segment: {reason}"),
            Self::BodyTooLarge { limit, actual } => {
                write!(f, "body of {actual} bytes exceeds limit of {limit} bytes")
            }
        }
    }
}

impl std::error::Error for ParseError {}
