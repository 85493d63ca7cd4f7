use std::borrow::Cow;

use tracing::{debug, trace};

use crate::error::ParseError;
use crate::types::{FilePart, ParseResult, Part};

/// Default body limit (100 MiB), matching the largest accepted MP3.
pub const DEFAULT_MAX_BYTES: usize = 100 * 1024 * 1024;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Settings for [`MultipartParser`].
#[derive(Debug, Clone)]
pub struct MultipartConfig {
    /// Name of the field whose file part is extracted (default: `file`).
    pub file_field_name: String,
    /// Field names reported by [`MultipartConfig::missing_fields`].
    ///
    /// The parser itself never rejects a body for a missing field.
    pub required_fields: Vec<String>,
    /// Maximum body size in bytes (default: 100 MiB).
    pub max_bytes: usize,
    /// MIME type assumed for a file part without `Content-Type`
    /// (default: `audio/mpeg`).
    pub default_file_content_type: String,
    /// Abort on malformed parts instead of skipping them (default: `false`).
    pub strict: bool,
}

impl Default for MultipartConfig {
    fn default() -> Self {
        Self {
            file_field_name: "file".to_owned(),
            required_fields: vec!["shortName".into(), "password".into(), "file".into()],
            max_bytes: DEFAULT_MAX_BYTES,
            default_file_content_type: "audio/mpeg".to_owned(),
            strict: false,
        }
    }
}

impl MultipartConfig {
    /// Required fields that `result` lacks, in configured order.
    ///
    /// A text field counts as missing when absent or empty; the file field
    /// counts as missing when no file was extracted.
    pub fn missing_fields(&self, result: &ParseResult) -> Vec<String> {
        self.required_fields
            .iter()
            .filter(|name| {
                if **name == self.file_field_name {
                    result.file.is_none()
                } else {
                    result.non_empty_field(name).is_none()
                }
            })
            .cloned()
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Boundary
// ---------------------------------------------------------------------------

/// Extract the `boundary` parameter from a `Content-Type` header value.
///
/// The value runs up to the next `;` or the end of the header. Surrounding
/// whitespace and one pair of double quotes are removed.
///
/// # Errors
///
/// Returns [`ParseError::MissingBoundary`] when the parameter is absent or
/// empty.
pub fn extract_boundary(content_type: &str) -> Result<&str, ParseError> {
    for param in content_type.split(';') {
        let Some((key, value)) = param.split_once('=') else {
            continue;
        };
        if !key.trim().eq_ignore_ascii_case("boundary") {
            continue;
        }

        let value = unquote(value.trim());
        if value.is_empty() {
            return Err(ParseError::MissingBoundary);
        }
        return Ok(value);
    }
    Err(ParseError::MissingBoundary)
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

/// A one-shot parser for fully buffered `multipart/form-data` bodies.
///
/// The body is handled as bytes throughout. Only part headers and the
/// values of text fields are decoded, so file payloads come out exactly as
/// they went in.
///
/// ```rust
/// use songdrop::MultipartParser;
///
/// let body = b"--XYZ\r\n\
///     Content-Disposition: form-data; name=\"shortName\"\r\n\r\n\
///     Test Song\r\n\
///     --XYZ--\r\n";
///
/// let result = MultipartParser::new()
///     .parse(body, "multipart/form-data; boundary=XYZ")
///     .unwrap();
/// assert_eq!(result.field("shortName"), Some("Test Song"));
/// assert!(result.file.is_none());
/// ```
#[derive(Debug, Clone, Default)]
pub struct MultipartParser {
    config: MultipartConfig,
}

impl MultipartParser {
    /// Create a parser with default configuration.
    pub fn new() -> Self {
        Self::with_config(MultipartConfig::default())
    }

    /// Create a parser with custom settings.
    pub fn with_config(config: MultipartConfig) -> Self {
        Self { config }
    }

    /// The active configuration.
    pub fn config(&self) -> &MultipartConfig {
        &self.config
    }

    /// Parse `body` using the boundary declared in `content_type`.
    ///
    /// Text fields land in [`ParseResult::fields`] (a repeated name keeps
    /// its last value). The first part named after the configured file
    /// field that carries a `filename` becomes [`ParseResult::file`]; later
    /// file parts under the same name are ignored.
    ///
    /// A body with no recognisable parts yields an empty result.
    ///
    /// # Errors
    ///
    /// - [`ParseError::BodyTooLarge`] if the body exceeds `max_bytes`.
    /// - [`ParseError::MissingBoundary`] if no boundary is declared.
    /// - [`ParseError::MalformedSegment`] in strict mode only.
    pub fn parse(&self, body: &[u8], content_type: &str) -> Result<ParseResult, ParseError> {
        if body.len() > self.config.max_bytes {
            return Err(ParseError::BodyTooLarge {
                limit: self.config.max_bytes,
                actual: body.len(),
            });
        }

        let boundary = extract_boundary(content_type)?;
        let mut result = ParseResult::default();

        for part in self.split_parts(body, boundary)? {
            self.collect(&mut result, part);
        }

        debug!(
            fields = result.fields.len(),
            file_size = result.file.as_ref().map_or(0, FilePart::len),
            "parsed multipart body"
        );
        Ok(result)
    }

    /// Cut `body` into named parts without interpreting them.
    ///
    /// Segments lacking `Content-Disposition` are dropped. Segments with a
    /// disposition but no usable `name` are dropped too, unless the parser
    /// is strict.
    pub fn split_parts<'a>(
        &self,
        body: &'a [u8],
        boundary: &str,
    ) -> Result<Vec<Part<'a>>, ParseError> {
        let mut parts = Vec::new();

        for segment in Segments::new(body, boundary) {
            match parse_segment(segment) {
                Ok(Some(part)) => parts.push(part),
                Ok(None) => trace!(len = segment.len(), "segment without Content-Disposition"),
                Err(e) if self.config.strict => return Err(e),
                Err(e) => debug!(error = %e, "skipping segment"),
            }
        }

        Ok(parts)
    }

    fn collect(&self, result: &mut ParseResult, part: Part<'_>) {
        match &part.filename {
            Some(filename) if *part.name == *self.config.file_field_name => {
                if result.file.is_some() {
                    debug!(filename = %filename, "ignoring additional file part");
                    return;
                }
                let content_type = part
                    .content_type
                    .as_deref()
                    .unwrap_or(self.config.default_file_content_type.as_str());
                result.file = Some(FilePart {
                    filename: filename.clone().into_owned(),
                    content_type: content_type.to_owned(),
                    bytes: part.payload.to_vec(),
                });
            }
            _ => {
                result.fields.insert(part.name.clone().into_owned(), part.text_value());
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Segment splitting
// ---------------------------------------------------------------------------

/// Iterator over the raw segments between `--<boundary>` delimiters.
///
/// The preamble and everything after the close delimiter are skipped. A
/// body cut off before its close delimiter still yields its last segment.
struct Segments<'a> {
    body: &'a [u8],
    delimiter: Vec<u8>,
    /// Offset just past the most recent delimiter.
    cursor: Option<usize>,
}

impl<'a> Segments<'a> {
    fn new(body: &'a [u8], boundary: &str) -> Self {
        let delimiter = format!("--{boundary}").into_bytes();
        let cursor = twoway::find_bytes(body, &delimiter).map(|i| i + delimiter.len());
        Self {
            body,
            delimiter,
            cursor,
        }
    }
}

impl<'a> Iterator for Segments<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<&'a [u8]> {
        let start = self.cursor?;
        let rest = &self.body[start..];

        if rest.starts_with(b"--") {
            self.cursor = None;
            return None;
        }

        match twoway::find_bytes(rest, &self.delimiter) {
            Some(i) => {
                self.cursor = Some(start + i + self.delimiter.len());
                Some(&rest[..i])
            }
            None => {
                self.cursor = None;
                Some(rest)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Segment parsing
// ---------------------------------------------------------------------------

/// Turn one raw segment into a [`Part`].
///
/// Returns `Ok(None)` for segments that carry no `Content-Disposition`.
fn parse_segment(segment: &[u8]) -> Result<Option<Part<'_>>, ParseError> {
    let (segment, line_end) = skip_delimiter_line_end(segment);

    let Some((head, payload)) = split_head(segment) else {
        if contains_ignore_ascii_case(segment, b"content-disposition") {
            return Err(ParseError::MalformedSegment(
                "no blank line after part headers".into(),
            ));
        }
        return Ok(None);
    };
    let payload = line_end.trim(payload);

    // Header tokens are ASCII; other bytes (e.g. a Latin-1 filename) are
    // replaced rather than rejected.
    let part = match String::from_utf8_lossy(head) {
        Cow::Borrowed(head) => read_head(head)?.map(|h| h.into_part(payload, Cow::Borrowed)),
        Cow::Owned(head) => {
            debug!("part headers are not valid UTF-8");
            read_head(&head)?.map(|h| h.into_part(payload, |s| Cow::Owned(s.to_owned())))
        }
    };
    Ok(part)
}

/// The header values of one part, borrowed from its decoded header block.
struct PartHead<'h> {
    name: &'h str,
    filename: Option<&'h str>,
    content_type: Option<&'h str>,
}

impl<'h> PartHead<'h> {
    fn into_part<'a>(self, payload: &'a [u8], text: impl Fn(&'h str) -> Cow<'a, str>) -> Part<'a> {
        Part {
            name: text(self.name),
            filename: self.filename.map(&text),
            content_type: self.content_type.map(&text),
            payload,
        }
    }
}

fn read_head(head: &str) -> Result<Option<PartHead<'_>>, ParseError> {
    let mut disposition = None;
    let mut content_type = None;
    for line in head.lines() {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let name = name.trim();
        if name.eq_ignore_ascii_case("content-disposition") {
            disposition = Some(value.trim());
        } else if name.eq_ignore_ascii_case("content-type") {
            content_type = Some(value.trim()).filter(|v| !v.is_empty());
        }
    }

    let Some(disposition) = disposition else {
        return Ok(None);
    };

    let name = disposition_param(disposition, "name")
        .filter(|n| !n.is_empty())
        .ok_or_else(|| {
            ParseError::MalformedSegment(format!("no name in Content-Disposition: {disposition}"))
        })?;
    let filename = disposition_param(disposition, "filename").filter(|f| !f.is_empty());

    Ok(Some(PartHead {
        name,
        filename,
        content_type,
    }))
}

/// Line terminator that followed the opening delimiter of a segment.
///
/// The same terminator precedes the next delimiter, so it is the only one
/// stripped from the end of the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineEnd {
    CrLf,
    Lf,
    /// No terminator after the delimiter; either kind is stripped.
    Unknown,
}

impl LineEnd {
    fn trim(self, payload: &[u8]) -> &[u8] {
        let stripped = match self {
            Self::CrLf => payload.strip_suffix(b"\r\n"),
            Self::Lf => payload.strip_suffix(b"\n"),
            Self::Unknown => payload
                .strip_suffix(b"\r\n")
                .or_else(|| payload.strip_suffix(b"\n")),
        };
        stripped.unwrap_or(payload)
    }
}

/// Skip transport padding and the line break that follow a delimiter.
fn skip_delimiter_line_end(segment: &[u8]) -> (&[u8], LineEnd) {
    let padding = segment
        .iter()
        .take_while(|&&b| b == b' ' || b == b'\t')
        .count();
    let rest = &segment[padding..];

    if let Some(rest) = rest.strip_prefix(b"\r\n") {
        (rest, LineEnd::CrLf)
    } else if let Some(rest) = rest.strip_prefix(b"\n") {
        (rest, LineEnd::Lf)
    } else {
        (segment, LineEnd::Unknown)
    }
}

/// Split a segment at the first blank line into header block and payload.
fn split_head(segment: &[u8]) -> Option<(&[u8], &[u8])> {
    let crlf = twoway::find_bytes(segment, b"\r\n\r\n").map(|i| (i, 4));
    let lf = twoway::find_bytes(segment, b"\n\n").map(|i| (i, 2));

    let (at, len) = match (crlf, lf) {
        (Some(c), Some(l)) => {
            if l.0 < c.0 {
                l
            } else {
                c
            }
        }
        (c, l) => c.or(l)?,
    };

    Some((&segment[..at], &segment[at + len..]))
}

fn contains_ignore_ascii_case(haystack: &[u8], needle: &[u8]) -> bool {
    haystack
        .windows(needle.len())
        .any(|w| w.eq_ignore_ascii_case(needle))
}

// ---------------------------------------------------------------------------
// Header parameter helpers
// ---------------------------------------------------------------------------

/// Look up a `key=value` parameter in a header value such as
/// `form-data; name="file"; filename="song.mp3"`.
///
/// Keys match case-insensitively; `;` inside quotes does not split.
fn disposition_param<'a>(value: &'a str, key: &str) -> Option<&'a str> {
    split_params(value).find_map(|param| {
        let (k, v) = param.split_once('=')?;
        k.trim()
            .eq_ignore_ascii_case(key)
            .then(|| unquote(v.trim()))
    })
}

fn split_params(value: &str) -> impl Iterator<Item = &str> {
    let mut in_quotes = false;
    value.split(move |c: char| {
        if c == '"' {
            in_quotes = !in_quotes;
        }
        c == ';' && !in_quotes
    })
}

fn unquote(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
}

// ---------------------------------------------------------------------------
// Tests (unit)
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boundary_plain_and_quoted() {
        assert_eq!(
            extract_boundary("multipart/form-data; boundary=XYZ").unwrap(),
            "XYZ"
        );
        assert_eq!(
            extract_boundary("multipart/form-data; boundary=\"a b\"; charset=utf-8").unwrap(),
            "a b"
        );
        assert_eq!(
            extract_boundary("multipart/form-data;BOUNDARY=----WebKit123").unwrap(),
            "----WebKit123"
        );
    }

    #[test]
    fn boundary_absent_or_empty() {
        assert_eq!(
            extract_boundary("multipart/form-data"),
            Err(ParseError::MissingBoundary)
        );
        assert_eq!(
            extract_boundary("multipart/form-data; boundary="),
            Err(ParseError::MissingBoundary)
        );
        assert_eq!(
            extract_boundary("multipart/form-data; boundary=\"\""),
            Err(ParseError::MissingBoundary)
        );
    }

    #[test]
    fn name_param_does_not_match_filename() {
        let v = r#"form-data; filename="a.mp3"; name="file""#;
        assert_eq!(disposition_param(v, "name"), Some("file"));
        assert_eq!(disposition_param(v, "filename"), Some("a.mp3"));
        assert_eq!(disposition_param("form-data", "name"), None);
    }

    #[test]
    fn semicolon_inside_quotes_is_kept() {
        let v = r#"form-data; name="file"; filename="a;b.mp3""#;
        assert_eq!(disposition_param(v, "filename"), Some("a;b.mp3"));
    }

    #[test]
    fn segments_skip_preamble_and_epilogue() {
        let body = b"preamble\r\n--b\r\none\r\n--b\r\ntwo\r\n--b--\r\nepilogue";
        let segments: Vec<&[u8]> = Segments::new(body, "b").collect();
        assert_eq!(segments, vec![&b"\r\none\r\n"[..], &b"\r\ntwo\r\n"[..]]);
    }

    #[test]
    fn segments_keep_unterminated_tail() {
        let body = b"--b\r\none\r\n--b\r\ntwo";
        let segments: Vec<&[u8]> = Segments::new(body, "b").collect();
        assert_eq!(segments, vec![&b"\r\none\r\n"[..], &b"\r\ntwo"[..]]);
    }

    #[test]
    fn line_end_strips_one_terminator() {
        assert_eq!(LineEnd::CrLf.trim(b"abc\r\n\r\n"), b"abc\r\n");
        assert_eq!(LineEnd::Unknown.trim(b"abc\n"), b"abc");
        assert_eq!(LineEnd::Unknown.trim(b"abc"), b"abc");
    }

    #[test]
    fn lf_line_end_keeps_trailing_carriage_return() {
        assert_eq!(LineEnd::Lf.trim(b"AB\r\n"), b"AB\r");
        assert_eq!(LineEnd::CrLf.trim(b"AB\n"), b"AB\n");
    }

    #[test]
    fn delimiter_line_end_is_detected() {
        assert_eq!(skip_delimiter_line_end(b"\r\nx"), (&b"x"[..], LineEnd::CrLf));
        assert_eq!(skip_delimiter_line_end(b"  \nx"), (&b"x"[..], LineEnd::Lf));
        assert_eq!(skip_delimiter_line_end(b"x"), (&b"x"[..], LineEnd::Unknown));
    }

    #[test]
    fn latin1_filename_is_decoded_lossily() {
        let segment = b"\r\nContent-Disposition: form-data; name=\"file\"; filename=\"caf\xE9.mp3\"\r\n\r\nID3\r\n";
        let part = parse_segment(segment).unwrap().unwrap();
        assert_eq!(part.name, "file");
        assert_eq!(part.filename.as_deref(), Some("caf\u{FFFD}.mp3"));
        assert_eq!(part.payload, b"ID3");
    }

    #[test]
    fn lowercase_disposition_without_blank_line_is_malformed() {
        let segment = b"\r\ncontent-disposition: form-data; name=\"a\"\r\n";
        assert!(matches!(
            parse_segment(segment),
            Err(ParseError::MalformedSegment(_))
        ));
    }

    #[test]
    fn split_head_prefers_earliest_blank_line() {
        let (head, body) = split_head(b"A: 1\n\nx\r\n\r\ny").unwrap();
        assert_eq!(head, b"A: 1");
        assert_eq!(body, b"x\r\n\r\ny");
        assert!(split_head(b"A: 1\r\nno blank line").is_none());
    }
}
