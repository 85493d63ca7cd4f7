use rand::Rng;
use rand::distr::Alphanumeric;

/// Builds `multipart/form-data` bodies in the layout browsers send.
///
/// ```rust
/// use songdrop::{FormBuilder, parse_form};
///
/// let form = FormBuilder::new("XYZ")
///     .text("shortName", "Test Song")
///     .file("file", "song.mp3", "audio/mpeg", &[0x00, 0xFF, 0x7F]);
///
/// let result = parse_form(&form.build(), &form.content_type()).unwrap();
/// assert_eq!(result.field("shortName"), Some("Test Song"));
/// assert_eq!(result.file.unwrap().bytes, vec![0x00, 0xFF, 0x7F]);
/// ```
#[derive(Debug, Clone)]
pub struct FormBuilder {
    boundary: String,
    body: Vec<u8>,
}

impl FormBuilder {
    /// Start a form with an explicit boundary.
    pub fn new(boundary: impl Into<String>) -> Self {
        Self {
            boundary: boundary.into(),
            body: Vec::new(),
        }
    }

    /// Start a form with a random boundary unlikely to occur in any payload.
    pub fn with_random_boundary() -> Self {
        let token: String = rand::rng()
            .sample_iter(&Alphanumeric)
            .take(24)
            .map(char::from)
            .collect();
        Self::new(format!("----songdrop{token}"))
    }

    /// The boundary in use.
    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    /// Append a text field.
    pub fn text(mut self, name: &str, value: &str) -> Self {
        self.open_part();
        self.push_str(&format!(
            "Content-Disposition: form-data; name=\"{}\"\r\n\r\n",
            escape_quoted(name)
        ));
        self.push_str(value);
        self.push_str("\r\n");
        self
    }

    /// Append a file part.
    pub fn file(mut self, name: &str, filename: &str, content_type: &str, bytes: &[u8]) -> Self {
        self.open_part();
        self.push_str(&format!(
            "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
            escape_quoted(name),
            escape_quoted(filename)
        ));
        self.push_str(&format!("Content-Type: {content_type}\r\n\r\n"));
        self.body.extend_from_slice(bytes);
        self.push_str("\r\n");
        self
    }

    /// Value for the request's `Content-Type` header.
    pub fn content_type(&self) -> String {
        format!("multipart/form-data; boundary={}", self.boundary)
    }

    /// Finish the form, appending the close delimiter.
    pub fn build(&self) -> Vec<u8> {
        let mut body = Vec::with_capacity(self.body.len() + self.boundary.len() + 6);
        body.extend_from_slice(&self.body);
        body.extend_from_slice(format!("--{}--\r\n", self.boundary).as_bytes());
        body
    }

    fn open_part(&mut self) {
        let delimiter = format!("--{}\r\n", self.boundary);
        self.push_str(&delimiter);
    }

    fn push_str(&mut self, s: &str) {
        self.body.extend_from_slice(s.as_bytes());
    }
}

/// Browsers percent-encode quotes and line breaks inside quoted parameters.
fn escape_quoted(value: &str) -> String {
    value
        .replace('"', "%22")
        .replace('\r', "%0D")
        .replace('\n', "%0A")
}
