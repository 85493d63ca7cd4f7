use crate::types::ParseResult;

/// Serialize a [`ParseResult`] to a JSON string.
///
/// File content is reported by size only. When `pretty` is `true` the
/// output is indented for readability.
pub fn format_json(result: &ParseResult, pretty: bool) -> String {
    if pretty {
        serde_json::to_string_pretty(result).unwrap_or_else(|e| format!("{{\"error\": \"{e}\"}}"))
    } else {
        serde_json::to_string(result).unwrap_or_else(|e| format!("{{\"error\": \"{e}\"}}"))
    }
}

/// Render a [`ParseResult`] in a human-readable debug format.
pub fn format_debug(result: &ParseResult) -> String {
    let mut out = String::with_capacity(256);

    out.push_str("=== Form Submission ===\n");
    out.push_str(&format!("\n--- Fields ({}) ---\n", result.fields.len()));
    for (name, value) in &result.fields {
        out.push_str(&format!("  {name}: {value}\n"));
    }

    match &result.file {
        Some(file) => {
            out.push_str(&format!("\n--- File ({} bytes) ---\n", file.len()));
            out.push_str(&format!("  filename:     {}\n", file.filename));
            out.push_str(&format!("  content-type: {}\n", file.content_type));
            let preview: Vec<String> = file
                .bytes
                .iter()
                .take(16)
                .map(|b| format!("{b:02x}"))
                .collect();
            out.push_str(&format!("  head:         {}\n", preview.join(" ")));
        }
        None => {
            out.push_str("\n--- No File ---\n");
        }
    }

    out.push_str("=======================\n");
    out
}

/// Render only the text fields, one `name=value` per line.
pub fn format_fields_only(result: &ParseResult) -> String {
    let mut out = String::with_capacity(result.fields.len() * 32);

    for (name, value) in &result.fields {
        out.push_str(&format!("{name}={value}\n"));
    }

    out
}
