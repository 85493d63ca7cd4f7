use songdrop::{
    FormBuilder, MultipartConfig, MultipartParser, ParseError, extract_boundary, format_debug,
    format_fields_only, format_json, parse_form, parse_form_with_config,
};

const CT: &str = "multipart/form-data; boundary=XYZ";

/// Body with the given parts (already framed) and a close delimiter.
fn body(parts: &[&[u8]]) -> Vec<u8> {
    let mut out = Vec::new();
    for part in parts {
        out.extend_from_slice(b"--XYZ\r\n");
        out.extend_from_slice(part);
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(b"--XYZ--\r\n");
    out
}

// =========================================================================
// Text fields
// =========================================================================

#[test]
fn text_field_value_is_trimmed() {
    let raw = body(&[b"Content-Disposition: form-data; name=\"shortName\"\r\n\r\n  Test Song \t"]);
    let form = parse_form(&raw, CT).expect("should parse");
    assert_eq!(form.field("shortName"), Some("Test Song"));
    assert!(form.file.is_none());
}

#[test]
fn internal_whitespace_is_preserved() {
    let raw = body(&[b"Content-Disposition: form-data; name=\"note\"\r\n\r\nline one\r\nline  two"]);
    let form = parse_form(&raw, CT).unwrap();
    assert_eq!(form.field("note"), Some("line one\r\nline  two"));
}

#[test]
fn repeated_field_keeps_last_value() {
    let raw = body(&[
        b"Content-Disposition: form-data; name=\"shortName\"\r\n\r\nfirst",
        b"Content-Disposition: form-data; name=\"shortName\"\r\n\r\nsecond",
    ]);
    let form = parse_form(&raw, CT).unwrap();
    assert_eq!(form.field("shortName"), Some("second"));
    assert_eq!(form.fields.len(), 1);
}

#[test]
fn empty_field_value() {
    let raw = body(&[b"Content-Disposition: form-data; name=\"displayName\"\r\n\r\n"]);
    let form = parse_form(&raw, CT).unwrap();
    assert_eq!(form.field("displayName"), Some(""));
    assert_eq!(form.non_empty_field("displayName"), None);
}

#[test]
fn utf8_field_value() {
    let raw = body(&["Content-Disposition: form-data; name=\"displayName\"\r\n\r\nZoë 🎵".as_bytes()]);
    let form = parse_form(&raw, CT).unwrap();
    assert_eq!(form.field("displayName"), Some("Zoë 🎵"));
}

// =========================================================================
// File parts
// =========================================================================

#[test]
fn reference_example() {
    let form = FormBuilder::new("XYZ")
        .text("shortName", "Test Song")
        .text("password", "secret")
        .file("file", "song.mp3", "audio/mpeg", &[0x00, 0xFF, 0x7F]);

    let result = parse_form(&form.build(), CT).expect("should parse");

    assert_eq!(result.fields.len(), 2);
    assert_eq!(result.field("shortName"), Some("Test Song"));
    assert_eq!(result.field("password"), Some("secret"));

    let file = result.file.expect("file part");
    assert_eq!(file.filename, "song.mp3");
    assert_eq!(file.content_type, "audio/mpeg");
    assert_eq!(file.bytes, vec![0x00, 0xFF, 0x7F]);
}

#[test]
fn binary_payload_is_byte_identical() {
    // Every byte value, including CR/LF and the high range, plus a payload
    // ending in CRLF of its own.
    let mut bytes: Vec<u8> = (0..=255u8).cycle().take(4096).collect();
    bytes.extend_from_slice(b"\r\n");

    let form = FormBuilder::new("XYZ").file("file", "x.mp3", "audio/mpeg", &bytes);
    let result = parse_form(&form.build(), CT).unwrap();

    assert_eq!(result.file.unwrap().bytes, bytes);
}

#[test]
fn payload_with_invalid_utf8_is_untouched() {
    let bytes = [0xC3, 0x28, 0xA0, 0xA1, 0xE2, 0x28, 0xA1, 0xF0, 0x90, 0x28, 0xBC];
    let form = FormBuilder::new("XYZ").file("file", "x.mp3", "audio/mpeg", &bytes);
    let result = parse_form(&form.build(), CT).unwrap();
    assert_eq!(result.file.unwrap().bytes, bytes);
}

#[test]
fn empty_file_payload() {
    let form = FormBuilder::new("XYZ").file("file", "empty.mp3", "audio/mpeg", &[]);
    let file = parse_form(&form.build(), CT).unwrap().file.unwrap();
    assert!(file.is_empty());
    assert_eq!(file.filename, "empty.mp3");
}

#[test]
fn first_file_part_wins() {
    let form = FormBuilder::new("XYZ")
        .file("file", "one.mp3", "audio/mpeg", b"first")
        .file("file", "two.mp3", "audio/mpeg", b"second");
    let file = parse_form(&form.build(), CT).unwrap().file.unwrap();
    assert_eq!(file.filename, "one.mp3");
    assert_eq!(file.bytes, b"first");
}

#[test]
fn missing_content_type_uses_default() {
    let raw = body(&[b"Content-Disposition: form-data; name=\"file\"; filename=\"a.mp3\"\r\n\r\nID3"]);
    let file = parse_form(&raw, CT).unwrap().file.unwrap();
    assert_eq!(file.content_type, "audio/mpeg");

    let config = MultipartConfig {
        default_file_content_type: "application/octet-stream".into(),
        ..MultipartConfig::default()
    };
    let file = parse_form_with_config(&raw, CT, config).unwrap().file.unwrap();
    assert_eq!(file.content_type, "application/octet-stream");
}

#[test]
fn file_field_without_filename_is_a_text_field() {
    let raw = body(&[b"Content-Disposition: form-data; name=\"file\"\r\n\r\nnot a file"]);
    let form = parse_form(&raw, CT).unwrap();
    assert!(form.file.is_none());
    assert_eq!(form.field("file"), Some("not a file"));
}

#[test]
fn empty_filename_is_not_a_file() {
    let raw = body(&[
        b"Content-Disposition: form-data; name=\"file\"; filename=\"\"\r\nContent-Type: application/octet-stream\r\n\r\n",
    ]);
    let form = parse_form(&raw, CT).unwrap();
    assert!(form.file.is_none());
}

#[test]
fn file_under_other_name_goes_to_fields() {
    let form = FormBuilder::new("XYZ").file("cover", "c.txt", "text/plain", b"hello");
    let result = parse_form(&form.build(), CT).unwrap();
    assert!(result.file.is_none());
    assert_eq!(result.field("cover"), Some("hello"));
}

#[test]
fn custom_file_field_name() {
    let config = MultipartConfig {
        file_field_name: "mp3File".into(),
        ..MultipartConfig::default()
    };
    let form = FormBuilder::new("XYZ").file("mp3File", "s.mp3", "audio/mpeg", b"abc");
    let result = parse_form_with_config(&form.build(), CT, config).unwrap();
    assert_eq!(result.file.unwrap().bytes, b"abc");
}

// =========================================================================
// Boundary handling
// =========================================================================

#[test]
fn missing_boundary_is_an_error() {
    let raw = body(&[b"Content-Disposition: form-data; name=\"a\"\r\n\r\nb"]);
    assert_eq!(
        parse_form(&raw, "multipart/form-data"),
        Err(ParseError::MissingBoundary)
    );
    assert_eq!(parse_form(&raw, ""), Err(ParseError::MissingBoundary));
}

#[test]
fn quoted_boundary_and_extra_params() {
    let raw = body(&[b"Content-Disposition: form-data; name=\"a\"\r\n\r\nb"]);
    let form = parse_form(&raw, "multipart/form-data; charset=utf-8; boundary=\"XYZ\"").unwrap();
    assert_eq!(form.field("a"), Some("b"));
}

#[test]
fn browser_style_boundary() {
    let form = FormBuilder::new("----WebKitFormBoundary7MA4YWxkTrZu0gW").text("shortName", "x");
    let result = parse_form(&form.build(), &form.content_type()).unwrap();
    assert_eq!(result.field("shortName"), Some("x"));
    assert_eq!(
        extract_boundary(&form.content_type()).unwrap(),
        "----WebKitFormBoundary7MA4YWxkTrZu0gW"
    );
}

#[test]
fn random_boundary_round_trip() {
    let form = FormBuilder::with_random_boundary()
        .text("shortName", "Night Drive")
        .file("file", "n.mp3", "audio/mpeg", &[0xFF, 0xFB, 0x90]);
    assert!(form.boundary().starts_with("----songdrop"));

    let result = parse_form(&form.build(), &form.content_type()).unwrap();
    assert_eq!(result.field("shortName"), Some("Night Drive"));
    assert_eq!(result.file.unwrap().bytes, [0xFF, 0xFB, 0x90]);
}

#[test]
fn preamble_and_epilogue_are_ignored() {
    let mut raw = b"This is the preamble.\r\n".to_vec();
    raw.extend(body(&[b"Content-Disposition: form-data; name=\"a\"\r\n\r\n1"]));
    raw.extend_from_slice(b"This is the epilogue.\r\n");

    let form = parse_form(&raw, CT).unwrap();
    assert_eq!(form.fields.len(), 1);
    assert_eq!(form.field("a"), Some("1"));
}

#[test]
fn body_without_close_delimiter_keeps_last_part() {
    let raw = b"--XYZ\r\n\
        Content-Disposition: form-data; name=\"a\"\r\n\r\n\
        1\r\n\
        --XYZ\r\n\
        Content-Disposition: form-data; name=\"b\"\r\n\r\n\
        2\r\n";
    let form = parse_form(raw, CT).unwrap();
    assert_eq!(form.field("a"), Some("1"));
    assert_eq!(form.field("b"), Some("2"));
}

#[test]
fn lf_only_line_endings() {
    let raw = b"--XYZ\n\
        Content-Disposition: form-data; name=\"shortName\"\n\n\
        Test\n\
        --XYZ--\n";
    let form = parse_form(raw, CT).unwrap();
    assert_eq!(form.field("shortName"), Some("Test"));
}

#[test]
fn lf_framed_file_keeps_trailing_carriage_return() {
    let raw = b"--XYZ\n\
        Content-Disposition: form-data; name=\"file\"; filename=\"a.mp3\"\n\n\
        AB\r\n\
        --XYZ--\n";
    let file = parse_form(raw, CT).unwrap().file.unwrap();
    assert_eq!(file.bytes, b"AB\r");
}

#[test]
fn non_utf8_filename_still_yields_file() {
    let raw = body(&[
        b"Content-Disposition: form-data; name=\"file\"; filename=\"caf\xE9.mp3\"\r\nContent-Type: audio/mpeg\r\n\r\nID3",
    ]);
    let file = parse_form(&raw, CT).unwrap().file.expect("file part");
    assert_eq!(file.filename, "caf\u{FFFD}.mp3");
    assert_eq!(file.bytes, b"ID3");
    assert!(file.is_mp3());
}

#[test]
fn header_names_are_case_insensitive() {
    let raw = body(&[
        b"content-disposition: form-data; NAME=\"file\"; FileName=\"a.mp3\"\r\ncontent-type: audio/mp3\r\n\r\nxyz",
    ]);
    let file = parse_form(&raw, CT).unwrap().file.unwrap();
    assert_eq!(file.filename, "a.mp3");
    assert_eq!(file.content_type, "audio/mp3");
}

// =========================================================================
// Degenerate and malformed input
// =========================================================================

#[test]
fn no_parts_yields_empty_result() {
    assert!(parse_form(b"", CT).unwrap().is_empty());
    assert!(parse_form(b"no delimiters here", CT).unwrap().is_empty());
    assert!(parse_form(b"--XYZ--\r\n", CT).unwrap().is_empty());
}

#[test]
fn segment_without_disposition_is_ignored() {
    let raw = body(&[
        b"Content-Type: text/plain\r\n\r\norphan",
        b"Content-Disposition: form-data; name=\"a\"\r\n\r\nkept",
    ]);
    let form = parse_form(&raw, CT).unwrap();
    assert_eq!(form.fields.len(), 1);
    assert_eq!(form.field("a"), Some("kept"));
}

#[test]
fn nameless_segment_is_skipped_and_parsing_continues() {
    let raw = body(&[
        b"Content-Disposition: form-data; filename=\"x.mp3\"\r\n\r\nlost",
        b"Content-Disposition: form-data; name=\"shortName\"\r\n\r\nkept",
    ]);
    let form = parse_form(&raw, CT).unwrap();
    assert!(form.file.is_none());
    assert_eq!(form.field("shortName"), Some("kept"));
}

#[test]
fn nameless_segment_fails_in_strict_mode() {
    let raw = body(&[
        b"Content-Disposition: form-data\r\n\r\nlost",
        b"Content-Disposition: form-data; name=\"shortName\"\r\n\r\nkept",
    ]);
    let config = MultipartConfig {
        strict: true,
        ..MultipartConfig::default()
    };
    let err = parse_form_with_config(&raw, CT, config).unwrap_err();
    assert!(matches!(err, ParseError::MalformedSegment(_)));
}

#[test]
fn disposition_without_blank_line_is_malformed() {
    let raw = b"--XYZ\r\nContent-Disposition: form-data; name=\"a\"\r\n--XYZ--\r\n";
    assert!(parse_form(raw, CT).unwrap().is_empty());

    let config = MultipartConfig {
        strict: true,
        ..MultipartConfig::default()
    };
    assert!(matches!(
        parse_form_with_config(raw, CT, config),
        Err(ParseError::MalformedSegment(_))
    ));
}

#[test]
fn body_over_limit_is_rejected() {
    let form = FormBuilder::new("XYZ").file("file", "big.mp3", "audio/mpeg", &[0u8; 2048]);
    let raw = form.build();
    let config = MultipartConfig {
        max_bytes: 1024,
        ..MultipartConfig::default()
    };
    assert_eq!(
        parse_form_with_config(&raw, CT, config),
        Err(ParseError::BodyTooLarge {
            limit: 1024,
            actual: raw.len()
        })
    );
}

#[test]
fn input_is_not_mutated() {
    let form = FormBuilder::new("XYZ")
        .text("shortName", " padded ")
        .file("file", "a.mp3", "audio/mpeg", &[1, 2, 3]);
    let raw = form.build();
    let copy = raw.clone();
    let parser = MultipartParser::new();
    let first = parser.parse(&raw, CT).unwrap();
    let second = parser.parse(&raw, CT).unwrap();
    assert_eq!(raw, copy);
    assert_eq!(first, second);
}

// =========================================================================
// Raw parts and required fields
// =========================================================================

#[test]
fn split_parts_exposes_every_named_part() {
    let form = FormBuilder::new("XYZ")
        .text("shortName", "a")
        .file("file", "one.mp3", "audio/mpeg", b"1")
        .file("file", "two.mp3", "audio/mpeg", b"2");
    let raw = form.build();

    let parts = MultipartParser::new().split_parts(&raw, "XYZ").unwrap();
    assert_eq!(parts.len(), 3);
    assert!(!parts[0].is_file());
    assert_eq!(parts[0].text_value(), "a");
    assert_eq!(parts[2].filename.as_deref(), Some("two.mp3"));
    assert_eq!(parts[2].payload, b"2");
}

#[test]
fn missing_fields_reports_required_names() {
    let config = MultipartConfig::default();

    let form = FormBuilder::new("XYZ").text("shortName", "a").text("password", "");
    let result = parse_form(&form.build(), CT).unwrap();
    assert_eq!(config.missing_fields(&result), vec!["password", "file"]);

    let form = FormBuilder::new("XYZ")
        .text("shortName", "a")
        .text("password", "p")
        .file("file", "a.mp3", "audio/mpeg", b"x");
    let result = parse_form(&form.build(), CT).unwrap();
    assert!(config.missing_fields(&result).is_empty());
}

// =========================================================================
// Output formatting
// =========================================================================

#[test]
fn json_output_reports_file_size_not_bytes() {
    let form = FormBuilder::new("XYZ")
        .text("shortName", "Test Song")
        .file("file", "song.mp3", "audio/mpeg", &[0x00, 0xFF, 0x7F]);
    let result = parse_form(&form.build(), CT).unwrap();
    let json = format_json(&result, false);
    assert_eq!(
        json,
        r#"{"fields":{"shortName":"Test Song"},"file":{"filename":"song.mp3","contentType":"audio/mpeg","size":3}}"#
    );
}

#[test]
fn json_output_pretty() {
    let result = parse_form(&body(&[b"Content-Disposition: form-data; name=\"a\"\r\n\r\nb"]), CT).unwrap();
    let json = format_json(&result, true);
    // Pretty JSON has newlines and indentation.
    assert!(json.contains('\n'));
    assert!(json.contains("  "));
    assert!(json.contains("\"file\": null"));
}

#[test]
fn debug_output_contains_sections() {
    let form = FormBuilder::new("XYZ")
        .text("shortName", "Test Song")
        .file("file", "song.mp3", "audio/mpeg", &[0x00, 0xFF, 0x7F]);
    let dbg = format_debug(&parse_form(&form.build(), CT).unwrap());
    assert!(dbg.contains("=== Form Submission ==="));
    assert!(dbg.contains("--- Fields (1) ---"));
    assert!(dbg.contains("shortName: Test Song"));
    assert!(dbg.contains("--- File (3 bytes) ---"));
    assert!(dbg.contains("00 ff 7f"));
}

#[test]
fn fields_only_output() {
    let form = FormBuilder::new("XYZ").text("b", "2").text("a", "1");
    let out = format_fields_only(&parse_form(&form.build(), CT).unwrap());
    assert_eq!(out, "a=1\nb=2\n");
}
