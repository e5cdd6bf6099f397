use log::debug;

/// Decode RFC 2047 encoded-words in a raw header value.
pub fn decode_header_value(name: &str, raw: &[u8]) -> String {
    // mailparse expects a full "Key: value" header line
    let mut line = format!("{name}: ").into_bytes();
    line.extend_from_slice(raw);
    line.extend_from_slice(b"\r\n");

    match mailparse::parse_header(&line) {
        Ok((h, _idx)) => h.get_value(),
        Err(_) => String::from_utf8_lossy(raw).into_owned(),
    }
}

/// Collapse a body into one line of at most `max_chars` characters.
pub fn normalize_snippet(s: &str, max_chars: usize) -> String {
    let mut out = String::new();
    for word in s.split_whitespace() {
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(word);
        if out.chars().count() >= max_chars {
            break;
        }
    }
    out.chars().take(max_chars).collect()
}

// Wide enough that html2text never wraps a snippet.
const RENDER_WIDTH: usize = 10_000;

/// Render HTML to plain text with html2text. Falls back to the input when
/// the renderer rejects it.
pub fn html_to_text(html: &str) -> String {
    match html2text::from_read(html.as_bytes(), RENDER_WIDTH) {
        Ok(text) => text,
        Err(e) => {
            debug!("html2text failed: {e}");
            html.to_string()
        }
    }
}

/// Gmail snippets arrive HTML-escaped ("&#39;", "&amp;").
pub fn decode_html_entities(s: &str) -> String {
    if !s.contains('&') {
        return s.to_string();
    }
    html_to_text(s).trim_end().to_string()
}
