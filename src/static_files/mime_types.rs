use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::path::Path;
use tracing::debug;

const OS_MIME_TABLE: &str = "/etc/mime.types";
const FALLBACK: &str = "application/octet-stream";

/// Consulted before the OS table, which gets several of these wrong on
/// some platforms.
fn fixed_type(ext: &str) -> Option<&'static str> {
    Some(match ext {
        "css" => "text/css",
        "js" | "mjs" => "application/javascript",
        "html" | "htm" => "text/html",
        "svg" => "image/svg+xml",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "ttf" => "font/ttf",
        "eot" => "application/vnd.ms-fontobject",
        "json" => "application/json",
        "txt" => "text/plain",
        _ => return None,
    })
}

static OS_TYPES: Lazy<HashMap<String, String>> = Lazy::new(|| {
    let table = std::fs::read_to_string(OS_MIME_TABLE)
        .map(|text| parse_mime_types(&text))
        .unwrap_or_default();
    debug!(entries = table.len(), path = OS_MIME_TABLE, "OS mime table loaded");
    table
});

/// `type ext ext ...` lines, `#` comments.
fn parse_mime_types(text: &str) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for line in text.lines() {
        let line = line.split('#').next().unwrap_or("");
        let mut parts = line.split_whitespace();
        let Some(ty) = parts.next() else { continue };
        if ty.parse::<mime::Mime>().is_err() {
            continue;
        }
        for ext in parts {
            map.entry(ext.to_ascii_lowercase())
                .or_insert_with(|| ty.to_string());
        }
    }
    map
}

/// Whether a body of this type is text the browser decodes with a charset.
#[must_use]
pub fn is_text_like(m: &mime::Mime) -> bool {
    m.type_() == mime::TEXT
        || matches!(m.subtype().as_str(), "javascript" | "json" | "xml")
        || m.suffix().is_some_and(|s| s == mime::XML || s == mime::JSON)
}

/// Content type for a file, with `charset=UTF-8` added to text-like types
/// that do not name a charset.
#[must_use]
pub fn content_type_for(path: &Path) -> (String, bool) {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    let raw = fixed_type(&ext)
        .map(str::to_string)
        .or_else(|| OS_TYPES.get(&ext).cloned())
        .unwrap_or_else(|| FALLBACK.to_string());
    with_charset(&raw)
}

fn with_charset(raw: &str) -> (String, bool) {
    match raw.parse::<mime::Mime>() {
        Ok(m) if is_text_like(&m) => {
            if m.get_param(mime::CHARSET).is_some() {
                (raw.to_string(), true)
            } else {
                (format!("{raw}; charset=UTF-8"), true)
            }
        }
        _ => (raw.to_string(), false),
    }
}
