use dashmap::DashMap;
use flate2::write::GzEncoder;
use flate2::Compression;
use may_minihttp::Response;
use once_cell::sync::Lazy;
use serde_json::Value;
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tracing::{debug, warn};

/// Bodies at or below this size are never compressed.
pub const GZIP_MIN_BYTES: usize = 1024;

pub const CONTENT_TYPE_JSON: &str = "application/json; charset=UTF-8";
pub const CONTENT_TYPE_TEXT: &str = "text/plain; charset=UTF-8";

/// Sent on every response.
pub const SECURITY_HEADERS: [(&str, &str); 5] = [
    ("X-Content-Type-Options", "nosniff"),
    ("X-Frame-Options", "DENY"),
    ("X-XSS-Protection", "1; mode=block"),
    (
        "Content-Security-Policy",
        "default-src 'self'; script-src 'self' 'unsafe-inline'; style-src 'self' 'unsafe-inline'",
    ),
    ("Referrer-Policy", "strict-origin-when-cross-origin"),
];

pub fn status_reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        301 => "Moved Permanently",
        302 => "Found",
        304 => "Not Modified",
        400 => "Bad Request",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}

/// A complete response, assembled before anything touches the socket.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpReply {
    pub status: u16,
    headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    compressible: bool,
}

impl HttpReply {
    #[must_use]
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Vec::new(),
            compressible: true,
        }
    }

    #[must_use]
    pub fn text(status: u16, body: impl Into<String>) -> Self {
        Self::new(status)
            .with_header("Content-Type", CONTENT_TYPE_TEXT)
            .with_body(body.into().into_bytes())
    }

    #[must_use]
    pub fn json(status: u16, body: &Value) -> Self {
        Self::new(status)
            .with_header("Content-Type", CONTENT_TYPE_JSON)
            .with_body(body.to_string().into_bytes())
    }

    /// `{"error": "<reason phrase>"}`; nothing else reaches the client.
    #[must_use]
    pub fn json_error(status: u16) -> Self {
        Self::json(status, &serde_json::json!({ "error": status_reason(status) }))
    }

    #[must_use]
    pub fn redirect(status: u16, location: &str) -> Self {
        Self::new(status).with_header("Location", location)
    }

    #[must_use]
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.set_header(name, value);
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }

    /// Exclude the body from gzip negotiation (binary or streamed files).
    #[must_use]
    pub fn uncompressed(mut self) -> Self {
        self.compressible = false;
        self
    }

    /// Replace any header of the same (case-insensitive) name.
    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self
            .headers
            .iter_mut()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
        {
            Some(slot) => slot.1 = value,
            None => self.headers.push((name.to_string(), value)),
        }
    }

    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn headers(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Security headers, then gzip when the client accepts it and the body
    /// is large enough. A compression failure leaves the body as it was.
    #[must_use]
    pub fn finalize(mut self, accepts_gzip: bool) -> Self {
        for (name, value) in SECURITY_HEADERS {
            self.set_header(name, value);
        }
        if accepts_gzip
            && self.compressible
            && self.body.len() > GZIP_MIN_BYTES
            && self.header("Content-Encoding").is_none()
        {
            match gzip(&self.body) {
                Ok(compressed) => {
                    self.body = compressed;
                    self.set_header("Content-Encoding", "gzip");
                    self.set_header("Vary", "Accept-Encoding");
                }
                Err(e) => warn!(error = %e, "gzip failed; sending identity body"),
            }
        }
        self
    }
}

pub fn gzip(bytes: &[u8]) -> io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(bytes.len() / 2), Compression::default());
    encoder.write_all(bytes)?;
    encoder.finish()
}

/// Maximum number of distinct interned header lines.
pub const HEADER_LINE_LIMIT: usize = 65_536;

/// Share of [`HEADER_LINE_LIMIT`] open to lines that carry client input.
pub const CLIENT_LINE_LIMIT: usize = 4_096;

/// Validators a reply can go without. When the table is full these are
/// dropped instead of failing the reply.
const OPTIONAL_HEADERS: [&str; 2] = ["ETag", "Last-Modified"];

/// Header lines as `&'static str`, the form may_minihttp takes.
///
/// Each distinct line is leaked once and reused after that. The table stops
/// growing at `limit`.
pub struct HeaderLines {
    lines: DashMap<String, &'static str>,
    limit: usize,
    client_lines: AtomicUsize,
    client_limit: usize,
    full_logged: AtomicBool,
}

pub static HEADER_LINES: Lazy<HeaderLines> =
    Lazy::new(|| HeaderLines::new(HEADER_LINE_LIMIT, CLIENT_LINE_LIMIT));

impl HeaderLines {
    #[must_use]
    pub fn new(limit: usize, client_limit: usize) -> Self {
        Self {
            lines: DashMap::new(),
            limit,
            client_lines: AtomicUsize::new(0),
            client_limit: client_limit.min(limit),
            full_logged: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn intern(&self, name: &str, value: &str) -> io::Result<&'static str> {
        let line = format!("{name}: {value}");
        if let Some(interned) = self.lines.get(&line) {
            return Ok(*interned);
        }
        if self.lines.len() >= self.limit {
            if !self.full_logged.swap(true, Ordering::Relaxed) {
                warn!(limit = self.limit, "Header line table full; new lines are refused");
            }
            return Err(io::Error::other(format!(
                "header line table full, cannot add `{name}`"
            )));
        }
        Ok(*self
            .lines
            .entry(line.clone())
            .or_insert_with(|| Box::leak(line.into_boxed_str())))
    }

    /// Take one slot of the client share. Callers skip the client-derived
    /// part of a header once this returns false.
    pub fn admit_client_line(&self) -> bool {
        self.client_lines
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| {
                (n < self.client_limit).then_some(n + 1)
            })
            .is_ok()
    }

    /// Validate and intern every header of `reply`, in order.
    pub fn lines_for(&self, reply: &HttpReply) -> io::Result<Vec<&'static str>> {
        let mut lines = Vec::with_capacity(reply.headers.len());
        for (name, value) in &reply.headers {
            // CR/LF would split the header block.
            if name.contains(['\r', '\n', ':']) || value.contains(['\r', '\n']) {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("header `{name}` contains a line break"),
                ));
            }
            match self.intern(name, value) {
                Ok(line) => lines.push(line),
                Err(e) if OPTIONAL_HEADERS.iter().any(|h| h.eq_ignore_ascii_case(name)) => {
                    debug!(header = %name, error = %e, "Optional header dropped");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(lines)
    }
}

/// Copy a finished reply into the may_minihttp response.
///
/// Header lines are validated and interned before anything is written, so on
/// `Err` the response is untouched and the caller can still write something
/// else.
pub fn write_reply(res: &mut Response, reply: HttpReply) -> io::Result<()> {
    let lines = HEADER_LINES.lines_for(&reply)?;
    res.status_code(reply.status as usize, status_reason(reply.status));
    for line in lines {
        res.header(line);
    }
    res.body_vec(reply.body);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use std::io::Read;

    #[test]
    fn test_status_reason() {
        assert_eq!(status_reason(200), "OK");
        assert_eq!(status_reason(304), "Not Modified");
        assert_eq!(status_reason(405), "Method Not Allowed");
    }

    #[test]
    fn test_security_headers_always_added() {
        let reply = HttpReply::new(404).finalize(false);
        for (name, value) in SECURITY_HEADERS {
            assert_eq!(reply.header(name), Some(value));
        }
    }

    #[test]
    fn test_gzip_threshold() {
        let small = HttpReply::text(200, "x".repeat(GZIP_MIN_BYTES)).finalize(true);
        assert_eq!(small.header("Content-Encoding"), None);

        let body = "y".repeat(GZIP_MIN_BYTES + 1);
        let big = HttpReply::text(200, body.clone()).finalize(true);
        assert_eq!(big.header("Content-Encoding"), Some("gzip"));
        assert_eq!(big.header("Vary"), Some("Accept-Encoding"));
        let mut out = String::new();
        GzDecoder::new(big.body.as_slice())
            .read_to_string(&mut out)
            .unwrap();
        assert_eq!(out, body);

        let refused = HttpReply::text(200, body).finalize(false);
        assert_eq!(refused.header("Content-Encoding"), None);
    }

    #[test]
    fn test_set_header_replaces_case_insensitively() {
        let mut reply = HttpReply::new(200).with_header("Cache-Control", "no-cache");
        reply.set_header("cache-control", "max-age=0");
        assert_eq!(reply.headers().count(), 1);
        assert_eq!(reply.header("CACHE-CONTROL"), Some("max-age=0"));
    }

    #[test]
    fn test_header_lines_interned() {
        let table = HeaderLines::new(8, 2);
        let a = table.intern("X-Test", "1").unwrap();
        let b = table.intern("X-Test", "1").unwrap();
        assert!(std::ptr::eq(a, b));
        assert_eq!(a, "X-Test: 1");
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_full_table_drops_validators_only() {
        let table = HeaderLines::new(3, 1);
        let reply = HttpReply::text(200, "body")
            .with_header("ETag", "\"1-4\"")
            .with_header("Last-Modified", "Thu, 01 Jan 1970 00:00:01 GMT");
        assert_eq!(table.lines_for(&reply).unwrap().len(), 3);
        assert_eq!(table.len(), 3);

        let fresh = HttpReply::text(200, "body")
            .with_header("ETag", "\"2-4\"")
            .with_header("Last-Modified", "Thu, 01 Jan 1970 00:00:02 GMT");
        let lines = table.lines_for(&fresh).unwrap();
        assert_eq!(lines, vec!["Content-Type: text/plain; charset=UTF-8"]);

        let required = HttpReply::redirect(301, "/static/other/");
        assert!(table.lines_for(&required).is_err());
    }

    #[test]
    fn test_client_share_is_bounded() {
        let table = HeaderLines::new(16, 2);
        assert!(table.admit_client_line());
        assert!(table.admit_client_line());
        assert!(!table.admit_client_line());
    }

    #[test]
    fn test_line_break_rejected_before_interning() {
        let table = HeaderLines::new(16, 2);
        let reply = HttpReply::new(200).with_header("X-Bad", "a\nb");
        let err = table.lines_for(&reply).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        assert!(table.is_empty());
    }

    #[test]
    fn test_json_error_body_is_generic() {
        let reply = HttpReply::json_error(500);
        assert_eq!(reply.body, br#"{"error":"Internal Server Error"}"#.to_vec());
        assert_eq!(reply.header("Content-Type"), Some(CONTENT_TYPE_JSON));
    }
}
