//! Static file handler for the HTML client.
//!
//! Request paths under the static context map to files under one
//! deployment root. Every path is checked lexically (no climbing above the
//! root, no denylisted names), then canonicalized and checked again so a
//! symlink cannot lead outside the root either.

mod mime_types;
mod policy;

pub use mime_types::{content_type_for, is_text_like};
pub use policy::{is_denied_name, resolve_relative, Rejection};

use std::fs::{self, File, Metadata};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, error, warn};

use crate::server::response::HEADER_LINES;
use crate::server::{HttpReply, ParsedRequest};

/// Text files in this size range are read whole and may be gzipped.
pub const TEXT_WHOLE_MIN: u64 = 1024;
pub const TEXT_WHOLE_MAX: u64 = 1024 * 1024;

/// Largest file served unless configured otherwise. Bodies are buffered
/// whole by may_minihttp.
pub const DEFAULT_MAX_FILE_BYTES: u64 = 64 * 1024 * 1024;

const CACHE_CONTROL: &str = "max-age=0, must-revalidate";
const INDEX_FILE: &str = "index.html";

#[derive(Debug, Clone)]
pub struct StaticFiles {
    root: PathBuf,
    context: String,
    redirect_keep_query: bool,
    memory_budget: u64,
    max_file_bytes: u64,
}

impl StaticFiles {
    /// `root` must exist; it is canonicalized once here.
    pub fn new(
        root: impl AsRef<Path>,
        context: &str,
        redirect_keep_query: bool,
        memory_budget_bytes: u64,
    ) -> io::Result<Self> {
        let root = fs::canonicalize(root.as_ref())?;
        Ok(Self {
            root,
            context: context.trim_end_matches('/').to_string(),
            redirect_keep_query,
            memory_budget: memory_budget_bytes,
            max_file_bytes: DEFAULT_MAX_FILE_BYTES,
        })
    }

    /// Files above `bytes` are refused with 500.
    #[must_use]
    pub fn with_max_file_bytes(mut self, bytes: u64) -> Self {
        self.max_file_bytes = bytes;
        self
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Build the reply for one request. Security headers and compression are
    /// applied later, at the HTTP boundary.
    pub fn handle(&self, req: &ParsedRequest) -> HttpReply {
        if req.method != "GET" {
            warn!(method = %req.method, path = %req.path, "Static request with unsupported method");
            return HttpReply::text(405, "Method Not Allowed").with_header("Allow", "GET");
        }
        let raw_rel = req
            .path
            .strip_prefix(&self.context)
            .unwrap_or(req.path.as_str())
            .trim_start_matches('/');
        let decoded = match urlencoding::decode(raw_rel) {
            Ok(d) if !d.contains('\0') => d.into_owned(),
            _ => return HttpReply::text(400, "Bad Request"),
        };
        let wants_index = decoded.is_empty() || decoded.ends_with('/');
        let decoded = if wants_index {
            format!("{decoded}{INDEX_FILE}")
        } else {
            decoded
        };

        let relative = match resolve_relative(&decoded) {
            Ok(p) => p,
            Err(rejection) => {
                warn!(path = %req.path, rejection = ?rejection, "Static request rejected");
                return HttpReply::text(403, "Forbidden");
            }
        };

        let canonical = match fs::canonicalize(self.root.join(&relative)) {
            Ok(p) => p,
            Err(_) => return HttpReply::text(404, "Not Found"),
        };
        if !canonical.starts_with(&self.root) {
            warn!(path = %req.path, resolved = %canonical.display(), "Static path escapes root");
            return HttpReply::text(403, "Forbidden");
        }
        if canonical
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(is_denied_name)
        {
            warn!(path = %req.path, "Static path resolves to a denied name");
            return HttpReply::text(403, "Forbidden");
        }

        let meta = match fs::metadata(&canonical) {
            Ok(m) => m,
            Err(_) => return HttpReply::text(404, "Not Found"),
        };
        if meta.is_dir() {
            if wants_index {
                return HttpReply::text(404, "Not Found");
            }
            return self.redirect_to_dir(req, &relative);
        }

        match self.serve_file(req, &canonical, &meta) {
            Ok(reply) => reply,
            Err(e) => {
                warn!(path = %req.path, error = %e, "Static file read failed");
                HttpReply::text(404, "Not Found")
            }
        }
    }

    // Built from the resolved path, so `/static/./sub` and `/static/sub`
    // share one Location line.
    fn redirect_to_dir(&self, req: &ParsedRequest, relative: &Path) -> HttpReply {
        let segments: Vec<String> = relative
            .components()
            .map(|c| urlencoding::encode(&c.as_os_str().to_string_lossy()).into_owned())
            .collect();
        let mut location = format!("{}/{}/", self.context, segments.join("/"));
        if self.redirect_keep_query {
            if let Some(q) = req.query.as_deref().filter(|q| !q.is_empty()) {
                if HEADER_LINES.admit_client_line() {
                    location.push('?');
                    location.push_str(q);
                } else {
                    warn!(path = %req.path, "Redirect query dropped; client header share used up");
                }
            }
        }
        debug!(from = %req.path, to = %location, "Directory redirect");
        HttpReply::redirect(301, &location)
    }

    fn serve_file(
        &self,
        req: &ParsedRequest,
        path: &Path,
        meta: &Metadata,
    ) -> io::Result<HttpReply> {
        let mtime = meta.modified().unwrap_or(UNIX_EPOCH);
        let size = meta.len();
        let last_modified = httpdate::fmt_http_date(mtime);
        let etag = entity_tag(mtime, size);

        let validators = |reply: HttpReply| {
            reply
                .with_header("Last-Modified", last_modified.clone())
                .with_header("ETag", etag.clone())
                .with_header("Cache-Control", CACHE_CONTROL)
        };

        if let Some(ims) = req.header("if-modified-since") {
            if not_modified_since(ims, mtime, &last_modified) {
                debug!(path = %req.path, "Static 304");
                return Ok(validators(HttpReply::new(304)));
            }
        }

        if size > self.max_file_bytes {
            error!(
                path = %req.path,
                size = size,
                limit = self.max_file_bytes,
                "Static file exceeds the size limit"
            );
            return Ok(HttpReply::text(500, "File too large to serve").uncompressed());
        }

        let (content_type, text_like) = content_type_for(path);
        let reply = validators(HttpReply::new(200)).with_header("Content-Type", content_type);

        if text_like && (TEXT_WHOLE_MIN..=TEXT_WHOLE_MAX).contains(&size) {
            return Ok(reply.with_body(fs::read(path)?));
        }

        let chunk = chunk_size(self.memory_budget);
        let body = read_chunked(path, size, chunk)?;
        debug!(path = %req.path, size = size, chunk = chunk, "Static file read");
        Ok(reply.with_body(body).uncompressed())
    }
}

/// `"<mtime secs hex>-<size hex>"`.
#[must_use]
pub fn entity_tag(mtime: SystemTime, size: u64) -> String {
    let secs = mtime
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    format!("\"{secs:x}-{size:x}\"")
}

/// True when the client copy is current: the header date is at or after
/// the file time, allowing one second for HTTP-date truncation. An
/// unparseable header only matches our own `Last-Modified` text exactly.
#[must_use]
pub fn not_modified_since(header: &str, mtime: SystemTime, last_modified: &str) -> bool {
    match httpdate::parse_http_date(header.trim()) {
        Ok(since) => mtime <= since + Duration::from_secs(1),
        Err(_) => header.trim() == last_modified,
    }
}

/// Read buffer size from the memory left under `budget`: 8, 32 or 64 KiB.
#[must_use]
pub fn chunk_size(budget: u64) -> usize {
    let used = memory_stats::memory_stats().map_or(0, |m| m.physical_mem as u64);
    chunk_tier(budget.saturating_sub(used))
}

#[must_use]
pub fn chunk_tier(remaining: u64) -> usize {
    const MIB: u64 = 1024 * 1024;
    if remaining < 64 * MIB {
        8 * 1024
    } else if remaining < 256 * MIB {
        32 * 1024
    } else {
        64 * 1024
    }
}

fn read_chunked(path: &Path, size: u64, chunk: usize) -> io::Result<Vec<u8>> {
    if size <= chunk as u64 {
        return fs::read(path);
    }
    let mut file = File::open(path)?;
    let mut body = Vec::new();
    let mut buf = vec![0u8; chunk];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        body.extend_from_slice(&buf[..n]);
    }
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn site() -> (tempfile::TempDir, StaticFiles) {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("web");
        fs::create_dir_all(root.join("sub")).unwrap();
        fs::write(root.join("index.html"), "<h1>home</h1>").unwrap();
        fs::write(root.join("sub/index.html"), "<h1>sub</h1>").unwrap();
        fs::write(root.join("app.js"), "x".repeat(4096)).unwrap();
        fs::write(root.join("config.xml"), "<secret/>").unwrap();
        fs::write(root.join("image.bin"), vec![7u8; 100_000]).unwrap();
        fs::write(dir.path().join("outside.txt"), "secret").unwrap();
        let sf = StaticFiles::new(&root, "/static", false, 1024 * 1024 * 1024).unwrap();
        (dir, sf)
    }

    fn get(sf: &StaticFiles, target: &str) -> HttpReply {
        sf.handle(&ParsedRequest::new("GET", target))
    }

    #[test]
    fn test_index_for_trailing_slash() {
        let (_d, sf) = site();
        let reply = get(&sf, "/static/");
        assert_eq!(reply.status, 200);
        assert_eq!(reply.body, b"<h1>home</h1>");
        assert_eq!(reply.header("Content-Type"), Some("text/html; charset=UTF-8"));
        assert_eq!(reply.header("Cache-Control"), Some(CACHE_CONTROL));
        assert!(reply.header("ETag").is_some());
        assert_eq!(get(&sf, "/static/sub/").body, b"<h1>sub</h1>");
    }

    #[test]
    fn test_traversal_is_forbidden() {
        let (_d, sf) = site();
        assert_eq!(get(&sf, "/static/../outside.txt").status, 403);
        assert_eq!(get(&sf, "/static/%2e%2e/outside.txt").status, 403);
        assert_eq!(get(&sf, "/static/../../../etc/passwd").status, 403);
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_out_of_root_is_forbidden() {
        let (d, sf) = site();
        std::os::unix::fs::symlink(d.path().join("outside.txt"), sf.root().join("link.txt"))
            .unwrap();
        let reply = get(&sf, "/static/link.txt");
        assert_eq!(reply.status, 403);
        assert!(reply.body != b"secret");
    }

    #[test]
    fn test_denylist_is_forbidden() {
        let (_d, sf) = site();
        assert_eq!(get(&sf, "/static/config.xml").status, 403);
        assert_eq!(get(&sf, "/static/.env").status, 403);
    }

    #[test]
    fn test_missing_is_not_found() {
        let (_d, sf) = site();
        assert_eq!(get(&sf, "/static/nope.html").status, 404);
    }

    #[test]
    fn test_directory_redirect() {
        let (_d, sf) = site();
        let reply = get(&sf, "/static/sub?x=1");
        assert_eq!(reply.status, 301);
        assert_eq!(reply.header("Location"), Some("/static/sub/"));

        let keep = StaticFiles {
            redirect_keep_query: true,
            ..sf
        };
        assert_eq!(
            get(&keep, "/static/sub?x=1").header("Location"),
            Some("/static/sub/?x=1")
        );
    }

    #[test]
    fn test_redirect_location_is_normalized() {
        let (_d, sf) = site();
        for target in ["/static/./sub", "/static/.//sub", "/static/././/sub", "/static/x/../sub"] {
            let reply = get(&sf, target);
            assert_eq!(reply.status, 301, "{target}");
            assert_eq!(reply.header("Location"), Some("/static/sub/"), "{target}");
        }
    }

    #[test]
    fn test_oversize_file_refused() {
        let (_d, sf) = site();
        let sf = sf.with_max_file_bytes(50_000);
        let reply = get(&sf, "/static/image.bin");
        assert_eq!(reply.status, 500);
        assert!(reply.body.len() < 100);
        assert_eq!(get(&sf, "/static/app.js").status, 200);
    }

    #[test]
    fn test_conditional_get() {
        let (_d, sf) = site();
        let first = get(&sf, "/static/app.js");
        let lm = first.header("Last-Modified").unwrap().to_string();

        let req = ParsedRequest::new("GET", "/static/app.js").with_header("If-Modified-Since", &lm);
        let reply = sf.handle(&req);
        assert_eq!(reply.status, 304);
        assert!(reply.body.is_empty());

        let req = ParsedRequest::new("GET", "/static/app.js")
            .with_header("If-Modified-Since", "Mon, 01 Jan 2001 00:00:00 GMT");
        let reply = sf.handle(&req);
        assert_eq!(reply.status, 200);
        assert_eq!(reply.body.len(), 4096);
    }

    #[test]
    fn test_not_modified_since_rules() {
        let mtime = UNIX_EPOCH + Duration::from_millis(1_000_500);
        let lm = httpdate::fmt_http_date(mtime);
        // Header truncated to whole seconds still matches.
        assert!(not_modified_since(&lm, mtime, &lm));
        let earlier = httpdate::fmt_http_date(UNIX_EPOCH + Duration::from_secs(998));
        assert!(!not_modified_since(&earlier, mtime, &lm));
        assert!(!not_modified_since("garbage", mtime, &lm));
        assert!(not_modified_since("garbage", mtime, "garbage"));
    }

    #[test]
    fn test_binary_files_not_compressible() {
        let (_d, sf) = site();
        let reply = get(&sf, "/static/image.bin").finalize(true);
        assert_eq!(reply.status, 200);
        assert_eq!(reply.body.len(), 100_000);
        assert_eq!(reply.header("Content-Encoding"), None);
        assert_eq!(reply.header("Content-Type"), Some("application/octet-stream"));
    }

    #[test]
    fn test_text_file_gzipped_when_accepted() {
        let (_d, sf) = site();
        let reply = get(&sf, "/static/app.js").finalize(true);
        assert_eq!(reply.header("Content-Encoding"), Some("gzip"));
    }

    #[test]
    fn test_only_get() {
        let (_d, sf) = site();
        let reply = sf.handle(&ParsedRequest::new("POST", "/static/app.js"));
        assert_eq!(reply.status, 405);
        assert_eq!(reply.header("Allow"), Some("GET"));
    }

    #[test]
    fn test_chunk_tiers_and_etag() {
        assert_eq!(chunk_tier(0), 8 * 1024);
        assert_eq!(chunk_tier(100 * 1024 * 1024), 32 * 1024);
        assert_eq!(chunk_tier(u64::MAX), 64 * 1024);
        assert_eq!(entity_tag(UNIX_EPOCH + Duration::from_secs(255), 16), "\"ff-10\"");
    }
}
