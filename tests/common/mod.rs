#![allow(dead_code)]

pub mod test_server {
    use ioframe::config::AppConfig;
    use ioframe::io::MessageCatalog;
    use ioframe::registry::ServiceRegistry;
    use ioframe::server::{ExitFn, ServerLifecycle, ShutdownTrigger};
    use std::net::{SocketAddr, TcpListener};
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicI32, Ordering};
    use std::sync::{Arc, Once};
    use tempfile::TempDir;

    /// Ensures May coroutines are configured only once
    static MAY_INIT: Once = Once::new();

    pub fn setup_may_runtime() {
        MAY_INIT.call_once(|| {
            may::config().set_stack_size(0x8000);
        });
    }

    pub fn free_addr() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        addr
    }

    pub fn repo_path(rel: &str) -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR")).join(rel)
    }

    /// Config rooted in `dir`: database file, `web/` static root and the
    /// example schema as init script.
    pub fn test_config(dir: &Path, addr: SocketAddr) -> AppConfig {
        let web = dir.join("web");
        std::fs::create_dir_all(&web).unwrap();
        let mut config = AppConfig::default();
        config.server.bind = addr.ip().to_string();
        config.server.port = addr.port();
        config.server.workers = 2;
        config.server.stack_size = 0x8000;
        config.context.stop = "/stop-7c1d".to_string();
        config.static_files.root = web;
        config.db.path = dir.join("data").join("test.db");
        config.db.pool_size = 2;
        config.db.acquire_timeout_ms = 2_000;
        config.db.init_script = Some(repo_path("config/schema.sql"));
        config.messages.catalog = Some(repo_path("config/messages.toml"));
        config
    }

    pub struct TestApp {
        pub lifecycle: Arc<ServerLifecycle>,
        pub addr: SocketAddr,
        pub config: AppConfig,
        pub exit_code: Arc<AtomicI32>,
        pub dir: TempDir,
    }

    impl TestApp {
        pub fn db(&self) -> rusqlite::Connection {
            rusqlite::Connection::open(&self.config.db.path).unwrap()
        }

        pub fn web_root(&self) -> &Path {
            &self.config.static_files.root
        }

        pub fn exit_code(&self) -> i32 {
            self.exit_code.load(Ordering::SeqCst)
        }
    }

    impl Drop for TestApp {
        fn drop(&mut self) {
            self.lifecycle.shutdown(ShutdownTrigger::Requested);
        }
    }

    /// Start with the example services plus whatever `extra` registers.
    /// `prepare` may edit the config and populate the temp dir first.
    pub fn start_app_with(
        extra: fn(&mut ServiceRegistry),
        prepare: impl FnOnce(&mut AppConfig, &Path),
    ) -> TestApp {
        setup_may_runtime();
        let dir = tempfile::tempdir().unwrap();
        let addr = free_addr();
        let mut config = test_config(dir.path(), addr);
        prepare(&mut config, dir.path());

        let mut registry = ServiceRegistry::new(config.service.package.as_str());
        ioframe::exmodule::register(&mut registry);
        extra(&mut registry);
        let catalog = match &config.messages.catalog {
            Some(path) => MessageCatalog::load(path).unwrap(),
            None => MessageCatalog::new(),
        };

        let exit_code = Arc::new(AtomicI32::new(-1));
        let seen = Arc::clone(&exit_code);
        let exit: ExitFn = Arc::new(move |code| seen.store(code, Ordering::SeqCst));

        let lifecycle = ServerLifecycle::start(&config, registry, catalog, exit).unwrap();
        lifecycle.wait_ready().unwrap();
        TestApp {
            lifecycle,
            addr,
            config,
            exit_code,
            dir,
        }
    }

    pub fn start_app() -> TestApp {
        start_app_with(|_| {}, |_, _| {})
    }
}

pub mod http {
    use std::io::{Read, Write};
    use std::net::{SocketAddr, TcpStream};
    use std::time::Duration;

    #[derive(Debug)]
    pub struct HttpResponse {
        pub status: u16,
        pub headers: Vec<(String, String)>,
        pub body: Vec<u8>,
    }

    impl HttpResponse {
        pub fn header(&self, name: &str) -> Option<&str> {
            self.headers
                .iter()
                .find(|(n, _)| n.eq_ignore_ascii_case(name))
                .map(|(_, v)| v.as_str())
        }

        pub fn text(&self) -> String {
            String::from_utf8_lossy(&self.body).to_string()
        }

        pub fn json(&self) -> serde_json::Value {
            serde_json::from_slice(&self.body)
                .unwrap_or_else(|e| panic!("body is not JSON ({e}): {}", self.text()))
        }
    }

    fn find_header_end(buf: &[u8]) -> Option<usize> {
        buf.windows(4).position(|w| w == b"\r\n\r\n")
    }

    fn parse(buf: &[u8]) -> HttpResponse {
        let end = find_header_end(buf).unwrap_or(buf.len());
        let head = String::from_utf8_lossy(&buf[..end]).to_string();
        let mut lines = head.split("\r\n");
        let status = lines
            .next()
            .and_then(|l| l.split_whitespace().nth(1))
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);
        let headers = lines
            .filter_map(|l| l.split_once(':'))
            .map(|(n, v)| (n.trim().to_string(), v.trim().to_string()))
            .collect();
        let body = buf.get(end + 4..).unwrap_or_default().to_vec();
        HttpResponse {
            status,
            headers,
            body,
        }
    }

    /// Send raw request bytes; read until Content-Length is satisfied or the
    /// connection goes quiet.
    pub fn send_raw(addr: &SocketAddr, req: &str) -> HttpResponse {
        let mut stream = TcpStream::connect(addr).unwrap();
        stream.write_all(req.as_bytes()).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_millis(500)))
            .unwrap();
        let mut buf = Vec::new();
        loop {
            if let Some(end) = find_header_end(&buf) {
                let partial = parse(&buf);
                let expected = partial
                    .header("content-length")
                    .and_then(|v| v.parse::<usize>().ok());
                if let Some(len) = expected {
                    if buf.len() >= end + 4 + len {
                        break;
                    }
                }
            }
            let mut tmp = [0u8; 8192];
            match stream.read(&mut tmp) {
                Ok(0) => break,
                Ok(n) => buf.extend_from_slice(&tmp[..n]),
                Err(ref e)
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::TimedOut =>
                {
                    break
                }
                Err(e) => panic!("read error: {:?}", e),
            }
        }
        parse(&buf)
    }

    pub fn get(addr: &SocketAddr, path: &str, headers: &[(&str, &str)]) -> HttpResponse {
        let mut req = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\n");
        for (n, v) in headers {
            req.push_str(&format!("{n}: {v}\r\n"));
        }
        req.push_str("\r\n");
        send_raw(addr, &req)
    }

    pub fn request(addr: &SocketAddr, method: &str, path: &str, body: &str) -> HttpResponse {
        let req = format!(
            "{method} {path} HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{body}",
            body.len()
        );
        send_raw(addr, &req)
    }

    pub fn post_json(addr: &SocketAddr, path: &str, body: &str) -> HttpResponse {
        request(addr, "POST", path, body)
    }
}
