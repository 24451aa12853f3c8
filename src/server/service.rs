use anyhow::Context;
use may_minihttp::{HttpService, Request, Response};
use std::backtrace::Backtrace;
use std::io;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

use super::json_handler::JsonHandler;
use super::request::{parse_request, ParsedRequest};
use super::response::{write_reply, HttpReply};
use crate::service::panic_message;
use crate::static_files::StaticFiles;

/// Called once when a request reaches the stop context.
pub type StopTrigger = Arc<dyn Fn() + Send + Sync>;

/// The four configured URL prefixes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextPaths {
    pub root: String,
    pub stop: String,
    pub static_files: String,
    pub json: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Root,
    Stop,
    Static,
    Json,
}

fn normalize(ctx: &str) -> &str {
    let trimmed = ctx.trim_end_matches('/');
    if trimmed.is_empty() {
        "/"
    } else {
        trimmed
    }
}

/// `path` lies under `ctx` on a segment boundary.
fn under(ctx: &str, path: &str) -> bool {
    let ctx = normalize(ctx);
    ctx == "/"
        || path == ctx
        || path
            .strip_prefix(ctx)
            .is_some_and(|rest| rest.starts_with('/'))
}

impl ContextPaths {
    /// Longest configured context containing `path`.
    #[must_use]
    pub fn route(&self, path: &str) -> Option<Route> {
        [
            (Route::Stop, self.stop.as_str()),
            (Route::Json, self.json.as_str()),
            (Route::Static, self.static_files.as_str()),
            (Route::Root, self.root.as_str()),
        ]
        .into_iter()
        .filter(|(_, ctx)| under(ctx, path))
        .max_by_key(|(_, ctx)| normalize(ctx).len())
        .map(|(route, _)| route)
    }
}

struct AppState {
    contexts: ContextPaths,
    json: JsonHandler,
    static_files: Option<StaticFiles>,
    stop: Option<StopTrigger>,
}

/// The one `HttpService`: context routing plus the error boundary every
/// request passes through.
#[derive(Clone)]
pub struct AppService {
    state: Arc<AppState>,
}

impl AppService {
    #[must_use]
    pub fn new(
        contexts: ContextPaths,
        json: JsonHandler,
        static_files: Option<StaticFiles>,
    ) -> Self {
        Self {
            state: Arc::new(AppState {
                contexts,
                json,
                static_files,
                stop: None,
            }),
        }
    }

    /// Enable the stop context. Without a trigger it answers 404.
    #[must_use]
    pub fn with_stop_trigger(self, trigger: StopTrigger) -> Self {
        let state = match Arc::try_unwrap(self.state) {
            Ok(mut state) => {
                state.stop = Some(trigger);
                state
            }
            Err(shared) => AppState {
                contexts: shared.contexts.clone(),
                json: shared.json.clone(),
                static_files: shared.static_files.clone(),
                stop: Some(trigger),
            },
        };
        Self {
            state: Arc::new(state),
        }
    }

    /// Route one parsed request to its handler.
    #[must_use]
    pub fn dispatch(&self, req: &ParsedRequest) -> HttpReply {
        let state = &self.state;
        match state.contexts.route(&req.path) {
            Some(Route::Json) => state.json.handle(req),
            Some(Route::Static) => match &state.static_files {
                Some(sf) => sf.handle(req),
                None => HttpReply::text(404, "Not Found"),
            },
            Some(Route::Stop) => match &state.stop {
                Some(trigger) => {
                    warn!(path = %req.path, "Stop requested over HTTP");
                    trigger();
                    HttpReply::text(200, "stopping")
                }
                None => HttpReply::text(404, "Not Found"),
            },
            Some(Route::Root) if req.path == normalize(&state.contexts.root) => {
                let location = format!(
                    "{}/",
                    normalize(&state.contexts.static_files).trim_end_matches('/')
                );
                HttpReply::redirect(302, &location)
            }
            Some(Route::Root) | None => HttpReply::text(404, "Not Found"),
        }
    }
}

/// Plaintext 500 for failures outside service dispatch. Carries the error
/// chain and backtrace for the operator.
fn infrastructure_error(detail: &str) -> HttpReply {
    HttpReply::text(500, format!("Internal Server Error\n\n{detail}"))
}

/// Write `reply`; if that fails, write a plaintext 500 instead. An error
/// from the second write is returned so the server drops the connection.
fn deliver(
    reply: HttpReply,
    path: &str,
    mut write: impl FnMut(HttpReply) -> io::Result<()>,
) -> io::Result<()> {
    match write(reply) {
        Ok(()) => Ok(()),
        Err(e) => {
            error!(path = %path, error = %e, "Response could not be written");
            let fallback = infrastructure_error(&format!("{e:#}")).finalize(false);
            write(fallback).map_err(|e2| {
                error!(error = %e2, "Error response could not be written; closing connection");
                e2
            })
        }
    }
}

impl HttpService for AppService {
    fn call(&mut self, req: Request, res: &mut Response) -> io::Result<()> {
        let start = Instant::now();

        let outcome = catch_unwind(AssertUnwindSafe(
            || -> anyhow::Result<(ParsedRequest, HttpReply)> {
                let parsed = parse_request(req).context("reading request")?;
                let reply = self.dispatch(&parsed);
                Ok((parsed, reply))
            },
        ));

        let (reply, gzip, method, path) = match outcome {
            Ok(Ok((parsed, reply))) => {
                let gzip = parsed.accepts_gzip();
                (reply, gzip, parsed.method, parsed.path)
            }
            Ok(Err(e)) => {
                error!(error = ?e, "Request failed outside service dispatch");
                (
                    infrastructure_error(&format!("{e:?}")),
                    false,
                    String::new(),
                    String::new(),
                )
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                let backtrace = Backtrace::capture();
                error!(
                    panic_message = %message,
                    backtrace = %backtrace,
                    "Request handler panicked"
                );
                (
                    infrastructure_error(&format!("panic: {message}\n\n{backtrace}")),
                    false,
                    String::new(),
                    String::new(),
                )
            }
        };

        let status = reply.status;
        let result = deliver(reply.finalize(gzip), &path, |r| write_reply(res, r));

        info!(
            method = %method,
            path = %path,
            status = status,
            latency_ms = start.elapsed().as_millis() as u64,
            "Request handled"
        );
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::MessageCatalog;
    use crate::registry::ServiceRegistry;
    use crate::server::response::{HeaderLines, CONTENT_TYPE_TEXT};
    use crate::service::ServiceEnv;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn contexts() -> ContextPaths {
        ContextPaths {
            root: "/".to_string(),
            stop: "/stop-9f2c".to_string(),
            static_files: "/static".to_string(),
            json: "/services".to_string(),
        }
    }

    fn app() -> AppService {
        let json = JsonHandler::new(
            "/services",
            Arc::new(ServiceRegistry::new("app")),
            Arc::new(MessageCatalog::new()),
            ServiceEnv::default(),
        );
        AppService::new(contexts(), json, None)
    }

    #[test]
    fn test_longest_context_wins() {
        let c = ContextPaths {
            json: "/app/services".to_string(),
            static_files: "/app".to_string(),
            ..contexts()
        };
        assert_eq!(c.route("/app/services/a/B"), Some(Route::Json));
        assert_eq!(c.route("/app/index.html"), Some(Route::Static));
        assert_eq!(c.route("/app"), Some(Route::Static));
        assert_eq!(c.route("/application"), Some(Route::Root));
        assert_eq!(c.route("/stop-9f2c"), Some(Route::Stop));
    }

    #[test]
    fn test_root_redirects_to_static() {
        let reply = app().dispatch(&ParsedRequest::new("GET", "/"));
        assert_eq!(reply.status, 302);
        assert_eq!(reply.header("Location"), Some("/static/"));
    }

    #[test]
    fn test_unmatched_is_404() {
        assert_eq!(app().dispatch(&ParsedRequest::new("GET", "/elsewhere")).status, 404);
        // No static root configured.
        assert_eq!(app().dispatch(&ParsedRequest::new("GET", "/static/a.js")).status, 404);
    }

    #[test]
    fn test_stop_context() {
        assert_eq!(app().dispatch(&ParsedRequest::new("GET", "/stop-9f2c")).status, 404);

        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let app = app().with_stop_trigger(Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        let reply = app.dispatch(&ParsedRequest::new("GET", "/stop-9f2c"));
        assert_eq!(reply.status, 200);
        assert_eq!(reply.body, b"stopping");
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_infrastructure_error_carries_detail() {
        let reply = infrastructure_error("boom\ncaused by: disk");
        assert_eq!(reply.status, 500);
        assert!(String::from_utf8(reply.body).unwrap().contains("caused by: disk"));
    }

    #[test]
    fn test_unwritable_reply_falls_back_to_plaintext_500() {
        let table = HeaderLines::new(64, 8);
        let mut written = Vec::new();
        let reply = HttpReply::text(200, "ok").with_header("X-Bad", "a\nb");
        deliver(reply.finalize(false), "/x", |r| {
            table.lines_for(&r)?;
            written.push(r);
            Ok(())
        })
        .unwrap();

        assert_eq!(written.len(), 1);
        let fallback = &written[0];
        assert_eq!(fallback.status, 500);
        assert_eq!(fallback.header("Content-Type"), Some(CONTENT_TYPE_TEXT));
        assert_eq!(fallback.header("X-Frame-Options"), Some("DENY"));
        let body = String::from_utf8(fallback.body.clone()).unwrap();
        assert!(body.starts_with("Internal Server Error"));
        assert!(body.contains("contains a line break"));
    }

    #[test]
    fn test_second_write_failure_is_returned() {
        let mut attempts = 0;
        let err = deliver(HttpReply::text(200, "ok"), "/x", |_| {
            attempts += 1;
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "gone"))
        })
        .unwrap_err();
        assert_eq!(attempts, 2);
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }
}
