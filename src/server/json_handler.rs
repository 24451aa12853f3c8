use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

use super::request::ParsedRequest;
use super::response::HttpReply;
use crate::ids::TraceId;
use crate::io::{Io, MessageCatalog};
use crate::registry::ServiceRegistry;
use crate::service::{ServiceCall, ServiceEnv};

/// Why a URL did not name a service.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RouteError {
    #[error("path is outside the JSON context")]
    OutsideContext,
    #[error("no service named in path")]
    Empty,
    #[error("invalid path segment `{0}`")]
    InvalidSegment(String),
}

/// `/<json ctx>/a/b/C` → `<package>.a.b.C`.
///
/// The query string is ignored. Segments are joined with `.` and keep their
/// case; an empty segment or one containing `.` rejects the path.
pub fn resolve_service_name(
    package: &str,
    json_context: &str,
    path: &str,
) -> Result<String, RouteError> {
    let path = path.split('?').next().unwrap_or_default();
    let ctx = json_context.trim_end_matches('/');
    let rest = path
        .strip_prefix(ctx)
        .ok_or(RouteError::OutsideContext)?;
    let rest = match rest.strip_prefix('/') {
        Some(r) => r,
        None if rest.is_empty() => return Err(RouteError::Empty),
        None => return Err(RouteError::OutsideContext),
    };
    if rest.is_empty() {
        return Err(RouteError::Empty);
    }
    let mut segments = Vec::new();
    for seg in rest.split('/') {
        if seg.is_empty() || seg.contains('.') {
            return Err(RouteError::InvalidSegment(seg.to_string()));
        }
        segments.push(seg);
    }
    let suffix = segments.join(".");
    Ok(if package.is_empty() {
        suffix
    } else {
        format!("{package}.{suffix}")
    })
}

/// Dispatches requests under the JSON context to registered services.
#[derive(Clone)]
pub struct JsonHandler {
    package: String,
    context: String,
    registry: Arc<ServiceRegistry>,
    catalog: Arc<MessageCatalog>,
    env: ServiceEnv,
}

impl JsonHandler {
    #[must_use]
    pub fn new(
        context: &str,
        registry: Arc<ServiceRegistry>,
        catalog: Arc<MessageCatalog>,
        env: ServiceEnv,
    ) -> Self {
        Self {
            package: registry.package().to_string(),
            context: context.to_string(),
            registry,
            catalog,
            env,
        }
    }

    pub fn handle(&self, req: &ParsedRequest) -> HttpReply {
        let name = match resolve_service_name(&self.package, &self.context, &req.path) {
            Ok(name) => name,
            Err(e) => {
                error!(path = %req.path, error = %e, "Service path not resolvable");
                return HttpReply::json_error(404);
            }
        };
        let Some(entry) = self.registry.get(&name) else {
            error!(service = %name, path = %req.path, "Service not found");
            return HttpReply::json_error(404);
        };

        let parsed = match req.method.as_str() {
            "GET" => Io::from_query(req.query.as_deref().unwrap_or_default())
                .map_err(|e| e.to_string()),
            "POST" => parse_post_body(&req.body),
            other => {
                error!(service = %name, method = %other, "Unsupported method for service");
                return HttpReply::json_error(405).with_header("Allow", "GET, POST");
            }
        };
        let mut io = match parsed {
            Ok(io) => io,
            Err(reason) => {
                warn!(service = %name, error = %reason, "Request payload rejected");
                return HttpReply::json_error(400);
            }
        };

        let trace_id = TraceId::from_header_or_new(req.header("x-trace-id"));
        let call = ServiceCall::with_trace_id(name.as_str(), trace_id);
        let mut service = entry.create();
        match call.run(service.as_mut(), &self.env, &mut io) {
            Ok(()) => {
                info!(
                    trace_id = %trace_id,
                    service = %name,
                    has_err = io.has_error(),
                    "Service response ready"
                );
                HttpReply::json(200, &io.to_json(&self.catalog))
                    .with_header("Cache-Control", "no-cache")
            }
            Err(failed) => {
                error!(
                    trace_id = %failed.trace_id,
                    service = %failed.name,
                    "Service dispatch failed"
                );
                HttpReply::json_error(500)
            }
        }
    }
}

fn parse_post_body(body: &[u8]) -> Result<Io, String> {
    let text = std::str::from_utf8(body).map_err(|e| e.to_string())?;
    if text.trim().is_empty() {
        return Ok(Io::new());
    }
    let value: serde_json::Value = serde_json::from_str(text).map_err(|e| e.to_string())?;
    Io::from_json(value).map_err(|e| e.to_string())
}
