//! HTTP side of the server: request parsing, context routing, the JSON
//! service handler, response finishing and the process lifecycle.

pub mod http_server;
pub mod json_handler;
pub mod lifecycle;
pub mod request;
pub mod response;
pub mod service;

pub use http_server::{HttpServer, ServerHandle};
pub use json_handler::{resolve_service_name, JsonHandler, RouteError};
pub use lifecycle::{process_exit, ExitFn, ServerLifecycle, ShutdownTrigger, STOP_GRACE};
pub use request::{parse_request, ParsedRequest};
pub use response::{write_reply, HttpReply};
pub use service::{AppService, ContextPaths, Route, StopTrigger};
