use std::any::Any;
use std::backtrace::Backtrace;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Instant;
use thiserror::Error;
use tracing::{error, info};

use super::{ServiceEnv, WebService};
use crate::ids::TraceId;
use crate::io::Io;

/// Uniform failure of one service invocation. Carries only what the HTTP
/// layer may log; the cause has already been logged by [`ServiceCall`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("service {name} failed (trace_id {trace_id})")]
pub struct ServiceFailed {
    pub trace_id: TraceId,
    pub name: String,
}

/// One invocation of one service: begin/end markers, a trace id shared by
/// every log line of the request, and containment of errors and panics.
pub struct ServiceCall {
    name: String,
    trace_id: TraceId,
}

impl ServiceCall {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            trace_id: TraceId::new(),
        }
    }

    /// Use an id supplied by the caller (e.g. an inbound `X-Trace-Id`).
    #[must_use]
    pub fn with_trace_id(name: impl Into<String>, trace_id: TraceId) -> Self {
        Self {
            name: name.into(),
            trace_id,
        }
    }

    #[must_use]
    pub fn trace_id(&self) -> TraceId {
        self.trace_id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn run(
        &self,
        service: &mut dyn WebService,
        env: &ServiceEnv,
        io: &mut Io,
    ) -> Result<(), ServiceFailed> {
        let start = Instant::now();
        info!(trace_id = %self.trace_id, service = %self.name, "Service begin");

        let outcome = catch_unwind(AssertUnwindSafe(|| {
            service.execute(self.trace_id, env, io)
        }));

        let result = match outcome {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                error!(
                    trace_id = %self.trace_id,
                    service = %self.name,
                    error = ?e,
                    "Service failed"
                );
                Err(self.failed())
            }
            Err(panic) => {
                let backtrace = Backtrace::capture();
                error!(
                    trace_id = %self.trace_id,
                    service = %self.name,
                    panic_message = %panic_message(panic.as_ref()),
                    backtrace = %backtrace,
                    "Service panicked"
                );
                Err(self.failed())
            }
        };

        info!(
            trace_id = %self.trace_id,
            service = %self.name,
            elapsed_ms = start.elapsed().as_millis() as u64,
            has_err = io.has_error(),
            ok = result.is_ok(),
            "Service end"
        );
        result
    }

    fn failed(&self) -> ServiceFailed {
        ServiceFailed {
            trace_id: self.trace_id,
            name: self.name.clone(),
        }
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
