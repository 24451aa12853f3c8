//! Service contracts.
//!
//! Application code implements either [`OnlineService`] (no database) or
//! [`DbService`] (runs inside exactly one transaction). Both are adapted to
//! the object-safe [`WebService`] the dispatcher calls, through [`Plain`] and
//! [`Transactional`]. Business failures are reported by appending error
//! messages to the [`Io`]; returning `Err` or panicking is reserved for
//! states that should never happen.

mod lifecycle;
mod transactional;

pub use lifecycle::{ServiceCall, ServiceFailed};
pub(crate) use lifecycle::panic_message;
pub use transactional::Transactional;

use crate::db::{DbPool, SqlSession};
use crate::ids::TraceId;
use crate::io::Io;

/// A service that does not touch the database.
pub trait OnlineService: Send {
    fn do_execute(&mut self, io: &mut Io) -> anyhow::Result<()>;
}

/// A service run inside one transaction: committed when `do_execute`
/// returns `Ok` with no error message on the record, rolled back otherwise.
pub trait DbService: Send {
    fn do_execute(&mut self, db: &SqlSession<'_>, io: &mut Io) -> anyhow::Result<()>;
}

/// Shared resources a service invocation may need.
#[derive(Clone, Default)]
pub struct ServiceEnv {
    pool: Option<DbPool>,
}

impl ServiceEnv {
    #[must_use]
    pub fn new(pool: Option<DbPool>) -> Self {
        Self { pool }
    }

    #[must_use]
    pub fn pool(&self) -> Option<&DbPool> {
        self.pool.as_ref()
    }
}

/// What the dispatcher invokes. One fresh instance per request.
pub trait WebService: Send {
    fn execute(&mut self, trace_id: TraceId, env: &ServiceEnv, io: &mut Io) -> anyhow::Result<()>;
}

/// Adapter for [`OnlineService`].
pub struct Plain<S>(pub S);

impl<S: OnlineService> WebService for Plain<S> {
    fn execute(
        &mut self,
        _trace_id: TraceId,
        _env: &ServiceEnv,
        io: &mut Io,
    ) -> anyhow::Result<()> {
        self.0.do_execute(io)
    }
}
