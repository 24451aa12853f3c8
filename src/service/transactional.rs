use anyhow::Context;
use tracing::{debug, info, warn};

use super::{DbService, ServiceEnv, WebService};
use crate::db::SqlSession;
use crate::ids::TraceId;
use crate::io::Io;

/// Adapter running a [`DbService`] inside one transaction on one pooled
/// connection.
///
/// - `Ok` and no error message: commit.
/// - `Ok` with an error message: controlled failure, rollback.
/// - `Err`: rollback, error propagated.
/// - panic: the transaction guard rolls back while unwinding.
///
/// The connection goes back to the pool when the guard drops, whichever of
/// these happened.
pub struct Transactional<S>(pub S);

impl<S: DbService> WebService for Transactional<S> {
    fn execute(&mut self, trace_id: TraceId, env: &ServiceEnv, io: &mut Io) -> anyhow::Result<()> {
        let pool = env
            .pool()
            .context("transactional service invoked without a database pool")?;
        let mut conn = pool.get().context("checking out a database connection")?;
        let tx = conn.transaction().context("beginning transaction")?;
        debug!(trace_id = %trace_id, "Transaction begin");

        let result = {
            let session = SqlSession::new(&tx, trace_id);
            self.0.do_execute(&session, io)
        };

        match result {
            Ok(()) if !io.has_error() => {
                tx.commit().context("committing transaction")?;
                debug!(trace_id = %trace_id, "Transaction committed");
                Ok(())
            }
            Ok(()) => {
                tx.rollback().context("rolling back transaction")?;
                info!(
                    trace_id = %trace_id,
                    "Error message reported; transaction rolled back"
                );
                Ok(())
            }
            Err(e) => {
                if let Err(rb) = tx.rollback() {
                    warn!(trace_id = %trace_id, error = %rb, "Rollback failed");
                }
                debug!(trace_id = %trace_id, "Transaction rolled back after failure");
                Err(e)
            }
        }
    }
}
