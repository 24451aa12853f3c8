use crate::io::{Io, Record};
use crate::service::OnlineService;

/// Liveness check that never touches the database.
#[derive(Debug, Default)]
pub struct ExamplePing;

impl OnlineService for ExamplePing {
    fn do_execute(&mut self, io: &mut Io) -> anyhow::Result<()> {
        io.put_force_string("status", "ok")?;
        io.put_force_datetime("server_time", chrono::Local::now().naive_local())?;
        Ok(())
    }
}
