//! SQLite access: a fixed-size connection pool and the statement helpers
//! transactional services use inside their one transaction.

mod error;
mod pool;
mod sql;

pub use error::{PoolError, SqlError};
pub use pool::{DbPool, PoolConfig, PooledConnection};
pub use sql::{new_upd_ts, to_sql_value, BulkResult, SqlBuilder, SqlSession};
