use std::time::Duration;
use thiserror::Error;

use crate::io::IoError;

/// Failures from the SQL helper. Every variant is an "unexpected state":
/// the transactional wrapper rolls back and the request becomes a 500.
/// Stale optimistic-lock updates are *not* here; they come back as
/// `Ok(false)` from [`SqlSession::execute_one_or_stale`](super::SqlSession::execute_one_or_stale).
#[derive(Debug, Error)]
pub enum SqlError {
    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),
    #[error("expected exactly one row, found none: {sql}")]
    NoRow { sql: String },
    #[error("expected at most one row, found several: {sql}")]
    TooManyRows { sql: String },
    #[error("expected {expected} affected row(s), got {actual}: {sql}")]
    RowCount {
        sql: String,
        expected: usize,
        actual: usize,
    },
    #[error("column `{column}` has unsupported type {kind}")]
    UnsupportedColumn { column: String, kind: &'static str },
    #[error("parameter cannot be bound: {0}")]
    Param(String),
    #[error("row mapping failed: {0}")]
    Row(#[from] IoError),
}

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("failed to open database connection: {0}")]
    Open(#[source] rusqlite::Error),
    #[error("connection pool is closed")]
    Closed,
    #[error("no connection available within {0:?}")]
    Timeout(Duration),
}
