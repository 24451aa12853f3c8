use rusqlite::types::{Value, ValueRef};
use rusqlite::{params_from_iter, Connection, Row};
use std::time::Instant;
use tracing::debug;

use super::error::SqlError;
use crate::ids::TraceId;
use crate::io::{IoRow, IoValue, Record};

/// Incrementally assembled SQL text with its positional parameters.
///
/// Fragments are joined with a single space. Each `?` in a fragment passed
/// to [`add_query_param`](Self::add_query_param) binds the value given with
/// it, so text and parameters can never drift apart.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct SqlBuilder {
    sql: String,
    params: Vec<Value>,
}

impl SqlBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn push_fragment(&mut self, fragment: &str) {
        let fragment = fragment.trim();
        if fragment.is_empty() {
            return;
        }
        if !self.sql.is_empty() {
            self.sql.push(' ');
        }
        self.sql.push_str(fragment);
    }

    pub fn add_query(&mut self, fragment: &str) -> &mut Self {
        self.push_fragment(fragment);
        self
    }

    /// Append a fragment holding one `?` placeholder and bind `value` to it.
    pub fn add_query_param(&mut self, fragment: &str, value: impl Into<Value>) -> &mut Self {
        self.push_fragment(fragment);
        self.params.push(value.into());
        self
    }

    /// [`add_query_param`](Self::add_query_param) only when `cond` holds;
    /// the building block for optional search conditions.
    pub fn add_query_if(
        &mut self,
        cond: bool,
        fragment: &str,
        value: impl Into<Value>,
    ) -> &mut Self {
        if cond {
            self.add_query_param(fragment, value);
        }
        self
    }

    /// `prefix (?, ?, ...) suffix` with one placeholder per value. An empty
    /// list renders `(NULL)`, which matches nothing.
    pub fn add_params_in<I, V>(&mut self, prefix: &str, values: I, suffix: &str) -> &mut Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let before = self.params.len();
        self.params.extend(values.into_iter().map(Into::into));
        let n = self.params.len() - before;
        let list = if n == 0 {
            "(NULL)".to_string()
        } else {
            format!("({})", vec!["?"; n].join(", "))
        };
        self.push_fragment(&format!("{} {} {}", prefix.trim(), list, suffix.trim()));
        self
    }

    #[must_use]
    pub fn sql(&self) -> &str {
        &self.sql
    }

    #[must_use]
    pub fn params(&self) -> &[Value] {
        &self.params
    }
}

/// Bind form of a record value. Dates travel as ISO text; list sections
/// cannot be bound.
pub fn to_sql_value(value: &IoValue) -> Result<Value, SqlError> {
    Ok(match value {
        IoValue::Null => Value::Null,
        IoValue::Str(s) => Value::Text(s.clone()),
        IoValue::Bool(b) => Value::Integer(i64::from(*b)),
        IoValue::Number(n) => match n.as_i64() {
            Some(i) => Value::Integer(i),
            None => Value::Real(n.as_f64().unwrap_or_default()),
        },
        IoValue::Date(d) => Value::Text(d.format(crate::io::DATE_FORMAT).to_string()),
        IoValue::DateTime(dt) => Value::Text(dt.format(crate::io::DATETIME_FORMAT).to_string()),
        IoValue::Rows(_) => {
            return Err(SqlError::Param("list sections cannot be bound".to_string()));
        }
    })
}

/// Fresh value for an `upd_ts` optimistic-lock column: local time to the
/// microsecond, `YYYYMMDDhhmmssffffff`.
#[must_use]
pub fn new_upd_ts() -> String {
    chrono::Local::now().format("%Y%m%d%H%M%S%6f").to_string()
}

/// Result of [`SqlSession::select_bulk`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BulkResult {
    pub rows: Vec<IoRow>,
    /// More rows matched than the limit allowed; `rows` holds the first
    /// `limit` of them.
    pub limit_exceeded: bool,
}

/// Statement helpers over the connection of the current request's
/// transaction. Every call is logged at debug with the request's trace id.
pub struct SqlSession<'c> {
    conn: &'c Connection,
    trace_id: TraceId,
}

impl<'c> SqlSession<'c> {
    #[must_use]
    pub fn new(conn: &'c Connection, trace_id: TraceId) -> Self {
        Self { conn, trace_id }
    }

    #[must_use]
    pub fn trace_id(&self) -> TraceId {
        self.trace_id
    }

    /// Exactly one row, else [`SqlError::NoRow`] / [`SqlError::TooManyRows`].
    pub fn select_one(&self, query: &SqlBuilder) -> Result<IoRow, SqlError> {
        self.select_one_or_none(query)?.ok_or_else(|| SqlError::NoRow {
            sql: query.sql().to_string(),
        })
    }

    pub fn select_one_or_none(&self, query: &SqlBuilder) -> Result<Option<IoRow>, SqlError> {
        let mut rows = self.query(query, Some(2))?;
        if rows.len() > 1 {
            return Err(SqlError::TooManyRows {
                sql: query.sql().to_string(),
            });
        }
        Ok(rows.pop())
    }

    /// All matching rows, or the first `limit` with `limit_exceeded` set
    /// when there were more.
    pub fn select_bulk(
        &self,
        query: &SqlBuilder,
        limit: Option<usize>,
    ) -> Result<BulkResult, SqlError> {
        let mut rows = self.query(query, limit.map(|l| l.saturating_add(1)))?;
        let limit_exceeded = match limit {
            Some(l) if rows.len() > l => {
                rows.truncate(l);
                true
            }
            _ => false,
        };
        Ok(BulkResult {
            rows,
            limit_exceeded,
        })
    }

    /// Insert/update/delete that must touch exactly one row.
    pub fn execute_one(&self, query: &SqlBuilder) -> Result<(), SqlError> {
        match self.execute_many(query)? {
            1 => Ok(()),
            n => Err(SqlError::RowCount {
                sql: query.sql().to_string(),
                expected: 1,
                actual: n,
            }),
        }
    }

    /// Optimistic-lock write: `true` when one row changed, `false` when the
    /// row was modified or removed by someone else since it was read.
    pub fn execute_one_or_stale(&self, query: &SqlBuilder) -> Result<bool, SqlError> {
        match self.execute_many(query)? {
            0 => Ok(false),
            1 => Ok(true),
            n => Err(SqlError::RowCount {
                sql: query.sql().to_string(),
                expected: 1,
                actual: n,
            }),
        }
    }

    /// Affected row count.
    pub fn execute_many(&self, query: &SqlBuilder) -> Result<usize, SqlError> {
        let start = Instant::now();
        let mut stmt = self.conn.prepare_cached(query.sql())?;
        let n = stmt.execute(params_from_iter(query.params().iter()))?;
        debug!(
            trace_id = %self.trace_id,
            sql = %query.sql(),
            params = query.params().len(),
            affected = n,
            elapsed_us = start.elapsed().as_micros() as u64,
            "SQL execute"
        );
        Ok(n)
    }

    /// Parameterless script (DDL, bootstrap data).
    pub fn execute_batch(&self, sql: &str) -> Result<(), SqlError> {
        debug!(trace_id = %self.trace_id, bytes = sql.len(), "SQL batch");
        self.conn.execute_batch(sql)?;
        Ok(())
    }

    fn query(&self, query: &SqlBuilder, cap: Option<usize>) -> Result<Vec<IoRow>, SqlError> {
        let start = Instant::now();
        let mut stmt = self.conn.prepare_cached(query.sql())?;
        let names: Vec<String> = stmt
            .column_names()
            .into_iter()
            .map(str::to_lowercase)
            .collect();
        let mut rows = stmt.query(params_from_iter(query.params().iter()))?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(map_row(&names, row)?);
            if cap.is_some_and(|c| out.len() >= c) {
                break;
            }
        }
        debug!(
            trace_id = %self.trace_id,
            sql = %query.sql(),
            params = query.params().len(),
            rows = out.len(),
            elapsed_us = start.elapsed().as_micros() as u64,
            "SQL select"
        );
        Ok(out)
    }
}

fn map_row(names: &[String], row: &Row<'_>) -> Result<IoRow, SqlError> {
    let mut out = IoRow::new();
    for (i, name) in names.iter().enumerate() {
        let value = match row.get_ref(i)? {
            ValueRef::Null => IoValue::Null,
            ValueRef::Integer(n) => IoValue::Number(n.into()),
            ValueRef::Real(f) => {
                serde_json::Number::from_f64(f).map_or(IoValue::Null, IoValue::Number)
            }
            ValueRef::Text(bytes) => match std::str::from_utf8(bytes) {
                Ok(s) => IoValue::Str(s.to_string()),
                Err(_) => {
                    return Err(SqlError::UnsupportedColumn {
                        column: name.clone(),
                        kind: "non-UTF-8 text",
                    });
                }
            },
            ValueRef::Blob(_) => {
                return Err(SqlError::UnsupportedColumn {
                    column: name.clone(),
                    kind: "blob",
                });
            }
        };
        out.put_value(name, value)?;
    }
    Ok(out)
}
