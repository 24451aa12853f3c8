use super::MSG_TOO_MANY;
use crate::db::{SqlBuilder, SqlSession};
use crate::io::{Io, Record};
use crate::service::DbService;

const DEFAULT_LIMIT: usize = 100;

/// List users whose name starts with `user_nm` (all users when blank) into
/// the `list` rows. Warns when the result was cut at the limit.
#[derive(Debug)]
pub struct ExampleSearch {
    limit: usize,
}

impl Default for ExampleSearch {
    fn default() -> Self {
        Self {
            limit: DEFAULT_LIMIT,
        }
    }
}

impl ExampleSearch {
    #[must_use]
    pub fn with_limit(limit: usize) -> Self {
        Self { limit }
    }
}

impl DbService for ExampleSearch {
    fn do_execute(&mut self, db: &SqlSession<'_>, io: &mut Io) -> anyhow::Result<()> {
        let prefix = io.get_string_nullable("user_nm")?.unwrap_or_default();
        let prefix = prefix.trim();

        let mut q = SqlBuilder::new();
        q.add_query("SELECT user_id, user_nm, email, upd_ts FROM t_user")
            .add_query_if(
                !prefix.is_empty(),
                "WHERE user_nm LIKE ? ESCAPE '\\'",
                format!("{}%", escape_like(prefix)),
            )
            .add_query("ORDER BY user_id");
        let result = db.select_bulk(&q, Some(self.limit))?;
        if result.limit_exceeded {
            io.add_warn(MSG_TOO_MANY, &[self.limit.to_string().as_str()]);
        }
        io.put_force_rows("list", &result.rows)?;
        Ok(())
    }
}

fn escape_like(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
