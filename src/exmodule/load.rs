use super::{MSG_NOT_FOUND, MSG_REQUIRED};
use crate::db::{SqlBuilder, SqlSession};
use crate::io::{Io, Record};
use crate::service::DbService;

/// Fetch one user by `user_id`.
#[derive(Debug, Default)]
pub struct ExampleLoad;

impl DbService for ExampleLoad {
    fn do_execute(&mut self, db: &SqlSession<'_>, io: &mut Io) -> anyhow::Result<()> {
        if io.is_blank("user_id") {
            io.add_item_error(MSG_REQUIRED, "user_id", &["User ID"]);
            return Ok(());
        }
        let user_id = io.get_string("user_id")?;

        let mut q = SqlBuilder::new();
        q.add_query("SELECT user_nm, email, upd_ts FROM t_user")
            .add_query_param("WHERE user_id = ?", user_id.clone());
        let Some(row) = db.select_one_or_none(&q)? else {
            io.add_item_error(MSG_NOT_FOUND, "user_id", &[user_id.as_str()]);
            return Ok(());
        };

        io.put_force_string("user_nm", row.get_string("user_nm")?)?;
        match row.get_string_nullable("email")? {
            Some(email) => io.put_force_string("email", email)?,
            None => io.put_force_null("email")?,
        }
        io.put_force_string("upd_ts", row.get_string("upd_ts")?)?;
        Ok(())
    }
}
