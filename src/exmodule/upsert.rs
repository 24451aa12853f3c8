use tracing::info;

use super::{MSG_DUPLICATE, MSG_REGISTERED, MSG_REQUIRED, MSG_STALE, MSG_UPDATED};
use crate::db::{new_upd_ts, SqlBuilder, SqlSession};
use crate::io::{Io, Record};
use crate::service::DbService;

/// Insert a user, or update it when the client sends back the `upd_ts` it
/// loaded. A stale `upd_ts` is reported against that field.
#[derive(Debug, Default)]
pub struct ExampleUpsert;

impl DbService for ExampleUpsert {
    fn do_execute(&mut self, db: &SqlSession<'_>, io: &mut Io) -> anyhow::Result<()> {
        if io.is_blank("user_id") {
            io.add_item_error(MSG_REQUIRED, "user_id", &["User ID"]);
        }
        if io.is_blank("user_nm") {
            io.add_item_error(MSG_REQUIRED, "user_nm", &["Name"]);
        }
        if io.has_error() {
            return Ok(());
        }

        let user_id = io.get_string("user_id")?;
        let user_nm = io.get_string("user_nm")?;
        let email = io.get_string_nullable("email")?.filter(|e| !e.trim().is_empty());
        let upd_ts = new_upd_ts();

        if io.is_blank("upd_ts") {
            let mut exists = SqlBuilder::new();
            exists.add_query_param(
                "SELECT user_id FROM t_user WHERE user_id = ?",
                user_id.clone(),
            );
            if db.select_one_or_none(&exists)?.is_some() {
                io.add_item_error(MSG_DUPLICATE, "user_id", &[user_id.as_str()]);
                return Ok(());
            }

            let mut insert = SqlBuilder::new();
            insert
                .add_query("INSERT INTO t_user (user_id, user_nm, email, upd_ts)")
                .add_query_param("VALUES (?,", user_id.clone())
                .add_query_param("?,", user_nm)
                .add_query_param("?,", email)
                .add_query_param("?)", upd_ts.clone());
            db.execute_one(&insert)?;
            info!(trace_id = %db.trace_id(), user_id = %user_id, "User inserted");
            io.add_info(MSG_REGISTERED, &[user_id.as_str()]);
        } else {
            let old_ts = io.get_string("upd_ts")?;
            let mut update = SqlBuilder::new();
            update
                .add_query_param("UPDATE t_user SET user_nm = ?,", user_nm)
                .add_query_param("email = ?,", email)
                .add_query_param("upd_ts = ?", upd_ts.clone())
                .add_query_param("WHERE user_id = ?", user_id.clone())
                .add_query_param("AND upd_ts = ?", old_ts);
            if !db.execute_one_or_stale(&update)? {
                io.add_item_error(MSG_STALE, "upd_ts", &[]);
                return Ok(());
            }
            info!(trace_id = %db.trace_id(), user_id = %user_id, "User updated");
            io.add_info(MSG_UPDATED, &[user_id.as_str()]);
        }
        io.put_force_string("upd_ts", upd_ts)?;
        Ok(())
    }
}
