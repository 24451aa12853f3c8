use super::{MSG_DELETED, MSG_REQUIRED, MSG_STALE};
use crate::db::{SqlBuilder, SqlSession};
use crate::io::{Io, Record};
use crate::service::DbService;

/// Delete a user, guarded by the `upd_ts` the client last saw.
#[derive(Debug, Default)]
pub struct ExampleDelete;

impl DbService for ExampleDelete {
    fn do_execute(&mut self, db: &SqlSession<'_>, io: &mut Io) -> anyhow::Result<()> {
        for (key, label) in [("user_id", "User ID"), ("upd_ts", "Update timestamp")] {
            if io.is_blank(key) {
                io.add_item_error(MSG_REQUIRED, key, &[label]);
            }
        }
        if io.has_error() {
            return Ok(());
        }
        let user_id = io.get_string("user_id")?;

        let mut q = SqlBuilder::new();
        q.add_query_param("DELETE FROM t_user WHERE user_id = ?", user_id.clone())
            .add_query_param("AND upd_ts = ?", io.get_string("upd_ts")?);
        if db.execute_one_or_stale(&q)? {
            io.add_info(MSG_DELETED, &[user_id.as_str()]);
        } else {
            io.add_item_error(MSG_STALE, "upd_ts", &[]);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exmodule::testing::{count, db, run};
    use crate::exmodule::ExampleUpsert;

    #[test]
    fn test_delete_requires_current_ts() {
        let conn = db();
        let saved = run(&conn, &mut ExampleUpsert, r#"{"user_id":"U001","user_nm":"A"}"#);

        let stale = run(&conn, &mut ExampleDelete, r#"{"user_id":"U001","upd_ts":"0"}"#);
        assert_eq!(stale.messages()[0].id, "ev003");
        assert_eq!(count(&conn), 1);

        let ts = saved.get_string("upd_ts").unwrap();
        let body = format!(r#"{{"user_id":"U001","upd_ts":"{ts}"}}"#);
        let done = run(&conn, &mut ExampleDelete, &body);
        assert!(!done.has_error());
        assert_eq!(done.messages()[0].id, "i0003");
        assert_eq!(count(&conn), 0);
    }

    #[test]
    fn test_delete_missing_fields() {
        let conn = db();
        let io = run(&conn, &mut ExampleDelete, "{}");
        assert_eq!(io.messages().len(), 2);
    }
}
