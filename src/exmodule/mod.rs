//! Example application module: user maintenance on `t_user`.
//!
//! Served under `<json ctx>/exmodule/<Service>`. Message ids used here are
//! defined in `config/messages.toml`.

mod delete;
mod load;
mod ping;
mod search;
mod upsert;

pub use delete::ExampleDelete;
pub use load::ExampleLoad;
pub use ping::ExamplePing;
pub use search::ExampleSearch;
pub use upsert::ExampleUpsert;

use crate::registry::ServiceRegistry;

/// Schema the services expect.
pub const SCHEMA: &str = include_str!("../../config/schema.sql");

pub(crate) const MSG_REQUIRED: &str = "ev001";
pub(crate) const MSG_DUPLICATE: &str = "ev002";
pub(crate) const MSG_STALE: &str = "ev003";
pub(crate) const MSG_NOT_FOUND: &str = "ev004";
pub(crate) const MSG_REGISTERED: &str = "i0001";
pub(crate) const MSG_UPDATED: &str = "i0002";
pub(crate) const MSG_DELETED: &str = "i0003";
pub(crate) const MSG_TOO_MANY: &str = "w0001";

pub fn register(registry: &mut ServiceRegistry) {
    registry.register_db("exmodule.ExampleUpsert", || ExampleUpsert);
    registry.register_db("exmodule.ExampleLoad", || ExampleLoad);
    registry.register_db("exmodule.ExampleDelete", || ExampleDelete);
    registry.register_db("exmodule.ExampleSearch", ExampleSearch::default);
    registry.register_online("exmodule.ExamplePing", || ExamplePing);
}
