//! # ioframe
//!
//! A convention-driven JSON service server on the `may` coroutine runtime.
//!
//! ## Overview
//!
//! A URL names the service that handles it: with the JSON context at
//! `/services` and base package `app`, `POST /services/exmodule/ExampleUpsert`
//! runs the service registered as `app.exmodule.ExampleUpsert`. Request and
//! response share one record container, [`io::Io`]. Services that touch the
//! database run inside exactly one transaction, committed only when the
//! service finished without an error message.
//!
//! Next to the services, the server hosts a static file tree for the HTML
//! client (conditional GET, gzip, traversal and denylist checks) and a stop
//! URL for orderly shutdown.
//!
//! ## Architecture
//!
//! - **[`io`]** - Record container, values, messages and the message catalog
//! - **[`db`]** - SQLite connection pool and the SQL execution helper
//! - **[`service`]** - Service traits, lifecycle wrapper, transactional dispatch
//! - **[`registry`]** - Service name to factory map
//! - **[`server`]** - Context routing, JSON handler, response finishing, lifecycle
//! - **[`static_files`]** - Static file handler
//! - **[`config`]** / **[`logging`]** / **[`cli`]** - Process setup
//! - **[`exmodule`]** - Example user-maintenance services
//!
//! ### Request flow
//!
//! ```mermaid
//! sequenceDiagram
//!     participant Client
//!     participant App as AppService
//!     participant Json as JsonHandler
//!     participant Call as ServiceCall
//!     participant Tx as Transactional
//!     participant Svc as DbService
//!
//!     Client->>App: POST /services/exmodule/ExampleUpsert
//!     App->>App: longest context match
//!     App->>Json: handle(request)
//!     Json->>Json: resolve app.exmodule.ExampleUpsert, parse body into Io
//!     Json->>Call: run(service, io)
//!     Call->>Tx: execute (catch_unwind)
//!     Tx->>Tx: pool.get(), BEGIN
//!     Tx->>Svc: do_execute(db, io)
//!     Svc-->>Tx: Ok, messages on io
//!     Tx->>Tx: COMMIT or ROLLBACK
//!     Tx-->>Call: Ok
//!     Call-->>Json: Ok
//!     Json-->>App: 200 application/json
//!     App-->>Client: security headers, gzip when negotiated
//! ```
//!
//! ## Writing a service
//!
//! ```rust
//! use ioframe::db::{SqlBuilder, SqlSession};
//! use ioframe::io::{Io, Record};
//! use ioframe::registry::ServiceRegistry;
//! use ioframe::service::DbService;
//!
//! struct CountUsers;
//!
//! impl DbService for CountUsers {
//!     fn do_execute(&mut self, db: &SqlSession<'_>, io: &mut Io) -> anyhow::Result<()> {
//!         let mut q = SqlBuilder::new();
//!         q.add_query("SELECT COUNT(*) AS n FROM t_user");
//!         let row = db.select_one(&q)?;
//!         io.put_force_i64("count", row.get_i64("n")?)?;
//!         Ok(())
//!     }
//! }
//!
//! let mut registry = ServiceRegistry::new("app");
//! registry.register_db("users.CountUsers", || CountUsers);
//! assert!(registry.get("app.users.CountUsers").is_some());
//! ```
//!
//! ## Runtime Considerations
//!
//! Each connection runs in a `may` coroutine, not a tokio task. Worker count
//! and coroutine stack size come from `[server]` in the configuration.
//! Database calls block the worker; size `db.pool_size` and `server.workers`
//! together.

pub mod cli;
pub mod config;
pub mod db;
pub mod exmodule;
pub mod ids;
pub mod io;
pub mod logging;
pub mod registry;
pub mod server;
pub mod service;
pub mod static_files;

pub use config::AppConfig;
pub use ids::TraceId;
pub use io::{Io, IoRow, IoValue, Message, MessageCatalog, Record, Severity};
pub use registry::ServiceRegistry;
pub use server::ServerLifecycle;
pub use service::{DbService, OnlineService};
