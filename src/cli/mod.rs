//! # CLI
//!
//! ```bash
//! ioframe serve --config config/ioframe.toml
//! ioframe serve --config config/ioframe.toml --addr 127.0.0.1:9000
//! ioframe routes --config config/ioframe.toml
//! ioframe check-config --config config/ioframe.toml
//! ```
//!
//! The binary decides which services exist; [`run_cli`] takes its
//! registration function.

mod commands;


pub use commands::{build_registry, load_catalog, run, run_cli, Cli, Commands, Register};
