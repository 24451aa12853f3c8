//! # Configuration
//!
//! One TOML file, read once at startup and never reloaded. Every field has a
//! default, so an empty file is a valid configuration. After parsing, a
//! small set of `IOFRAME_*` environment variables override individual
//! fields:
//!
//! | Variable | Field |
//! |---|---|
//! | `IOFRAME_BIND` | `server.bind` |
//! | `IOFRAME_PORT` | `server.port` |
//! | `IOFRAME_WORKERS` | `server.workers` |
//! | `IOFRAME_STACK_SIZE` | `server.stack_size` (decimal or `0x` hex) |
//! | `IOFRAME_SERVICE_PACKAGE` | `service.package` |
//! | `IOFRAME_STATIC_ROOT` | `static_files.root` |
//! | `IOFRAME_DB_PATH` | `db.path` |
//! | `IOFRAME_LOG_LEVEL` | `log.level` |
//! | `IOFRAME_LOG_FORMAT` | `log.format` |
//!
//! ```toml
//! [server]
//! port = 8080
//! workers = 4
//!
//! [context]
//! stop = "/stop-3b9e"
//! json = "/services"
//!
//! [db]
//! path = "data/ioframe.db"
//! init_script = "config/schema.sql"
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::db::PoolConfig;
use crate::server::ContextPaths;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("environment variable {var} has invalid value `{value}`")]
    Env { var: &'static str, value: String },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub context: ContextConfig,
    pub service: ServiceConfig,
    pub static_files: StaticFilesConfig,
    pub db: DbConfig,
    pub log: LogConfig,
    pub messages: MessagesConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    /// Accepted for compatibility; the listener uses the OS default.
    pub backlog: u32,
    /// may worker threads.
    pub workers: usize,
    /// Coroutine stack size in bytes.
    pub stack_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 8080,
            backlog: 128,
            workers: 4,
            stack_size: 0x40000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ContextConfig {
    pub root: String,
    /// Shutdown endpoint. Keep it unguessable.
    pub stop: String,
    #[serde(rename = "static")]
    pub static_files: String,
    pub json: String,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            root: "/".to_string(),
            stop: "/stop".to_string(),
            static_files: "/static".to_string(),
            json: "/services".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Base package prefixed to every resolved service name.
    pub package: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            package: "app".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct StaticFilesConfig {
    /// Deployment root. Static serving is disabled when it does not exist.
    pub root: PathBuf,
    pub redirect_keep_query: bool,
    /// Memory the process may use before static reads drop to smaller buffers.
    pub memory_budget_mb: u64,
    /// Files above this size are refused; responses are buffered whole.
    pub max_file_mb: u64,
}

impl Default for StaticFilesConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("web"),
            redirect_keep_query: false,
            memory_budget_mb: 512,
            max_file_mb: 64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct DbConfig {
    pub path: PathBuf,
    pub pool_size: usize,
    pub busy_timeout_ms: u64,
    pub acquire_timeout_ms: u64,
    /// SQL run once at startup (schema bootstrap).
    pub init_script: Option<PathBuf>,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/ioframe.db"),
            pool_size: 8,
            busy_timeout_ms: 5_000,
            acquire_timeout_ms: 10_000,
            init_script: None,
        }
    }
}

impl DbConfig {
    #[must_use]
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            path: self.path.clone(),
            size: self.pool_size,
            busy_timeout: Duration::from_millis(self.busy_timeout_ms),
            acquire_timeout: Duration::from_millis(self.acquire_timeout_ms),
        }
    }
}

/// Log format: JSON for production, pretty-print for development
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
}

impl LogFormat {
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Some(LogFormat::Json),
            "pretty" => Some(LogFormat::Pretty),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct LogConfig {
    /// Used when `RUST_LOG` is unset.
    pub level: String,
    pub format: LogFormat,
    /// Daily-rolling files here instead of stdout.
    pub dir: Option<PathBuf>,
    pub file_prefix: String,
    /// Write through a background thread (non-blocking appender).
    pub non_blocking: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Json,
            dir: None,
            file_prefix: "ioframe.log".to_string(),
            non_blocking: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct MessagesConfig {
    /// TOML message catalog with a `[messages]` table.
    pub catalog: Option<PathBuf>,
}

impl AppConfig {
    /// Read `path`, apply environment overrides, validate.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_toml_str(&text)?;
        config.apply_env(std::env::vars())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Apply `IOFRAME_*` overrides from the given variables.
    pub fn apply_env<I>(&mut self, vars: I) -> Result<(), ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            match key.as_str() {
                "IOFRAME_BIND" => self.server.bind = value,
                "IOFRAME_PORT" => self.server.port = parse_env("IOFRAME_PORT", &value)?,
                "IOFRAME_WORKERS" => self.server.workers = parse_env("IOFRAME_WORKERS", &value)?,
                "IOFRAME_STACK_SIZE" => {
                    self.server.stack_size = parse_size(&value).ok_or(ConfigError::Env {
                        var: "IOFRAME_STACK_SIZE",
                        value: value.clone(),
                    })?;
                }
                "IOFRAME_SERVICE_PACKAGE" => self.service.package = value,
                "IOFRAME_STATIC_ROOT" => self.static_files.root = PathBuf::from(value),
                "IOFRAME_DB_PATH" => self.db.path = PathBuf::from(value),
                "IOFRAME_LOG_LEVEL" => self.log.level = value,
                "IOFRAME_LOG_FORMAT" => {
                    self.log.format = LogFormat::parse(&value).ok_or(ConfigError::Env {
                        var: "IOFRAME_LOG_FORMAT",
                        value: value.clone(),
                    })?;
                }
                _ => {}
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let ctx = &self.context;
        let contexts = [
            ("root", &ctx.root),
            ("stop", &ctx.stop),
            ("static", &ctx.static_files),
            ("json", &ctx.json),
        ];
        for (name, value) in contexts {
            if !value.starts_with('/') {
                return Err(ConfigError::Invalid(format!(
                    "context.{name} must start with '/' (got `{value}`)"
                )));
            }
        }
        for (i, (a_name, a)) in contexts.iter().enumerate() {
            for (b_name, b) in &contexts[i + 1..] {
                if normalize_context(a) == normalize_context(b) {
                    return Err(ConfigError::Invalid(format!(
                        "context.{a_name} and context.{b_name} are both `{a}`"
                    )));
                }
            }
        }
        if self.server.workers == 0 {
            return Err(ConfigError::Invalid("server.workers must be > 0".into()));
        }
        if self.db.pool_size == 0 {
            return Err(ConfigError::Invalid("db.pool_size must be > 0".into()));
        }
        if self.service.package.split('.').any(str::is_empty) && !self.service.package.is_empty() {
            return Err(ConfigError::Invalid(format!(
                "service.package `{}` has an empty segment",
                self.service.package
            )));
        }
        Ok(())
    }

    /// Replace `server.bind` and `server.port` from a `host:port` string.
    pub fn set_listen_addr(&mut self, addr: &str) -> Result<(), ConfigError> {
        let invalid = || ConfigError::Invalid(format!("listen address `{addr}` is not host:port"));
        let (host, port) = addr.rsplit_once(':').ok_or_else(invalid)?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(invalid());
        }
        self.server.port = port.parse().map_err(|_| invalid())?;
        self.server.bind = host.to_string();
        Ok(())
    }

    #[must_use]
    pub fn listen_addr(&self) -> String {
        if self.server.bind.contains(':') {
            return format!("[{}]:{}", self.server.bind, self.server.port);
        }
        format!("{}:{}", self.server.bind, self.server.port)
    }

    #[must_use]
    pub fn context_paths(&self) -> ContextPaths {
        ContextPaths {
            root: self.context.root.clone(),
            stop: self.context.stop.clone(),
            static_files: self.context.static_files.clone(),
            json: self.context.json.clone(),
        }
    }

    #[must_use]
    pub fn memory_budget_bytes(&self) -> u64 {
        self.static_files.memory_budget_mb.saturating_mul(1024 * 1024)
    }

    #[must_use]
    pub fn max_file_bytes(&self) -> u64 {
        self.static_files.max_file_mb.saturating_mul(1024 * 1024)
    }
}

fn normalize_context(ctx: &str) -> &str {
    match ctx.trim_end_matches('/') {
        "" => "/",
        trimmed => trimmed,
    }
}

fn parse_env<T: std::str::FromStr>(var: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Env {
        var,
        value: value.to_string(),
    })
}

/// Decimal or `0x`-prefixed hexadecimal byte count.
fn parse_size(value: &str) -> Option<usize> {
    let value = value.trim();
    match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => usize::from_str_radix(hex, 16).ok(),
        None => value.parse().ok(),
    }
}
