use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::config::AppConfig;
use crate::io::MessageCatalog;
use crate::logging::init_logging;
use crate::registry::ServiceRegistry;
use crate::server::{process_exit, ServerLifecycle};

/// Adds the application's services to a registry.
pub type Register = fn(&mut ServiceRegistry);

#[derive(Parser)]
#[command(name = "ioframe")]
#[command(about = "JSON service server", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the server and block until it is stopped
    Serve {
        /// TOML configuration file
        #[arg(short, long, env = "IOFRAME_CONFIG")]
        config: PathBuf,

        /// Listen address (host:port), overriding the config file
        #[arg(long)]
        addr: Option<String>,
    },
    /// Print every registered service with its URL
    Routes {
        #[arg(short, long, env = "IOFRAME_CONFIG")]
        config: PathBuf,
    },
    /// Load and validate a configuration without starting anything
    CheckConfig {
        #[arg(short, long, env = "IOFRAME_CONFIG")]
        config: PathBuf,
    },
}

pub fn build_registry(config: &AppConfig, register: Register) -> ServiceRegistry {
    let mut registry = ServiceRegistry::new(config.service.package.as_str());
    register(&mut registry);
    registry
}

pub fn load_catalog(config: &AppConfig) -> Result<MessageCatalog> {
    match &config.messages.catalog {
        Some(path) => MessageCatalog::load(path),
        None => Ok(MessageCatalog::new()),
    }
}

fn load_config(path: &Path) -> Result<AppConfig> {
    AppConfig::load(path).with_context(|| format!("loading {}", path.display()))
}

/// Parse `std::env::args` and run.
pub fn run_cli(register: Register) -> Result<()> {
    run(Cli::parse(), register)
}

pub fn run(cli: Cli, register: Register) -> Result<()> {
    match cli.command {
        Commands::Serve { config, addr } => {
            let mut config = load_config(&config)?;
            if let Some(addr) = addr {
                config.set_listen_addr(&addr)?;
            }
            serve(&config, register)
        }
        Commands::Routes { config } => {
            let config = load_config(&config)?;
            let registry = build_registry(&config, register);
            for (name, kind) in registry.iter() {
                let url = registry
                    .url_for(name, &config.context.json)
                    .unwrap_or_default();
                println!("{url}\t{kind}\t{name}");
            }
            Ok(())
        }
        Commands::CheckConfig { config: path } => {
            let config = load_config(&path)?;
            let catalog = load_catalog(&config)?;
            println!("{}: OK", path.display());
            println!("  listen      {}", config.listen_addr());
            println!("  database    {}", config.db.path.display());
            println!("  static root {}", config.static_files.root.display());
            println!("  messages    {}", catalog.len());
            if !config.static_files.root.is_dir() {
                println!("  warning: static root does not exist; static files disabled");
            }
            Ok(())
        }
    }
}

fn serve(config: &AppConfig, register: Register) -> Result<()> {
    let guard = init_logging(&config.log)?;
    let catalog = load_catalog(config)?;
    let registry = build_registry(config, register);
    info!(
        package = %registry.package(),
        services = registry.len(),
        messages = catalog.len(),
        "Starting ioframe"
    );

    let lifecycle = ServerLifecycle::start(config, registry, catalog, process_exit())?;
    lifecycle.attach_log_guard(guard);
    lifecycle.install_signal_handlers()?;
    lifecycle.wait();
    Ok(())
}
