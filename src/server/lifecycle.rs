//! Server start-up and one-shot teardown.
//!
//! Teardown can be requested from three places: an OS signal, the stop
//! context, or [`ServerLifecycle::shutdown`] directly. Whichever arrives
//! first wins; later requests are no-ops.

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};
use std::thread;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;

use super::http_server::{HttpServer, ServerHandle};
use super::json_handler::JsonHandler;
use super::service::{AppService, StopTrigger};
use crate::config::AppConfig;
use crate::db::DbPool;
use crate::io::MessageCatalog;
use crate::registry::ServiceRegistry;
use crate::service::ServiceEnv;
use crate::static_files::StaticFiles;

/// Time the stop reply gets to reach the client before teardown.
pub const STOP_GRACE: Duration = Duration::from_millis(100);

/// Ends the process after a stop-context teardown. Injected so tests can
/// observe the exit code instead of dying.
pub type ExitFn = Arc<dyn Fn(i32) + Send + Sync>;

#[must_use]
pub fn process_exit() -> ExitFn {
    Arc::new(|code| std::process::exit(code))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownTrigger {
    Signal(i32),
    StopContext,
    Requested,
}

#[derive(Default)]
struct Resources {
    server: Option<ServerHandle>,
    pool: Option<DbPool>,
    log_guard: Option<WorkerGuard>,
}

pub struct ServerLifecycle {
    triggered: AtomicBool,
    resources: Mutex<Resources>,
    done: Mutex<bool>,
    done_cv: Condvar,
    addr: Mutex<Option<SocketAddr>>,
    exit: ExitFn,
}

impl ServerLifecycle {
    fn new(exit: ExitFn) -> Self {
        Self {
            triggered: AtomicBool::new(false),
            resources: Mutex::new(Resources::default()),
            done: Mutex::new(false),
            done_cv: Condvar::new(),
            addr: Mutex::new(None),
            exit,
        }
    }

    fn resources(&self) -> MutexGuard<'_, Resources> {
        self.resources.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open the pool, build the handlers and bind the listener.
    ///
    /// # Errors
    ///
    /// Pool, init script or bind failures. Nothing is left running when this
    /// returns `Err`.
    pub fn start(
        config: &AppConfig,
        registry: ServiceRegistry,
        catalog: MessageCatalog,
        exit: ExitFn,
    ) -> Result<Arc<Self>> {
        may::config()
            .set_workers(config.server.workers)
            .set_stack_size(config.server.stack_size);
        if config.server.backlog != 128 {
            warn!(
                backlog = config.server.backlog,
                "server.backlog is not applied; the OS default is used"
            );
        }

        if let Some(parent) = config.db.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating database directory {}", parent.display()))?;
        }
        let pool = DbPool::open(config.db.pool_config()).context("opening database pool")?;
        if let Some(script) = &config.db.init_script {
            let sql = std::fs::read_to_string(script)
                .with_context(|| format!("reading init script {}", script.display()))?;
            pool.run_script(&sql)
                .with_context(|| format!("running init script {}", script.display()))?;
            info!(script = %script.display(), "Init script applied");
        }

        let static_files = if config.static_files.root.is_dir() {
            Some(
                StaticFiles::new(
                    &config.static_files.root,
                    &config.context.static_files,
                    config.static_files.redirect_keep_query,
                    config.memory_budget_bytes(),
                )
                .map(|sf| sf.with_max_file_bytes(config.max_file_bytes()))
                .with_context(|| {
                    format!("opening static root {}", config.static_files.root.display())
                })?,
            )
        } else {
            warn!(
                root = %config.static_files.root.display(),
                "Static root missing; static files disabled"
            );
            None
        };

        let lifecycle = Arc::new(Self::new(exit));
        lifecycle.resources().pool = Some(pool.clone());

        let json = JsonHandler::new(
            &config.context.json,
            Arc::new(registry),
            Arc::new(catalog),
            ServiceEnv::new(Some(pool.clone())),
        );
        let service = AppService::new(config.context_paths(), json, static_files)
            .with_stop_trigger(stop_trigger(Arc::downgrade(&lifecycle)));

        let addr = config.listen_addr();
        let handle = match HttpServer(service).start(addr.as_str()) {
            Ok(handle) => handle,
            Err(e) => {
                pool.close();
                return Err(e).with_context(|| format!("binding {addr}"));
            }
        };
        *lifecycle.addr.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle.addr());
        lifecycle.resources().server = Some(handle);
        info!(
            addr = %addr,
            workers = config.server.workers,
            stack_size = config.server.stack_size,
            "Server started"
        );
        Ok(lifecycle)
    }

    /// Bound address, once started.
    #[must_use]
    pub fn addr(&self) -> Option<SocketAddr> {
        *self.addr.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Hand over the log flush guard; it is dropped at the end of teardown.
    pub fn attach_log_guard(&self, guard: Option<WorkerGuard>) {
        self.resources().log_guard = guard;
    }

    /// Poll until the listener accepts connections.
    pub fn wait_ready(&self) -> std::io::Result<()> {
        match &self.resources().server {
            Some(server) => server.wait_ready(),
            None => Err(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "server not running",
            )),
        }
    }

    /// Stop the listener, close the pool, flush logs. Returns `false` when
    /// teardown was already triggered.
    pub fn shutdown(&self, trigger: ShutdownTrigger) -> bool {
        if self.triggered.swap(true, Ordering::SeqCst) {
            info!(trigger = ?trigger, "Shutdown already in progress");
            return false;
        }
        info!(trigger = ?trigger, "Shutdown begin");

        let mut resources = self.resources();
        if let Some(server) = resources.server.take() {
            server.stop();
        }
        if let Some(pool) = resources.pool.take() {
            pool.close();
        }
        info!(trigger = ?trigger, "Shutdown complete");
        let log_guard = resources.log_guard.take();
        drop(resources);
        drop(log_guard);

        let mut done = self.done.lock().unwrap_or_else(PoisonError::into_inner);
        *done = true;
        self.done_cv.notify_all();
        true
    }

    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }

    /// Block until teardown has finished.
    pub fn wait(&self) {
        let mut done = self.done.lock().unwrap_or_else(PoisonError::into_inner);
        while !*done {
            done = self
                .done_cv
                .wait(done)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Tear down on SIGINT or SIGTERM. The process is not exited; the
    /// caller's [`wait`](Self::wait) returns instead.
    #[cfg(unix)]
    pub fn install_signal_handlers(self: &Arc<Self>) -> Result<()> {
        use signal_hook::consts::{SIGINT, SIGTERM};
        use signal_hook::iterator::Signals;

        let mut signals =
            Signals::new([SIGINT, SIGTERM]).context("installing signal handlers")?;
        let weak = Arc::downgrade(self);
        thread::Builder::new()
            .name("ioframe-signals".to_string())
            .spawn(move || {
                if let Some(signal) = signals.forever().next() {
                    info!(signal, "Signal received");
                    if let Some(lifecycle) = weak.upgrade() {
                        lifecycle.shutdown(ShutdownTrigger::Signal(signal));
                    }
                }
            })
            .context("spawning signal thread")?;
        Ok(())
    }

    #[cfg(not(unix))]
    pub fn install_signal_handlers(self: &Arc<Self>) -> Result<()> {
        warn!("Signal handling unavailable on this platform");
        Ok(())
    }
}

/// Stop-context callback: the reply is written first, teardown and exit
/// follow on a separate thread after [`STOP_GRACE`].
fn stop_trigger(lifecycle: Weak<ServerLifecycle>) -> StopTrigger {
    Arc::new(move || {
        let lifecycle = Weak::clone(&lifecycle);
        let spawned = thread::Builder::new()
            .name("ioframe-stop".to_string())
            .spawn(move || {
                thread::sleep(STOP_GRACE);
                let Some(lifecycle) = lifecycle.upgrade() else {
                    return;
                };
                if lifecycle.shutdown(ShutdownTrigger::StopContext) {
                    (lifecycle.exit)(0);
                }
            });
        if let Err(e) = spawned {
            error!(error = %e, "Could not spawn stop thread");
        }
    })
}
