//! Route string → service factory.
//!
//! Services are registered under a dotted name relative to the configured
//! base package (`exmodule.ExampleUpsert`) and looked up by the fully
//! qualified name the JSON handler resolves from the URL
//! (`app.exmodule.ExampleUpsert`). Each lookup builds a fresh instance.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::service::{DbService, OnlineService, Plain, Transactional, WebService};

type Factory = Arc<dyn Fn() -> Box<dyn WebService> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceKind {
    /// No database access.
    Online,
    /// Runs inside one transaction.
    Transactional,
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceKind::Online => f.write_str("online"),
            ServiceKind::Transactional => f.write_str("transactional"),
        }
    }
}

#[derive(Clone)]
pub struct ServiceEntry {
    kind: ServiceKind,
    factory: Factory,
}

impl ServiceEntry {
    #[must_use]
    pub fn kind(&self) -> ServiceKind {
        self.kind
    }

    #[must_use]
    pub fn create(&self) -> Box<dyn WebService> {
        (self.factory)()
    }
}

#[derive(Clone, Default)]
pub struct ServiceRegistry {
    package: String,
    services: BTreeMap<String, ServiceEntry>,
}

impl ServiceRegistry {
    #[must_use]
    pub fn new(package: impl Into<String>) -> Self {
        Self {
            package: package.into(),
            services: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn package(&self) -> &str {
        &self.package
    }

    /// Fully qualified name for a package-relative one.
    #[must_use]
    pub fn qualify(&self, relative: &str) -> String {
        if self.package.is_empty() {
            relative.to_string()
        } else {
            format!("{}.{}", self.package, relative)
        }
    }

    pub fn register_online<S, F>(&mut self, relative: &str, factory: F)
    where
        S: OnlineService + 'static,
        F: Fn() -> S + Send + Sync + 'static,
    {
        self.insert(
            relative,
            ServiceEntry {
                kind: ServiceKind::Online,
                factory: Arc::new(move || -> Box<dyn WebService> { Box::new(Plain(factory())) }),
            },
        );
    }

    pub fn register_db<S, F>(&mut self, relative: &str, factory: F)
    where
        S: DbService + 'static,
        F: Fn() -> S + Send + Sync + 'static,
    {
        self.insert(
            relative,
            ServiceEntry {
                kind: ServiceKind::Transactional,
                factory: Arc::new(move || -> Box<dyn WebService> {
                    Box::new(Transactional(factory()))
                }),
            },
        );
    }

    fn insert(&mut self, relative: &str, entry: ServiceEntry) {
        let name = self.qualify(relative);
        let kind = entry.kind;
        if self.services.insert(name.clone(), entry).is_some() {
            warn!(service = %name, "Service registered twice; replacing previous factory");
        } else {
            debug!(service = %name, kind = %kind, "Service registered");
        }
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ServiceEntry> {
        self.services.get(name)
    }

    /// Fresh instance for a fully qualified name.
    #[must_use]
    pub fn create(&self, name: &str) -> Option<Box<dyn WebService>> {
        self.get(name).map(ServiceEntry::create)
    }

    /// Registered names in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, ServiceKind)> {
        self.services.iter().map(|(k, v)| (k.as_str(), v.kind))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.services.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// URL path serving `name` under `json_context`, or `None` when the name
    /// is outside this registry's package.
    #[must_use]
    pub fn url_for(&self, name: &str, json_context: &str) -> Option<String> {
        let relative = if self.package.is_empty() {
            name
        } else {
            name.strip_prefix(&self.package)?.strip_prefix('.')?
        };
        Some(format!(
            "{}/{}",
            json_context.trim_end_matches('/'),
            relative.replace('.', "/")
        ))
    }
}

impl fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceRegistry")
            .field("package", &self.package)
            .field("services", &self.services.keys().collect::<Vec<_>>())
            .finish()
    }
}
