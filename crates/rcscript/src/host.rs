//! Script host: engine discovery, the manager registry and shared resources.
//!
//! A host is an explicit context object. Most programs use the process-wide
//! [`ScriptHost::global`]; tests construct their own hosts for isolation.
//!
//! ```rust,ignore
//! use rcscript::ScriptHost;
//!
//! let host = ScriptHost::new();
//! let manager = host.process_engine("rhai").expect("rhai is built in");
//! assert!(host.get("rhai").is_some());
//! ```

use crate::config::HostConfig;
use crate::data::InitFunction;
use crate::engine::{EngineRegistry, ScriptEngineFactory, builtin_factory};
use crate::manager::ScriptManager;
use crate::pool::WorkerPool;
use crate::resource::ResourceBundle;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock, Weak};
use tracing::{debug, info};

static GLOBAL_HOST: OnceLock<ScriptHost> = OnceLock::new();

pub(crate) struct HostInner {
    config: HostConfig,
    engines: RwLock<EngineRegistry>,
    managers: RwLock<HashMap<String, ScriptManager>>,
    resources: Arc<ResourceBundle>,
    pool: Arc<WorkerPool>,
}

/// Shared handle to a host.
#[derive(Clone)]
pub struct ScriptHost {
    inner: Arc<HostInner>,
}

impl ScriptHost {
    /// A host with default configuration and the built-in engines.
    pub fn new() -> Self {
        Self::from_config(HostConfig::default())
    }

    pub fn from_config(config: HostConfig) -> Self {
        let mut registry = EngineRegistry::new();
        if let Some(factory) = builtin_factory(&config.engine) {
            registry.register_arc(factory);
        }
        Self::with_engines(config, registry)
    }

    /// A host resolving engines only from `registry`.
    pub fn with_engines(config: HostConfig, registry: EngineRegistry) -> Self {
        let resources = match &config.resource_dir {
            Some(root) => ResourceBundle::with_root(root),
            None => ResourceBundle::new(),
        };
        let pool = WorkerPool::new(config.worker_threads);
        info!(
            "Script host ready: engines={:?}, workers={}",
            registry.engine_names(),
            pool.size()
        );

        Self {
            inner: Arc::new(HostInner {
                config,
                engines: RwLock::new(registry),
                managers: RwLock::new(HashMap::new()),
                resources: Arc::new(resources),
                pool: Arc::new(pool),
            }),
        }
    }

    /// The process-wide host, created with defaults on first use.
    pub fn global() -> &'static ScriptHost {
        GLOBAL_HOST.get_or_init(ScriptHost::new)
    }

    /// Installs the process-wide host. Fails with `host` if one is already set.
    pub fn set_global(host: ScriptHost) -> Result<(), ScriptHost> {
        GLOBAL_HOST.set(host)
    }

    pub fn config(&self) -> &HostConfig {
        &self.inner.config
    }

    pub fn resources(&self) -> &Arc<ResourceBundle> {
        &self.inner.resources
    }

    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.inner.pool
    }

    // ------------------------------------------------------------------
    // Engines
    // ------------------------------------------------------------------

    pub fn register_engine<F: ScriptEngineFactory + 'static>(&self, factory: F) {
        self.inner.engines.write().register(factory);
    }

    pub fn register_engine_as<F: ScriptEngineFactory + 'static>(&self, name: &str, factory: F) {
        self.inner.engines.write().register_as(name, factory);
    }

    pub fn engine_names(&self) -> Vec<String> {
        self.inner.engines.read().engine_names()
    }

    // ------------------------------------------------------------------
    // Managers
    // ------------------------------------------------------------------

    /// Resolves `name` to an engine and registers a fresh manager under it.
    ///
    /// An earlier manager under the same name is replaced. Returns `None`
    /// when no engine answers to `name`.
    pub fn process_engine(&self, name: &str) -> Option<ScriptManager> {
        let Some(factory) = self.inner.engines.read().engine_factory(name) else {
            debug!("No script engine registered under '{}'", name);
            return None;
        };

        let manager = ScriptManager::new(self, factory);
        manager.set_default_init_function(self.default_init_function());
        manager.set_scripts_dir(self.inner.config.scripts_dir.clone());

        self.inner
            .managers
            .write()
            .insert(name.to_string(), manager.clone());
        info!("Registered script manager '{}'", name);
        Some(manager)
    }

    pub fn get(&self, name: &str) -> Option<ScriptManager> {
        self.inner.managers.read().get(name).cloned()
    }

    pub fn remove_manager(&self, name: &str) -> Option<ScriptManager> {
        self.inner.managers.write().remove(name)
    }

    pub fn manager_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.managers.read().keys().cloned().collect();
        names.sort();
        names
    }

    fn default_init_function(&self) -> InitFunction {
        match self.inner.config.default_init_function.as_str() {
            "" => InitFunction::none(),
            name => InitFunction::from(name),
        }
    }

    pub(crate) fn downgrade(&self) -> WeakScriptHost {
        WeakScriptHost(Arc::downgrade(&self.inner))
    }
}

impl Default for ScriptHost {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ScriptHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptHost")
            .field("engines", &self.engine_names())
            .field("managers", &self.manager_names())
            .field("workers", &self.inner.pool.size())
            .finish()
    }
}

/// Non-owning host reference held by managers.
#[derive(Clone, Default)]
pub(crate) struct WeakScriptHost(Weak<HostInner>);

impl WeakScriptHost {
    pub(crate) fn upgrade(&self) -> Option<ScriptHost> {
        self.0.upgrade().map(|inner| ScriptHost { inner })
    }
}
