//! Script managers: builder factories and the identifier-keyed script cache.

use crate::builder::ScriptBuilder;
use crate::data::{InitFunction, ScriptHandle, SourceStream};
use crate::engine::{MANAGER_BINDING, ScriptEngineFactory};
use crate::error::ExceptionHandler;
use crate::host::{ScriptHost, WeakScriptHost};
use crate::identifier::{Identifier, IdentifierRule, ScriptCache};
use crate::pool::WorkerPool;
use crate::resource::ResourceBundle;
use crate::script::Script;
use parking_lot::RwLock;
use std::fmt;
use std::io::{self, Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use tracing::{debug, info};

pub(crate) struct ManagerInner {
    factory: Arc<dyn ScriptEngineFactory>,
    cache: RwLock<ScriptCache>,
    default_init: RwLock<InitFunction>,
    io_handler: RwLock<ExceptionHandler<io::Error>>,
    scripts_dir: RwLock<Option<PathBuf>>,
    resources: Arc<ResourceBundle>,
    pool: Arc<WorkerPool>,
    host: WeakScriptHost,
}

/// Shared handle to a script manager.
///
/// Clones refer to the same cache and settings. Use
/// [`copy_into_unique_instance`](Self::copy_into_unique_instance) or
/// [`generate_unique_instance`](Self::generate_unique_instance) for an
/// independent manager.
#[derive(Clone)]
pub struct ScriptManager {
    inner: Arc<ManagerInner>,
}

impl ScriptManager {
    pub(crate) fn new(host: &ScriptHost, factory: Arc<dyn ScriptEngineFactory>) -> Self {
        Self::from_parts(
            factory,
            Arc::clone(host.resources()),
            Arc::clone(host.pool()),
            host.downgrade(),
        )
    }

    fn from_parts(
        factory: Arc<dyn ScriptEngineFactory>,
        resources: Arc<ResourceBundle>,
        pool: Arc<WorkerPool>,
        host: WeakScriptHost,
    ) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                factory,
                cache: RwLock::new(IdentifierRule::default().generate_new_map()),
                default_init: RwLock::new(InitFunction::from(crate::data::DEFAULT_INIT_FUNCTION)),
                io_handler: RwLock::new(ExceptionHandler::default()),
                scripts_dir: RwLock::new(None),
                resources,
                pool,
                host,
            }),
        }
    }

    /// Resolves an engine through the global host. See [`ScriptHost::process_engine`].
    pub fn process_engine(name: &str) -> Option<ScriptManager> {
        ScriptHost::global().process_engine(name)
    }

    /// Looks up a manager registered with the global host.
    pub fn get(name: &str) -> Option<ScriptManager> {
        ScriptHost::global().get(name)
    }

    pub fn engine_name(&self) -> &str {
        self.inner.factory.engine_name()
    }

    /// The host this manager was created by, if still alive.
    pub fn host(&self) -> Option<ScriptHost> {
        self.inner.host.upgrade()
    }

    pub fn downgrade(&self) -> WeakScriptManager {
        WeakScriptManager(Arc::downgrade(&self.inner))
    }

    pub fn ptr_eq(a: &ScriptManager, b: &ScriptManager) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }

    // ========================================================================
    // Builders
    // ========================================================================

    pub fn new_script(&self) -> ScriptBuilder {
        self.builder(None, None)
    }

    pub fn open_script(&self, source: impl Into<String>) -> ScriptBuilder {
        self.builder(Some(text_stream(source)), None)
    }

    pub fn open_stream<R: Read + Send + 'static>(&self, reader: R) -> ScriptBuilder {
        self.builder(Some(Box::new(reader)), None)
    }

    /// Opens a file, relative to the scripts directory when one is set.
    ///
    /// Open failures go to the exception handler and yield `None`.
    pub fn open_file_script(&self, path: impl AsRef<Path>) -> Option<ScriptBuilder> {
        let stream = self.handled(self.open_file(path.as_ref()))?;
        Some(self.builder(Some(stream), None))
    }

    pub fn open_resource_script(&self, location: &str) -> Option<ScriptBuilder> {
        let stream = self.handled(self.inner.resources.open(location))?;
        Some(self.builder(Some(stream), None))
    }

    /// A packed builder without a source.
    pub fn new_packed_script(&self, id: impl Into<Identifier>) -> ScriptBuilder {
        self.builder(None, Some(id.into()))
    }

    pub fn pack_script(
        &self,
        source: impl Into<String>,
        id: impl Into<Identifier>,
    ) -> ScriptBuilder {
        self.builder(Some(text_stream(source)), Some(id.into()))
    }

    pub fn pack_stream<R: Read + Send + 'static>(
        &self,
        reader: R,
        id: impl Into<Identifier>,
    ) -> ScriptBuilder {
        self.builder(Some(Box::new(reader)), Some(id.into()))
    }

    pub fn pack_file_script(
        &self,
        path: impl AsRef<Path>,
        id: impl Into<Identifier>,
    ) -> Option<ScriptBuilder> {
        let stream = self.handled(self.open_file(path.as_ref()))?;
        Some(self.builder(Some(stream), Some(id.into())))
    }

    pub fn pack_resource_script(
        &self,
        location: &str,
        id: impl Into<Identifier>,
    ) -> Option<ScriptBuilder> {
        let stream = self.handled(self.inner.resources.open(location))?;
        Some(self.builder(Some(stream), Some(id.into())))
    }

    fn builder(&self, stream: Option<SourceStream>, id: Option<Identifier>) -> ScriptBuilder {
        let mut engine = self.inner.factory.script_engine();
        engine.bind_manager(MANAGER_BINDING, self.downgrade());

        let handle = ScriptHandle::new(self.downgrade(), engine, stream);
        ScriptBuilder::new(handle, self.default_init_function(), id, self.settings())
    }

    pub(crate) fn settings(&self) -> BuilderSettings {
        BuilderSettings {
            io_handler: self.exception_handler(),
            scripts_dir: self.scripts_dir(),
            resources: Arc::clone(&self.inner.resources),
            pool: Arc::clone(&self.inner.pool),
        }
    }

    fn open_file(&self, path: &Path) -> io::Result<SourceStream> {
        open_file(self.scripts_dir().as_deref(), path)
    }

    fn handled<T>(&self, result: io::Result<T>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(err) => {
                self.exception_handler().handle(&err);
                None
            }
        }
    }

    // ========================================================================
    // Cache
    // ========================================================================

    /// Inserts or replaces the script cached under `id`.
    pub fn insert(&self, script: Script, id: impl Into<Identifier>) {
        let id = id.into();
        debug!("Caching script under {:?}", id);

        let shared = self.inner.cache.read().shared_insert(id, script);
        if let Err((id, script)) = shared {
            self.inner.cache.write().insert(id, script);
        }
    }

    pub fn unpack(&self, id: &Identifier) -> Option<Script> {
        self.inner.cache.read().get(id)
    }

    pub fn exists(&self, id: &Identifier) -> bool {
        self.inner.cache.read().contains(id)
    }

    /// Returns whether an entry was present.
    pub fn remove(&self, id: &Identifier) -> bool {
        let shared = self.inner.cache.read().shared_remove(id);
        let removed = match shared {
            Some(removed) => removed,
            None => self.inner.cache.write().remove(id),
        };
        removed.is_some()
    }

    /// Rebuilds the cache with `rule`. On key collisions the first entry moved wins.
    pub fn apply_identifier_rule(&self, rule: IdentifierRule) {
        let mut cache = self.inner.cache.write();
        let current = std::mem::take(&mut *cache);
        let before = current.len();
        *cache = current.migrate(rule);
        info!(
            "Applied identifier rule {:?}: {} of {} scripts kept",
            rule,
            cache.len(),
            before
        );
    }

    pub fn identifier_rule(&self) -> IdentifierRule {
        self.inner.cache.read().rule()
    }

    pub fn clear_script_cache(&self) {
        self.inner.cache.write().clear();
    }

    pub fn cache_len(&self) -> usize {
        self.inner.cache.read().len()
    }

    pub fn cached_identifiers(&self) -> Vec<Identifier> {
        self.inner
            .cache
            .read()
            .entries()
            .into_iter()
            .map(|(id, _)| id)
            .collect()
    }

    // ========================================================================
    // Instances
    // ========================================================================

    /// An independent manager with a copy of this one's cache and settings.
    ///
    /// Cached scripts are shared handles; later inserts and removals on
    /// either manager do not affect the other.
    pub fn copy_into_unique_instance(&self) -> ScriptManager {
        let copy = self.generate_unique_instance();
        {
            let source = self.inner.cache.read();
            let mut target = copy.inner.cache.write();
            *target = source.rule().generate_new_map();
            for (id, script) in source.entries() {
                target.insert(id, script);
            }
        }
        copy.set_exception_handler(self.exception_handler());
        copy.set_default_init_function(self.default_init_function());
        copy.set_scripts_dir(self.scripts_dir());
        copy
    }

    /// An independent manager on the same engine with default settings.
    pub fn generate_unique_instance(&self) -> ScriptManager {
        Self::from_parts(
            Arc::clone(&self.inner.factory),
            Arc::clone(&self.inner.resources),
            Arc::clone(&self.inner.pool),
            self.inner.host.clone(),
        )
    }

    // ========================================================================
    // Settings
    // ========================================================================

    pub fn set_default_init_function(&self, init: InitFunction) {
        *self.inner.default_init.write() = init;
    }

    pub fn default_init_function(&self) -> InitFunction {
        self.inner.default_init.read().clone()
    }

    pub fn set_exception_handler(&self, handler: ExceptionHandler<io::Error>) {
        *self.inner.io_handler.write() = handler;
    }

    pub fn exception_handler(&self) -> ExceptionHandler<io::Error> {
        self.inner.io_handler.read().clone()
    }

    pub fn set_scripts_dir(&self, dir: Option<PathBuf>) {
        *self.inner.scripts_dir.write() = dir;
    }

    pub fn scripts_dir(&self) -> Option<PathBuf> {
        self.inner.scripts_dir.read().clone()
    }
}

impl fmt::Debug for ScriptManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptManager")
            .field("engine", &self.engine_name())
            .field("cache", &*self.inner.cache.read())
            .field("scripts_dir", &self.scripts_dir())
            .finish()
    }
}

/// Non-owning manager reference held by scripts, builders and the `rcsm` binding.
#[derive(Clone, Default)]
pub struct WeakScriptManager(Weak<ManagerInner>);

impl WeakScriptManager {
    /// A reference that never upgrades.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upgrade(&self) -> Option<ScriptManager> {
        self.0.upgrade().map(|inner| ScriptManager { inner })
    }
}

impl fmt::Debug for WeakScriptManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("WeakScriptManager")
            .field(&(self.0.strong_count() > 0))
            .finish()
    }
}

/// Manager settings a builder captures when it is created.
pub(crate) struct BuilderSettings {
    pub(crate) io_handler: ExceptionHandler<io::Error>,
    pub(crate) scripts_dir: Option<PathBuf>,
    pub(crate) resources: Arc<ResourceBundle>,
    pub(crate) pool: Arc<WorkerPool>,
}

pub(crate) fn text_stream(source: impl Into<String>) -> SourceStream {
    Box::new(Cursor::new(source.into().into_bytes()))
}

pub(crate) fn open_file(scripts_dir: Option<&Path>, path: &Path) -> io::Result<SourceStream> {
    let resolved = match scripts_dir {
        Some(dir) if path.is_relative() => dir.join(path),
        _ => path.to_path_buf(),
    };
    Ok(Box::new(std::fs::File::open(resolved)?))
}

#[cfg(all(test, feature = "rhai-engine"))]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn manager() -> (ScriptHost, ScriptManager) {
        let host = ScriptHost::new();
        let manager = host.process_engine("rhai").unwrap();
        (host, manager)
    }

    fn cheap_script(manager: &ScriptManager, value: i64) -> Script {
        manager
            .open_script(value.to_string())
            .clear_init_function()
            .build()
            .unwrap()
    }

    #[test]
    fn test_insert_unpack_remove() {
        let (_host, manager) = manager();
        let script = cheap_script(&manager, 1);
        let id = Identifier::from("one");

        manager.insert(script.clone(), id.clone());
        assert!(manager.exists(&id));
        assert!(Script::ptr_eq(&manager.unpack(&id).unwrap(), &script));

        assert!(manager.remove(&id));
        assert!(!manager.exists(&id));
        assert!(!manager.remove(&id));
    }

    #[test]
    fn test_insert_replaces() {
        let (_host, manager) = manager();
        let first = cheap_script(&manager, 1);
        let second = cheap_script(&manager, 2);

        manager.insert(first, "key");
        manager.insert(second.clone(), "key");
        assert_eq!(manager.cache_len(), 1);
        assert!(Script::ptr_eq(
            &manager.unpack(&Identifier::from("key")).unwrap(),
            &second
        ));
    }

    #[test]
    fn test_identity_rule() {
        let (_host, manager) = manager();
        manager.apply_identifier_rule(IdentifierRule::Identity);
        let script = cheap_script(&manager, 1);

        let id = Identifier::from("same");
        manager.insert(script, id.clone());
        assert!(manager.exists(&id));
        assert!(!manager.exists(&Identifier::from("same")));
    }

    #[test]
    fn test_rule_migration_first_wins() {
        let (_host, manager) = manager();
        manager.apply_identifier_rule(IdentifierRule::Identity);

        let a = cheap_script(&manager, 1);
        let b = cheap_script(&manager, 2);
        let c = cheap_script(&manager, 3);
        manager.insert(a, Identifier::from("dup"));
        manager.insert(b, Identifier::from("dup"));
        manager.insert(c.clone(), Identifier::from("solo"));
        assert_eq!(manager.cache_len(), 3);

        manager.apply_identifier_rule(IdentifierRule::Equality);
        assert_eq!(manager.identifier_rule(), IdentifierRule::Equality);
        assert_eq!(manager.cache_len(), 2);
        assert!(Script::ptr_eq(
            &manager.unpack(&Identifier::from("solo")).unwrap(),
            &c
        ));

        let dup = manager.unpack(&Identifier::from("dup")).unwrap().expect::<i64>();
        assert!(matches!(dup, Some(1) | Some(2)));
    }

    #[test]
    fn test_concurrent_rule_parallel_inserts() {
        let (_host, manager) = manager();
        manager.apply_identifier_rule(IdentifierRule::ConcurrentEquality);
        let script = cheap_script(&manager, 1);

        std::thread::scope(|scope| {
            for worker in 0..4 {
                let manager = manager.clone();
                let script = script.clone();
                scope.spawn(move || {
                    for i in 0..25 {
                        manager.insert(script.clone(), format!("{}-{}", worker, i));
                    }
                });
            }
        });

        assert_eq!(manager.cache_len(), 100);
        assert!(manager.remove(&Identifier::from("0-0")));
        assert_eq!(manager.cache_len(), 99);
    }

    #[test]
    fn test_clear_script_cache() {
        let (_host, manager) = manager();
        manager.insert(cheap_script(&manager, 1), 1i64);
        manager.insert(cheap_script(&manager, 2), 2i64);
        assert_eq!(manager.cached_identifiers().len(), 2);

        manager.clear_script_cache();
        assert_eq!(manager.cache_len(), 0);
        assert_eq!(manager.engine_name(), "rhai");
    }

    #[test]
    fn test_copy_into_unique_instance() {
        let (_host, manager) = manager();
        manager.set_default_init_function(InitFunction::new("boot", vec![json!(1)]));
        manager.set_scripts_dir(Some(PathBuf::from("/tmp")));
        manager.apply_identifier_rule(IdentifierRule::ConcurrentEquality);
        manager.insert(cheap_script(&manager, 1), "shared");

        let copy = manager.copy_into_unique_instance();
        assert!(!ScriptManager::ptr_eq(&manager, &copy));
        assert!(copy.exists(&Identifier::from("shared")));
        assert_eq!(copy.identifier_rule(), IdentifierRule::ConcurrentEquality);
        assert_eq!(copy.default_init_function().name(), Some("boot"));
        assert_eq!(copy.scripts_dir(), Some(PathBuf::from("/tmp")));

        copy.insert(cheap_script(&copy, 2), "copy-only");
        manager.remove(&Identifier::from("shared"));
        assert!(!manager.exists(&Identifier::from("copy-only")));
        assert!(copy.exists(&Identifier::from("shared")));
    }

    #[test]
    fn test_generate_unique_instance_is_fresh() {
        let (_host, manager) = manager();
        manager.set_default_init_function(InitFunction::none());
        manager.insert(cheap_script(&manager, 1), "x");

        let fresh = manager.generate_unique_instance();
        assert_eq!(fresh.cache_len(), 0);
        assert_eq!(fresh.default_init_function().name(), Some("init"));
        assert_eq!(fresh.identifier_rule(), IdentifierRule::Equality);
        assert_eq!(fresh.engine_name(), manager.engine_name());
    }

    #[test]
    fn test_open_failures_go_to_handler() {
        let (_host, manager) = manager();
        let failures = Arc::new(AtomicUsize::new(0));
        let counter = failures.clone();
        manager.set_exception_handler(ExceptionHandler::new(move |err: &io::Error| {
            assert_eq!(err.kind(), io::ErrorKind::NotFound);
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        assert!(manager.open_file_script("/definitely/not/here.rhai").is_none());
        assert!(manager.pack_file_script("/definitely/not/here.rhai", "x").is_none());
        assert!(manager.open_resource_script("missing.rhai").is_none());
        assert!(manager.pack_resource_script("/missing.rhai", "y").is_none());
        assert_eq!(failures.load(Ordering::SeqCst), 4);
        assert_eq!(manager.cache_len(), 0);
    }

    #[test]
    fn test_scripts_dir_resolution() {
        let (_host, manager) = manager();
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("five.rhai"), "2 + 3").unwrap();
        manager.set_scripts_dir(Some(dir.path().to_path_buf()));

        let script = manager
            .open_file_script("five.rhai")
            .unwrap()
            .clear_init_function()
            .build()
            .unwrap();
        assert_eq!(script.expect::<i32>(), Some(5));
    }

    #[test]
    fn test_rcsm_binding_reaches_cache() {
        let (_host, manager) = manager();
        manager
            .pack_script(r#"fn init() { "cached" } fn twice(n) { n * 2 }"#, "lib")
            .build()
            .unwrap();

        let probe = manager
            .open_script(
                r#"
                fn init() {
                    if !rcsm.exists("lib") { return "missing"; }
                    let first = rcsm.execute("lib");
                    let second = rcsm.invoke("lib", "twice", [21]);
                    `${first}:${second}:${rcsm.cache_len()}:${rcsm.engine_name()}`
                }
                "#,
            )
            .build()
            .unwrap();

        assert_eq!(
            probe.expect::<String>(),
            Some("cached:42:1:rhai".to_string())
        );
    }

    #[test]
    fn test_rcsm_does_not_keep_manager_alive() {
        let (host, manager) = manager();
        let script = cheap_script(&manager, 1);
        host.remove_manager("rhai");
        drop(manager);
        assert!(script.manager().is_none());
    }
}
