//! Engine capabilities and engine discovery.
//!
//! An engine is an opaque interpreter. Every engine can evaluate source text;
//! an engine may additionally expose [`Compilable`] (compile once, evaluate
//! many times) and [`Invocable`] (call functions the evaluated source
//! registered). The builder picks an execution strategy from what an engine
//! exposes.

#[cfg(feature = "rhai-engine")]
pub mod rhai;

use crate::error::ScriptResult;
use crate::manager::WeakScriptManager;
use crate::value::ScriptValue;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Name under which every engine binds the owning manager.
pub const MANAGER_BINDING: &str = "rcsm";

/// Engine limits and capability switches.
///
/// `compile` and `invoke` let one interpreter stand in for engines that
/// lack those capabilities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum number of operations per evaluation (0 = unlimited)
    pub max_operations: u64,
    /// Maximum function call depth
    pub max_call_levels: usize,
    /// Maximum string length (0 = unlimited)
    pub max_string_size: usize,
    /// Maximum array length (0 = unlimited)
    pub max_array_size: usize,
    pub allow_looping: bool,
    /// Whether engines expose [`Compilable`]
    pub compile: bool,
    /// Whether engines expose [`Invocable`]
    pub invoke: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_operations: 100_000,
            max_call_levels: 64,
            max_string_size: 1_000_000,
            max_array_size: 10_000,
            allow_looping: true,
            compile: true,
            invoke: true,
        }
    }
}

impl EngineConfig {
    /// Evaluation only: neither compilation nor invocation.
    pub fn eval_only() -> Self {
        Self {
            compile: false,
            invoke: false,
            ..Self::default()
        }
    }

    /// Compilation without function invocation.
    pub fn compile_only() -> Self {
        Self {
            invoke: false,
            ..Self::default()
        }
    }
}

/// Name → value bindings visible to executing scripts.
pub trait ScriptContext {
    fn get_attribute(&self, name: &str) -> Option<ScriptValue>;

    fn set_attribute(&mut self, name: &str, value: ScriptValue);

    /// Returns whether the binding existed.
    fn remove_attribute(&mut self, name: &str) -> bool;

    fn attribute_names(&self) -> Vec<String>;
}

/// A unit produced by [`Compilable::compile`], evaluated by the same engine.
pub struct CompiledUnit {
    unit: Box<dyn Any + Send + Sync>,
}

impl CompiledUnit {
    pub fn new<T: Any + Send + Sync>(unit: T) -> Self {
        Self {
            unit: Box::new(unit),
        }
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.unit.downcast_ref::<T>()
    }
}

impl fmt::Debug for CompiledUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledUnit").finish_non_exhaustive()
    }
}

/// Engines that can compile source once and evaluate it repeatedly.
pub trait Compilable: Send + Sync {
    fn compile(&self, source: &str) -> ScriptResult<CompiledUnit>;

    /// Evaluates a unit. Functions it defines become invocable afterwards.
    fn eval_compiled(&self, unit: &CompiledUnit) -> ScriptResult<ScriptValue>;
}

/// Engines that can call functions registered by previously evaluated code.
pub trait Invocable: Send + Sync {
    fn invoke_function(&self, name: &str, args: &[ScriptValue]) -> ScriptResult<ScriptValue>;
}

/// An interpreter instance owned by a single builder and then by a single script.
pub trait ScriptEngine: Send + Sync {
    fn name(&self) -> &str;

    /// Binds a variable into this engine's context.
    fn put(&mut self, name: &str, value: ScriptValue);

    /// Binds the owning manager under `name`.
    fn bind_manager(&mut self, name: &str, manager: WeakScriptManager);

    fn context(&self) -> &dyn ScriptContext;

    fn context_mut(&mut self) -> &mut dyn ScriptContext;

    fn eval(&self, source: &str) -> ScriptResult<ScriptValue>;

    fn as_compilable(&self) -> Option<&dyn Compilable> {
        None
    }

    fn as_invocable(&self) -> Option<&dyn Invocable> {
        None
    }
}

/// Produces fresh engines of one kind.
pub trait ScriptEngineFactory: Send + Sync {
    fn engine_name(&self) -> &str;

    /// Names this factory answers to during discovery.
    fn names(&self) -> Vec<String> {
        vec![self.engine_name().to_string()]
    }

    fn script_engine(&self) -> Box<dyn ScriptEngine>;
}

/// Engine discovery: resolves engine names to factories.
#[derive(Clone, Default)]
pub struct EngineRegistry {
    factories: HashMap<String, Arc<dyn ScriptEngineFactory>>,
}

impl EngineRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the engines compiled into this crate.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        if let Some(factory) = builtin_factory(&EngineConfig::default()) {
            registry.register_arc(factory);
        }
        registry
    }

    /// Registers a factory under every name it reports. Later registrations win.
    pub fn register<F: ScriptEngineFactory + 'static>(&mut self, factory: F) -> &mut Self {
        self.register_arc(Arc::new(factory))
    }

    pub fn register_arc(&mut self, factory: Arc<dyn ScriptEngineFactory>) -> &mut Self {
        for name in factory.names() {
            self.factories.insert(name, Arc::clone(&factory));
        }
        self
    }

    /// Registers a factory under an explicit alias.
    pub fn register_as<F: ScriptEngineFactory + 'static>(
        &mut self,
        name: &str,
        factory: F,
    ) -> &mut Self {
        self.factories.insert(name.to_string(), Arc::new(factory));
        self
    }

    pub fn engine_factory(&self, name: &str) -> Option<Arc<dyn ScriptEngineFactory>> {
        self.factories.get(name).cloned()
    }

    pub fn engine_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }
}

impl fmt::Debug for EngineRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineRegistry")
            .field("engines", &self.engine_names())
            .finish()
    }
}

/// The engine compiled into this crate, configured with `config`.
#[allow(unused_variables)]
pub fn builtin_factory(config: &EngineConfig) -> Option<Arc<dyn ScriptEngineFactory>> {
    #[cfg(feature = "rhai-engine")]
    return Some(Arc::new(rhai::RhaiEngineFactory::new(config.clone())));

    #[cfg(not(feature = "rhai-engine"))]
    None
}

/// Plain map context for engines that keep JSON bindings.
#[derive(Debug, Clone, Default)]
pub struct SimpleContext {
    bindings: HashMap<String, ScriptValue>,
}

impl ScriptContext for SimpleContext {
    fn get_attribute(&self, name: &str) -> Option<ScriptValue> {
        self.bindings.get(name).cloned()
    }

    fn set_attribute(&mut self, name: &str, value: ScriptValue) {
        self.bindings.insert(name.to_string(), value);
    }

    fn remove_attribute(&mut self, name: &str) -> bool {
        self.bindings.remove(name).is_some()
    }

    fn attribute_names(&self) -> Vec<String> {
        self.bindings.keys().cloned().collect()
    }
}
