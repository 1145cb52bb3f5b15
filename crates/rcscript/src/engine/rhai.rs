//! Rhai-backed engine.
//!
//! Bindings placed on the engine are resolved through a variable resolver, so
//! they are visible at top level and inside script functions alike. Functions
//! defined by an evaluated unit are kept in a function library used for
//! later invocation.

use super::{
    Compilable, CompiledUnit, EngineConfig, Invocable, ScriptContext, ScriptEngine,
    ScriptEngineFactory,
};
use crate::error::{ScriptError, ScriptResult};
use crate::identifier::Identifier;
use crate::manager::{ScriptManager, WeakScriptManager};
use crate::value::ScriptValue;
use parking_lot::RwLock;
use rhai::{AST, Array, Dynamic, Engine, EvalAltResult, Map, ParseError, Scope};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Default discovery names of the rhai engine.
pub const RHAI_ENGINE_NAMES: &[&str] = &["rhai", "rhai-script"];

type Bindings = Arc<RwLock<BTreeMap<String, Dynamic>>>;

// ============================================================================
// Factory
// ============================================================================

/// Produces [`RhaiEngine`]s sharing one configuration.
#[derive(Debug, Clone)]
pub struct RhaiEngineFactory {
    config: EngineConfig,
    names: Vec<String>,
}

impl RhaiEngineFactory {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            names: RHAI_ENGINE_NAMES.iter().map(|n| n.to_string()).collect(),
        }
    }

    /// Replaces the discovery names. The first one becomes the engine name.
    pub fn with_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        if !names.is_empty() {
            self.names = names;
        }
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}

impl Default for RhaiEngineFactory {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl ScriptEngineFactory for RhaiEngineFactory {
    fn engine_name(&self) -> &str {
        self.names.first().map(String::as_str).unwrap_or("rhai")
    }

    fn names(&self) -> Vec<String> {
        self.names.clone()
    }

    fn script_engine(&self) -> Box<dyn ScriptEngine> {
        Box::new(RhaiEngine::new(self.engine_name(), self.config.clone()))
    }
}

// ============================================================================
// Engine
// ============================================================================

/// One rhai interpreter with its own bindings and function library.
pub struct RhaiEngine {
    name: String,
    engine: Engine,
    config: EngineConfig,
    context: RhaiContext,
    functions: RwLock<AST>,
}

impl RhaiEngine {
    pub fn new(name: &str, config: EngineConfig) -> Self {
        let bindings: Bindings = Arc::new(RwLock::new(BTreeMap::new()));
        let mut engine = Engine::new();

        Self::apply_limits(&mut engine, &config);
        Self::register_builtin_functions(&mut engine);
        Self::register_manager_api(&mut engine);

        let resolver = Arc::clone(&bindings);
        #[allow(deprecated)]
        engine.on_var(move |var, index, ctx| {
            // a non-zero index means the parser already found a local variable;
            // captures and names inside `eval` arrive unindexed but live in scope
            if index > 0 || ctx.scope().contains(var) {
                return Ok(None);
            }
            Ok(resolver.read().get(var).cloned())
        });

        Self {
            name: name.to_string(),
            engine,
            config,
            context: RhaiContext { bindings },
            functions: RwLock::new(AST::empty()),
        }
    }

    fn apply_limits(engine: &mut Engine, config: &EngineConfig) {
        engine.set_max_operations(config.max_operations);
        engine.set_max_call_levels(config.max_call_levels);
        engine.set_max_string_size(config.max_string_size);
        engine.set_max_array_size(config.max_array_size);
        engine.set_allow_looping(config.allow_looping);
        engine.set_strict_variables(false);
    }

    fn register_builtin_functions(engine: &mut Engine) {
        engine.on_print(|text| info!(target: "rcscript::script", "{}", text));
        engine.on_debug(|text, source, pos| {
            debug!(target: "rcscript::script", source = source.unwrap_or(""), "{} @ {}", text, pos)
        });

        engine.register_fn("log", |msg: &str| {
            info!(target: "rcscript::script", "{}", msg);
        });
        engine.register_fn("warn", |msg: &str| {
            warn!(target: "rcscript::script", "{}", msg);
        });
    }

    /// Methods available on the `rcsm` binding.
    fn register_manager_api(engine: &mut Engine) {
        engine
            .register_type_with_name::<ManagerBinding>("ScriptManager")
            .register_fn("exists", |m: ManagerBinding, id: &str| -> bool {
                m.manager()
                    .is_some_and(|manager| manager.exists(&Identifier::from(id)))
            })
            .register_fn("remove", |m: ManagerBinding, id: &str| -> bool {
                m.manager()
                    .is_some_and(|manager| manager.remove(&Identifier::from(id)))
            })
            .register_fn("cache_len", |m: ManagerBinding| -> i64 {
                m.manager().map_or(0, |manager| manager.cache_len() as i64)
            })
            .register_fn("engine_name", |m: ManagerBinding| -> String {
                m.manager()
                    .map(|manager| manager.engine_name().to_string())
                    .unwrap_or_default()
            })
            .register_fn(
                "execute",
                |m: ManagerBinding, id: &str| -> Result<Dynamic, Box<EvalAltResult>> {
                    let script = m.cached(id)?;
                    Ok(script
                        .execute()
                        .map(|value| json_to_dynamic(&value))
                        .unwrap_or(Dynamic::UNIT))
                },
            )
            .register_fn(
                "invoke",
                |m: ManagerBinding,
                 id: &str,
                 function: &str,
                 args: Array|
                 -> Result<Dynamic, Box<EvalAltResult>> {
                    let script = m.cached(id)?;
                    let args = args.iter().map(dynamic_to_json).collect();
                    let value = script
                        .execute_function(function, args)
                        .map_err(|e| -> Box<EvalAltResult> { e.to_string().into() })?;
                    Ok(value.map(|v| json_to_dynamic(&v)).unwrap_or(Dynamic::UNIT))
                },
            );
    }

    fn unit_ast<'a>(&self, unit: &'a CompiledUnit) -> ScriptResult<&'a AST> {
        unit.downcast_ref::<AST>().ok_or_else(|| {
            ScriptError::Configuration(format!(
                "compiled unit was not produced by engine '{}'",
                self.name
            ))
        })
    }
}

impl ScriptEngine for RhaiEngine {
    fn name(&self) -> &str {
        &self.name
    }

    fn put(&mut self, name: &str, value: ScriptValue) {
        self.context.set_attribute(name, value);
    }

    fn bind_manager(&mut self, name: &str, manager: WeakScriptManager) {
        self.context
            .bindings
            .write()
            .insert(name.to_string(), Dynamic::from(ManagerBinding(manager)));
    }

    fn context(&self) -> &dyn ScriptContext {
        &self.context
    }

    fn context_mut(&mut self) -> &mut dyn ScriptContext {
        &mut self.context
    }

    fn eval(&self, source: &str) -> ScriptResult<ScriptValue> {
        let mut scope = Scope::new();
        self.engine
            .eval_with_scope::<Dynamic>(&mut scope, source)
            .map(|value| dynamic_to_json(&value))
            .map_err(|err| map_eval_error(*err))
    }

    fn as_compilable(&self) -> Option<&dyn Compilable> {
        self.config.compile.then_some(self as &dyn Compilable)
    }

    fn as_invocable(&self) -> Option<&dyn Invocable> {
        self.config.invoke.then_some(self as &dyn Invocable)
    }
}

impl Compilable for RhaiEngine {
    fn compile(&self, source: &str) -> ScriptResult<CompiledUnit> {
        let ast = self.engine.compile(source).map_err(map_parse_error)?;
        Ok(CompiledUnit::new(ast))
    }

    fn eval_compiled(&self, unit: &CompiledUnit) -> ScriptResult<ScriptValue> {
        let ast = self.unit_ast(unit)?;
        let mut scope = Scope::new();
        let value = self
            .engine
            .eval_ast_with_scope::<Dynamic>(&mut scope, ast)
            .map_err(|err| map_eval_error(*err))?;

        if self.config.invoke {
            self.functions.write().combine(ast.clone_functions_only());
        }
        Ok(dynamic_to_json(&value))
    }
}

impl Invocable for RhaiEngine {
    fn invoke_function(&self, name: &str, args: &[ScriptValue]) -> ScriptResult<ScriptValue> {
        let library = self.functions.read().clone();
        let mut scope = Scope::new();
        let args: Vec<Dynamic> = args.iter().map(json_to_dynamic).collect();

        self.engine
            .call_fn::<Dynamic>(&mut scope, &library, name, args)
            .map(|value| dynamic_to_json(&value))
            .map_err(|err| map_eval_error(*err))
    }
}

// ============================================================================
// Context and the manager binding
// ============================================================================

/// Bindings store shared with the engine's variable resolver.
pub struct RhaiContext {
    bindings: Bindings,
}

impl ScriptContext for RhaiContext {
    fn get_attribute(&self, name: &str) -> Option<ScriptValue> {
        self.bindings.read().get(name).map(dynamic_to_json)
    }

    fn set_attribute(&mut self, name: &str, value: ScriptValue) {
        self.bindings
            .write()
            .insert(name.to_string(), json_to_dynamic(&value));
    }

    fn remove_attribute(&mut self, name: &str) -> bool {
        self.bindings.write().remove(name).is_some()
    }

    fn attribute_names(&self) -> Vec<String> {
        self.bindings.read().keys().cloned().collect()
    }
}

/// The `rcsm` value seen by scripts.
#[derive(Clone)]
pub struct ManagerBinding(WeakScriptManager);

impl ManagerBinding {
    fn manager(&self) -> Option<ScriptManager> {
        self.0.upgrade()
    }

    fn cached(&self, id: &str) -> Result<crate::script::Script, Box<EvalAltResult>> {
        let manager = self
            .manager()
            .ok_or_else(|| -> Box<EvalAltResult> { "script manager was dropped".into() })?;
        manager
            .unpack(&Identifier::from(id))
            .ok_or_else(|| format!("no cached script under '{}'", id).into())
    }
}

// ============================================================================
// Error mapping
// ============================================================================

fn map_parse_error(err: ParseError) -> ScriptError {
    ScriptError::Compile(err.to_string())
}

fn map_eval_error(err: EvalAltResult) -> ScriptError {
    match err {
        EvalAltResult::ErrorParsing(kind, pos) => {
            ScriptError::Compile(ParseError(Box::new(kind), pos).to_string())
        }
        EvalAltResult::ErrorFunctionNotFound(signature, _) => {
            ScriptError::FunctionNotFound(signature)
        }
        other => ScriptError::Execution(other.to_string()),
    }
}

// ============================================================================
// Value conversion
// ============================================================================

/// Converts a JSON value into a rhai value.
pub fn json_to_dynamic(value: &ScriptValue) -> Dynamic {
    match value {
        ScriptValue::Null => Dynamic::UNIT,
        ScriptValue::Bool(b) => Dynamic::from(*b),
        ScriptValue::Number(n) => match n.as_i64() {
            Some(i) => Dynamic::from(i),
            None => n.as_f64().map(Dynamic::from).unwrap_or(Dynamic::UNIT),
        },
        ScriptValue::String(s) => Dynamic::from(s.clone()),
        ScriptValue::Array(items) => {
            Dynamic::from(items.iter().map(json_to_dynamic).collect::<Array>())
        }
        ScriptValue::Object(object) => {
            let mut map = Map::new();
            for (k, v) in object {
                map.insert(k.as_str().into(), json_to_dynamic(v));
            }
            Dynamic::from(map)
        }
    }
}

/// Converts a rhai value into JSON; unknown types render as text.
pub fn dynamic_to_json(value: &Dynamic) -> ScriptValue {
    if value.is_unit() {
        return ScriptValue::Null;
    }
    if let Ok(b) = value.as_bool() {
        return ScriptValue::Bool(b);
    }
    if let Ok(i) = value.as_int() {
        return ScriptValue::from(i);
    }
    if let Ok(f) = value.as_float() {
        return serde_json::json!(f);
    }
    if let Ok(c) = value.as_char() {
        return ScriptValue::String(c.to_string());
    }
    if value.is_string() {
        return ScriptValue::String(value.to_string());
    }
    if let Some(items) = value.clone().try_cast::<Array>() {
        return ScriptValue::Array(items.iter().map(dynamic_to_json).collect());
    }
    if let Some(map) = value.clone().try_cast::<Map>() {
        let object = map
            .iter()
            .map(|(k, v)| (k.to_string(), dynamic_to_json(v)))
            .collect();
        return ScriptValue::Object(object);
    }
    ScriptValue::String(value.to_string())
}
