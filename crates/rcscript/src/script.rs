//! Built scripts and their execution strategies.
//!
//! A [`Script`] is immutable once built. Its strategy ([`ScriptKind`]) is
//! chosen from the engine's capabilities and never changes:
//!
//! | kind            | `execute()`                 | named functions |
//! |-----------------|-----------------------------|-----------------|
//! | `EvalOnly`      | evaluates the source text   | unsupported     |
//! | `CompileEval`   | evaluates the compiled unit | unsupported     |
//! | `CompileInvoke` | calls the init function     | supported       |
//!
//! Execution failures go to the script's exception handler and the call
//! yields `None`. The `try_*` methods return them instead.

use crate::data::InitFunction;
use crate::engine::{CompiledUnit, ScriptEngine};
use crate::error::{ExceptionHandler, ScriptError, ScriptResult};
use crate::manager::{ScriptManager, WeakScriptManager};
use crate::pool::{ScriptFuture, WorkerPool};
use crate::value::{FromScriptValue, ScriptValue};
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Execution strategy of a built script.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScriptKind {
    EvalOnly,
    CompileEval,
    CompileInvoke,
}

impl ScriptKind {
    /// Picks the strategy for an engine and init function.
    pub fn select(engine: &dyn ScriptEngine, init: &InitFunction) -> Self {
        let compilable = engine.as_compilable().is_some();
        let invocable = engine.as_invocable().is_some();
        if invocable && init.has_name() && compilable {
            ScriptKind::CompileInvoke
        } else if compilable {
            ScriptKind::CompileEval
        } else {
            ScriptKind::EvalOnly
        }
    }

    pub fn supports_functions(self) -> bool {
        self == ScriptKind::CompileInvoke
    }
}

impl fmt::Display for ScriptKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ScriptKind::EvalOnly => "eval-only",
            ScriptKind::CompileEval => "compile-eval",
            ScriptKind::CompileInvoke => "compile-invoke",
        };
        f.write_str(name)
    }
}

enum ScriptVariant {
    EvalOnly { source: String },
    CompileEval { unit: CompiledUnit },
    CompileInvoke { init: String, args: Vec<ScriptValue> },
}

impl ScriptVariant {
    fn kind(&self) -> ScriptKind {
        match self {
            ScriptVariant::EvalOnly { .. } => ScriptKind::EvalOnly,
            ScriptVariant::CompileEval { .. } => ScriptKind::CompileEval,
            ScriptVariant::CompileInvoke { .. } => ScriptKind::CompileInvoke,
        }
    }
}

struct ScriptInner {
    manager: WeakScriptManager,
    engine: Box<dyn ScriptEngine>,
    variant: ScriptVariant,
    init: InitFunction,
    handler: RwLock<ExceptionHandler<ScriptError>>,
    pool: Arc<WorkerPool>,
}

/// Shared handle to a built script.
#[derive(Clone)]
pub struct Script {
    inner: Arc<ScriptInner>,
}

impl Script {
    /// Builds a script of the strategy [`ScriptKind::select`] picks.
    ///
    /// Compile-invoke scripts evaluate their unit once here so its functions
    /// are registered.
    pub(crate) fn build(
        manager: WeakScriptManager,
        engine: Box<dyn ScriptEngine>,
        source: String,
        init: InitFunction,
        pool: Arc<WorkerPool>,
    ) -> ScriptResult<Self> {
        let kind = ScriptKind::select(engine.as_ref(), &init);
        let variant = match kind {
            ScriptKind::EvalOnly => ScriptVariant::EvalOnly { source },
            ScriptKind::CompileEval => ScriptVariant::CompileEval {
                unit: compiler(engine.as_ref())?.compile(&source)?,
            },
            ScriptKind::CompileInvoke => {
                let compilable = compiler(engine.as_ref())?;
                let unit = compilable.compile(&source)?;
                compilable.eval_compiled(&unit)?;
                ScriptVariant::CompileInvoke {
                    init: init.name().unwrap_or_default().to_string(),
                    args: init.args().to_vec(),
                }
            }
        };
        debug!("Built {} script on engine '{}'", kind, engine.name());

        Ok(Self {
            inner: Arc::new(ScriptInner {
                manager,
                engine,
                variant,
                init,
                handler: RwLock::new(ExceptionHandler::default()),
                pool,
            }),
        })
    }

    pub fn kind(&self) -> ScriptKind {
        self.inner.variant.kind()
    }

    /// The owning manager, if it is still alive.
    pub fn manager(&self) -> Option<ScriptManager> {
        self.inner.manager.upgrade()
    }

    pub fn engine(&self) -> &dyn ScriptEngine {
        self.inner.engine.as_ref()
    }

    pub fn init_function(&self) -> &InitFunction {
        &self.inner.init
    }

    /// Replaces the handler receiving this script's execution errors.
    pub fn handle_exceptions(&self, handler: ExceptionHandler<ScriptError>) -> &Self {
        *self.inner.handler.write() = handler;
        self
    }

    pub fn exception_handler(&self) -> ExceptionHandler<ScriptError> {
        self.inner.handler.read().clone()
    }

    /// Whether both handles refer to the same built script.
    pub fn ptr_eq(a: &Script, b: &Script) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }

    // ------------------------------------------------------------------
    // Synchronous execution
    // ------------------------------------------------------------------

    pub fn try_execute(&self) -> ScriptResult<ScriptValue> {
        let engine = self.inner.engine.as_ref();
        match &self.inner.variant {
            ScriptVariant::EvalOnly { source } => engine.eval(source),
            ScriptVariant::CompileEval { unit } => compiler(engine)?.eval_compiled(unit),
            ScriptVariant::CompileInvoke { init, args } => self.invoke(init, args),
        }
    }

    pub fn try_execute_function(
        &self,
        name: &str,
        args: Vec<ScriptValue>,
    ) -> ScriptResult<ScriptValue> {
        match &self.inner.variant {
            ScriptVariant::CompileInvoke { .. } => self.invoke(name, &args),
            other => Err(ScriptError::UnsupportedOperation(format!(
                "cannot call '{}' on a {} script",
                name,
                other.kind()
            ))),
        }
    }

    pub fn try_expect<T: FromScriptValue>(&self) -> ScriptResult<T> {
        self.try_execute().and_then(T::from_script_value)
    }

    pub fn try_expect_function<T: FromScriptValue>(
        &self,
        name: &str,
        args: Vec<ScriptValue>,
    ) -> ScriptResult<T> {
        self.try_execute_function(name, args)
            .and_then(T::from_script_value)
    }

    /// Runs the script's default action; failures go to the handler.
    pub fn execute(&self) -> Option<ScriptValue> {
        self.handled(self.try_execute())
    }

    /// Calls a function the script defines.
    ///
    /// Only [`ScriptError::UnsupportedOperation`] is returned as `Err`; other
    /// failures go to the handler and yield `Ok(None)`.
    pub fn execute_function(
        &self,
        name: &str,
        args: Vec<ScriptValue>,
    ) -> ScriptResult<Option<ScriptValue>> {
        self.ensure_functions(name)?;
        Ok(self.handled(self.try_execute_function(name, args)))
    }

    pub fn expect<T: FromScriptValue>(&self) -> Option<T> {
        self.handled(self.try_expect())
    }

    pub fn expect_function<T: FromScriptValue>(
        &self,
        name: &str,
        args: Vec<ScriptValue>,
    ) -> ScriptResult<Option<T>> {
        self.ensure_functions(name)?;
        Ok(self.handled(self.try_expect_function(name, args)))
    }

    // ------------------------------------------------------------------
    // Asynchronous execution
    // ------------------------------------------------------------------

    pub fn execute_async(&self) -> ScriptFuture<Option<ScriptValue>> {
        let script = self.clone();
        self.inner.pool.submit(move || Ok(script.execute()))
    }

    pub fn execute_function_async(
        &self,
        name: &str,
        args: Vec<ScriptValue>,
    ) -> ScriptFuture<Option<ScriptValue>> {
        let script = self.clone();
        let name = name.to_string();
        self.inner
            .pool
            .submit(move || script.execute_function(&name, args))
    }

    pub fn expect_later<T>(&self) -> ScriptFuture<Option<T>>
    where
        T: FromScriptValue + Send + 'static,
    {
        let script = self.clone();
        self.inner.pool.submit(move || Ok(script.expect::<T>()))
    }

    pub fn expect_function_later<T>(
        &self,
        name: &str,
        args: Vec<ScriptValue>,
    ) -> ScriptFuture<Option<T>>
    where
        T: FromScriptValue + Send + 'static,
    {
        let script = self.clone();
        let name = name.to_string();
        self.inner
            .pool
            .submit(move || script.expect_function::<T>(&name, args))
    }

    // ------------------------------------------------------------------

    fn invoke(&self, name: &str, args: &[ScriptValue]) -> ScriptResult<ScriptValue> {
        let engine = self.inner.engine.as_ref();
        let invocable = engine.as_invocable().ok_or_else(|| {
            ScriptError::UnsupportedOperation(format!(
                "engine '{}' cannot invoke functions",
                engine.name()
            ))
        })?;
        invocable.invoke_function(name, args)
    }

    fn ensure_functions(&self, name: &str) -> ScriptResult<()> {
        let kind = self.kind();
        if kind.supports_functions() {
            Ok(())
        } else {
            Err(ScriptError::UnsupportedOperation(format!(
                "cannot call '{}' on a {} script",
                name, kind
            )))
        }
    }

    fn handled<T>(&self, result: ScriptResult<T>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(err) => {
                self.exception_handler().handle(&err);
                None
            }
        }
    }
}

fn compiler(engine: &dyn ScriptEngine) -> ScriptResult<&dyn crate::engine::Compilable> {
    engine.as_compilable().ok_or_else(|| {
        ScriptError::Configuration(format!("engine '{}' cannot compile", engine.name()))
    })
}

impl fmt::Debug for Script {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Script")
            .field("kind", &self.kind())
            .field("engine", &self.inner.engine.name())
            .field("init", &self.inner.init)
            .finish()
    }
}

#[cfg(all(test, feature = "rhai-engine"))]
mod tests {
    use super::*;
    use crate::engine::EngineConfig;
    use crate::engine::rhai::RhaiEngine;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn build(config: EngineConfig, source: &str, init: InitFunction) -> ScriptResult<Script> {
        Script::build(
            WeakScriptManager::new(),
            Box::new(RhaiEngine::new("rhai", config)),
            source.to_string(),
            init,
            Arc::new(WorkerPool::new(2)),
        )
    }

    #[test]
    fn test_strategy_selection() {
        let source = "fn init() { 1 }";
        let invoke = build(EngineConfig::default(), source, InitFunction::from("init")).unwrap();
        assert_eq!(invoke.kind(), ScriptKind::CompileInvoke);

        let compile = build(EngineConfig::default(), source, InitFunction::none()).unwrap();
        assert_eq!(compile.kind(), ScriptKind::CompileEval);

        let compile_only =
            build(EngineConfig::compile_only(), source, InitFunction::from("init")).unwrap();
        assert_eq!(compile_only.kind(), ScriptKind::CompileEval);

        let eval = build(EngineConfig::eval_only(), source, InitFunction::from("init")).unwrap();
        assert_eq!(eval.kind(), ScriptKind::EvalOnly);
    }

    #[test]
    fn test_eval_only_evaluates_source_each_call() {
        let script = build(EngineConfig::eval_only(), "1 + 4", InitFunction::none()).unwrap();
        assert_eq!(script.expect::<i32>(), Some(5));
        assert_eq!(script.expect::<i32>(), Some(5));

        let err = script.execute_function("init", vec![]).unwrap_err();
        assert!(matches!(err, ScriptError::UnsupportedOperation(_)));
    }

    #[test]
    fn test_compile_eval_rejects_functions() {
        let script = build(EngineConfig::default(), "40 + 2", InitFunction::none()).unwrap();
        assert_eq!(script.expect::<i64>(), Some(42));

        let err = script.expect_function::<i64>("any", vec![]).unwrap_err();
        assert!(matches!(err, ScriptError::UnsupportedOperation(_)));
    }

    #[test]
    fn test_compile_invoke_calls_init_with_args() {
        let script = build(
            EngineConfig::default(),
            "fn init(a, b) { a * b }",
            InitFunction::new("init", vec![json!(6), json!(7)]),
        )
        .unwrap();

        assert_eq!(script.expect::<i32>(), Some(42));
        assert_eq!(
            script.expect_function::<i64>("init", vec![json!(2), json!(3)]).unwrap(),
            Some(6)
        );
    }

    #[test]
    fn test_build_failures_propagate() {
        let err = build(EngineConfig::default(), "fn (", InitFunction::none()).unwrap_err();
        assert!(matches!(err, ScriptError::Compile(_)));

        let err = build(
            EngineConfig::default(),
            r#"throw "at load"; fn init() { 1 }"#,
            InitFunction::from("init"),
        )
        .unwrap_err();
        assert!(matches!(err, ScriptError::Execution(_)));
    }

    #[test]
    fn test_failures_go_to_handler() {
        let script = build(
            EngineConfig::default(),
            r#"fn init() { "text" }"#,
            InitFunction::from("init"),
        )
        .unwrap();

        let seen = Arc::new(AtomicUsize::new(0));
        let coercions = Arc::new(AtomicUsize::new(0));
        {
            let seen = seen.clone();
            let coercions = coercions.clone();
            script.handle_exceptions(ExceptionHandler::new(move |err: &ScriptError| {
                seen.fetch_add(1, Ordering::SeqCst);
                if err.is_coercion() {
                    coercions.fetch_add(1, Ordering::SeqCst);
                }
            }));
        }

        assert_eq!(script.expect::<i32>(), None);
        assert_eq!(script.execute_function("missing", vec![]).unwrap(), None);
        assert_eq!(script.expect::<String>(), Some("text".to_string()));

        assert_eq!(seen.load(Ordering::SeqCst), 2);
        assert_eq!(coercions.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_try_variants_expose_error_kind() {
        let script = build(
            EngineConfig::default(),
            r#"fn init() { "text" }"#,
            InitFunction::from("init"),
        )
        .unwrap();
        script.handle_exceptions(ExceptionHandler::new(|_: &ScriptError| {
            panic!("handler must not run for try_* calls")
        }));

        assert!(script.try_expect::<i32>().unwrap_err().is_coercion());
        assert!(matches!(
            script.try_execute_function("missing", vec![]),
            Err(ScriptError::FunctionNotFound(_))
        ));
    }

    #[test]
    fn test_async_variants() {
        let script = build(
            EngineConfig::default(),
            r#"fn init() { "ready" } fn add(a, b) { a + b }"#,
            InitFunction::from("init"),
        )
        .unwrap();

        assert_eq!(
            script.expect_later::<String>().get().unwrap(),
            Some("ready".to_string())
        );
        assert_eq!(
            script
                .expect_function_later::<i64>("add", vec![json!(1), json!(2)])
                .get()
                .unwrap(),
            Some(3)
        );
        assert_eq!(
            script.execute_async().get().unwrap(),
            Some(json!("ready"))
        );
    }

    #[test]
    fn test_async_unsupported_resolves_to_err() {
        let script = build(EngineConfig::default(), "1", InitFunction::none()).unwrap();
        let err = script.execute_function_async("f", vec![]).get().unwrap_err();
        assert!(matches!(err, ScriptError::UnsupportedOperation(_)));
    }

    #[test]
    fn test_clones_share_state() {
        let script = build(EngineConfig::default(), "1", InitFunction::none()).unwrap();
        let clone = script.clone();
        assert!(Script::ptr_eq(&script, &clone));
        assert!(script.manager().is_none());
    }
}
