//! The manager against hand-written engines with different capability sets.

mod common;

use common::init_tracing;
use rcscript::engine::SimpleContext;
use rcscript::{
    Compilable, CompiledUnit, EngineRegistry, HostConfig, Identifier, Invocable, ScriptContext,
    ScriptEngine, ScriptEngineFactory, ScriptError, ScriptHost, ScriptKind, ScriptResult,
    ScriptValue, WeakScriptManager,
};
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Evaluates a source line as the name of a bound variable.
struct LookupEngine {
    context: SimpleContext,
    manager: WeakScriptManager,
    compiles: Option<Arc<AtomicUsize>>,
}

impl LookupEngine {
    fn lookup(&self, source: &str) -> ScriptResult<ScriptValue> {
        let name = source.trim();
        self.context
            .get_attribute(name)
            .ok_or_else(|| ScriptError::Execution(format!("unbound: {}", name)))
    }
}

impl ScriptEngine for LookupEngine {
    fn name(&self) -> &str {
        "lookup"
    }

    fn put(&mut self, name: &str, value: ScriptValue) {
        self.context.set_attribute(name, value);
    }

    fn bind_manager(&mut self, name: &str, manager: WeakScriptManager) {
        self.context.set_attribute(name, json!("<manager>"));
        self.manager = manager;
    }

    fn context(&self) -> &dyn ScriptContext {
        &self.context
    }

    fn context_mut(&mut self) -> &mut dyn ScriptContext {
        &mut self.context
    }

    fn eval(&self, source: &str) -> ScriptResult<ScriptValue> {
        self.lookup(source)
    }

    fn as_compilable(&self) -> Option<&dyn Compilable> {
        self.compiles.as_ref().map(|_| self as &dyn Compilable)
    }

    fn as_invocable(&self) -> Option<&dyn Invocable> {
        self.compiles.as_ref().map(|_| self as &dyn Invocable)
    }
}

impl Compilable for LookupEngine {
    fn compile(&self, source: &str) -> ScriptResult<CompiledUnit> {
        if let Some(counter) = &self.compiles {
            counter.fetch_add(1, Ordering::SeqCst);
        }
        Ok(CompiledUnit::new(source.trim().to_string()))
    }

    fn eval_compiled(&self, unit: &CompiledUnit) -> ScriptResult<ScriptValue> {
        let name = unit
            .downcast_ref::<String>()
            .ok_or_else(|| ScriptError::Execution("foreign unit".into()))?;
        self.lookup(name)
    }
}

impl Invocable for LookupEngine {
    fn invoke_function(&self, name: &str, args: &[ScriptValue]) -> ScriptResult<ScriptValue> {
        match name {
            "echo" => Ok(ScriptValue::Array(args.to_vec())),
            "manager_alive" => Ok(json!(self.manager.upgrade().is_some())),
            other => Err(ScriptError::FunctionNotFound(other.to_string())),
        }
    }
}

struct LookupFactory {
    compiles: Option<Arc<AtomicUsize>>,
}

impl ScriptEngineFactory for LookupFactory {
    fn engine_name(&self) -> &str {
        "lookup"
    }

    fn names(&self) -> Vec<String> {
        vec!["lookup".into(), "lk".into()]
    }

    fn script_engine(&self) -> Box<dyn ScriptEngine> {
        Box::new(LookupEngine {
            context: SimpleContext::default(),
            manager: WeakScriptManager::new(),
            compiles: self.compiles.clone(),
        })
    }
}

fn host_with(factory: LookupFactory) -> ScriptHost {
    init_tracing();
    let mut registry = EngineRegistry::new();
    registry.register(factory);
    ScriptHost::with_engines(HostConfig::default(), registry)
}

#[test]
fn test_eval_only_engine() {
    let host = host_with(LookupFactory { compiles: None });
    let manager = host.process_engine("lk").unwrap();
    assert_eq!(manager.engine_name(), "lookup");

    let script = manager
        .open_script("answer")
        .place("answer", 42)
        .build()
        .unwrap();

    // an init name alone does not enable invocation
    assert_eq!(script.init_function().name(), Some("init"));
    assert_eq!(script.kind(), ScriptKind::EvalOnly);
    assert_eq!(script.expect::<i32>(), Some(42));
    assert!(matches!(
        script.expect_function::<i32>("echo", vec![]),
        Err(ScriptError::UnsupportedOperation(_))
    ));

    let err = manager.pack_script("answer", "packed").build().unwrap_err();
    assert!(err.is_configuration());
    assert!(!manager.exists(&Identifier::from("packed")));
}

#[test]
fn test_manager_binding_is_placed() {
    let host = host_with(LookupFactory { compiles: None });
    let manager = host.process_engine("lookup").unwrap();

    let script = manager.open_script("rcsm").build().unwrap();
    assert_eq!(script.execute(), Some(json!("<manager>")));
}

#[test]
fn test_compiling_engine_compiles_once() {
    let compiles = Arc::new(AtomicUsize::new(0));
    let host = host_with(LookupFactory {
        compiles: Some(compiles.clone()),
    });
    let manager = host.process_engine("lookup").unwrap();

    let script = manager
        .open_script("value")
        .place("value", "bound")
        .clear_init_function()
        .build()
        .unwrap();

    assert_eq!(script.kind(), ScriptKind::CompileEval);
    for _ in 0..3 {
        assert_eq!(script.expect::<String>(), Some("bound".to_string()));
    }
    assert_eq!(compiles.load(Ordering::SeqCst), 1);
}

#[test]
fn test_invoking_engine() {
    let host = host_with(LookupFactory {
        compiles: Some(Arc::new(AtomicUsize::new(0))),
    });
    let manager = host.process_engine("lookup").unwrap();

    let script = manager
        .pack_script("value", "invoking")
        .place("value", 1)
        .set_init_function("echo", vec![json!("a"), json!(2)])
        .build()
        .unwrap();

    assert_eq!(script.kind(), ScriptKind::CompileInvoke);
    assert_eq!(script.execute(), Some(json!(["a", 2])));
    assert_eq!(
        script.expect_function_later::<bool>("manager_alive", vec![]).get().unwrap(),
        Some(true)
    );
    assert!(matches!(
        script.try_execute_function("nope", vec![]),
        Err(ScriptError::FunctionNotFound(_))
    ));
    assert!(manager.exists(&Identifier::from("invoking")));
}

#[test]
fn test_compile_invoke_fails_when_unit_evaluation_fails() {
    let host = host_with(LookupFactory {
        compiles: Some(Arc::new(AtomicUsize::new(0))),
    });
    let manager = host.process_engine("lookup").unwrap();

    let err = manager
        .pack_script("never_bound", "failing")
        .build()
        .unwrap_err();
    assert!(matches!(err, ScriptError::Execution(_)));
    assert_eq!(manager.cache_len(), 0);
}
