//! # rcscript
//!
//! Script management around pluggable engines.
//!
//! A [`ScriptHost`] resolves engine names to factories and keeps one
//! [`ScriptManager`] per resolved name. Managers hand out [`ScriptBuilder`]s
//! that stage a source, bindings and an init function; building yields an
//! immutable [`Script`] whose execution strategy follows from what the
//! engine can do. Packed builders also cache the script under an
//! [`Identifier`], matched according to the manager's [`IdentifierRule`].
//!
//! ```rust,ignore
//! use rcscript::ScriptManager;
//! use serde_json::json;
//!
//! let manager = ScriptManager::process_engine("rhai").expect("rhai engine");
//! manager
//!     .pack_script("fn init() { \"ready\" } fn add(n) { n + offset }", "lib")
//!     .place("offset", 3)
//!     .build()?;
//!
//! let lib = manager.unpack(&"lib".into()).expect("cached");
//! assert_eq!(lib.expect::<String>().as_deref(), Some("ready"));
//! assert_eq!(lib.expect_function::<i64>("add", vec![json!(7)])?, Some(10));
//! ```
//!
//! ## Modules
//!
//! - [`engine`]: engine capabilities, discovery and the rhai engine
//! - [`manager`] / [`builder`] / [`script`]: the script lifecycle
//! - [`identifier`]: cache keys and identifier rules
//! - [`pool`]: the shared worker pool behind async execution
//! - [`config`]: host configuration loading

pub mod builder;
pub mod config;
pub mod data;
pub mod engine;
pub mod error;
pub mod host;
pub mod identifier;
pub mod manager;
pub mod pool;
pub mod resource;
pub mod script;
pub mod value;

pub use builder::ScriptBuilder;
pub use config::HostConfig;
pub use data::InitFunction;
pub use engine::{
    Compilable, CompiledUnit, EngineConfig, EngineRegistry, Invocable, ScriptContext,
    ScriptEngine, ScriptEngineFactory,
};
pub use error::{ExceptionHandler, ScriptError, ScriptResult};
pub use host::ScriptHost;
pub use identifier::{Identifier, IdentifierRule, ScriptCache};
pub use manager::{ScriptManager, WeakScriptManager};
pub use pool::{ScriptFuture, WorkerPool};
pub use resource::ResourceBundle;
pub use script::{Script, ScriptKind};
pub use value::{FromScriptValue, Json, ScriptValue};

#[cfg(feature = "rhai-engine")]
pub use engine::rhai::{RhaiEngine, RhaiEngineFactory};
