//! Plain data carried from builders into scripts.

use crate::engine::ScriptEngine;
use crate::manager::WeakScriptManager;
use crate::value::ScriptValue;
use std::fmt;
use std::io::Read;

/// Default init function name of a fresh manager.
pub const DEFAULT_INIT_FUNCTION: &str = "init";

/// How a built script is invoked by default.
///
/// Without a name, executing the script evaluates its source.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct InitFunction {
    name: Option<String>,
    args: Vec<ScriptValue>,
}

impl InitFunction {
    pub fn new(name: impl Into<String>, args: Vec<ScriptValue>) -> Self {
        Self {
            name: Some(name.into()),
            args,
        }
    }

    /// No function: execution evaluates the source itself.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn args(&self) -> &[ScriptValue] {
        &self.args
    }

    pub fn has_name(&self) -> bool {
        self.name.is_some()
    }
}

impl From<&str> for InitFunction {
    fn from(name: &str) -> Self {
        Self::new(name, Vec::new())
    }
}

/// Source stream accepted by builders.
pub type SourceStream = Box<dyn Read + Send>;

/// Manager back-reference, engine and pending source of one builder.
pub struct ScriptHandle {
    pub(crate) manager: WeakScriptManager,
    pub(crate) engine: Box<dyn ScriptEngine>,
    pub(crate) stream: Option<SourceStream>,
}

impl ScriptHandle {
    pub(crate) fn new(
        manager: WeakScriptManager,
        engine: Box<dyn ScriptEngine>,
        stream: Option<SourceStream>,
    ) -> Self {
        Self {
            manager,
            engine,
            stream,
        }
    }

    pub fn manager(&self) -> &WeakScriptManager {
        &self.manager
    }

    pub fn engine(&self) -> &dyn ScriptEngine {
        self.engine.as_ref()
    }

    pub fn has_stream(&self) -> bool {
        self.stream.is_some()
    }
}

impl fmt::Debug for ScriptHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptHandle")
            .field("engine", &self.engine.name())
            .field("has_stream", &self.stream.is_some())
            .finish()
    }
}
