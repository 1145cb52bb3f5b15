//! Script builders.
//!
//! A builder owns one engine and stages bindings, a source and an init
//! function until [`ScriptBuilder::build`] turns them into a [`Script`].
//! Packed builders also cache the result under their identifier.

use crate::data::{InitFunction, ScriptHandle};
use crate::engine::{ScriptContext, ScriptEngine};
use crate::error::{ScriptError, ScriptResult};
use crate::identifier::Identifier;
use crate::manager::{BuilderSettings, open_file, text_stream};
use crate::script::{Script, ScriptKind};
use crate::value::ScriptValue;
use std::fmt;
use std::io::{self, Read};
use std::path::Path;

#[must_use = "a builder does nothing until `build` is called"]
pub struct ScriptBuilder {
    handle: ScriptHandle,
    init: InitFunction,
    identifier: Option<Identifier>,
    settings: BuilderSettings,
}

impl ScriptBuilder {
    pub(crate) fn new(
        handle: ScriptHandle,
        init: InitFunction,
        identifier: Option<Identifier>,
        settings: BuilderSettings,
    ) -> Self {
        Self {
            handle,
            init,
            identifier,
            settings,
        }
    }

    /// Binds a variable in the engine context.
    pub fn place(mut self, name: &str, value: impl Into<ScriptValue>) -> Self {
        self.handle.engine.put(name, value.into());
        self
    }

    /// Gives `f` direct access to the engine context.
    pub fn consume_context<F>(mut self, f: F) -> Self
    where
        F: FnOnce(&mut dyn ScriptContext),
    {
        f(self.handle.engine.context_mut());
        self
    }

    pub fn set_stream<R: Read + Send + 'static>(mut self, reader: R) -> Self {
        self.handle.stream = Some(Box::new(reader));
        self
    }

    pub fn set_script(mut self, source: impl Into<String>) -> Self {
        self.handle.stream = Some(text_stream(source));
        self
    }

    /// Uses a bundled resource as the source. A missing resource is reported
    /// to the manager's handler and the previous source is kept.
    pub fn set_resource_location(mut self, location: &str) -> Self {
        let opened = self.settings.resources.open(location);
        self.replace_stream(opened);
        self
    }

    /// Uses a file as the source, relative to the scripts directory when one
    /// is set. Open failures behave as in [`set_resource_location`](Self::set_resource_location).
    pub fn set_location(mut self, path: impl AsRef<Path>) -> Self {
        let opened = open_file(self.settings.scripts_dir.as_deref(), path.as_ref());
        self.replace_stream(opened);
        self
    }

    pub fn set_init_function(mut self, name: impl Into<String>, args: Vec<ScriptValue>) -> Self {
        self.init = InitFunction::new(name, args);
        self
    }

    /// Drops the init function: the script evaluates its source when executed.
    pub fn clear_init_function(mut self) -> Self {
        self.init = InitFunction::none();
        self
    }

    pub fn init_function(&self) -> &InitFunction {
        &self.init
    }

    pub fn engine(&self) -> &dyn ScriptEngine {
        self.handle.engine()
    }

    pub fn engine_mut(&mut self) -> &mut dyn ScriptEngine {
        self.handle.engine.as_mut()
    }

    pub fn is_packed(&self) -> bool {
        self.identifier.is_some()
    }

    pub fn identifier(&self) -> Option<&Identifier> {
        self.identifier.as_ref()
    }

    /// Sets the cache identifier, turning this into a packed builder.
    pub fn set_identifier(mut self, id: impl Into<Identifier>) -> Self {
        self.identifier = Some(id.into());
        self
    }

    /// The script execution strategy `build` would choose now.
    pub fn planned_kind(&self) -> ScriptKind {
        ScriptKind::select(self.handle.engine(), &self.init)
    }

    /// Builds the script and, for packed builders, caches it.
    ///
    /// # Errors
    ///
    /// - [`ScriptError::Configuration`]: no source was set, or a packed
    ///   build would produce an eval-only script (nothing is cached)
    /// - [`ScriptError::Io`]: the source stream could not be read; the
    ///   manager's handler sees it first
    /// - [`ScriptError::Compile`] / [`ScriptError::Execution`]: the engine
    ///   rejected the source
    pub fn build(self) -> ScriptResult<Script> {
        let kind = self.planned_kind();
        let ScriptBuilder {
            handle,
            init,
            identifier,
            settings,
        } = self;
        let ScriptHandle {
            manager,
            engine,
            stream,
        } = handle;

        let mut stream = stream
            .ok_or_else(|| ScriptError::Configuration("no script source was set".to_string()))?;
        if let (Some(id), ScriptKind::EvalOnly) = (&identifier, kind) {
            return Err(ScriptError::Configuration(format!(
                "cannot pack {:?}: engine '{}' only supports eval-only scripts",
                id,
                engine.name()
            )));
        }

        let mut source = String::new();
        if let Err(err) = stream.read_to_string(&mut source) {
            settings.io_handler.handle(&err);
            return Err(err.into());
        }

        let script = Script::build(manager.clone(), engine, source, init, settings.pool)?;

        if let Some(id) = identifier {
            let manager = manager.upgrade().ok_or_else(|| {
                ScriptError::Configuration("script manager was dropped before build".to_string())
            })?;
            manager.insert(script.clone(), id);
        }
        Ok(script)
    }

    fn replace_stream(&mut self, opened: io::Result<crate::data::SourceStream>) {
        match opened {
            Ok(stream) => self.handle.stream = Some(stream),
            Err(err) => self.settings.io_handler.handle(&err),
        }
    }
}

impl fmt::Debug for ScriptBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptBuilder")
            .field("handle", &self.handle)
            .field("init", &self.init)
            .field("identifier", &self.identifier)
            .finish()
    }
}
