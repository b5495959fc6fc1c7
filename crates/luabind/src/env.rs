//! Host Environment
//!
//! [`Environment`] is what an embedding application holds: one Lua runtime
//! plus the binding state attached to it.
//!
//! ```ignore
//! let env = Environment::new()?;
//! env.set("answer", 42)?;
//! env.run_string("doubled = answer * 2")?;
//! assert_eq!(env.get::<i64>("doubled")?, 84);
//! ```

use std::cell::RefCell;
use std::fmt;
use std::path::Path;

use mlua::{Function, Lua, LuaOptions, MultiValue, Table, Value};
use tracing::{debug, trace};

use crate::config::EnvConfig;
use crate::dispatch::{self, PushArgs};
use crate::error::{BindError, BindResult};
use crate::loader;
use crate::proxy;
use crate::registry::{self, SubKind};
use crate::signal::ConnectionSet;
use crate::stack::{Index, Stack};

const STRING_CHUNK: &str = "=(string)";

/// An embedded Lua runtime with bindings attached
pub struct Environment {
    stack: RefCell<Stack>,
    connections: ConnectionSet,
    config: EnvConfig,
    lua: Lua,
}

impl Environment {
    /// Create an environment with the default configuration
    pub fn new() -> BindResult<Self> {
        Self::with_config(EnvConfig::default())
    }

    /// Create an environment with `config`
    pub fn with_config(config: EnvConfig) -> BindResult<Self> {
        let lua = Lua::new_with(config.libraries, LuaOptions::default())?;
        if let Some(limit) = config.memory_limit {
            lua.set_memory_limit(limit)?;
        }

        let connections = ConnectionSet::default();
        lua.set_app_data(connections.clone());

        debug!(libraries = ?config.libraries, memory_limit = ?config.memory_limit, "environment created");
        Ok(Self {
            stack: RefCell::new(Stack::new()),
            connections,
            config,
            lua,
        })
    }

    /// The underlying runtime
    pub fn lua(&self) -> &Lua {
        &self.lua
    }

    /// The configuration this environment was created with
    pub fn config(&self) -> &EnvConfig {
        &self.config
    }

    // ------------------------------------------------------------------------
    // Globals
    // ------------------------------------------------------------------------

    /// Set a global to a native value
    pub fn set<T: 'static>(&self, name: &str, value: T) -> BindResult<()> {
        let value = registry::push(&self.lua, &value)?;
        self.lua.globals().set(name, value)?;
        Ok(())
    }

    /// Read a global as a native value
    pub fn get<T: 'static>(&self, name: &str) -> BindResult<T> {
        registry::store(&self.lua, &self.global(name)?)
    }

    /// Read a global into a destination of a known sub-kind
    pub fn get_as<T: 'static>(&self, name: &str, kind: impl Into<SubKind>) -> BindResult<T> {
        registry::store_as(&self.lua, &self.global(name)?, kind)
    }

    /// Read a global as a raw value
    pub fn global(&self, name: &str) -> BindResult<Value> {
        Ok(self.lua.globals().get(name)?)
    }

    // ------------------------------------------------------------------------
    // Ad-hoc stack
    // ------------------------------------------------------------------------

    /// Push a native value onto the environment's stack
    pub fn push<T: 'static>(&self, value: T) -> BindResult<Index> {
        let value = registry::push(&self.lua, &value)?;
        Ok(self.stack.borrow_mut().push_value(value))
    }

    /// Push a raw value onto the environment's stack
    pub fn push_value(&self, value: Value) -> Index {
        self.stack.borrow_mut().push_value(value)
    }

    /// Read a value off the environment's stack as a native value
    pub fn get_at<T: 'static>(&self, index: impl Into<Index>) -> BindResult<T> {
        let value = self.stack.borrow().value(index);
        registry::store(&self.lua, &value)
    }

    /// Read a raw value off the environment's stack
    pub fn value_at(&self, index: impl Into<Index>) -> Value {
        self.stack.borrow().value(index)
    }

    /// Number of values on the environment's stack
    pub fn stack_len(&self) -> usize {
        self.stack.borrow().len()
    }

    /// Drop every value from the environment's stack
    pub fn clear_stack(&self) {
        self.stack.borrow_mut().clear();
    }

    // ------------------------------------------------------------------------
    // Running scripts
    // ------------------------------------------------------------------------

    /// Compile a string without running it
    pub fn load_string(&self, source: &str) -> BindResult<Function> {
        Ok(self.lua.load(source).set_name(STRING_CHUNK).into_function()?)
    }

    /// Compile a file without running it
    pub fn load_file(&self, path: impl AsRef<Path>) -> BindResult<Function> {
        let path = path.as_ref();
        let source = loader::read_script(path)?;
        let name = loader::chunk_name(&self.config.chunk_prefix, path);
        Ok(self.lua.load(source.as_str()).set_name(name).into_function()?)
    }

    /// Run a string
    pub fn run_string(&self, source: &str) -> BindResult<()> {
        trace!(bytes = source.len(), "running string");
        self.load_string(source)?.call::<()>(())?;
        Ok(())
    }

    /// Run a string and convert the first value it returns.
    ///
    /// Fails with [`BindError::NoReturnValue`] when the chunk returns nothing.
    pub fn run_string_with<R: 'static>(&self, source: &str) -> BindResult<R> {
        let function = self.load_string(source)?;
        self.first_result(&function, STRING_CHUNK)
    }

    /// Run a file
    pub fn run_file(&self, path: impl AsRef<Path>) -> BindResult<()> {
        let path = path.as_ref();
        debug!(path = %path.display(), "running file");
        self.load_file(path)?.call::<()>(())?;
        Ok(())
    }

    /// Run a file and convert the first value it returns
    pub fn run_file_with<R: 'static>(&self, path: impl AsRef<Path>) -> BindResult<R> {
        let path = path.as_ref();
        let function = self.load_file(path)?;
        self.first_result(&function, &path.display().to_string())
    }

    /// Run every script in `dir` in sorted path order, returning how many ran.
    ///
    /// Only files with the configured extension run: `lua` by default, see
    /// [`EnvConfig::script_extension`]. Subdirectories are visited when
    /// `recurse` is set, following symbolic links but never around a loop.
    /// The first failing script stops the run.
    pub fn run_dir(&self, dir: impl AsRef<Path>, recurse: bool) -> BindResult<usize> {
        let dir = dir.as_ref();
        let scripts =
            loader::collect_scripts(dir, self.config.script_extension.as_deref(), recurse)?;
        for script in &scripts {
            self.run_file(script)?;
        }
        debug!(dir = %dir.display(), count = scripts.len(), recurse, "ran directory");
        Ok(scripts.len())
    }

    fn first_result<R: 'static>(&self, function: &Function, chunk: &str) -> BindResult<R> {
        let results: MultiValue = function.call(())?;
        let results = Stack::from(results);
        if results.is_empty() {
            return Err(BindError::NoReturnValue {
                chunk: chunk.to_string(),
            });
        }
        registry::store(&self.lua, &results.value(1))
    }

    // ------------------------------------------------------------------------
    // Calls
    // ------------------------------------------------------------------------

    /// Call the global function `name` with native arguments
    pub fn call<A: PushArgs>(&self, name: &str, args: A) -> BindResult<Stack> {
        let function = self.function(name)?;
        dispatch::call(&self.lua, &function, args)
    }

    /// Call the global function `name` and convert its first result
    pub fn call_with<R: 'static, A: PushArgs>(&self, name: &str, args: A) -> BindResult<R> {
        let function = self.function(name)?;
        dispatch::call_with(&self.lua, &function, args)
    }

    fn function(&self, name: &str) -> BindResult<Function> {
        match self.global(name)? {
            Value::Function(function) => Ok(function),
            other => Err(BindError::conversion_with(
                "function",
                other.type_name(),
                format!("global '{}'", name),
            )),
        }
    }

    // ------------------------------------------------------------------------
    // Bindings
    // ------------------------------------------------------------------------

    /// Publish `T`'s class table as a global
    pub fn expose<T: 'static>(&self) -> BindResult<Table> {
        proxy::expose::<T>(&self.lua)
    }

    /// Make `require(module)` return the table built by `loader`
    pub fn preload<F>(&self, module: &str, loader: F) -> BindResult<()>
    where
        F: Fn(&Lua) -> BindResult<Table> + 'static,
    {
        let package = match self.global("package")? {
            Value::Table(package) => package,
            _ => {
                return Err(BindError::setup(format!(
                    "cannot preload '{}': the package library is not open",
                    module
                )))
            }
        };
        let preload: Table = package.get("preload")?;
        let open = self
            .lua
            .create_function(move |lua, _: MultiValue| Ok(loader(lua)?))?;
        preload.set(module, open)?;
        debug!(module, "preloaded module");
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Run a full collection cycle, finalizing unreachable proxies
    pub fn collect_garbage(&self) -> BindResult<()> {
        // The second cycle picks up objects released by the first round of
        // finalizers.
        self.lua.gc_collect()?;
        self.lua.gc_collect()?;
        Ok(())
    }

    /// Bytes currently allocated by the runtime
    pub fn used_memory(&self) -> usize {
        self.lua.used_memory()
    }

    /// Number of live signal connections made from script
    pub fn connection_count(&self) -> usize {
        self.connections.live_count()
    }

    /// Remove every live signal connection, returning how many were removed
    pub fn disconnect_all(&self) -> usize {
        self.connections.disconnect_all()
    }
}

impl Drop for Environment {
    fn drop(&mut self) {
        self.stack.get_mut().clear();
        let removed = self.connections.disconnect_all();
        debug!(removed, "environment closed");
    }
}

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Environment")
            .field("config", &self.config)
            .field("stack", &*self.stack.borrow())
            .field("connections", &self.connections.live_count())
            .finish()
    }
}
