//! # luabind
//!
//! Binding layer exposing native Rust objects, functions, enumerations and
//! callbacks to an embedded Lua runtime.
//!
//! ## Overview
//!
//! The crate keeps the native library's own names and object model. A
//! bound object looks like a table from script: properties read and write
//! through native getters and setters, methods call native functions, and
//! native signals call script functions back.
//!
//! - Conversions between native and script values live in a process-wide
//!   registry, keyed by native type and optionally refined by a runtime
//!   sub-kind.
//! - Objects cross the boundary either script-owned (released when collected
//!   or destroyed) or native-owned (the script holds a weak handle).
//! - Teardown is idempotent. Using an object after it is gone is an error,
//!   never a dangling access.
//!
//! ## Example
//!
//! ```ignore
//! use luabind::{ClassBuilder, Environment};
//!
//! ClassBuilder::<Counter>::new("Counter")
//!     .property("value", Counter::value, Counter::set_value)
//!     .method("bump", |c: &Counter, (by,): (i64,)| c.bump(by))
//!     .signal("changed", |c: &Counter| &c.changed)
//!     .constructor(|(): ()| Counter::default())
//!     .register()?;
//!
//! let env = Environment::new()?;
//! env.expose::<Counter>()?;
//! env.run_string("local c = Counter.new(); c:bump(2); print(c.value)")?;
//! ```
//!
//! ## Module Structure
//!
//! - [`registry`], [`convert`]: push/store handlers
//! - [`stack`]: positional value frames
//! - [`class`], [`proxy`]: class tables and the proxy metatable
//! - [`ownership`]: script-owned and native-owned instances
//! - [`signal`]: native signals and script connections
//! - [`dispatch`]: calls in both directions
//! - [`env`], [`config`]: the host embedding interface

pub mod class;
pub mod config;
pub mod convert;
pub mod dispatch;
pub mod env;
pub mod error;
mod loader;
pub mod ownership;
pub mod proxy;
pub mod registry;
pub mod signal;
pub mod stack;

pub use class::{Class, ClassBuilder, Operator};
pub use config::EnvConfig;
pub use convert::{register_enum, register_list, register_option, table_get, table_set, Enumeration};
pub use dispatch::{bind_function, bind_try_function, call, call_with, FromArgs, Invocation, PushArgs};
pub use env::Environment;
pub use error::{BindError, BindResult, MemberAccess};
pub use ownership::{Bound, Owned, Ownership, Teardown};
pub use proxy::expose;
pub use registry::{Registry, SubKind};
pub use signal::{Connection, Signal, SlotId};
pub use stack::{Index, Stack};

pub use mlua;
