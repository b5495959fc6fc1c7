//! Conversion Registry
//!
//! Process-wide table of push (native → Lua) and store (Lua → native)
//! handlers, keyed by native [`TypeId`] and optionally refined by a runtime
//! [`SubKind`].
//!
//! ## Lookup rules
//!
//! - A later registration for the same key replaces the earlier one.
//! - Pushing a value whose type has a `kind_of` classifier routes through the
//!   sub-kind handler when one is registered, and through the base handler
//!   otherwise.
//! - [`store_as`] stores into a destination of a known sub-kind the same way.
//!
//! Handlers are cloned out of the registry before they run, so a handler may
//! itself push or store other types.
//!
//! The registry also keeps the class tables declared through
//! [`crate::class::ClassBuilder`].

use std::any::{type_name, Any, TypeId};
use std::fmt;
use std::sync::Arc;

use mlua::{Lua, Value};
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tracing::debug;

use crate::class::Class;
use crate::convert;
use crate::error::{BindError, BindResult};

/// Runtime refinement of a native type, such as a variant's dynamic kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubKind(pub u32);

impl fmt::Display for SubKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "kind {}", self.0)
    }
}

type ErasedPush = Arc<dyn Fn(&Lua, &dyn Any) -> BindResult<Value> + Send + Sync>;
type ErasedStore = Arc<dyn Fn(&Lua, &Value) -> BindResult<Box<dyn Any>> + Send + Sync>;
type ErasedKindOf = Arc<dyn Fn(&dyn Any) -> Option<SubKind> + Send + Sync>;

#[derive(Clone, Default)]
struct Handlers {
    push: Option<ErasedPush>,
    store: Option<ErasedStore>,
}

struct TypeEntry {
    type_name: &'static str,
    base: Handlers,
    kinds: FxHashMap<SubKind, Handlers>,
    kind_of: Option<ErasedKindOf>,
}

impl TypeEntry {
    fn new(type_name: &'static str) -> Self {
        Self {
            type_name,
            base: Handlers::default(),
            kinds: FxHashMap::default(),
            kind_of: None,
        }
    }
}

fn erase_push<T, F>(push: F) -> ErasedPush
where
    T: 'static,
    F: Fn(&Lua, &T) -> BindResult<Value> + Send + Sync + 'static,
{
    Arc::new(move |lua: &Lua, value: &dyn Any| match value.downcast_ref::<T>() {
        Some(value) => push(lua, value),
        None => Err(BindError::Unregistered {
            type_name: type_name::<T>(),
        }),
    })
}

fn erase_store<T, F>(store: F) -> ErasedStore
where
    T: 'static,
    F: Fn(&Lua, &Value) -> BindResult<T> + Send + Sync + 'static,
{
    Arc::new(move |lua: &Lua, value: &Value| {
        store(lua, value).map(|value| Box::new(value) as Box<dyn Any>)
    })
}

fn unbox<T: 'static>(value: Box<dyn Any>) -> BindResult<T> {
    value
        .downcast::<T>()
        .map(|value| *value)
        .map_err(|_| BindError::Unregistered {
            type_name: type_name::<T>(),
        })
}

/// Conversion handlers and class tables
pub struct Registry {
    entries: FxHashMap<TypeId, TypeEntry>,
    classes: FxHashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl Registry {
    /// Create an empty registry with no handlers at all
    pub fn empty() -> Self {
        Self {
            entries: FxHashMap::default(),
            classes: FxHashMap::default(),
        }
    }

    /// Create a registry holding the builtin handlers
    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        convert::install_builtins(&mut registry);
        registry
    }

    fn entry<T: 'static>(&mut self) -> &mut TypeEntry {
        self.entries
            .entry(TypeId::of::<T>())
            .or_insert_with(|| TypeEntry::new(type_name::<T>()))
    }

    /// Install both handlers for `T`, replacing any previous ones
    pub fn register<T, P, S>(&mut self, push: P, store: S)
    where
        T: 'static,
        P: Fn(&Lua, &T) -> BindResult<Value> + Send + Sync + 'static,
        S: Fn(&Lua, &Value) -> BindResult<T> + Send + Sync + 'static,
    {
        let entry = self.entry::<T>();
        let replaced = entry.base.push.is_some() || entry.base.store.is_some();
        entry.base = Handlers {
            push: Some(erase_push(push)),
            store: Some(erase_store(store)),
        };
        debug!(type_name = entry.type_name, replaced, "registered conversion");
    }

    /// Install only the push handler for `T`
    pub fn register_push<T, P>(&mut self, push: P)
    where
        T: 'static,
        P: Fn(&Lua, &T) -> BindResult<Value> + Send + Sync + 'static,
    {
        let entry = self.entry::<T>();
        entry.base.push = Some(erase_push(push));
        debug!(type_name = entry.type_name, "registered push handler");
    }

    /// Install only the store handler for `T`
    pub fn register_store<T, S>(&mut self, store: S)
    where
        T: 'static,
        S: Fn(&Lua, &Value) -> BindResult<T> + Send + Sync + 'static,
    {
        let entry = self.entry::<T>();
        entry.base.store = Some(erase_store(store));
        debug!(type_name = entry.type_name, "registered store handler");
    }

    /// Install handlers for one sub-kind of `T`
    pub fn register_kind<T, P, S>(&mut self, kind: SubKind, push: P, store: S)
    where
        T: 'static,
        P: Fn(&Lua, &T) -> BindResult<Value> + Send + Sync + 'static,
        S: Fn(&Lua, &Value) -> BindResult<T> + Send + Sync + 'static,
    {
        let entry = self.entry::<T>();
        let replaced = entry.kinds.contains_key(&kind);
        entry.kinds.insert(
            kind,
            Handlers {
                push: Some(erase_push(push)),
                store: Some(erase_store(store)),
            },
        );
        debug!(type_name = entry.type_name, %kind, replaced, "registered sub-kind conversion");
    }

    /// Remove the handlers of one sub-kind of `T`
    pub fn unregister_kind<T: 'static>(&mut self, kind: SubKind) -> bool {
        self.entries
            .get_mut(&TypeId::of::<T>())
            .map(|entry| entry.kinds.remove(&kind).is_some())
            .unwrap_or(false)
    }

    /// Tell the registry how to read the runtime sub-kind of a `T`
    pub fn set_kind_of<T, K>(&mut self, kind_of: K)
    where
        T: 'static,
        K: Fn(&T) -> Option<SubKind> + Send + Sync + 'static,
    {
        self.entry::<T>().kind_of = Some(Arc::new(move |value: &dyn Any| {
            value.downcast_ref::<T>().and_then(|value| kind_of(value))
        }));
    }

    /// True when a push or store handler exists for `T`
    pub fn is_registered<T: 'static>(&self) -> bool {
        self.entries
            .get(&TypeId::of::<T>())
            .map(|entry| entry.base.push.is_some() || entry.base.store.is_some())
            .unwrap_or(false)
    }

    fn push_handler<T: 'static>(&self, value: &T) -> BindResult<ErasedPush> {
        let unregistered = || BindError::Unregistered {
            type_name: type_name::<T>(),
        };
        let entry = self.entries.get(&TypeId::of::<T>()).ok_or_else(unregistered)?;

        if let Some(kind) = entry.kind_of.as_ref().and_then(|kind_of| kind_of(value)) {
            if let Some(push) = entry.kinds.get(&kind).and_then(|h| h.push.clone()) {
                return Ok(push);
            }
        }
        entry.base.push.clone().ok_or_else(unregistered)
    }

    fn store_handler<T: 'static>(&self, kind: Option<SubKind>) -> BindResult<ErasedStore> {
        let unregistered = || BindError::Unregistered {
            type_name: type_name::<T>(),
        };
        let entry = self.entries.get(&TypeId::of::<T>()).ok_or_else(unregistered)?;

        if let Some(kind) = kind {
            if let Some(store) = entry.kinds.get(&kind).and_then(|h| h.store.clone()) {
                return Ok(store);
            }
        }
        entry.base.store.clone().ok_or_else(unregistered)
    }

    /// Convert a native value with this registry's handlers
    pub fn push<T: 'static>(&self, lua: &Lua, value: &T) -> BindResult<Value> {
        let push = self.push_handler(value)?;
        push(lua, value)
    }

    /// Convert a Lua value with this registry's handlers
    pub fn store<T: 'static>(&self, lua: &Lua, value: &Value) -> BindResult<T> {
        let store = self.store_handler::<T>(None)?;
        unbox(store(lua, value)?)
    }

    pub(crate) fn insert_class<T: 'static>(&mut self, class: Arc<Class<T>>) {
        self.classes.insert(TypeId::of::<T>(), class);
    }

    pub(crate) fn class<T: 'static>(&self) -> Option<Arc<Class<T>>> {
        let class = self.classes.get(&TypeId::of::<T>())?.clone();
        class.downcast::<Class<T>>().ok()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.entries.values().map(|entry| entry.type_name).collect();
        names.sort_unstable();
        f.debug_struct("Registry")
            .field("types", &names)
            .field("classes", &self.classes.len())
            .finish()
    }
}

// ============================================================================
// Process-wide registry
// ============================================================================

static GLOBAL: Lazy<RwLock<Registry>> = Lazy::new(|| RwLock::new(Registry::with_builtins()));

/// Install both handlers for `T` in the process-wide registry
pub fn register<T, P, S>(push: P, store: S)
where
    T: 'static,
    P: Fn(&Lua, &T) -> BindResult<Value> + Send + Sync + 'static,
    S: Fn(&Lua, &Value) -> BindResult<T> + Send + Sync + 'static,
{
    GLOBAL.write().register(push, store);
}

/// Install only the push handler for `T`
pub fn register_push<T, P>(push: P)
where
    T: 'static,
    P: Fn(&Lua, &T) -> BindResult<Value> + Send + Sync + 'static,
{
    GLOBAL.write().register_push(push);
}

/// Install only the store handler for `T`
pub fn register_store<T, S>(store: S)
where
    T: 'static,
    S: Fn(&Lua, &Value) -> BindResult<T> + Send + Sync + 'static,
{
    GLOBAL.write().register_store(store);
}

/// Install handlers for one sub-kind of `T`
pub fn register_kind<T, P, S>(kind: impl Into<SubKind>, push: P, store: S)
where
    T: 'static,
    P: Fn(&Lua, &T) -> BindResult<Value> + Send + Sync + 'static,
    S: Fn(&Lua, &Value) -> BindResult<T> + Send + Sync + 'static,
{
    GLOBAL.write().register_kind(kind.into(), push, store);
}

/// Remove the handlers of one sub-kind of `T`
pub fn unregister_kind<T: 'static>(kind: impl Into<SubKind>) -> bool {
    GLOBAL.write().unregister_kind::<T>(kind.into())
}

/// Tell the registry how to read the runtime sub-kind of a `T`
pub fn set_kind_of<T, K>(kind_of: K)
where
    T: 'static,
    K: Fn(&T) -> Option<SubKind> + Send + Sync + 'static,
{
    GLOBAL.write().set_kind_of(kind_of);
}

/// True when the process-wide registry can convert `T`
pub fn is_registered<T: 'static>() -> bool {
    GLOBAL.read().is_registered::<T>()
}

/// Convert a native value to a Lua value
pub fn push<T: 'static>(lua: &Lua, value: &T) -> BindResult<Value> {
    let push = GLOBAL.read().push_handler(value)?;
    push(lua, value)
}

/// Convert a Lua value to a native value
pub fn store<T: 'static>(lua: &Lua, value: &Value) -> BindResult<T> {
    let store = GLOBAL.read().store_handler::<T>(None)?;
    unbox(store(lua, value)?)
}

/// Convert a Lua value into a destination of a known sub-kind
pub fn store_as<T: 'static>(lua: &Lua, value: &Value, kind: impl Into<SubKind>) -> BindResult<T> {
    let store = GLOBAL.read().store_handler::<T>(Some(kind.into()))?;
    unbox(store(lua, value)?)
}

/// Run `f` with write access to the process-wide registry
pub fn with_registry<R>(f: impl FnOnce(&mut Registry) -> R) -> R {
    f(&mut GLOBAL.write())
}

pub(crate) fn insert_class<T: 'static>(class: Arc<Class<T>>) {
    GLOBAL.write().insert_class(class);
}

pub(crate) fn class<T: 'static>() -> Option<Arc<Class<T>>> {
    GLOBAL.read().class::<T>()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    enum Tagged {
        Small(i64),
        Pair(i64, i64),
    }

    const PAIR: SubKind = SubKind(2);

    fn tagged_registry() -> Registry {
        let mut registry = Registry::with_builtins();
        registry.register::<Tagged, _, _>(
            |_, value| match value {
                Tagged::Small(n) => Ok(Value::Integer(*n)),
                Tagged::Pair(a, b) => Ok(Value::Integer(a + b)),
            },
            |_, value| match value {
                Value::Integer(n) => Ok(Tagged::Small(*n)),
                other => Err(BindError::conversion("integer", other.type_name())),
            },
        );
        registry.set_kind_of::<Tagged, _>(|value| match value {
            Tagged::Pair(..) => Some(PAIR),
            Tagged::Small(_) => None,
        });
        registry
    }

    #[test]
    fn test_builtin_round_trip() {
        let lua = Lua::new();
        let registry = Registry::with_builtins();

        let value = registry.push(&lua, &42i32).unwrap();
        assert_eq!(registry.store::<i32>(&lua, &value).unwrap(), 42);

        let value = registry.push(&lua, &"notime".to_string()).unwrap();
        assert_eq!(registry.store::<String>(&lua, &value).unwrap(), "notime");
    }

    #[test]
    fn test_unregistered_type() {
        struct Opaque;
        let lua = Lua::new();
        let registry = Registry::empty();

        let err = registry.push(&lua, &Opaque).unwrap_err();
        assert!(matches!(err, BindError::Unregistered { .. }));
        assert!(!registry.is_registered::<Opaque>());
    }

    #[test]
    fn test_last_registration_wins() {
        let lua = Lua::new();
        let mut registry = Registry::with_builtins();

        registry.register::<i32, _, _>(
            |_, value| Ok(Value::Integer(i64::from(*value) * 10)),
            |_, _| Ok(-1),
        );

        let value = registry.push(&lua, &4i32).unwrap();
        assert!(matches!(value, Value::Integer(40)));
        assert_eq!(registry.store::<i32>(&lua, &value).unwrap(), -1);
    }

    #[test]
    fn test_sub_kind_routing() {
        let lua = Lua::new();
        let mut registry = tagged_registry();

        let value = registry.push(&lua, &Tagged::Pair(2, 3)).unwrap();
        assert!(matches!(value, Value::Integer(5)));

        registry.register_kind::<Tagged, _, _>(
            PAIR,
            |lua, value| match value {
                Tagged::Pair(a, b) => {
                    let table = lua.create_table()?;
                    table.raw_set(1, *a)?;
                    table.raw_set(2, *b)?;
                    Ok(Value::Table(table))
                }
                Tagged::Small(n) => Ok(Value::Integer(*n)),
            },
            |lua, value| {
                let table = match value {
                    Value::Table(table) => table.clone(),
                    other => return Err(BindError::conversion("pair", other.type_name())),
                };
                Ok(Tagged::Pair(
                    convert::table_get(lua, &table, 1)?,
                    convert::table_get(lua, &table, 2)?,
                ))
            },
        );

        // Values without the tag still use the base handler
        let small = registry.push(&lua, &Tagged::Small(7)).unwrap();
        assert!(matches!(small, Value::Integer(7)));

        let pair = registry.push(&lua, &Tagged::Pair(2, 3)).unwrap();
        assert!(matches!(pair, Value::Table(_)));

        let store = registry.store_handler::<Tagged>(Some(PAIR)).unwrap();
        let stored = unbox::<Tagged>(store(&lua, &pair).unwrap()).unwrap();
        assert_eq!(stored, Tagged::Pair(2, 3));

        assert!(registry.unregister_kind::<Tagged>(PAIR));
        let pair = registry.push(&lua, &Tagged::Pair(2, 3)).unwrap();
        assert!(matches!(pair, Value::Integer(5)));
    }
}
