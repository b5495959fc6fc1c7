//! Object Proxies
//!
//! The metatable behind every [`Bound`] userdata. Member access on a proxy is
//! redirected to the class table:
//!
//! - reading a property calls its getter
//! - reading a method yields a callable thunk, cached per environment
//! - writing a property calls its setter
//! - anything else fails with `MissingMember`, never a silent `nil`
//!
//! Every proxy also answers `connect`, `destroy` and `isDestroyed` unless
//! the class declares members with those names.
//!
//! Each environment keeps a weak-valued cache of live proxies, so the same
//! native object always maps to the same script value. Pushing an object as
//! [`crate::Owned`] while a native-owned proxy for it is alive moves that
//! proxy to script ownership.
//!
//! Script functions connected to a script-owned proxy are stored in the
//! proxy's `luabind.slots` user value rather than the Lua registry. A slot
//! reaches its function through the weak cache, so a function that
//! captures the proxy does not keep it from being collected.

use std::any::TypeId;
use std::cmp::Ordering;
use std::rc::Rc;
use std::sync::Arc;

use mlua::{
    AnyUserData, Function, Lua, MetaMethod, MultiValue, Table, UserData, UserDataMethods, Value,
};
use tracing::trace;

use crate::class::{Class, Member, MethodFn, Operator};
use crate::convert::string_of;
use crate::error::{BindError, BindResult, MemberAccess};
use crate::ownership::{address_of, Bound, Ownership};
use crate::registry;
use crate::signal::{self, Callback};
use crate::stack::Stack;

const INSTANCE_CACHE: &str = "luabind.instances";
const THUNK_CACHE: &str = "luabind.thunks";
const SLOTS: &str = "luabind.slots";

/// Names every proxy understands on top of its class members
pub const BUILTIN_MEMBERS: [&str; 3] = ["connect", "destroy", "isDestroyed"];

fn cache_table(lua: &Lua, key: &str, weak_values: bool) -> BindResult<Table> {
    if let Value::Table(table) = lua.named_registry_value::<Value>(key)? {
        return Ok(table);
    }
    let table: Table = if weak_values {
        lua.load("return setmetatable({}, { __mode = 'v' })")
            .set_name("=luabind")
            .eval()?
    } else {
        lua.create_table()?
    };
    lua.set_named_registry_value(key, table.clone())?;
    Ok(table)
}

/// Push a native object as a proxy, reusing the live proxy when there is one
pub(crate) fn wrap<T: 'static>(lua: &Lua, object: Rc<T>, ownership: Ownership) -> BindResult<Value> {
    let class = registry::class::<T>().ok_or(BindError::Unregistered {
        type_name: std::any::type_name::<T>(),
    })?;

    let address = address_of(&object);
    let key = instance_key::<T>(address);
    let cache = cache_table(lua, INSTANCE_CACHE, true)?;

    if let Value::UserData(existing) = cache.raw_get::<Value>(key.as_str())? {
        let reused = match existing.borrow::<Bound<T>>() {
            Ok(bound) if !bound.is_destroyed() => {
                if ownership == Ownership::Script {
                    bound.adopt(object.clone());
                }
                true
            }
            _ => false,
        };
        if reused {
            return Ok(Value::UserData(existing));
        }
    }

    let userdata = lua.create_userdata(Bound::new(class, object, ownership))?;
    cache.raw_set(key, userdata.clone())?;
    trace!(address, ?ownership, "created proxy");
    Ok(Value::UserData(userdata))
}

fn instance_key<T: 'static>(address: usize) -> String {
    format!("{:?}@{:x}", TypeId::of::<T>(), address)
}

/// Keep `callback` in the slot table of `proxy`
fn stash_callback<T: 'static>(
    lua: &Lua,
    proxy: &AnyUserData,
    address: usize,
    callback: Function,
) -> BindResult<Callback> {
    let slots = match proxy.named_user_value::<Value>(SLOTS)? {
        Value::Table(slots) => slots,
        _ => {
            let slots = lua.create_table()?;
            proxy.set_named_user_value(SLOTS, slots.clone())?;
            slots
        }
    };
    // Removed entries become `false`, so the length only grows
    let slot = slots.raw_len() + 1;
    slots.raw_set(slot, callback)?;
    Ok(Callback::Stashed {
        key: instance_key::<T>(address),
        slot,
    })
}

fn slot_table(lua: &Lua, key: &str) -> Option<Table> {
    let cache = cache_table(lua, INSTANCE_CACHE, true).ok()?;
    match cache.raw_get::<Value>(key).ok()? {
        Value::UserData(proxy) => match proxy.named_user_value::<Value>(SLOTS).ok()? {
            Value::Table(slots) => Some(slots),
            _ => None,
        },
        _ => None,
    }
}

/// Function stashed under `slot` by the live proxy cached as `key`
pub(crate) fn stashed_callback(lua: &Lua, key: &str, slot: usize) -> Option<Function> {
    match slot_table(lua, key)?.raw_get::<Value>(slot).ok()? {
        Value::Function(function) => Some(function),
        _ => None,
    }
}

/// Drop the function stashed under `slot`; a collected proxy took it along
pub(crate) fn clear_stashed(lua: &Lua, key: &str, slot: usize) -> BindResult<()> {
    if let Some(slots) = slot_table(lua, key) {
        slots.raw_set(slot, false)?;
    }
    Ok(())
}

/// Publish `T`'s class as a global table.
///
/// When the class has a constructor, the table gets a `new` function that
/// accepts both `Class.new(...)` and `Class:new(...)` and returns a
/// script-owned instance.
pub fn expose<T: 'static>(lua: &Lua) -> BindResult<Table> {
    let class = registry::class::<T>().ok_or(BindError::Unregistered {
        type_name: std::any::type_name::<T>(),
    })?;

    let table = lua.create_table()?;
    table.raw_set("__class", class.name())?;

    if let Some(constructor) = class.constructor.clone() {
        let class_name = class.name().to_string();
        let new = lua.create_function(move |lua, args: MultiValue| {
            let frame = Stack::from(args);
            let first = if is_class_table(&frame.value(1), &class_name) {
                2
            } else {
                1
            };
            let object = constructor(lua, &frame, first)?;
            Ok(wrap(lua, Rc::new(object), Ownership::Script)?)
        })?;
        table.raw_set("new", new)?;
    }

    lua.globals().set(class.name(), table.clone())?;
    trace!(class = class.name(), "exposed class table");
    Ok(table)
}

fn is_class_table(value: &Value, class_name: &str) -> bool {
    match value {
        Value::Table(table) => matches!(
            table.raw_get::<Value>("__class"),
            Ok(Value::String(name)) if &*name.as_bytes() == class_name.as_bytes()
        ),
        _ => false,
    }
}

// ============================================================================
// Member access
// ============================================================================

fn key_name(key: &Value) -> String {
    string_of(key, "member name").unwrap_or_else(|_| format!("<{}>", key.type_name()))
}

fn bound_self<T: 'static>(frame: &Stack, function: &str) -> BindResult<Rc<T>> {
    match frame.get_value(1) {
        Some(Value::UserData(userdata)) => match userdata.borrow::<Bound<T>>() {
            Ok(bound) => bound.get(),
            Err(_) => Err(bad_self::<T>(function, "userdata")),
        },
        other => Err(bad_self::<T>(
            function,
            other.map(Value::type_name).unwrap_or("no value"),
        )),
    }
}

fn bad_self<T: 'static>(function: &str, actual: &str) -> BindError {
    let expected = registry::class::<T>()
        .map(|class| class.name().to_string())
        .unwrap_or_else(crate::convert::type_label::<T>);
    BindError::dispatch(
        function,
        0,
        format!("bad self (expected {}, got {}); use ':' to call methods", expected, actual),
    )
}

/// Fetch or create the cached thunk for `member` of `T`
fn thunk<T: 'static>(
    lua: &Lua,
    member: &str,
    create: impl FnOnce() -> BindResult<Function>,
) -> BindResult<Function> {
    let cache = cache_table(lua, THUNK_CACHE, false)?;
    let key = format!("{:?}.{}", TypeId::of::<T>(), member);
    if let Value::Function(function) = cache.raw_get::<Value>(key.as_str())? {
        return Ok(function);
    }
    let function = create()?;
    cache.raw_set(key, function.clone())?;
    Ok(function)
}

fn method_thunk<T: 'static>(lua: &Lua, name: &str, method: MethodFn<T>) -> BindResult<Function> {
    let function = name.to_string();
    thunk::<T>(lua, name, move || {
        Ok(lua.create_function(move |lua, args: MultiValue| {
            let frame = Stack::from(args);
            let object = bound_self::<T>(&frame, &function)?;
            trace!(method = %function, args = frame.len().saturating_sub(1), "native method call");
            let results = method(lua, &object, &frame)?;
            Ok(results.into_multi())
        })?)
    })
}

fn builtin_thunk<T: 'static>(lua: &Lua, name: &str) -> BindResult<Function> {
    thunk::<T>(lua, name, || {
        let function = match name {
            "destroy" => lua.create_function(|_, this: AnyUserData| {
                let bound = this.borrow::<Bound<T>>()?;
                bound.destroy();
                Ok(())
            })?,
            "isDestroyed" => lua.create_function(|_, this: AnyUserData| {
                let bound = this.borrow::<Bound<T>>()?;
                Ok(bound.is_destroyed())
            })?,
            _ => lua.create_function(
                |lua, (this, event, callback): (AnyUserData, String, Function)| {
                    let bound = this.borrow::<Bound<T>>()?;
                    let object = bound.get()?;
                    if !bound.class.has_signal(&event) {
                        return Err(BindError::missing_member(
                            bound.class_name(),
                            event,
                            MemberAccess::Read,
                        )
                        .into());
                    }
                    let callback = match bound.ownership() {
                        Ownership::Native => Callback::Rooted(callback),
                        Ownership::Script => {
                            stash_callback::<T>(lua, &this, bound.address(), callback)?
                        }
                    };
                    let connection = bound.class.connect(lua, &object, &event, callback)?;
                    bound.track(&connection);
                    Ok(signal::remover(lua, connection)?)
                },
            )?,
        };
        Ok(function)
    })
}

fn index<T: 'static>(lua: &Lua, this: &Bound<T>, key: &Value) -> BindResult<Value> {
    let name = key_name(key);
    let class = &this.class;

    match class.member(&name) {
        Some(Member::Property { getter, .. }) => {
            let object = this.get()?;
            getter(lua, &*object)
        }
        Some(Member::Method(method)) => {
            this.get()?;
            let resolved = class.resolve(&name).to_string();
            Ok(Value::Function(method_thunk(lua, &resolved, method.clone())?))
        }
        None if BUILTIN_MEMBERS.contains(&name.as_str()) => {
            Ok(Value::Function(builtin_thunk::<T>(lua, &name)?))
        }
        None if this.is_destroyed() => Err(BindError::destroyed(class.name())),
        None => Err(BindError::missing_member(class.name(), name, MemberAccess::Read)),
    }
}

fn new_index<T: 'static>(lua: &Lua, this: &Bound<T>, key: &Value, value: &Value) -> BindResult<()> {
    let name = key_name(key);
    let class = &this.class;

    match class.member(&name) {
        Some(Member::Property {
            setter: Some(setter),
            ..
        }) => {
            let object = this.get()?;
            setter(lua, &*object, value)
        }
        _ if this.is_destroyed() => Err(BindError::destroyed(class.name())),
        _ => Err(BindError::missing_member(class.name(), name, MemberAccess::Write)),
    }
}

// ============================================================================
// Metamethods
// ============================================================================

fn operand_class<T: 'static>(lhs: &Value, rhs: &Value) -> Option<Arc<Class<T>>> {
    [lhs, rhs].into_iter().find_map(|value| match value {
        Value::UserData(userdata) => userdata
            .borrow::<Bound<T>>()
            .ok()
            .map(|bound| bound.class.clone()),
        _ => None,
    })
}

fn binary<T: 'static>(lua: &Lua, op: Operator, lhs: &Value, rhs: &Value) -> BindResult<Value> {
    let class = operand_class::<T>(lhs, rhs).ok_or(BindError::Unregistered {
        type_name: std::any::type_name::<T>(),
    })?;
    match class.operators.get(&op) {
        Some(operator) => operator(lua, lhs, rhs),
        None => Err(BindError::Script(mlua::Error::runtime(format!(
            "{} does not support operator '{}'",
            class.name(),
            op
        )))),
    }
}

type LivePair<T> = (Rc<T>, Rc<T>, Arc<Class<T>>);

fn both_live<T: 'static>(lhs: &AnyUserData, rhs: &AnyUserData) -> BindResult<Option<LivePair<T>>> {
    let (Ok(left), Ok(right)) = (lhs.borrow::<Bound<T>>(), rhs.borrow::<Bound<T>>()) else {
        return Ok(None);
    };
    Ok(Some((left.get()?, right.get()?, left.class.clone())))
}

fn equals<T: 'static>(lhs: &AnyUserData, rhs: &AnyUserData) -> BindResult<bool> {
    let Some((left, right, class)) = both_live::<T>(lhs, rhs)? else {
        return Ok(false);
    };
    Ok(match &class.eq {
        Some(eq) => eq(&*left, &*right),
        None => Rc::ptr_eq(&left, &right),
    })
}

fn compare<T: 'static>(lhs: &Value, rhs: &Value) -> BindResult<Option<Ordering>> {
    let (Value::UserData(left), Value::UserData(right)) = (lhs, rhs) else {
        let class = operand_class::<T>(lhs, rhs);
        let name = class.as_ref().map(|class| class.name()).unwrap_or("object");
        let other = if matches!(lhs, Value::UserData(_)) { rhs } else { lhs };
        return Err(BindError::Script(mlua::Error::runtime(format!(
            "attempt to compare {} with {}",
            name,
            other.type_name()
        ))));
    };
    let Some((left, right, class)) = both_live::<T>(left, right)? else {
        return Err(BindError::Script(mlua::Error::runtime(
            "attempt to compare two different bound types",
        )));
    };
    match &class.cmp {
        Some(cmp) => Ok(cmp(&*left, &*right)),
        None => Err(BindError::Script(mlua::Error::runtime(format!(
            "{} does not support ordering",
            class.name()
        )))),
    }
}

fn meta_for(op: Operator) -> MetaMethod {
    match op {
        Operator::Add => MetaMethod::Add,
        Operator::Sub => MetaMethod::Sub,
        Operator::Mul => MetaMethod::Mul,
        Operator::Div => MetaMethod::Div,
        Operator::BitOr => MetaMethod::BOr,
        Operator::BitAnd => MetaMethod::BAnd,
        Operator::BitXor => MetaMethod::BXor,
    }
}

impl<T: 'static> UserData for Bound<T> {
    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        methods.add_meta_method(MetaMethod::Index, |lua, this, key: Value| {
            Ok(index(lua, this, &key)?)
        });

        methods.add_meta_method(MetaMethod::NewIndex, |lua, this, (key, value): (Value, Value)| {
            Ok(new_index(lua, this, &key, &value)?)
        });

        methods.add_meta_method(MetaMethod::ToString, |_, this, ()| Ok(this.to_string()));

        methods.add_meta_function(MetaMethod::Eq, |_, (lhs, rhs): (AnyUserData, AnyUserData)| {
            Ok(equals::<T>(&lhs, &rhs)?)
        });

        methods.add_meta_function(MetaMethod::Lt, |_, (lhs, rhs): (Value, Value)| {
            Ok(compare::<T>(&lhs, &rhs)? == Some(Ordering::Less))
        });

        methods.add_meta_function(MetaMethod::Le, |_, (lhs, rhs): (Value, Value)| {
            Ok(matches!(
                compare::<T>(&lhs, &rhs)?,
                Some(Ordering::Less | Ordering::Equal)
            ))
        });

        for op in Operator::ALL {
            methods.add_meta_function(meta_for(op), move |lua, (lhs, rhs): (Value, Value)| {
                Ok(binary::<T>(lua, op, &lhs, &rhs)?)
            });
        }
    }
}
