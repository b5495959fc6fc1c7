//! Class Tables
//!
//! A [`Class`] describes how one native type looks from script: its methods,
//! properties, aliases, signals, operators and lifecycle hooks. Classes are
//! declared once with a [`ClassBuilder`], registered in the process-wide
//! registry and shared read-only by every instance afterwards.
//!
//! ```ignore
//! ClassBuilder::<Point>::new("Point")
//!     .property("x", Point::x, Point::set_x)
//!     .method("shift", |p: &Point, (dx,): (i32,)| p.shift(dx))
//!     .signal("xChanged", |p: &Point| &p.x_changed)
//!     .constructor(|(x, y): (i32, i32)| Point::new(x, y))
//!     .register()?;
//! ```
//!
//! Methods receive `&T`. Bound types keep their mutable state behind
//! `Cell`/`RefCell`, since script code may re-enter an object while one of
//! its methods is running.

use std::cmp::Ordering;
use std::fmt;
use std::marker::PhantomData;
use std::rc::Rc;
use std::sync::Arc;

use indexmap::IndexMap;
use mlua::{Lua, Value};
use rustc_hash::FxHashMap;
use smol_str::SmolStr;
use tracing::debug;

use crate::dispatch::{self, FromArgs, PushArgs};
use crate::error::{BindError, BindResult, MemberAccess};
use crate::ownership::{Bound, Owned, Ownership};
use crate::proxy;
use crate::registry::{self, Registry};
use crate::signal::{self, Callback, Connection, Signal};
use crate::stack::Stack;

pub(crate) type MethodFn<T> =
    Arc<dyn Fn(&Lua, &Rc<T>, &Stack) -> BindResult<Stack> + Send + Sync>;
pub(crate) type GetterFn<T> = Arc<dyn Fn(&Lua, &T) -> BindResult<Value> + Send + Sync>;
pub(crate) type SetterFn<T> = Arc<dyn Fn(&Lua, &T, &Value) -> BindResult<()> + Send + Sync>;
pub(crate) type ConnectFn<T> =
    Arc<dyn Fn(&Lua, &Rc<T>, Callback) -> BindResult<Rc<Connection>> + Send + Sync>;
pub(crate) type ConstructorFn<T> = Arc<dyn Fn(&Lua, &Stack, usize) -> BindResult<T> + Send + Sync>;
pub(crate) type OperatorFn = Arc<dyn Fn(&Lua, &Value, &Value) -> BindResult<Value> + Send + Sync>;
pub(crate) type EqFn<T> = Arc<dyn Fn(&T, &T) -> bool + Send + Sync>;
pub(crate) type CmpFn<T> = Arc<dyn Fn(&T, &T) -> Option<Ordering> + Send + Sync>;
pub(crate) type FreeFn<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// One named member of a class
pub(crate) enum Member<T> {
    /// Callable member; the thunk receives the whole frame, `self` first
    Method(MethodFn<T>),
    /// Field-like member; no setter means read-only
    Property {
        getter: GetterFn<T>,
        setter: Option<SetterFn<T>>,
    },
}

impl<T> Clone for Member<T> {
    fn clone(&self) -> Self {
        match self {
            Member::Method(method) => Member::Method(method.clone()),
            Member::Property { getter, setter } => Member::Property {
                getter: getter.clone(),
                setter: setter.clone(),
            },
        }
    }
}

/// Binary operators a class may overload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    Div,
    /// `|`
    BitOr,
    /// `&`
    BitAnd,
    /// binary `~`
    BitXor,
}

impl Operator {
    /// Every overloadable operator
    pub const ALL: [Operator; 7] = [
        Operator::Add,
        Operator::Sub,
        Operator::Mul,
        Operator::Div,
        Operator::BitOr,
        Operator::BitAnd,
        Operator::BitXor,
    ];

    /// Script-side symbol
    pub fn symbol(self) -> &'static str {
        match self {
            Operator::Add => "+",
            Operator::Sub => "-",
            Operator::Mul => "*",
            Operator::Div => "/",
            Operator::BitOr => "|",
            Operator::BitAnd => "&",
            Operator::BitXor => "~",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Script-facing description of a native type
pub struct Class<T> {
    name: SmolStr,
    pub(crate) members: IndexMap<SmolStr, Member<T>>,
    pub(crate) aliases: FxHashMap<SmolStr, SmolStr>,
    pub(crate) signals: IndexMap<SmolStr, ConnectFn<T>>,
    pub(crate) constructor: Option<ConstructorFn<T>>,
    pub(crate) operators: FxHashMap<Operator, OperatorFn>,
    pub(crate) eq: Option<EqFn<T>>,
    pub(crate) cmp: Option<CmpFn<T>>,
    pub(crate) free_hook: Option<FreeFn<T>>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: 'static> Class<T> {
    /// Script-facing class name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Resolve an alias to the member it stands for
    pub fn resolve<'a>(&'a self, name: &'a str) -> &'a str {
        match self.aliases.get(name) {
            Some(target) => target.as_str(),
            None => name,
        }
    }

    /// True when `name` (or an alias of it) is a member
    pub fn has_member(&self, name: &str) -> bool {
        self.members.contains_key(self.resolve(name))
    }

    /// Member names in declaration order
    pub fn member_names(&self) -> impl Iterator<Item = &str> {
        self.members.keys().map(SmolStr::as_str)
    }

    /// Signal names in declaration order
    pub fn signal_names(&self) -> impl Iterator<Item = &str> {
        self.signals.keys().map(SmolStr::as_str)
    }

    pub fn has_signal(&self, name: &str) -> bool {
        self.signals.contains_key(name)
    }

    /// True when a constructor was declared
    pub fn has_constructor(&self) -> bool {
        self.constructor.is_some()
    }

    pub(crate) fn member(&self, name: &str) -> Option<&Member<T>> {
        self.members.get(self.resolve(name))
    }

    /// Subscribe a script function to the signal `name` of `object`
    pub(crate) fn connect(
        &self,
        lua: &Lua,
        object: &Rc<T>,
        name: &str,
        callback: Callback,
    ) -> BindResult<Rc<Connection>> {
        let connect = self
            .signals
            .get(name)
            .ok_or_else(|| BindError::missing_member(self.name.as_str(), name, MemberAccess::Read))?;
        connect(lua, object, callback)
    }
}

impl<T> fmt::Debug for Class<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Class")
            .field("name", &self.name)
            .field("members", &self.members.keys().collect::<Vec<_>>())
            .field("signals", &self.signals.keys().collect::<Vec<_>>())
            .field("constructor", &self.constructor.is_some())
            .finish()
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Declares a [`Class`]
pub struct ClassBuilder<T> {
    class: Class<T>,
    problems: Vec<String>,
    install_value: Option<fn(&mut Registry)>,
}

impl<T: 'static> ClassBuilder<T> {
    /// Start declaring a class with the given script-facing name
    pub fn new(name: impl Into<SmolStr>) -> Self {
        Self {
            class: Class {
                name: name.into(),
                members: IndexMap::new(),
                aliases: FxHashMap::default(),
                signals: IndexMap::new(),
                constructor: None,
                operators: FxHashMap::default(),
                eq: None,
                cmp: None,
                free_hook: None,
                _marker: PhantomData,
            },
            problems: Vec::new(),
            install_value: None,
        }
    }

    fn insert(mut self, name: &str, member: Member<T>) -> Self {
        let name = SmolStr::new(name);
        if self.class.members.insert(name.clone(), member).is_some() {
            self.problems
                .push(format!("member '{}' declared twice on {}", name, self.class.name));
        }
        self
    }

    /// Declare a method.
    ///
    /// The arguments arrive as a tuple; the result is pushed as a single
    /// value, or nothing for `()`.
    pub fn method<A, R, F>(self, name: &str, f: F) -> Self
    where
        A: FromArgs + 'static,
        R: 'static,
        F: Fn(&T, A) -> R + Send + Sync + 'static,
    {
        let function = SmolStr::new(name);
        let thunk: MethodFn<T> = Arc::new(move |lua: &Lua, object: &Rc<T>, frame: &Stack| {
            let args = dispatch::store_args::<A>(lua, &function, frame, 2)?;
            let mut results = Stack::new();
            dispatch::push_return(lua, &f(&**object, args), &mut results)?;
            Ok(results)
        });
        self.insert(name, Member::Method(thunk))
    }

    /// Declare a method whose failures surface as script errors
    pub fn try_method<A, R, F>(self, name: &str, f: F) -> Self
    where
        A: FromArgs + 'static,
        R: 'static,
        F: Fn(&T, A) -> BindResult<R> + Send + Sync + 'static,
    {
        let function = SmolStr::new(name);
        let thunk: MethodFn<T> = Arc::new(move |lua: &Lua, object: &Rc<T>, frame: &Stack| {
            let args = dispatch::store_args::<A>(lua, &function, frame, 2)?;
            let mut results = Stack::new();
            dispatch::push_return(lua, &f(&**object, args)?, &mut results)?;
            Ok(results)
        });
        self.insert(name, Member::Method(thunk))
    }

    /// Declare a method returning several values
    pub fn method_multi<A, R, F>(self, name: &str, f: F) -> Self
    where
        A: FromArgs + 'static,
        R: PushArgs + 'static,
        F: Fn(&T, A) -> R + Send + Sync + 'static,
    {
        let function = SmolStr::new(name);
        let thunk: MethodFn<T> = Arc::new(move |lua: &Lua, object: &Rc<T>, frame: &Stack| {
            let args = dispatch::store_args::<A>(lua, &function, frame, 2)?;
            let mut results = Stack::new();
            f(&**object, args).push_args(lua, &mut results)?;
            Ok(results)
        });
        self.insert(name, Member::Method(thunk))
    }

    /// Declare a method with a trailing out-argument.
    ///
    /// Called with the in-arguments only, the out-argument starts from
    /// `default` and is returned after the method's own result. Called with
    /// one more argument, that value is used as the starting point and is not
    /// returned. Any other argument count is an error.
    pub fn method_out<A, O, R, F>(self, name: &str, default: O, f: F) -> Self
    where
        A: FromArgs + 'static,
        O: Clone + Send + Sync + 'static,
        R: 'static,
        F: Fn(&T, A, &mut O) -> R + Send + Sync + 'static,
    {
        let function = SmolStr::new(name);
        let thunk: MethodFn<T> = Arc::new(move |lua: &Lua, object: &Rc<T>, frame: &Stack| {
            let given = frame.len().saturating_sub(1);
            let local = if given == A::ARITY {
                true
            } else if given == A::ARITY + 1 {
                false
            } else {
                let position = if given < A::ARITY {
                    given + 1
                } else {
                    A::ARITY + 2
                };
                return Err(BindError::dispatch(
                    function.as_str(),
                    position,
                    format!(
                        "expected {} or {} arguments, got {}",
                        A::ARITY,
                        A::ARITY + 1,
                        given
                    ),
                ));
            };

            let args = A::from_args(lua, &function, frame, 2)?;
            let mut out = if local {
                default.clone()
            } else {
                registry::store::<O>(lua, &frame.value(A::ARITY + 2))
                    .map_err(|err| err.at_argument(&function, A::ARITY + 1))?
            };

            let result = f(&**object, args, &mut out);
            let mut results = Stack::new();
            dispatch::push_return(lua, &result, &mut results)?;
            if local {
                results.push(lua, &out)?;
            }
            Ok(results)
        });
        self.insert(name, Member::Method(thunk))
    }

    /// Declare a method working on the raw frame.
    ///
    /// `self` sits at position 1 of the frame, the arguments follow.
    pub fn raw_method<F>(self, name: &str, f: F) -> Self
    where
        F: Fn(&Lua, &Rc<T>, &Stack) -> BindResult<Stack> + Send + Sync + 'static,
    {
        self.insert(name, Member::Method(Arc::new(f)))
    }

    /// Declare a read/write property
    pub fn property<G, S, FG, FS>(self, name: &str, getter: FG, setter: FS) -> Self
    where
        G: 'static,
        S: 'static,
        FG: Fn(&T) -> G + Send + Sync + 'static,
        FS: Fn(&T, S) + Send + Sync + 'static,
    {
        let property = SmolStr::new(name);
        let getter: GetterFn<T> = Arc::new(move |lua: &Lua, object: &T| {
            registry::push(lua, &getter(object))
        });
        let setter: SetterFn<T> = Arc::new(move |lua: &Lua, object: &T, value: &Value| {
            let value = registry::store::<S>(lua, value).map_err(|err| match err {
                BindError::Conversion {
                    expected,
                    actual,
                    reason: None,
                } => BindError::conversion_with(expected, actual, format!("property '{}'", property)),
                other => other,
            })?;
            setter(object, value);
            Ok(())
        });
        self.insert(
            name,
            Member::Property {
                getter,
                setter: Some(setter),
            },
        )
    }

    /// Declare a read-only property
    pub fn readonly<G, FG>(self, name: &str, getter: FG) -> Self
    where
        G: 'static,
        FG: Fn(&T) -> G + Send + Sync + 'static,
    {
        let getter: GetterFn<T> = Arc::new(move |lua: &Lua, object: &T| {
            registry::push(lua, &getter(object))
        });
        self.insert(name, Member::Property { getter, setter: None })
    }

    /// Make `alias` resolve exactly like `real`
    ///
    /// Used for members whose natural name is a reserved word in script.
    pub fn alias(mut self, real: &str, alias: &str) -> Self {
        self.class.aliases.insert(SmolStr::new(alias), SmolStr::new(real));
        self
    }

    /// Expose a native signal under `name`
    pub fn signal<A, F>(mut self, name: &str, accessor: F) -> Self
    where
        A: PushArgs + 'static,
        F: Fn(&T) -> &Signal<A> + Send + Sync + 'static,
    {
        let signal_name = SmolStr::new(name);
        let accessor = Arc::new(accessor);
        let connect: ConnectFn<T> = Arc::new(move |lua: &Lua, object: &Rc<T>, callback: Callback| {
            signal::connect_script(lua, object, signal_name.clone(), accessor.clone(), callback)
        });
        if self.class.signals.insert(SmolStr::new(name), connect).is_some() {
            self.problems
                .push(format!("signal '{}' declared twice on {}", name, self.class.name));
        }
        self
    }

    /// Declare how script code constructs new instances
    pub fn constructor<A, F>(mut self, f: F) -> Self
    where
        A: FromArgs + 'static,
        F: Fn(A) -> T + Send + Sync + 'static,
    {
        self.class.constructor = Some(Arc::new(move |lua: &Lua, frame: &Stack, first: usize| {
            let args = dispatch::store_args::<A>(lua, "new", frame, first)?;
            Ok(f(args))
        }));
        self
    }

    /// Overload a binary operator.
    ///
    /// Both operands are stored through the registry, so either side may be
    /// the bound value.
    pub fn operator<L, R, O, F>(mut self, op: Operator, f: F) -> Self
    where
        L: 'static,
        R: 'static,
        O: 'static,
        F: Fn(L, R) -> O + Send + Sync + 'static,
    {
        let operator: OperatorFn = Arc::new(move |lua: &Lua, lhs: &Value, rhs: &Value| {
            let lhs = registry::store::<L>(lua, lhs)?;
            let rhs = registry::store::<R>(lua, rhs)?;
            registry::push(lua, &f(lhs, rhs))
        });
        self.class.operators.insert(op, operator);
        self
    }

    /// Delegate `==` to the native equality
    pub fn equality(mut self) -> Self
    where
        T: PartialEq,
    {
        self.class.eq = Some(Arc::new(|a: &T, b: &T| a == b));
        self
    }

    /// Delegate `<` and `<=` to the native ordering
    pub fn ordering(mut self) -> Self
    where
        T: PartialOrd,
    {
        self.class.cmp = Some(Arc::new(|a: &T, b: &T| a.partial_cmp(b)));
        self
    }

    /// Run `hook` right before a script-owned instance is released
    pub fn on_free<F>(mut self, hook: F) -> Self
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.class.free_hook = Some(Arc::new(hook));
        self
    }

    /// Also convert plain `T` values, copying them into script-owned
    /// instances on push.
    pub fn by_value(mut self) -> Self
    where
        T: Clone,
    {
        self.install_value = Some(install_value::<T>);
        self
    }

    /// Validate the declaration without registering it
    pub fn build(self) -> BindResult<Class<T>> {
        let mut problems = self.problems;
        let class = self.class;

        for (alias, target) in &class.aliases {
            if !class.members.contains_key(target) {
                problems.push(format!(
                    "alias '{}' on {} targets unknown member '{}'",
                    alias, class.name, target
                ));
            }
            if class.members.contains_key(alias) {
                problems.push(format!(
                    "alias '{}' on {} shadows a member",
                    alias, class.name
                ));
            }
        }

        if problems.is_empty() {
            Ok(class)
        } else {
            Err(BindError::setup(problems.join("; ")))
        }
    }

    /// Validate the declaration and register it process-wide.
    ///
    /// Registers conversions for `Rc<T>` (native-owned) and `Owned<T>`
    /// (script-owned), and for `T` itself when the class is `by_value`.
    pub fn register(self) -> BindResult<Arc<Class<T>>> {
        let install_value = self.install_value;
        let class = Arc::new(self.build()?);
        registry::with_registry(|registry| {
            install_class(registry, class.clone());
            if let Some(install_value) = install_value {
                install_value(registry);
            }
        });
        debug!(class = %class.name, by_value = install_value.is_some(), "registered class");
        Ok(class)
    }
}

fn install_class<T: 'static>(registry: &mut Registry, class: Arc<Class<T>>) {
    registry.insert_class(class);
    registry.register::<Rc<T>, _, _>(
        |lua, object| proxy::wrap(lua, object.clone(), Ownership::Native),
        |lua, value| store_shared::<T>(lua, value),
    );
    registry.register::<Owned<T>, _, _>(
        |lua, owned| proxy::wrap(lua, owned.as_rc().clone(), Ownership::Script),
        |lua, value| store_shared::<T>(lua, value).map(Owned::from_rc),
    );
}

fn install_value<T: Clone + 'static>(registry: &mut Registry) {
    registry.register::<T, _, _>(
        |lua, value| proxy::wrap(lua, Rc::new(value.clone()), Ownership::Script),
        |lua, value| store_shared::<T>(lua, value).map(|object| (*object).clone()),
    );
}

/// Store a proxy value back into the shared native object
pub(crate) fn store_shared<T: 'static>(_lua: &Lua, value: &Value) -> BindResult<Rc<T>> {
    let class_name = || {
        registry::class::<T>()
            .map(|class| class.name().to_string())
            .unwrap_or_else(crate::convert::type_label::<T>)
    };
    match value {
        Value::UserData(userdata) => match userdata.borrow::<Bound<T>>() {
            Ok(bound) => bound.get(),
            Err(_) => Err(BindError::conversion_with(
                class_name(),
                "userdata",
                "userdata of another type",
            )),
        },
        other => Err(BindError::conversion(class_name(), other.type_name())),
    }
}
