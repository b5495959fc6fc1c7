//! Call Dispatcher
//!
//! Marshals calls in both directions across the boundary.
//!
//! - Script calls native: [`FromArgs`] stores the argument frame into a
//!   native tuple, the native function runs, and its result is pushed back.
//! - Native calls script: [`PushArgs`] pushes a native tuple, the script
//!   function runs in protected mode, and the results come back as a
//!   [`Stack`].
//!
//! Argument positions in errors are 1-based and never count `self`.

use std::any::TypeId;

use mlua::{Function, Lua, MultiValue};
use smol_str::SmolStr;
use tracing::trace;

use crate::error::{BindError, BindResult};
use crate::registry;
use crate::stack::Stack;

/// Native argument tuples that can be stored from a script frame
pub trait FromArgs: Sized {
    /// Number of declared parameters
    const ARITY: usize;

    /// Store the arguments found at `first..first + ARITY`.
    ///
    /// Slots past the end of the frame read as `nil`.
    fn from_args(lua: &Lua, function: &str, args: &Stack, first: usize) -> BindResult<Self>;
}

/// Native values that can be pushed as a run of script values
pub trait PushArgs {
    /// Push every value onto `stack`, left to right
    fn push_args(&self, lua: &Lua, stack: &mut Stack) -> BindResult<()>;
}

macro_rules! impl_args {
    ($count:expr; $($name:ident : $idx:tt),*) => {
        impl<$($name: 'static),*> FromArgs for ($($name,)*) {
            const ARITY: usize = $count;

            #[allow(unused_variables)]
            fn from_args(lua: &Lua, function: &str, args: &Stack, first: usize) -> BindResult<Self> {
                Ok(($(
                    registry::store::<$name>(lua, &args.value(first + $idx))
                        .map_err(|err| err.at_argument(function, $idx + 1))?,
                )*))
            }
        }

        impl<$($name: 'static),*> PushArgs for ($($name,)*) {
            #[allow(unused_variables)]
            fn push_args(&self, lua: &Lua, stack: &mut Stack) -> BindResult<()> {
                $( stack.push(lua, &self.$idx)?; )*
                Ok(())
            }
        }
    };
}

impl_args!(0;);
impl_args!(1; A: 0);
impl_args!(2; A: 0, B: 1);
impl_args!(3; A: 0, B: 1, C: 2);
impl_args!(4; A: 0, B: 1, C: 2, D: 3);
impl_args!(5; A: 0, B: 1, C: 2, D: 3, E: 4);
impl_args!(6; A: 0, B: 1, C: 2, D: 3, E: 4, F: 5);

impl PushArgs for Stack {
    fn push_args(&self, _lua: &Lua, stack: &mut Stack) -> BindResult<()> {
        for value in self.iter() {
            stack.push_value(value.clone());
        }
        Ok(())
    }
}

/// Store the arguments of `function`, rejecting extra ones.
///
/// `first` is the frame position of the first declared parameter: 2 for
/// methods (after `self`), 1 for free functions.
pub fn store_args<A: FromArgs>(
    lua: &Lua,
    function: &str,
    args: &Stack,
    first: usize,
) -> BindResult<A> {
    let given = args.len().saturating_sub(first.saturating_sub(1));
    if given > A::ARITY {
        return Err(BindError::dispatch(
            function,
            A::ARITY + 1,
            format!("expected at most {} arguments, got {}", A::ARITY, given),
        ));
    }
    A::from_args(lua, function, args, first)
}

/// Push a single return value; `()` pushes nothing
pub fn push_return<R: 'static>(lua: &Lua, value: &R, stack: &mut Stack) -> BindResult<()> {
    if TypeId::of::<R>() != TypeId::of::<()>() {
        stack.push(lua, value)?;
    }
    Ok(())
}

// ============================================================================
// Native calls script
// ============================================================================

/// Call a script function with native arguments.
///
/// Errors raised by the script propagate as [`BindError`], with binding
/// errors recovered from the callback chain.
pub fn call<A: PushArgs>(lua: &Lua, function: &Function, args: A) -> BindResult<Stack> {
    let mut frame = Stack::new();
    args.push_args(lua, &mut frame)?;
    trace!(args = frame.len(), "calling script function");
    let results: MultiValue = function.call(frame.into_multi())?;
    Ok(Stack::from(results))
}

/// Call a script function and convert its first result
pub fn call_with<R: 'static, A: PushArgs>(lua: &Lua, function: &Function, args: A) -> BindResult<R> {
    let results = call(lua, function, args)?;
    registry::store(lua, &results.value(1))
}

/// Emission payload handed from a signal to a script slot
pub struct Invocation<'a, A> {
    /// Signal name
    pub signal: &'a str,
    /// Emitted arguments
    pub args: &'a A,
}

/// Deliver one emission to a script slot, discarding its results
pub(crate) fn deliver<A: PushArgs>(
    lua: &Lua,
    callback: &Function,
    invocation: Invocation<'_, A>,
) -> BindResult<()> {
    let mut frame = Stack::new();
    invocation.args.push_args(lua, &mut frame)?;
    trace!(signal = invocation.signal, args = frame.len(), "delivering signal");
    let _: MultiValue = callback.call(frame.into_multi())?;
    Ok(())
}

// ============================================================================
// Script calls native
// ============================================================================

/// Wrap a native free function as a script function.
///
/// ```ignore
/// let add = bind_function(&lua, "add", |(a, b): (i64, i64)| a + b)?;
/// lua.globals().set("add", add)?;
/// ```
pub fn bind_function<A, R, F>(lua: &Lua, name: &str, f: F) -> BindResult<Function>
where
    A: FromArgs + 'static,
    R: 'static,
    F: Fn(A) -> R + 'static,
{
    let name = SmolStr::new(name);
    let function = lua.create_function(move |lua, args: MultiValue| {
        let frame = Stack::from(args);
        let args = store_args::<A>(lua, &name, &frame, 1)?;
        let mut results = Stack::new();
        push_return(lua, &f(args), &mut results)?;
        Ok(results.into_multi())
    })?;
    Ok(function)
}

/// Wrap a fallible native free function as a script function
pub fn bind_try_function<A, R, F>(lua: &Lua, name: &str, f: F) -> BindResult<Function>
where
    A: FromArgs + 'static,
    R: 'static,
    F: Fn(A) -> BindResult<R> + 'static,
{
    let name = SmolStr::new(name);
    let function = lua.create_function(move |lua, args: MultiValue| {
        let frame = Stack::from(args);
        let args = store_args::<A>(lua, &name, &frame, 1)?;
        let mut results = Stack::new();
        push_return(lua, &f(args)?, &mut results)?;
        Ok(results.into_multi())
    })?;
    Ok(function)
}
