//! Builtin Conversions
//!
//! Push/store handlers for the primitive types every binding needs, plus the
//! composition helpers used to declare conversions for third-party types.
//!
//! ## Builtins
//!
//! | Native                   | Script                                   |
//! |--------------------------|------------------------------------------|
//! | `bool`                   | boolean (no truthiness coercion)         |
//! | integers                 | integer; integral floats accepted        |
//! | `f32`, `f64`             | number                                   |
//! | `String`, `SmolStr`      | string; numbers accepted on store        |
//! | `char`                   | one-character string                     |
//! | `()`                     | nil                                      |
//! | `Value`, `Table`, `Function` | passed through                       |
//! | `Option<T>`, `Vec<T>`    | nil-or-value, sequence table             |
//!
//! Enumerations travel as their underlying integer. There is no symbolic name
//! mapping: a script passes `2`, never `"Right"`.

use std::any::type_name;
use std::fmt;

use mlua::{Function, IntoLua, Lua, Table, Value};
use smol_str::SmolStr;

use crate::error::{BindError, BindResult};
use crate::registry::{self, Registry};

/// Enumeration-like native types that cross the boundary as integers
pub trait Enumeration: Sized + 'static {
    /// Underlying integer value
    fn to_raw(&self) -> i64;

    /// Rebuild a value from its integer, `None` when no variant matches
    fn from_raw(raw: i64) -> Option<Self>;
}

/// Readable name of `T` without module paths (`Option<String>`, not
/// `core::option::Option<alloc::string::String>`).
pub fn type_label<T: ?Sized>() -> String {
    let full = type_name::<T>();
    let mut label = String::with_capacity(full.len());
    let mut segment = String::new();

    for ch in full.chars() {
        match ch {
            '<' | '>' | ',' | ' ' | '(' | ')' | '[' | ']' | ';' | '&' => {
                label.push_str(last_segment(&segment));
                segment.clear();
                label.push(ch);
            }
            _ => segment.push(ch),
        }
    }
    label.push_str(last_segment(&segment));
    label
}

fn last_segment(path: &str) -> &str {
    path.rsplit("::").next().unwrap_or(path)
}

// ============================================================================
// Scalar helpers
// ============================================================================

/// Read an integer out of a script value.
///
/// Floats are accepted when they hold an integral value.
pub fn integer_of(value: &Value, expected: &str) -> BindResult<i64> {
    match value {
        Value::Integer(n) => Ok(*n),
        Value::Number(n) => {
            if n.is_finite() && n.fract() == 0.0 && n.abs() < 9.223_372_036_854_776e18 {
                Ok(*n as i64)
            } else {
                Err(BindError::conversion_with(
                    expected,
                    "number",
                    format!("{} has no integer representation", n),
                ))
            }
        }
        other => Err(BindError::conversion(expected, other.type_name())),
    }
}

/// Read a float out of a script value
pub fn number_of(value: &Value, expected: &str) -> BindResult<f64> {
    match value {
        Value::Integer(n) => Ok(*n as f64),
        Value::Number(n) => Ok(*n),
        other => Err(BindError::conversion(expected, other.type_name())),
    }
}

/// Read a UTF-8 string out of a script value.
///
/// Numbers are formatted the way Lua's `tostring` would.
pub fn string_of(value: &Value, expected: &str) -> BindResult<String> {
    match value {
        Value::String(s) => String::from_utf8(s.as_bytes().to_vec()).map_err(|_| {
            BindError::conversion_with(expected, "string", "string is not valid UTF-8")
        }),
        Value::Integer(n) => Ok(n.to_string()),
        Value::Number(n) => Ok(format_number(*n)),
        other => Err(BindError::conversion(expected, other.type_name())),
    }
}

/// `%.14g`, plus a trailing `.0` when the result would read as an integer
fn format_number(n: f64) -> String {
    if n.is_nan() {
        return if n.is_sign_negative() { "-nan" } else { "nan" }.to_string();
    }
    if n.is_infinite() {
        return if n > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    if n == 0.0 {
        return if n.is_sign_negative() { "-0.0" } else { "0.0" }.to_string();
    }

    const DIGITS: i32 = 14;
    let scientific = format!("{:.*e}", (DIGITS - 1) as usize, n);
    let (mantissa, exponent) = scientific.split_once('e').unwrap_or((scientific.as_str(), "0"));
    let exponent: i32 = exponent.parse().unwrap_or(0);

    if exponent < -4 || exponent >= DIGITS {
        let sign = if exponent < 0 { '-' } else { '+' };
        format!("{}e{}{:02}", trim_fraction(mantissa), sign, exponent.abs())
    } else {
        let fixed = format!("{:.*}", (DIGITS - 1 - exponent) as usize, n);
        let fixed = trim_fraction(&fixed);
        if fixed.contains('.') {
            fixed.to_string()
        } else {
            format!("{}.0", fixed)
        }
    }
}

fn trim_fraction(digits: &str) -> &str {
    if digits.contains('.') {
        digits.trim_end_matches('0').trim_end_matches('.')
    } else {
        digits
    }
}

fn push_str(lua: &Lua, value: &str) -> BindResult<Value> {
    Ok(Value::String(lua.create_string(value)?))
}

macro_rules! install_integers {
    ($registry:ident: $($ty:ty),* $(,)?) => {$(
        $registry.register::<$ty, _, _>(
            |_, value| {
                i64::try_from(*value).map(Value::Integer).map_err(|_| {
                    BindError::conversion_with(
                        "integer",
                        stringify!($ty),
                        format!("{} does not fit a script integer", value),
                    )
                })
            },
            |_, value| {
                let n = integer_of(value, stringify!($ty))?;
                <$ty>::try_from(n).map_err(|_| {
                    BindError::conversion_with(
                        stringify!($ty),
                        "integer",
                        format!("{} is out of range", n),
                    )
                })
            },
        );
    )*};
}

/// Install the builtin handlers into `registry`
pub(crate) fn install_builtins(registry: &mut Registry) {
    registry.register::<bool, _, _>(
        |_, value| Ok(Value::Boolean(*value)),
        |_, value| match value {
            Value::Boolean(b) => Ok(*b),
            other => Err(BindError::conversion("boolean", other.type_name())),
        },
    );

    install_integers!(registry: i8, i16, i32, i64, isize, u8, u16, u32, u64, usize);

    registry.register::<f64, _, _>(
        |_, value| Ok(Value::Number(*value)),
        |_, value| number_of(value, "number"),
    );
    registry.register::<f32, _, _>(
        |_, value| Ok(Value::Number(f64::from(*value))),
        |_, value| number_of(value, "number").map(|n| n as f32),
    );

    registry.register::<String, _, _>(
        |lua, value| push_str(lua, value),
        |_, value| string_of(value, "string"),
    );
    registry.register::<SmolStr, _, _>(
        |lua, value| push_str(lua, value),
        |_, value| string_of(value, "string").map(SmolStr::from),
    );
    registry.register::<char, _, _>(
        |lua, value| push_str(lua, value.encode_utf8(&mut [0; 4])),
        |_, value| {
            let s = string_of(value, "character")?;
            let mut chars = s.chars();
            match (chars.next(), chars.next()) {
                (Some(ch), None) => Ok(ch),
                _ => Err(BindError::conversion_with(
                    "character",
                    "string",
                    format!("expected exactly one character, got {:?}", s),
                )),
            }
        },
    );

    registry.register::<(), _, _>(|_, _| Ok(Value::Nil), |_, _| Ok(()));

    registry.register::<Value, _, _>(|_, value| Ok(value.clone()), |_, value| Ok(value.clone()));
    registry.register::<Table, _, _>(
        |_, value| Ok(Value::Table(value.clone())),
        |_, value| match value {
            Value::Table(table) => Ok(table.clone()),
            other => Err(BindError::conversion("table", other.type_name())),
        },
    );
    registry.register::<Function, _, _>(
        |_, value| Ok(Value::Function(value.clone())),
        |_, value| match value {
            Value::Function(function) => Ok(function.clone()),
            other => Err(BindError::conversion("function", other.type_name())),
        },
    );

    macro_rules! install_containers {
        ($registry:ident: $($ty:ty),* $(,)?) => {$(
            install_option::<$ty>($registry);
            install_list::<$ty>($registry);
        )*};
    }
    install_containers!(
        registry: bool, i8, i16, i32, i64, isize, u8, u16, u32, u64, usize, f32, f64, String, SmolStr, char,
    );
}

// ============================================================================
// Composed handlers
// ============================================================================

fn install_option<T: 'static>(registry: &mut Registry) {
    registry.register::<Option<T>, _, _>(
        |lua, value| match value {
            Some(inner) => registry::push(lua, inner),
            None => Ok(Value::Nil),
        },
        |lua, value| match value {
            Value::Nil => Ok(None),
            other => registry::store(lua, other).map(Some),
        },
    );
}

fn install_list<T: 'static>(registry: &mut Registry) {
    registry.register::<Vec<T>, _, _>(
        |lua, items| {
            let table = lua.create_table_with_capacity(items.len(), 0)?;
            for (i, item) in items.iter().enumerate() {
                table.raw_set(i + 1, registry::push(lua, item)?)?;
            }
            Ok(Value::Table(table))
        },
        |lua, value| {
            let table = match value {
                Value::Table(table) => table,
                other => return Err(BindError::conversion(type_label::<Vec<T>>(), other.type_name())),
            };
            let len = table.raw_len();
            let mut items = Vec::with_capacity(len);
            for i in 1..=len {
                let element: Value = table.raw_get(i)?;
                let item = registry::store(lua, &element).map_err(|err| {
                    BindError::conversion_with(
                        type_label::<Vec<T>>(),
                        "table",
                        format!("element {}: {}", i, err),
                    )
                })?;
                items.push(item);
            }
            Ok(items)
        },
    );
}

/// Compose `Option<T>` handlers out of `T`'s handlers
pub fn register_option<T: 'static>() {
    registry::with_registry(install_option::<T>);
}

/// Compose `Vec<T>` handlers out of `T`'s handlers
pub fn register_list<T: 'static>() {
    registry::with_registry(install_list::<T>);
}

/// Register an enumeration so it travels as its underlying integer
pub fn register_enum<E: Enumeration>() {
    registry::register::<E, _, _>(
        |_, value| Ok(Value::Integer(value.to_raw())),
        |_, value| {
            let raw = integer_of(value, &type_label::<E>())?;
            E::from_raw(raw).ok_or_else(|| {
                BindError::conversion_with(
                    type_label::<E>(),
                    "integer",
                    format!("{} is not a valid value", raw),
                )
            })
        },
    );
}

// ============================================================================
// Table helpers
// ============================================================================

/// Read and convert one field of a script table.
///
/// A missing field fails with [`BindError::Conversion`] naming the field.
pub fn table_get<T, K>(lua: &Lua, table: &Table, key: K) -> BindResult<T>
where
    T: 'static,
    K: IntoLua + fmt::Display,
{
    let label = key.to_string();
    let value: Value = table.get(key)?;
    if value.is_nil() {
        return Err(BindError::conversion_with(
            type_label::<T>(),
            "nil",
            format!("missing field '{}'", label),
        ));
    }
    registry::store(lua, &value).map_err(|err| match err {
        BindError::Conversion {
            expected,
            actual,
            reason: None,
        } => BindError::conversion_with(expected, actual, format!("field '{}'", label)),
        other => other,
    })
}

/// Convert a native value and store it in a script table
pub fn table_set<T, K>(lua: &Lua, table: &Table, key: K, value: &T) -> BindResult<()>
where
    T: 'static,
    K: IntoLua,
{
    let value = registry::push(lua, value)?;
    table.set(key, value)?;
    Ok(())
}
