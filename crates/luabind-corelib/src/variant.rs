//! Tagged values
//!
//! [`Variant`] is routed through the registry by its [`VariantKind`]: the
//! base handlers cover every kind, and any kind may be given its own push
//! and store handlers on top.
//!
//! ```ignore
//! // Expose coordinates as {x = .., y = ..} instead of {x, y}
//! registry::register_kind::<Variant, _, _>(
//!     VariantKind::Coord,
//!     |lua, variant| ...,
//!     |lua, value| ...,
//! );
//! ```

use std::fmt;

use luabind::convert::{string_of, type_label};
use luabind::{registry, BindError, BindResult, SubKind};
use mlua::{Lua, Value};

use crate::coord::{self, Coord};

/// Runtime kind of a [`Variant`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum VariantKind {
    Invalid = 0,
    Bool = 1,
    Int = 2,
    Double = 6,
    List = 9,
    String = 10,
    Coord = 25,
}

impl From<VariantKind> for SubKind {
    fn from(kind: VariantKind) -> Self {
        SubKind(kind as u32)
    }
}

impl fmt::Display for VariantKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            VariantKind::Invalid => "Invalid",
            VariantKind::Bool => "Bool",
            VariantKind::Int => "Int",
            VariantKind::Double => "Double",
            VariantKind::String => "String",
            VariantKind::Coord => "Coord",
            VariantKind::List => "List",
        };
        f.write_str(name)
    }
}

/// A value of one of a fixed set of kinds
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Variant {
    #[default]
    Invalid,
    Bool(bool),
    Int(i64),
    Double(f64),
    String(String),
    Coord(Coord),
    List(Vec<Variant>),
}

impl Variant {
    pub fn kind(&self) -> VariantKind {
        match self {
            Variant::Invalid => VariantKind::Invalid,
            Variant::Bool(_) => VariantKind::Bool,
            Variant::Int(_) => VariantKind::Int,
            Variant::Double(_) => VariantKind::Double,
            Variant::String(_) => VariantKind::String,
            Variant::Coord(_) => VariantKind::Coord,
            Variant::List(_) => VariantKind::List,
        }
    }

    pub fn is_valid(&self) -> bool {
        !matches!(self, Variant::Invalid)
    }

    /// Integer value, converting from doubles and numeric strings
    pub fn to_int(&self) -> Option<i64> {
        match self {
            Variant::Bool(b) => Some(i64::from(*b)),
            Variant::Int(n) => Some(*n),
            Variant::Double(n) if n.fract() == 0.0 => Some(*n as i64),
            Variant::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn to_coord(&self) -> Option<Coord> {
        match self {
            Variant::Coord(coord) => Some(*coord),
            _ => None,
        }
    }
}

macro_rules! impl_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {$(
        impl From<$ty> for Variant {
            fn from(value: $ty) -> Self {
                Variant::$variant(value.into())
            }
        }
    )*};
}

impl_from!(
    bool => Bool,
    i32 => Int,
    i64 => Int,
    f64 => Double,
    &str => String,
    String => String,
    Coord => Coord,
    Vec<Variant> => List,
);

/// Install the base handlers and the kind classifier for [`Variant`]
pub fn register() {
    registry::register::<Variant, _, _>(push_variant, store_variant);
    registry::set_kind_of::<Variant, _>(|variant| Some(variant.kind().into()));
    registry::register_kind::<Variant, _, _>(
        VariantKind::Coord,
        |lua, variant| match variant {
            Variant::Coord(coord) => coord::to_sequence(lua, coord),
            other => push_variant(lua, other),
        },
        |lua, value| coord::from_sequence(lua, value).map(Variant::Coord),
    );
}

fn push_variant(lua: &Lua, variant: &Variant) -> BindResult<Value> {
    Ok(match variant {
        Variant::Invalid => Value::Nil,
        Variant::Bool(b) => Value::Boolean(*b),
        Variant::Int(n) => Value::Integer(*n),
        Variant::Double(n) => Value::Number(*n),
        Variant::String(s) => Value::String(lua.create_string(s)?),
        Variant::Coord(coord) => coord::to_sequence(lua, coord)?,
        Variant::List(items) => {
            let table = lua.create_table_with_capacity(items.len(), 0)?;
            for (i, item) in items.iter().enumerate() {
                table.raw_set(i + 1, registry::push(lua, item)?)?;
            }
            Value::Table(table)
        }
    })
}

fn store_variant(lua: &Lua, value: &Value) -> BindResult<Variant> {
    Ok(match value {
        Value::Nil => Variant::Invalid,
        Value::Boolean(b) => Variant::Bool(*b),
        Value::Integer(n) => Variant::Int(*n),
        Value::Number(n) => Variant::Double(*n),
        Value::String(_) => Variant::String(string_of(value, "string")?),
        Value::Table(table) => {
            let len = table.raw_len();
            let mut items = Vec::with_capacity(len);
            for i in 1..=len {
                let item: Value = table.raw_get(i)?;
                let item = registry::store::<Variant>(lua, &item).map_err(|err| {
                    BindError::conversion_with(
                        type_label::<Variant>(),
                        "table",
                        format!("element {}: {}", i, err),
                    )
                })?;
                items.push(item);
            }
            Variant::List(items)
        }
        other => return Err(BindError::conversion(type_label::<Variant>(), other.type_name())),
    })
}
