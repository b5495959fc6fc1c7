//! Plain point values
//!
//! A [`Coord`] crosses the boundary as a fresh `{ x = .., y = .. }` table
//! rather than as a bound object, so scripts may build one inline.

use std::fmt;

use luabind::convert::type_label;
use luabind::{registry, table_get, table_set, BindError, BindResult};
use mlua::{Lua, Value};

/// Integer point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Coord {
    pub x: i32,
    pub y: i32,
}

impl Coord {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Sum of the absolute coordinates
    pub fn manhattan_length(&self) -> u32 {
        self.x.unsigned_abs().saturating_add(self.y.unsigned_abs())
    }
}

impl fmt::Display for Coord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// Install the default `{x, y}` handlers for [`Coord`]
pub fn register() {
    registry::register::<Coord, _, _>(
        |lua, coord| {
            let table = lua.create_table_with_capacity(0, 2)?;
            table_set(lua, &table, "x", &coord.x)?;
            table_set(lua, &table, "y", &coord.y)?;
            Ok(Value::Table(table))
        },
        |lua, value| match value {
            Value::Table(table) => Ok(Coord {
                x: table_get(lua, table, "x")?,
                y: table_get(lua, table, "y")?,
            }),
            other => Err(BindError::conversion(type_label::<Coord>(), other.type_name())),
        },
    );
    luabind::register_option::<Coord>();
    luabind::register_list::<Coord>();
}

/// Read a [`Coord`] from a two-element sequence `{x, y}`
pub fn from_sequence(lua: &Lua, value: &Value) -> BindResult<Coord> {
    match value {
        Value::Table(table) => Ok(Coord {
            x: table_get(lua, table, 1)?,
            y: table_get(lua, table, 2)?,
        }),
        other => Err(BindError::conversion_with(
            type_label::<Coord>(),
            other.type_name(),
            "expected a two-element sequence",
        )),
    }
}

/// Push a [`Coord`] as a two-element sequence `{x, y}`
pub fn to_sequence(lua: &Lua, coord: &Coord) -> BindResult<Value> {
    let table = lua.create_table_with_capacity(2, 0)?;
    table.raw_set(1, coord.x)?;
    table.raw_set(2, coord.y)?;
    Ok(Value::Table(table))
}
