//! Enumerations and flag sets
//!
//! Enumerations cross the boundary as their integer values. [`Flags`] wraps
//! an OR-combination of one enumeration and is bound by value, with `|`, `&`
//! and `testFlag` available from script. Integers are accepted wherever a
//! flag set is expected.

use std::fmt;
use std::marker::PhantomData;
use std::ops::{BitAnd, BitOr};

use luabind::convert::{integer_of, type_label};
use luabind::{
    bind_function, register_enum, registry, BindError, BindResult, Bound, ClassBuilder,
    Enumeration, Operator,
};
use mlua::{Lua, Table, Value};
use tracing::debug;

/// Alignment of content within a box
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Alignment {
    AlignLeft,
    AlignRight,
    AlignHCenter,
    AlignJustify,
    AlignTop,
    AlignBottom,
    AlignVCenter,
    AlignCenter,
}

impl Alignment {
    pub const ALL: [Alignment; 8] = [
        Alignment::AlignLeft,
        Alignment::AlignRight,
        Alignment::AlignHCenter,
        Alignment::AlignJustify,
        Alignment::AlignTop,
        Alignment::AlignBottom,
        Alignment::AlignVCenter,
        Alignment::AlignCenter,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Alignment::AlignLeft => "AlignLeft",
            Alignment::AlignRight => "AlignRight",
            Alignment::AlignHCenter => "AlignHCenter",
            Alignment::AlignJustify => "AlignJustify",
            Alignment::AlignTop => "AlignTop",
            Alignment::AlignBottom => "AlignBottom",
            Alignment::AlignVCenter => "AlignVCenter",
            Alignment::AlignCenter => "AlignCenter",
        }
    }
}

impl Enumeration for Alignment {
    fn to_raw(&self) -> i64 {
        match self {
            Alignment::AlignLeft => 0x0001,
            Alignment::AlignRight => 0x0002,
            Alignment::AlignHCenter => 0x0004,
            Alignment::AlignJustify => 0x0008,
            Alignment::AlignTop => 0x0020,
            Alignment::AlignBottom => 0x0040,
            Alignment::AlignVCenter => 0x0080,
            Alignment::AlignCenter => 0x0084,
        }
    }

    fn from_raw(raw: i64) -> Option<Self> {
        Self::ALL.into_iter().find(|a| a.to_raw() == raw)
    }
}

/// OR-combination of values of the enumeration `E`
pub struct Flags<E> {
    bits: i64,
    _marker: PhantomData<E>,
}

impl<E: Enumeration> Flags<E> {
    pub fn empty() -> Self {
        Self::from_bits(0)
    }

    pub fn from_bits(bits: i64) -> Self {
        Self {
            bits,
            _marker: PhantomData,
        }
    }

    pub fn bits(&self) -> i64 {
        self.bits
    }

    pub fn is_empty(&self) -> bool {
        self.bits == 0
    }

    /// True when every bit of `flag` is set. A zero flag only matches an
    /// empty set.
    pub fn test_flag(&self, flag: E) -> bool {
        let raw = flag.to_raw();
        if raw == 0 {
            self.bits == 0
        } else {
            self.bits & raw == raw
        }
    }

    pub fn set_flag(&mut self, flag: E, on: bool) {
        if on {
            self.bits |= flag.to_raw();
        } else {
            self.bits &= !flag.to_raw();
        }
    }
}

// Manual impls keep `E` free of derive bounds.
impl<E> Clone for Flags<E> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<E> Copy for Flags<E> {}

impl<E> PartialEq for Flags<E> {
    fn eq(&self, other: &Self) -> bool {
        self.bits == other.bits
    }
}

impl<E> fmt::Debug for Flags<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Flags<{}>({:#x})", type_label::<E>(), self.bits)
    }
}

impl<E: Enumeration> From<E> for Flags<E> {
    fn from(flag: E) -> Self {
        Self::from_bits(flag.to_raw())
    }
}

impl<E> BitOr for Flags<E> {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self {
            bits: self.bits | rhs.bits,
            _marker: PhantomData,
        }
    }
}

impl<E> BitAnd for Flags<E> {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        Self {
            bits: self.bits & rhs.bits,
            _marker: PhantomData,
        }
    }
}

/// Bind `Flags<E>` as the class `name`.
///
/// The enumeration's own conversion is installed as well.
pub fn register_flags<E: Enumeration>(name: &str) -> BindResult<()> {
    register_enum::<E>();
    ClassBuilder::<Flags<E>>::new(name)
        .readonly("bits", |f: &Flags<E>| f.bits())
        .method("testFlag", |f: &Flags<E>, (flag,): (E,)| f.test_flag(flag))
        .method("isEmpty", |f: &Flags<E>, (): ()| f.is_empty())
        .operator(Operator::BitOr, |a: Flags<E>, b: Flags<E>| a | b)
        .operator(Operator::BitAnd, |a: Flags<E>, b: Flags<E>| a & b)
        .equality()
        .by_value()
        .constructor(|(bits,): (Option<i64>,)| Flags::<E>::from_bits(bits.unwrap_or(0)))
        .register()?;

    // Replaces the by-value store so plain integers read as flag sets too.
    registry::register_store::<Flags<E>, _>(store_flags::<E>);
    debug!(class = name, "registered flags");
    Ok(())
}

fn store_flags<E: Enumeration>(_lua: &Lua, value: &Value) -> BindResult<Flags<E>> {
    match value {
        Value::UserData(userdata) => {
            let bound = userdata.borrow::<Bound<Flags<E>>>().map_err(|_| {
                BindError::conversion(type_label::<Flags<E>>(), "userdata")
            })?;
            let flags = *bound.get()?;
            Ok(flags)
        }
        Value::Integer(_) | Value::Number(_) => {
            Ok(Flags::from_bits(integer_of(value, &type_label::<Flags<E>>())?))
        }
        other => Err(BindError::conversion(type_label::<Flags<E>>(), other.type_name())),
    }
}

/// Build the `Qt` namespace table: every [`Alignment`] value plus the
/// `Alignment` flag-set constructor.
pub fn namespace(lua: &Lua) -> BindResult<Table> {
    let qt = lua.create_table()?;
    for alignment in Alignment::ALL {
        qt.raw_set(alignment.name(), alignment.to_raw())?;
    }
    let constructor = bind_function(lua, "Alignment", |(bits,): (Option<i64>,)| {
        Flags::<Alignment>::from_bits(bits.unwrap_or(0))
    })?;
    qt.raw_set("Alignment", constructor)?;
    Ok(qt)
}
