//! # luabind-corelib
//!
//! Native bindings built on `luabind`, covering the common shapes a binding
//! library needs:
//!
//! - [`Point`]: an observable object with properties, signals and an
//!   out-argument method
//! - [`Coord`]: a plain value converted to and from tables
//! - [`Variant`]: a tagged union routed by sub-kind
//! - [`Flags`] over [`Alignment`]: enumerations and flag sets, under the
//!   `Qt` namespace
//! - [`List`]: a bound list with a reserved-word member
//! - [`ElapsedTimer`]: a class loaded through `require`
//!
//! ## Usage
//!
//! ```ignore
//! let env = Environment::new()?;
//! luabind_corelib::install(&env)?;
//! env.run_string("require 'corelib.Qt'; align = Qt.Alignment() | Qt.AlignBottom")?;
//! ```

pub mod coord;
pub mod flags;
pub mod list;
pub mod point;
pub mod timer;
pub mod variant;

pub use coord::Coord;
pub use flags::{register_flags, Alignment, Flags};
pub use list::{register_list_class, List};
pub use point::Point;
pub use timer::ElapsedTimer;
pub use variant::{Variant, VariantKind};

use luabind::{BindResult, Environment};
use once_cell::sync::OnceCell;
use tracing::debug;

/// Module name of the `Qt` namespace table
pub const QT_MODULE: &str = "corelib.Qt";

static REGISTERED: OnceCell<()> = OnceCell::new();

/// Register every corelib conversion and class with the process-wide
/// registry. Only the first successful call does any work.
pub fn register() -> BindResult<()> {
    REGISTERED.get_or_try_init(|| {
        coord::register();
        variant::register();
        point::register()?;
        flags::register_flags::<Alignment>("Alignment")?;
        list::register_list_class::<i64>("IntList")?;
        list::register_list_class::<String>("StringList")?;
        timer::register()?;
        debug!("corelib registered");
        Ok::<(), luabind::BindError>(())
    })?;
    Ok(())
}

/// Register corelib and make it available in `env`.
///
/// `Point`, `IntList` and `StringList` become globals; the `Qt` namespace
/// and `ElapsedTimer` are loaded with `require`.
pub fn install(env: &Environment) -> BindResult<()> {
    register()?;
    env.expose::<Point>()?;
    env.expose::<List<i64>>()?;
    env.expose::<List<String>>()?;
    env.preload(QT_MODULE, |lua| {
        let qt = flags::namespace(lua)?;
        lua.globals().set("Qt", qt.clone())?;
        Ok(qt)
    })?;
    env.preload(timer::MODULE, timer::open)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    #[test]
    fn test_register_is_repeatable() {
        register().unwrap();
        register().unwrap();
        assert!(luabind::registry::is_registered::<Rc<Point>>());
        assert!(luabind::registry::is_registered::<luabind::Owned<Point>>());
        assert!(luabind::registry::is_registered::<Variant>());
        assert!(luabind::registry::is_registered::<Flags<Alignment>>());
    }

    #[test]
    fn test_install_publishes_globals() {
        let env = Environment::new().unwrap();
        install(&env).unwrap();
        let kind: String = env.run_string_with("return type(Point.new)").unwrap();
        assert_eq!(kind, "function");
        let loaded: bool = env
            .run_string_with("require 'corelib.Qt'; return Qt.AlignBottom == 0x40")
            .unwrap();
        assert!(loaded);
    }
}
