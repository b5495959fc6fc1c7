//! Ownership Bridge
//!
//! Reconciles native reference counting with Lua's garbage collector.
//!
//! ## Ownership Model
//!
//! Every native object reachable from script is wrapped in a [`Bound`]
//! userdata that records who owns it:
//!
//! - `Script`: the wrapper holds the strong reference. The object is released
//!   when the collector reclaims the wrapper or the script destroys it.
//! - `Native`: the wrapper holds a weak reference. The object lives as long as
//!   the native side keeps it; the wrapper reports it destroyed afterwards.
//!
//! Native functions hand objects to script as [`Owned<T>`] to transfer
//! ownership, or as `Rc<T>` to keep it. Transferring an object that already
//! has a native-owned wrapper turns that wrapper script-owned.
//!
//! ## Teardown
//!
//! Explicit `destroy()` and collection funnel through the same routine. The
//! destroyed flag is flipped with a compare-and-set, so only the first call
//! does anything. Methods already running keep their own strong reference,
//! so destroying an object mid-call never frees it under the caller.

use std::any::type_name;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::ops::Deref;
use std::rc::{Rc, Weak};
use std::sync::Arc;

use tracing::debug;

use crate::class::Class;
use crate::error::{BindError, BindResult};
use crate::signal::Connection;

/// Who is responsible for releasing a bound object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
    /// The script runtime owns the object (destroy-on-collect)
    Script,
    /// The native side owns the object; the script holds a weak handle
    Native,
}

/// What triggered a teardown
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Teardown {
    /// `destroy()` from script or [`Bound::destroy`] from native code
    Explicit,
    /// The collector reclaimed the wrapper
    Collected,
}

// ============================================================================
// Owned Wrapper
// ============================================================================

/// Native object whose ownership moves to the script runtime when pushed
///
/// Returning `Owned<T>` from a bound function is the binding-level
/// equivalent of returning a newly allocated object the caller must free.
pub struct Owned<T>(Rc<T>);

impl<T> Owned<T> {
    /// Wrap a fresh object
    pub fn new(value: T) -> Self {
        Owned(Rc::new(value))
    }

    /// Hand an existing shared object over to script
    pub fn from_rc(value: Rc<T>) -> Self {
        Owned(value)
    }

    /// The shared object
    pub fn as_rc(&self) -> &Rc<T> {
        &self.0
    }

    /// Give up the wrapper, keeping the shared object
    pub fn into_rc(self) -> Rc<T> {
        self.0
    }
}

impl<T> Deref for Owned<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T> Clone for Owned<T> {
    fn clone(&self) -> Self {
        Owned(self.0.clone())
    }
}

impl<T: fmt::Debug> fmt::Debug for Owned<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Owned").field(&self.0).finish()
    }
}

// ============================================================================
// Bound instance
// ============================================================================

enum Slot<T> {
    Strong(Rc<T>),
    Weak(Weak<T>),
    Empty,
}

/// A native object as seen from script
///
/// This is the userdata behind every proxy. See the module documentation for
/// the ownership rules.
pub struct Bound<T: 'static> {
    pub(crate) class: Arc<Class<T>>,
    ownership: Cell<Ownership>,
    address: usize,
    slot: RefCell<Slot<T>>,
    destroyed: Cell<bool>,
    connections: RefCell<Vec<Weak<Connection>>>,
}

impl<T: 'static> Bound<T> {
    pub(crate) fn new(class: Arc<Class<T>>, object: Rc<T>, ownership: Ownership) -> Self {
        let address = address_of(&object);
        let slot = match ownership {
            Ownership::Script => Slot::Strong(object),
            Ownership::Native => Slot::Weak(Rc::downgrade(&object)),
        };
        Self {
            class,
            ownership: Cell::new(ownership),
            address,
            slot: RefCell::new(slot),
            destroyed: Cell::new(false),
            connections: RefCell::new(Vec::new()),
        }
    }

    /// Who owns the object
    pub fn ownership(&self) -> Ownership {
        self.ownership.get()
    }

    /// Take over a native-owned object, making the script its owner.
    ///
    /// `object` must be the object this wrapper already refers to. Returns
    /// false when the wrapper was script-owned or torn down already.
    pub(crate) fn adopt(&self, object: Rc<T>) -> bool {
        if self.destroyed.get() || self.ownership.get() == Ownership::Script {
            return false;
        }
        if address_of(&object) != self.address {
            return false;
        }
        *self.slot.borrow_mut() = Slot::Strong(object);
        self.ownership.set(Ownership::Script);
        debug!(class = %self.class.name(), address = self.address, "ownership moved to script");
        true
    }

    /// Native address of the object, stable for its whole life
    pub fn address(&self) -> usize {
        self.address
    }

    /// Name of the bound class
    pub fn class_name(&self) -> &str {
        self.class.name()
    }

    /// True after teardown, or once the native owner dropped the object
    pub fn is_destroyed(&self) -> bool {
        if self.destroyed.get() {
            return true;
        }
        match &*self.slot.borrow() {
            Slot::Strong(_) => false,
            Slot::Weak(weak) => weak.strong_count() == 0,
            Slot::Empty => true,
        }
    }

    /// Strong reference to the live object.
    ///
    /// Fails with [`BindError::Destroyed`] once the object is gone.
    pub fn get(&self) -> BindResult<Rc<T>> {
        if self.destroyed.get() {
            return Err(BindError::destroyed(self.class.name()));
        }
        let object = match &*self.slot.borrow() {
            Slot::Strong(object) => Some(object.clone()),
            Slot::Weak(weak) => weak.upgrade(),
            Slot::Empty => None,
        };
        object.ok_or_else(|| BindError::destroyed(self.class.name()))
    }

    /// Explicit teardown, returning false when it already ran
    pub fn destroy(&self) -> bool {
        self.teardown(Teardown::Explicit)
    }

    pub(crate) fn track(&self, connection: &Rc<Connection>) {
        self.connections.borrow_mut().push(Rc::downgrade(connection));
    }

    fn teardown(&self, cause: Teardown) -> bool {
        if self.destroyed.replace(true) {
            return false;
        }

        // Native-owned sources keep their script slots when only the handle
        // is collected.
        if cause == Teardown::Explicit || self.ownership.get() == Ownership::Script {
            for connection in self.connections.take() {
                if let Some(connection) = connection.upgrade() {
                    connection.remove();
                }
            }
        }

        let slot = self.slot.replace(Slot::Empty);
        if let Slot::Strong(object) = slot {
            if let Some(free) = &self.class.free_hook {
                free(&*object);
            }
            drop(object);
        }

        debug!(
            class = %self.class.name(),
            address = self.address,
            ?cause,
            ownership = ?self.ownership.get(),
            "instance torn down"
        );
        true
    }
}

impl<T: 'static> Drop for Bound<T> {
    fn drop(&mut self) {
        self.teardown(Teardown::Collected);
    }
}

impl<T: 'static> fmt::Display for Bound<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_destroyed() {
            write!(f, "{}(destroyed)", self.class.name())
        } else {
            write!(f, "{}({:#x})", self.class.name(), self.address)
        }
    }
}

impl<T: 'static> fmt::Debug for Bound<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bound")
            .field("type", &type_name::<T>())
            .field("ownership", &self.ownership.get())
            .field("address", &format_args!("{:#x}", self.address))
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}

pub(crate) fn address_of<T>(object: &Rc<T>) -> usize {
    Rc::as_ptr(object) as *const () as usize
}
