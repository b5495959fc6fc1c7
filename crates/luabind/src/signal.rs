//! Callback/Signal Bridge
//!
//! [`Signal`] is the native event source bound objects expose. Script code
//! subscribes with `obj:connect("xChanged", fn)`, which wraps the script
//! function as a native slot and hands back a remover.
//!
//! ## Connection lifecycle
//!
//! - The slot holds its [`Connection`]. For a native-owned source the
//!   connection holds the script function until it is removed. For a
//!   script-owned source the function lives in the proxy's own slot table,
//!   so a function that captures its source does not keep it alive.
//! - Removing is idempotent: the first call detaches the slot, every later
//!   call does nothing.
//! - Errors raised by a script slot are logged and swallowed. Native emitters
//!   have no way to handle them.
//! - Dropping the environment removes every connection still alive, so a
//!   native source never calls into a closed runtime.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::Arc;

use mlua::{Function, Lua};
use smol_str::SmolStr;
use tracing::{trace, warn};

use crate::dispatch::{self, Invocation, PushArgs};
use crate::error::BindResult;
use crate::proxy;

/// Handle to one slot of a [`Signal`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotId(u64);

type SlotFn<A> = Rc<dyn Fn(&A)>;

/// Native event source
///
/// `A` is the argument tuple delivered to every slot.
pub struct Signal<A> {
    slots: RefCell<Vec<(SlotId, SlotFn<A>)>>,
    next_id: Cell<u64>,
}

impl<A> Signal<A> {
    /// Create a signal with no slots
    pub fn new() -> Self {
        Self {
            slots: RefCell::new(Vec::new()),
            next_id: Cell::new(1),
        }
    }

    /// Attach a slot
    pub fn connect(&self, slot: impl Fn(&A) + 'static) -> SlotId {
        let id = SlotId(self.next_id.get());
        self.next_id.set(id.0 + 1);
        self.slots.borrow_mut().push((id, Rc::new(slot)));
        id
    }

    /// Detach a slot, returning false when it was already gone
    pub fn disconnect(&self, id: SlotId) -> bool {
        let mut slots = self.slots.borrow_mut();
        let before = slots.len();
        slots.retain(|(slot, _)| *slot != id);
        slots.len() != before
    }

    /// True while `id` is attached
    pub fn is_connected(&self, id: SlotId) -> bool {
        self.slots.borrow().iter().any(|(slot, _)| *slot == id)
    }

    /// Deliver `args` to every attached slot.
    ///
    /// Slots may connect or disconnect while the emission runs. A slot
    /// disconnected mid-emission is not called afterwards.
    pub fn emit(&self, args: &A) {
        let snapshot: Vec<(SlotId, SlotFn<A>)> = self.slots.borrow().clone();
        for (id, slot) in snapshot {
            if self.is_connected(id) {
                slot(args);
            }
        }
    }

    /// Number of attached slots
    pub fn slot_count(&self) -> usize {
        self.slots.borrow().len()
    }
}

impl<A> Default for Signal<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A> fmt::Debug for Signal<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("slots", &self.slot_count())
            .finish()
    }
}

// ============================================================================
// Script connections
// ============================================================================

type DetachFn = Box<dyn FnOnce() -> bool>;

/// Where a connection finds its script function
pub(crate) enum Callback {
    /// Held from native code until the connection is removed
    Rooted(Function),
    /// Entry `slot` of the slot table of the proxy cached under `key`
    Stashed { key: String, slot: usize },
}

/// One script function subscribed to one signal
pub struct Connection {
    signal: SmolStr,
    removed: Cell<bool>,
    callback: RefCell<Option<Callback>>,
    detach: RefCell<Option<DetachFn>>,
}

impl Connection {
    fn new(signal: SmolStr, callback: Callback) -> Self {
        Self {
            signal,
            removed: Cell::new(false),
            callback: RefCell::new(Some(callback)),
            detach: RefCell::new(None),
        }
    }

    /// Name of the signal this connection listens to
    pub fn signal(&self) -> &str {
        &self.signal
    }

    /// True once the connection was removed
    pub fn is_removed(&self) -> bool {
        self.removed.get()
    }

    /// Detach the slot and release the script function.
    ///
    /// Returns true only for the call that actually removed the connection.
    pub fn remove(&self) -> bool {
        if self.removed.replace(true) {
            return false;
        }

        let detach = self.detach.borrow_mut().take();
        self.callback.borrow_mut().take();
        let detached = detach.map(|detach| detach()).unwrap_or(false);
        trace!(signal = %self.signal, detached, "connection removed");
        true
    }

    fn callback(&self, lua: &Lua) -> Option<Function> {
        match &*self.callback.borrow() {
            Some(Callback::Rooted(function)) => Some(function.clone()),
            Some(Callback::Stashed { key, slot }) => proxy::stashed_callback(lua, key, *slot),
            None => None,
        }
    }

    fn stashed_slot(&self) -> Option<(String, usize)> {
        match &*self.callback.borrow() {
            Some(Callback::Stashed { key, slot }) => Some((key.clone(), *slot)),
            _ => None,
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("signal", &self.signal)
            .field("removed", &self.removed.get())
            .finish()
    }
}

/// Every connection made in one environment, held weakly
#[derive(Clone, Default)]
pub(crate) struct ConnectionSet(Rc<RefCell<Vec<Weak<Connection>>>>);

impl ConnectionSet {
    pub(crate) fn track(&self, connection: &Rc<Connection>) {
        let mut connections = self.0.borrow_mut();
        connections.retain(|c| c.upgrade().map(|c| !c.is_removed()).unwrap_or(false));
        connections.push(Rc::downgrade(connection));
    }

    pub(crate) fn live_count(&self) -> usize {
        self.0
            .borrow()
            .iter()
            .filter_map(Weak::upgrade)
            .filter(|c| !c.is_removed())
            .count()
    }

    /// Remove every live connection, returning how many were removed
    pub(crate) fn disconnect_all(&self) -> usize {
        let connections = self.0.take();
        connections
            .iter()
            .filter_map(Weak::upgrade)
            .filter(|c| c.remove())
            .count()
    }
}

/// Wrap `callback` as a slot on the signal `accessor` selects from `object`.
///
/// The returned connection is already attached.
pub(crate) fn connect_script<T, A, F>(
    lua: &Lua,
    object: &Rc<T>,
    signal: SmolStr,
    accessor: Arc<F>,
    callback: Callback,
) -> BindResult<Rc<Connection>>
where
    T: 'static,
    A: PushArgs + 'static,
    F: Fn(&T) -> &Signal<A> + Send + Sync + 'static,
{
    let connection = Rc::new(Connection::new(signal, callback));

    let weak_lua = lua.weak();
    let slot_connection = connection.clone();
    let id = accessor(&**object).connect(move |args: &A| {
        let Some(lua) = weak_lua.try_upgrade() else {
            return;
        };
        let Some(callback) = slot_connection.callback(&lua) else {
            return;
        };
        let invocation = Invocation {
            signal: slot_connection.signal(),
            args,
        };
        if let Err(err) = dispatch::deliver(&lua, &callback, invocation) {
            warn!(signal = slot_connection.signal(), error = %err, "script slot failed");
        }
    });

    let source = Rc::downgrade(object);
    *connection.detach.borrow_mut() = Some(Box::new(move || match source.upgrade() {
        Some(object) => accessor(&*object).disconnect(id),
        None => false,
    }));

    if let Some(set) = lua.app_data_ref::<ConnectionSet>() {
        set.track(&connection);
    }
    trace!(signal = connection.signal(), "connection made");
    Ok(connection)
}

/// Script-callable remover for `connection`
pub(crate) fn remover(lua: &Lua, connection: Rc<Connection>) -> BindResult<Function> {
    let remover = lua.create_function(move |lua, ()| {
        let stashed = connection.stashed_slot();
        if connection.remove() {
            if let Some((key, slot)) = stashed {
                proxy::clear_stashed(lua, &key, slot)?;
            }
        }
        Ok(())
    })?;
    Ok(remover)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_emit_reaches_every_slot() {
        let signal: Signal<(i32,)> = Signal::new();
        let seen = Rc::new(RefCell::new(Vec::new()));

        let first = seen.clone();
        signal.connect(move |(n,)| first.borrow_mut().push(*n));
        let second = seen.clone();
        signal.connect(move |(n,)| second.borrow_mut().push(n * 10));

        signal.emit(&(3,));
        assert_eq!(*seen.borrow(), vec![3, 30]);
        assert_eq!(signal.slot_count(), 2);
    }

    #[test]
    fn test_disconnect() {
        let signal: Signal<()> = Signal::new();
        let count = Rc::new(Cell::new(0));

        let counter = count.clone();
        let id = signal.connect(move |_| counter.set(counter.get() + 1));
        assert!(signal.disconnect(id));
        assert!(!signal.disconnect(id));

        signal.emit(&());
        assert_eq!(count.get(), 0);
    }

    #[test]
    fn test_slot_disconnected_mid_emission_is_skipped() {
        let signal = Rc::new(Signal::<()>::new());
        let later_calls = Rc::new(Cell::new(0));
        let later_id = Rc::new(Cell::new(None));

        let source = Rc::downgrade(&signal);
        let target = later_id.clone();
        signal.connect(move |_| {
            if let (Some(signal), Some(id)) = (source.upgrade(), target.get()) {
                signal.disconnect(id);
            }
        });
        let counter = later_calls.clone();
        later_id.set(Some(signal.connect(move |_| counter.set(counter.get() + 1))));

        signal.emit(&());
        assert_eq!(later_calls.get(), 0);
        assert_eq!(signal.slot_count(), 1);
    }

    #[test]
    fn test_connection_set_disconnects_all() {
        let lua = Lua::new();
        let set = ConnectionSet::default();
        let callback = lua.create_function(|_, ()| Ok(())).unwrap();
        let connection = Rc::new(Connection::new("changed".into(), Callback::Rooted(callback)));

        set.track(&connection);
        assert_eq!(set.live_count(), 1);
        assert_eq!(set.disconnect_all(), 1);
        assert!(connection.is_removed());
        assert!(!connection.remove());
        assert_eq!(set.live_count(), 0);
    }
}
