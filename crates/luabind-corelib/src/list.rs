//! Script-facing lists
//!
//! A [`List`] is a bound object rather than a table, so scripts see the
//! native interface: zero-based `at`, `size`, `append`, `contains`. `end`
//! is a reserved word in Lua and is also reachable as `finish`.

use std::cell::RefCell;
use std::fmt;

use luabind::convert::type_label;
use luabind::{BindError, BindResult, ClassBuilder};

/// Growable list shared with script
pub struct List<T> {
    items: RefCell<Vec<T>>,
}

impl<T: Clone + PartialEq> List<T> {
    pub fn new() -> Self {
        Self {
            items: RefCell::new(Vec::new()),
        }
    }

    /// Item at zero-based `index`
    pub fn at(&self, index: usize) -> Option<T> {
        self.items.borrow().get(index).cloned()
    }

    pub fn size(&self) -> usize {
        self.items.borrow().len()
    }

    pub fn append(&self, item: T) {
        self.items.borrow_mut().push(item);
    }

    pub fn contains(&self, item: &T) -> bool {
        self.items.borrow().contains(item)
    }

    /// One past the last valid index
    pub fn end(&self) -> usize {
        self.size()
    }

    pub fn to_vec(&self) -> Vec<T> {
        self.items.borrow().clone()
    }
}

impl<T: Clone + PartialEq> Default for List<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> From<Vec<T>> for List<T> {
    fn from(items: Vec<T>) -> Self {
        Self {
            items: RefCell::new(items),
        }
    }
}

impl<T: Clone> Clone for List<T> {
    fn clone(&self) -> Self {
        Self {
            items: RefCell::new(self.items.borrow().clone()),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for List<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.items.borrow().iter()).finish()
    }
}

/// Bind `List<T>` as the class `name`.
///
/// The list is bound by value: pushing a `List<T>` hands script its own copy.
pub fn register_list_class<T>(name: &str) -> BindResult<()>
where
    T: Clone + PartialEq + 'static,
{
    luabind::register_list::<T>();
    luabind::register_option::<Vec<T>>();
    ClassBuilder::<List<T>>::new(name)
        .try_method("at", |list: &List<T>, (index,): (i64,)| {
            usize::try_from(index)
                .ok()
                .and_then(|i| list.at(i))
                .ok_or_else(|| {
                    BindError::dispatch(
                        "at",
                        1,
                        format!(
                            "index {} out of range for {} of size {}",
                            index,
                            type_label::<List<T>>(),
                            list.size()
                        ),
                    )
                })
        })
        .method("size", |list: &List<T>, (): ()| list.size())
        .method("append", |list: &List<T>, (item,): (T,)| list.append(item))
        .method("contains", |list: &List<T>, (item,): (T,)| list.contains(&item))
        .method("end", |list: &List<T>, (): ()| list.end())
        .alias("end", "finish")
        .method("values", |list: &List<T>, (): ()| list.to_vec())
        .constructor(|(items,): (Option<Vec<T>>,)| List::from(items.unwrap_or_default()))
        .by_value()
        .register()?;
    Ok(())
}
