//! Observable point
//!
//! [`Point`] is the reference bound object: two integer properties with
//! change signals, plain accessor methods, a multi-value method and a method
//! with an implicit out-argument.

use std::cell::Cell;
use std::fmt;

use luabind::{BindResult, ClassBuilder, Signal};

use crate::coord::Coord;

/// Integer point announcing every coordinate change
pub struct Point {
    x: Cell<i32>,
    y: Cell<i32>,
    x_changed: Signal<(i32,)>,
    y_changed: Signal<(i32,)>,
}

impl Point {
    pub fn new(x: i32, y: i32) -> Self {
        Self {
            x: Cell::new(x),
            y: Cell::new(y),
            x_changed: Signal::new(),
            y_changed: Signal::new(),
        }
    }

    pub fn x(&self) -> i32 {
        self.x.get()
    }

    pub fn y(&self) -> i32 {
        self.y.get()
    }

    /// Set `x`, emitting `xChanged` when the value differs
    pub fn set_x(&self, x: i32) {
        if self.x.replace(x) != x {
            self.x_changed.emit(&(x,));
        }
    }

    /// Set `y`, emitting `yChanged` when the value differs
    pub fn set_y(&self, y: i32) {
        if self.y.replace(y) != y {
            self.y_changed.emit(&(y,));
        }
    }

    pub fn values(&self) -> (i32, i32) {
        (self.x(), self.y())
    }

    /// Move both coordinates by `delta * factor`, leaving the distance moved
    /// in `factor`
    pub fn shift(&self, delta: i32, factor: &mut i32) {
        let distance = delta.saturating_mul(*factor);
        self.set_x(self.x().saturating_add(distance));
        self.set_y(self.y().saturating_add(distance));
        *factor = distance;
    }

    pub fn coord(&self) -> Coord {
        Coord::new(self.x(), self.y())
    }

    pub fn x_changed(&self) -> &Signal<(i32,)> {
        &self.x_changed
    }

    pub fn y_changed(&self) -> &Signal<(i32,)> {
        &self.y_changed
    }
}

impl Default for Point {
    fn default() -> Self {
        Self::new(0, 0)
    }
}

impl PartialEq for Point {
    fn eq(&self, other: &Self) -> bool {
        self.values() == other.values()
    }
}

impl fmt::Debug for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Point")
            .field("x", &self.x())
            .field("y", &self.y())
            .finish()
    }
}

pub(crate) fn register() -> BindResult<()> {
    ClassBuilder::<Point>::new("Point")
        .property("x", Point::x, Point::set_x)
        .property("y", Point::y, Point::set_y)
        .readonly("coord", Point::coord)
        .method("getX", |p: &Point, (): ()| p.x())
        .method("setX", |p: &Point, (x,): (i32,)| p.set_x(x))
        .method("getY", |p: &Point, (): ()| p.y())
        .method("setY", |p: &Point, (y,): (i32,)| p.set_y(y))
        .method_multi("values", |p: &Point, (): ()| p.values())
        .method_out("shift", 1i32, |p: &Point, (delta,): (i32,), factor: &mut i32| {
            p.shift(delta, factor)
        })
        .signal("xChanged", Point::x_changed)
        .signal("yChanged", Point::y_changed)
        .constructor(|(x, y): (Option<i32>, Option<i32>)| {
            Point::new(x.unwrap_or(0), y.unwrap_or(0))
        })
        .equality()
        .register()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    #[test]
    fn test_setters_emit_only_on_change() {
        let point = Point::new(1, 1);
        let seen = Rc::new(Cell::new(0));
        let counter = seen.clone();
        point.x_changed().connect(move |&(x,)| counter.set(counter.get() + x));

        point.set_x(1);
        assert_eq!(seen.get(), 0);
        point.set_x(5);
        assert_eq!(seen.get(), 5);
    }

    #[test]
    fn test_shift_reports_distance() {
        let point = Point::new(2, 3);
        let mut factor = 2;
        point.shift(4, &mut factor);
        assert_eq!(point.values(), (10, 11));
        assert_eq!(factor, 8);
    }

    #[test]
    fn test_equality_by_coordinates() {
        assert_eq!(Point::new(1, 2), Point::new(1, 2));
        assert_ne!(Point::new(1, 2), Point::new(2, 1));
    }
}
