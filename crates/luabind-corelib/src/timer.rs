//! Elapsed-time measurement, loadable with `require 'corelib.ElapsedTimer'`.

use std::cell::Cell;
use std::time::{Duration, Instant};

use luabind::{expose, BindError, BindResult, ClassBuilder};
use mlua::{Lua, Table};

/// Module name scripts pass to `require`
pub const MODULE: &str = "corelib.ElapsedTimer";

/// Stopwatch that is invalid until started
#[derive(Debug, Default)]
pub struct ElapsedTimer {
    started: Cell<Option<Instant>>,
}

impl ElapsedTimer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&self) {
        self.started.set(Some(Instant::now()));
    }

    /// Restart the timer, returning the time elapsed since the previous start
    pub fn restart(&self) -> Option<Duration> {
        let previous = self.started.replace(Some(Instant::now()));
        previous.map(|started| started.elapsed())
    }

    pub fn elapsed(&self) -> Option<Duration> {
        self.started.get().map(|started| started.elapsed())
    }

    pub fn is_valid(&self) -> bool {
        self.started.get().is_some()
    }

    pub fn invalidate(&self) {
        self.started.set(None);
    }
}

fn not_started() -> BindError {
    BindError::Script(mlua::Error::runtime("ElapsedTimer has not been started"))
}

fn millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

fn nanos(duration: Duration) -> i64 {
    i64::try_from(duration.as_nanos()).unwrap_or(i64::MAX)
}

pub(crate) fn register() -> BindResult<()> {
    ClassBuilder::<ElapsedTimer>::new("ElapsedTimer")
        .method("start", |t: &ElapsedTimer, (): ()| t.start())
        .try_method("restart", |t: &ElapsedTimer, (): ()| {
            t.restart().map(millis).ok_or_else(not_started)
        })
        .try_method("elapsed", |t: &ElapsedTimer, (): ()| {
            t.elapsed().map(millis).ok_or_else(not_started)
        })
        .try_method("nsecsElapsed", |t: &ElapsedTimer, (): ()| {
            t.elapsed().map(nanos).ok_or_else(not_started)
        })
        .method("isValid", |t: &ElapsedTimer, (): ()| t.is_valid())
        .method("invalidate", |t: &ElapsedTimer, (): ()| t.invalidate())
        .constructor(|(): ()| ElapsedTimer::new())
        .register()?;
    Ok(())
}

/// Module loader: publishes the class table and returns it
pub(crate) fn open(lua: &Lua) -> BindResult<Table> {
    expose::<ElapsedTimer>(lua)
}
