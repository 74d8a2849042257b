// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Process-wide logging hook.
//!
//! All log output from the crate goes through a single replaceable hook. The default hook writes each message as
//! `"[<Level>]: <message>"` to standard output and panics on [Level::Fatal]. The active level is stored atomically
//! and messages below it are dropped before the hook is invoked.
//!
//! [set_hook] and [clear_hook] are intended for startup; swapping the hook while schedulers are running only
//! races in-flight messages.

//======================================================================================================================
// Imports
//======================================================================================================================

use ::std::sync::{
    atomic::{
        AtomicU8,
        Ordering,
    },
    RwLock,
    RwLockReadGuard,
    RwLockWriteGuard,
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// Logging level options.
#[repr(u8)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub enum Level {
    Debug = 0,
    Info = 1,
    Warn = 2,
    Error = 3,
    /// The default hook panics on this level.
    Fatal = 4,
}

/// Log hook signature.
pub type LogHook = Box<dyn Fn(Level, &str) + Send + Sync>;

//======================================================================================================================
// Static Variables
//======================================================================================================================

/// Active level. Messages below this level are dropped.
static ACTIVE_LEVEL: AtomicU8 = AtomicU8::new(Level::Info as u8);

/// The installed hook. `None` selects the default hook.
static HOOK: RwLock<Option<LogHook>> = RwLock::new(None);

//======================================================================================================================
// Standalone Functions
//======================================================================================================================

/// Set the active level. The hook is not invoked for lower level calls.
pub fn set_active_level(level: Level) {
    ACTIVE_LEVEL.store(level as u8, Ordering::Relaxed);
}

/// Get the active log level.
pub fn active_level() -> Level {
    match ACTIVE_LEVEL.load(Ordering::Relaxed) {
        0 => Level::Debug,
        1 => Level::Info,
        2 => Level::Warn,
        3 => Level::Error,
        _ => Level::Fatal,
    }
}

/// Set the log hook. Intended for startup.
pub fn set_hook(hook: LogHook) {
    let mut slot: RwLockWriteGuard<Option<LogHook>> = HOOK.write().expect("log hook lock poisoned");
    *slot = Some(hook);
}

/// Restore the default log hook. Intended for startup.
pub fn clear_hook() {
    let mut slot: RwLockWriteGuard<Option<LogHook>> = HOOK.write().expect("log hook lock poisoned");
    *slot = None;
}

/// Log a message at the specified level.
pub fn log(level: Level, msg: &str) {
    if (level as u8) < ACTIVE_LEVEL.load(Ordering::Relaxed) {
        return;
    }

    let slot: RwLockReadGuard<Option<LogHook>> = HOOK.read().expect("log hook lock poisoned");
    match &*slot {
        Some(hook) => hook(level, msg),
        None => default_hook(level, msg),
    }
}

/// Log a message at [Level::Debug].
pub fn debug(msg: &str) {
    log(Level::Debug, msg);
}

/// Log a message at [Level::Info].
pub fn info(msg: &str) {
    log(Level::Info, msg);
}

/// Log a message at [Level::Warn].
pub fn warn(msg: &str) {
    log(Level::Warn, msg);
}

/// Log a message at [Level::Error].
pub fn error(msg: &str) {
    log(Level::Error, msg);
}

/// Log a message at [Level::Fatal]. The default hook panics.
pub fn fatal(msg: &str) {
    log(Level::Fatal, msg);
}

/// Reports the display name of a level.
fn level_name(level: Level) -> &'static str {
    match level {
        Level::Debug => "Debug",
        Level::Info => "Info",
        Level::Warn => "Warn",
        Level::Error => "Error",
        Level::Fatal => "Fatal",
    }
}

/// The default hook: writes to standard output, panics on [Level::Fatal].
fn default_hook(level: Level, msg: &str) {
    println!("[{}]: {}", level_name(level), msg);
    if level == Level::Fatal {
        panic!("{}", msg);
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
