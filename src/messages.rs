//! Leveled diagnostic reporter used throughout the crate.
//!
//! Mirrors the `Msg`/`DebugLevel` shape the rest of this codebase was
//! already written against (see `internals::files`, `internals::debug`
//! in earlier revisions of this crate): a small struct carrying a
//! verbosity level, with `error`/`warning`/`info`/`debug` methods that
//! format a caller tag, a message, and an optional extra value.

use std::fmt::Debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DebugLevel {
    Error,
    Warning,
    Info,
    Debug,
}

#[derive(Debug, Clone)]
pub struct Msg {
    level: DebugLevel,
}

impl Default for Msg {
    fn default() -> Self {
        Self::new()
    }
}

impl Msg {
    pub fn new() -> Self {
        Msg {
            level: DebugLevel::Warning,
        }
    }

    pub fn set_level(&mut self, level: DebugLevel) {
        self.level = level;
    }

    pub fn get_level(&self) -> DebugLevel {
        self.level
    }

    pub fn error<T: Debug>(&self, caller: &str, text: &str, extra: Option<T>) {
        self.emit(DebugLevel::Error, caller, text, extra);
    }

    pub fn warning<T: Debug>(&self, caller: &str, text: &str, extra: Option<T>) {
        self.emit(DebugLevel::Warning, caller, text, extra);
    }

    pub fn info<T: Debug>(&self, caller: &str, text: &str, extra: Option<T>) {
        self.emit(DebugLevel::Info, caller, text, extra);
    }

    pub fn debug<T: Debug>(&self, caller: &str, text: &str, extra: Option<T>) {
        self.emit(DebugLevel::Debug, caller, text, extra);
    }

    fn emit<T: Debug>(&self, level: DebugLevel, caller: &str, text: &str, extra: Option<T>) {
        if level > self.level {
            return;
        }
        match extra {
            Some(extra) => eprintln!("[{level:?}] {caller}: {text} ({extra:?})"),
            None => eprintln!("[{level:?}] {caller}: {text}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_level_is_warning() {
        let msg = Msg::new();
        assert_eq!(msg.get_level(), DebugLevel::Warning);
    }

    #[test]
    fn set_level_round_trips() {
        let mut msg = Msg::new();
        msg.set_level(DebugLevel::Debug);
        assert_eq!(msg.get_level(), DebugLevel::Debug);
    }

    #[test]
    fn ordering_gates_emission() {
        assert!(DebugLevel::Debug > DebugLevel::Info);
        assert!(DebugLevel::Info > DebugLevel::Warning);
        assert!(DebugLevel::Warning > DebugLevel::Error);
    }
}
