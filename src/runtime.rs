//! The host-facing API: a `Forth` instance wrapping the memory array,
//! I/O channels, and a diagnostic reporter, with methods to feed it
//! source, drive it, and move values across the host/VM boundary.

use std::path::Path;

use crate::bootstrap;
use crate::dispatch;
use crate::error::{ForthError, Result};
use crate::kernel::{self, Cell, Memory, DEFAULT_CORE_SIZE, MINIMUM_CORE_SIZE};
use crate::messages::Msg;
use crate::reader::Channels;

/// A running interpreter instance: memory, I/O channels, and the
/// leveled diagnostic reporter used for host-facing logging (distinct
/// from the fixed S-expression diagnostics the dispatcher writes
/// straight to stderr for Forth-visible conditions).
pub struct Forth {
    mem: Memory,
    channels: Channels,
    msg: Msg,
}

impl Forth {
    /// Builds a fresh instance with `core_size` cells of memory,
    /// bootstrapped (dictionary, `:`/`;`/`immediate`, prelude) and
    /// ready to evaluate source.
    pub fn init(core_size: usize) -> Result<Forth> {
        if core_size < MINIMUM_CORE_SIZE {
            return Err(ForthError::CoreTooSmall {
                requested: core_size,
                minimum: MINIMUM_CORE_SIZE,
            });
        }
        let (mem, channels) = bootstrap::init(core_size)?;
        Ok(Forth {
            mem,
            channels,
            msg: Msg::new(),
        })
    }

    pub fn msg(&self) -> &Msg {
        &self.msg
    }

    pub fn msg_mut(&mut self) -> &mut Msg {
        &mut self.msg
    }

    /// Directs further input to read from `path`, byte at a time,
    /// until exhausted.
    pub fn set_file_input(&mut self, path: &Path) -> Result<()> {
        let id = match self.channels.open_input_file(path) {
            Ok(id) => id,
            Err(e) => {
                self.msg.error(
                    "set_file_input",
                    &format!("failed to open {}", path.display()),
                    Some(&e),
                );
                return Err(e.into());
            }
        };
        self.mem.set_reg(kernel::SOURCE_ID, 0);
        self.mem.set_reg(kernel::FIN, id);
        Ok(())
    }

    /// Directs output to `path`, truncating it if it exists.
    pub fn set_file_output(&mut self, path: &Path) -> Result<()> {
        let id = match self.channels.open_output_file(path) {
            Ok(id) => id,
            Err(e) => {
                self.msg.error(
                    "set_file_output",
                    &format!("failed to open {}", path.display()),
                    Some(&e),
                );
                return Err(e.into());
            }
        };
        self.mem.set_reg(kernel::FOUT, id);
        Ok(())
    }

    /// Directs further input to read from an in-memory string.
    pub fn set_string_input(&mut self, text: &str) {
        let id = self.channels.push_string(text);
        self.mem.set_reg(kernel::SOURCE_ID, -1);
        self.mem.set_reg(kernel::SIN, id);
        self.mem.set_reg(kernel::SIDX, 0);
        self.mem.set_reg(kernel::SLEN, text.len() as Cell);
    }

    /// Runs the dispatch loop against whatever input source is
    /// currently set until it is exhausted or a fatal fault occurs.
    pub fn run(&mut self) -> Result<()> {
        dispatch::run(&mut self.mem, &mut self.channels).map_err(|fault| {
            self.msg.error("run", "dispatch loop faulted", Some(&fault));
            ForthError::from(fault)
        })
    }

    /// Convenience: points input at `text` and runs to completion.
    pub fn eval(&mut self, text: &str) -> Result<()> {
        self.set_string_input(text);
        self.run()
    }

    /// Pushes `value` onto the data stack.
    pub fn push(&mut self, value: Cell) -> Result<()> {
        let s = self.mem.reg(kernel::REG_S) + 1;
        let old_top = self.mem.reg(kernel::TOP);
        self.mem.set(s, old_top)?;
        self.mem.set_reg(kernel::REG_S, s);
        self.mem.set_reg(kernel::TOP, value);
        Ok(())
    }

    /// Pops and returns the data stack's top value.
    pub fn pop(&mut self) -> Result<Cell> {
        let top = self.mem.reg(kernel::TOP);
        let s = self.mem.reg(kernel::REG_S);
        let new_top = self.mem.get(s)?;
        self.mem.set_reg(kernel::TOP, new_top);
        self.mem.set_reg(kernel::REG_S, s - 1);
        Ok(top)
    }

    /// Number of cells currently on the data stack.
    pub fn stack_position(&self) -> i64 {
        self.mem.reg(kernel::REG_S) - self.mem.stack_region_start() as Cell
    }

    /// Defines a Forth constant word named `name` evaluating to
    /// `value`, usable the same as any word the prelude defines.
    pub fn define_constant(&mut self, name: &str, value: Cell) -> Result<()> {
        bootstrap::define_constant(&mut self.mem, &mut self.channels, name, value)
    }

    /// Publishes `args` to the running instance: each string is
    /// stashed in the channel table and an array of ids is written to
    /// memory, with `ARGC`/`ARGV` pointing at it.
    pub fn set_args(&mut self, args: &[String]) -> Result<()> {
        let start = self.mem.reg(kernel::DIC) as usize;
        for (offset, arg) in args.iter().enumerate() {
            let id = self.channels.push_string(arg);
            self.mem.set_usize(start + offset, id)?;
        }
        self.mem.set_reg(kernel::DIC, (start + args.len()) as Cell);
        self.mem.set_reg(kernel::ARGC, args.len() as Cell);
        self.mem.set_reg(kernel::ARGV, start as Cell);
        Ok(())
    }

    /// Writes a core image to `path`.
    pub fn save_core(&self, path: &Path) -> Result<()> {
        crate::image::save_core(&self.mem, path).map_err(|e| {
            self.msg.error(
                "save_core",
                &format!("failed to save core to {}", path.display()),
                Some(&e),
            );
            e
        })
    }

    /// Loads a core image previously written by `save_core`, as a
    /// fresh instance (channels start over: stdin/stdout/stderr only).
    /// The persisted FIN/FOUT/STDIN/STDOUT/STDERR registers still hold
    /// channel ids from the process that saved the image, which mean
    /// nothing against this fresh `Channels` table, so they are
    /// overwritten with the defaults every fresh instance starts with.
    pub fn load_core(path: &Path) -> Result<Forth> {
        let msg = Msg::new();
        let mut mem = crate::image::load_core(path).map_err(|e| {
            msg.error(
                "load_core",
                &format!("failed to load core from {}", path.display()),
                Some(&e),
            );
            e
        })?;
        mem.set_reg(kernel::FIN, Channels::STDIN_ID);
        mem.set_reg(kernel::FOUT, Channels::STDOUT_ID);
        mem.set_reg(kernel::STDIN, Channels::STDIN_ID);
        mem.set_reg(kernel::STDOUT, Channels::STDOUT_ID);
        mem.set_reg(kernel::STDERR, Channels::STDERR_ID);
        Ok(Forth {
            mem,
            channels: Channels::new(),
            msg,
        })
    }
}

impl Default for Forth {
    fn default() -> Self {
        Forth::init(DEFAULT_CORE_SIZE).expect("default core size is always valid")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_and_pop_round_trip() {
        let mut forth = Forth::default();
        forth.push(10).unwrap();
        forth.push(32).unwrap();
        assert_eq!(forth.pop().unwrap(), 32);
        assert_eq!(forth.pop().unwrap(), 10);
    }

    #[test]
    fn eval_runs_prelude_defined_words() {
        let mut forth = Forth::default();
        forth.push(41).unwrap();
        forth.eval("1+").unwrap();
        assert_eq!(forth.pop().unwrap(), 42);
    }

    #[test]
    fn eval_runs_arithmetic() {
        let mut forth = Forth::default();
        forth.eval("2 3 +").unwrap();
        assert_eq!(forth.pop().unwrap(), 5);
    }

    #[test]
    fn colon_definitions_are_callable() {
        let mut forth = Forth::default();
        forth.eval(": square dup * ;").unwrap();
        forth.eval("6 square").unwrap();
        assert_eq!(forth.pop().unwrap(), 36);
    }

    #[test]
    fn define_constant_is_findable_and_evaluable() {
        let mut forth = Forth::default();
        forth.define_constant("answer", 42).unwrap();
        forth.eval("answer").unwrap();
        assert_eq!(forth.pop().unwrap(), 42);
    }

    #[test]
    fn stack_position_tracks_pushes_and_pops() {
        let mut forth = Forth::default();
        let base = forth.stack_position();
        forth.push(1).unwrap();
        forth.push(2).unwrap();
        assert_eq!(forth.stack_position(), base + 2);
        forth.pop().unwrap();
        assert_eq!(forth.stack_position(), base + 1);
    }

    #[test]
    fn init_rejects_a_core_below_the_minimum() {
        assert!(matches!(
            Forth::init(16),
            Err(ForthError::CoreTooSmall { .. })
        ));
    }

    #[test]
    fn save_and_load_core_round_trips_definitions() {
        let mut forth = Forth::default();
        forth.eval(": double dup + ;").unwrap();
        let path = std::env::temp_dir().join(format!(
            "threadforth-runtime-test-{}.img",
            std::process::id()
        ));
        forth.save_core(&path).unwrap();
        let mut reloaded = Forth::load_core(&path).unwrap();
        reloaded.eval("21 double").unwrap();
        assert_eq!(reloaded.pop().unwrap(), 42);
        let _ = std::fs::remove_file(&path);
    }
}
