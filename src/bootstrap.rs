//! Builds a fresh image from nothing: the self-recursive driver loop,
//! the hand-installed `:`/`immediate` pair, the 37 named primitives,
//! the bootstrap one-liner that defines `;`, the register-name
//! constants, and a prelude of words evaluated through the
//! freshly-bootstrapped interpreter itself.

use crate::dictionary;
use crate::dispatch;
use crate::error::Result;
use crate::kernel::{self, Cell, Memory};
use crate::reader::Channels;

/// The 37 named primitives, in the reference interpreter's own
/// instruction-table order. `PUSH`, `COMPILE`, and `RUN` are
/// deliberately absent — per `SPEC_FULL.md` §6.3 they are "invisible
/// words", used only by the dispatcher itself, never given a name.
/// `:` and `immediate` are also absent: they are hand-installed below
/// with their real opcode directly in the header, not wrapped in
/// `OP_COMPILE` like the rest, since they must run unconditionally
/// regardless of compile/command mode.
const PRIMITIVES: &[(&str, Cell)] = &[
    ("read", kernel::OP_READ),
    ("@", kernel::OP_LOAD),
    ("!", kernel::OP_STORE),
    ("-", kernel::OP_SUB),
    ("+", kernel::OP_ADD),
    ("and", kernel::OP_AND),
    ("or", kernel::OP_OR),
    ("xor", kernel::OP_XOR),
    ("invert", kernel::OP_INV),
    ("lshift", kernel::OP_SHL),
    ("rshift", kernel::OP_SHR),
    ("*", kernel::OP_MUL),
    ("/", kernel::OP_DIV),
    ("u<", kernel::OP_LESS),
    ("u>", kernel::OP_MORE),
    ("exit", kernel::OP_EXIT),
    ("emit", kernel::OP_EMIT),
    ("key", kernel::OP_KEY),
    ("r>", kernel::OP_FROMR),
    (">r", kernel::OP_TOR),
    ("branch", kernel::OP_BRANCH),
    ("?branch", kernel::OP_QBRANCH),
    ("pnum", kernel::OP_PNUM),
    ("'", kernel::OP_QUOTE),
    (",", kernel::OP_COMMA),
    ("=", kernel::OP_EQUAL),
    ("swap", kernel::OP_SWAP),
    ("dup", kernel::OP_DUP),
    ("drop", kernel::OP_DROP),
    ("over", kernel::OP_OVER),
    ("tail", kernel::OP_TAIL),
    ("bsave", kernel::OP_BSAVE),
    ("bload", kernel::OP_BLOAD),
    ("find", kernel::OP_FIND),
    ("print", kernel::OP_PRINT),
    ("depth", kernel::OP_DEPTH),
    ("clock", kernel::OP_CLOCK),
];

/// Register names, in register-index order starting at `DIC`, each
/// bound to a constant word returning its cell index.
const REGISTER_NAMES: &[(&str, usize)] = &[
    ("dic", kernel::DIC),
    ("rstk", kernel::RSTK),
    ("state", kernel::STATE),
    ("base", kernel::BASE),
    ("pwd", kernel::PWD),
    ("source-id", kernel::SOURCE_ID),
    ("sin", kernel::SIN),
    ("sidx", kernel::SIDX),
    ("slen", kernel::SLEN),
    ("start-address", kernel::START_ADDR),
    ("fin", kernel::FIN),
    ("fout", kernel::FOUT),
    ("stdin", kernel::STDIN),
    ("stdout", kernel::STDOUT),
    ("stderr", kernel::STDERR),
    ("argc", kernel::ARGC),
    ("argv", kernel::ARGV),
    ("debug", kernel::DEBUG),
    ("invalid", kernel::INVALID),
    ("top", kernel::TOP),
    ("instruction", kernel::INSTRUCTION),
    ("stack-size", kernel::STACK_SIZE),
    ("start-time", kernel::START_TIME),
];

/// The one-liner that, given `:`, `immediate`, and the 37 primitives,
/// defines `state` (a constant returning the STATE register's index)
/// and `;` (an immediate word that compiles an `exit` call into the
/// definition in progress, then drops the interpreter back to command
/// mode). Neither can be installed any other way: `;` needs to compile
/// a reference to `exit` and flip a register, which is exactly what
/// running this tiny program through the dispatcher already knows how
/// to do once the pieces above exist.
fn bootstrap_semicolon(mem: &mut Memory, channels: &mut Channels) -> Result<()> {
    let src = format!(": state {} exit : ; immediate ' exit , 0 state ! ;\n", kernel::STATE);
    eval_str(mem, channels, &src)
}

/// A prelude of words built purely in Forth once `;` exists, evaluated
/// through the interpreter itself. Ports the reference interpreter's
/// own bootstrap program (`initial_forth_program`) to this crate's
/// register names. `if`/`else`/`then`/`begin`/`until` use the data
/// stack as a compile-time back-patch stack: `>mark` reserves a cell
/// with `here`/`,` and leaves its address on the stack; `then`/`else`
/// later compute `here - marked-address` and store that as the
/// relative offset `branch`/`?branch` read at run time.
const PRELUDE: &str = "\
: here dic @ ;
: [ immediate 0 state ! ;
: ] 1 state ! ;
: >mark here 0 , ;
: if immediate ' ?branch , >mark ;
: else immediate ' branch , >mark swap dup here swap - swap ! ;
: then immediate dup here swap - swap ! ;
: begin immediate here ;
: until immediate ' ?branch , here - , ;
: 2dup over over ;
: rot >r swap r> swap ;
: -rot rot rot ;
: tuck swap over ;
: nip swap drop ;
: 1+ 1 + ;
: 1- 1 - ;
: negate 0 swap - ;
: nl 10 emit ;
: cr nl ;
: space 32 emit ;
: ( immediate begin key 41 = until ;
: allot here + dic ! ;
";

/// Defines `name` as a constant returning `value`, the same way the
/// reference interpreter's `forth_define_constant` does: evaluate
/// `": name value ;"` through the interpreter once `:`/`;` exist.
pub(crate) fn define_constant(
    mem: &mut Memory,
    channels: &mut Channels,
    name: &str,
    value: Cell,
) -> Result<()> {
    let src = format!(": {name} {value} ;\n");
    eval_str(mem, channels, &src)
}

/// Builds a fresh `core_size`-cell image with the dictionary, driver,
/// and prelude already installed, ready for `dispatch::run` to drive
/// against real input.
pub fn init(core_size: usize) -> Result<(Memory, Channels)> {
    let mut mem = Memory::new(core_size);
    let mut channels = Channels::new();

    mem.set_reg(kernel::REG_S, mem.stack_region_start() as Cell);
    mem.set_reg(kernel::RSTK, mem.return_region_start() as Cell);
    mem.set_usize(kernel::PUSH_SEED_CELL, kernel::OP_PUSH)?;

    mem.set_reg(kernel::STATE, 0);
    mem.set_reg(kernel::BASE, 10);
    mem.set_reg(kernel::PWD, 0);
    mem.set_reg(kernel::SOURCE_ID, 0);
    mem.set_reg(kernel::FIN, Channels::STDIN_ID);
    mem.set_reg(kernel::FOUT, Channels::STDOUT_ID);
    mem.set_reg(kernel::STDIN, Channels::STDIN_ID);
    mem.set_reg(kernel::STDOUT, Channels::STDOUT_ID);
    mem.set_reg(kernel::STDERR, Channels::STDERR_ID);
    mem.set_reg(kernel::ARGC, 0);
    mem.set_reg(kernel::ARGV, 0);
    mem.set_reg(kernel::DEBUG, 0);
    mem.set_reg(kernel::INVALID, 0);
    mem.set_reg(kernel::TOP, 0);
    mem.set_reg(kernel::STACK_SIZE, mem.stack_size() as Cell);
    mem.set_reg(kernel::START_TIME, dispatch::now_ms());

    // 1) The self-recursive driver: a 3-cell program `w t (INSTRUCTION-1)`
    // that reads a word, tail-drops a return-stack frame, then re-enters
    // itself via RUN without ever growing the return stack. See
    // `SPEC_FULL.md` §4.3 step 2.
    mem.set_reg(kernel::DIC, mem.dictionary_start() as Cell);
    let t = mem.reg(kernel::DIC) as usize;
    mem.set_usize(t, kernel::OP_TAIL)?;
    mem.set_reg(kernel::DIC, (t + 1) as Cell);
    let w = mem.reg(kernel::DIC) as usize;
    mem.set_usize(w, kernel::OP_READ)?;
    mem.set_reg(kernel::DIC, (w + 1) as Cell);
    let run_cell = mem.reg(kernel::DIC) as usize;
    mem.set_usize(run_cell, kernel::OP_RUN)?;
    mem.set_reg(kernel::DIC, (run_cell + 1) as Cell);
    let instruction = mem.reg(kernel::DIC) as usize;
    mem.set_reg(kernel::INSTRUCTION, instruction as Cell);
    mem.set_usize(instruction, w as Cell)?;
    mem.set_usize(instruction + 1, t as Cell)?;
    mem.set_usize(instruction + 2, instruction as Cell - 1)?;
    mem.set_reg(kernel::DIC, (instruction + 3) as Cell);

    // 2) `:` and `immediate`, hand-installed with their real opcode
    // directly in the header (no COMPILE wrapper) so they run the
    // instant READ finds them, compile mode or not.
    dictionary::compile_header(&mut mem, ":", kernel::OP_DEFINE)?;
    dictionary::compile_header(&mut mem, "immediate", kernel::OP_IMMEDIATE)?;

    // 3) The 37 named primitives: each gets a COMPILE-wrapped header
    // plus one code cell holding its real opcode.
    for &(name, opcode) in PRIMITIVES {
        let misc_cell = dictionary::compile_header(&mut mem, name, kernel::OP_COMPILE)?;
        let code_cell = misc_cell + 1;
        mem.set_usize(code_cell, opcode)?;
        mem.set_reg(kernel::DIC, (code_cell + 1) as Cell);
    }

    // 4) The absolute minimum needed for a sane environment: `state`
    // and `;`.
    bootstrap_semicolon(&mut mem, &mut channels)?;

    // 5) Name every register.
    for &(name, index) in REGISTER_NAMES {
        define_constant(&mut mem, &mut channels, name, index as Cell)?;
    }

    // 6) The prelude: control flow, stack shuffling, and I/O
    // convenience words, built purely in Forth.
    eval_str(&mut mem, &mut channels, PRELUDE)?;

    // 7) A few more constants that need the final core size.
    define_constant(&mut mem, &mut channels, "size", kernel::CELL_WIDTH as Cell)?;
    define_constant(&mut mem, &mut channels, "stack-start", mem.stack_region_start() as Cell)?;
    define_constant(&mut mem, &mut channels, "max-core", mem.core_size() as Cell)?;

    Ok((mem, channels))
}

/// Evaluates `src` as a string input source through the dispatcher,
/// restoring whichever input source was active beforehand. Used for
/// every piece of this bootstrap that is easier to express as Forth
/// source than as hand-poked cells.
fn eval_str(mem: &mut Memory, channels: &mut Channels, src: &str) -> Result<()> {
    let saved_source_id = mem.reg(kernel::SOURCE_ID);
    let saved_sin = mem.reg(kernel::SIN);
    let saved_sidx = mem.reg(kernel::SIDX);
    let saved_slen = mem.reg(kernel::SLEN);

    let sin = channels.push_string(src);
    mem.set_reg(kernel::SOURCE_ID, -1);
    mem.set_reg(kernel::SIN, sin);
    mem.set_reg(kernel::SIDX, 0);
    mem.set_reg(kernel::SLEN, src.len() as Cell);

    dispatch::run(mem, channels)?;

    mem.set_reg(kernel::SOURCE_ID, saved_source_id);
    mem.set_reg(kernel::SIN, saved_sin);
    mem.set_reg(kernel::SIDX, saved_sidx);
    mem.set_reg(kernel::SLEN, saved_slen);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bootstrap_installs_findable_primitives_and_prelude_words() {
        let (mem, _channels) = init(kernel::DEFAULT_CORE_SIZE).unwrap();
        assert_ne!(dictionary::find(&mem, "dup").unwrap(), 0);
        assert_ne!(dictionary::find(&mem, ":").unwrap(), 0);
        assert_ne!(dictionary::find(&mem, ";").unwrap(), 0);
        assert_ne!(dictionary::find(&mem, "if").unwrap(), 0);
        assert_ne!(dictionary::find(&mem, "begin").unwrap(), 0);
        assert_ne!(dictionary::find(&mem, "1+").unwrap(), 0);
        assert_ne!(dictionary::find(&mem, "negate").unwrap(), 0);
        assert_ne!(dictionary::find(&mem, "size").unwrap(), 0);
    }

    #[test]
    fn invisible_opcodes_are_not_named_words() {
        let (mem, _channels) = init(kernel::DEFAULT_CORE_SIZE).unwrap();
        assert_eq!(dictionary::find(&mem, "push").unwrap(), 0);
        assert_eq!(dictionary::find(&mem, "compile").unwrap(), 0);
        assert_eq!(dictionary::find(&mem, "run").unwrap(), 0);
    }

    #[test]
    fn semicolon_is_flagged_immediate() {
        let (mem, _channels) = init(kernel::DEFAULT_CORE_SIZE).unwrap();
        let misc_cell = dictionary::find(&mem, ";").unwrap();
        let misc = mem.get_usize(misc_cell).unwrap();
        let (_, opcode, _hidden) = dictionary::unpack_misc(misc);
        assert_eq!(opcode, kernel::OP_RUN);
    }

    #[test]
    fn ordinary_primitive_is_compile_wrapped() {
        let (mem, _channels) = init(kernel::DEFAULT_CORE_SIZE).unwrap();
        let misc_cell = dictionary::find(&mem, "dup").unwrap();
        let misc = mem.get_usize(misc_cell).unwrap();
        let (_, opcode, _hidden) = dictionary::unpack_misc(misc);
        assert_eq!(opcode, kernel::OP_COMPILE);
        assert_eq!(mem.get_usize(misc_cell + 1).unwrap(), kernel::OP_DUP);
    }

    #[test]
    fn state_returns_to_command_mode_after_bootstrap() {
        let (mem, _channels) = init(kernel::DEFAULT_CORE_SIZE).unwrap();
        assert_eq!(mem.reg(kernel::STATE), 0);
    }
}
