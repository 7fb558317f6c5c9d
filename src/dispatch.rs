//! The threaded-code inner interpreter: the dispatch loop over the
//! primitive opcode set, plus the outer-interpreter step (`READ`) that
//! drives compilation and command execution.
//!
//! The loop mirrors the two-level structure of the reference dispatcher:
//! an outer `for` that fetches the next cell off the instruction stream
//! into `pc`, and an inner step that decodes the opcode at `pc` and
//! dispatches it. `READ` (and `FIND`) can redirect `pc` to a
//! newly-found word and re-enter the inner step directly, bypassing the
//! outer fetch, exactly as the reference interpreter's `goto INNER` does.

use std::fs;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::dictionary;
use crate::error::VmFault;
use crate::kernel::{self, Cell, Memory};
use crate::reader::{self, Channels};

pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Runs the dispatch loop to completion: either the driver's
/// zero-terminator is reached (clean exit, `Ok(())`) or a fatal fault
/// propagates out (`Err`). Non-fatal conditions (unknown token,
/// division by zero, block I/O failure) are handled inline and never
/// reach the caller.
pub fn run(mem: &mut Memory, channels: &mut Channels) -> Result<(), VmFault> {
    if mem.reg(kernel::INVALID) != 0 {
        return Err(VmFault::Poisoned);
    }

    let mut i: Cell = mem.reg(kernel::INSTRUCTION);
    let mut s: Cell = mem.reg(kernel::REG_S);
    let mut f: Cell = mem.reg(kernel::TOP);

    let result = dispatch_loop(mem, channels, &mut i, &mut s, &mut f);

    match result {
        Ok(()) => {
            mem.set_reg(kernel::REG_S as usize, s);
            mem.set_reg(kernel::TOP, f);
            mem.set_reg(kernel::INSTRUCTION, i);
            Ok(())
        }
        Err(fault) => {
            // Registers are deliberately not written back here: a fatal
            // fault leaves `S`/`TOP`/`INSTRUCTION` at whatever they were
            // before this call, matching the reference interpreter's
            // longjmp-past-the-epilogue behavior.
            mem.set_reg(kernel::INVALID, 1);
            eprintln!("{fault}");
            Err(fault)
        }
    }
}

fn dispatch_loop(
    mem: &mut Memory,
    channels: &mut Channels,
    i: &mut Cell,
    s: &mut Cell,
    f: &mut Cell,
) -> Result<(), VmFault> {
    loop {
        let fetched = mem.get(*i)?;
        *i += 1;
        if fetched == 0 {
            return Ok(());
        }
        let mut pc = fetched;
        loop {
            let halt = step(mem, channels, i, s, f, &mut pc)?;
            match halt {
                StepOutcome::NextFromStream => break,
                StepOutcome::ReenterAt => continue,
                StepOutcome::EndOfInput => return Ok(()),
            }
        }
    }
}

enum StepOutcome {
    /// This opcode is done; the outer loop should fetch its next `pc`
    /// from the instruction stream.
    NextFromStream,
    /// `READ` found a word and redirected `pc`; dispatch again at the
    /// new `pc` without going through the outer fetch.
    ReenterAt,
    /// Input ended gracefully (not an error); stop the whole loop.
    EndOfInput,
}

#[allow(clippy::too_many_arguments)]
fn step(
    mem: &mut Memory,
    channels: &mut Channels,
    i: &mut Cell,
    s: &mut Cell,
    f: &mut Cell,
    pc: &mut Cell,
) -> Result<StepOutcome, VmFault> {
    let opcode = mem.get(*pc)? & kernel::OPCODE_MASK;
    *pc += 1;

    match opcode {
        kernel::OP_PUSH => {
            *s += 1;
            mem.set(*s, *f)?;
            *f = mem.get(*i)?;
            *i += 1;
        }
        kernel::OP_QUOTE => {
            *s += 1;
            mem.set(*s, *f)?;
            *f = mem.get(*i)?;
            *i += 1;
        }
        kernel::OP_COMPILE => {
            // The wrapper every ordinary word's header carries: appends
            // the dispatch cursor (already advanced past this cell,
            // i.e. the word's code cell) to the dictionary. Does not
            // touch the data stack at all.
            let dic = mem.reg(kernel::DIC);
            mem.set(dic, *pc)?;
            mem.set_reg(kernel::DIC, dic + 1);
        }
        kernel::OP_RUN => {
            let rstk = mem.reg(kernel::RSTK) + 1;
            mem.set_reg(kernel::RSTK, rstk);
            mem.set(rstk, *i)?;
            *i = *pc;
        }
        kernel::OP_DEFINE => {
            // Backs `:`. Installs the new word's header as an ordinary
            // COMPILE-wrapped word, then appends one code cell holding
            // RUN, so invoking it later threads into its body exactly
            // like a primitive threads into its raw opcode.
            mem.set_reg(kernel::STATE, 1);
            match reader::get_word(mem, channels) {
                None => return Ok(StepOutcome::EndOfInput),
                Some(word) => {
                    let misc_cell = dictionary::compile_header(mem, &word, kernel::OP_COMPILE)?;
                    let code_cell = misc_cell + 1;
                    mem.set_usize(code_cell, kernel::OP_RUN)?;
                    mem.set_reg(kernel::DIC, (code_cell + 1) as Cell);
                }
            }
        }
        kernel::OP_IMMEDIATE => {
            // Backs `immediate`. Rewrites the most recently defined
            // word's own header opcode from COMPILE to RUN in place,
            // then reclaims its now-redundant code cell for the next
            // compiled token by backing DIC up onto it.
            let misc_cell = mem.reg(kernel::PWD);
            let misc = mem.get(misc_cell)?;
            let flipped = (misc & !kernel::OPCODE_MASK) | kernel::OP_RUN;
            mem.set(misc_cell, flipped)?;
            mem.set_reg(kernel::DIC, misc_cell + 1);
        }
        kernel::OP_READ => {
            return read_step(mem, channels, s, f, pc);
        }
        kernel::OP_LOAD => {
            *f = mem.get(*f)?;
        }
        kernel::OP_STORE => {
            let addr = *f;
            let value = mem.get(*s)?;
            *s -= 1;
            mem.set(addr, value)?;
            *f = mem.get(*s)?;
            *s -= 1;
        }
        kernel::OP_SUB => binop(mem, s, f, |a, b| a.wrapping_sub(b))?,
        kernel::OP_ADD => binop(mem, s, f, |a, b| a.wrapping_add(b))?,
        kernel::OP_AND => binop(mem, s, f, |a, b| a & b)?,
        kernel::OP_OR => binop(mem, s, f, |a, b| a | b)?,
        kernel::OP_XOR => binop(mem, s, f, |a, b| a ^ b)?,
        kernel::OP_INV => *f = !*f,
        kernel::OP_SHL => binop_unsigned(mem, s, f, |a, b| a.wrapping_shl(b as u32))?,
        kernel::OP_SHR => binop_unsigned(mem, s, f, |a, b| a.wrapping_shr(b as u32))?,
        kernel::OP_MUL => binop(mem, s, f, |a, b| a.wrapping_mul(b))?,
        kernel::OP_DIV => {
            if *f == 0 {
                eprintln!("( error \"x/0\" )");
            } else {
                let a = mem.get(*s)?;
                *s -= 1;
                *f = ((a as u64) / (*f as u64)) as i64;
            }
        }
        kernel::OP_LESS => binop_unsigned(mem, s, f, |a, b| if a < b { 1 } else { 0 })?,
        kernel::OP_MORE => binop_unsigned(mem, s, f, |a, b| if a > b { 1 } else { 0 })?,
        kernel::OP_EQUAL => binop(mem, s, f, |a, b| if a == b { 1 } else { 0 })?,
        kernel::OP_EXIT => {
            let rstk = mem.reg(kernel::RSTK);
            *i = mem.get(rstk)?;
            mem.set_reg(kernel::RSTK, rstk - 1);
        }
        kernel::OP_BRANCH => {
            let offset = mem.get(*i)?;
            *i += offset;
        }
        kernel::OP_QBRANCH => {
            if *f == 0 {
                let offset = mem.get(*i)?;
                *i += offset;
            } else {
                *i += 1;
            }
            *f = mem.get(*s)?;
            *s -= 1;
        }
        kernel::OP_EMIT => {
            let fout = mem.reg(kernel::FOUT);
            channels.write_byte(fout, (*f & 0xFF) as u8);
            *f = mem.get(*s)?;
            *s -= 1;
        }
        kernel::OP_KEY => {
            *s += 1;
            mem.set(*s, *f)?;
            *f = get_char_or(mem, channels);
        }
        kernel::OP_FROMR => {
            *s += 1;
            mem.set(*s, *f)?;
            let rstk = mem.reg(kernel::RSTK);
            *f = mem.get(rstk)?;
            mem.set_reg(kernel::RSTK, rstk - 1);
        }
        kernel::OP_TOR => {
            let rstk = mem.reg(kernel::RSTK) + 1;
            mem.set_reg(kernel::RSTK, rstk);
            mem.set(rstk, *f)?;
            *f = mem.get(*s)?;
            *s -= 1;
        }
        kernel::OP_PNUM => {
            let base = mem.reg(kernel::BASE);
            let fout = mem.reg(kernel::FOUT);
            let text = format_cell(*f, base);
            channels.write_all(fout, text.as_bytes());
            *f = mem.get(*s)?;
            *s -= 1;
        }
        kernel::OP_COMMA => {
            let dic = mem.reg(kernel::DIC);
            mem.set(dic, *f)?;
            mem.set_reg(kernel::DIC, dic + 1);
            *f = mem.get(*s)?;
            *s -= 1;
        }
        kernel::OP_SWAP => {
            let top = mem.get(*s)?;
            mem.set(*s, *f)?;
            *f = top;
        }
        kernel::OP_DUP => {
            *s += 1;
            mem.set(*s, *f)?;
        }
        kernel::OP_DROP => {
            *f = mem.get(*s)?;
            *s -= 1;
        }
        kernel::OP_OVER => {
            let second = mem.get(*s)?;
            *s += 1;
            mem.set(*s, *f)?;
            *f = second;
        }
        kernel::OP_TAIL => {
            let rstk = mem.reg(kernel::RSTK);
            mem.set_reg(kernel::RSTK, rstk - 1);
        }
        kernel::OP_BSAVE => {
            let id = *f;
            let poffset = mem.get(*s)?;
            *s -= 1;
            *f = blockio(mem, poffset, id, true);
        }
        kernel::OP_BLOAD => {
            let id = *f;
            let poffset = mem.get(*s)?;
            *s -= 1;
            *f = blockio(mem, poffset, id, false);
        }
        kernel::OP_FIND => {
            *s += 1;
            mem.set(*s, *f)?;
            match reader::get_word(mem, channels) {
                None => return Ok(StepOutcome::EndOfInput),
                Some(word) => {
                    let w = dictionary::find(mem, &word)?;
                    *f = if w < mem.dictionary_start() { 0 } else { w as Cell };
                }
            }
        }
        kernel::OP_PRINT => {
            let fout = mem.reg(kernel::FOUT);
            let bytes = mem.read_cstring_at_cell(*f as usize)?;
            channels.write_all(fout, &bytes);
            *f = mem.get(*s)?;
            *s -= 1;
        }
        kernel::OP_DEPTH => {
            let depth = *s - mem.stack_region_start() as Cell;
            *s += 1;
            mem.set(*s, *f)?;
            *f = depth;
        }
        kernel::OP_CLOCK => {
            *s += 1;
            mem.set(*s, *f)?;
            *f = now_ms() - mem.reg(kernel::START_TIME);
        }
        op => return Err(VmFault::IllegalOpcode(op)),
    }
    Ok(StepOutcome::NextFromStream)
}

/// The outer-interpreter step: read one token, look it up, and either
/// execute/compile it or treat it as a number. See `SPEC_FULL.md` §4.4.
fn read_step(
    mem: &mut Memory,
    channels: &mut Channels,
    s: &mut Cell,
    f: &mut Cell,
    pc: &mut Cell,
) -> Result<StepOutcome, VmFault> {
    let word = match reader::get_word(mem, channels) {
        None => return Ok(StepOutcome::EndOfInput),
        Some(w) => w,
    };

    let misc_cell = dictionary::find(mem, &word)?;
    if misc_cell > 1 {
        let misc = mem.get_usize(misc_cell)?;
        let (_, opcode, _hidden) = dictionary::unpack_misc(misc);
        let mut target = misc_cell as Cell;
        if mem.reg(kernel::STATE) == 0 && opcode == kernel::OP_COMPILE {
            // Command mode, ordinary word: step past its COMPILE
            // wrapper onto the code cell holding its real opcode, so
            // it runs now instead of compiling a reference to itself.
            target += 1;
        }
        *pc = target;
        return Ok(StepOutcome::ReenterAt);
    }

    match reader::parse_number(&word, mem.reg(kernel::BASE)) {
        None => {
            eprintln!("( error \"{word} is not a word\" )");
        }
        Some(value) => {
            if mem.reg(kernel::STATE) != 0 {
                let dic = mem.reg(kernel::DIC);
                mem.set(dic, kernel::OP_PUSH)?;
                mem.set(dic + 1, value)?;
                mem.set_reg(kernel::DIC, dic + 2);
            } else {
                *s += 1;
                mem.set(*s, *f)?;
                *f = value;
            }
        }
    }
    Ok(StepOutcome::NextFromStream)
}

fn binop(
    mem: &mut Memory,
    s: &mut Cell,
    f: &mut Cell,
    op: impl FnOnce(Cell, Cell) -> Cell,
) -> Result<(), VmFault> {
    let a = mem.get(*s)?;
    *s -= 1;
    *f = op(a, *f);
    Ok(())
}

fn binop_unsigned(
    mem: &mut Memory,
    s: &mut Cell,
    f: &mut Cell,
    op: impl FnOnce(u64, u64) -> u64,
) -> Result<(), VmFault> {
    let a = mem.get(*s)?;
    *s -= 1;
    *f = op(a as u64, *f as u64) as i64;
    Ok(())
}

fn get_char_or(mem: &mut Memory, channels: &mut Channels) -> Cell {
    match reader::get_char(mem, channels) {
        Some(b) => b as Cell,
        None => -1,
    }
}

/// Renders `value` under `base`: general radix 2..36 (lowercase digits
/// past 9), with base 16 zero-padded to `2 * CELL_WIDTH` hex digits,
/// per the resolved Open Question in `SPEC_FULL.md` §9.
fn format_cell(value: Cell, base: Cell) -> String {
    if base == 16 {
        return format!("0x{:0width$x}", value as u64, width = kernel::CELL_WIDTH * 2);
    }
    let radix = if (2..=36).contains(&base) { base as u32 } else { 10 };
    if radix == 10 {
        return (value as u64).to_string();
    }
    to_radix(value as u64, radix)
}

fn to_radix(mut value: u64, radix: u32) -> String {
    const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if value == 0 {
        return "0".to_string();
    }
    let mut buf = Vec::new();
    while value > 0 {
        buf.push(DIGITS[(value % radix as u64) as usize]);
        value /= radix as u64;
    }
    buf.reverse();
    String::from_utf8(buf).unwrap()
}

/// `BSAVE`/`BLOAD`: 1024-byte blocks addressed by a 16-bit id, named
/// `XXXX.blk` in the current working directory. Returns 0 on success,
/// -1 on any failure (I/O error, or the range falling outside memory).
/// Failure is non-fatal; the caller only sees the status on the stack.
fn blockio(mem: &mut Memory, poffset: Cell, id: Cell, write: bool) -> Cell {
    if poffset < 0 {
        return -1;
    }
    let poffset = poffset as usize;
    let name = format!("{:04x}.blk", (id & 0xFFFF) as u16);
    let result = if write {
        mem.read_byte_range(poffset, kernel::BLOCK_SIZE)
            .and_then(|bytes| fs::write(&name, bytes).map_err(io_as_fault))
    } else {
        fs::read(&name)
            .map_err(io_as_fault)
            .and_then(|bytes| {
                if bytes.len() != kernel::BLOCK_SIZE {
                    Err(VmFault::OutOfBounds {
                        index: poffset as i64,
                        core_size: mem.core_size(),
                    })
                } else {
                    mem.write_byte_range(poffset, &bytes)
                }
            })
    };
    match result {
        Ok(()) => 0,
        Err(_) => -1,
    }
}

fn io_as_fault(_e: std::io::Error) -> VmFault {
    // blockio only uses this to fold an I/O error into the same -1
    // status as an out-of-range offset; the fault value itself is
    // discarded by the caller.
    VmFault::OutOfBounds { index: -1, core_size: 0 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_cell_base_ten_is_unpadded_decimal() {
        assert_eq!(format_cell(42, 10), "42");
    }

    #[test]
    fn format_cell_base_sixteen_is_zero_padded_hex() {
        assert_eq!(format_cell(255, 16), format!("0x{:016x}", 255));
    }

    #[test]
    fn format_cell_general_radix() {
        assert_eq!(format_cell(10, 2), "1010");
        assert_eq!(format_cell(35, 36), "z");
    }
}
