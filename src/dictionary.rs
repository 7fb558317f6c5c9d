//! Word headers and the `find` lookup.

use crate::error::VmFault;
use crate::kernel::{self, Cell, Memory};

/// Appends a header for `name` with the given opcode, linking it to
/// the current `PWD` chain, and advances `DIC`/`PWD`. Returns the
/// offset of the new MISC cell.
pub fn compile_header(mem: &mut Memory, name: &str, opcode: Cell) -> Result<usize, VmFault> {
    let dic = mem.reg(kernel::DIC) as usize;
    let name_cells = mem.write_bytes(dic, name.as_bytes())?;
    let link_cell = dic + name_cells;
    let misc_cell = link_cell + 1;

    mem.set_usize(link_cell, mem.reg(kernel::PWD))?;
    let misc = ((name_cells as i64) << 8) | (opcode & kernel::OPCODE_MASK);
    mem.set_usize(misc_cell, misc)?;

    mem.set_reg(kernel::PWD, misc_cell as Cell);
    mem.set_reg(kernel::DIC, (misc_cell + 1) as Cell);
    Ok(misc_cell)
}

/// Splits a MISC cell into `(name_len_in_cells, opcode, hidden)`.
/// `opcode` is either `OP_COMPILE` (an ordinary word: compiled-in when
/// the outer interpreter is in compile mode, executed directly in
/// command mode) or `OP_RUN` (an immediate word: always executed). The
/// cell right after this one holds the word's real operative value —
/// a raw primitive opcode for a bootstrap wrapper, or `OP_RUN` again
/// for a colon-defined word, whose body begins the cell after that.
pub fn unpack_misc(misc: Cell) -> (usize, Cell, bool) {
    let opcode = misc & kernel::OPCODE_MASK;
    let hidden = misc & kernel::HIDDEN_BIT != 0;
    let len = ((misc >> 8) & 0xFF) as usize;
    (len, opcode, hidden)
}

fn name_at(mem: &Memory, misc_cell: usize, name_cells: usize) -> Result<Vec<u8>, VmFault> {
    let name_start = misc_cell - name_cells - 1;
    let mut raw = mem.read_bytes(name_start, name_cells)?;
    if let Some(nul) = raw.iter().position(|&b| b == 0) {
        raw.truncate(nul);
    }
    Ok(raw)
}

/// Case-insensitive dictionary walk starting at `PWD`, skipping hidden
/// words. Returns the MISC-cell offset of the match, or 0.
pub fn find(mem: &Memory, token: &str) -> Result<usize, VmFault> {
    let target = token.to_ascii_lowercase();
    let mut w = mem.reg(kernel::PWD) as i64;
    while w != 0 {
        let w_idx = mem.check_visible(w)?;
        let misc = mem.get_usize(w_idx)?;
        let (len, _opcode, hidden) = unpack_misc(misc);
        if !hidden {
            let name = name_at(mem, w_idx, len)?;
            if name.eq_ignore_ascii_case(target.as_bytes()) {
                if w_idx < mem.dictionary_start() {
                    return Ok(0);
                }
                return Ok(w_idx);
            }
        }
        let link_cell = w_idx - 1;
        w = mem.get_usize(link_cell)?;
    }
    Ok(0)
}

impl Memory {
    /// `find`'s walk trusts that the link chain is well-formed; this
    /// just surfaces a bounds error instead of panicking on a corrupt
    /// chain.
    fn check_visible(&self, w: i64) -> Result<usize, VmFault> {
        self.get(w).map(|_| w as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_on_empty_dictionary_returns_zero() {
        let mem = Memory::new(kernel::MINIMUM_CORE_SIZE);
        assert_eq!(find(&mem, "dup").unwrap(), 0);
    }

    #[test]
    fn compile_then_find_round_trips() {
        let mut mem = Memory::new(kernel::MINIMUM_CORE_SIZE);
        mem.set_reg(kernel::DIC, mem.dictionary_start() as Cell);
        let misc_cell = compile_header(&mut mem, "dup", kernel::OP_COMPILE).unwrap();
        assert_eq!(find(&mem, "dup").unwrap(), misc_cell);
        assert_eq!(find(&mem, "DUP").unwrap(), misc_cell);
        assert_eq!(find(&mem, "Dup").unwrap(), misc_cell);
    }

    #[test]
    fn hidden_word_is_not_found() {
        let mut mem = Memory::new(kernel::MINIMUM_CORE_SIZE);
        mem.set_reg(kernel::DIC, mem.dictionary_start() as Cell);
        let misc_cell = compile_header(&mut mem, "secret", kernel::OP_COMPILE).unwrap();
        let misc = mem.get_usize(misc_cell).unwrap();
        mem.set_usize(misc_cell, misc | kernel::HIDDEN_BIT).unwrap();
        assert_eq!(find(&mem, "secret").unwrap(), 0);
    }

    #[test]
    fn most_recently_defined_word_shadows_earlier_one() {
        let mut mem = Memory::new(kernel::MINIMUM_CORE_SIZE);
        mem.set_reg(kernel::DIC, mem.dictionary_start() as Cell);
        let first = compile_header(&mut mem, "foo", kernel::OP_COMPILE).unwrap();
        let second = compile_header(&mut mem, "foo", kernel::OP_RUN).unwrap();
        assert_ne!(first, second);
        assert_eq!(find(&mem, "foo").unwrap(), second);
    }

    #[test]
    fn find_walks_past_a_non_matching_head_to_an_earlier_word() {
        // A chain of three distinct names: the walk must follow the
        // PWD link past "clock" and "emit" without misreading either
        // header's packed name bytes as the next link offset.
        let mut mem = Memory::new(kernel::MINIMUM_CORE_SIZE);
        mem.set_reg(kernel::DIC, mem.dictionary_start() as Cell);
        let colon = compile_header(&mut mem, ":", kernel::OP_DEFINE).unwrap();
        compile_header(&mut mem, "emit", kernel::OP_COMPILE).unwrap();
        compile_header(&mut mem, "clock", kernel::OP_COMPILE).unwrap();
        assert_eq!(find(&mem, ":").unwrap(), colon);
    }
}
