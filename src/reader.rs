//! Word-at-a-time token reader and number parsing.
//!
//! `FIN`/`FOUT`/`STDIN`/`STDOUT`/`STDERR` store small integer ids into
//! [`Channels`] rather than raw host pointers (see `SPEC_FULL.md`,
//! "Host pointers in cells"); `SIN` stores an id into the same
//! structure's string-buffer table.

use std::fs::File;
use std::io::{BufReader, Read, Write};

use crate::error::VmFault;
use crate::kernel::{self, Cell, Memory};
use crate::terminal;

pub enum Channel {
    Stdin,
    Stdout,
    Stderr,
    InFile(BufReader<File>),
    OutFile(File),
}

impl Channel {
    fn read_byte(&mut self) -> std::io::Result<Option<u8>> {
        match self {
            Channel::Stdin => {
                // `KEY` reads one byte at a time; without raw mode a
                // real terminal only yields bytes line-buffered after
                // Enter. Idempotent and a no-op when stdin isn't a tty
                // (piped input), so this is safe to call per byte.
                terminal::enable_raw();
                terminal::read_key_byte()
            }
            Channel::InFile(r) => {
                let mut buf = [0u8; 1];
                let n = r.read(&mut buf)?;
                Ok(if n == 0 { None } else { Some(buf[0]) })
            }
            _ => Ok(None),
        }
    }

    fn write_byte(&mut self, b: u8) -> std::io::Result<()> {
        match self {
            Channel::Stdout => std::io::stdout().write_all(&[b]),
            Channel::Stderr => std::io::stderr().write_all(&[b]),
            Channel::OutFile(f) => f.write_all(&[b]),
            _ => Ok(()),
        }
    }

    fn write_all(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        match self {
            Channel::Stdout => std::io::stdout().write_all(bytes),
            Channel::Stderr => std::io::stderr().write_all(bytes),
            Channel::OutFile(f) => f.write_all(bytes),
            _ => Ok(()),
        }
    }
}

/// Owns the I/O channel table and string input buffers a running
/// instance's registers index into.
pub struct Channels {
    io: Vec<Channel>,
    strings: Vec<Vec<u8>>,
}

impl Channels {
    pub fn new() -> Channels {
        Channels {
            io: vec![Channel::Stdin, Channel::Stdout, Channel::Stderr],
            strings: Vec::new(),
        }
    }

    pub const STDIN_ID: Cell = 0;
    pub const STDOUT_ID: Cell = 1;
    pub const STDERR_ID: Cell = 2;

    pub fn open_input_file(&mut self, path: &std::path::Path) -> std::io::Result<Cell> {
        let file = File::open(path)?;
        self.io.push(Channel::InFile(BufReader::new(file)));
        Ok((self.io.len() - 1) as Cell)
    }

    pub fn open_output_file(&mut self, path: &std::path::Path) -> std::io::Result<Cell> {
        let file = File::create(path)?;
        self.io.push(Channel::OutFile(file));
        Ok((self.io.len() - 1) as Cell)
    }

    pub fn push_string(&mut self, s: &str) -> Cell {
        let mut bytes = s.as_bytes().to_vec();
        bytes.push(0);
        self.strings.push(bytes);
        (self.strings.len() - 1) as Cell
    }

    fn channel_mut(&mut self, id: Cell) -> Option<&mut Channel> {
        self.io.get_mut(id.max(0) as usize)
    }

    pub fn read_byte(&mut self, id: Cell) -> Option<u8> {
        self.channel_mut(id).and_then(|c| c.read_byte().ok().flatten())
    }

    pub fn write_byte(&mut self, id: Cell, b: u8) {
        if let Some(c) = self.channel_mut(id) {
            let _ = c.write_byte(b);
        }
    }

    pub fn write_all(&mut self, id: Cell, bytes: &[u8]) {
        if let Some(c) = self.channel_mut(id) {
            let _ = c.write_all(bytes);
        }
    }

    fn string_byte(&self, sin: Cell, sidx: usize) -> Option<u8> {
        self.strings
            .get(sin.max(0) as usize)
            .and_then(|s| s.get(sidx).copied())
    }
}

impl Drop for Channels {
    fn drop(&mut self) {
        // Leaves the terminal in raw mode after exit if this instance
        // ever turned it on for an interactive `KEY` read.
        terminal::disable_raw();
    }
}

impl Default for Channels {
    fn default() -> Self {
        Self::new()
    }
}

/// Reads the next input byte per `SOURCE_ID`/`FIN`/`SIN`/`SIDX`/`SLEN`.
/// Returns `None` at end of input.
pub fn get_char(mem: &mut Memory, channels: &mut Channels) -> Option<u8> {
    if mem.reg(kernel::SOURCE_ID) == 0 {
        channels.read_byte(mem.reg(kernel::FIN))
    } else {
        let sidx = mem.reg(kernel::SIDX);
        let slen = mem.reg(kernel::SLEN);
        if sidx >= slen {
            return None;
        }
        let b = channels.string_byte(mem.reg(kernel::SIN), sidx as usize);
        mem.set_reg(kernel::SIDX, sidx + 1);
        b
    }
}

/// Reads a whitespace-delimited token up to `MAX_WORD_LENGTH - 1`
/// bytes. Returns `None` at end of input before any non-whitespace
/// byte is seen.
pub fn get_word(mem: &mut Memory, channels: &mut Channels) -> Option<String> {
    let mut byte = loop {
        match get_char(mem, channels) {
            Some(b) if b.is_ascii_whitespace() => continue,
            Some(b) => break b,
            None => return None,
        }
    };
    let mut out = Vec::with_capacity(kernel::MAX_WORD_LENGTH);
    loop {
        if out.len() < kernel::MAX_WORD_LENGTH - 1 {
            out.push(byte);
        }
        match get_char(mem, channels) {
            Some(b) if b.is_ascii_whitespace() => break,
            Some(b) => byte = b,
            None => break,
        }
    }
    Some(String::from_utf8_lossy(&out).into_owned())
}

/// Parses `token` as a signed integer under `base`. `base == 0` means
/// "accept C-style prefixes": `0x`/`0X` for hex, a bare leading `0` for
/// octal, decimal otherwise. Valid bases outside the `0`-means-auto
/// sentinel are restricted to `2..=26` per the numeric contract.
pub fn parse_number(token: &str, base: Cell) -> Option<Cell> {
    if token.is_empty() {
        return None;
    }
    let (neg, digits) = match token.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, token),
    };
    if digits.is_empty() {
        return None;
    }
    let magnitude = if base == 0 {
        if let Some(hex) = digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
            i64::from_str_radix(hex, 16).ok()
        } else if digits.len() > 1 && digits.starts_with('0') {
            i64::from_str_radix(&digits[1..], 8).ok()
        } else {
            digits.parse::<i64>().ok()
        }
    } else if (2..=26).contains(&base) {
        i64::from_str_radix(digits, base as u32).ok()
    } else {
        None
    }?;
    Some(if neg { -magnitude } else { magnitude })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup_string_input(mem: &mut Memory, channels: &mut Channels, text: &str) {
        let id = channels.push_string(text);
        mem.set_reg(kernel::SOURCE_ID, -1);
        mem.set_reg(kernel::SIN, id);
        mem.set_reg(kernel::SIDX, 0);
        mem.set_reg(kernel::SLEN, text.len() as Cell);
    }

    #[test]
    fn get_word_reads_space_delimited_tokens() {
        let mut mem = Memory::new(kernel::MINIMUM_CORE_SIZE);
        let mut channels = Channels::new();
        setup_string_input(&mut mem, &mut channels, "dup swap  drop");
        assert_eq!(get_word(&mut mem, &mut channels).as_deref(), Some("dup"));
        assert_eq!(get_word(&mut mem, &mut channels).as_deref(), Some("swap"));
        assert_eq!(get_word(&mut mem, &mut channels).as_deref(), Some("drop"));
        assert_eq!(get_word(&mut mem, &mut channels), None);
    }

    #[test]
    fn parse_number_handles_negative_and_base() {
        assert_eq!(parse_number("42", 10), Some(42));
        assert_eq!(parse_number("-42", 10), Some(-42));
        assert_eq!(parse_number("ff", 16), Some(255));
        assert_eq!(parse_number("0xff", 0), Some(255));
        assert_eq!(parse_number("010", 0), Some(8));
        assert_eq!(parse_number("notanumber", 10), None);
    }

    #[test]
    fn parse_number_rejects_bases_outside_the_narrow_range() {
        assert_eq!(parse_number("z", 36), None);
        assert_eq!(parse_number("1", 1), None);
    }
}
