//! Thin wrapper around raw-mode terminal control, used when `KEY` reads
//! single bytes from an interactive stdin rather than a file or string
//! buffer. Narrowly scoped: this is the only place `crossterm` is used.

use crossterm::terminal::{disable_raw_mode, enable_raw_mode, is_raw_mode_enabled};

/// Enables raw mode if stdin is a real terminal and it is not already
/// enabled. Returns whether this call is the one that turned it on (so
/// the caller knows whether it is responsible for disabling it again).
pub fn enable_raw() -> bool {
    match is_raw_mode_enabled() {
        Ok(true) => false,
        Ok(false) => enable_raw_mode().is_ok(),
        Err(_) => false,
    }
}

pub fn disable_raw() {
    let _ = disable_raw_mode();
}

pub fn get_raw_mode() -> bool {
    is_raw_mode_enabled().unwrap_or(false)
}

/// Reads a single byte from stdin using `crossterm`'s event stream
/// while raw mode is active, falling back to a blocking single-byte
/// read otherwise (e.g. stdin redirected from a pipe, where raw mode
/// cannot be enabled in the first place).
pub fn read_key_byte() -> std::io::Result<Option<u8>> {
    use crossterm::event::{read, Event, KeyCode};
    if get_raw_mode() {
        loop {
            match read()? {
                Event::Key(key_event) => {
                    if let KeyCode::Char(c) = key_event.code {
                        let mut buf = [0u8; 4];
                        let s = c.encode_utf8(&mut buf);
                        return Ok(Some(s.as_bytes()[0]));
                    }
                    if key_event.code == KeyCode::Enter {
                        return Ok(Some(b'\n'));
                    }
                }
                _ => continue,
            }
        }
    } else {
        use std::io::Read;
        let mut buf = [0u8; 1];
        let n = std::io::stdin().lock().read(&mut buf)?;
        if n == 0 {
            Ok(None)
        } else {
            Ok(Some(buf[0]))
        }
    }
}
