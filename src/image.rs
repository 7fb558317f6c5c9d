//! Core image save/load: a small tagged header followed by the raw
//! memory array, host-native byte order. Images are not portable
//! across cell widths or endianness — `load_core` rejects anything
//! whose header does not match this host exactly.

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use crate::error::{ForthError, Result};
use crate::kernel::{Memory, CELL_WIDTH, MINIMUM_CORE_SIZE};

const HEADER_LEN: usize = 8;
const IMAGE_VERSION: u8 = 0x02;

#[cfg(target_endian = "little")]
const ENDIAN_TAG: u8 = 0;
#[cfg(target_endian = "big")]
const ENDIAN_TAG: u8 = 1;

fn header() -> [u8; HEADER_LEN] {
    [0xFF, b'4', b'T', b'H', CELL_WIDTH as u8, IMAGE_VERSION, ENDIAN_TAG, 0xFF]
}

/// Writes `mem` to `path` as: 8-byte header, 8-byte core size (cell
/// count, host-native byte order), then the raw memory bytes.
pub fn save_core(mem: &Memory, path: &Path) -> Result<()> {
    let mut file = File::create(path)?;
    file.write_all(&header())?;
    file.write_all(&(mem.core_size() as u64).to_ne_bytes())?;
    file.write_all(&mem.as_byte_vec())?;
    Ok(())
}

/// Reads an image previously written by `save_core`. Rejects images
/// whose header does not byte-for-byte match this host's, or whose
/// declared core size is below `MINIMUM_CORE_SIZE`.
pub fn load_core(path: &Path) -> Result<Memory> {
    let mut file = File::open(path)?;

    let mut got_header = [0u8; HEADER_LEN];
    file.read_exact(&mut got_header)?;
    if got_header != header() {
        return Err(ForthError::IncompatibleImage(format!(
            "header {got_header:02x?} does not match this host's {:02x?}",
            header()
        )));
    }

    let mut size_bytes = [0u8; 8];
    file.read_exact(&mut size_bytes)?;
    let core_size = u64::from_ne_bytes(size_bytes) as usize;
    if core_size < MINIMUM_CORE_SIZE {
        return Err(ForthError::CoreTooSmall {
            requested: core_size,
            minimum: MINIMUM_CORE_SIZE,
        });
    }

    let mut raw = vec![0u8; core_size * CELL_WIDTH];
    file.read_exact(&mut raw)?;

    let mut mem = Memory::new(core_size);
    mem.write_byte_range(0, &raw)?;
    Ok(mem)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::DEFAULT_CORE_SIZE;

    fn temp_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("threadforth-test-{}-{name}", std::process::id()))
    }

    #[test]
    fn save_then_load_round_trips_memory_contents() {
        let mut mem = Memory::new(DEFAULT_CORE_SIZE);
        mem.set_usize(100, 0x1122334455667788u64 as i64).unwrap();
        let path = temp_path("roundtrip.img");
        save_core(&mem, &path).unwrap();
        let loaded = load_core(&path).unwrap();
        assert_eq!(loaded.core_size(), mem.core_size());
        assert_eq!(loaded.get_usize(100).unwrap(), 0x1122334455667788u64 as i64);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn load_rejects_a_mismatched_header() {
        let path = temp_path("bad-header.img");
        {
            let mut file = File::create(&path).unwrap();
            file.write_all(&[0; HEADER_LEN]).unwrap();
            file.write_all(&(DEFAULT_CORE_SIZE as u64).to_ne_bytes()).unwrap();
        }
        assert!(matches!(load_core(&path), Err(ForthError::IncompatibleImage(_))));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn load_rejects_a_core_below_the_minimum() {
        let path = temp_path("too-small.img");
        {
            let mut file = File::create(&path).unwrap();
            file.write_all(&header()).unwrap();
            file.write_all(&(16u64).to_ne_bytes()).unwrap();
        }
        assert!(matches!(load_core(&path), Err(ForthError::CoreTooSmall { .. })));
        let _ = std::fs::remove_file(&path);
    }
}
