//! Error kinds returned by the parser.
//!
//! Fatal kinds (`NotPE`, `BadNtSignature`, `UnsupportedMachine`,
//! `UnsupportedOptionalMagic`) can only come out of construction. The rest
//! (`BufferOverflow`, `RvaUnmapped`, `SectionNotFound`, `Truncated`) can come
//! out of any query and abort just that call; sibling accessors stay usable.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("failed to read image from disk: {message}")]
    Io { message: String },

    #[error("not a PE image: DOS magic mismatch")]
    NotPE,

    #[error("bad NT signature at e_lfanew offset {offset:#x}")]
    BadNtSignature { offset: usize },

    #[error("unsupported machine type {machine:#06x} (only IMAGE_FILE_MACHINE_AMD64 0x8664 is supported)")]
    UnsupportedMachine { machine: u16 },

    #[error("unsupported optional header magic {magic:#06x} (only PE32+ 0x20b is supported)")]
    UnsupportedOptionalMagic { magic: u16 },

    #[error("read of {size} byte(s) at offset {offset:#x} overflows the {buffer_len} byte buffer")]
    BufferOverflow {
        offset: usize,
        size: usize,
        buffer_len: usize,
    },

    #[error("rva {rva:#x} does not map into any section")]
    RvaUnmapped { rva: u32 },

    #[error("no section named {name:?} found")]
    SectionNotFound { name: String },

    #[error("no NUL terminator found before the end of the buffer, scanning from offset {offset:#x}")]
    Truncated { offset: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_offending_value() {
        assert!(Error::RvaUnmapped { rva: 0x1234 }.to_string().contains("1234"));
        assert!(Error::SectionNotFound {
            name: ".xyz".to_string()
        }
        .to_string()
        .contains(".xyz"));
        assert!(Error::Truncated { offset: 0x42 }.to_string().contains("42"));
    }
}
