//! Base relocation block walk (§4.6).
//!
//! New module; no direct teacher counterpart, but follows the same
//! directory-driven iteration shape as [`imports`] and reuses its
//! `ByteSpan`/`rva_to_offset` plumbing.

use log::{debug, trace};

use crate::error::Result;
use crate::headers::{DataDirectory, SectionHeader};
use crate::reader::ByteSpan;
use crate::sections::rva_to_offset;

const BLOCK_HEADER_SIZE: usize = 8;

/// `IMAGE_REL_BASED_*` type nibble, kept as the raw value rather than an enum
/// since the spec only asks that it round-trip, not that it be validated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Relocation {
    pub reloc_type: u8,
    pub rva: u32,
}

#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RelocationBlock {
    pub page_rva: u32,
    pub entries: Vec<Relocation>,
}

pub fn parse_relocations(
    span: ByteSpan<'_>,
    sections: &[SectionHeader],
    directory: DataDirectory,
) -> Result<Vec<RelocationBlock>> {
    if !directory.is_present() {
        return Ok(Vec::new());
    }

    let start = rva_to_offset(sections, directory.virtual_address)?;
    let end = start + directory.size as usize;
    debug!("base relocation directory at offset {start:#x}, {} bytes", directory.size);
    let mut offset = start;
    let mut blocks = Vec::new();

    while offset + BLOCK_HEADER_SIZE <= end {
        let page_rva = span.read_u32_at(offset)?;
        let block_size = span.read_u32_at(offset + 4)? as usize;
        if block_size < BLOCK_HEADER_SIZE {
            break;
        }

        let entry_count = (block_size - BLOCK_HEADER_SIZE) / 2;
        let mut entries = Vec::with_capacity(entry_count);
        let mut entry_offset = offset + BLOCK_HEADER_SIZE;

        for _ in 0..entry_count {
            let packed = span.read_u16_at(entry_offset)?;
            let reloc_type = (packed >> 12) as u8;
            let page_offset = (packed & 0x0FFF) as u32;
            // IMAGE_REL_BASED_ABSOLUTE (0) is a padding entry the spec still
            // reports, consistent with "exposes raw fields unconditionally".
            entries.push(Relocation {
                reloc_type,
                rva: page_rva + page_offset,
            });
            entry_offset += 2;
        }

        trace!("relocation block at page {page_rva:#x}: {entry_count} entries");
        blocks.push(RelocationBlock { page_rva, entries });
        offset += block_size;
    }

    Ok(blocks)
}
