//! Import descriptor / ILT / hint-name table walk (§4.5).
//!
//! Grounded on the teacher's `parse_import_descriptors`/`parse_dll_names`/
//! `ImportLookupEntry`, generalized to emit the per-entry IAT thunk RVA the
//! spec requires and to return the DLL name alongside each descriptor instead
//! of as a separate parallel vector.

use log::{debug, trace};

use crate::error::Result;
use crate::headers::{DataDirectory, SectionHeader};
use crate::reader::ByteSpan;
use crate::sections::rva_to_offset;

const IMPORT_DESCRIPTOR_SIZE: usize = 20;
const ORDINAL_FLAG: u64 = 0x8000_0000_0000_0000;
const HINT_NAME_MASK: u64 = 0x7FFF_FFFF;
/// Teacher's `parse_import_descriptors` bails out past this many descriptors
/// as a guard against a corrupt, never-zero ILT; kept here for the same reason.
const MAX_DESCRIPTORS: usize = 256;

#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ImportEntry {
    pub ordinal: Option<u16>,
    pub name: Option<String>,
    pub thunk_rva: u32,
}

#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ImportDescriptor {
    pub dll_name: String,
    pub import_lookup_table_rva: u32,
    pub import_address_table_rva: u32,
    pub entries: Vec<ImportEntry>,
}

pub fn parse_imports(
    span: ByteSpan<'_>,
    sections: &[SectionHeader],
    directory: DataDirectory,
) -> Result<Vec<ImportDescriptor>> {
    if !directory.is_present() {
        return Ok(Vec::new());
    }

    let mut offset = rva_to_offset(sections, directory.virtual_address)?;
    let mut descriptors = Vec::new();

    loop {
        if descriptors.len() >= MAX_DESCRIPTORS {
            break;
        }

        if offset + IMPORT_DESCRIPTOR_SIZE > span.len() {
            // truncated directory with no trailing zeroed terminator: stop
            // gracefully rather than propagate BufferOverflow (§4.5).
            break;
        }

        let import_lookup_table_rva = span.read_u32_at(offset)?;
        let _time_date_stamp = span.read_u32_at(offset + 4)?;
        let _forwarder_chain = span.read_u32_at(offset + 8)?;
        let name_rva = span.read_u32_at(offset + 12)?;
        let import_address_table_rva = span.read_u32_at(offset + 16)?;

        if import_lookup_table_rva == 0 {
            break;
        }

        let dll_name = span.read_cstr_at(rva_to_offset(sections, name_rva)?)?;
        let entries = parse_ilt(span, sections, import_lookup_table_rva, import_address_table_rva)?;
        debug!(
            "import descriptor for {dll_name:?}: {} entries at offset {offset:#x}",
            entries.len()
        );

        descriptors.push(ImportDescriptor {
            dll_name,
            import_lookup_table_rva,
            import_address_table_rva,
            entries,
        });

        offset += IMPORT_DESCRIPTOR_SIZE;
    }

    Ok(descriptors)
}

fn parse_ilt(
    span: ByteSpan<'_>,
    sections: &[SectionHeader],
    ilt_rva: u32,
    iat_rva: u32,
) -> Result<Vec<ImportEntry>> {
    let mut ilt_offset = rva_to_offset(sections, ilt_rva)?;
    let mut entries = Vec::new();
    let mut index: u32 = 0;

    loop {
        let raw = span.read_u64_at(ilt_offset)?;
        if raw == 0 {
            break;
        }

        let thunk_rva = iat_rva + index * 8;

        let entry = if raw & ORDINAL_FLAG != 0 {
            ImportEntry {
                ordinal: Some((raw & 0xFFFF) as u16),
                name: None,
                thunk_rva,
            }
        } else {
            let hint_name_rva = (raw & HINT_NAME_MASK) as u32;
            let hint_name_offset = rva_to_offset(sections, hint_name_rva)?;
            // skip the 2-byte hint, then read the NUL-terminated name
            let name = span.read_cstr_at(hint_name_offset + 2)?;
            trace!("name import {name:?} at thunk rva {thunk_rva:#x}");
            ImportEntry {
                ordinal: None,
                name: Some(name),
                thunk_rva,
            }
        };

        entries.push(entry);
        index += 1;
        ilt_offset += 8;
    }

    Ok(entries)
}
