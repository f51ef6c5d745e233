//! Debug directory records and CodeView (RSDS/NB10) parsing, plus MSDL
//! symbol-URL derivation (§4.9, §4.10).
//!
//! Directory record shape and the CodeView dispatch are grounded in the
//! pack's `m4b-goblin` PE reader (`pe-debug.rs`), including its habit of
//! logging a `warn!` per malformed record instead of failing the whole scan.

use log::{debug, warn};

use crate::error::Result;
use crate::headers::{DataDirectory, SectionHeader};
use crate::reader::ByteSpan;
use crate::sections::rva_to_offset;

const DEBUG_DIRECTORY_SIZE: usize = 28;

/// `IMAGE_DEBUG_TYPE_*` (§2A supplemented feature: exposed so callers can
/// tell a `POGO`/`REPRO`/`VC_FEATURE` record apart from CodeView without this
/// parser interpreting those payloads).
pub const IMAGE_DEBUG_TYPE_UNKNOWN: u32 = 0;
pub const IMAGE_DEBUG_TYPE_COFF: u32 = 1;
pub const IMAGE_DEBUG_TYPE_CODEVIEW: u32 = 2;
pub const IMAGE_DEBUG_TYPE_FPO: u32 = 3;
pub const IMAGE_DEBUG_TYPE_MISC: u32 = 4;
pub const IMAGE_DEBUG_TYPE_EXCEPTION: u32 = 5;
pub const IMAGE_DEBUG_TYPE_FIXUP: u32 = 6;
pub const IMAGE_DEBUG_TYPE_OMAP_TO_SRC: u32 = 7;
pub const IMAGE_DEBUG_TYPE_OMAP_FROM_SRC: u32 = 8;
pub const IMAGE_DEBUG_TYPE_BORLAND: u32 = 9;
pub const IMAGE_DEBUG_TYPE_CLSID: u32 = 11;
pub const IMAGE_DEBUG_TYPE_VC_FEATURE: u32 = 12;
pub const IMAGE_DEBUG_TYPE_POGO: u32 = 13;
pub const IMAGE_DEBUG_TYPE_ILTCG: u32 = 14;
pub const IMAGE_DEBUG_TYPE_MPX: u32 = 15;
pub const IMAGE_DEBUG_TYPE_REPRO: u32 = 16;

#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DebugDirectoryEntry {
    pub characteristics: u32,
    pub time_date_stamp: u32,
    pub major_version: u16,
    pub minor_version: u16,
    pub data_type: u32,
    pub size_of_data: u32,
    pub address_of_raw_data: u32,
    pub pointer_to_raw_data: u32,
    pub payload: Option<Vec<u8>>,
    pub code_view: Option<CodeView>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CodeView {
    Rsds { guid: [u8; 16], age: u32, path: String },
    Nb10 { signature: u32, age: u32, path: String },
}

impl CodeView {
    pub fn path(&self) -> &str {
        match self {
            CodeView::Rsds { path, .. } => path,
            CodeView::Nb10 { path, .. } => path,
        }
    }
}

fn parse_codeview(span: ByteSpan<'_>, payload_offset: usize, payload_len: usize) -> Option<CodeView> {
    if payload_len < 4 {
        return None;
    }
    let magic = span.read_bytes_at(payload_offset, 4).ok()?;

    match magic {
        b"RSDS" => {
            if payload_len < 25 {
                warn!("RSDS record at {payload_offset:#x} shorter than expected, skipping");
                return None;
            }
            let guid = span.read_bytes_at(payload_offset + 4, 16).ok()?;
            let mut guid_arr = [0u8; 16];
            guid_arr.copy_from_slice(guid);
            let age = span.read_u32_at(payload_offset + 20).ok()?;
            let path = span.read_cstr_at(payload_offset + 24).ok()?;
            Some(CodeView::Rsds {
                guid: guid_arr,
                age,
                path,
            })
        }
        b"NB10" => {
            if payload_len < 17 {
                warn!("NB10 record at {payload_offset:#x} shorter than expected, skipping");
                return None;
            }
            let _offset_field = span.read_u32_at(payload_offset + 4).ok()?;
            let signature = span.read_u32_at(payload_offset + 8).ok()?;
            let age = span.read_u32_at(payload_offset + 12).ok()?;
            let path = span.read_cstr_at(payload_offset + 16).ok()?;
            Some(CodeView::Nb10 { signature, age, path })
        }
        _ => None,
    }
}

pub fn parse_debug_directory(
    span: ByteSpan<'_>,
    sections: &[SectionHeader],
    directory: DataDirectory,
) -> Result<Vec<DebugDirectoryEntry>> {
    if !directory.is_present() {
        return Ok(Vec::new());
    }

    let start = rva_to_offset(sections, directory.virtual_address)?;
    let count = directory.size as usize / DEBUG_DIRECTORY_SIZE;
    let mut entries = Vec::with_capacity(count);

    for i in 0..count {
        let offset = start + i * DEBUG_DIRECTORY_SIZE;
        let characteristics = span.read_u32_at(offset)?;
        let time_date_stamp = span.read_u32_at(offset + 4)?;
        let major_version = span.read_u16_at(offset + 8)?;
        let minor_version = span.read_u16_at(offset + 10)?;
        let data_type = span.read_u32_at(offset + 12)?;
        let size_of_data = span.read_u32_at(offset + 16)?;
        let address_of_raw_data = span.read_u32_at(offset + 20)?;
        let pointer_to_raw_data = span.read_u32_at(offset + 24)?;

        let payload = if pointer_to_raw_data != 0 && size_of_data != 0 {
            span.read_bytes_at(pointer_to_raw_data as usize, size_of_data as usize)
                .ok()
                .map(|bytes| bytes.to_vec())
        } else {
            None
        };

        let code_view = if data_type == IMAGE_DEBUG_TYPE_CODEVIEW && pointer_to_raw_data != 0 {
            parse_codeview(span, pointer_to_raw_data as usize, size_of_data as usize)
        } else {
            None
        };

        debug!("debug directory entry {i}: type {data_type} at offset {offset:#x}");

        entries.push(DebugDirectoryEntry {
            characteristics,
            time_date_stamp,
            major_version,
            minor_version,
            data_type,
            size_of_data,
            address_of_raw_data,
            pointer_to_raw_data,
            payload,
            code_view,
        });
    }

    Ok(entries)
}

/// First usable CodeView record's raw embedded path.
pub fn pdb_path(entries: &[DebugDirectoryEntry]) -> Option<&str> {
    entries
        .iter()
        .find_map(|entry| entry.code_view.as_ref())
        .map(CodeView::path)
}

fn basename(path: &str) -> &str {
    path.rsplit(['\\', '/']).next().unwrap_or(path)
}

fn format_guid(guid: &[u8; 16]) -> String {
    let d1 = u32::from_le_bytes([guid[0], guid[1], guid[2], guid[3]]);
    let d2 = u16::from_le_bytes([guid[4], guid[5]]);
    let d3 = u16::from_le_bytes([guid[6], guid[7]]);
    format!(
        "{d1:08X}{d2:04X}{d3:04X}{:02X}{:02X}{:02X}{:02X}{:02X}{:02X}{:02X}{:02X}",
        guid[8], guid[9], guid[10], guid[11], guid[12], guid[13], guid[14], guid[15],
    )
}

/// MSDL symbol-server URL for the first RSDS record, falling back to the
/// first NB10 record's signature as a GUID stand-in. `None` if no CodeView
/// record is usable.
pub fn pdb_url(entries: &[DebugDirectoryEntry]) -> Option<String> {
    for entry in entries {
        match &entry.code_view {
            Some(CodeView::Rsds { guid, age, path }) => {
                let filename = basename(path);
                return Some(format!(
                    "https://msdl.microsoft.com/download/symbols/{filename}/{}{age}/{filename}",
                    format_guid(guid)
                ));
            }
            Some(CodeView::Nb10 { signature, age, path }) => {
                let filename = basename(path);
                return Some(format!(
                    "https://msdl.microsoft.com/download/symbols/{filename}/{signature:08X}{age}/{filename}"
                ));
            }
            None => continue,
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::{LittleEndian, WriteBytesExt};
    use std::io::Write;

    fn section(name: &str, rva: u32, raw_ptr: u32, size: u32) -> SectionHeader {
        SectionHeader {
            name: name.to_string(),
            virtual_size: size,
            virtual_address: rva,
            size_of_raw_data: size,
            pointer_to_raw_data: raw_ptr,
            pointer_to_relocations: 0,
            pointer_to_line_numbers: 0,
            number_of_relocations: 0,
            number_of_line_numbers: 0,
            characteristics: 0,
        }
    }

    #[test]
    fn rsds_url_matches_spec_s5() {
        let sections = vec![section(".rdata", 0x4000, 0x4000, 0x200)];
        let mut buf = vec![0u8; 0x4200];

        let dir_off = 0x4000usize;
        let payload_off = 0x4100usize;

        (&mut buf[dir_off..dir_off + 4]).write_u32::<LittleEndian>(0).unwrap(); // characteristics
        (&mut buf[dir_off + 4..dir_off + 8]).write_u32::<LittleEndian>(0).unwrap();
        (&mut buf[dir_off + 8..dir_off + 10]).write_u16::<LittleEndian>(0).unwrap();
        (&mut buf[dir_off + 10..dir_off + 12]).write_u16::<LittleEndian>(0).unwrap();
        (&mut buf[dir_off + 12..dir_off + 16])
            .write_u32::<LittleEndian>(IMAGE_DEBUG_TYPE_CODEVIEW)
            .unwrap();
        let path = b"c:\\x\\foo.pdb\0";
        let size_of_data = (24 + path.len()) as u32;
        (&mut buf[dir_off + 16..dir_off + 20])
            .write_u32::<LittleEndian>(size_of_data)
            .unwrap();
        (&mut buf[dir_off + 20..dir_off + 24]).write_u32::<LittleEndian>(0).unwrap(); // address_of_raw_data
        (&mut buf[dir_off + 24..dir_off + 28])
            .write_u32::<LittleEndian>(payload_off as u32)
            .unwrap();

        buf[payload_off..payload_off + 4].copy_from_slice(b"RSDS");
        let guid: [u8; 16] = [
            0x44, 0x33, 0x22, 0x11, // 0x11223344 LE
            0x66, 0x55, // 0x5566 LE
            0x88, 0x77, // 0x7788 LE
            0x99, 0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF, 0x00,
        ];
        buf[payload_off + 4..payload_off + 20].copy_from_slice(&guid);
        (&mut buf[payload_off + 20..payload_off + 24])
            .write_u32::<LittleEndian>(0x1A)
            .unwrap();
        buf[payload_off + 24..payload_off + 24 + path.len()].copy_from_slice(path);

        let span = ByteSpan::new(&buf);
        let directory = DataDirectory {
            virtual_address: 0x4000,
            size: DEBUG_DIRECTORY_SIZE as u32,
        };

        let entries = parse_debug_directory(span, &sections, directory).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(pdb_path(&entries), Some("c:\\x\\foo.pdb"));
        assert_eq!(
            pdb_url(&entries).as_deref(),
            Some("https://msdl.microsoft.com/download/symbols/foo.pdb/112233445566778899AABBCCDDEEFF0026/foo.pdb")
        );
    }

    #[test]
    fn absent_directory_yields_no_entries() {
        let sections = vec![section(".rdata", 0x4000, 0x4000, 0x200)];
        let buf = vec![0u8; 0x10];
        let span = ByteSpan::new(&buf);
        let entries = parse_debug_directory(span, &sections, DataDirectory::default()).unwrap();
        assert!(entries.is_empty());
    }
}
