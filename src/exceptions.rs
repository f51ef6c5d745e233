//! x64 exception directory: `RUNTIME_FUNCTION` table and chained
//! `UNWIND_INFO` resolution (§4.7).
//!
//! New module; no direct teacher counterpart in the retrieval pack. Follows
//! the same `ByteSpan` + directory-offset shape as [`crate::relocations`] and
//! [`crate::imports`]; localized faults are logged via `warn!` rather than
//! surfaced, per §7.

use log::{debug, warn};

use crate::error::Result;
use crate::headers::{DataDirectory, SectionHeader};
use crate::reader::ByteSpan;
use crate::sections::rva_to_offset;

const RUNTIME_FUNCTION_SIZE: usize = 12;
const UNW_FLAG_CHAININFO: u8 = 0x4;
/// Guards against a cyclic or hostile chain (§8 property 5, §9 open question 1).
pub const MAX_CHAIN_HOPS: u32 = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RuntimeFunction {
    pub begin_rva: u32,
    pub end_rva: u32,
    pub unwind_info_rva: u32,
}

impl RuntimeFunction {
    fn parse(span: ByteSpan<'_>, offset: usize) -> Result<RuntimeFunction> {
        Ok(RuntimeFunction {
            begin_rva: span.read_u32_at(offset)?,
            end_rva: span.read_u32_at(offset + 4)?,
            unwind_info_rva: span.read_u32_at(offset + 8)?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct UnwindInfo {
    pub version: u8,
    pub flags: u8,
    pub size_of_prolog: u8,
    pub count_of_codes: u8,
    pub frame_register: u8,
    pub frame_offset: u8,
}

impl UnwindInfo {
    fn parse(span: ByteSpan<'_>, offset: usize) -> Result<UnwindInfo> {
        let byte0 = span.read_u8_at(offset)?;
        let size_of_prolog = span.read_u8_at(offset + 1)?;
        let count_of_codes = span.read_u8_at(offset + 2)?;
        let frame_byte = span.read_u8_at(offset + 3)?;
        Ok(UnwindInfo {
            version: byte0 & 0x7,
            flags: byte0 >> 3,
            size_of_prolog,
            count_of_codes,
            frame_register: frame_byte & 0xF,
            frame_offset: frame_byte >> 4,
        })
    }

    pub fn is_chained(&self) -> bool {
        self.flags & UNW_FLAG_CHAININFO != 0
    }
}

/// A resolved exception-directory entry: the (possibly chain-followed)
/// terminal `RuntimeFunction` plus its own `UnwindInfo`, when readable.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ExceptionEntry {
    pub function: RuntimeFunction,
    pub unwind_info: Option<UnwindInfo>,
    pub hops: u32,
}

pub fn parse_exceptions(
    span: ByteSpan<'_>,
    sections: &[SectionHeader],
    directory: DataDirectory,
) -> Result<Vec<ExceptionEntry>> {
    if !directory.is_present() {
        return Ok(Vec::new());
    }

    let start = rva_to_offset(sections, directory.virtual_address)?;
    let count = directory.size as usize / RUNTIME_FUNCTION_SIZE;
    debug!("exception directory at offset {start:#x}: {count} runtime functions");
    let mut entries = Vec::with_capacity(count);

    for i in 0..count {
        let offset = start + i * RUNTIME_FUNCTION_SIZE;
        let function = RuntimeFunction::parse(span, offset)?;
        entries.push(resolve_chain(span, sections, function));
    }

    Ok(entries)
}

fn resolve_chain(
    span: ByteSpan<'_>,
    sections: &[SectionHeader],
    mut current: RuntimeFunction,
) -> ExceptionEntry {
    let mut hops = 0;

    loop {
        if current.unwind_info_rva == 0 {
            break;
        }

        let unwind_offset = match rva_to_offset(sections, current.unwind_info_rva) {
            Ok(offset) => offset,
            Err(err) => {
                warn!("exception chain: unwind info rva {:#x} unmapped: {err}", current.unwind_info_rva);
                break;
            }
        };

        let unwind_info = match UnwindInfo::parse(span, unwind_offset) {
            Ok(info) => info,
            Err(err) => {
                warn!("exception chain: failed to read unwind info at {unwind_offset:#x}: {err}");
                break;
            }
        };

        if !unwind_info.is_chained() {
            return ExceptionEntry {
                function: current,
                unwind_info: Some(unwind_info),
                hops,
            };
        }

        if hops >= MAX_CHAIN_HOPS {
            warn!(
                "exception chain truncated after {MAX_CHAIN_HOPS} hops starting at function {:#x}",
                current.begin_rva
            );
            return ExceptionEntry {
                function: current,
                unwind_info: Some(unwind_info),
                hops,
            };
        }

        let code_count_even = unwind_info.count_of_codes as usize + (unwind_info.count_of_codes as usize & 1);
        let chained_offset = unwind_offset + 4 + code_count_even * 2;

        match RuntimeFunction::parse(span, chained_offset) {
            Ok(next) => {
                current = next;
                hops += 1;
            }
            Err(err) => {
                warn!("exception chain: failed to read chained function at {chained_offset:#x}: {err}");
                return ExceptionEntry {
                    function: current,
                    unwind_info: Some(unwind_info),
                    hops,
                };
            }
        }
    }

    // terminal read attempt: best-effort, absent on any failure
    let unwind_info = if current.unwind_info_rva != 0 {
        rva_to_offset(sections, current.unwind_info_rva)
            .ok()
            .and_then(|offset| UnwindInfo::parse(span, offset).ok())
    } else {
        None
    };

    ExceptionEntry {
        function: current,
        unwind_info,
        hops,
    }
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
    fn entry_count_matches_directory_size() {
        let sections = vec![section(".pdata", 0x1000, 0x1000, 0x200), section(".xdata", 0x2000, 0x2000, 0x200)];
        let mut buf = vec![0u8; 0x2200];

        let off = 0x1000usize;
        (&mut buf[off..off + 4]).write_u32::<LittleEndian>(0x5000).unwrap();
        (&mut buf[off + 4..off + 8]).write_u32::<LittleEndian>(0x5010).unwrap();
        (&mut buf[off + 8..off + 12]).write_u32::<LittleEndian>(0).unwrap(); // no unwind info

        let span = ByteSpan::new(&buf);
        let directory = DataDirectory {
            virtual_address: 0x1000,
            size: RUNTIME_FUNCTION_SIZE as u32,
        };

        let entries = parse_exceptions(span, &sections, directory).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].function.begin_rva, 0x5000);
        assert_eq!(entries[0].unwind_info, None);
        assert_eq!(entries[0].hops, 0);
    }

    #[test]
    fn chained_unwind_info_is_followed_to_terminal() {
        let sections = vec![section(".pdata", 0x1000, 0x1000, 0x1000)];
        let mut buf = vec![0u8; 0x2000];

        let rf_off = 0x1000usize;
        let unwind_off = 0x1100usize;
        let chained_rf_off = unwind_off + 4; // count_of_codes = 0, rounds to 0

        (&mut buf[rf_off..rf_off + 4]).write_u32::<LittleEndian>(0x100).unwrap();
        (&mut buf[rf_off + 4..rf_off + 8]).write_u32::<LittleEndian>(0x110).unwrap();
        (&mut buf[rf_off + 8..rf_off + 12])
            .write_u32::<LittleEndian>(0x1100) // unwind_info_rva, matches section rva base 0x1000 + file offset 0x100
            .unwrap();

        // unwind info: flags byte has CHAININFO bit set, count_of_codes = 0
        buf[unwind_off] = UNW_FLAG_CHAININFO << 3;
        buf[unwind_off + 1] = 0;
        buf[unwind_off + 2] = 0; // count_of_codes
        buf[unwind_off + 3] = 0;

        // chained RuntimeFunction, terminal (no further unwind info)
        (&mut buf[chained_rf_off..chained_rf_off + 4])
            .write_u32::<LittleEndian>(0x200)
            .unwrap();
        (&mut buf[chained_rf_off + 4..chained_rf_off + 8])
            .write_u32::<LittleEndian>(0x210)
            .unwrap();
        (&mut buf[chained_rf_off + 8..chained_rf_off + 12])
            .write_u32::<LittleEndian>(0)
            .unwrap();

        let span = ByteSpan::new(&buf);
        let directory = DataDirectory {
            virtual_address: 0x1000,
            size: RUNTIME_FUNCTION_SIZE as u32,
        };

        let entries = parse_exceptions(span, &sections, directory).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].function.begin_rva, 0x200);
        assert_eq!(entries[0].hops, 1);
        assert!(entries[0].unwind_info.is_some());
        assert!(!entries[0].unwind_info.unwrap().is_chained());
    }
}
