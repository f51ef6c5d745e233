//! Export directory walk, name/ordinal/function table indirection, and
//! forwarder detection (§4.11).
//!
//! Grounded on `sunilkr-rustbin`'s `pe-export.rs`: the same three-table
//! indirection (names → ordinals → functions) and the same "function RVA
//! falls inside the export directory's own range" forwarder test.

use log::debug;

use crate::error::Result;
use crate::headers::{DataDirectory, SectionHeader};
use crate::reader::ByteSpan;
use crate::sections::rva_to_offset;

const EXPORT_DIRECTORY_SIZE: usize = 40;

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Export {
    pub name: String,
    pub public_ordinal: u32,
    pub function_rva: u32,
    pub address: u64,
    pub is_forwarder: bool,
    pub forwarder_ordinal: Option<u32>,
}

#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ExportTable {
    pub library_name: Option<String>,
    pub base: u32,
    pub exports: Vec<Export>,
}

pub fn parse_exports(
    span: ByteSpan<'_>,
    sections: &[SectionHeader],
    directory: DataDirectory,
    image_base: u64,
) -> Result<Option<ExportTable>> {
    if !directory.is_present() {
        return Ok(None);
    }

    let dir_offset = rva_to_offset(sections, directory.virtual_address)?;

    let _characteristics = span.read_u32_at(dir_offset)?;
    let _time_date_stamp = span.read_u32_at(dir_offset + 4)?;
    let _major_version = span.read_u16_at(dir_offset + 8)?;
    let _minor_version = span.read_u16_at(dir_offset + 10)?;
    let name_rva = span.read_u32_at(dir_offset + 12)?;
    let base = span.read_u32_at(dir_offset + 16)?;
    let _number_of_functions = span.read_u32_at(dir_offset + 20)?;
    let number_of_names = span.read_u32_at(dir_offset + 24)?;
    let address_of_functions = span.read_u32_at(dir_offset + 28)?;
    let address_of_names = span.read_u32_at(dir_offset + 32)?;
    let address_of_name_ordinals = span.read_u32_at(dir_offset + 36)?;

    let library_name = if name_rva != 0 {
        Some(span.read_cstr_at(rva_to_offset(sections, name_rva)?)?)
    } else {
        None
    };

    let names_offset = rva_to_offset(sections, address_of_names)?;
    let ordinals_offset = rva_to_offset(sections, address_of_name_ordinals)?;
    let functions_offset = rva_to_offset(sections, address_of_functions)?;

    let export_dir_start = directory.virtual_address;
    let export_dir_end = export_dir_start + directory.size;

    let mut exports = Vec::with_capacity(number_of_names as usize);

    for i in 0..number_of_names {
        let name_rva = span.read_u32_at(names_offset + i as usize * 4)?;
        let name = span.read_cstr_at(rva_to_offset(sections, name_rva)?)?;
        let ordinal = span.read_u16_at(ordinals_offset + i as usize * 2)?;
        let function_rva = span.read_u32_at(functions_offset + ordinal as usize * 4)?;
        let public_ordinal = ordinal as u32 + base;

        let is_forwarder = function_rva >= export_dir_start && function_rva < export_dir_end;
        let address = if function_rva == 0 {
            0
        } else {
            image_base + function_rva as u64
        };

        exports.push(Export {
            name,
            public_ordinal,
            function_rva,
            address,
            is_forwarder,
            forwarder_ordinal: is_forwarder.then_some(ordinal as u32),
        });
    }

    debug!("export table: {} named exports, base {base:#x}", exports.len());

    Ok(Some(ExportTable {
        library_name,
        base,
        exports,
    }))
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
    fn forwarded_export_matches_spec_s6() {
        let sections = vec![section(".edata", 0x5000, 0x5000, 0x400)];
        let mut buf = vec![0u8; 0x5400];

        let dir_off = 0x5000usize;
        let dir_rva = 0x5000u32;
        let dir_size = EXPORT_DIRECTORY_SIZE as u32;

        let names_rva = 0x5100u32;
        let ordinals_rva = 0x5110u32;
        let functions_rva = 0x5120u32;
        let name_str_rva = 0x5200u32;

        (&mut buf[dir_off + 16..dir_off + 20]).write_u32::<LittleEndian>(0).unwrap(); // base = 0
        (&mut buf[dir_off + 24..dir_off + 28]).write_u32::<LittleEndian>(1).unwrap(); // number_of_names
        (&mut buf[dir_off + 28..dir_off + 32])
            .write_u32::<LittleEndian>(functions_rva)
            .unwrap();
        (&mut buf[dir_off + 32..dir_off + 36]).write_u32::<LittleEndian>(names_rva).unwrap();
        (&mut buf[dir_off + 36..dir_off + 40])
            .write_u32::<LittleEndian>(ordinals_rva)
            .unwrap();

        (&mut buf[0x5100..0x5104]).write_u32::<LittleEndian>(name_str_rva).unwrap();
        (&mut buf[0x5110..0x5112]).write_u16::<LittleEndian>(0).unwrap(); // ordinal index 0
        // function_rva falls inside [dir_rva, dir_rva+dir_size) => forwarder
        (&mut buf[0x5120..0x5124])
            .write_u32::<LittleEndian>(dir_rva + 4)
            .unwrap();
        buf[0x5200..0x5205].copy_from_slice(b"Func\0");

        let span = ByteSpan::new(&buf);
        let directory = DataDirectory {
            virtual_address: dir_rva,
            size: dir_size,
        };

        let table = parse_exports(span, &sections, directory, 0x1400_0000).unwrap().unwrap();
        assert_eq!(table.exports.len(), 1);
        let export = &table.exports[0];
        assert_eq!(export.name, "Func");
        assert!(export.is_forwarder);
        assert_eq!(export.forwarder_ordinal, Some(0));
        assert_eq!(export.function_rva, dir_rva + 4);
        assert_eq!(export.address, 0x1400_0000 + (dir_rva + 4) as u64);
    }

    #[test]
    fn absent_directory_yields_none() {
        let sections = vec![section(".edata", 0x5000, 0x5000, 0x400)];
        let buf = vec![0u8; 0x10];
        let span = ByteSpan::new(&buf);
        assert!(parse_exports(span, &sections, DataDirectory::default(), 0).unwrap().is_none());
    }

    #[cfg(feature = "serde")]
    #[test]
    fn export_serde_round_trip_is_lossless() {
        let export = Export {
            name: "Func".to_string(),
            public_ordinal: 5,
            function_rva: 0x5004,
            address: 0x1400_5004,
            is_forwarder: true,
            forwarder_ordinal: Some(0),
        };

        let json = serde_json::to_string(&export).unwrap();
        let round_tripped: Export = serde_json::from_str(&json).unwrap();
        assert_eq!(export, round_tripped);
    }
}
