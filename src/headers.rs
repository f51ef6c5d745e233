//! DOS/NT/optional/section header parsing (§4.2).
//!
//! Sequential parsing over a `Cursor` with `byteorder`, exactly as the teacher
//! crate's `DOSHeader`/`COFFHeader`/`OptionalHeader64`/`SectionHeader`
//! `from_parser` methods do it — only the PE32+ (x64) variant survives here;
//! the teacher's `OptionalHeader32`/`PEArchitecture` split is out of scope
//! (Non-goals: "PE32 (32-bit) images").

use std::io::Cursor;

use byteorder::{LittleEndian, ReadBytesExt};

use crate::error::{Error, Result};

pub const DOS_MAGIC: u16 = 0x5A4D;
pub const NT_SIGNATURE: u32 = 0x0000_4550;
pub const MACHINE_AMD64: u16 = 0x8664;
pub const OPTIONAL_MAGIC_PE32PLUS: u16 = 0x20B;

/// `IMAGE_SCN_MEM_EXECUTE`.
pub const IMAGE_SCN_MEM_EXECUTE: u32 = 0x2000_0000;

fn io_err_at(cursor: &Cursor<&[u8]>, size: usize) -> Error {
    Error::BufferOverflow {
        offset: cursor.position() as usize,
        size,
        buffer_len: cursor.get_ref().len(),
    }
}

fn read_u16(cursor: &mut Cursor<&[u8]>) -> Result<u16> {
    cursor
        .read_u16::<LittleEndian>()
        .map_err(|_| io_err_at(cursor, 2))
}

fn read_u32(cursor: &mut Cursor<&[u8]>) -> Result<u32> {
    cursor
        .read_u32::<LittleEndian>()
        .map_err(|_| io_err_at(cursor, 4))
}

fn read_u64(cursor: &mut Cursor<&[u8]>) -> Result<u64> {
    cursor
        .read_u64::<LittleEndian>()
        .map_err(|_| io_err_at(cursor, 8))
}

fn read_u8(cursor: &mut Cursor<&[u8]>) -> Result<u8> {
    cursor.read_u8().map_err(|_| io_err_at(cursor, 1))
}

/// Fixed 64-byte MS-DOS header prefix. Only `e_magic` and `e_lfanew` are
/// consulted by this parser; the rest is kept for completeness and `Debug`.
#[derive(Debug, Default, Clone, Copy)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DosHeader {
    pub e_magic: u16,
    pub e_lfanew: u32,
}

impl DosHeader {
    pub fn parse(cursor: &mut Cursor<&[u8]>) -> Result<DosHeader> {
        let e_magic = read_u16(cursor)?;
        if e_magic != DOS_MAGIC {
            return Err(Error::NotPE);
        }

        cursor.set_position(0x3C);
        let e_lfanew = read_u32(cursor)?;

        Ok(DosHeader { e_magic, e_lfanew })
    }
}

/// COFF file header (immediately following the 4-byte NT signature).
#[derive(Debug, Default, Clone, Copy)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FileHeader {
    pub machine: u16,
    pub number_of_sections: u16,
    pub time_date_stamp: u32,
    pub pointer_to_symbol_table: u32,
    pub number_of_symbols: u32,
    pub size_of_optional_header: u16,
    pub characteristics: u16,
}

impl FileHeader {
    pub fn parse(cursor: &mut Cursor<&[u8]>) -> Result<FileHeader> {
        let machine = read_u16(cursor)?;
        if machine != MACHINE_AMD64 {
            return Err(Error::UnsupportedMachine { machine });
        }

        Ok(FileHeader {
            machine,
            number_of_sections: read_u16(cursor)?,
            time_date_stamp: read_u32(cursor)?,
            pointer_to_symbol_table: read_u32(cursor)?,
            number_of_symbols: read_u32(cursor)?,
            size_of_optional_header: read_u16(cursor)?,
            characteristics: read_u16(cursor)?,
        })
    }
}

/// `{virtual_address, size}` pair indexing into a directory's on-disk layout.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DataDirectory {
    pub virtual_address: u32,
    pub size: u32,
}

impl DataDirectory {
    fn parse(cursor: &mut Cursor<&[u8]>) -> Result<DataDirectory> {
        Ok(DataDirectory {
            virtual_address: read_u32(cursor)?,
            size: read_u32(cursor)?,
        })
    }

    pub fn is_present(&self) -> bool {
        self.virtual_address != 0
    }
}

pub const DIR_EXPORT: usize = 0;
pub const DIR_IMPORT: usize = 1;
pub const DIR_EXCEPTION: usize = 3;
pub const DIR_BASERELOC: usize = 5;
pub const DIR_DEBUG: usize = 6;
pub const DIR_TLS: usize = 9;
pub const NUM_DATA_DIRECTORIES: usize = 16;

/// PE32+ optional header. Magic must be `0x20B`; 32-bit images (`0x10B`) are
/// rejected at parse time.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct OptionalHeader {
    pub magic: u16,
    pub major_linker_version: u8,
    pub minor_linker_version: u8,
    pub address_of_entry_point: u32,
    pub image_base: u64,
    pub section_alignment: u32,
    pub file_alignment: u32,
    pub size_of_image: u32,
    pub size_of_headers: u32,
    pub subsystem: u16,
    pub dll_characteristics: u16,
    #[cfg_attr(feature = "serde", serde(with = "data_dir_array"))]
    pub data_directories: [DataDirectory; NUM_DATA_DIRECTORIES],
}

impl Default for OptionalHeader {
    fn default() -> Self {
        OptionalHeader {
            magic: 0,
            major_linker_version: 0,
            minor_linker_version: 0,
            address_of_entry_point: 0,
            image_base: 0,
            section_alignment: 0,
            file_alignment: 0,
            size_of_image: 0,
            size_of_headers: 0,
            subsystem: 0,
            dll_characteristics: 0,
            data_directories: [DataDirectory::default(); NUM_DATA_DIRECTORIES],
        }
    }
}

impl OptionalHeader {
    pub fn parse(cursor: &mut Cursor<&[u8]>) -> Result<OptionalHeader> {
        let magic = read_u16(cursor)?;
        if magic != OPTIONAL_MAGIC_PE32PLUS {
            return Err(Error::UnsupportedOptionalMagic { magic });
        }

        let major_linker_version = read_u8(cursor)?;
        let minor_linker_version = read_u8(cursor)?;
        let _size_of_code = read_u32(cursor)?;
        let _size_of_initialized_data = read_u32(cursor)?;
        let _size_of_uninitialized_data = read_u32(cursor)?;
        let address_of_entry_point = read_u32(cursor)?;
        let _base_of_code = read_u32(cursor)?;
        let image_base = read_u64(cursor)?;
        let section_alignment = read_u32(cursor)?;
        let file_alignment = read_u32(cursor)?;
        let _major_os_version = read_u16(cursor)?;
        let _minor_os_version = read_u16(cursor)?;
        let _major_image_version = read_u16(cursor)?;
        let _minor_image_version = read_u16(cursor)?;
        let _major_subsystem_version = read_u16(cursor)?;
        let _minor_subsystem_version = read_u16(cursor)?;
        let _win32_version_value = read_u32(cursor)?;
        let size_of_image = read_u32(cursor)?;
        let size_of_headers = read_u32(cursor)?;
        let _checksum = read_u32(cursor)?;
        let subsystem = read_u16(cursor)?;
        let dll_characteristics = read_u16(cursor)?;
        let _size_of_stack_reserve = read_u64(cursor)?;
        let _size_of_stack_commit = read_u64(cursor)?;
        let _size_of_heap_reserve = read_u64(cursor)?;
        let _size_of_heap_commit = read_u64(cursor)?;
        let _loader_flags = read_u32(cursor)?;
        let number_of_rva_and_sizes = read_u32(cursor)?;

        let mut data_directories = [DataDirectory::default(); NUM_DATA_DIRECTORIES];
        let present = (number_of_rva_and_sizes as usize).min(NUM_DATA_DIRECTORIES);
        for slot in data_directories.iter_mut().take(present) {
            *slot = DataDirectory::parse(cursor)?;
        }

        Ok(OptionalHeader {
            magic,
            major_linker_version,
            minor_linker_version,
            address_of_entry_point,
            image_base,
            section_alignment,
            file_alignment,
            size_of_image,
            size_of_headers,
            subsystem,
            dll_characteristics,
            data_directories,
        })
    }

    pub fn directory(&self, index: usize) -> DataDirectory {
        self.data_directories.get(index).copied().unwrap_or_default()
    }
}

#[cfg(feature = "serde")]
mod data_dir_array {
    use super::{DataDirectory, NUM_DATA_DIRECTORIES};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(
        value: &[DataDirectory; NUM_DATA_DIRECTORIES],
        ser: S,
    ) -> Result<S::Ok, S::Error> {
        value.to_vec().serialize(ser)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        de: D,
    ) -> Result<[DataDirectory; NUM_DATA_DIRECTORIES], D::Error> {
        let v = Vec::<DataDirectory>::deserialize(de)?;
        let mut out = [DataDirectory::default(); NUM_DATA_DIRECTORIES];
        for (slot, value) in out.iter_mut().zip(v) {
            *slot = value;
        }
        Ok(out)
    }
}

/// Section header. `name` is the trimmed (first-NUL-or-slot-end) string; the
/// raw 8-byte slot is not NUL-terminated when the name is exactly 8 bytes.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SectionHeader {
    pub name: String,
    pub virtual_size: u32,
    pub virtual_address: u32,
    pub size_of_raw_data: u32,
    pub pointer_to_raw_data: u32,
    pub pointer_to_relocations: u32,
    pub pointer_to_line_numbers: u32,
    pub number_of_relocations: u16,
    pub number_of_line_numbers: u16,
    pub characteristics: u32,
}

impl SectionHeader {
    pub fn parse(cursor: &mut Cursor<&[u8]>) -> Result<SectionHeader> {
        let mut raw_name = [0u8; 8];
        for byte in raw_name.iter_mut() {
            *byte = read_u8(cursor)?;
        }
        let nul = raw_name.iter().position(|&b| b == 0).unwrap_or(8);
        let name = String::from_utf8_lossy(&raw_name[..nul]).into_owned();

        Ok(SectionHeader {
            name,
            virtual_size: read_u32(cursor)?,
            virtual_address: read_u32(cursor)?,
            size_of_raw_data: read_u32(cursor)?,
            pointer_to_raw_data: read_u32(cursor)?,
            pointer_to_relocations: read_u32(cursor)?,
            pointer_to_line_numbers: read_u32(cursor)?,
            number_of_relocations: read_u16(cursor)?,
            number_of_line_numbers: read_u16(cursor)?,
            characteristics: read_u32(cursor)?,
        })
    }

    pub fn is_executable(&self) -> bool {
        self.characteristics & IMAGE_SCN_MEM_EXECUTE != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_dos_header(e_lfanew: u32) -> Vec<u8> {
        let mut buf = vec![0u8; 0x40];
        buf[0] = 0x4D;
        buf[1] = 0x5A;
        LittleEndian::write_u32(&mut buf[0x3C..0x40], e_lfanew);
        buf
    }

    #[test]
    fn dos_header_rejects_bad_magic() {
        let mut buf = minimal_dos_header(0x80);
        buf[0] = 0x4D;
        buf[1] = 0x5B; // S1: invalid magic
        let mut cursor = Cursor::new(buf.as_slice());
        assert_eq!(DosHeader::parse(&mut cursor).unwrap_err(), Error::NotPE);
    }

    #[test]
    fn dos_header_reads_lfanew() {
        let buf = minimal_dos_header(0x80);
        let mut cursor = Cursor::new(buf.as_slice());
        let dos = DosHeader::parse(&mut cursor).unwrap();
        assert_eq!(dos.e_magic, DOS_MAGIC);
        assert_eq!(dos.e_lfanew, 0x80);
    }

    #[test]
    fn optional_header_rejects_pe32_magic() {
        let mut buf = vec![0u8; 4];
        LittleEndian::write_u16(&mut buf[0..2], 0x10B); // S2: 32-bit magic
        let mut cursor = Cursor::new(buf.as_slice());
        assert_eq!(
            OptionalHeader::parse(&mut cursor).unwrap_err(),
            Error::UnsupportedOptionalMagic { magic: 0x10B }
        );
    }

    #[test]
    fn file_header_rejects_non_amd64_machine() {
        let mut buf = vec![0u8; 20];
        LittleEndian::write_u16(&mut buf[0..2], 0x14c); // I386
        let mut cursor = Cursor::new(buf.as_slice());
        assert_eq!(
            FileHeader::parse(&mut cursor).unwrap_err(),
            Error::UnsupportedMachine { machine: 0x14c }
        );
    }

    #[cfg(feature = "serde")]
    #[test]
    fn section_header_serde_round_trip_is_lossless() {
        let section = SectionHeader {
            name: ".text".to_string(),
            virtual_size: 0x200,
            virtual_address: 0x1000,
            size_of_raw_data: 0x200,
            pointer_to_raw_data: 0x400,
            pointer_to_relocations: 0,
            pointer_to_line_numbers: 0,
            number_of_relocations: 0,
            number_of_line_numbers: 0,
            characteristics: IMAGE_SCN_MEM_EXECUTE,
        };

        let json = serde_json::to_string(&section).unwrap();
        let round_tripped: SectionHeader = serde_json::from_str(&json).unwrap();
        assert_eq!(section, round_tripped);
    }
}
