//! Top-level `Pe` value: construction (§4.2) and the accessor surface that
//! wires the directory modules together (§4.3–§4.12).

use std::cell::Cell;
use std::fs;
use std::io::Cursor;
use std::path::Path;

use log::debug;

use crate::debug::{self as debug_dir, DebugDirectoryEntry};
use crate::error::{Error, Result};
use crate::exceptions::{self, ExceptionEntry};
use crate::exports::{self, ExportTable};
use crate::headers::{
    DosHeader, FileHeader, OptionalHeader, SectionHeader, DIR_BASERELOC, DIR_DEBUG, DIR_EXCEPTION,
    DIR_EXPORT, DIR_IMPORT, DIR_TLS, NT_SIGNATURE,
};
use crate::imports::{self, ImportDescriptor};
use crate::reader::ByteSpan;
use crate::relocations::{self, RelocationBlock};
use crate::sections::{self, SectionView};
use crate::tls::{self, Tls};

/// On-disk size of the COFF file header, immediately following the 4-byte
/// NT signature (§4.2 step 6).
const FILE_HEADER_SIZE: usize = 20;

/// A parsed x64 PE32+ image. Construction eagerly validates and caches the
/// headers (§4.2); everything else is a query over the owned buffer.
///
/// The two override fields use plain `Cell<u64>`, not an atomic or a mutex:
/// the parser forfeits `Sync` deliberately rather than pay for synchronization
/// a single-threaded, synchronous value never needs (§5).
#[derive(Debug)]
pub struct Pe {
    buffer: Vec<u8>,
    dos_header: DosHeader,
    file_header: FileHeader,
    optional_header: OptionalHeader,
    sections: Vec<SectionHeader>,
    image_base_override: Cell<u64>,
    entry_point_override: Cell<u64>,
}

impl Pe {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Pe> {
        let buffer = fs::read(path).map_err(|err| Error::Io {
            message: err.to_string(),
        })?;
        Pe::from_bytes(buffer)
    }

    pub fn from_bytes(buffer: Vec<u8>) -> Result<Pe> {
        let mut cursor = Cursor::new(buffer.as_slice());
        let dos_header = DosHeader::parse(&mut cursor)?;

        cursor.set_position(dos_header.e_lfanew as u64);
        let signature_offset = dos_header.e_lfanew as usize;
        let span = ByteSpan::new(&buffer);
        let signature = span.read_u32_at(signature_offset)?;
        if signature != NT_SIGNATURE {
            return Err(Error::BadNtSignature {
                offset: signature_offset,
            });
        }
        cursor.set_position((signature_offset + 4) as u64);

        let file_header = FileHeader::parse(&mut cursor)?;
        let optional_header = OptionalHeader::parse(&mut cursor)?;

        let section_table_offset = dos_header.e_lfanew as u64
            + 4
            + FILE_HEADER_SIZE as u64
            + file_header.size_of_optional_header as u64;
        cursor.set_position(section_table_offset);

        let mut sections = Vec::with_capacity(file_header.number_of_sections as usize);
        for _ in 0..file_header.number_of_sections {
            sections.push(SectionHeader::parse(&mut cursor)?);
        }

        debug!(
            "parsed PE image: {} sections, image base {:#x}",
            sections.len(),
            optional_header.image_base
        );

        Ok(Pe {
            buffer,
            dos_header,
            file_header,
            optional_header,
            sections,
            image_base_override: Cell::new(0),
            entry_point_override: Cell::new(0),
        })
    }

    fn span(&self) -> ByteSpan<'_> {
        ByteSpan::new(&self.buffer)
    }

    pub fn dos_header(&self) -> &DosHeader {
        &self.dos_header
    }

    pub fn file_header(&self) -> &FileHeader {
        &self.file_header
    }

    pub fn optional_header(&self) -> &OptionalHeader {
        &self.optional_header
    }

    pub fn sections(&self) -> &[SectionHeader] {
        &self.sections
    }

    // --- §4.3 address mapper ---

    pub fn rva_to_offset(&self, rva: u32) -> Result<usize> {
        sections::rva_to_offset(&self.sections, rva)
    }

    pub fn section_name_for_address(&self, absolute_address: u64) -> Option<String> {
        sections::section_name_for_address(&self.sections, self.get_image_base(), absolute_address)
    }

    // --- §4.4 section views ---

    pub fn section_data(&self, name: &str) -> Result<Vec<u8>> {
        sections::section_data(&self.buffer, &self.sections, name)
    }

    pub fn text_section_data(&self) -> Result<Vec<u8>> {
        self.section_data(".text")
    }

    pub fn all_sections(&self) -> Result<Vec<SectionView>> {
        sections::all_sections(&self.buffer, &self.sections, self.get_image_base())
    }

    pub fn executable_sections(&self) -> Result<Vec<SectionView>> {
        sections::executable_sections(&self.buffer, &self.sections, self.get_image_base())
    }

    // --- §4.5 imports ---

    pub fn imports(&self) -> Result<Vec<ImportDescriptor>> {
        imports::parse_imports(self.span(), &self.sections, self.optional_header.directory(DIR_IMPORT))
    }

    // --- §4.6 relocations ---

    pub fn relocations(&self) -> Result<Vec<RelocationBlock>> {
        relocations::parse_relocations(
            self.span(),
            &self.sections,
            self.optional_header.directory(DIR_BASERELOC),
        )
    }

    // --- §4.7 exceptions ---

    pub fn exceptions(&self) -> Result<Vec<ExceptionEntry>> {
        exceptions::parse_exceptions(
            self.span(),
            &self.sections,
            self.optional_header.directory(DIR_EXCEPTION),
        )
    }

    // --- §4.8 TLS ---

    pub fn tls(&self) -> Result<Option<Tls>> {
        tls::parse_tls(self.span(), &self.sections, self.optional_header.directory(DIR_TLS))
    }

    // --- §4.9/§4.10 debug ---

    pub fn debug_directory(&self) -> Result<Vec<DebugDirectoryEntry>> {
        debug_dir::parse_debug_directory(
            self.span(),
            &self.sections,
            self.optional_header.directory(DIR_DEBUG),
        )
    }

    pub fn pdb_path(&self) -> Result<Option<String>> {
        let entries = self.debug_directory()?;
        Ok(debug_dir::pdb_path(&entries).map(str::to_owned))
    }

    pub fn pdb_url(&self) -> Result<Option<String>> {
        let entries = self.debug_directory()?;
        Ok(debug_dir::pdb_url(&entries))
    }

    // --- §4.11 exports ---

    pub fn exports(&self) -> Result<Option<ExportTable>> {
        exports::parse_exports(
            self.span(),
            &self.sections,
            self.optional_header.directory(DIR_EXPORT),
            self.get_image_base(),
        )
    }

    // --- §4.12 overrides ---

    /// A zero override means "no override" (§9 open question 3).
    pub fn override_base_address(&self, addr: u64) {
        self.image_base_override.set(addr);
    }

    pub fn override_entry_point(&self, addr: u64) {
        self.entry_point_override.set(addr);
    }

    pub fn get_image_base(&self) -> u64 {
        let override_value = self.image_base_override.get();
        if override_value != 0 {
            override_value
        } else {
            self.optional_header.image_base
        }
    }

    pub fn get_entry_point(&self) -> u64 {
        let override_value = self.entry_point_override.get();
        if override_value != 0 {
            self.get_image_base() + override_value
        } else {
            self.optional_header.image_base + self.optional_header.address_of_entry_point as u64
        }
    }
}
