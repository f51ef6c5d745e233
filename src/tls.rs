//! TLS directory and callback array (§4.8).

use log::debug;

use crate::error::Result;
use crate::headers::{DataDirectory, SectionHeader};
use crate::reader::ByteSpan;
use crate::sections::rva_to_offset;

/// `IMAGE_TLS_DIRECTORY64`.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TlsDirectory {
    pub start_address_of_raw_data: u64,
    pub end_address_of_raw_data: u64,
    pub address_of_index: u64,
    pub address_of_callbacks: u64,
    pub size_of_zero_fill: u32,
    pub characteristics: u32,
}

impl TlsDirectory {
    fn parse(span: ByteSpan<'_>, offset: usize) -> Result<TlsDirectory> {
        Ok(TlsDirectory {
            start_address_of_raw_data: span.read_u64_at(offset)?,
            end_address_of_raw_data: span.read_u64_at(offset + 8)?,
            address_of_index: span.read_u64_at(offset + 16)?,
            address_of_callbacks: span.read_u64_at(offset + 24)?,
            size_of_zero_fill: span.read_u32_at(offset + 32)?,
            characteristics: span.read_u32_at(offset + 36)?,
        })
    }
}

#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Tls {
    pub directory: TlsDirectory,
    pub callbacks: Vec<u64>,
}

pub fn parse_tls(
    span: ByteSpan<'_>,
    sections: &[SectionHeader],
    directory: DataDirectory,
) -> Result<Option<Tls>> {
    if !directory.is_present() {
        return Ok(None);
    }

    let offset = rva_to_offset(sections, directory.virtual_address)?;
    debug!("TLS directory at offset {offset:#x}");
    let tls_directory = TlsDirectory::parse(span, offset)?;

    let mut callbacks = Vec::new();
    if tls_directory.address_of_callbacks != 0 {
        let callback_rva = tls_directory.address_of_callbacks as u32;
        let mut callback_offset = rva_to_offset(sections, callback_rva)?;
        loop {
            let callback = span.read_u64_at(callback_offset)?;
            if callback == 0 {
                break;
            }
            callbacks.push(callback);
            callback_offset += 8;
        }
    }

    Ok(Some(Tls {
        directory: tls_directory,
        callbacks,
    }))
}
