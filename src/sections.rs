//! RVA→file-offset mapping and section data views (§4.3, §4.4).

use crate::error::{Error, Result};
use crate::headers::SectionHeader;

/// A section's raw bytes plus the derived fields callers usually want
/// alongside them (§4.4 `all_sections`/`executable_sections`).
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SectionView {
    pub name: String,
    pub data: Vec<u8>,
    pub virtual_address_abs: u64,
    pub executable: bool,
}

/// Finds the unique section containing `rva` and returns the corresponding
/// file offset. `RvaUnmapped` if no section covers it (invariant 2).
pub fn rva_to_offset(sections: &[SectionHeader], rva: u32) -> Result<usize> {
    for section in sections {
        let start = section.virtual_address;
        let end = start.saturating_add(section.virtual_size);
        if rva >= start && rva < end {
            let delta = rva - start;
            return Ok(section.pointer_to_raw_data as usize + delta as usize);
        }
    }
    Err(Error::RvaUnmapped { rva })
}

/// Section whose `[image_base + virtual_address, + size_of_raw_data]` range
/// contains `absolute_address`. The upper bound is end-inclusive (§4.3),
/// deliberately accepting addresses one past the last byte.
pub fn section_name_for_address(
    sections: &[SectionHeader],
    image_base: u64,
    absolute_address: u64,
) -> Option<String> {
    sections
        .iter()
        .find(|section| {
            let start = image_base + section.virtual_address as u64;
            let end = start + section.size_of_raw_data as u64;
            absolute_address >= start && absolute_address <= end
        })
        .map(|section| section.name.clone())
}

/// First section whose trimmed name starts with `name` (teacher's
/// `convert_rva_to_file_offset` companion lookup, generalized to prefix
/// matching per §9 "compare via prefix").
pub fn find_section<'a>(sections: &'a [SectionHeader], name: &str) -> Result<&'a SectionHeader> {
    sections
        .iter()
        .find(|section| section.name.starts_with(name))
        .ok_or_else(|| Error::SectionNotFound {
            name: name.to_string(),
        })
}

pub fn section_data(buf: &[u8], sections: &[SectionHeader], name: &str) -> Result<Vec<u8>> {
    let section = find_section(sections, name)?;
    raw_section_bytes(buf, section)
}

fn raw_section_bytes(buf: &[u8], section: &SectionHeader) -> Result<Vec<u8>> {
    let start = section.pointer_to_raw_data as usize;
    let size = section.size_of_raw_data as usize;
    let end = start.checked_add(size).ok_or(Error::BufferOverflow {
        offset: start,
        size,
        buffer_len: buf.len(),
    })?;
    if end > buf.len() {
        return Err(Error::BufferOverflow {
            offset: start,
            size,
            buffer_len: buf.len(),
        });
    }
    Ok(buf[start..end].to_vec())
}

pub fn all_sections(
    buf: &[u8],
    sections: &[SectionHeader],
    image_base: u64,
) -> Result<Vec<SectionView>> {
    sections
        .iter()
        .map(|section| {
            Ok(SectionView {
                name: section.name.clone(),
                data: raw_section_bytes(buf, section)?,
                virtual_address_abs: image_base + section.virtual_address as u64,
                executable: section.is_executable(),
            })
        })
        .collect()
}

pub fn executable_sections(
    buf: &[u8],
    sections: &[SectionHeader],
    image_base: u64,
) -> Result<Vec<SectionView>> {
    Ok(all_sections(buf, sections, image_base)?
        .into_iter()
        .filter(|view| view.executable)
        .collect())
}
