//! The loaded executable image and the search operations over it.
//!
//! A [`BinaryImage`] is handed over fully formed by an external loader: raw
//! file bytes, the section table, the import slots and a little metadata. It
//! never changes afterwards, so any number of resolvers can borrow it.
//!
//! Consumers go through the [`ReadImage`] trait so that tests can wrap the
//! image in a recording double.

mod meta;
mod search;
mod section;

#[cfg(test)]
pub(crate) mod mock;

use std::fmt;

use serde::{Deserialize, Serialize};
use strum::Display;
use tracing::debug;

use crate::error::{Error, Result};
use crate::pattern::{Match, Pattern};

pub use meta::{BuildDate, Import, ImageMeta, LinkerVersion};
pub use section::Section;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
pub enum AddrSpace {
    Physical,
    Virtual,
}

/// A numeric address tagged with the space it lives in.
///
/// Hex and byte forms are always derived from the number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address {
    value: u32,
    space: AddrSpace,
}

impl Address {
    pub const fn virt(value: u32) -> Self {
        Self {
            value,
            space: AddrSpace::Virtual,
        }
    }

    pub const fn phys(value: u32) -> Self {
        Self {
            value,
            space: AddrSpace::Physical,
        }
    }

    pub fn value(&self) -> u32 {
        self.value
    }

    pub fn space(&self) -> AddrSpace {
        self.space
    }

    pub fn to_le_bytes(&self) -> [u8; 4] {
        self.value.to_le_bytes()
    }

    /// Canonical little-endian hex, e.g. `0x12345678` → `"78 56 34 12"`.
    pub fn to_hex(&self) -> String {
        encode_hex(&self.to_le_bytes())
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X}", self.value)
    }
}

/// Space-separated uppercase hex of `bytes`.
pub fn encode_hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Inverse of [`Address::to_hex`]: decode four little-endian hex bytes.
pub fn decode_le_hex(hex: &str) -> Result<u32> {
    let mut bytes = [0u8; 4];
    let mut count = 0;
    for token in hex.split_whitespace() {
        if count == 4 {
            return Err(Error::InvalidHex(format!("'{}' has more than 4 bytes", hex)));
        }
        bytes[count] = u8::from_str_radix(token, 16)
            .map_err(|e| Error::InvalidHex(format!("token '{}': {}", token, e)))?;
        count += 1;
    }

    if count != 4 {
        return Err(Error::InvalidHex(format!("'{}' is not 4 bytes", hex)));
    }
    Ok(u32::from_le_bytes(bytes))
}

/// How [`ReadImage::find_text`] matches a string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextOptions {
    pub space: AddrSpace,
    pub case_sensitive: bool,
    /// Require a NUL before and after the match (a standalone C string)
    pub null_bounded: bool,
}

impl Default for TextOptions {
    fn default() -> Self {
        Self {
            space: AddrSpace::Virtual,
            case_sensitive: true,
            null_bounded: true,
        }
    }
}

impl TextOptions {
    pub fn physical(mut self) -> Self {
        self.space = AddrSpace::Physical;
        self
    }

    pub fn case_insensitive(mut self) -> Self {
        self.case_sensitive = false;
        self
    }

    pub fn unbounded(mut self) -> Self {
        self.null_bounded = false;
        self
    }
}

/// Read-only access to a loaded image.
///
/// Pattern searches and raw reads work on PHYSICAL offsets; text searches
/// report in the space the caller asks for.
pub trait ReadImage {
    fn find_text(&self, needle: &[u8], opts: TextOptions) -> Option<u32>;

    /// First match inside `[from, to)`.
    fn find_pattern_in(&self, pattern: &Pattern, from: u32, to: u32) -> Option<Match>;

    fn read_bytes(&self, addr: u32, size: usize) -> Result<&[u8]>;

    fn find_import(&self, function: &str, module: Option<&str>) -> Option<u32>;

    fn to_virtual(&self, phys: u32) -> Result<u32>;

    fn to_physical(&self, virt: u32) -> Result<u32>;

    /// PHYSICAL span searched when a pattern search has no explicit bounds.
    fn code_range(&self) -> (u32, u32);

    fn meta(&self) -> &ImageMeta;

    /// First match in the code section.
    fn find_pattern(&self, pattern: &Pattern) -> Option<Match> {
        let (from, to) = self.code_range();
        self.find_pattern_in(pattern, from, to)
    }

    fn read_u32(&self, addr: u32) -> Result<u32> {
        let bytes = self.read_bytes(addr, 4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// VIRTUAL target of the `CALL rel32` at PHYSICAL `addr`.
    fn call_target(&self, addr: u32) -> Result<u32> {
        let next = addr
            .checked_add(5)
            .ok_or(Error::ReadOutOfBounds { offset: addr, size: 5 })?;
        let rel = self.read_u32(addr + 1)?;
        let next = self.to_virtual(next)?;
        Ok(next.wrapping_add(rel))
    }
}

#[derive(Debug, Clone)]
pub struct BinaryImage {
    data: Vec<u8>,
    sections: Vec<Section>,
    imports: Vec<Import>,
    meta: ImageMeta,
}

impl BinaryImage {
    pub fn builder() -> ImageBuilder {
        ImageBuilder::default()
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    pub fn imports(&self) -> &[Import] {
        &self.imports
    }

    pub fn section_by_name(&self, name: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.name == name)
    }

    fn mapped_bytes(&self, section: &Section) -> &[u8] {
        &self.data[section.raw_offset as usize..section.raw_end() as usize]
    }
}

impl ReadImage for BinaryImage {
    fn find_text(&self, needle: &[u8], opts: TextOptions) -> Option<u32> {
        for section in &self.sections {
            let hay = self.mapped_bytes(section);
            let Some(pos) = search::find_text(hay, needle, opts.case_sensitive, opts.null_bounded)
            else {
                continue;
            };

            let phys = section.raw_offset + pos as u32;
            return match opts.space {
                AddrSpace::Physical => Some(phys),
                AddrSpace::Virtual => section.to_virtual(phys),
            };
        }
        None
    }

    fn find_pattern_in(&self, pattern: &Pattern, from: u32, to: u32) -> Option<Match> {
        let start = from as usize;
        let end = (to as usize).min(self.data.len());
        if start >= end {
            return None;
        }

        let hay = &self.data[start..end];
        let compiled = pattern.compile();
        let mut skip = 0;
        while skip < hay.len() {
            let pos = skip + search::find_masked(&hay[skip..], &compiled)?;
            if pattern.accepts(&hay[pos..]) {
                let offset = from + pos as u32;
                return Some(pattern.extract(offset, &self.data[offset as usize..]));
            }
            skip = pos + 1;
        }
        None
    }

    fn read_bytes(&self, addr: u32, size: usize) -> Result<&[u8]> {
        let start = addr as usize;
        start
            .checked_add(size)
            .and_then(|end| self.data.get(start..end))
            .ok_or(Error::ReadOutOfBounds { offset: addr, size })
    }

    fn find_import(&self, function: &str, module: Option<&str>) -> Option<u32> {
        self.imports
            .iter()
            .find(|import| import.matches(function, module))
            .map(|import| import.address)
    }

    fn to_virtual(&self, phys: u32) -> Result<u32> {
        self.sections
            .iter()
            .find_map(|s| s.to_virtual(phys))
            .ok_or(Error::OutOfRange {
                address: phys,
                space: AddrSpace::Physical,
            })
    }

    fn to_physical(&self, virt: u32) -> Result<u32> {
        self.sections
            .iter()
            .find_map(|s| s.to_physical(virt))
            .ok_or(Error::OutOfRange {
                address: virt,
                space: AddrSpace::Virtual,
            })
    }

    fn code_range(&self) -> (u32, u32) {
        match self.sections.iter().find(|s| s.executable) {
            Some(code) => (code.raw_offset, code.raw_end()),
            None => (0, self.data.len() as u32),
        }
    }

    fn meta(&self) -> &ImageMeta {
        &self.meta
    }
}

/// Assembles a [`BinaryImage`] from loader output.
#[derive(Debug, Clone, Default)]
pub struct ImageBuilder {
    data: Vec<u8>,
    sections: Vec<Section>,
    imports: Vec<Import>,
    meta: ImageMeta,
}

impl ImageBuilder {
    pub fn data(mut self, data: Vec<u8>) -> Self {
        self.data = data;
        self
    }

    pub fn section(mut self, section: Section) -> Self {
        self.sections.push(section);
        self
    }

    pub fn import(mut self, module: &str, function: &str, address: u32) -> Self {
        self.imports.push(Import {
            module: module.to_string(),
            function: function.to_string(),
            address,
        });
        self
    }

    pub fn build_date(mut self, date: BuildDate) -> Self {
        self.meta.build_date = date;
        self
    }

    pub fn linker(mut self, linker: LinkerVersion) -> Self {
        self.meta.linker = linker;
        self
    }

    pub fn file_name(mut self, name: &str) -> Self {
        self.meta.file_name = name.to_string();
        self
    }

    pub fn resource_dir(mut self, phys: u32) -> Self {
        self.meta.resource_dir = Some(phys);
        self
    }

    pub fn meta(mut self, meta: ImageMeta) -> Self {
        self.meta = meta;
        self
    }

    /// Validate the section table against the buffer and freeze the image.
    pub fn build(self) -> Result<BinaryImage> {
        for section in &self.sections {
            let end = section.raw_offset as usize + section.raw_size as usize;
            if end > self.data.len() {
                return Err(Error::ReadOutOfBounds {
                    offset: section.raw_offset,
                    size: section.raw_size as usize,
                });
            }
            if !section.fits_address_space() {
                return Err(Error::OutOfRange {
                    address: section.virtual_address,
                    space: AddrSpace::Virtual,
                });
            }
        }

        for (i, a) in self.sections.iter().enumerate() {
            for b in &self.sections[i + 1..] {
                let raw_overlap = a.raw_offset < b.raw_end() && b.raw_offset < a.raw_end();
                let virt_overlap =
                    a.virtual_address < b.virtual_end() && b.virtual_address < a.virtual_end();
                if raw_overlap || virt_overlap {
                    return Err(Error::InvalidImage(format!(
                        "sections {} and {} overlap",
                        a.name, b.name
                    )));
                }
            }
        }

        debug!(
            "Loaded image {} ({} bytes, {} sections, {} imports, built {}, linker {})",
            self.meta.file_name,
            self.data.len(),
            self.sections.len(),
            self.imports.len(),
            self.meta.build_date,
            self.meta.linker
        );

        Ok(BinaryImage {
            data: self.data,
            sections: self.sections,
            imports: self.imports,
            meta: self.meta,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::mock::MockImageBuilder;
    use super::*;

    #[test]
    fn test_find_text_virtual_scenario() {
        // .text starts at PHYSICAL 0x1000 / VIRTUAL 0x401000
        let image = MockImageBuilder::new().string(0x1000, "data.grf").build();

        assert_eq!(image.find_text(b"data.grf", TextOptions::default()), Some(0x401000));
        assert_eq!(
            image.find_text(b"data.grf", TextOptions::default().physical()),
            Some(0x1000)
        );
        assert_eq!(image.find_text(b"rdata.grf", TextOptions::default()), None);
    }

    #[test]
    fn test_translation_round_trip() {
        let image = MockImageBuilder::new().build();
        for section in image.sections() {
            for phys in [section.raw_offset, section.raw_offset + 0x10, section.raw_end() - 1] {
                let virt = image.to_virtual(phys).unwrap();
                assert_eq!(image.to_physical(virt).unwrap(), phys);
                assert_eq!(image.to_virtual(image.to_physical(virt).unwrap()).unwrap(), virt);
            }
        }
    }

    #[test]
    fn test_translation_out_of_range() {
        let image = MockImageBuilder::new().build();
        assert!(matches!(
            image.to_virtual(0x10),
            Err(Error::OutOfRange {
                address: 0x10,
                space: AddrSpace::Physical
            })
        ));
        assert!(matches!(
            image.to_physical(0x10),
            Err(Error::OutOfRange {
                space: AddrSpace::Virtual,
                ..
            })
        ));
    }

    #[test]
    fn test_find_pattern_bounded_window() {
        let image = MockImageBuilder::new()
            .code(0x10, &[0x6A, 0x07])
            .code(0x80, &[0x6A, 0x07])
            .build();
        let pattern = Pattern::literal(&[0x6A, 0x07]);
        let (code_start, _) = image.code_range();

        assert_eq!(image.find_pattern(&pattern).unwrap().offset, code_start + 0x10);
        let later = image
            .find_pattern_in(&pattern, code_start + 0x11, code_start + 0x100)
            .unwrap();
        assert_eq!(later.offset, code_start + 0x80);
        // the last byte would fall outside the window
        assert!(
            image
                .find_pattern_in(&pattern, code_start + 0x11, code_start + 0x81)
                .is_none()
        );
        assert!(image.find_pattern_in(&pattern, 0x500, 0x400).is_none());
    }

    #[test]
    fn test_find_pattern_checks_byte_sets() {
        // 81 3C shares the prefiltered bits with 81 38..3F but is not in the set
        let image = MockImageBuilder::new()
            .code(0x20, &[0x81, 0x3C, 0x11])
            .code(0x30, &[0x81, 0x3E, 0x11])
            .build();
        let pattern = Pattern::literal(&[0x81])
            + Pattern::one_of(&[0x38, 0x39, 0x3A, 0x3B, 0x3E, 0x3F])
            + Pattern::literal(&[0x11]);
        let (code_start, _) = image.code_range();

        assert_eq!(image.find_pattern(&pattern).unwrap().offset, code_start + 0x30);
        assert!(
            image
                .find_pattern_in(&pattern, code_start, code_start + 0x30)
                .is_none()
        );
    }

    #[test]
    fn test_read_helpers_and_call_target() {
        // CALL -0x20 at code offset 0x40
        let image = MockImageBuilder::new()
            .code(0x40, &[0xE8, 0xE0, 0xFF, 0xFF, 0xFF])
            .build();
        let (code_start, _) = image.code_range();
        let call = code_start + 0x40;

        assert_eq!(image.read_bytes(call, 1).unwrap(), &[0xE8]);
        assert_eq!(image.read_u32(call + 1).unwrap(), 0xFFFF_FFE0);
        let next = image.to_virtual(call + 5).unwrap();
        assert_eq!(image.call_target(call).unwrap(), next - 0x20);
        assert!(image.read_bytes(u32::MAX - 1, 4).is_err());
    }

    #[test]
    fn test_find_import() {
        let image = MockImageBuilder::new()
            .import("KERNEL32.dll", "GetModuleHandleA", 0x5A1000)
            .import("USER32.dll", "MessageBoxA", 0x5A1100)
            .build();
        assert_eq!(image.find_import("GetModuleHandleA", Some("kernel32.dll")), Some(0x5A1000));
        assert_eq!(image.find_import("MessageBoxA", None), Some(0x5A1100));
        assert_eq!(image.find_import("MessageBoxA", Some("KERNEL32.dll")), None);
    }

    #[test]
    fn test_builder_rejects_overlapping_sections() {
        let result = BinaryImage::builder()
            .data(vec![0; 0x3000])
            .section(Section::code(".text", 0x400, 0x1000, 0x401000))
            .section(Section::data(".rdata", 0x1000, 0x1000, 0x402000))
            .build();
        assert!(matches!(result, Err(Error::InvalidImage(_))));

        let result = BinaryImage::builder()
            .data(vec![0; 0x100])
            .section(Section::code(".text", 0x0, 0x200, 0x401000))
            .build();
        assert!(matches!(result, Err(Error::ReadOutOfBounds { .. })));
    }

    #[test]
    fn test_builder_rejects_section_past_address_space() {
        let result = BinaryImage::builder()
            .data(vec![0; 0x2000])
            .section(Section::data(".data", 0, 0x2000, 0xFFFF_F000))
            .build();
        assert!(matches!(
            result,
            Err(Error::OutOfRange {
                address: 0xFFFF_F000,
                space: AddrSpace::Virtual
            })
        ));

        let image = BinaryImage::builder()
            .data(vec![0; 0x2000])
            .section(Section::data(".data", 0, 0x1000, 0xFFFF_E000))
            .build()
            .unwrap();
        assert_eq!(image.find_text(b"abc", TextOptions::default()), None);
        assert_eq!(image.to_virtual(0xFFF).unwrap(), 0xFFFF_EFFF);
    }

    #[test]
    fn test_hex_round_trip() {
        for value in [0u32, 1, 0x0040_1000, 0x1234_5678, u32::MAX] {
            let addr = Address::virt(value);
            assert_eq!(decode_le_hex(&addr.to_hex()).unwrap(), value);
        }
        assert_eq!(Address::virt(0x1234_5678).to_hex(), "78 56 34 12");
        assert!(decode_le_hex("78 56 34").is_err());
        assert!(decode_le_hex("78 56 34 12 00").is_err());
        assert!(decode_le_hex("78 56 34 ZZ").is_err());
    }
}
