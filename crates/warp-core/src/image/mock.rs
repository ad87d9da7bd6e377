//! Test doubles for [`ReadImage`].

use std::cell::{Cell, RefCell};

use super::{
    BinaryImage, BuildDate, ImageMeta, LinkerVersion, ReadImage, Section, TextOptions,
};
use crate::error::Result;
use crate::pattern::{Match, Pattern};

pub const IMAGE_BASE: u32 = 0x40_0000;
pub const TEXT_RAW: u32 = 0x1000;
pub const TEXT_SIZE: u32 = 0x2000;
pub const RDATA_RAW: u32 = 0x3000;
pub const DATA_RAW: u32 = 0x4000;
pub const RSRC_RAW: u32 = 0x5000;
const IMAGE_SIZE: usize = 0x6000;

/// VIRTUAL address of a PHYSICAL offset in the mock layout.
pub fn va(phys: u32) -> u32 {
    phys + IMAGE_BASE
}

/// Builds a small 32-bit image where every section's VIRTUAL address is its
/// PHYSICAL offset plus [`IMAGE_BASE`].
pub struct MockImageBuilder {
    data: Vec<u8>,
    imports: Vec<(String, String, u32)>,
    meta: ImageMeta,
}

impl MockImageBuilder {
    pub fn new() -> Self {
        Self {
            data: vec![0; IMAGE_SIZE],
            imports: Vec::new(),
            meta: ImageMeta {
                build_date: BuildDate::new(20150101),
                linker: LinkerVersion::new(11, 0),
                file_name: "client.exe".to_string(),
                resource_dir: None,
            },
        }
    }

    pub fn bytes(mut self, phys: u32, bytes: &[u8]) -> Self {
        let start = phys as usize;
        self.data[start..start + bytes.len()].copy_from_slice(bytes);
        self
    }

    /// Write bytes at an offset relative to the start of `.text`.
    pub fn code(self, offset: u32, bytes: &[u8]) -> Self {
        self.bytes(TEXT_RAW + offset, bytes)
    }

    /// Write a NUL-terminated string (the buffer is zero-filled).
    pub fn string(self, phys: u32, text: &str) -> Self {
        self.bytes(phys, text.as_bytes())
    }

    pub fn import(mut self, module: &str, function: &str, address: u32) -> Self {
        self.imports
            .push((module.to_string(), function.to_string(), address));
        self
    }

    pub fn build_date(mut self, yyyymmdd: u32) -> Self {
        self.meta.build_date = BuildDate::new(yyyymmdd);
        self
    }

    pub fn linker(mut self, major: u8, minor: u8) -> Self {
        self.meta.linker = LinkerVersion::new(major, minor);
        self
    }

    pub fn resource_dir(mut self, phys: u32) -> Self {
        self.meta.resource_dir = Some(phys);
        self
    }

    pub fn build(self) -> BinaryImage {
        let mut builder = BinaryImage::builder()
            .data(self.data)
            .meta(self.meta)
            .section(Section::code(".text", TEXT_RAW, TEXT_SIZE, va(TEXT_RAW)))
            .section(Section::data(".rdata", RDATA_RAW, 0x1000, va(RDATA_RAW)))
            .section(Section::data(".data", DATA_RAW, 0x1000, va(DATA_RAW)))
            .section(Section::data(".rsrc", RSRC_RAW, 0x1000, va(RSRC_RAW)));
        for (module, function, address) in &self.imports {
            builder = builder.import(module, function, *address);
        }
        builder.build().expect("mock layout is valid")
    }
}

/// Forwards to an inner image and records every search it is asked to run.
pub struct CountingImage<'a, I: ReadImage + ?Sized> {
    inner: &'a I,
    text_scans: Cell<usize>,
    patterns: RefCell<Vec<Pattern>>,
}

impl<'a, I: ReadImage + ?Sized> CountingImage<'a, I> {
    pub fn new(inner: &'a I) -> Self {
        Self {
            inner,
            text_scans: Cell::new(0),
            patterns: RefCell::new(Vec::new()),
        }
    }

    pub fn text_scans(&self) -> usize {
        self.text_scans.get()
    }

    pub fn pattern_scans(&self) -> usize {
        self.patterns.borrow().len()
    }

    pub fn scans(&self) -> usize {
        self.text_scans() + self.pattern_scans()
    }

    pub fn recorded_patterns(&self) -> Vec<Pattern> {
        self.patterns.borrow().clone()
    }
}

impl<I: ReadImage + ?Sized> ReadImage for CountingImage<'_, I> {
    fn find_text(&self, needle: &[u8], opts: TextOptions) -> Option<u32> {
        self.text_scans.set(self.text_scans.get() + 1);
        self.inner.find_text(needle, opts)
    }

    fn find_pattern_in(&self, pattern: &Pattern, from: u32, to: u32) -> Option<Match> {
        self.patterns.borrow_mut().push(pattern.clone());
        self.inner.find_pattern_in(pattern, from, to)
    }

    fn read_bytes(&self, addr: u32, size: usize) -> Result<&[u8]> {
        self.inner.read_bytes(addr, size)
    }

    fn find_import(&self, function: &str, module: Option<&str>) -> Option<u32> {
        self.inner.find_import(function, module)
    }

    fn to_virtual(&self, phys: u32) -> Result<u32> {
        self.inner.to_virtual(phys)
    }

    fn to_physical(&self, virt: u32) -> Result<u32> {
        self.inner.to_physical(virt)
    }

    fn code_range(&self) -> (u32, u32) {
        self.inner.code_range()
    }

    fn meta(&self) -> &ImageMeta {
        self.inner.meta()
    }
}
