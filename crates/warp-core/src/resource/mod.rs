//! The image's resource directory as a tree.
//!
//! ```text
//!   directory (16 bytes)      ... named count @12, id count @14
//!   └─ entry (8 bytes) × n    name/id | target
//!        name  high bit set → offset of a UTF-16 name (u16 length + units)
//!        target high bit set → offset of a sub-directory
//!        otherwise          → offset of a data entry (16 bytes: rva, size, code page)
//! ```
//!
//! Every offset is relative to the start of the resource directory.

use std::collections::HashSet;
use std::fmt;
use std::rc::Rc;

use tracing::debug;

use crate::error::{Error, Result};
use crate::image::ReadImage;
use crate::resolver::Session;

/// Registry key the parsed tree is cached under.
pub const RSRC_TREE: &str = "RsrcTree";

const DIRECTORY_SIZE: u32 = 16;
const ENTRY_SIZE: u32 = 8;
const DATA_ENTRY_SIZE: usize = 16;
const HIGH_BIT: u32 = 0x8000_0000;
/// Type, name and language make three levels; deeper nesting is malformed.
const MAX_DEPTH: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResourceId {
    Id(u32),
    Name(String),
}

impl From<u32> for ResourceId {
    fn from(id: u32) -> Self {
        ResourceId::Id(id)
    }
}

impl From<&str> for ResourceId {
    fn from(name: &str) -> Self {
        ResourceId::Name(name.to_string())
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceId::Id(id) => write!(f, "#{}", id),
            ResourceId::Name(name) => write!(f, "{}", name),
        }
    }
}

/// A leaf of the tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceData {
    /// PHYSICAL address of the data entry itself
    pub entry: u32,
    /// Relative virtual address of the resource bytes
    pub rva: u32,
    pub size: u32,
    pub code_page: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceEntry {
    pub id: ResourceId,
    pub node: ResourceNode,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceNode {
    Directory {
        /// PHYSICAL address of the directory header
        offset: u32,
        entries: Vec<ResourceEntry>,
    },
    Data(ResourceData),
}

impl ResourceNode {
    pub fn entries(&self) -> &[ResourceEntry] {
        match self {
            ResourceNode::Directory { entries, .. } => entries,
            ResourceNode::Data(_) => &[],
        }
    }

    pub fn child(&self, id: &ResourceId) -> Option<&ResourceNode> {
        self.entries()
            .iter()
            .find(|entry| entry.id == *id)
            .map(|entry| &entry.node)
    }

    pub fn as_data(&self) -> Option<&ResourceData> {
        match self {
            ResourceNode::Data(data) => Some(data),
            ResourceNode::Directory { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceTree {
    root: ResourceNode,
}

impl ResourceTree {
    /// Parse the directory starting at PHYSICAL `dir_offset`.
    pub fn parse<I: ReadImage + ?Sized>(image: &I, dir_offset: u32) -> Result<Self> {
        let mut parser = Parser {
            image,
            base: dir_offset,
            visited: HashSet::new(),
        };
        let root = parser.directory(0, 0)?;
        debug!(
            "Parsed resource tree at 0x{:X} ({} directories)",
            dir_offset,
            parser.visited.len()
        );
        Ok(Self { root })
    }

    pub fn root(&self) -> &ResourceNode {
        &self.root
    }

    /// Walk `path` (type, name, language, ...) from the root.
    pub fn find(&self, path: &[ResourceId]) -> Option<&ResourceNode> {
        path.iter()
            .try_fold(&self.root, |node, id| node.child(id))
    }
}

struct Parser<'i, I: ReadImage + ?Sized> {
    image: &'i I,
    base: u32,
    visited: HashSet<u32>,
}

impl<I: ReadImage + ?Sized> Parser<'_, I> {
    fn at(&self, relative: u32, size: u32) -> Result<u32> {
        self.base
            .checked_add(relative)
            .filter(|addr| addr.checked_add(size).is_some())
            .ok_or(Error::ReadOutOfBounds {
                offset: relative,
                size: size as usize,
            })
    }

    fn directory(&mut self, relative: u32, depth: usize) -> Result<ResourceNode> {
        if depth >= MAX_DEPTH {
            return Err(Error::InvalidImage(format!(
                "resource directory +0x{:X} is nested deeper than {} levels",
                relative, MAX_DEPTH
            )));
        }
        if !self.visited.insert(relative) {
            return Err(Error::InvalidImage(format!(
                "resource directory +0x{:X} is referenced more than once",
                relative
            )));
        }

        let offset = self.at(relative, DIRECTORY_SIZE)?;
        let header = self.image.read_bytes(offset, DIRECTORY_SIZE as usize)?;
        let named = u16::from_le_bytes([header[12], header[13]]) as u32;
        let ids = u16::from_le_bytes([header[14], header[15]]) as u32;

        let mut entries = Vec::with_capacity((named + ids) as usize);
        for index in 0..named + ids {
            let entry = self.at(relative, DIRECTORY_SIZE + (index + 1) * ENTRY_SIZE)?
                + DIRECTORY_SIZE
                + index * ENTRY_SIZE;
            let name = self.image.read_u32(entry)?;
            let target = self.image.read_u32(entry + 4)?;

            let id = if name & HIGH_BIT != 0 {
                ResourceId::Name(self.name(name & !HIGH_BIT)?)
            } else {
                ResourceId::Id(name)
            };
            let node = if target & HIGH_BIT != 0 {
                self.directory(target & !HIGH_BIT, depth + 1)?
            } else {
                ResourceNode::Data(self.data(target)?)
            };
            entries.push(ResourceEntry { id, node });
        }

        Ok(ResourceNode::Directory { offset, entries })
    }

    fn name(&self, relative: u32) -> Result<String> {
        let offset = self.at(relative, 2)?;
        let len = self.image.read_bytes(offset, 2)?;
        let len = u16::from_le_bytes([len[0], len[1]]) as usize;

        let bytes = self.image.read_bytes(offset + 2, len * 2)?;
        let units: Vec<u16> = bytes
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        Ok(String::from_utf16_lossy(&units))
    }

    fn data(&self, relative: u32) -> Result<ResourceData> {
        let entry = self.at(relative, DATA_ENTRY_SIZE as u32)?;
        let bytes = self.image.read_bytes(entry, DATA_ENTRY_SIZE)?;
        let field = |i: usize| u32::from_le_bytes([bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]]);

        Ok(ResourceData {
            entry,
            rva: field(0),
            size: field(4),
            code_page: field(8),
        })
    }
}

impl<I: ReadImage + ?Sized> Session<'_, I> {
    /// The parsed resource tree, shared by everything in this session.
    pub fn resource_tree(&self) -> Result<Rc<ResourceTree>> {
        self.registry().get_or_try_insert_with(RSRC_TREE, || {
            let dir = self
                .image()
                .meta()
                .resource_dir
                .ok_or_else(|| Error::AnchorNotFound("resource directory not found".to_string()))?;
            ResourceTree::parse(self.image(), dir)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::mock::{MockImageBuilder, RSRC_RAW};

    fn put_u16(buf: &mut [u8], at: usize, value: u16) {
        buf[at..at + 2].copy_from_slice(&value.to_le_bytes());
    }

    fn put_u32(buf: &mut [u8], at: usize, value: u32) {
        buf[at..at + 4].copy_from_slice(&value.to_le_bytes());
    }

    /// root ─┬─ "TEXT" ── #1   → data +0x50
    ///       └─ #3     ── #101 → data +0x60
    fn sample_directory() -> Vec<u8> {
        let mut buf = vec![0u8; 0x80];

        put_u16(&mut buf, 0x0C, 1);
        put_u16(&mut buf, 0x0E, 1);
        put_u32(&mut buf, 0x10, HIGH_BIT | 0x70);
        put_u32(&mut buf, 0x14, HIGH_BIT | 0x20);
        put_u32(&mut buf, 0x18, 3);
        put_u32(&mut buf, 0x1C, HIGH_BIT | 0x38);

        put_u16(&mut buf, 0x2E, 1);
        put_u32(&mut buf, 0x30, 1);
        put_u32(&mut buf, 0x34, 0x50);

        put_u16(&mut buf, 0x46, 1);
        put_u32(&mut buf, 0x48, 101);
        put_u32(&mut buf, 0x4C, 0x60);

        put_u32(&mut buf, 0x50, 0x6000);
        put_u32(&mut buf, 0x54, 0x100);
        put_u32(&mut buf, 0x60, 0x6100);
        put_u32(&mut buf, 0x64, 0x20);
        put_u32(&mut buf, 0x68, 949);

        put_u16(&mut buf, 0x70, 4);
        for (i, ch) in "TEXT".encode_utf16().enumerate() {
            put_u16(&mut buf, 0x72 + i * 2, ch);
        }
        buf
    }

    #[test]
    fn test_parse_and_find() {
        let image = MockImageBuilder::new()
            .bytes(RSRC_RAW, &sample_directory())
            .resource_dir(RSRC_RAW)
            .build();
        let tree = ResourceTree::parse(&image, RSRC_RAW).unwrap();

        assert_eq!(tree.root().entries().len(), 2);
        assert_eq!(tree.root().entries()[0].id, ResourceId::from("TEXT"));

        let text = tree
            .find(&["TEXT".into(), 1u32.into()])
            .and_then(ResourceNode::as_data)
            .unwrap();
        assert_eq!(text.rva, 0x6000);
        assert_eq!(text.size, 0x100);
        assert_eq!(text.entry, RSRC_RAW + 0x50);

        let icon = tree.find(&[3u32.into(), 101u32.into()]).and_then(ResourceNode::as_data).unwrap();
        assert_eq!(icon.code_page, 949);

        assert!(tree.find(&[3u32.into(), 102u32.into()]).is_none());
        assert!(tree.find(&[]).is_some());
    }

    #[test]
    fn test_cycle_rejected() {
        let mut dir = sample_directory();
        // the first sub-directory points back at the root
        put_u32(&mut dir, 0x34, HIGH_BIT);
        let image = MockImageBuilder::new().bytes(RSRC_RAW, &dir).build();

        let err = ResourceTree::parse(&image, RSRC_RAW).unwrap_err();
        assert!(matches!(err, Error::InvalidImage(_)));
    }

    /// A chain of `count` directories, each holding one entry pointing at the next.
    fn nested_directories(count: usize) -> Vec<u8> {
        let step = (DIRECTORY_SIZE + ENTRY_SIZE) as usize;
        let mut buf = vec![0u8; count * step + DATA_ENTRY_SIZE];
        for level in 0..count {
            let at = level * step;
            put_u16(&mut buf, at + 0x0E, 1);
            put_u32(&mut buf, at + 0x10, 1);
            let next = ((level + 1) * step) as u32;
            let target = if level + 1 == count { next } else { HIGH_BIT | next };
            put_u32(&mut buf, at + 0x14, target);
        }
        buf
    }

    #[test]
    fn test_deep_nesting_rejected() {
        let image = MockImageBuilder::new()
            .bytes(RSRC_RAW, &nested_directories(100))
            .build();

        let err = ResourceTree::parse(&image, RSRC_RAW).unwrap_err();
        assert!(matches!(err, Error::InvalidImage(_)));
        assert!(err.to_string().contains("nested deeper than 8 levels"));
    }

    #[test]
    fn test_nesting_within_limit() {
        let image = MockImageBuilder::new()
            .bytes(RSRC_RAW, &nested_directories(MAX_DEPTH))
            .build();

        let tree = ResourceTree::parse(&image, RSRC_RAW).unwrap();
        let path = vec![ResourceId::Id(1); MAX_DEPTH];
        assert!(tree.find(&path).and_then(ResourceNode::as_data).is_some());
    }

    #[test]
    fn test_out_of_bounds_rejected() {
        let mut dir = sample_directory();
        put_u32(&mut dir, 0x1C, HIGH_BIT | 0x7FFF_0000);
        let image = MockImageBuilder::new().bytes(RSRC_RAW, &dir).build();

        let err = ResourceTree::parse(&image, RSRC_RAW).unwrap_err();
        assert!(matches!(err, Error::ReadOutOfBounds { .. }));
    }

    #[test]
    fn test_session_caches_tree() {
        let image = MockImageBuilder::new()
            .bytes(RSRC_RAW, &sample_directory())
            .resource_dir(RSRC_RAW)
            .build();
        let session = Session::new(&image);

        let first = session.resource_tree().unwrap();
        let second = session.resource_tree().unwrap();
        assert!(Rc::ptr_eq(&first, &second));
        assert!(session.registry().contains(RSRC_TREE));
    }

    #[test]
    fn test_missing_directory() {
        let image = MockImageBuilder::new().build();
        let session = Session::new(&image);

        let err = session.resource_tree().unwrap_err();
        assert_eq!(err.to_string(), "resource directory not found");
        assert!(!session.registry().contains(RSRC_TREE));
    }
}
