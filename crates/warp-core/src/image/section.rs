use serde::{Deserialize, Serialize};

/// One entry of the section table.
///
/// `virtual_address` is absolute (image base already added). Only the part
/// of a section that is backed by file bytes has a physical counterpart;
/// within that part the mapping is a constant shift.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    pub name: String,
    pub raw_offset: u32,
    pub raw_size: u32,
    pub virtual_address: u32,
    pub virtual_size: u32,
    pub executable: bool,
}

impl Section {
    pub fn code(name: &str, raw_offset: u32, raw_size: u32, virtual_address: u32) -> Self {
        Self {
            name: name.to_string(),
            raw_offset,
            raw_size,
            virtual_address,
            virtual_size: raw_size,
            executable: true,
        }
    }

    pub fn data(name: &str, raw_offset: u32, raw_size: u32, virtual_address: u32) -> Self {
        Self {
            executable: false,
            ..Self::code(name, raw_offset, raw_size, virtual_address)
        }
    }

    pub fn with_virtual_size(mut self, virtual_size: u32) -> Self {
        self.virtual_size = virtual_size;
        self
    }

    /// Number of bytes that exist both in the file and in memory.
    pub fn mapped_len(&self) -> u32 {
        if self.virtual_size == 0 {
            self.raw_size
        } else {
            self.raw_size.min(self.virtual_size)
        }
    }

    pub fn raw_end(&self) -> u32 {
        self.raw_offset.saturating_add(self.mapped_len())
    }

    pub fn virtual_end(&self) -> u32 {
        self.virtual_address.saturating_add(self.mapped_len())
    }

    pub fn contains_physical(&self, phys: u32) -> bool {
        (self.raw_offset..self.raw_end()).contains(&phys)
    }

    pub fn contains_virtual(&self, virt: u32) -> bool {
        (self.virtual_address..self.virtual_end()).contains(&virt)
    }

    /// The mapped range must not run past the end of the 32-bit space.
    pub fn fits_address_space(&self) -> bool {
        self.raw_offset.checked_add(self.mapped_len()).is_some()
            && self.virtual_address.checked_add(self.mapped_len()).is_some()
    }

    pub fn to_virtual(&self, phys: u32) -> Option<u32> {
        if !self.contains_physical(phys) {
            return None;
        }
        self.virtual_address.checked_add(phys - self.raw_offset)
    }

    pub fn to_physical(&self, virt: u32) -> Option<u32> {
        if !self.contains_virtual(virt) {
            return None;
        }
        self.raw_offset.checked_add(virt - self.virtual_address)
    }
}
