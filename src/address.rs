use crate::register::{address_cycle_offset, Registers};

/// A page number, counted from the start of the chip
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Page(pub u32);

/// An erase block number, counted from the start of the chip
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Block(pub u32);

impl Block {
    /// First page of the block
    pub fn first_page(self, pages_per_block: u32) -> Page {
        Page(self.0 * pages_per_block)
    }
}

impl From<u32> for Page {
    fn from(page: u32) -> Page {
        Page(page)
    }
}

impl From<u32> for Block {
    fn from(block: u32) -> Block {
        Block(block)
    }
}

impl From<Page> for u32 {
    fn from(page: Page) -> u32 {
        page.0
    }
}

/// Address bytes clocked out after a command, at most two column bytes
/// followed by two or three row bytes.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressCycle {
    bytes: [u8; AddressCycle::MAX_LEN],
    len: u8,
}

impl AddressCycle {
    pub const MAX_LEN: usize = 5;

    /// No address at all
    pub const fn none() -> Self {
        Self {
            bytes: [0; Self::MAX_LEN],
            len: 0,
        }
    }

    /// Column and/or row address. `wide_row` adds the third row byte needed
    /// once the chip has more than 65536 pages.
    pub fn new(column: Option<u16>, page: Option<Page>, wide_row: bool) -> Self {
        let mut cycle = Self::none();
        if let Some(column) = column {
            cycle.push(column as u8);
            cycle.push((column >> 8) as u8);
        }
        if let Some(Page(row)) = page {
            cycle.push(row as u8);
            cycle.push((row >> 8) as u8);
            if wide_row {
                cycle.push((row >> 16) as u8);
            }
        }
        cycle
    }

    /// Single byte address, as taken by READ ID and READ PARAMETER PAGE
    pub fn single(column: u8) -> Self {
        let mut cycle = Self::none();
        cycle.push(column);
        cycle
    }

    fn push(&mut self, byte: u8) {
        self.bytes[self.len as usize] = byte;
        self.len += 1;
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len()]
    }

    /// Load the cycles into the address ports, returns the cycle count
    pub(crate) fn write<R: Registers>(&self, regs: &R) -> usize {
        for (cycle, byte) in self.as_bytes().iter().enumerate() {
            regs.write8(address_cycle_offset(cycle), *byte);
        }
        self.len()
    }
}
