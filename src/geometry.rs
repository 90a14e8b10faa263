//! Chip geometry and the ECC/OOB layout the controller derives from it.
//!
//! Everything here is validated once, before the controller is configured;
//! a [`Geometry`] that exists is one the hardware can drive.

use core::ops::Range;

use crate::address::Page;
use crate::ecc::ErrorReport;
use crate::error::{Error, Unsupported};
use crate::register::{
    ECC_FIFO_LEN, TYPESEL_PAGE_2K, TYPESEL_PAGE_4K, TYPESEL_PAGE_512, TYPESEL_PAGE_8K,
    TYPESEL_WIDTH_16, TYPESEL_WIDTH_8,
};
use crate::DMA_BUFFER_SIZE;

/// Supported page (write) sizes
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteSize {
    Page512,
    Page2K,
    Page4K,
    Page8K,
    Page16K,
}

impl WriteSize {
    pub const fn bytes(self) -> u32 {
        match self {
            WriteSize::Page512 => 512,
            WriteSize::Page2K => 2048,
            WriteSize::Page4K => 4096,
            WriteSize::Page8K => 8192,
            WriteSize::Page16K => 16384,
        }
    }

    /// Page type field of `NAND_TYPE_SEL`. The field is two bits wide, 16 KiB
    /// pages map to the 8 KiB code.
    pub const fn type_select(self) -> u8 {
        match self {
            WriteSize::Page512 => TYPESEL_PAGE_512,
            WriteSize::Page2K => TYPESEL_PAGE_2K,
            WriteSize::Page4K => TYPESEL_PAGE_4K,
            WriteSize::Page8K | WriteSize::Page16K => TYPESEL_PAGE_8K,
        }
    }

    pub const fn ecc(self) -> EccConfig {
        match self {
            WriteSize::Page512 => EccConfig::new(512, 1, 1, EccMode::Bit1),
            WriteSize::Page2K => EccConfig::new(512, 4, 4, EccMode::Bit4),
            WriteSize::Page4K => EccConfig::new(512, 4, 8, EccMode::Bit4),
            WriteSize::Page8K => EccConfig::new(1024, 24, 8, EccMode::Bit24Per1K),
            WriteSize::Page16K => EccConfig::new(1024, 40, 16, EccMode::Bit40Per1K),
        }
    }

    pub const fn oob_layout(self) -> OobLayout {
        match self {
            WriteSize::Page512 => OobLayout {
                free_len: 8,
                ecc_len: 2,
            },
            _ => OobLayout {
                free_len: 24,
                ecc_len: 7,
            },
        }
    }
}

impl TryFrom<u32> for WriteSize {
    type Error = Unsupported;

    fn try_from(val: u32) -> Result<Self, Self::Error> {
        match val {
            512 => Ok(WriteSize::Page512),
            2048 => Ok(WriteSize::Page2K),
            4096 => Ok(WriteSize::Page4K),
            8192 => Ok(WriteSize::Page8K),
            16384 => Ok(WriteSize::Page16K),
            _ => Err(Unsupported::WriteSize(val)),
        }
    }
}

/// Supported pages per erase block
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PagesPerBlock {
    P16,
    P32,
    P64,
    P128,
    P256,
    P512,
}

impl PagesPerBlock {
    pub const fn count(self) -> u32 {
        16 << self.divisor_code()
    }

    /// Value of the divisor field in `PAGESIZE_DIVIDER_SEL`
    pub const fn divisor_code(self) -> u32 {
        match self {
            PagesPerBlock::P16 => 0,
            PagesPerBlock::P32 => 1,
            PagesPerBlock::P64 => 2,
            PagesPerBlock::P128 => 3,
            PagesPerBlock::P256 => 4,
            PagesPerBlock::P512 => 5,
        }
    }
}

impl TryFrom<u32> for PagesPerBlock {
    type Error = Unsupported;

    fn try_from(val: u32) -> Result<Self, Self::Error> {
        match val {
            16 => Ok(PagesPerBlock::P16),
            32 => Ok(PagesPerBlock::P32),
            64 => Ok(PagesPerBlock::P64),
            128 => Ok(PagesPerBlock::P128),
            256 => Ok(PagesPerBlock::P256),
            512 => Ok(PagesPerBlock::P512),
            _ => Err(Unsupported::PagesPerBlock(val)),
        }
    }
}

/// BCH mode field of `ECC_BCH_CTRL`
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EccMode {
    Bit1 = 0,
    Bit4 = 1,
    Bit8 = 2,
    Bit12 = 3,
    Bit16 = 4,
    Bit24Per1K = 5,
    Bit40Per1K = 6,
    Bit44Per1K = 7,
    Bit44 = 8,
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EccConfig {
    /// Data bytes covered by one ECC step
    pub block_size: u16,
    /// Correctable bits per step
    pub strength: u8,
    /// Parity bytes stored after each step
    pub parity_bytes: u16,
    pub steps: u16,
    pub mode: EccMode,
}

impl EccConfig {
    const fn new(block_size: u16, strength: u8, steps: u16, mode: EccMode) -> Self {
        // BCH over GF(2^13) for 512 byte steps, GF(2^14) for 1 KiB steps
        let field_bits = if block_size > 512 { 14 } else { 13 };
        let parity_bytes = (field_bits * strength as u16).div_ceil(8);
        Self {
            block_size,
            strength,
            parity_bytes,
            steps,
            mode,
        }
    }

    /// Error count at or above which the engine's report is uncorrectable.
    ///
    /// The count field is four bits wide, so the sentinel is capped at 15 and
    /// the 24 and 40 bit modes correct at most [`Self::max_correctable`] bits
    /// per step.
    pub const fn uncorrectable_sentinel(&self) -> u8 {
        if self.strength >= 0xF {
            0xF
        } else {
            self.strength + 1
        }
    }

    /// Most bit errors per step the driver corrects
    pub const fn max_correctable(&self) -> u8 {
        self.uncorrectable_sentinel() - 1
    }

    /// Bytes taken by the interleaved data and parity of all steps
    pub const fn data_region(&self) -> u32 {
        (self.block_size as u32 + self.parity_bytes as u32) * self.steps as u32
    }
}

/// Layout of the OOB bytes exposed through the staging area: free bytes
/// first, then the parity protecting them.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OobLayout {
    pub free_len: u8,
    pub ecc_len: u8,
}

impl OobLayout {
    pub fn free(&self) -> Range<usize> {
        0..self.free_len as usize
    }

    pub fn ecc_positions(&self) -> Range<usize> {
        self.free_len as usize..(self.free_len + self.ecc_len) as usize
    }

    /// Staged bytes covered by the layout
    pub const fn bytes(&self) -> u32 {
        self.free_len as u32 + self.ecc_len as u32
    }
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusWidth {
    X8,
    X16,
}

impl BusWidth {
    pub const fn type_select(self) -> u8 {
        match self {
            BusWidth::X8 => TYPESEL_WIDTH_8,
            BusWidth::X16 => TYPESEL_WIDTH_16,
        }
    }
}

/// Validated chip geometry
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    write_size: WriteSize,
    pages_per_block: PagesPerBlock,
    oob_size: u32,
    chip_size: u64,
    bus_width: BusWidth,
    ecc: EccConfig,
    oob_layout: OobLayout,
}

impl Geometry {
    /// Validate the geometry reported by chip identification.
    ///
    /// `page_size` and `block_size` are the write and erase sizes in bytes,
    /// `oob_size` the spare bytes per page and `chip_size` the capacity of
    /// the chip in bytes.
    ///
    /// 16 KiB pages are rejected with [`Unsupported::EccSteps`]: their 16 ECC
    /// steps do not fit the bank field of the error report.
    pub fn new(
        page_size: u32,
        block_size: u32,
        oob_size: u32,
        chip_size: u64,
        bus_width: BusWidth,
    ) -> Result<Self, Error> {
        let write_size = WriteSize::try_from(page_size)?;
        if block_size % page_size != 0 {
            return Err(Unsupported::PagesPerBlock(block_size / page_size).into());
        }
        let pages_per_block = PagesPerBlock::try_from(block_size / page_size)?;

        if chip_size == 0 || chip_size % block_size as u64 != 0 {
            return Err(Unsupported::Capacity.into());
        }
        // Page numbers go out as at most three row bytes
        if chip_size / page_size as u64 > 1 << 24 {
            return Err(Unsupported::Capacity.into());
        }

        let ecc = write_size.ecc();
        if ecc.steps > ErrorReport::BANKS {
            return Err(Unsupported::EccSteps(ecc.steps).into());
        }
        let oob_layout = write_size.oob_layout();
        if ecc.data_region() + oob_layout.bytes() > page_size + oob_size {
            return Err(Unsupported::SpareArea(oob_size).into());
        }

        Ok(Self {
            write_size,
            pages_per_block,
            oob_size,
            chip_size,
            bus_width,
            ecc,
            oob_layout,
        })
    }

    pub fn write_size(&self) -> WriteSize {
        self.write_size
    }

    pub fn page_size(&self) -> usize {
        self.write_size.bytes() as usize
    }

    pub fn oob_size(&self) -> usize {
        self.oob_size as usize
    }

    pub fn pages_per_block(&self) -> PagesPerBlock {
        self.pages_per_block
    }

    pub fn block_size(&self) -> usize {
        self.page_size() * self.pages_per_block.count() as usize
    }

    pub fn chip_size(&self) -> u64 {
        self.chip_size
    }

    pub fn page_count(&self) -> u32 {
        (self.chip_size / self.write_size.bytes() as u64) as u32
    }

    pub fn block_count(&self) -> u32 {
        self.page_count() / self.pages_per_block.count()
    }

    pub fn bus_width(&self) -> BusWidth {
        self.bus_width
    }

    pub fn ecc(&self) -> &EccConfig {
        &self.ecc
    }

    pub fn oob_layout(&self) -> &OobLayout {
        &self.oob_layout
    }

    /// True when row addresses need a third byte
    pub fn wide_row(&self) -> bool {
        self.page_count() > 1 << 16
    }

    /// Column of the first OOB byte, past the interleaved data and parity
    pub fn oob_column(&self) -> u16 {
        self.ecc.data_region() as u16
    }

    /// Capacity reachable through the 32-bit offsets of `embedded-storage`
    pub fn storage_capacity(&self) -> usize {
        usize::try_from(self.chip_size.min(1 << 32)).unwrap_or(usize::MAX)
    }

    /// Bytes of the staging area that belong to this chip's OOB
    pub fn staged_oob_len(&self) -> usize {
        self.oob_size().min(ECC_FIFO_LEN)
    }

    pub(crate) fn check_page(&self, page: Page) -> Result<(), Error> {
        if page.0 >= self.page_count() {
            return Err(Error::OutOfBounds);
        }
        Ok(())
    }
}

const _: () = assert!(WriteSize::Page16K.bytes() as usize <= DMA_BUFFER_SIZE);
