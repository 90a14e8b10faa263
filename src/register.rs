//! Register window of the NAND flash controller.
//!
//! Offsets are byte offsets from the controller base address.

use core::hint::spin_loop;
use core::ptr;

use bit::BitIndex;
use embassy_futures::yield_now;

use crate::error::Timeout;

pub const DATAPORT: usize = 0x00;
pub const COMCTRL: usize = 0x04;
pub const COMPORT0: usize = 0x08;
pub const COMPORT1_2: usize = 0x0C;
pub const DMA_COUNTER: usize = 0x20;
pub const SMC_ENABLE: usize = 0x24;
pub const MISC_STAT_PORT: usize = 0x28;
pub const HOST_STAT_CHANGE: usize = 0x2C;
pub const CHIP_ENABLE_CTRL: usize = 0x44;
pub const NAND_TYPE_SEL: usize = 0x48;
pub const REDUNT_ECC_STAT_MASK: usize = 0x4C;
pub const READ_CYCLE_PULE_CTRL: usize = 0x50;
pub const MISC_CTRL: usize = 0x54;
pub const PAGESIZE_DIVIDER_SEL: usize = 0x5C;
pub const ECC_BCH_CTRL: usize = 0x8C;
pub const ECC_BCH_INT_MASK: usize = 0x90;
pub const ECC_BCH_INT_STAT1: usize = 0x94;
pub const ECC_BCH_INT_STAT2: usize = 0x98;
pub const ECC_BCH_ERR_POS1: usize = 0x9C;

pub const NFC_DMA_GCR: usize = 0x100;
pub const NFC_DMA_IER: usize = 0x104;
pub const NFC_DMA_ISR: usize = 0x108;
pub const NFC_DMA_DESPR: usize = 0x10C;
pub const NFC_DMA_CCR: usize = 0x120;

/// OOB staging area, filled by the ECC engine on reads and drained on programs
pub const ECC_FIFO_0: usize = 0x1C0;
pub const ECC_FIFO_LEN: usize = 64;

/// Size of the register window
pub const WINDOW_SIZE: usize = 0x200;

// COMCTRL
pub const COMCTRL_TRIGGER_CMD: u8 = 1 << 0;
pub const COMCTRL_MULT_COMMANDS: u8 = 1 << 4;
pub const COMCTRL_CYCLES_NONE: u8 = 0;
pub const COMCTRL_CYCLES_SINGLE: u8 = 1 << 5;
pub const COMCTRL_NFC_2_NAND: u8 = 0;
pub const COMCTRL_NAND_2_NFC: u8 = 1 << 6;
pub const COMCTRL_HAS_DATA: u8 = 0;
pub const COMCTRL_NO_DATA: u8 = 1 << 7;

// SMC_ENABLE
pub const SMC_REDUNDANT_AREA: u32 = 1 << 1;

// MISC_STAT_PORT
pub const MSP_READY: u32 = 1 << 0;
pub const MSP_TRANSFER_ACTIVE: u32 = 1 << 1;
pub const MSP_CMD_READY: u32 = 1 << 2;

// HOST_STAT_CHANGE
pub const HSC_B2R: u32 = 1 << 3;

// CHIP_ENABLE_CTRL, active low
pub const CE_NONE: u8 = 0xff;
pub const CE_CHIP0: u8 = 0xfe;

// NAND_TYPE_SEL
pub const TYPESEL_PAGE_512: u8 = 0;
pub const TYPESEL_PAGE_2K: u8 = 1;
pub const TYPESEL_PAGE_4K: u8 = 2;
pub const TYPESEL_PAGE_8K: u8 = 3;
pub const TYPESEL_WIDTH_8: u8 = 0;
pub const TYPESEL_WIDTH_16: u8 = 1 << 3;
pub const TYPESEL_WP_DIS: u8 = 1 << 4;
pub const TYPESEL_DIRECT_MAP: u8 = 1 << 5;
pub const TYPESEL_CHECK_ALLFF: u8 = 1 << 6;

// REDUNT_ECC_STAT_MASK
pub const RESM_MASKABLE_INT_DIS: u32 = 1 << 6;
pub const RESM_UNCORRECTABLE_ERR_INT_DIS: u32 = 1 << 2;
pub const RESM_REDUNTANT_ERR_INT_DIS: u32 = 1 << 0;
pub const RESM_MASK: u32 =
    RESM_MASKABLE_INT_DIS | RESM_UNCORRECTABLE_ERR_INT_DIS | RESM_REDUNTANT_ERR_INT_DIS;

// READ_CYCLE_PULE_CTRL
pub const PULE_DIVISOR_MASK: u32 = 0xffff_0000;

// MISC_CTRL
pub const MISCCTRL_SOFTWARE_ECC: u32 = 1 << 2;

// PAGESIZE_DIVIDER_SEL
pub const PAGE_BLOCK_DIVISOR_MASK: u32 = 0xE0;
pub const PAGE_BLOCK_DIVISOR_SHIFT: u32 = 5;

// ECC_BCH_CTRL
pub const EBC_ECC_TYPE_MASK: u32 = 0xF;
pub const EBC_READ_RESUME: u32 = 1 << 8;

// ECC_BCH_INT_MASK
pub const EBIM_INT_EN: u16 = (1 << 8) | (1 << 0);

// ECC_BCH_INT_STAT1
pub const EBIS1_ERROR: u32 = 1 << 0;
pub const EBIS1_CORRECTION_DONE: u32 = 1 << 8;

// ECC_BCH_INT_STAT2
pub const EBIS2_ERROR_OOB: u32 = 1 << 11;

// NFC_DMA_GCR
pub const DMA_GCR_DMA_EN: u32 = 1 << 0;
pub const DMA_GCR_SOFTRESET: u32 = 1 << 8;

// NFC_DMA_IER / NFC_DMA_ISR
pub const DMA_IER_INT_EN: u32 = 1 << 0;
pub const DMA_ISR_INT_STS: u32 = 1 << 0;

// NFC_DMA_CCR
pub const DMA_CCR_EVTCODE: u32 = 0x0f;
pub const DMA_CCR_RUN: u32 = 1 << 7;
pub const DMA_CCR_PERIPHERAL_TO_IF: u32 = 1 << 22;

/// Offset of the register holding address cycle `cycle`.
///
/// Cycles are packed two per 32-bit port starting at `COMPORT1_2`.
pub const fn address_cycle_offset(cycle: usize) -> usize {
    COMPORT1_2 + 4 * (cycle / 2) + cycle % 2
}

/// Access to the controller register window.
///
/// All methods take `&self`: the window is shared between the driver and its
/// interrupt handler, the same way the hardware is.
pub trait Registers {
    fn read8(&self, offset: usize) -> u8;
    fn read16(&self, offset: usize) -> u16;
    fn read32(&self, offset: usize) -> u32;
    fn write8(&self, offset: usize, val: u8);
    fn write16(&self, offset: usize, val: u16);
    fn write32(&self, offset: usize, val: u32);

    fn get_bit(&self, offset: usize, mask: u32) -> bool {
        self.read32(offset) & mask != 0
    }

    fn set_bit(&self, offset: usize, mask: u32) {
        let val = self.read32(offset);
        self.write32(offset, val | mask);
    }

    fn clear_bit(&self, offset: usize, mask: u32) {
        let val = self.read32(offset);
        self.write32(offset, val & !mask);
    }

    /// Spin until the bits in `mask` read as clear (`expect_clear`) or as set,
    /// for at most `max_iterations` reads.
    fn poll_until(
        &self,
        offset: usize,
        mask: u32,
        expect_clear: bool,
        max_iterations: u32,
    ) -> Result<(), Timeout> {
        for _ in 0..max_iterations {
            if self.get_bit(offset, mask) != expect_clear {
                return Ok(());
            }
            spin_loop();
        }
        Err(Timeout)
    }
}

impl<T: Registers + ?Sized> Registers for &T {
    fn read8(&self, offset: usize) -> u8 {
        (**self).read8(offset)
    }

    fn read16(&self, offset: usize) -> u16 {
        (**self).read16(offset)
    }

    fn read32(&self, offset: usize) -> u32 {
        (**self).read32(offset)
    }

    fn write8(&self, offset: usize, val: u8) {
        (**self).write8(offset, val)
    }

    fn write16(&self, offset: usize, val: u16) {
        (**self).write16(offset, val)
    }

    fn write32(&self, offset: usize, val: u32) {
        (**self).write32(offset, val)
    }
}

/// Same contract as [`Registers::poll_until`], yielding to the executor
/// between reads.
pub async fn poll_until_async<R: Registers>(
    regs: &R,
    offset: usize,
    mask: u32,
    expect_clear: bool,
    max_iterations: u32,
) -> Result<(), Timeout> {
    for _ in 0..max_iterations {
        if regs.get_bit(offset, mask) != expect_clear {
            return Ok(());
        }
        yield_now().await;
    }
    Err(Timeout)
}

/// Memory mapped register window
#[derive(Debug, Clone, Copy)]
pub struct Mmio {
    base: *mut u8,
}

impl Mmio {
    /// # Safety
    ///
    /// `base` must point to the mapped register window of a WM8xxx NAND
    /// controller, valid for [`WINDOW_SIZE`] bytes for as long as the `Mmio`
    /// and its copies are used.
    pub const unsafe fn new(base: *mut u8) -> Self {
        Self { base }
    }

    fn at<T>(&self, offset: usize) -> *mut T {
        debug_assert!(offset + core::mem::size_of::<T>() <= WINDOW_SIZE);
        self.base.wrapping_add(offset).cast()
    }
}

// SAFETY: the window is device memory, every access goes through volatile reads/writes.
unsafe impl Send for Mmio {}
unsafe impl Sync for Mmio {}

impl Registers for Mmio {
    fn read8(&self, offset: usize) -> u8 {
        // SAFETY: in bounds of the window per `Mmio::new`.
        unsafe { ptr::read_volatile(self.at(offset)) }
    }

    fn read16(&self, offset: usize) -> u16 {
        // SAFETY: in bounds of the window per `Mmio::new`.
        unsafe { ptr::read_volatile(self.at(offset)) }
    }

    fn read32(&self, offset: usize) -> u32 {
        // SAFETY: in bounds of the window per `Mmio::new`.
        unsafe { ptr::read_volatile(self.at(offset)) }
    }

    fn write8(&self, offset: usize, val: u8) {
        // SAFETY: in bounds of the window per `Mmio::new`.
        unsafe { ptr::write_volatile(self.at(offset), val) }
    }

    fn write16(&self, offset: usize, val: u16) {
        // SAFETY: in bounds of the window per `Mmio::new`.
        unsafe { ptr::write_volatile(self.at(offset), val) }
    }

    fn write32(&self, offset: usize, val: u32) {
        // SAFETY: in bounds of the window per `Mmio::new`.
        unsafe { ptr::write_volatile(self.at(offset), val) }
    }
}

/// NAND status byte as returned by the STATUS command
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusRegister {
    pub not_write_protected: bool,
    pub ready: bool,
    pub fail: bool,
    pub raw: u8,
}

impl From<u8> for StatusRegister {
    fn from(val: u8) -> StatusRegister {
        StatusRegister {
            not_write_protected: val.bit(7),
            ready: val.bit(6),
            fail: val.bit(0),
            raw: val,
        }
    }
}

/// The five bytes returned by READ ID
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NandId(pub [u8; NandId::LEN]);

impl NandId {
    pub const LEN: usize = 5;

    pub fn manufacturer(&self) -> u8 {
        self.0[0]
    }

    pub fn device(&self) -> u8 {
        self.0[1]
    }
}
