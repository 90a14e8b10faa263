//! Register-level command sequencing shared by the blocking and async drivers.
//!
//! Nothing in here waits on an interrupt: the front ends interleave the
//! steps below with their own (blocking or async) completion waits.

use embedded_hal::delay::DelayNs;
use embedded_hal_async::delay::DelayNs as AsyncDelayNs;

use crate::address::{AddressCycle, Page};
use crate::config::Config;
use crate::dma::{self, Direction};
use crate::ecc;
use crate::error::{Error, Wait};
use crate::geometry::Geometry;
use crate::register::*;
use crate::shared::SharedState;
use crate::DMA_BUFFER_SIZE;

/// NAND command bytes
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum Command {
    Read0 = 0x00,
    PageProgram = 0x10,
    ReadStart = 0x30,
    Erase1 = 0x60,
    Status = 0x70,
    SeqIn = 0x80,
    ReadId = 0x90,
    Erase2 = 0xD0,
    Param = 0xEC,
    Reset = 0xFF,
}

/// Bytes clocked out by READ PARAMETER PAGE, the first one is garbage on this
/// controller
pub(crate) const PARAM_READ_LEN: usize = 769;

pub(crate) struct Controller<'a, R> {
    pub(crate) regs: R,
    pub(crate) shared: &'a SharedState,
    pub(crate) config: Config,
    cursor: usize,
    chip: Option<u8>,
    pending_page: Option<Page>,
}

impl<'a, R: Registers> Controller<'a, R> {
    pub(crate) fn new(regs: R, shared: &'a SharedState, config: Config) -> Self {
        Self {
            regs,
            shared,
            config,
            cursor: 0,
            chip: None,
            pending_page: None,
        }
    }

    /// Bring the controller to a known state after attach
    pub(crate) fn startup(&self) {
        ecc::read_resume(&self.regs);
        self.regs.write32(REDUNT_ECC_STAT_MASK, RESM_MASK);
        if let Some(timing) = &self.config.timing {
            timing.apply(&self.regs);
        }
        debug!("NAND controller started");
    }

    /// Program page type, block divisor and ECC engine for `geometry`
    pub(crate) fn init_chip(&self, geometry: &Geometry) {
        let type_select = TYPESEL_CHECK_ALLFF
            | TYPESEL_WP_DIS
            | TYPESEL_DIRECT_MAP
            | geometry.bus_width().type_select()
            | geometry.write_size().type_select();
        self.regs.write8(NAND_TYPE_SEL, type_select);

        let divisor = self.regs.read32(PAGESIZE_DIVIDER_SEL) & !PAGE_BLOCK_DIVISOR_MASK;
        self.regs.write32(
            PAGESIZE_DIVIDER_SEL,
            divisor | (geometry.pages_per_block().divisor_code() << PAGE_BLOCK_DIVISOR_SHIFT),
        );

        let ecc = geometry.ecc();
        let bch = self.regs.read32(ECC_BCH_CTRL) & !EBC_ECC_TYPE_MASK;
        self.regs.write32(ECC_BCH_CTRL, bch | ecc.mode as u32);

        self.regs.clear_bit(MISC_CTRL, MISCCTRL_SOFTWARE_ECC);
        self.regs.write16(ECC_BCH_INT_MASK, EBIM_INT_EN);

        self.shared.set_ecc(ecc);
        info!(
            "NAND configured: {} byte pages, {} pages per block, {}-bit ECC per {} bytes",
            geometry.page_size(),
            geometry.pages_per_block().count(),
            ecc.strength,
            ecc.block_size
        );
    }

    /// Arm the command completion and fire the command register
    fn trigger(&self, flags: u8, cycles: usize) {
        self.shared.command.arm();
        self.regs
            .write8(COMCTRL, flags | COMCTRL_TRIGGER_CMD | ((cycles as u8) << 1));
    }

    /// Command without data phase, optionally preceded by address cycles
    pub(crate) fn start_command(&self, command: Command, address: AddressCycle) {
        trace!("NAND command {:#x}, {} address cycles", command as u8, address.len());
        let cycles = address.write(&self.regs);
        self.regs.write8(COMPORT0, command as u8);
        self.trigger(
            COMCTRL_NO_DATA | COMCTRL_NFC_2_NAND | COMCTRL_CYCLES_NONE,
            cycles + 1,
        );
    }

    /// Clock a single data byte from the chip into the data port
    pub(crate) fn start_byte_read(&self) {
        self.trigger(COMCTRL_HAS_DATA | COMCTRL_NAND_2_NFC | COMCTRL_CYCLES_SINGLE, 0);
    }

    pub(crate) fn data_byte(&self) -> u8 {
        self.regs.read8(DATAPORT)
    }

    /// Store a byte-banged byte into the DMA buffer
    pub(crate) fn store_byte(&self, index: usize, byte: u8) {
        self.shared.with_memory(|memory| {
            if let Some(slot) = memory.buffer_mut().get_mut(index) {
                *slot = byte;
            }
        });
    }

    /// Page read, through DMA for data or into the staging area only for OOB.
    ///
    /// Data reads always start at column 0 so the ECC engine sees whole steps.
    pub(crate) fn start_read(&mut self, geometry: &Geometry, page: Page, oob_only: bool) {
        let column = if oob_only { geometry.oob_column() } else { 0 };
        let address = AddressCycle::new(Some(column), Some(page), geometry.wide_row());
        trace!("NAND read page {}, column {:#x}", page.0, column);
        let cycles = address.write(&self.regs);

        if !oob_only {
            dma::setup_transfer(
                &self.regs,
                self.shared,
                geometry.page_size(),
                Direction::Read,
                self.config.dma_clear_polls,
            );
        }

        // Write one to clear
        let stat = self.regs.read16(ECC_BCH_INT_STAT1);
        self.regs.write16(
            ECC_BCH_INT_STAT1,
            stat | (EBIS1_ERROR | EBIS1_CORRECTION_DONE) as u16,
        );

        self.cursor = 0;

        self.regs.write8(COMPORT0, Command::Read0 as u8);
        self.regs
            .write8(address_cycle_offset(cycles), Command::ReadStart as u8);
        self.trigger(COMCTRL_NAND_2_NFC | COMCTRL_MULT_COMMANDS, cycles + 2);
    }

    /// Clear the staging area and copy the free OOB bytes in
    pub(crate) fn stage_oob(&self, geometry: &Geometry, oob: &[u8]) {
        for i in 0..ECC_FIFO_LEN {
            self.regs.write8(ECC_FIFO_0 + i, 0xff);
        }
        let len = oob.len().min(geometry.oob_layout().free_len as usize);
        for (i, byte) in oob[..len].iter().enumerate() {
            self.regs.write8(ECC_FIFO_0 + i, *byte);
        }
    }

    /// Copy the staged OOB bytes of the last read out
    pub(crate) fn copy_oob_out(&self, geometry: &Geometry, oob: &mut [u8]) -> usize {
        let len = oob.len().min(geometry.staged_oob_len());
        for (i, byte) in oob[..len].iter_mut().enumerate() {
            *byte = self.regs.read8(ECC_FIFO_0 + i);
        }
        len
    }

    /// Copy page data of the last read out, from `column` on
    pub(crate) fn copy_page_out(&mut self, geometry: &Geometry, column: usize, buf: &mut [u8]) -> usize {
        let len = buf.len().min(geometry.page_size().saturating_sub(column));
        self.shared.with_memory(|memory| {
            buf[..len].copy_from_slice(&memory.buffer()[column..column + len]);
        });
        self.cursor = column + len;
        len
    }

    /// Fill the DMA buffer with a page image, padding with erased bytes
    pub(crate) fn load_page(&mut self, geometry: &Geometry, data: &[u8]) {
        let page_size = geometry.page_size();
        self.shared.with_memory(|memory| {
            let buffer = &mut memory.buffer_mut()[..page_size];
            buffer[..data.len()].copy_from_slice(data);
            buffer[data.len()..].fill(0xff);
        });
        self.cursor = data.len();
    }

    /// Start streaming the DMA buffer to the chip page register
    pub(crate) fn start_program(&self, geometry: &Geometry, page: Page) {
        let address = AddressCycle::new(Some(0), Some(page), geometry.wide_row());
        trace!("NAND program page {}", page.0);
        let cycles = address.write(&self.regs);
        dma::setup_transfer(
            &self.regs,
            self.shared,
            geometry.page_size(),
            Direction::Write,
            self.config.dma_clear_polls,
        );
        self.regs.write8(COMPORT0, Command::SeqIn as u8);
        self.trigger(COMCTRL_NFC_2_NAND, cycles + 1);
    }

    pub(crate) fn set_pending_page(&mut self, page: Page) {
        self.pending_page = Some(page);
    }

    pub(crate) fn take_pending_page(&mut self) -> Result<Page, Error> {
        self.pending_page.take().ok_or(Error::NoPendingProgram)
    }

    /// Log the event of the finished transfer, fail on it if configured to
    pub(crate) fn check_dma_event(&self) -> Result<(), Error> {
        let event = self.shared.last_dma_event();
        if event.is_abnormal() {
            error!("NAND DMA transfer ended with {}", event);
            if self.config.dma_errors_fatal {
                return Err(Error::Dma(event));
            }
        }
        Ok(())
    }

    /// Uncorrectable reads counted so far, to compare around an operation
    pub(crate) fn ecc_failures(&self) -> u32 {
        self.shared.failed_count()
    }

    pub(crate) fn set_redundant_area(&self, enable: bool) {
        if enable {
            self.regs.set_bit(SMC_ENABLE, SMC_REDUNDANT_AREA);
        } else {
            self.regs.clear_bit(SMC_ENABLE, SMC_REDUNDANT_AREA);
        }
    }

    /// Select chip 0 or deselect all.
    ///
    /// # Panics
    ///
    /// The controller drives a single chip, any other index panics.
    pub(crate) fn select_chip(&mut self, chip: Option<u8>) {
        debug!("Selecting NAND chip {}", chip);
        match chip {
            None => self.regs.write8(CHIP_ENABLE_CTRL, CE_NONE),
            Some(0) => self.regs.write8(CHIP_ENABLE_CTRL, CE_CHIP0),
            Some(other) => {
                error!("Only chip 0 is supported, got chip {}", other);
                panic!("invalid NAND chip select: {}", other);
            }
        }
        self.chip = chip;
    }

    pub(crate) fn selected_chip(&self) -> Option<u8> {
        self.chip
    }

    pub(crate) fn is_ready(&self) -> bool {
        self.regs.get_bit(MISC_STAT_PORT, MSP_READY)
    }

    pub(crate) fn reset_cursor(&mut self, at: usize) {
        self.cursor = at.min(DMA_BUFFER_SIZE);
    }

    pub(crate) fn read_buf(&mut self, buf: &mut [u8]) -> usize {
        let len = buf.len().min(DMA_BUFFER_SIZE - self.cursor);
        let start = self.cursor;
        self.shared.with_memory(|memory| {
            buf[..len].copy_from_slice(&memory.buffer()[start..start + len]);
        });
        self.cursor += len;
        len
    }

    pub(crate) fn write_buf(&mut self, buf: &[u8]) -> usize {
        let len = buf.len().min(DMA_BUFFER_SIZE - self.cursor);
        let start = self.cursor;
        self.shared.with_memory(|memory| {
            memory.buffer_mut()[start..start + len].copy_from_slice(&buf[..len]);
        });
        self.cursor += len;
        len
    }

    pub(crate) fn read_byte(&mut self) -> u8 {
        let mut byte = [0xff];
        self.read_buf(&mut byte);
        byte[0]
    }

    pub(crate) fn wait_cmd_ready(&self) -> Result<(), Error> {
        self.regs
            .poll_until(
                MISC_STAT_PORT,
                MSP_CMD_READY,
                true,
                self.config.command_ready_polls,
            )
            .map_err(|_| timeout(Wait::CommandReady))
    }

    pub(crate) fn wait_transfer_ready(&self) -> Result<(), Error> {
        self.regs
            .poll_until(
                MISC_STAT_PORT,
                MSP_TRANSFER_ACTIVE,
                true,
                self.config.transfer_ready_polls,
            )
            .map_err(|_| timeout(Wait::TransferReady))
    }

    pub(crate) fn wait_command<D: DelayNs>(&self, delay: &mut D) -> Result<(), Error> {
        self.shared
            .command
            .wait(
                delay,
                self.config.completion_timeout_us,
                self.config.wait_tick_us,
            )
            .map_err(|_| timeout(Wait::CommandComplete))
    }

    pub(crate) fn wait_dma<D: DelayNs>(&self, delay: &mut D) -> Result<(), Error> {
        self.shared
            .dma
            .wait(
                delay,
                self.config.completion_timeout_us,
                self.config.wait_tick_us,
            )
            .map_err(|_| timeout(Wait::DmaComplete))?;
        self.check_dma_event()
    }

    pub(crate) async fn wait_cmd_ready_async(&self) -> Result<(), Error> {
        poll_until_async(
            &self.regs,
            MISC_STAT_PORT,
            MSP_CMD_READY,
            true,
            self.config.command_ready_polls,
        )
        .await
        .map_err(|_| timeout(Wait::CommandReady))
    }

    pub(crate) async fn wait_transfer_ready_async(&self) -> Result<(), Error> {
        poll_until_async(
            &self.regs,
            MISC_STAT_PORT,
            MSP_TRANSFER_ACTIVE,
            true,
            self.config.transfer_ready_polls,
        )
        .await
        .map_err(|_| timeout(Wait::TransferReady))
    }

    pub(crate) async fn wait_command_async<D: AsyncDelayNs>(&self, delay: &mut D) -> Result<(), Error> {
        self.shared
            .command
            .wait_async(delay, self.config.completion_timeout_us)
            .await
            .map_err(|_| timeout(Wait::CommandComplete))
    }

    pub(crate) async fn wait_dma_async<D: AsyncDelayNs>(&self, delay: &mut D) -> Result<(), Error> {
        self.shared
            .dma
            .wait_async(delay, self.config.completion_timeout_us)
            .await
            .map_err(|_| timeout(Wait::DmaComplete))?;
        self.check_dma_event()
    }
}

fn timeout(wait: Wait) -> Error {
    warn!("NAND timed out waiting for {}", wait);
    Error::Timeout(wait)
}

/// Column and length checks shared by the page reads
pub(crate) fn check_read(geometry: &Geometry, page: Page, column: usize) -> Result<(), Error> {
    geometry.check_page(page)?;
    if column > geometry.page_size() {
        return Err(Error::OutOfBounds);
    }
    Ok(())
}
