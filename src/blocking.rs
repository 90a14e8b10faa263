use embedded_hal::delay::DelayNs;

use crate::{
    address::{AddressCycle, Block, Page},
    config::Config,
    controller::{self, Command, Controller, PARAM_READ_LEN},
    error::Error,
    geometry::Geometry,
    register::*,
    shared::SharedState,
};

// Type states of the driver
/// Controller started, only identification is possible
pub struct Unconfigured;
/// Controller programmed for a chip geometry
pub struct Configured(Geometry);

impl Configured {
    pub(crate) fn new(geometry: Geometry) -> Self {
        Self(geometry)
    }

    pub(crate) fn geometry(&self) -> &Geometry {
        &self.0
    }
}

/// Blocking driver for the WM8xxx NAND controller.
///
/// Waits for the interrupts raised through [`crate::InterruptHandler`] by
/// polling the shared completions, sleeping on `D` in between.
pub struct Nand<'a, R, D, S = Configured> {
    ctrl: Controller<'a, R>,
    delay: D,
    state: S,
}

impl<'a, R, D> Nand<'a, R, D, Unconfigured>
where
    R: Registers,
    D: DelayNs,
{
    /// Attach to the controller and run its start-up sequence
    pub fn new(regs: R, shared: &'a SharedState, delay: D, config: Config) -> Self {
        let ctrl = Controller::new(regs, shared, config);
        ctrl.startup();
        Self {
            ctrl,
            delay,
            state: Unconfigured,
        }
    }

    /// Program the controller for the chip found during identification
    pub fn configure(self, geometry: Geometry) -> Nand<'a, R, D, Configured> {
        self.ctrl.init_chip(&geometry);
        Nand {
            ctrl: self.ctrl,
            delay: self.delay,
            state: Configured::new(geometry),
        }
    }
}

impl<'a, R, D, S> Nand<'a, R, D, S>
where
    R: Registers,
    D: DelayNs,
{
    /// Reset the chip
    pub fn reset(&mut self) -> Result<(), Error> {
        self.ctrl.start_command(Command::Reset, AddressCycle::none());
        self.ctrl.wait_command(&mut self.delay)
    }

    /// Read the status byte
    pub fn read_status(&mut self) -> Result<StatusRegister, Error> {
        self.ctrl.start_command(Command::Status, AddressCycle::none());
        self.ctrl.wait_cmd_ready()?;
        self.ctrl.start_byte_read();
        self.ctrl.wait_cmd_ready()?;
        self.ctrl.wait_transfer_ready()?;
        Ok(self.ctrl.data_byte().into())
    }

    /// Clock `count` bytes after `command` into the DMA buffer, one at a time
    fn read_bytes(&mut self, command: Command, column: u8, count: usize) -> Result<(), Error> {
        self.ctrl.start_command(command, AddressCycle::single(column));
        self.ctrl.wait_cmd_ready()?;
        for i in 0..count {
            self.ctrl.start_byte_read();
            self.ctrl.wait_cmd_ready()?;
            self.ctrl.wait_transfer_ready()?;
            let byte = self.ctrl.data_byte();
            self.ctrl.store_byte(i, byte);
        }
        self.ctrl.reset_cursor(0);
        Ok(())
    }

    /// Read the identification bytes at `column` (0x00 for the JEDEC ID,
    /// 0x20 for the ONFI signature)
    pub fn read_id(&mut self, column: u8) -> Result<NandId, Error> {
        self.read_bytes(Command::ReadId, column, NandId::LEN)?;
        let mut id = [0; NandId::LEN];
        self.ctrl.read_buf(&mut id);
        self.ctrl.reset_cursor(0);
        Ok(NandId(id))
    }

    /// Read the ONFI parameter page, returns the number of bytes copied into `buf`
    pub fn read_parameter_page(&mut self, column: u8, buf: &mut [u8]) -> Result<usize, Error> {
        self.read_bytes(Command::Param, column, PARAM_READ_LEN)?;
        let len = buf.len().min(PARAM_READ_LEN - 1);
        self.ctrl.reset_cursor(1);
        Ok(self.ctrl.read_buf(&mut buf[..len]))
    }

    /// Select chip 0 with `Some(0)`, deselect with `None`.
    ///
    /// # Panics
    ///
    /// Panics for any other chip, the controller drives a single one.
    pub fn select_chip(&mut self, chip: Option<u8>) {
        self.ctrl.select_chip(chip)
    }

    pub fn selected_chip(&self) -> Option<u8> {
        self.ctrl.selected_chip()
    }

    /// Ready bit of the controller
    pub fn is_ready(&self) -> bool {
        self.ctrl.is_ready()
    }

    /// Read from the DMA buffer at the cursor, returns the bytes read
    pub fn read_buf(&mut self, buf: &mut [u8]) -> usize {
        self.ctrl.read_buf(buf)
    }

    /// Write into the DMA buffer at the cursor, returns the bytes written
    pub fn write_buf(&mut self, buf: &[u8]) -> usize {
        self.ctrl.write_buf(buf)
    }

    pub fn read_byte(&mut self) -> u8 {
        self.ctrl.read_byte()
    }

    /// Shared state this driver signals through
    pub fn shared(&self) -> &'a SharedState {
        self.ctrl.shared
    }
}

impl<'a, R, D> Nand<'a, R, D, Configured>
where
    R: Registers,
    D: DelayNs,
{
    pub fn geometry(&self) -> &Geometry {
        self.state.geometry()
    }

    /// Erase a block
    pub fn erase_block(&mut self, block: Block) -> Result<(), Error> {
        let geometry = *self.state.geometry();
        if block.0 >= geometry.block_count() {
            return Err(Error::OutOfBounds);
        }
        let page = block.first_page(geometry.pages_per_block().count());
        self.ctrl.start_command(
            Command::Erase1,
            AddressCycle::new(None, Some(page), geometry.wide_row()),
        );
        self.ctrl.wait_cmd_ready()?;
        self.ctrl.start_command(Command::Erase2, AddressCycle::none());
        self.ctrl.wait_command(&mut self.delay)?;
        self.check_status()
    }

    fn check_status(&mut self) -> Result<(), Error> {
        if self.read_status()?.fail {
            warn!("NAND reported a failed program or erase");
            return Err(Error::Io);
        }
        Ok(())
    }

    /// First phase of a program: remember the target page
    pub fn program_setup(&mut self, page: Page) -> Result<(), Error> {
        self.state.geometry().check_page(page)?;
        self.ctrl.set_pending_page(page);
        Ok(())
    }

    /// Second phase: stage OOB, transfer `data` to the chip page register.
    /// Bytes past `data` are programmed erased.
    pub fn program_load(&mut self, data: &[u8], oob: &[u8]) -> Result<(), Error> {
        let geometry = *self.state.geometry();
        if data.len() > geometry.page_size() {
            return Err(Error::OutOfBounds);
        }
        let page = self.ctrl.take_pending_page()?;
        self.ctrl.stage_oob(&geometry, oob);
        self.ctrl.load_page(&geometry, data);
        self.ctrl.start_program(&geometry, page);
        self.ctrl.wait_dma(&mut self.delay)?;
        self.ctrl.wait_transfer_ready()
    }

    /// Last phase: commit the page register and check the outcome
    pub fn program_confirm(&mut self) -> Result<(), Error> {
        self.ctrl
            .start_command(Command::PageProgram, AddressCycle::none());
        self.ctrl.wait_command(&mut self.delay)?;
        self.check_status()
    }

    /// Program `data` and the free bytes of `oob` into `page`
    pub fn write_page(&mut self, page: Page, data: &[u8], oob: &[u8]) -> Result<(), Error> {
        self.program_setup(page)?;
        self.program_load(data, oob)?;
        self.program_confirm()
    }

    /// Read `page` from `column` on into `buf`, returns the bytes copied.
    ///
    /// On [`Error::Uncorrectable`] the data is still copied, as read.
    pub fn read_page(&mut self, page: Page, column: usize, buf: &mut [u8]) -> Result<usize, Error> {
        let geometry = *self.state.geometry();
        controller::check_read(&geometry, page, column)?;
        let failures = self.ctrl.ecc_failures();

        self.ctrl.start_read(&geometry, page, false);
        self.ctrl.wait_dma(&mut self.delay)?;
        self.ctrl.wait_command(&mut self.delay)?;

        let len = self.ctrl.copy_page_out(&geometry, column, buf);
        if self.ctrl.ecc_failures() != failures {
            warn!("Uncorrectable ECC error in page {}", page.0);
            return Err(Error::Uncorrectable);
        }
        Ok(len)
    }

    /// Read a whole page and its staged OOB bytes
    pub fn read_page_with_oob(
        &mut self,
        page: Page,
        buf: &mut [u8],
        oob: &mut [u8],
    ) -> Result<(usize, usize), Error> {
        let result = self.read_page(page, 0, buf);
        let geometry = *self.state.geometry();
        let oob_len = self.ctrl.copy_oob_out(&geometry, oob);
        result.map(|len| (len, oob_len))
    }

    /// Read only the OOB area of `page`, returns the bytes copied
    pub fn read_oob(&mut self, page: Page, oob: &mut [u8]) -> Result<usize, Error> {
        let geometry = *self.state.geometry();
        geometry.check_page(page)?;
        let failures = self.ctrl.ecc_failures();

        self.ctrl.set_redundant_area(true);
        self.ctrl.start_read(&geometry, page, true);
        let result = self.ctrl.wait_command(&mut self.delay);
        let len = self.ctrl.copy_oob_out(&geometry, oob);
        self.ctrl.set_redundant_area(false);
        result?;

        if self.ctrl.ecc_failures() != failures {
            warn!("Uncorrectable ECC error in OOB of page {}", page.0);
            return Err(Error::Uncorrectable);
        }
        Ok(len)
    }

    /// Rewrite the OOB of `page`, keeping its data
    pub fn write_oob(&mut self, page: Page, oob: &[u8]) -> Result<(), Error> {
        let geometry = *self.state.geometry();
        geometry.check_page(page)?;

        self.ctrl.start_read(&geometry, page, false);
        self.ctrl.wait_dma(&mut self.delay)?;
        self.ctrl.wait_command(&mut self.delay)?;

        self.ctrl.stage_oob(&geometry, oob);
        self.ctrl.start_program(&geometry, page);
        self.ctrl.wait_dma(&mut self.delay)?;
        self.ctrl.wait_transfer_ready()?;
        self.program_confirm()
    }
}

/// Implementation of the identification and raw page traits of [`crate::raw`]
mod raw {
    use super::*;
    use crate::raw::{NandIdentify, RawNand};

    impl<'a, R, D, S> NandIdentify for Nand<'a, R, D, S>
    where
        R: Registers,
        D: DelayNs,
    {
        fn reset(&mut self) -> Result<(), Error> {
            Nand::reset(self)
        }

        fn select_chip(&mut self, chip: Option<u8>) {
            Nand::select_chip(self, chip)
        }

        fn read_id(&mut self, column: u8) -> Result<NandId, Error> {
            Nand::read_id(self, column)
        }

        fn read_parameter_page(&mut self, column: u8, buf: &mut [u8]) -> Result<usize, Error> {
            Nand::read_parameter_page(self, column, buf)
        }

        fn read_status(&mut self) -> Result<StatusRegister, Error> {
            Nand::read_status(self)
        }
    }

    impl<'a, R, D> RawNand for Nand<'a, R, D, Configured>
    where
        R: Registers,
        D: DelayNs,
    {
        fn geometry(&self) -> &Geometry {
            Nand::geometry(self)
        }

        fn is_ready(&self) -> bool {
            Nand::is_ready(self)
        }

        fn read_page(&mut self, page: Page, column: usize, buf: &mut [u8]) -> Result<usize, Error> {
            Nand::read_page(self, page, column, buf)
        }

        fn write_page(&mut self, page: Page, data: &[u8], oob: &[u8]) -> Result<(), Error> {
            Nand::write_page(self, page, data, oob)
        }

        fn read_oob(&mut self, page: Page, oob: &mut [u8]) -> Result<usize, Error> {
            Nand::read_oob(self, page, oob)
        }

        fn write_oob(&mut self, page: Page, oob: &[u8]) -> Result<(), Error> {
            Nand::write_oob(self, page, oob)
        }

        fn erase_block(&mut self, block: Block) -> Result<(), Error> {
            Nand::erase_block(self, block)
        }
    }
}

/// Implementation of the `ReadStorage` trait of the `embedded_storage` crate.
/// Reads go page by page through the ECC engine.
mod es {
    use super::*;
    use embedded_storage::ReadStorage;

    impl<'a, R, D> ReadStorage for Nand<'a, R, D, Configured>
    where
        R: Registers,
        D: DelayNs,
    {
        type Error = Error;

        fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
            let geometry = *self.state.geometry();
            let end = offset as u64 + bytes.len() as u64;
            if end > geometry.chip_size() {
                return Err(Error::OutOfBounds);
            }

            let page_size = geometry.page_size();
            let mut offset = offset as usize;
            let mut done = 0;
            while done < bytes.len() {
                let page = Page((offset / page_size) as u32);
                let column = offset % page_size;
                let len = self.read_page(page, column, &mut bytes[done..])?;
                done += len;
                offset += len;
            }
            Ok(())
        }

        fn capacity(&self) -> usize {
            self.state.geometry().storage_capacity()
        }
    }
}
