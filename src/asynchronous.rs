use embedded_hal_async::delay::DelayNs;

use crate::{
    address::{AddressCycle, Block, Page},
    blocking::{Configured, Unconfigured},
    config::Config,
    controller::{self, Command, Controller, PARAM_READ_LEN},
    error::Error,
    geometry::Geometry,
    register::*,
    shared::SharedState,
};

/// Async driver for the WM8xxx NAND controller.
///
/// Same operations as [`crate::blocking::Nand`], register polls yield to the
/// executor and completion waits sleep on the async `D`.
pub struct AsyncNand<'a, R, D, S = Configured> {
    ctrl: Controller<'a, R>,
    delay: D,
    state: S,
}

impl<'a, R, D> AsyncNand<'a, R, D, Unconfigured>
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

    pub fn configure(self, geometry: Geometry) -> AsyncNand<'a, R, D, Configured> {
        self.ctrl.init_chip(&geometry);
        AsyncNand {
            ctrl: self.ctrl,
            delay: self.delay,
            state: Configured::new(geometry),
        }
    }
}

impl<'a, R, D, S> AsyncNand<'a, R, D, S>
where
    R: Registers,
    D: DelayNs,
{
    pub async fn reset(&mut self) -> Result<(), Error> {
        self.ctrl.start_command(Command::Reset, AddressCycle::none());
        self.ctrl.wait_command_async(&mut self.delay).await
    }

    pub async fn read_status(&mut self) -> Result<StatusRegister, Error> {
        self.ctrl.start_command(Command::Status, AddressCycle::none());
        self.ctrl.wait_cmd_ready_async().await?;
        self.ctrl.start_byte_read();
        self.ctrl.wait_cmd_ready_async().await?;
        self.ctrl.wait_transfer_ready_async().await?;
        Ok(self.ctrl.data_byte().into())
    }

    async fn read_bytes(&mut self, command: Command, column: u8, count: usize) -> Result<(), Error> {
        self.ctrl.start_command(command, AddressCycle::single(column));
        self.ctrl.wait_cmd_ready_async().await?;
        for i in 0..count {
            self.ctrl.start_byte_read();
            self.ctrl.wait_cmd_ready_async().await?;
            self.ctrl.wait_transfer_ready_async().await?;
            let byte = self.ctrl.data_byte();
            self.ctrl.store_byte(i, byte);
        }
        self.ctrl.reset_cursor(0);
        Ok(())
    }

    pub async fn read_id(&mut self, column: u8) -> Result<NandId, Error> {
        self.read_bytes(Command::ReadId, column, NandId::LEN).await?;
        let mut id = [0; NandId::LEN];
        self.ctrl.read_buf(&mut id);
        self.ctrl.reset_cursor(0);
        Ok(NandId(id))
    }

    pub async fn read_parameter_page(&mut self, column: u8, buf: &mut [u8]) -> Result<usize, Error> {
        self.read_bytes(Command::Param, column, PARAM_READ_LEN).await?;
        let len = buf.len().min(PARAM_READ_LEN - 1);
        self.ctrl.reset_cursor(1);
        Ok(self.ctrl.read_buf(&mut buf[..len]))
    }

    /// # Panics
    ///
    /// Panics for any chip other than `Some(0)` or `None`.
    pub fn select_chip(&mut self, chip: Option<u8>) {
        self.ctrl.select_chip(chip)
    }

    pub fn selected_chip(&self) -> Option<u8> {
        self.ctrl.selected_chip()
    }

    pub fn is_ready(&self) -> bool {
        self.ctrl.is_ready()
    }

    pub fn read_buf(&mut self, buf: &mut [u8]) -> usize {
        self.ctrl.read_buf(buf)
    }

    pub fn write_buf(&mut self, buf: &[u8]) -> usize {
        self.ctrl.write_buf(buf)
    }

    pub fn read_byte(&mut self) -> u8 {
        self.ctrl.read_byte()
    }

    pub fn shared(&self) -> &'a SharedState {
        self.ctrl.shared
    }
}

impl<'a, R, D> AsyncNand<'a, R, D, Configured>
where
    R: Registers,
    D: DelayNs,
{
    pub fn geometry(&self) -> &Geometry {
        self.state.geometry()
    }

    pub async fn erase_block(&mut self, block: Block) -> Result<(), Error> {
        let geometry = *self.state.geometry();
        if block.0 >= geometry.block_count() {
            return Err(Error::OutOfBounds);
        }
        let page = block.first_page(geometry.pages_per_block().count());
        self.ctrl.start_command(
            Command::Erase1,
            AddressCycle::new(None, Some(page), geometry.wide_row()),
        );
        self.ctrl.wait_cmd_ready_async().await?;
        self.ctrl.start_command(Command::Erase2, AddressCycle::none());
        self.ctrl.wait_command_async(&mut self.delay).await?;
        self.check_status().await
    }

    async fn check_status(&mut self) -> Result<(), Error> {
        if self.read_status().await?.fail {
            warn!("NAND reported a failed program or erase");
            return Err(Error::Io);
        }
        Ok(())
    }

    pub fn program_setup(&mut self, page: Page) -> Result<(), Error> {
        self.state.geometry().check_page(page)?;
        self.ctrl.set_pending_page(page);
        Ok(())
    }

    pub async fn program_load(&mut self, data: &[u8], oob: &[u8]) -> Result<(), Error> {
        let geometry = *self.state.geometry();
        if data.len() > geometry.page_size() {
            return Err(Error::OutOfBounds);
        }
        let page = self.ctrl.take_pending_page()?;
        self.ctrl.stage_oob(&geometry, oob);
        self.ctrl.load_page(&geometry, data);
        self.ctrl.start_program(&geometry, page);
        self.ctrl.wait_dma_async(&mut self.delay).await?;
        self.ctrl.wait_transfer_ready_async().await
    }

    pub async fn program_confirm(&mut self) -> Result<(), Error> {
        self.ctrl
            .start_command(Command::PageProgram, AddressCycle::none());
        self.ctrl.wait_command_async(&mut self.delay).await?;
        self.check_status().await
    }

    pub async fn write_page(&mut self, page: Page, data: &[u8], oob: &[u8]) -> Result<(), Error> {
        self.program_setup(page)?;
        self.program_load(data, oob).await?;
        self.program_confirm().await
    }

    /// On [`Error::Uncorrectable`] the data is still copied, as read.
    pub async fn read_page(&mut self, page: Page, column: usize, buf: &mut [u8]) -> Result<usize, Error> {
        let geometry = *self.state.geometry();
        controller::check_read(&geometry, page, column)?;
        let failures = self.ctrl.ecc_failures();

        self.ctrl.start_read(&geometry, page, false);
        self.ctrl.wait_dma_async(&mut self.delay).await?;
        self.ctrl.wait_command_async(&mut self.delay).await?;

        let len = self.ctrl.copy_page_out(&geometry, column, buf);
        if self.ctrl.ecc_failures() != failures {
            warn!("Uncorrectable ECC error in page {}", page.0);
            return Err(Error::Uncorrectable);
        }
        Ok(len)
    }

    pub async fn read_page_with_oob(
        &mut self,
        page: Page,
        buf: &mut [u8],
        oob: &mut [u8],
    ) -> Result<(usize, usize), Error> {
        let result = self.read_page(page, 0, buf).await;
        let geometry = *self.state.geometry();
        let oob_len = self.ctrl.copy_oob_out(&geometry, oob);
        result.map(|len| (len, oob_len))
    }

    pub async fn read_oob(&mut self, page: Page, oob: &mut [u8]) -> Result<usize, Error> {
        let geometry = *self.state.geometry();
        geometry.check_page(page)?;
        let failures = self.ctrl.ecc_failures();

        self.ctrl.set_redundant_area(true);
        self.ctrl.start_read(&geometry, page, true);
        let result = self.ctrl.wait_command_async(&mut self.delay).await;
        let len = self.ctrl.copy_oob_out(&geometry, oob);
        self.ctrl.set_redundant_area(false);
        result?;

        if self.ctrl.ecc_failures() != failures {
            warn!("Uncorrectable ECC error in OOB of page {}", page.0);
            return Err(Error::Uncorrectable);
        }
        Ok(len)
    }

    pub async fn write_oob(&mut self, page: Page, oob: &[u8]) -> Result<(), Error> {
        let geometry = *self.state.geometry();
        geometry.check_page(page)?;

        self.ctrl.start_read(&geometry, page, false);
        self.ctrl.wait_dma_async(&mut self.delay).await?;
        self.ctrl.wait_command_async(&mut self.delay).await?;

        self.ctrl.stage_oob(&geometry, oob);
        self.ctrl.start_program(&geometry, page);
        self.ctrl.wait_dma_async(&mut self.delay).await?;
        self.ctrl.wait_transfer_ready_async().await?;
        self.program_confirm().await
    }
}

mod es {
    use super::*;
    use embedded_storage_async::ReadStorage;

    impl<'a, R, D> ReadStorage for AsyncNand<'a, R, D, Configured>
    where
        R: Registers,
        D: DelayNs,
    {
        type Error = Error;

        async fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
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
                let len = self.read_page(page, column, &mut bytes[done..]).await?;
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
