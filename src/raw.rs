//! Flash operations as seen by an identification or MTD-style layer.
//!
//! Identification runs against [`NandIdentify`] before the geometry is
//! known; once the controller is configured the same driver provides
//! [`RawNand`].

use crate::address::{Block, Page};
use crate::error::Error;
use crate::geometry::Geometry;
use crate::register::{NandId, StatusRegister};

pub trait NandIdentify {
    fn reset(&mut self) -> Result<(), Error>;

    /// # Panics
    ///
    /// On any chip other than `Some(0)` or `None`.
    fn select_chip(&mut self, chip: Option<u8>);

    fn read_id(&mut self, column: u8) -> Result<NandId, Error>;

    fn read_parameter_page(&mut self, column: u8, buf: &mut [u8]) -> Result<usize, Error>;

    fn read_status(&mut self) -> Result<StatusRegister, Error>;
}

pub trait RawNand: NandIdentify {
    fn geometry(&self) -> &Geometry;

    fn is_ready(&self) -> bool;

    fn read_page(&mut self, page: Page, column: usize, buf: &mut [u8]) -> Result<usize, Error>;

    fn write_page(&mut self, page: Page, data: &[u8], oob: &[u8]) -> Result<(), Error>;

    fn read_oob(&mut self, page: Page, oob: &mut [u8]) -> Result<usize, Error>;

    fn write_oob(&mut self, page: Page, oob: &[u8]) -> Result<(), Error>;

    fn erase_block(&mut self, block: Block) -> Result<(), Error>;

    /// Whether a block is marked bad: first OOB byte of its first page not
    /// 0xFF
    fn is_bad_block(&mut self, block: Block) -> Result<bool, Error> {
        let page = block.first_page(self.geometry().pages_per_block().count());
        let mut marker = [0xff; 1];
        match self.read_oob(page, &mut marker) {
            Ok(_) | Err(Error::Uncorrectable) => Ok(marker[0] != 0xff),
            Err(e) => Err(e),
        }
    }

    /// Write a bad block marker into the first page of `block`
    fn mark_bad_block(&mut self, block: Block) -> Result<(), Error> {
        let page = block.first_page(self.geometry().pages_per_block().count());
        self.write_oob(page, &[0x00])
    }
}
