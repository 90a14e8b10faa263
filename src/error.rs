use crate::dma::DmaEvent;

/// All possible errors emitted by the driver
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// A bounded register poll or completion wait ran out
    Timeout(Wait),

    /// The ECC engine reported more errors than it can correct
    Uncorrectable,

    /// The chip geometry cannot be driven by this controller
    UnsupportedGeometry(Unsupported),

    /// The chip reported a failed program or erase
    Io,

    /// The DMA engine ended the transfer abnormally, see [`crate::Config::dma_errors_fatal`]
    Dma(DmaEvent),

    /// Page, column or length outside of the chip geometry
    OutOfBounds,

    /// A program load was issued without a program setup
    NoPendingProgram,
}

/// What the driver was waiting for when it gave up
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wait {
    /// Command-ready flag of the controller
    CommandReady,

    /// Transfer-active flag of the controller
    TransferReady,

    /// Command completion interrupt
    CommandComplete,

    /// DMA completion interrupt
    DmaComplete,
}

/// The geometry property that was rejected
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unsupported {
    WriteSize(u32),
    PagesPerBlock(u32),
    /// Spare area too small for the ECC layout of the write size
    SpareArea(u32),
    /// More ECC steps per page than the engine's error report can name
    EccSteps(u16),
    /// Chip size is zero or not a whole number of blocks
    Capacity,
}

/// Returned by the bounded register polls
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeout;

impl From<Unsupported> for Error {
    fn from(val: Unsupported) -> Self {
        Error::UnsupportedGeometry(val)
    }
}
