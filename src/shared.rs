use core::cell::RefCell;
use core::sync::atomic::{AtomicU32, AtomicU8, Ordering};

use critical_section::Mutex;

use crate::completion::Completion;
use crate::dma::{DmaEvent, DmaMemory};
use crate::geometry::{EccConfig, WriteSize};

/// ECC statistics since the controller was attached
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EccStats {
    /// Bits flipped back by the corrector
    pub corrected: u32,
    /// Reads with more errors than the engine can correct
    pub failed: u32,
}

/// State shared between the driver and its interrupt handler.
///
/// Usually lives in a `static`:
///
/// ```
/// use wmt_nand::SharedState;
///
/// static NAND_STATE: SharedState = SharedState::new();
/// ```
///
/// The DMA buffer inside must be reachable by the DMA engine at its CPU
/// address, place the static in DMA-coherent memory.
pub struct SharedState {
    pub(crate) command: Completion,
    pub(crate) dma: Completion,
    dma_event: AtomicU8,
    ecc_block_size: AtomicU32,
    ecc_sentinel: AtomicU8,
    ecc_corrected: AtomicU32,
    ecc_failed: AtomicU32,
    memory: Mutex<RefCell<DmaMemory>>,
}

impl SharedState {
    pub const fn new() -> Self {
        let ecc = WriteSize::Page2K.ecc();
        Self {
            command: Completion::new(),
            dma: Completion::new(),
            dma_event: AtomicU8::new(0),
            ecc_block_size: AtomicU32::new(ecc.block_size as u32),
            ecc_sentinel: AtomicU8::new(ecc.uncorrectable_sentinel()),
            ecc_corrected: AtomicU32::new(0),
            ecc_failed: AtomicU32::new(0),
            memory: Mutex::new(RefCell::new(DmaMemory::new())),
        }
    }

    /// Completion raised by the controller interrupt
    pub fn command_completion(&self) -> &Completion {
        &self.command
    }

    /// Completion raised by the DMA interrupt
    pub fn dma_completion(&self) -> &Completion {
        &self.dma
    }

    /// Event code captured by the last DMA interrupt
    pub fn last_dma_event(&self) -> DmaEvent {
        self.dma_event.load(Ordering::Acquire).into()
    }

    pub(crate) fn set_dma_event(&self, event: u8) {
        self.dma_event.store(event, Ordering::Release);
    }

    pub fn ecc_stats(&self) -> EccStats {
        EccStats {
            corrected: self.ecc_corrected.load(Ordering::Relaxed),
            failed: self.ecc_failed.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn record_corrected(&self, bits: u32) {
        self.ecc_corrected.fetch_add(bits, Ordering::Relaxed);
    }

    pub(crate) fn record_failed(&self) {
        self.ecc_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn failed_count(&self) -> u32 {
        self.ecc_failed.load(Ordering::Acquire)
    }

    /// ECC step size and uncorrectable sentinel used by the interrupt path
    pub(crate) fn set_ecc(&self, ecc: &EccConfig) {
        self.ecc_block_size
            .store(ecc.block_size as u32, Ordering::Release);
        self.ecc_sentinel
            .store(ecc.uncorrectable_sentinel(), Ordering::Release);
    }

    pub(crate) fn ecc_block_size(&self) -> usize {
        self.ecc_block_size.load(Ordering::Acquire) as usize
    }

    pub(crate) fn ecc_sentinel(&self) -> u8 {
        self.ecc_sentinel.load(Ordering::Acquire)
    }

    /// Run `f` with exclusive access to the DMA buffer and descriptor.
    ///
    /// Must not be called while a transfer is in flight other than from the
    /// interrupt path.
    pub fn with_memory<T>(&self, f: impl FnOnce(&mut DmaMemory) -> T) -> T {
        critical_section::with(|cs| f(&mut self.memory.borrow_ref_mut(cs)))
    }
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new()
    }
}
