//! Single-descriptor DMA engine of the controller.

use core::sync::atomic::{fence, Ordering};

use bit::BitIndex;

use crate::register::*;
use crate::shared::SharedState;
use crate::DMA_BUFFER_SIZE;

/// Transfer direction, seen from the NAND device
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Device to memory
    Read,
    /// Memory to device
    Write,
}

/// Completion code reported in the event field of `NFC_DMA_CCR`
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmaEvent {
    NoStatus,
    FifoUnderrun,
    FifoOverrun,
    DescriptorRead,
    DataReadWrite,
    EarlyEnd,
    Success,
    Unknown(u8),
}

impl From<u8> for DmaEvent {
    fn from(val: u8) -> DmaEvent {
        match val {
            0x00 => DmaEvent::NoStatus,
            0x01 => DmaEvent::FifoUnderrun,
            0x02 => DmaEvent::FifoOverrun,
            0x03 => DmaEvent::DescriptorRead,
            0x04 => DmaEvent::DataReadWrite,
            0x05 => DmaEvent::EarlyEnd,
            0x0f => DmaEvent::Success,
            other => DmaEvent::Unknown(other),
        }
    }
}

impl From<DmaEvent> for u8 {
    fn from(val: DmaEvent) -> u8 {
        match val {
            DmaEvent::NoStatus => 0x00,
            DmaEvent::FifoUnderrun => 0x01,
            DmaEvent::FifoOverrun => 0x02,
            DmaEvent::DescriptorRead => 0x03,
            DmaEvent::DataReadWrite => 0x04,
            DmaEvent::EarlyEnd => 0x05,
            DmaEvent::Success => 0x0f,
            DmaEvent::Unknown(other) => other,
        }
    }
}

impl DmaEvent {
    /// Anything the transfer can end with that is not a plain success
    pub fn is_abnormal(self) -> bool {
        !matches!(self, DmaEvent::Success | DmaEvent::NoStatus)
    }
}

/// Hardware transfer descriptor, read by the DMA engine
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DmaDescriptor {
    control: u32,
    addr: u32,
    branch_addr: u32,
    reserved: u32,
}

impl DmaDescriptor {
    const INTERRUPT: usize = 16;
    const FORMAT: usize = 30;
    const END: usize = 31;

    /// Last descriptor of a chain, interrupting on completion
    pub fn single(request_count: u16, addr: u32) -> Self {
        let mut control = 0u32;
        control
            .set_bit_range(0..16, request_count as u32)
            .set_bit(Self::INTERRUPT, true)
            .set_bit(Self::FORMAT, true)
            .set_bit(Self::END, true);
        Self {
            control,
            addr,
            branch_addr: 0,
            reserved: 0,
        }
    }

    pub fn request_count(&self) -> u16 {
        self.control.bit_range(0..16) as u16
    }

    pub fn interrupt(&self) -> bool {
        self.control.bit(Self::INTERRUPT)
    }

    pub fn format(&self) -> bool {
        self.control.bit(Self::FORMAT)
    }

    pub fn end_of_chain(&self) -> bool {
        self.control.bit(Self::END)
    }

    pub fn addr(&self) -> u32 {
        self.addr
    }
}

/// DMA buffer and its descriptor.
///
/// The engine is handed bus addresses of both, so the memory must be
/// DMA-coherent and identity mapped.
#[repr(C, align(64))]
pub struct DmaMemory {
    buffer: [u8; DMA_BUFFER_SIZE],
    descriptor: DmaDescriptor,
}

impl DmaMemory {
    pub const fn new() -> Self {
        Self {
            buffer: [0; DMA_BUFFER_SIZE],
            descriptor: DmaDescriptor {
                control: 0,
                addr: 0,
                branch_addr: 0,
                reserved: 0,
            },
        }
    }

    pub fn buffer(&self) -> &[u8; DMA_BUFFER_SIZE] {
        &self.buffer
    }

    pub fn buffer_mut(&mut self) -> &mut [u8; DMA_BUFFER_SIZE] {
        &mut self.buffer
    }

    pub fn descriptor(&self) -> &DmaDescriptor {
        &self.descriptor
    }

    pub fn buffer_addr(&self) -> u32 {
        self.buffer.as_ptr() as usize as u32
    }

    pub fn descriptor_addr(&self) -> u32 {
        &self.descriptor as *const DmaDescriptor as usize as u32
    }
}

impl Default for DmaMemory {
    fn default() -> Self {
        Self::new()
    }
}

/// Program the engine for one page transfer and start it.
///
/// Arms the DMA completion before the run bit goes up. Panics if a stale
/// interrupt status cannot be cleared or the engine does not come out of
/// reset, both mean the engine is wedged.
pub(crate) fn setup_transfer<R: Registers>(
    regs: &R,
    shared: &SharedState,
    len: usize,
    direction: Direction,
    clear_polls: u32,
) {
    debug_assert!(len > 0 && len <= DMA_BUFFER_SIZE);
    regs.write16(DMA_COUNTER, (len - 1) as u16);

    if regs.get_bit(NFC_DMA_ISR, DMA_ISR_INT_STS) {
        regs.write32(NFC_DMA_ISR, DMA_ISR_INT_STS);
        if regs
            .poll_until(NFC_DMA_ISR, DMA_ISR_INT_STS, true, clear_polls)
            .is_err()
        {
            let isr = regs.read32(NFC_DMA_ISR);
            error!("DMA interrupt status can't be cleared, ISR = {:#x}", isr);
            panic!("NAND DMA interrupt status stuck: {:#010x}", isr);
        }
    }

    regs.write32(NFC_DMA_GCR, DMA_GCR_SOFTRESET);
    regs.write32(NFC_DMA_GCR, DMA_GCR_DMA_EN);
    assert!(
        regs.get_bit(NFC_DMA_GCR, DMA_GCR_DMA_EN),
        "NAND DMA engine did not enable"
    );

    let descriptor_addr = shared.with_memory(|memory| {
        memory.descriptor = DmaDescriptor::single(len as u16, memory.buffer_addr());
        memory.descriptor_addr()
    });
    shared.dma.arm();
    fence(Ordering::SeqCst);

    regs.write32(NFC_DMA_DESPR, descriptor_addr);

    let mut ccr = regs.read32(NFC_DMA_CCR);
    match direction {
        Direction::Read => ccr |= DMA_CCR_PERIPHERAL_TO_IF,
        Direction::Write => ccr &= !DMA_CCR_PERIPHERAL_TO_IF,
    }
    regs.write32(NFC_DMA_CCR, ccr);

    regs.write32(NFC_DMA_IER, DMA_IER_INT_EN);
    regs.set_bit(NFC_DMA_CCR, DMA_CCR_RUN);
}
