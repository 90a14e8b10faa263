//! Interrupt side of the driver.
//!
//! The integrator binds [`InterruptHandler::on_nand_interrupt`] to the
//! controller interrupt and [`InterruptHandler::on_dma_interrupt`] to the
//! DMA interrupt. Both only need `&self`, so the handler can live in a
//! `static` next to the [`SharedState`].

use crate::config::Config;
use crate::ecc;
use crate::register::*;
use crate::shared::SharedState;

pub struct InterruptHandler<'a, R> {
    regs: R,
    shared: &'a SharedState,
    busy_to_ready_polls: u32,
}

impl<'a, R: Registers> InterruptHandler<'a, R> {
    pub fn new(regs: R, shared: &'a SharedState, config: &Config) -> Self {
        Self {
            regs,
            shared,
            busy_to_ready_polls: config.busy_to_ready_polls,
        }
    }

    /// Controller interrupt: ECC error or command done
    pub fn on_nand_interrupt(&self) {
        if self.regs.get_bit(ECC_BCH_INT_STAT1, EBIS1_ERROR) {
            ecc::correct_errors(&self.regs, self.shared);
            return;
        }

        if self
            .regs
            .poll_until(HOST_STAT_CHANGE, HSC_B2R, false, self.busy_to_ready_polls)
            .is_err()
        {
            error!("Busy-to-ready flag never came up, command not completed");
            return;
        }

        // Write one to clear
        self.regs.set_bit(HOST_STAT_CHANGE, HSC_B2R);
        self.shared.command.signal();
    }

    /// DMA interrupt: capture the event code, then wake the waiter
    pub fn on_dma_interrupt(&self) {
        if self.regs.get_bit(NFC_DMA_ISR, DMA_ISR_INT_STS) {
            let event = self.regs.read32(NFC_DMA_CCR) & DMA_CCR_EVTCODE;
            self.shared.set_dma_event(event as u8);
            self.regs.write32(NFC_DMA_ISR, DMA_ISR_INT_STS);
        }
        self.shared.dma.signal();
    }
}
