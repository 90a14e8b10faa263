use crate::register::{Registers, PULE_DIVISOR_MASK, READ_CYCLE_PULE_CTRL};

/// Driver configuration.
///
/// Poll budgets are iteration counts, not time, so they end even without a
/// clock. Completion waits are wall-clock bounded through the delay source.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    pub command_ready_polls: u32,
    pub transfer_ready_polls: u32,
    /// Budget for clearing a stale DMA interrupt status before a transfer
    pub dma_clear_polls: u32,
    /// Budget of the interrupt handler for the busy-to-ready flag
    pub busy_to_ready_polls: u32,
    pub completion_timeout_us: u32,
    /// Granularity of blocking completion waits, async waits sleep until woken
    pub wait_tick_us: u32,
    /// Fail transfers that end with an abnormal DMA event instead of only
    /// logging them
    pub dma_errors_fatal: bool,
    /// Strobe timing programmed at start-up, `None` keeps the reset value
    pub timing: Option<Timing>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            command_ready_polls: 1 << 20,
            transfer_ready_polls: 1 << 28,
            dma_clear_polls: 1 << 20,
            busy_to_ready_polls: 1 << 20,
            completion_timeout_us: 1_000_000,
            wait_tick_us: 10,
            dma_errors_fatal: false,
            timing: None,
        }
    }
}

/// Read/write strobe timing in picoseconds
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    pub read_pulse_ps: u32,
    pub read_cycle_ps: u32,
    pub write_pulse_ps: u32,
    pub write_cycle_ps: u32,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            read_pulse_ps: 12_000,
            read_cycle_ps: 25_000,
            write_pulse_ps: 12_000,
            write_cycle_ps: 25_000,
        }
    }
}

impl Timing {
    /// Nibble-packed ratios of each time to the shortest one: tRP, tRC, tWP, tWC
    /// from the high nibble down.
    pub fn divisors(&self) -> u32 {
        let min = self
            .read_pulse_ps
            .min(self.read_cycle_ps)
            .min(self.write_pulse_ps)
            .min(self.write_cycle_ps)
            .max(1);
        let ratio = |ps: u32| (ps / min).min(0xF);

        (ratio(self.read_pulse_ps) << 12)
            | (ratio(self.read_cycle_ps) << 8)
            | (ratio(self.write_pulse_ps) << 4)
            | ratio(self.write_cycle_ps)
    }

    pub(crate) fn apply<R: Registers>(&self, regs: &R) {
        let keep = regs.read32(READ_CYCLE_PULE_CTRL) & PULE_DIVISOR_MASK;
        regs.write32(READ_CYCLE_PULE_CTRL, keep | self.divisors());
    }
}
