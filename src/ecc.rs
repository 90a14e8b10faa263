//! Inline correction of the errors reported by the BCH engine.
//!
//! The engine pauses the read on every ECC step with errors and raises the
//! controller interrupt. The handler flips the reported bits, in the DMA
//! buffer for data errors or in the staging area for OOB errors, then tells
//! the engine to resume.

use bit::BitIndex;

use crate::register::*;
use crate::shared::SharedState;

/// Decoded `ECC_BCH_INT_STAT2`
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorReport {
    pub error_count: u8,
    /// Index of the ECC step the errors were found in
    pub bank: u8,
    /// Errors are in the OOB staging area instead of page data
    pub oob: bool,
}

impl From<u32> for ErrorReport {
    fn from(val: u32) -> ErrorReport {
        ErrorReport {
            error_count: val.bit_range(0..4) as u8,
            bank: val.bit_range(8..11) as u8,
            oob: val.bit(11),
        }
    }
}

impl ErrorReport {
    /// ECC steps the three-bit bank field can name
    pub const BANKS: u16 = 8;

    pub fn is_uncorrectable(&self, sentinel: u8) -> bool {
        self.error_count >= sentinel
    }
}

/// Location of a single flipped bit within an ECC step
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorPosition {
    pub byte_offset: u16,
    pub bit_offset: u8,
}

impl ErrorPosition {
    const MASK: u32 = 0x1fff;

    /// Position register of error `index`. Each 32-bit register holds two.
    pub const fn register(index: usize) -> usize {
        ECC_BCH_ERR_POS1 + 4 * (index / 2)
    }

    /// Decode error `index` out of its position register. Even indices sit in
    /// the low half-word, odd ones in the high.
    pub fn from_packed(word: u32, index: usize) -> Self {
        let half = if index % 2 == 1 { word >> 16 } else { word };
        let offset = half & Self::MASK;
        Self {
            byte_offset: (offset >> 3) as u16,
            bit_offset: (offset & 0x7) as u8,
        }
    }
}

/// Flip bit `bit` of `val`. Applying it twice gives `val` back.
pub fn flip_bit(val: u8, bit: u8) -> u8 {
    val ^ (1 << (bit & 0x7))
}

/// Correct the errors of the current ECC step and resume the read.
///
/// Runs in interrupt context.
pub(crate) fn correct_errors<R: Registers>(regs: &R, shared: &SharedState) {
    let report = ErrorReport::from(regs.read32(ECC_BCH_INT_STAT2));

    if report.is_uncorrectable(shared.ecc_sentinel()) {
        warn!("Too many ECC errors ({}), cannot correct", report.error_count);
        shared.record_failed();
        read_resume(regs);
        return;
    }

    let mut corrected = 0;
    for i in 0..report.error_count as usize {
        let pos = ErrorPosition::from_packed(regs.read32(ErrorPosition::register(i)), i);
        debug!(
            "Correcting byte {}, bit {}, oob {}",
            pos.byte_offset,
            pos.bit_offset,
            report.oob
        );

        if report.oob {
            let byte = pos.byte_offset as usize;
            if byte >= ECC_FIFO_LEN {
                warn!("OOB error position {} out of the staging area", byte);
                continue;
            }
            let val = regs.read8(ECC_FIFO_0 + byte);
            regs.write8(ECC_FIFO_0 + byte, flip_bit(val, pos.bit_offset));
        } else {
            let index = shared.ecc_block_size() * report.bank as usize + pos.byte_offset as usize;
            let flipped = shared.with_memory(|memory| match memory.buffer_mut().get_mut(index) {
                Some(val) => {
                    *val = flip_bit(*val, pos.bit_offset);
                    true
                }
                None => false,
            });
            if !flipped {
                warn!("ECC error position {} out of the DMA buffer", index);
                continue;
            }
        }
        corrected += 1;
    }

    if corrected > 0 {
        info!("Corrected {} bit(s) in ECC step {}", corrected, report.bank);
        shared.record_corrected(corrected);
    }
    read_resume(regs);
}

/// Let the engine continue a read paused on an ECC interrupt
pub(crate) fn read_resume<R: Registers>(regs: &R) {
    regs.set_bit(ECC_BCH_CTRL, EBC_READ_RESUME);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn position_from_low_and_high_half() {
        let word = 0x0015_1fff;
        assert_eq!(
            ErrorPosition::from_packed(word, 0),
            ErrorPosition {
                byte_offset: 0x3ff,
                bit_offset: 7
            }
        );
        assert_eq!(
            ErrorPosition::from_packed(word, 1),
            ErrorPosition {
                byte_offset: 2,
                bit_offset: 5
            }
        );
    }

    #[test]
    fn position_ignores_bits_above_13() {
        let pos = ErrorPosition::from_packed(0xe000_e009, 2);
        assert_eq!(pos.byte_offset, 1);
        assert_eq!(pos.bit_offset, 1);
    }

    #[test]
    fn position_registers() {
        assert_eq!(ErrorPosition::register(0), ECC_BCH_ERR_POS1);
        assert_eq!(ErrorPosition::register(1), ECC_BCH_ERR_POS1);
        assert_eq!(ErrorPosition::register(2), ECC_BCH_ERR_POS1 + 4);
        assert_eq!(ErrorPosition::register(5), ECC_BCH_ERR_POS1 + 8);
    }

    #[test]
    fn flip_is_self_inverse() {
        for val in [0x00u8, 0x5a, 0xff] {
            for bit in 0..8 {
                let flipped = flip_bit(val, bit);
                assert_ne!(flipped, val);
                assert_eq!(flip_bit(flipped, bit), val);
            }
        }
    }

    #[test]
    fn report_fields() {
        let report = ErrorReport::from((1 << 11) | (0b101 << 8) | 3);
        assert_eq!(report.error_count, 3);
        assert_eq!(report.bank, 5);
        assert!(report.oob);
        assert!(!report.is_uncorrectable(5));
        assert!(ErrorReport::from(5).is_uncorrectable(5));
    }
}
