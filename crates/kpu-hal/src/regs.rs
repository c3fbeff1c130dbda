// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! KPU register window layout.
//!
//! Every register is 64 bits wide. Word offsets within the window:
//!
//! | word | register |
//! |------|----------|
//! | 0 | `layer_argument_fifo` (write-only) |
//! | 1 | `interrupt_status` |
//! | 2 | `interrupt_raw` |
//! | 3 | `interrupt_mask` |
//! | 4 | `interrupt_clear` (write 1 to clear) |
//! | 5 | `fifo_threshold` |
//! | 6 | `fifo_data_out` (output FIFO, DMA source) |
//! | 7 | `fifo_ctrl` |
//! | 8 | `eight_bit_mode` |

use modular_bitfield::prelude::*;

/// Word index of each register within the KPU window.
pub mod word {
    pub const LAYER_ARGUMENT_FIFO: usize = 0;
    pub const INTERRUPT_STATUS: usize = 1;
    pub const INTERRUPT_RAW: usize = 2;
    pub const INTERRUPT_MASK: usize = 3;
    pub const INTERRUPT_CLEAR: usize = 4;
    pub const FIFO_THRESHOLD: usize = 5;
    pub const FIFO_DATA_OUT: usize = 6;
    pub const FIFO_CTRL: usize = 7;
    pub const EIGHT_BIT_MODE: usize = 8;
}

/// The three interrupt latches, shared by the status/raw/mask/clear
/// registers. In the mask register a set bit *suppresses* the line.
#[bitfield(bits = 64)]
#[derive(Clone, Copy)]
pub struct InterruptBits {
    pub calc_done: bool,
    pub layer_cfg_almost_empty: bool,
    pub layer_cfg_almost_full: bool,
    #[skip]
    __: B61,
}

impl InterruptBits {
    /// All three latches set.
    pub fn all() -> Self {
        Self::new()
            .with_calc_done(true)
            .with_layer_cfg_almost_empty(true)
            .with_layer_cfg_almost_full(true)
    }

    pub fn as_word(self) -> u64 {
        u64::from_le_bytes(self.into_bytes())
    }

    pub fn from_word(word: u64) -> Self {
        Self::from_bytes(word.to_le_bytes())
    }
}

/// Input FIFO watermarks.
#[bitfield(bits = 64)]
#[derive(Clone, Copy)]
pub struct FifoThreshold {
    pub fifo_full_threshold: B4,
    pub fifo_empty_threshold: B4,
    #[skip]
    __: B56,
}

impl FifoThreshold {
    pub fn as_word(self) -> u64 {
        u64::from_le_bytes(self.into_bytes())
    }
}

/// Selects 8-bit (vs 16-bit) weight mode for the whole model.
#[bitfield(bits = 64)]
#[derive(Clone, Copy)]
pub struct EightBitMode {
    pub eight_bit_mode: bool,
    #[skip]
    __: B63,
}

impl EightBitMode {
    pub fn as_word(self) -> u64 {
        u64::from_le_bytes(self.into_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interrupt_bits_all_is_0b111() {
        assert_eq!(InterruptBits::all().as_word(), 0b111);
    }

    #[test]
    fn test_interrupt_bits_roundtrip() {
        let bits = InterruptBits::new().with_layer_cfg_almost_empty(true);
        assert_eq!(bits.as_word(), 0b010);
        let back = InterruptBits::from_word(0b010);
        assert!(back.layer_cfg_almost_empty());
        assert!(!back.calc_done());
    }

    #[test]
    fn test_fifo_threshold_packing() {
        let t = FifoThreshold::new()
            .with_fifo_full_threshold(10)
            .with_fifo_empty_threshold(1);
        assert_eq!(t.as_word(), (1 << 4) | 10);
    }

    #[test]
    fn test_eight_bit_mode_packing() {
        assert_eq!(EightBitMode::new().with_eight_bit_mode(true).as_word(), 1);
        assert_eq!(EightBitMode::new().as_word(), 0);
    }
}
