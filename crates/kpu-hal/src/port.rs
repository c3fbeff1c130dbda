// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The raw device window.
//!
//! [`KpuPort`] is the narrowest surface through which anything in the
//! engine touches the accelerator: a handful of register writes, the
//! layer-argument FIFO, and the tiled I/O RAM. The production
//! implementation is [`MmioPort`]; tests use
//! [`soft::SoftPort`](crate::soft::SoftPort).

use crate::regs::{word, EightBitMode, FifoThreshold, InterruptBits};
use crate::KPU_IO_RAM_BYTES;
use core::ptr;

/// Raw access to the KPU register window and I/O RAM.
///
/// Implementations are shared between the driver thread and the interrupt
/// handler (behind a mutex owned by the driver), so every method takes
/// `&mut self` and performs a single device access.
pub trait KpuPort: Send {
    /// Writes the write-1-to-clear interrupt latch register.
    fn write_interrupt_clear(&mut self, bits: InterruptBits);

    /// Writes the interrupt mask register (set bit = line suppressed).
    fn write_interrupt_mask(&mut self, bits: InterruptBits);

    fn write_fifo_threshold(&mut self, cfg: FifoThreshold);

    fn write_eight_bit_mode(&mut self, cfg: EightBitMode);

    /// Pushes one word of a layer argument into the register-file FIFO.
    /// A layer is [`LAYER_ARGUMENT_WORDS`](crate::LAYER_ARGUMENT_WORDS)
    /// consecutive pushes.
    fn push_layer_argument(&mut self, word: u64);

    /// The tiled tensor RAM.
    fn io_ram_mut(&mut self) -> &mut [u8];

    /// Bus address of the I/O RAM base (DMA destination for input staging).
    fn io_ram_bus_addr(&self) -> usize;

    /// Bus address of the output FIFO register (DMA source for
    /// main-memory-out layers).
    fn output_fifo_bus_addr(&self) -> usize;
}

/// Memory-mapped implementation over the real register window.
pub struct MmioPort {
    regs: *mut u64,
    io_ram: *mut u8,
}

// The raw pointers reference device memory with a static lifetime; access
// is serialized by the driver's port mutex.
unsafe impl Send for MmioPort {}

impl MmioPort {
    /// # Safety
    /// `reg_base` and `io_ram_base` must be the KPU register window and
    /// I/O RAM of a powered device, mapped for the lifetime of the port,
    /// and not aliased by any other driver.
    pub unsafe fn new(reg_base: usize, io_ram_base: usize) -> Self {
        Self {
            regs: reg_base as *mut u64,
            io_ram: io_ram_base as *mut u8,
        }
    }

    /// Port over the default physical addresses of the reference SoC.
    ///
    /// # Safety
    /// See [`MmioPort::new`].
    pub unsafe fn at_default_addresses() -> Self {
        Self::new(crate::KPU_REG_BASE, crate::KPU_IO_RAM_BASE)
    }

    fn write_word(&mut self, index: usize, value: u64) {
        unsafe { ptr::write_volatile(self.regs.add(index), value) }
    }
}

impl KpuPort for MmioPort {
    fn write_interrupt_clear(&mut self, bits: InterruptBits) {
        self.write_word(word::INTERRUPT_CLEAR, bits.as_word());
    }

    fn write_interrupt_mask(&mut self, bits: InterruptBits) {
        self.write_word(word::INTERRUPT_MASK, bits.as_word());
    }

    fn write_fifo_threshold(&mut self, cfg: FifoThreshold) {
        self.write_word(word::FIFO_THRESHOLD, cfg.as_word());
    }

    fn write_eight_bit_mode(&mut self, cfg: EightBitMode) {
        self.write_word(word::EIGHT_BIT_MODE, cfg.as_word());
    }

    fn push_layer_argument(&mut self, value: u64) {
        self.write_word(word::LAYER_ARGUMENT_FIFO, value);
    }

    fn io_ram_mut(&mut self) -> &mut [u8] {
        unsafe { core::slice::from_raw_parts_mut(self.io_ram, KPU_IO_RAM_BYTES) }
    }

    fn io_ram_bus_addr(&self) -> usize {
        self.io_ram as usize
    }

    fn output_fifo_bus_addr(&self) -> usize {
        unsafe { self.regs.add(word::FIFO_DATA_OUT) as usize }
    }
}
