// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # kpu-hal
//!
//! Hardware abstraction for the KPU convolutional accelerator.
//!
//! This crate owns everything that touches (or stands in for) the device:
//!
//! - [`regs`] — bitfield descriptions of the KPU register window, generated
//!   by hand from the hardware ABI. Field widths and the FIFO word order are
//!   load-bearing; do not reorder.
//! - [`LayerArgument`] — the 96-byte hardware layer descriptor the model
//!   compiler embeds in the artifact and the driver streams into the
//!   register-file FIFO, twelve words at a time.
//! - [`KpuPort`] — the raw device window (register writes, the layer FIFO,
//!   and the 2 MiB tiled I/O RAM). [`MmioPort`] implements it over a
//!   memory-mapped register block; [`soft::SoftPort`] is a software model
//!   for host-side testing.
//! - [`Accelerator`] — the driver-facing interface: configure for a model,
//!   push a layer, start the input/output DMA transfers.
//! - [`staging`] — conversion between planar host tensors and the KPU's
//!   channel-interleaved, row-padded on-chip layout.
//! - [`DmaEngine`], [`InterruptController`], [`ClockControl`] — the platform
//!   services the engine consumes but does not implement.
//! - [`Completion`] — the binary semaphore that carries ISR and DMA
//!   completions back into the execution driver.

pub mod regs;
pub mod soft;
pub mod staging;

mod accel;
mod dma;
mod error;
mod layer_arg;
mod platform;
mod port;
mod sync;

pub use accel::Accelerator;
pub use dma::{DmaChannel, DmaEngine, Transfer};
pub use error::HalError;
pub use layer_arg::{LayerArgument, LAYER_ARGUMENT_BYTES, LAYER_ARGUMENT_WORDS};
pub use platform::{ClockControl, ClockId, InterruptController, IrqHandler};
pub use port::{KpuPort, MmioPort};
pub use sync::Completion;

/// Physical base of the KPU register window on the reference SoC.
pub const KPU_REG_BASE: usize = 0x4080_0000;

/// Physical base of the KPU's tiled tensor RAM (the "I/O RAM").
pub const KPU_IO_RAM_BASE: usize = 0x4060_0000;

/// Size of the tiled tensor RAM in bytes.
pub const KPU_IO_RAM_BYTES: usize = 2 * 1024 * 1024;

/// Interrupt line of the accelerator on the platform interrupt controller.
pub const KPU_IRQ: u32 = 25;

/// DMA handshake source for the KPU receive request.
pub const KPU_DMA_REQUEST: u32 = 27;

/// Tiled memory is addressed in rows of this many bytes.
pub const IO_RAM_ROW_BYTES: usize = 64;
