// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The driver-facing accelerator interface.
//!
//! Wraps a shared [`KpuPort`] and knows how to configure the device for a
//! model, push hardware layers, and wire DMA transfers to and from the
//! tiled memory. The port is behind a mutex because the interrupt handler
//! is the second writer; no method holds the lock across a DMA or
//! interrupt-controller call.

use crate::regs::{EightBitMode, FifoThreshold, InterruptBits};
use crate::{
    staging, Completion, DmaChannel, DmaEngine, HalError, KpuPort, LayerArgument,
    IO_RAM_ROW_BYTES,
};
use std::sync::{Arc, Mutex};

/// Input FIFO watermark: full threshold.
const FIFO_FULL_THRESHOLD: u8 = 10;

/// Input FIFO watermark: empty threshold.
const FIFO_EMPTY_THRESHOLD: u8 = 1;

/// Accelerator register-level operations.
pub struct Accelerator {
    port: Arc<Mutex<dyn KpuPort>>,
    dma_request: u32,
}

impl Accelerator {
    pub fn new(port: Arc<Mutex<dyn KpuPort>>, dma_request: u32) -> Self {
        Self { port, dma_request }
    }

    /// The shared port, for the interrupt handler.
    pub fn port(&self) -> Arc<Mutex<dyn KpuPort>> {
        Arc::clone(&self.port)
    }

    /// Prepares the device for a model run: clears pending latches, sets
    /// the FIFO watermarks and the weight width, and masks every
    /// interrupt line. Per-layer unmasking happens when each hardware
    /// layer is issued.
    pub fn configure_for_model(&self, eight_bit_mode: bool) {
        tracing::debug!(eight_bit_mode, "configuring accelerator");
        let mut port = self.port.lock().unwrap();
        port.write_interrupt_clear(InterruptBits::all());
        port.write_fifo_threshold(
            FifoThreshold::new()
                .with_fifo_full_threshold(FIFO_FULL_THRESHOLD)
                .with_fifo_empty_threshold(FIFO_EMPTY_THRESHOLD),
        );
        port.write_eight_bit_mode(EightBitMode::new().with_eight_bit_mode(eight_bit_mode));
        port.write_interrupt_mask(InterruptBits::all());
    }

    /// Writes the interrupt mask register.
    pub fn set_interrupt_mask(&self, bits: InterruptBits) {
        self.port.lock().unwrap().write_interrupt_mask(bits);
    }

    /// Clears all latches and masks all lines (the end-of-run and ISR
    /// epilogue sequence).
    pub fn quiesce_interrupts(&self) {
        let mut port = self.port.lock().unwrap();
        port.write_interrupt_clear(InterruptBits::all());
        port.write_interrupt_mask(InterruptBits::all());
    }

    /// Streams the twelve argument words into the register-file FIFO, in
    /// hardware order.
    pub fn send_layer(&self, layer: &LayerArgument) {
        let mut port = self.port.lock().unwrap();
        for word in layer.to_words() {
            port.push_layer_argument(word);
        }
    }

    /// Starts the asynchronous input DMA: the planar source tensor is
    /// already in the layout the hardware expects (width a multiple of
    /// 64), so it streams straight into the layer's input address.
    pub fn start_input_dma(
        &self,
        dma: &mut dyn DmaEngine,
        channel: DmaChannel,
        layer: &LayerArgument,
        src: &[u8],
        done: &Arc<Completion>,
    ) -> Result<(), HalError> {
        let input_len = layer.input_byte_len();
        if src.len() < input_len {
            return Err(HalError::SourceTooShort {
                expected: input_len,
                actual: src.len(),
            });
        }
        let dest = {
            let port = self.port.lock().unwrap();
            port.io_ram_bus_addr()
                + layer.image_addr.image_src_addr() as usize * IO_RAM_ROW_BYTES
        };

        tracing::trace!(bytes = input_len, "input dma");
        dma.set_request_source(channel, self.dma_request);
        dma.transmit_async(
            channel,
            crate::Transfer {
                src: src.as_ptr() as usize,
                dest,
                src_inc: true,
                dest_inc: true,
                beat_bytes: 8,
                beats: input_len / 8,
                burst: 16,
            },
            Arc::clone(done),
        );
        Ok(())
    }

    /// Starts the asynchronous output DMA from the KPU output FIFO into
    /// main memory. `dma_total_byte` is the layer's declared output size;
    /// the transfer rounds up to whole 8-byte beats plus one trailing
    /// beat, matching the FIFO drain behaviour of the hardware.
    pub fn start_output_dma(
        &self,
        dma: &mut dyn DmaEngine,
        channel: DmaChannel,
        dest_bus_addr: usize,
        dma_total_byte: u32,
        done: &Arc<Completion>,
    ) {
        let src = self.port.lock().unwrap().output_fifo_bus_addr();
        tracing::trace!(bytes = dma_total_byte, "output dma");
        dma.set_request_source(channel, self.dma_request);
        dma.transmit_async(
            channel,
            crate::Transfer {
                src,
                dest: dest_bus_addr,
                src_inc: false,
                dest_inc: true,
                beat_bytes: 8,
                beats: (dma_total_byte as usize + 8) / 8,
                burst: 8,
            },
            Arc::clone(done),
        );
    }

    /// CPU fallback for input staging, used when the image width is not a
    /// multiple of 64 bytes and the input DMA cannot be used.
    pub fn stage_input(&self, layer: &LayerArgument, src: &[u8]) -> Result<(), HalError> {
        self.upload(
            layer.input_width(),
            layer.input_height(),
            layer.input_channels(),
            src,
            layer.image_addr.image_src_addr() as u32,
        )
    }

    /// Stages a planar tensor into I/O RAM at `kpu_addr` (in 64-byte
    /// units).
    pub fn upload(
        &self,
        width: usize,
        height: usize,
        channels: usize,
        src: &[u8],
        kpu_addr: u32,
    ) -> Result<(), HalError> {
        let mut port = self.port.lock().unwrap();
        let ram = port.io_ram_mut();
        let offset = kpu_addr as usize * IO_RAM_ROW_BYTES;
        if offset > ram.len() {
            return Err(HalError::IoRamRange {
                offset,
                len: 0,
                capacity: ram.len(),
            });
        }
        staging::upload(&mut ram[offset..], src, width, height, channels)
    }

    /// Broadcasts per-channel bytes into the padded layout at `kpu_addr`.
    pub fn add_padding(
        &self,
        channels: usize,
        src: &[u8],
        kpu_addr: u32,
    ) -> Result<(), HalError> {
        let mut port = self.port.lock().unwrap();
        let ram = port.io_ram_mut();
        let offset = kpu_addr as usize * IO_RAM_ROW_BYTES;
        if offset > ram.len() {
            return Err(HalError::IoRamRange {
                offset,
                len: 0,
                capacity: ram.len(),
            });
        }
        staging::add_padding(&mut ram[offset..], src, channels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::soft::SoftPort;
    use crate::LAYER_ARGUMENT_BYTES;

    fn accel() -> (Accelerator, Arc<Mutex<SoftPort>>) {
        let port = Arc::new(Mutex::new(SoftPort::new(16 * 1024)));
        let shared: Arc<Mutex<dyn KpuPort>> = {
            let shared: Arc<Mutex<SoftPort>> = Arc::clone(&port);
            shared
        };
        let accel = Accelerator::new(shared, crate::KPU_DMA_REQUEST);
        (accel, port)
    }

    #[test]
    fn test_configure_for_model() {
        let (accel, port) = accel();
        accel.configure_for_model(true);

        let p = port.lock().unwrap();
        assert_eq!(p.regs().fifo_threshold & 0xFF, (1 << 4) | 10);
        assert_eq!(p.regs().eight_bit_mode, 1);
        assert_eq!(p.regs().interrupt_mask, 0b111);
        // The clear write must have reached the latch register.
        assert_eq!(p.regs().interrupt_raw, 0);
    }

    #[test]
    fn test_send_layer_preserves_word_order() {
        let (accel, port) = accel();
        let mut bytes = [0u8; LAYER_ARGUMENT_BYTES];
        for (i, b) in bytes.iter_mut().enumerate() {
            *b = i as u8;
        }
        let layer = LayerArgument::from_bytes(&bytes);
        accel.send_layer(&layer);

        let p = port.lock().unwrap();
        let pushed = p.pushed_words();
        assert_eq!(pushed.len(), 12);
        assert_eq!(pushed, &layer.to_words());
    }

    #[test]
    fn test_upload_writes_io_ram_at_offset() {
        let (accel, port) = accel();
        let src = [1u8, 2, 3, 4];
        accel.upload(4, 1, 1, &src, 2).unwrap();

        let mut p = port.lock().unwrap();
        assert_eq!(&p.io_ram_mut()[128..132], &src);
    }
}
