// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! A software model of the KPU and its platform services.
//!
//! Nothing here computes a convolution. The model reproduces the *control*
//! behaviour of the device — register latches, the layer-argument FIFO,
//! interrupt masking, DMA completion signalling — precisely enough that the
//! execution driver cannot tell the difference. A real interrupt thread
//! dispatches handlers asynchronously, so driver/ISR races are exercised
//! for real on the host.
//!
//! Tests preload [`SoftPort::set_conv_output`] with whatever bytes the
//! "hardware" should stream out of its output FIFO.

use crate::regs::InterruptBits;
use crate::{
    ClockControl, ClockId, Completion, DmaChannel, DmaEngine, HalError, InterruptController,
    IrqHandler, KpuPort, Transfer, LAYER_ARGUMENT_WORDS,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

// ── Interrupt line ─────────────────────────────────────────────

#[derive(Default)]
struct LineState {
    pending: bool,
    enabled: bool,
    critical: bool,
    shutdown: bool,
}

/// One interrupt line with an asynchronous dispatcher.
///
/// The device model raises the line; a dedicated thread (owned by
/// [`SoftIntc`]) invokes the installed handler, exactly as a CPU would take
/// the trap between instructions of the main thread.
#[derive(Default)]
pub struct IrqLine {
    state: Mutex<LineState>,
    condvar: Condvar,
    handler: Mutex<Option<IrqHandler>>,
}

impl IrqLine {
    pub fn raise(&self) {
        self.state.lock().unwrap().pending = true;
        self.condvar.notify_all();
    }

    fn set_enabled(&self, enabled: bool) {
        self.state.lock().unwrap().enabled = enabled;
        self.condvar.notify_all();
    }

    fn set_critical(&self, critical: bool) {
        self.state.lock().unwrap().critical = critical;
        self.condvar.notify_all();
    }

    fn set_handler(&self, handler: IrqHandler) {
        *self.handler.lock().unwrap() = Some(handler);
        self.condvar.notify_all();
    }

    fn shutdown(&self) {
        self.state.lock().unwrap().shutdown = true;
        self.condvar.notify_all();
    }

    /// Dispatcher loop body; returns when shut down.
    fn dispatch(&self) {
        loop {
            {
                let mut state = self.state.lock().unwrap();
                loop {
                    if state.shutdown {
                        return;
                    }
                    if state.pending && state.enabled && !state.critical {
                        state.pending = false;
                        break;
                    }
                    state = self.condvar.wait(state).unwrap();
                }
            }
            // State lock released: the handler may touch the device.
            if let Some(handler) = self.handler.lock().unwrap().as_mut() {
                handler();
            }
        }
    }
}

// ── Device model ───────────────────────────────────────────────

/// Snapshot of the model's register state, for assertions.
#[derive(Debug, Clone, Copy, Default)]
pub struct SoftRegs {
    pub interrupt_status: u64,
    pub interrupt_raw: u64,
    pub interrupt_mask: u64,
    pub fifo_threshold: u64,
    pub eight_bit_mode: u64,
}

/// In-memory stand-in for the KPU register window and I/O RAM.
pub struct SoftPort {
    regs: SoftRegs,
    io_ram: Vec<u64>,
    fifo: Vec<u64>,
    layers_completed: usize,
    /// Bytes the output FIFO streams to the output DMA.
    conv_output: Vec<u8>,
    conv_cursor: usize,
    /// Stable host location standing in for the `fifo_data_out` register.
    fifo_data_out: Box<u64>,
    irq: Option<Arc<IrqLine>>,
}

impl SoftPort {
    pub fn new(io_ram_bytes: usize) -> Self {
        Self {
            regs: SoftRegs {
                interrupt_mask: InterruptBits::all().as_word(),
                ..Default::default()
            },
            io_ram: vec![0u64; io_ram_bytes.div_ceil(8)],
            fifo: Vec::new(),
            layers_completed: 0,
            conv_output: Vec::new(),
            conv_cursor: 0,
            fifo_data_out: Box::new(0),
            irq: None,
        }
    }

    fn attach_irq(&mut self, line: Arc<IrqLine>) {
        self.irq = Some(line);
    }

    /// Preloads the bytes the device will stream from its output FIFO.
    pub fn set_conv_output(&mut self, bytes: Vec<u8>) {
        self.conv_output = bytes;
        self.conv_cursor = 0;
    }

    /// Register snapshot.
    pub fn regs(&self) -> SoftRegs {
        self.regs
    }

    /// Every word pushed into the layer-argument FIFO so far.
    pub fn pushed_words(&self) -> Vec<u64> {
        self.fifo.clone()
    }

    /// Completed hardware layers (groups of twelve FIFO words).
    pub fn layers_completed(&self) -> usize {
        self.layers_completed
    }

    fn drain_conv_output(&mut self, len: usize) -> Vec<u8> {
        let mut out = vec![0u8; len];
        let available = self.conv_output.len().saturating_sub(self.conv_cursor);
        let take = available.min(len);
        out[..take]
            .copy_from_slice(&self.conv_output[self.conv_cursor..self.conv_cursor + take]);
        self.conv_cursor += take;
        out
    }

    /// A layer argument is complete: latch the completion interrupts and,
    /// if any line is unmasked, raise the IRQ. The output stream rewinds
    /// so every hardware layer (and every run) replays the preloaded
    /// bytes from the start.
    fn complete_layer(&mut self) {
        self.layers_completed += 1;
        self.conv_cursor = 0;
        let latched = InterruptBits::new()
            .with_calc_done(true)
            .with_layer_cfg_almost_empty(true)
            .as_word();
        self.regs.interrupt_raw |= latched;
        self.regs.interrupt_status = self.regs.interrupt_raw & !self.regs.interrupt_mask;
        if self.regs.interrupt_status != 0 {
            if let Some(irq) = &self.irq {
                irq.raise();
            }
        }
    }
}

impl KpuPort for SoftPort {
    fn write_interrupt_clear(&mut self, bits: InterruptBits) {
        self.regs.interrupt_raw &= !bits.as_word();
        self.regs.interrupt_status = self.regs.interrupt_raw & !self.regs.interrupt_mask;
    }

    fn write_interrupt_mask(&mut self, bits: InterruptBits) {
        self.regs.interrupt_mask = bits.as_word();
        self.regs.interrupt_status = self.regs.interrupt_raw & !self.regs.interrupt_mask;
    }

    fn write_fifo_threshold(&mut self, cfg: crate::regs::FifoThreshold) {
        self.regs.fifo_threshold = cfg.as_word();
    }

    fn write_eight_bit_mode(&mut self, cfg: crate::regs::EightBitMode) {
        self.regs.eight_bit_mode = cfg.as_word();
    }

    fn push_layer_argument(&mut self, word: u64) {
        self.fifo.push(word);
        if self.fifo.len() % LAYER_ARGUMENT_WORDS == 0 {
            self.complete_layer();
        }
    }

    fn io_ram_mut(&mut self) -> &mut [u8] {
        bytemuck::cast_slice_mut(&mut self.io_ram)
    }

    fn io_ram_bus_addr(&self) -> usize {
        self.io_ram.as_ptr() as usize
    }

    fn output_fifo_bus_addr(&self) -> usize {
        &*self.fifo_data_out as *const u64 as usize
    }
}

// ── Host DMA ───────────────────────────────────────────────────

/// A DMA engine that performs transfers synchronously with `memcpy`.
///
/// Reads addressed at the device's output FIFO drain the preloaded
/// convolution output instead of dereferencing the register location.
pub struct HostDma {
    port: Arc<Mutex<SoftPort>>,
    busy: Vec<bool>,
    requests: HashMap<usize, u32>,
}

impl HostDma {
    pub fn new(port: Arc<Mutex<SoftPort>>, channels: usize) -> Self {
        Self {
            port,
            busy: vec![false; channels],
            requests: HashMap::new(),
        }
    }
}

impl DmaEngine for HostDma {
    fn open_free(&mut self) -> Result<DmaChannel, HalError> {
        for (i, busy) in self.busy.iter_mut().enumerate() {
            if !*busy {
                *busy = true;
                return Ok(DmaChannel(i));
            }
        }
        Err(HalError::DmaExhausted)
    }

    fn set_request_source(&mut self, channel: DmaChannel, request: u32) {
        self.requests.insert(channel.0, request);
    }

    fn transmit_async(&mut self, _channel: DmaChannel, transfer: Transfer, done: Arc<Completion>) {
        let total = transfer.len_bytes();
        let fifo_addr = self.port.lock().unwrap().output_fifo_bus_addr();

        if !transfer.src_inc && transfer.src == fifo_addr {
            let data = self.port.lock().unwrap().drain_conv_output(total);
            // SAFETY: the destination bus address was derived from a live
            // host allocation (the scratch arena or I/O RAM), which the
            // caller keeps alive until `done` is given.
            unsafe {
                core::ptr::copy_nonoverlapping(data.as_ptr(), transfer.dest as *mut u8, total);
            }
        } else {
            // SAFETY: as above, for both endpoints; the engine never
            // issues overlapping transfers.
            unsafe {
                core::ptr::copy_nonoverlapping(
                    transfer.src as *const u8,
                    transfer.dest as *mut u8,
                    total,
                );
            }
        }
        done.give();
    }

    fn release(&mut self, channel: DmaChannel) {
        if let Some(busy) = self.busy.get_mut(channel.0) {
            *busy = false;
        }
    }
}

// ── Interrupt controller & clock ───────────────────────────────

/// Software interrupt controller owning the dispatcher thread.
pub struct SoftIntc {
    line: Arc<IrqLine>,
    priorities: HashMap<u32, u32>,
    dispatcher: Option<JoinHandle<()>>,
}

impl SoftIntc {
    pub fn new(line: Arc<IrqLine>) -> Self {
        let thread_line = Arc::clone(&line);
        let dispatcher = std::thread::Builder::new()
            .name("soft-kpu-irq".into())
            .spawn(move || thread_line.dispatch())
            .expect("spawn irq dispatcher");
        Self {
            line,
            priorities: HashMap::new(),
            dispatcher: Some(dispatcher),
        }
    }
}

impl InterruptController for SoftIntc {
    fn set_priority(&mut self, irq: u32, priority: u32) {
        self.priorities.insert(irq, priority);
    }

    fn set_handler(&mut self, _irq: u32, handler: IrqHandler) {
        self.line.set_handler(handler);
    }

    fn set_enable(&mut self, _irq: u32, enable: bool) {
        self.line.set_enabled(enable);
    }

    fn enter_critical(&self) {
        self.line.set_critical(true);
    }

    fn exit_critical(&self) {
        self.line.set_critical(false);
    }
}

impl Drop for SoftIntc {
    fn drop(&mut self) {
        self.line.shutdown();
        if let Some(handle) = self.dispatcher.take() {
            let _ = handle.join();
        }
    }
}

/// Records clock gating for assertions.
#[derive(Clone, Default)]
pub struct SoftClock {
    enabled: Arc<AtomicBool>,
}

impl SoftClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }
}

impl ClockControl for SoftClock {
    fn enable(&mut self, _clock: ClockId) {
        self.enabled.store(true, Ordering::Release);
    }

    fn disable(&mut self, _clock: ClockId) {
        self.enabled.store(false, Ordering::Release);
    }
}

// ── Bundle ─────────────────────────────────────────────────────

/// A fully wired software device: port, IRQ line, DMA, and clock.
pub struct SoftDevice {
    pub port: Arc<Mutex<SoftPort>>,
    pub irq: Arc<IrqLine>,
    pub clock: SoftClock,
}

impl SoftDevice {
    pub fn new(io_ram_bytes: usize) -> Self {
        let irq = Arc::new(IrqLine::default());
        let mut port = SoftPort::new(io_ram_bytes);
        port.attach_irq(Arc::clone(&irq));
        Self {
            port: Arc::new(Mutex::new(port)),
            irq,
            clock: SoftClock::new(),
        }
    }

    /// A host DMA engine with `channels` channels over this device.
    pub fn dma(&self, channels: usize) -> HostDma {
        HostDma::new(Arc::clone(&self.port), channels)
    }

    /// The interrupt controller (spawns the dispatcher thread).
    pub fn intc(&self) -> SoftIntc {
        SoftIntc::new(Arc::clone(&self.irq))
    }
}
