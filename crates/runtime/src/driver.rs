// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The per-device execution driver.
//!
//! `run` owns the whole inference: it claims a DMA channel, stages the
//! source tensor, then alternates between CPU stepping and suspending on
//! the completion semaphore until the layer cursor reaches the end of the
//! stream. The interrupt handler and the DMA completion are the only two
//! sources of wake-ups, and each suspension point receives exactly one.

use crate::summary::Profiler;
use crate::{InferenceSummary, RuntimeConfig, RuntimeError};
use kmodel::{
    ConvArgs, ExecutionContext, LayerBody, LayerType, ModelContainer, ModelError,
};
use kpu_hal::regs::InterruptBits;
use kpu_hal::{
    staging, Accelerator, ClockControl, ClockId, Completion, DmaChannel, DmaEngine,
    InterruptController, KpuPort, LayerArgument, LAYER_ARGUMENT_BYTES, KPU_DMA_REQUEST, KPU_IRQ,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

/// Outcome of dispatching one layer.
enum Step {
    /// A CPU layer ran to completion; keep stepping.
    Executed,
    /// A hardware layer was issued; suspend until the ISR or DMA signals.
    AwaitIrq,
}

/// One KPU device instance.
///
/// The driver serialises inferences with an internal mutex: a second
/// `run` (or `get_output`) on the same device blocks until the first
/// returns. The register port is shared with the interrupt handler; the
/// DMA engine, interrupt controller and clock are exclusive to the driver.
pub struct KpuDriver {
    port: Arc<Mutex<dyn KpuPort>>,
    accel: Accelerator,
    dma: Mutex<Box<dyn DmaEngine>>,
    intc: Mutex<Box<dyn InterruptController>>,
    clock: Mutex<Box<dyn ClockControl>>,
    serial: Mutex<()>,
    completion: Arc<Completion>,
    open_count: AtomicU32,
    config: RuntimeConfig,
}

impl KpuDriver {
    pub fn new(
        port: Arc<Mutex<dyn KpuPort>>,
        dma: Box<dyn DmaEngine>,
        intc: Box<dyn InterruptController>,
        clock: Box<dyn ClockControl>,
        config: RuntimeConfig,
    ) -> Self {
        let accel = Accelerator::new(Arc::clone(&port), KPU_DMA_REQUEST);
        Self {
            port,
            accel,
            dma: Mutex::new(dma),
            intc: Mutex::new(intc),
            clock: Mutex::new(clock),
            serial: Mutex::new(()),
            completion: Arc::new(Completion::new()),
            open_count: AtomicU32::new(0),
            config,
        }
    }

    /// One-time driver installation: the accelerator clock stays gated
    /// off until the device is opened.
    pub fn install(&self) {
        self.clock.lock().unwrap().disable(ClockId::Kpu);
        tracing::info!("kpu driver installed, clock gated off");
    }

    /// Reference-counted open: the first open ungates the clock.
    pub fn open(&self) {
        if self.open_count.fetch_add(1, Ordering::AcqRel) == 0 {
            self.clock.lock().unwrap().enable(ClockId::Kpu);
            tracing::debug!("first open, kpu clock enabled");
        }
    }

    /// Reference-counted close: the last close gates the clock off.
    pub fn close(&self) {
        if self.open_count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.clock.lock().unwrap().disable(ClockId::Kpu);
            tracing::debug!("last close, kpu clock disabled");
        }
    }

    /// Constructs a model container over a caller-owned buffer.
    pub fn load_model<'m>(&self, bytes: &'m [u8]) -> Result<ModelContainer<'m>, RuntimeError> {
        let container = ModelContainer::load(bytes)?;
        tracing::info!(
            layers = container.layers_length(),
            outputs = container.output_count(),
            scratch = container.header().main_mem_usage,
            eight_bit = container.header().eight_bit_mode(),
            "kmodel loaded",
        );
        Ok(container)
    }

    /// Runs one inference over `container` with `src` as the source
    /// tensor (planar bytes, as the first convolution expects them).
    pub fn run(
        &self,
        container: &mut ModelContainer<'_>,
        src: &[u8],
    ) -> Result<InferenceSummary, RuntimeError> {
        let _serial = self.serial.lock().unwrap();

        let channel = self.dma.lock().unwrap().open_free()?;
        let _channel_guard = ChannelGuard {
            dma: &self.dma,
            channel,
        };

        self.completion.drain();
        self.accel
            .configure_for_model(container.header().eight_bit_mode());
        self.install_isr();

        let mut ctx = container.bind();
        let mut profiler = Profiler::new(self.config.profile_layers);

        // ── Priming ────────────────────────────────────────────
        let first_header = ctx.peek_header()?;
        let first_type = LayerType::from_tag(first_header.layer_type)?;
        if !first_type.is_conv() {
            return Err(RuntimeError::FirstLayerNotConv {
                kind: first_type.name(),
            });
        }
        let LayerBody::Conv(first_conv) = LayerBody::decode(first_type, ctx.peek_body()?)? else {
            unreachable!("conv tag decodes to conv body");
        };
        let first_arg = load_layer_argument(ctx.model_bytes(), &first_conv)?;

        if first_arg.input_width() % 64 != 0 {
            // The DMA cannot produce the tiled layout for this width:
            // stage on the CPU and take the first step ourselves. No
            // completion will arrive for the staging, so the step runs
            // with the interrupt line held off.
            tracing::debug!(width = first_arg.input_width(), "cpu input staging");
            self.accel.stage_input(&first_arg, src)?;
            let step = {
                let intc = self.intc.lock().unwrap();
                intc.enter_critical();
                let step = self.step(&mut ctx, channel, &mut profiler);
                intc.exit_critical();
                step
            };
            step?;
        } else {
            tracing::debug!(width = first_arg.input_width(), "dma input staging");
            let mut dma = self.dma.lock().unwrap();
            self.accel
                .start_input_dma(dma.as_mut(), channel, &first_arg, src, &self.completion)?;
        }

        // ── Stepping / AwaitingIrq ─────────────────────────────
        'await_irq: loop {
            self.completion.take();
            loop {
                if ctx.finished() {
                    break 'await_irq;
                }
                match self.step(&mut ctx, channel, &mut profiler)? {
                    Step::AwaitIrq => continue 'await_irq,
                    Step::Executed => {
                        if ctx.finished() {
                            break 'await_irq;
                        }
                    }
                }
            }
        }

        // ── Done ───────────────────────────────────────────────
        self.accel.quiesce_interrupts();
        let summary = profiler.finish();
        tracing::info!("{}", summary.digest());
        Ok(summary)
    }

    /// Fetches an output region by index after a run.
    pub fn get_output<'c>(
        &self,
        container: &'c ModelContainer<'_>,
        index: u32,
    ) -> Result<&'c [u8], RuntimeError> {
        let _serial = self.serial.lock().unwrap();
        Ok(container.output(index)?)
    }

    // ── Internals ──────────────────────────────────────────────

    /// Installs the completion ISR: clear latches, re-mask, signal.
    fn install_isr(&self) {
        let port = Arc::clone(&self.port);
        let completion = Arc::clone(&self.completion);
        let mut intc = self.intc.lock().unwrap();
        intc.set_priority(KPU_IRQ, 1);
        intc.set_handler(
            KPU_IRQ,
            Box::new(move || {
                {
                    let mut port = port.lock().unwrap();
                    port.write_interrupt_clear(InterruptBits::all());
                    port.write_interrupt_mask(InterruptBits::all());
                }
                completion.give_from_isr();
            }),
        );
        intc.set_enable(KPU_IRQ, true);
    }

    /// Dispatches the layer under the cursor and advances past it.
    fn step(
        &self,
        ctx: &mut ExecutionContext<'_, '_>,
        channel: DmaChannel,
        profiler: &mut Profiler,
    ) -> Result<Step, RuntimeError> {
        let (index, header, body) = ctx.next_layer()?;
        let layer_type = LayerType::from_tag(header.layer_type)?;
        profiler.begin_layer(index, layer_type.name());
        tracing::trace!(layer = index, kind = layer_type.name(), "dispatch");

        match LayerBody::decode(layer_type, body)? {
            LayerBody::Add(args) => {
                let count = args.count as usize;
                let (a, b, dest) = ctx.arena.src2_dest::<f32, f32>(
                    args.input_a,
                    args.input_b,
                    count,
                    args.output,
                    count,
                )?;
                kpu_kernels::add::add_f32(a, b, dest)?;
            }
            LayerBody::QuantizedAdd(args) => {
                let count = args.count as usize;
                let (a, b, dest) = ctx.arena.src2_dest::<u8, u8>(
                    args.input_a,
                    args.input_b,
                    count,
                    args.output,
                    count,
                )?;
                kpu_kernels::quantized::quantized_add(
                    a,
                    b,
                    dest,
                    args.quant_a,
                    args.quant_b,
                    args.quant_out,
                )?;
            }
            LayerBody::GlobalAveragePool2d(args) => {
                let channels = args.channels as usize;
                let kernel_size = args.kernel_size as usize;
                let (src, dest) = ctx.arena.src_dest::<f32, f32>(
                    args.input,
                    channels * kernel_size,
                    args.output,
                    channels,
                )?;
                kpu_kernels::pool::global_average_pool2d(src, dest, kernel_size)?;
            }
            LayerBody::QuantizedMaxPool2d(args) => {
                let (src, dest) = ctx.arena.src_dest::<u8, u8>(
                    args.input,
                    args.in_shape.num_elements(),
                    args.output,
                    args.out_shape.num_elements(),
                )?;
                kpu_kernels::pool::quantized_max_pool2d(
                    src,
                    dest,
                    args.in_shape,
                    args.out_shape,
                    kpu_kernels::pool::PoolGeometry {
                        kernel_width: args.kernel_width,
                        kernel_height: args.kernel_height,
                        stride_width: args.stride_width,
                        stride_height: args.stride_height,
                        padding_width: args.padding_width,
                        padding_height: args.padding_height,
                    },
                )?;
            }
            LayerBody::Quantize(args) => {
                let count = args.count as usize;
                let (src, dest) =
                    ctx.arena
                        .src_dest::<f32, u8>(args.input, count, args.output, count)?;
                kpu_kernels::quantized::quantize(src, dest, args.quant)?;
            }
            LayerBody::Dequantize(args) => {
                let count = args.count as usize;
                let (src, dest) =
                    ctx.arena
                        .src_dest::<u8, f32>(args.input, count, args.output, count)?;
                kpu_kernels::quantized::dequantize(src, dest, args.quant)?;
            }
            LayerBody::Requantize(args) => {
                let count = args.count as usize;
                if args.input == args.output {
                    let data = ctx.arena.bytes_mut(args.input, count)?;
                    kpu_kernels::quantized::requantize_in_place(data, args.table);
                } else {
                    let (src, dest) =
                        ctx.arena
                            .src_dest::<u8, u8>(args.input, count, args.output, count)?;
                    kpu_kernels::quantized::requantize(src, dest, args.table)?;
                }
            }
            LayerBody::L2Normalization(args) => {
                let channels = args.channels as usize;
                let (src, dest) =
                    ctx.arena
                        .src_dest::<f32, f32>(args.input, channels, args.output, channels)?;
                kpu_kernels::norm::l2_normalize(src, dest)?;
            }
            LayerBody::Softmax(args) => {
                let channels = args.channels as usize;
                let (src, dest) =
                    ctx.arena
                        .src_dest::<f32, f32>(args.input, channels, args.output, channels)?;
                kpu_kernels::norm::softmax(src, dest)?;
            }
            LayerBody::Concat(args) => {
                let mut cursor = args.output;
                for range in &args.inputs {
                    ctx.arena
                        .copy_bytes(range.start, cursor, range.size as usize)?;
                    cursor += range.size;
                }
            }
            LayerBody::AddPadding(args) => {
                let channels = args.channels as usize;
                let src = ctx.arena.bytes(args.input, channels)?;
                self.accel.add_padding(channels, src, args.kpu_output)?;
            }
            LayerBody::RemovePadding(args) => {
                let channels = args.channels as usize;
                let src_len = channels.saturating_sub(1) * 16 + usize::from(channels > 0);
                let (src, dest) =
                    ctx.arena
                        .src_dest::<u8, u8>(args.input, src_len, args.output, channels)?;
                staging::remove_padding(src, dest, channels)?;
            }
            LayerBody::Upload(args) => {
                let shape = args.shape;
                let src = ctx.arena.bytes(args.input, shape.num_elements())?;
                self.accel.upload(
                    shape.width as usize,
                    shape.height as usize,
                    shape.channels as usize,
                    src,
                    args.kpu_output,
                )?;
            }
            LayerBody::Conv(args) => {
                self.issue_conv(ctx, &args, channel)?;
                return Ok(Step::AwaitIrq);
            }
        }
        Ok(Step::Executed)
    }

    /// Programs a hardware layer and arranges its completion signal:
    /// either the output DMA into the scratch arena, or the per-layer
    /// interrupt line chosen by the configured policy.
    fn issue_conv(
        &self,
        ctx: &mut ExecutionContext<'_, '_>,
        args: &ConvArgs,
        channel: DmaChannel,
    ) -> Result<(), RuntimeError> {
        let mut layer = load_layer_argument(ctx.model_bytes(), args)?;

        if args.main_mem_out() {
            layer.dma_parameter.set_send_data_out(true);
            let total = layer.dma_parameter.dma_total_byte();
            // The FIFO drain writes whole beats: make sure the rounded
            // length still lands inside the arena.
            let beats = (total as usize + 8) / 8;
            ctx.arena.bytes(args.output, beats * 8)?;
            let dest = ctx.arena.bus_addr(args.output);

            let mut dma = self.dma.lock().unwrap();
            self.accel
                .start_output_dma(dma.as_mut(), channel, dest, total, &self.completion);
        } else {
            if self.config.interrupt_policy.needs_layer_int_en() {
                layer.interrupt_enable.set_int_en(true);
            }
            self.accel
                .set_interrupt_mask(self.config.interrupt_policy.layer_mask());
        }

        self.accel.send_layer(&layer);
        Ok(())
    }
}

/// Reads the 96-byte hardware argument out of the model buffer and patches
/// the three in-model pointers to bus addresses, as the register fields
/// require.
fn load_layer_argument(model: &[u8], args: &ConvArgs) -> Result<LayerArgument, RuntimeError> {
    let offset = args.layer_offset as usize;
    let bytes: &[u8; LAYER_ARGUMENT_BYTES] = model
        .get(offset..offset + LAYER_ARGUMENT_BYTES)
        .ok_or(ModelError::Truncated {
            section: "layer argument",
        })?
        .try_into()
        .expect("slice length checked");

    let mut layer = LayerArgument::from_bytes(bytes);
    let base = model.as_ptr() as usize;
    layer
        .kernel_load_cfg
        .set_para_start_addr((base + args.weights_offset as usize) as u32);
    layer
        .kernel_pool_type_cfg
        .set_bwsx_base_addr((base + args.bn_offset as usize) as u32);
    layer
        .kernel_calc_type_cfg
        .set_active_addr((base + args.act_offset as usize) as u32);
    Ok(layer)
}

/// Returns the DMA channel on every exit path of `run`.
struct ChannelGuard<'a> {
    dma: &'a Mutex<Box<dyn DmaEngine>>,
    channel: DmaChannel,
}

impl Drop for ChannelGuard<'_> {
    fn drop(&mut self) {
        self.dma.lock().unwrap().release(self.channel);
    }
}
