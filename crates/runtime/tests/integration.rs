// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Integration tests: whole inferences against the software device model.
//!
//! These exercise the real state machine — input staging (both paths),
//! interrupt-completed and DMA-completed hardware layers, CPU kernel
//! dispatch, and the serialisation mutex — with models fabricated by
//! `kmodel::builder`.

use kmodel::builder::ModelBuilder;
use kpu_hal::soft::{SoftDevice, SoftPort};
use kpu_hal::{KpuPort, LayerArgument, LAYER_ARGUMENT_BYTES};
use kpu_kernels::Shape;
use runtime::{KpuDriver, RuntimeConfig, RuntimeError};
use std::sync::{Arc, Mutex};

// ── Helpers ────────────────────────────────────────────────────

struct Harness {
    driver: KpuDriver,
    port: Arc<Mutex<SoftPort>>,
    _device: SoftDevice,
}

fn harness_with(config: RuntimeConfig, dma_channels: usize) -> Harness {
    let device = SoftDevice::new(64 * 1024);
    let port: Arc<Mutex<dyn KpuPort>> = {
        let port: Arc<Mutex<SoftPort>> = Arc::clone(&device.port);
        port
    };
    let driver = KpuDriver::new(
        port,
        Box::new(device.dma(dma_channels)),
        Box::new(device.intc()),
        Box::new(device.clock.clone()),
        config,
    );
    driver.install();
    driver.open();
    Harness {
        driver,
        port: Arc::clone(&device.port),
        _device: device,
    }
}

fn harness() -> Harness {
    harness_with(RuntimeConfig::default(), 4)
}

/// Encodes a hardware layer argument for a conv layer whose input is
/// `width × height × channels` at I/O RAM address `image_src_addr`, with
/// `dma_total_byte` declared output bytes.
fn conv_argument(
    width: usize,
    height: usize,
    channels: usize,
    image_src_addr: u16,
    dma_total_byte: u32,
) -> [u8; LAYER_ARGUMENT_BYTES] {
    let mut arg = LayerArgument::from_bytes(&[0u8; LAYER_ARGUMENT_BYTES]);
    arg.image_size.set_i_row_wid((width - 1) as u16);
    arg.image_size.set_i_col_high((height - 1) as u16);
    arg.image_channel_num.set_i_ch_num((channels - 1) as u16);
    arg.image_addr.set_image_src_addr(image_src_addr);
    // One channel occupies ⌈width/64⌉ × height rows.
    let rows_per_channel = width.div_ceil(64) * height;
    arg.kernel_calc_type_cfg
        .set_channel_switch_addr(rows_per_channel as u16);
    arg.dma_parameter.set_dma_total_byte(dma_total_byte);

    let words = arg.to_words();
    let mut bytes = [0u8; LAYER_ARGUMENT_BYTES];
    for (i, word) in words.iter().enumerate() {
        bytes[i * 8..(i + 1) * 8].copy_from_slice(&word.to_le_bytes());
    }
    bytes
}

fn f32_bytes(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn read_f32s(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes(c.try_into().unwrap()))
        .collect()
}

// ── End-to-end runs ────────────────────────────────────────────

#[test]
fn test_conv_then_dequantize_pipeline() {
    let h = harness();

    // Conv streams 8 bytes into scratch[0..8]; dequantize expands them to
    // floats at scratch[64..96] with scale 2, bias 0.5.
    let model = ModelBuilder::new()
        .main_mem_usage(256)
        .conv(
            conv_argument(8, 1, 1, 0, 8),
            vec![0u8; 16],
            vec![0u8; 16],
            vec![0u8; 16],
            Some(0),
        )
        .dequantize(0, 64, 8, 2.0, 0.5)
        .output(64, 32)
        .build();

    h.port
        .lock()
        .unwrap()
        .set_conv_output(vec![0, 1, 2, 3, 4, 5, 6, 7]);

    let mut container = h.driver.load_model(&model).unwrap();
    let src = [0u8; 8];
    let summary = h.driver.run(&mut container, &src).unwrap();
    assert_eq!(summary.layers_run, 2);

    let out = read_f32s(h.driver.get_output(&container, 0).unwrap());
    let expected: Vec<f32> = (0..8).map(|v| v as f32 * 2.0 + 0.5).collect();
    assert_eq!(out, expected);
}

#[test]
fn test_cpu_input_staging_path() {
    // Width 8 is not a multiple of 64: the input must be staged by the
    // CPU and the first step taken under the critical section.
    let h = harness();

    let model = ModelBuilder::new()
        .main_mem_usage(128)
        .conv(
            conv_argument(8, 2, 1, 4, 8),
            Vec::new(),
            Vec::new(),
            Vec::new(),
            Some(0),
        )
        .output(0, 8)
        .build();

    h.port.lock().unwrap().set_conv_output(vec![9u8; 8]);
    let mut container = h.driver.load_model(&model).unwrap();

    let src: Vec<u8> = (0..16).collect();
    h.driver.run(&mut container, &src).unwrap();

    // The source must have been tiled into I/O RAM at row 4.
    let mut port = h.port.lock().unwrap();
    let ram = port.io_ram_mut();
    assert_eq!(&ram[4 * 64..4 * 64 + 8], &src[0..8]);
    assert_eq!(&ram[5 * 64..5 * 64 + 8], &src[8..16]);
}

#[test]
fn test_dma_input_staging_path() {
    // Width 64 → the input streams in by DMA, already in device layout.
    let h = harness();

    let model = ModelBuilder::new()
        .main_mem_usage(128)
        .conv(
            conv_argument(64, 1, 1, 0, 8),
            Vec::new(),
            Vec::new(),
            Vec::new(),
            Some(0),
        )
        .output(0, 8)
        .build();

    h.port.lock().unwrap().set_conv_output(vec![1u8; 8]);
    let mut container = h.driver.load_model(&model).unwrap();

    let src: Vec<u8> = (0..64).collect();
    h.driver.run(&mut container, &src).unwrap();

    let mut port = h.port.lock().unwrap();
    assert_eq!(&port.io_ram_mut()[0..64], &src[..]);
}

#[test]
fn test_conv_chain_interrupt_completion() {
    // Two hardware layers: the first completes through the interrupt
    // line (result stays in I/O RAM), the second streams to scratch.
    let h = harness();

    let model = ModelBuilder::new()
        .main_mem_usage(128)
        .conv(
            conv_argument(64, 1, 1, 0, 8),
            Vec::new(),
            Vec::new(),
            Vec::new(),
            None,
        )
        .conv(
            conv_argument(64, 1, 1, 0, 8),
            Vec::new(),
            Vec::new(),
            Vec::new(),
            Some(0),
        )
        .output(0, 8)
        .build();

    h.port.lock().unwrap().set_conv_output(vec![0x5A; 8]);
    let mut container = h.driver.load_model(&model).unwrap();
    let src = [0u8; 64];
    let summary = h.driver.run(&mut container, &src).unwrap();

    assert_eq!(summary.layers_run, 2);
    assert_eq!(h.port.lock().unwrap().layers_completed(), 2);
    assert_eq!(h.driver.get_output(&container, 0).unwrap(), &[0x5A; 8]);
}

#[test]
fn test_auxiliary_kernel_chain() {
    // conv → requantize → dequantize → softmax, checking real values
    // through the scratch arena.
    let h = harness();

    let mut table = [0u8; 256];
    for (i, t) in table.iter_mut().enumerate() {
        *t = i.saturating_mul(2).min(255) as u8;
    }

    let model = ModelBuilder::new()
        .main_mem_usage(512)
        .conv(
            conv_argument(8, 1, 1, 0, 4),
            Vec::new(),
            Vec::new(),
            Vec::new(),
            Some(0),
        )
        .requantize(0, 16, 4, &table)
        .dequantize(16, 32, 4, 1.0, 0.0)
        .softmax(32, 64, 4)
        .output(64, 16)
        .build();

    h.port.lock().unwrap().set_conv_output(vec![1, 2, 3, 4]);
    let mut container = h.driver.load_model(&model).unwrap();
    let summary = h.driver.run(&mut container, &[0u8; 8]).unwrap();
    assert_eq!(summary.layers_run, 4);

    let out = read_f32s(h.driver.get_output(&container, 0).unwrap());
    // requantize doubles: [2, 4, 6, 8]; softmax of those.
    let logits = [2.0f32, 4.0, 6.0, 8.0];
    let max = 8.0f32;
    let exps: Vec<f32> = logits.iter().map(|l| (l - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    for (o, e) in out.iter().zip(exps.iter().map(|e| e / sum)) {
        assert!((o - e).abs() < 1e-5, "got {o}, expected {e}");
    }
}

#[test]
fn test_elementwise_and_staging_layers() {
    // conv output feeds add-padding, upload and remove-padding plus a
    // float add, covering every memory-movement dispatch arm.
    let h = harness();

    let model = ModelBuilder::new()
        .main_mem_usage(512)
        .conv(
            conv_argument(8, 1, 1, 0, 32),
            Vec::new(),
            Vec::new(),
            Vec::new(),
            Some(0),
        )
        .add_padding(0, 100, 4)
        .upload(0, 200, Shape::new(8, 2, 2))
        .remove_padding(0, 48, 2)
        .dequantize(0, 64, 8, 1.0, 0.0)
        .add(64, 64, 128, 8)
        .output(48, 2)
        .output(128, 32)
        .build();

    let conv_bytes: Vec<u8> = (10..42).collect();
    h.port.lock().unwrap().set_conv_output(conv_bytes.clone());
    let mut container = h.driver.load_model(&model).unwrap();
    h.driver.run(&mut container, &[0u8; 8]).unwrap();

    {
        let mut port = h.port.lock().unwrap();
        let ram = port.io_ram_mut();
        // add_padding broadcast four channels at stride 16 from row 100.
        assert_eq!(ram[100 * 64], 10);
        assert_eq!(ram[100 * 64 + 16], 11);
        assert_eq!(ram[100 * 64 + 32], 12);
        assert_eq!(ram[100 * 64 + 48], 13);
        // upload tiled an 8x2x2 tensor at row 200.
        assert_eq!(&ram[200 * 64..200 * 64 + 8], &conv_bytes[0..8]);
        assert_eq!(&ram[201 * 64..201 * 64 + 8], &conv_bytes[8..16]);
        assert_eq!(&ram[200 * 64 + 16..200 * 64 + 24], &conv_bytes[16..24]);
    }

    // remove_padding gathered scratch[0] and scratch[16].
    assert_eq!(
        h.driver.get_output(&container, 0).unwrap(),
        &[conv_bytes[0], conv_bytes[16]]
    );

    // add doubled the dequantized floats.
    let out = read_f32s(h.driver.get_output(&container, 1).unwrap());
    let expected: Vec<f32> = conv_bytes[0..8].iter().map(|&b| b as f32 * 2.0).collect();
    assert_eq!(out, expected);
}

#[test]
fn test_quantized_add_and_concat() {
    let h = harness();

    let identity = kpu_kernels::QuantAffine {
        offset: 0,
        mul: 1,
        shift: 0,
    };
    let model = ModelBuilder::new()
        .main_mem_usage(256)
        .conv(
            conv_argument(8, 1, 1, 0, 8),
            Vec::new(),
            Vec::new(),
            Vec::new(),
            Some(0),
        )
        .quantized_add(0, 0, 16, 8, identity, identity, identity)
        .concat(32, &[(16, 8), (0, 8)])
        .output(32, 16)
        .build();

    h.port
        .lock()
        .unwrap()
        .set_conv_output(vec![10, 20, 30, 40, 50, 60, 128, 200]);
    let mut container = h.driver.load_model(&model).unwrap();
    h.driver.run(&mut container, &[0u8; 8]).unwrap();

    let out = h.driver.get_output(&container, 0).unwrap();
    // First half: saturating double of the conv bytes.
    assert_eq!(&out[0..8], &[20, 40, 60, 80, 100, 120, 255, 255]);
    // Second half: the raw conv bytes.
    assert_eq!(&out[8..16], &[10, 20, 30, 40, 50, 60, 128, 200]);
}

// ── Error paths ────────────────────────────────────────────────

#[test]
fn test_first_layer_not_conv_is_rejected() {
    let h = harness();
    let model = ModelBuilder::new()
        .main_mem_usage(128)
        .softmax(0, 64, 4)
        .build();
    let mut container = h.driver.load_model(&model).unwrap();
    let err = h.driver.run(&mut container, &[0u8; 8]).unwrap_err();
    assert!(matches!(
        err,
        RuntimeError::FirstLayerNotConv { kind: "Softmax" }
    ));
}

#[test]
fn test_unknown_layer_type_mid_stream() {
    let h = harness();
    let model = ModelBuilder::new()
        .main_mem_usage(128)
        .conv(
            conv_argument(8, 1, 1, 0, 8),
            Vec::new(),
            Vec::new(),
            Vec::new(),
            Some(0),
        )
        .raw_layer(9999, vec![0u8; 16])
        .build();
    let mut container = h.driver.load_model(&model).unwrap();
    let err = h.driver.run(&mut container, &[0u8; 8]).unwrap_err();
    assert!(matches!(
        err,
        RuntimeError::Model(kmodel::ModelError::UnknownLayerType(9999))
    ));
}

#[test]
fn test_dma_exhaustion_surfaces() {
    let h = harness_with(RuntimeConfig::default(), 0);
    let model = ModelBuilder::new().main_mem_usage(64).build();
    let mut container = h.driver.load_model(&model).unwrap();
    let err = h.driver.run(&mut container, &[]).unwrap_err();
    assert!(matches!(
        err,
        RuntimeError::Hal(kpu_hal::HalError::DmaExhausted)
    ));
}

#[test]
fn test_bad_artifact_rejected_at_load() {
    let h = harness();
    let mut model = ModelBuilder::new().main_mem_usage(64).build();
    model[0..4].copy_from_slice(&2u32.to_le_bytes());
    assert!(h.driver.load_model(&model).is_err());
}

#[test]
fn test_output_index_out_of_range() {
    let h = harness();
    let model = ModelBuilder::new()
        .main_mem_usage(64)
        .output(0, 16)
        .build();
    let container = h.driver.load_model(&model).unwrap();
    assert!(h.driver.get_output(&container, 0).is_ok());
    assert!(matches!(
        h.driver.get_output(&container, 1),
        Err(RuntimeError::Model(kmodel::ModelError::OutOfRange { .. }))
    ));
}

// ── Reuse and serialisation ────────────────────────────────────

#[test]
fn test_repeated_runs_reuse_container() {
    let h = harness();
    let model = ModelBuilder::new()
        .main_mem_usage(128)
        .conv(
            conv_argument(8, 1, 1, 0, 8),
            Vec::new(),
            Vec::new(),
            Vec::new(),
            Some(0),
        )
        .output(0, 8)
        .build();
    let mut container = h.driver.load_model(&model).unwrap();

    for round in 0..3u8 {
        h.port
            .lock()
            .unwrap()
            .set_conv_output(vec![round; 8]);
        h.driver.run(&mut container, &[0u8; 8]).unwrap();
        assert_eq!(h.driver.get_output(&container, 0).unwrap(), &[round; 8]);
    }
}

#[test]
fn test_concurrent_runs_serialise() {
    let h = Arc::new(harness());
    let model = Arc::new(
        ModelBuilder::new()
            .main_mem_usage(128)
            .conv(
                conv_argument(8, 1, 1, 0, 8),
                Vec::new(),
                Vec::new(),
                Vec::new(),
                Some(0),
            )
            .dequantize(0, 16, 8, 1.0, 0.0)
            .output(16, 32)
            .build(),
    );

    h.port.lock().unwrap().set_conv_output(vec![3u8; 8]);

    std::thread::scope(|scope| {
        for _ in 0..4 {
            let h = Arc::clone(&h);
            let model = Arc::clone(&model);
            scope.spawn(move || {
                let mut container = h.driver.load_model(&model).unwrap();
                h.driver.run(&mut container, &[0u8; 8]).unwrap();
                let out = read_f32s(h.driver.get_output(&container, 0).unwrap());
                assert_eq!(out, vec![3.0f32; 8]);
            });
        }
    });
}

#[test]
fn test_clock_gating_follows_open_count() {
    let device = SoftDevice::new(4096);
    let clock = device.clock.clone();
    let port: Arc<Mutex<dyn KpuPort>> = {
        let port: Arc<Mutex<SoftPort>> = Arc::clone(&device.port);
        port
    };
    let driver = KpuDriver::new(
        port,
        Box::new(device.dma(1)),
        Box::new(device.intc()),
        Box::new(device.clock.clone()),
        RuntimeConfig::default(),
    );

    driver.install();
    assert!(!clock.is_enabled());

    driver.open();
    assert!(clock.is_enabled());
    driver.open();
    driver.close();
    assert!(clock.is_enabled(), "still one opener");
    driver.close();
    assert!(!clock.is_enabled());
}

#[test]
fn test_profiling_records_every_layer() {
    let h = harness();
    let model = ModelBuilder::new()
        .main_mem_usage(256)
        .conv(
            conv_argument(8, 1, 1, 0, 8),
            Vec::new(),
            Vec::new(),
            Vec::new(),
            Some(0),
        )
        .dequantize(0, 64, 8, 1.0, 0.0)
        .l2_normalization(64, 96, 8)
        .output(96, 32)
        .build();

    h.port
        .lock()
        .unwrap()
        .set_conv_output(vec![1, 0, 0, 0, 0, 0, 0, 0]);
    let mut container = h.driver.load_model(&model).unwrap();
    let summary = h.driver.run(&mut container, &[0u8; 8]).unwrap();

    assert_eq!(summary.layers_run, 3);
    assert_eq!(summary.layers.len(), 3);
    assert_eq!(summary.layers[0].kind, "K210Conv");
    assert_eq!(summary.layers[1].kind, "Dequantize");
    assert_eq!(summary.layers[2].kind, "L2Norm");

    // L2 norm of [1, 0, …] is itself.
    let out = read_f32s(h.driver.get_output(&container, 0).unwrap());
    assert!((out[0] - 1.0).abs() < 1e-5);
    assert!(out[1..].iter().all(|&v| v == 0.0));
}
