// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Runs a synthetic kmodel on the software device model and prints the
//! per-layer timing summary.
//!
//! ```bash
//! cargo run --example soft_run
//! ```

use kmodel::builder::ModelBuilder;
use kpu_hal::soft::{SoftDevice, SoftPort};
use kpu_hal::{KpuPort, LayerArgument, LAYER_ARGUMENT_BYTES};
use runtime::{KpuDriver, RuntimeConfig};
use std::sync::{Arc, Mutex};

fn main() {
    // A conv layer streaming 16 bytes to scratch, then dequantize and
    // softmax over the result.
    let mut arg = LayerArgument::from_bytes(&[0u8; LAYER_ARGUMENT_BYTES]);
    arg.image_size.set_i_row_wid(7); // 8 px wide: CPU staging path
    arg.kernel_calc_type_cfg.set_channel_switch_addr(1);
    arg.dma_parameter.set_dma_total_byte(16);
    let mut arg_bytes = [0u8; LAYER_ARGUMENT_BYTES];
    for (i, word) in arg.to_words().iter().enumerate() {
        arg_bytes[i * 8..(i + 1) * 8].copy_from_slice(&word.to_le_bytes());
    }

    let model = ModelBuilder::new()
        .main_mem_usage(512)
        .conv(arg_bytes, Vec::new(), Vec::new(), Vec::new(), Some(0))
        .dequantize(0, 64, 16, 1.0 / 255.0, 0.0)
        .softmax(64, 128, 16)
        .output(128, 64)
        .build();

    let device = SoftDevice::new(64 * 1024);
    device
        .port
        .lock()
        .unwrap()
        .set_conv_output((0u8..16).map(|v| v * 16).collect());

    let port: Arc<Mutex<dyn KpuPort>> = {
        let port: Arc<Mutex<SoftPort>> = Arc::clone(&device.port);
        port
    };
    let driver = KpuDriver::new(
        port,
        Box::new(device.dma(4)),
        Box::new(device.intc()),
        Box::new(device.clock.clone()),
        RuntimeConfig::default(),
    );
    driver.install();
    driver.open();

    let mut container = driver.load_model(&model).expect("valid synthetic model");
    let summary = driver.run(&mut container, &[0u8; 8]).expect("run");
    println!("{}", summary.digest());
    for layer in &summary.layers {
        println!(
            "  layer {:>2} [{:<14}] {:>8.1} µs",
            layer.index,
            layer.kind,
            layer.elapsed.as_secs_f64() * 1e6,
        );
    }

    let probabilities = driver.get_output(&container, 0).expect("output 0");
    println!("softmax output: {} bytes", probabilities.len());
    driver.close();
}
