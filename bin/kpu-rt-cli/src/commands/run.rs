// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! `kpu-rt run`: execute a kmodel on the software device model.

use anyhow::Context;
use kpu_hal::soft::{SoftDevice, SoftPort};
use kpu_hal::{KpuPort, KPU_IO_RAM_BYTES};
use runtime::{KpuDriver, RuntimeConfig};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

pub fn execute(
    model_path: PathBuf,
    input_path: PathBuf,
    output_dir: Option<PathBuf>,
    profile_json: bool,
) -> anyhow::Result<()> {
    let file = std::fs::File::open(&model_path)
        .with_context(|| format!("cannot open '{}'", model_path.display()))?;
    let mmap = unsafe { memmap2::Mmap::map(&file) }.context("mmap failed")?;
    let input = std::fs::read(&input_path)
        .with_context(|| format!("cannot read '{}'", input_path.display()))?;

    let device = SoftDevice::new(KPU_IO_RAM_BYTES);
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

    let mut container = driver.load_model(&mmap)?;
    let summary = driver.run(&mut container, &input)?;
    println!("{}", summary.digest());
    if profile_json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    }

    for index in 0..container.output_count() {
        let output = driver.get_output(&container, index)?;
        match &output_dir {
            Some(dir) => {
                std::fs::create_dir_all(dir)?;
                let path = dir.join(format!("output_{index}.bin"));
                std::fs::write(&path, output)?;
                println!("output {index}: {} bytes -> {}", output.len(), path.display());
            }
            None => {
                let preview: Vec<String> = output
                    .iter()
                    .take(16)
                    .map(|b| format!("{b:02x}"))
                    .collect();
                println!(
                    "output {index}: {} bytes [{}{}]",
                    output.len(),
                    preview.join(" "),
                    if output.len() > 16 { " …" } else { "" },
                );
            }
        }
    }

    driver.close();
    Ok(())
}
