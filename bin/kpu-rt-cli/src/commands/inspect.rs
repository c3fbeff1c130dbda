// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! `kpu-rt inspect`: dump a kmodel's header, layer stream and outputs.

use anyhow::Context;
use kmodel::{LayerType, ModelContainer};
use std::path::PathBuf;

pub fn execute(model_path: PathBuf) -> anyhow::Result<()> {
    let file = std::fs::File::open(&model_path)
        .with_context(|| format!("cannot open '{}'", model_path.display()))?;
    let mmap = unsafe { memmap2::Mmap::map(&file) }.context("mmap failed")?;

    let mut container = ModelContainer::load(&mmap)
        .with_context(|| format!("cannot load '{}'", model_path.display()))?;
    let header = *container.header();

    println!("Model: {}", model_path.display());
    println!(
        "  version {}, arch {}, {} mode",
        header.version,
        header.arch,
        if header.eight_bit_mode() { "8-bit" } else { "16-bit" },
    );
    println!(
        "  {} layers, {} outputs, {} bytes scratch, max start address {}",
        header.layers_length, header.output_count, header.main_mem_usage, header.max_start_address,
    );
    println!();

    println!("  {:<5} {:<16} {:>10}", "Idx", "Layer", "Body bytes");
    println!("  {}", "-".repeat(34));
    {
        let mut ctx = container.bind();
        while !ctx.finished() {
            let (index, layer_header, _body) = ctx.next_layer()?;
            let name = LayerType::from_tag(layer_header.layer_type)
                .map(LayerType::name)
                .unwrap_or("Unknown");
            println!("  {:<5} {:<16} {:>10}", index, name, layer_header.body_size);
        }
    }
    println!();

    if header.output_count > 0 {
        println!("  {:<5} {:>10} {:>10}", "Out", "Offset", "Size");
        println!("  {}", "-".repeat(28));
        for i in 0..header.output_count {
            let desc = container.output_descriptor(i)?;
            println!("  {:<5} {:>10} {:>10}", i, desc.address, desc.size);
        }
    }

    Ok(())
}
