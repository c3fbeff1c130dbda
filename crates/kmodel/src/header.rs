// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The fixed little-endian tables at the front of a kmodel.

use crate::ModelError;

/// Header version this engine consumes.
pub const SUPPORTED_VERSION: u32 = 3;

/// Target architecture tag this engine consumes.
pub const SUPPORTED_ARCH: u32 = 0;

/// Header flag bit 0: weights are stored in 8-bit mode.
pub const FLAG_EIGHT_BIT_MODE: u32 = 1;

/// Encoded header size.
pub const HEADER_BYTES: usize = 28;

/// Encoded output descriptor size.
pub const OUTPUT_DESCRIPTOR_BYTES: usize = 8;

/// Encoded layer header size.
pub const LAYER_HEADER_BYTES: usize = 8;

fn read_u32(bytes: &[u8], offset: usize, section: &'static str) -> Result<u32, ModelError> {
    bytes
        .get(offset..offset + 4)
        .map(|b| u32::from_le_bytes(b.try_into().unwrap()))
        .ok_or(ModelError::Truncated { section })
}

/// The kmodel file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelHeader {
    pub version: u32,
    pub flags: u32,
    pub arch: u32,
    pub layers_length: u32,
    /// Highest I/O RAM start address any layer uses, in 64-byte units.
    /// Recorded by the compiler; not consumed by the engine.
    pub max_start_address: u32,
    /// Scratch arena size in bytes.
    pub main_mem_usage: u32,
    pub output_count: u32,
}

impl ModelHeader {
    /// Parses the header from the front of the model buffer. Only decodes;
    /// the version/arch gate lives in
    /// [`ModelContainer::load`](crate::ModelContainer::load).
    pub fn parse(bytes: &[u8]) -> Result<Self, ModelError> {
        Ok(Self {
            version: read_u32(bytes, 0, "header")?,
            flags: read_u32(bytes, 4, "header")?,
            arch: read_u32(bytes, 8, "header")?,
            layers_length: read_u32(bytes, 12, "header")?,
            max_start_address: read_u32(bytes, 16, "header")?,
            main_mem_usage: read_u32(bytes, 20, "header")?,
            output_count: read_u32(bytes, 24, "header")?,
        })
    }

    pub fn eight_bit_mode(&self) -> bool {
        self.flags & FLAG_EIGHT_BIT_MODE != 0
    }

    pub fn encode(&self) -> [u8; HEADER_BYTES] {
        let mut out = [0u8; HEADER_BYTES];
        for (i, field) in [
            self.version,
            self.flags,
            self.arch,
            self.layers_length,
            self.max_start_address,
            self.main_mem_usage,
            self.output_count,
        ]
        .into_iter()
        .enumerate()
        {
            out[i * 4..i * 4 + 4].copy_from_slice(&field.to_le_bytes());
        }
        out
    }
}

/// One entry of the output table: a region of the scratch arena holding a
/// model output after a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputDescriptor {
    /// Byte offset into the scratch arena.
    pub address: u32,
    /// Region size in bytes.
    pub size: u32,
}

impl OutputDescriptor {
    pub fn parse(bytes: &[u8], offset: usize) -> Result<Self, ModelError> {
        Ok(Self {
            address: read_u32(bytes, offset, "output table")?,
            size: read_u32(bytes, offset + 4, "output table")?,
        })
    }
}

/// One entry of the layer table: the type tag and the size of the layer's
/// argument record in the body stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayerHeader {
    /// Raw type tag; decode with
    /// [`LayerType::from_tag`](crate::LayerType::from_tag).
    pub layer_type: u32,
    pub body_size: u32,
}

impl LayerHeader {
    pub fn parse(bytes: &[u8], offset: usize) -> Result<Self, ModelError> {
        Ok(Self {
            layer_type: read_u32(bytes, offset, "layer table")?,
            body_size: read_u32(bytes, offset + 4, "layer table")?,
        })
    }
}
