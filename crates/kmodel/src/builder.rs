// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Synthetic kmodel fabrication.
//!
//! The real artifacts come from the external model compiler; tests and
//! benchmarks should not. [`ModelBuilder`] assembles a byte-exact kmodel
//! from layer descriptions: header, output table, layer table, body
//! stream, and a trailing blob section for the hardware layer arguments,
//! weights and activation tables that convolution bodies reference by
//! offset.

use crate::header::{ModelHeader, HEADER_BYTES, LAYER_HEADER_BYTES, OUTPUT_DESCRIPTOR_BYTES};
use crate::layer::CONV_FLAG_MAIN_MEM_OUT;
use crate::{LayerType, SUPPORTED_ARCH, SUPPORTED_VERSION};
use kpu_kernels::{QuantAffine, QuantParam, Shape};

const LAYER_ARGUMENT_BYTES: usize = 96;

enum Body {
    Encoded { tag: u32, bytes: Vec<u8> },
    Conv {
        flags: u32,
        output: u32,
        layer_arg: [u8; LAYER_ARGUMENT_BYTES],
        weights: Vec<u8>,
        bn: Vec<u8>,
        act: Vec<u8>,
    },
}

/// Builds valid kmodel buffers layer by layer.
#[derive(Default)]
pub struct ModelBuilder {
    eight_bit: bool,
    main_mem_usage: u32,
    max_start_address: u32,
    outputs: Vec<(u32, u32)>,
    layers: Vec<Body>,
}

fn push_u32s(out: &mut Vec<u8>, words: &[u32]) {
    for w in words {
        out.extend_from_slice(&w.to_le_bytes());
    }
}

fn push_affine(out: &mut Vec<u8>, q: QuantAffine) {
    push_u32s(out, &[q.offset as u32, q.mul as u32, q.shift as u32]);
}

fn push_param(out: &mut Vec<u8>, q: QuantParam) {
    push_u32s(out, &[q.scale.to_bits(), q.bias.to_bits()]);
}

impl ModelBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eight_bit(mut self, on: bool) -> Self {
        self.eight_bit = on;
        self
    }

    pub fn main_mem_usage(mut self, bytes: u32) -> Self {
        self.main_mem_usage = bytes;
        self
    }

    pub fn max_start_address(mut self, addr: u32) -> Self {
        self.max_start_address = addr;
        self
    }

    /// Declares an output region of the scratch arena.
    pub fn output(mut self, address: u32, size: u32) -> Self {
        self.outputs.push((address, size));
        self
    }

    /// Appends a layer with an arbitrary tag and body. Escape hatch for
    /// malformed-model tests.
    pub fn raw_layer(mut self, tag: u32, bytes: Vec<u8>) -> Self {
        self.layers.push(Body::Encoded { tag, bytes });
        self
    }

    fn encoded(self, tag: LayerType, bytes: Vec<u8>) -> Self {
        self.raw_layer(tag as u32, bytes)
    }

    pub fn add(self, input_a: u32, input_b: u32, output: u32, count: u32) -> Self {
        let mut b = Vec::new();
        push_u32s(&mut b, &[0, input_a, input_b, output, count]);
        self.encoded(LayerType::Add, b)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn quantized_add(
        self,
        input_a: u32,
        input_b: u32,
        output: u32,
        count: u32,
        quant_a: QuantAffine,
        quant_b: QuantAffine,
        quant_out: QuantAffine,
    ) -> Self {
        let mut b = Vec::new();
        push_u32s(&mut b, &[0, input_a, input_b, output, count]);
        push_affine(&mut b, quant_a);
        push_affine(&mut b, quant_b);
        push_affine(&mut b, quant_out);
        self.encoded(LayerType::QuantizedAdd, b)
    }

    pub fn global_average_pool2d(
        self,
        input: u32,
        output: u32,
        kernel_size: u32,
        channels: u32,
    ) -> Self {
        let mut b = Vec::new();
        push_u32s(&mut b, &[0, input, output, kernel_size, channels]);
        self.encoded(LayerType::GlobalAveragePool2d, b)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn quantized_max_pool2d(
        self,
        input: u32,
        output: u32,
        in_shape: Shape,
        out_shape: Shape,
        kernel: (u32, u32),
        stride: (u32, u32),
        padding: (u32, u32),
    ) -> Self {
        let mut b = Vec::new();
        push_u32s(
            &mut b,
            &[
                0,
                input,
                output,
                in_shape.width,
                in_shape.height,
                in_shape.channels,
                out_shape.width,
                out_shape.height,
                out_shape.channels,
                kernel.0,
                kernel.1,
                stride.0,
                stride.1,
                padding.0,
                padding.1,
            ],
        );
        self.encoded(LayerType::QuantizedMaxPool2d, b)
    }

    pub fn quantize(self, input: u32, output: u32, count: u32, scale: f32, bias: f32) -> Self {
        let mut b = Vec::new();
        push_u32s(&mut b, &[0, input, output, count]);
        push_param(&mut b, QuantParam { scale, bias });
        self.encoded(LayerType::Quantize, b)
    }

    pub fn dequantize(self, input: u32, output: u32, count: u32, scale: f32, bias: f32) -> Self {
        let mut b = Vec::new();
        push_u32s(&mut b, &[0, input, output, count]);
        push_param(&mut b, QuantParam { scale, bias });
        self.encoded(LayerType::Dequantize, b)
    }

    pub fn requantize(self, input: u32, output: u32, count: u32, table: &[u8; 256]) -> Self {
        let mut b = Vec::new();
        push_u32s(&mut b, &[0, input, output, count]);
        b.extend_from_slice(table);
        self.encoded(LayerType::Requantize, b)
    }

    pub fn l2_normalization(self, input: u32, output: u32, channels: u32) -> Self {
        let mut b = Vec::new();
        push_u32s(&mut b, &[0, input, output, channels]);
        self.encoded(LayerType::L2Normalization, b)
    }

    pub fn softmax(self, input: u32, output: u32, channels: u32) -> Self {
        let mut b = Vec::new();
        push_u32s(&mut b, &[0, input, output, channels]);
        self.encoded(LayerType::Softmax, b)
    }

    pub fn concat(self, output: u32, inputs: &[(u32, u32)]) -> Self {
        let mut b = Vec::new();
        push_u32s(&mut b, &[0, output, inputs.len() as u32]);
        for &(start, size) in inputs {
            push_u32s(&mut b, &[start, size]);
        }
        self.encoded(LayerType::Concat, b)
    }

    pub fn add_padding(self, input: u32, kpu_output: u32, channels: u32) -> Self {
        let mut b = Vec::new();
        push_u32s(&mut b, &[0, input, kpu_output, channels]);
        self.encoded(LayerType::AddPadding, b)
    }

    pub fn remove_padding(self, input: u32, output: u32, channels: u32) -> Self {
        let mut b = Vec::new();
        push_u32s(&mut b, &[0, input, output, channels]);
        self.encoded(LayerType::RemovePadding, b)
    }

    pub fn upload(self, input: u32, kpu_output: u32, shape: Shape) -> Self {
        let mut b = Vec::new();
        push_u32s(
            &mut b,
            &[0, input, kpu_output, shape.width, shape.height, shape.channels],
        );
        self.encoded(LayerType::Upload, b)
    }

    /// Appends a convolution layer. The 96-byte hardware argument and the
    /// weight/batch-norm/activation blobs are placed after the body stream
    /// and referenced by offset, the way the compiler lays them out.
    pub fn conv(
        mut self,
        layer_arg: [u8; LAYER_ARGUMENT_BYTES],
        weights: Vec<u8>,
        bn: Vec<u8>,
        act: Vec<u8>,
        main_mem_out: Option<u32>,
    ) -> Self {
        let (flags, output) = match main_mem_out {
            Some(address) => (CONV_FLAG_MAIN_MEM_OUT, address),
            None => (0, 0),
        };
        self.layers.push(Body::Conv {
            flags,
            output,
            layer_arg,
            weights,
            bn,
            act,
        });
        self
    }

    /// Assembles the final artifact.
    pub fn build(&self) -> Vec<u8> {
        const CONV_BODY_BYTES: usize = 24;

        let body_sizes: Vec<usize> = self
            .layers
            .iter()
            .map(|body| match body {
                Body::Encoded { bytes, .. } => bytes.len(),
                Body::Conv { .. } => CONV_BODY_BYTES,
            })
            .collect();

        let outputs_offset = HEADER_BYTES;
        let layer_headers_offset = outputs_offset + self.outputs.len() * OUTPUT_DESCRIPTOR_BYTES;
        let body_offset = layer_headers_offset + self.layers.len() * LAYER_HEADER_BYTES;
        let blob_offset = body_offset + body_sizes.iter().sum::<usize>();

        let header = ModelHeader {
            version: SUPPORTED_VERSION,
            flags: u32::from(self.eight_bit),
            arch: SUPPORTED_ARCH,
            layers_length: self.layers.len() as u32,
            max_start_address: self.max_start_address,
            main_mem_usage: self.main_mem_usage,
            output_count: self.outputs.len() as u32,
        };

        let mut out = Vec::with_capacity(blob_offset);
        out.extend_from_slice(&header.encode());
        for &(address, size) in &self.outputs {
            push_u32s(&mut out, &[address, size]);
        }
        for (body, size) in self.layers.iter().zip(&body_sizes) {
            let tag = match body {
                Body::Encoded { tag, .. } => *tag,
                Body::Conv { .. } => LayerType::Conv as u32,
            };
            push_u32s(&mut out, &[tag, *size as u32]);
        }

        // Body stream, resolving conv blob offsets as we go.
        let mut blobs: Vec<u8> = Vec::new();
        let place = |blobs: &mut Vec<u8>, bytes: &[u8]| -> u32 {
            // Keep every blob 8-byte aligned, as the hardware argument
            // layout requires.
            while (blob_offset + blobs.len()) % 8 != 0 {
                blobs.push(0);
            }
            let at = blob_offset + blobs.len();
            blobs.extend_from_slice(bytes);
            at as u32
        };

        for body in &self.layers {
            match body {
                Body::Encoded { bytes, .. } => out.extend_from_slice(bytes),
                Body::Conv {
                    flags,
                    output,
                    layer_arg,
                    weights,
                    bn,
                    act,
                } => {
                    let layer_offset = place(&mut blobs, layer_arg);
                    let weights_offset = place(&mut blobs, weights);
                    let bn_offset = place(&mut blobs, bn);
                    let act_offset = place(&mut blobs, act);
                    push_u32s(
                        &mut out,
                        &[*flags, *output, layer_offset, weights_offset, bn_offset, act_offset],
                    );
                }
            }
        }

        debug_assert_eq!(out.len(), blob_offset);
        out.extend_from_slice(&blobs);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{LayerBody, ModelContainer};

    #[test]
    fn test_empty_model_loads() {
        let model = ModelBuilder::new().main_mem_usage(128).build();
        let container = ModelContainer::load(&model).unwrap();
        assert_eq!(container.layers_length(), 0);
        assert_eq!(container.output_count(), 0);
    }

    #[test]
    fn test_layer_stream_decodes() {
        let table = [0u8; 256];
        let model = ModelBuilder::new()
            .main_mem_usage(1024)
            .quantize(0, 256, 16, 1.0 / 255.0, 0.0)
            .requantize(256, 512, 16, &table)
            .softmax(512, 768, 16)
            .build();
        let mut container = ModelContainer::load(&model).unwrap();
        let mut ctx = container.bind();

        let (_, header, body) = ctx.next_layer().unwrap();
        let ty = crate::LayerType::from_tag(header.layer_type).unwrap();
        assert!(matches!(
            LayerBody::decode(ty, body).unwrap(),
            LayerBody::Quantize(_)
        ));

        let (_, header, body) = ctx.next_layer().unwrap();
        let ty = crate::LayerType::from_tag(header.layer_type).unwrap();
        assert!(matches!(
            LayerBody::decode(ty, body).unwrap(),
            LayerBody::Requantize(_)
        ));

        let (_, header, body) = ctx.next_layer().unwrap();
        let ty = crate::LayerType::from_tag(header.layer_type).unwrap();
        assert!(matches!(
            LayerBody::decode(ty, body).unwrap(),
            LayerBody::Softmax(_)
        ));
    }

    #[test]
    fn test_conv_blobs_resolve() {
        let weights = vec![0xAB; 37];
        let bn = vec![0xCD; 16];
        let act = vec![0xEF; 8];
        let model = ModelBuilder::new()
            .main_mem_usage(64)
            .conv([0u8; 96], weights.clone(), bn.clone(), act.clone(), Some(0))
            .build();
        let mut container = ModelContainer::load(&model).unwrap();
        let mut ctx = container.bind();

        let (_, header, body) = ctx.next_layer().unwrap();
        let ty = crate::LayerType::from_tag(header.layer_type).unwrap();
        let LayerBody::Conv(args) = LayerBody::decode(ty, body).unwrap() else {
            panic!("expected conv");
        };
        assert!(args.main_mem_out());
        assert_eq!(args.layer_offset % 8, 0);
        assert_eq!(args.weights_offset % 8, 0);
        let m = ctx.model_bytes();
        assert_eq!(
            &m[args.weights_offset as usize..args.weights_offset as usize + 37],
            &weights[..]
        );
        assert_eq!(&m[args.bn_offset as usize..args.bn_offset as usize + 16], &bn[..]);
        assert_eq!(&m[args.act_offset as usize..args.act_offset as usize + 8], &act[..]);
    }
}
