// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Layer type tags and per-layer argument records.
//!
//! Each layer's arguments are a packed little-endian record in the body
//! stream; the record layout depends only on the type tag. Tag values are
//! fixed by the toolchain ABI and must not be renumbered.

use crate::ModelError;
use kpu_kernels::{QuantAffine, QuantParam, Shape};

/// Conv-layer flag: the result is streamed by DMA into the scratch arena
/// instead of staying in I/O RAM for the next hardware layer.
pub const CONV_FLAG_MAIN_MEM_OUT: u32 = 1;

/// The closed set of layer kinds a kmodel may contain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum LayerType {
    Add = 1,
    QuantizedAdd = 2,
    GlobalAveragePool2d = 5,
    QuantizedMaxPool2d = 8,
    Quantize = 11,
    Dequantize = 12,
    Requantize = 13,
    L2Normalization = 14,
    Softmax = 15,
    Concat = 16,
    QuantizedConcat = 17,
    Conv = 10240,
    AddPadding = 10241,
    RemovePadding = 10242,
    Upload = 10243,
}

impl LayerType {
    /// Decodes a raw tag, rejecting anything outside the closed set.
    pub fn from_tag(tag: u32) -> Result<Self, ModelError> {
        Ok(match tag {
            1 => Self::Add,
            2 => Self::QuantizedAdd,
            5 => Self::GlobalAveragePool2d,
            8 => Self::QuantizedMaxPool2d,
            11 => Self::Quantize,
            12 => Self::Dequantize,
            13 => Self::Requantize,
            14 => Self::L2Normalization,
            15 => Self::Softmax,
            16 => Self::Concat,
            17 => Self::QuantizedConcat,
            10240 => Self::Conv,
            10241 => Self::AddPadding,
            10242 => Self::RemovePadding,
            10243 => Self::Upload,
            other => return Err(ModelError::UnknownLayerType(other)),
        })
    }

    /// Whether this layer executes on the accelerator.
    pub fn is_conv(self) -> bool {
        self == Self::Conv
    }

    /// Short human-readable label, used in logs and the CLI.
    pub fn name(self) -> &'static str {
        match self {
            Self::Add => "Add",
            Self::QuantizedAdd => "QuantAdd",
            Self::GlobalAveragePool2d => "GAP",
            Self::QuantizedMaxPool2d => "QuantMaxPool2d",
            Self::Quantize => "Quantize",
            Self::Dequantize => "Dequantize",
            Self::Requantize => "Requantize",
            Self::L2Normalization => "L2Norm",
            Self::Softmax => "Softmax",
            Self::Concat => "Concat",
            Self::QuantizedConcat => "QuantConcat",
            Self::Conv => "K210Conv",
            Self::AddPadding => "K210AddPad",
            Self::RemovePadding => "K210RemovePad",
            Self::Upload => "K210Upload",
        }
    }
}

impl std::fmt::Display for LayerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// ── Argument records ───────────────────────────────────────────

/// A `(start, size)` byte range in the scratch arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryRange {
    pub start: u32,
    pub size: u32,
}

/// Float elementwise add.
#[derive(Debug, Clone, Copy)]
pub struct AddArgs {
    pub input_a: u32,
    pub input_b: u32,
    pub output: u32,
    pub count: u32,
}

/// Quantized elementwise add.
#[derive(Debug, Clone, Copy)]
pub struct QuantizedAddArgs {
    pub input_a: u32,
    pub input_b: u32,
    pub output: u32,
    pub count: u32,
    pub quant_a: QuantAffine,
    pub quant_b: QuantAffine,
    pub quant_out: QuantAffine,
}

/// Global average pool.
#[derive(Debug, Clone, Copy)]
pub struct GlobalAveragePool2dArgs {
    pub input: u32,
    pub output: u32,
    pub kernel_size: u32,
    pub channels: u32,
}

/// Quantized max pool.
#[derive(Debug, Clone, Copy)]
pub struct QuantizedMaxPool2dArgs {
    pub input: u32,
    pub output: u32,
    pub in_shape: Shape,
    pub out_shape: Shape,
    pub kernel_width: u32,
    pub kernel_height: u32,
    pub stride_width: u32,
    pub stride_height: u32,
    pub padding_width: u32,
    pub padding_height: u32,
}

/// Float → byte quantization boundary.
#[derive(Debug, Clone, Copy)]
pub struct QuantizeArgs {
    pub input: u32,
    pub output: u32,
    pub count: u32,
    pub quant: QuantParam,
}

/// Byte → float dequantization boundary.
#[derive(Debug, Clone, Copy)]
pub struct DequantizeArgs {
    pub input: u32,
    pub output: u32,
    pub count: u32,
    pub quant: QuantParam,
}

/// Table-driven byte requantization. The 256-entry table is embedded in
/// the record and borrowed straight from the model buffer.
#[derive(Debug, Clone, Copy)]
pub struct RequantizeArgs<'m> {
    pub input: u32,
    pub output: u32,
    pub count: u32,
    pub table: &'m [u8; 256],
}

/// L2 normalisation / softmax over a channel vector (both carry the same
/// record).
#[derive(Debug, Clone, Copy)]
pub struct SoftmaxArgs {
    pub input: u32,
    pub output: u32,
    pub channels: u32,
}

/// Concatenation of scratch regions, in record order.
#[derive(Debug, Clone)]
pub struct ConcatArgs {
    pub output: u32,
    pub inputs: Vec<MemoryRange>,
}

/// A hardware convolution layer. All offsets point into the model buffer
/// except `output`, which is a scratch offset used when
/// [`main_mem_out`](Self::main_mem_out) is set.
#[derive(Debug, Clone, Copy)]
pub struct ConvArgs {
    pub flags: u32,
    pub output: u32,
    /// Offset of the 96-byte hardware layer argument.
    pub layer_offset: u32,
    pub weights_offset: u32,
    pub bn_offset: u32,
    pub act_offset: u32,
}

impl ConvArgs {
    pub fn main_mem_out(&self) -> bool {
        self.flags & CONV_FLAG_MAIN_MEM_OUT != 0
    }
}

/// Broadcast of per-channel bytes into the padded I/O RAM layout.
#[derive(Debug, Clone, Copy)]
pub struct AddPaddingArgs {
    pub input: u32,
    /// Destination I/O RAM address in 64-byte units.
    pub kpu_output: u32,
    pub channels: u32,
}

/// Gather of per-channel bytes back out of the padded layout.
#[derive(Debug, Clone, Copy)]
pub struct RemovePaddingArgs {
    pub input: u32,
    pub output: u32,
    pub channels: u32,
}

/// Full tensor staging from scratch into I/O RAM.
#[derive(Debug, Clone, Copy)]
pub struct UploadArgs {
    pub input: u32,
    /// Destination I/O RAM address in 64-byte units.
    pub kpu_output: u32,
    pub shape: Shape,
}

/// A decoded layer body.
#[derive(Debug, Clone)]
pub enum LayerBody<'m> {
    Add(AddArgs),
    QuantizedAdd(QuantizedAddArgs),
    GlobalAveragePool2d(GlobalAveragePool2dArgs),
    QuantizedMaxPool2d(QuantizedMaxPool2dArgs),
    Quantize(QuantizeArgs),
    Dequantize(DequantizeArgs),
    Requantize(RequantizeArgs<'m>),
    L2Normalization(SoftmaxArgs),
    Softmax(SoftmaxArgs),
    Concat(ConcatArgs),
    Conv(ConvArgs),
    AddPadding(AddPaddingArgs),
    RemovePadding(RemovePaddingArgs),
    Upload(UploadArgs),
}

impl<'m> LayerBody<'m> {
    /// Decodes the argument record for `layer_type` from `body`.
    pub fn decode(layer_type: LayerType, body: &'m [u8]) -> Result<Self, ModelError> {
        let mut r = Reader::new(body, layer_type.name());
        let out = match layer_type {
            LayerType::Add => {
                let _flags = r.u32()?;
                Self::Add(AddArgs {
                    input_a: r.u32()?,
                    input_b: r.u32()?,
                    output: r.u32()?,
                    count: r.u32()?,
                })
            }
            LayerType::QuantizedAdd => {
                let _flags = r.u32()?;
                let (input_a, input_b, output, count) = (r.u32()?, r.u32()?, r.u32()?, r.u32()?);
                Self::QuantizedAdd(QuantizedAddArgs {
                    input_a,
                    input_b,
                    output,
                    count,
                    quant_a: r.quant_affine()?,
                    quant_b: r.quant_affine()?,
                    quant_out: r.quant_affine()?,
                })
            }
            LayerType::GlobalAveragePool2d => {
                let _flags = r.u32()?;
                Self::GlobalAveragePool2d(GlobalAveragePool2dArgs {
                    input: r.u32()?,
                    output: r.u32()?,
                    kernel_size: r.u32()?,
                    channels: r.u32()?,
                })
            }
            LayerType::QuantizedMaxPool2d => {
                let _flags = r.u32()?;
                Self::QuantizedMaxPool2d(QuantizedMaxPool2dArgs {
                    input: r.u32()?,
                    output: r.u32()?,
                    in_shape: r.shape()?,
                    out_shape: r.shape()?,
                    kernel_width: r.u32()?,
                    kernel_height: r.u32()?,
                    stride_width: r.u32()?,
                    stride_height: r.u32()?,
                    padding_width: r.u32()?,
                    padding_height: r.u32()?,
                })
            }
            LayerType::Quantize => {
                let _flags = r.u32()?;
                Self::Quantize(QuantizeArgs {
                    input: r.u32()?,
                    output: r.u32()?,
                    count: r.u32()?,
                    quant: r.quant_param()?,
                })
            }
            LayerType::Dequantize => {
                let _flags = r.u32()?;
                Self::Dequantize(DequantizeArgs {
                    input: r.u32()?,
                    output: r.u32()?,
                    count: r.u32()?,
                    quant: r.quant_param()?,
                })
            }
            LayerType::Requantize => {
                let _flags = r.u32()?;
                let (input, output, count) = (r.u32()?, r.u32()?, r.u32()?);
                let table: &[u8; 256] = r
                    .take(256)?
                    .try_into()
                    .expect("take(256) returns 256 bytes");
                Self::Requantize(RequantizeArgs {
                    input,
                    output,
                    count,
                    table,
                })
            }
            LayerType::L2Normalization => {
                let _flags = r.u32()?;
                Self::L2Normalization(SoftmaxArgs {
                    input: r.u32()?,
                    output: r.u32()?,
                    channels: r.u32()?,
                })
            }
            LayerType::Softmax => {
                let _flags = r.u32()?;
                Self::Softmax(SoftmaxArgs {
                    input: r.u32()?,
                    output: r.u32()?,
                    channels: r.u32()?,
                })
            }
            LayerType::Concat | LayerType::QuantizedConcat => {
                let _flags = r.u32()?;
                let output = r.u32()?;
                let input_count = r.u32()?;
                let mut inputs = Vec::with_capacity(input_count as usize);
                for _ in 0..input_count {
                    inputs.push(MemoryRange {
                        start: r.u32()?,
                        size: r.u32()?,
                    });
                }
                Self::Concat(ConcatArgs { output, inputs })
            }
            LayerType::Conv => Self::Conv(ConvArgs {
                flags: r.u32()?,
                output: r.u32()?,
                layer_offset: r.u32()?,
                weights_offset: r.u32()?,
                bn_offset: r.u32()?,
                act_offset: r.u32()?,
            }),
            LayerType::AddPadding => {
                let _flags = r.u32()?;
                Self::AddPadding(AddPaddingArgs {
                    input: r.u32()?,
                    kpu_output: r.u32()?,
                    channels: r.u32()?,
                })
            }
            LayerType::RemovePadding => {
                let _flags = r.u32()?;
                Self::RemovePadding(RemovePaddingArgs {
                    input: r.u32()?,
                    output: r.u32()?,
                    channels: r.u32()?,
                })
            }
            LayerType::Upload => {
                let _flags = r.u32()?;
                Self::Upload(UploadArgs {
                    input: r.u32()?,
                    kpu_output: r.u32()?,
                    shape: r.shape()?,
                })
            }
        };
        Ok(out)
    }
}

// ── Record reader ──────────────────────────────────────────────

struct Reader<'m> {
    bytes: &'m [u8],
    pos: usize,
    layer: &'static str,
}

impl<'m> Reader<'m> {
    fn new(bytes: &'m [u8], layer: &'static str) -> Self {
        Self {
            bytes,
            pos: 0,
            layer,
        }
    }

    fn take(&mut self, len: usize) -> Result<&'m [u8], ModelError> {
        let slice = self
            .bytes
            .get(self.pos..self.pos + len)
            .ok_or(ModelError::BodyTooShort {
                layer: self.layer,
                expected: self.pos + len,
                actual: self.bytes.len(),
            })?;
        self.pos += len;
        Ok(slice)
    }

    fn u32(&mut self) -> Result<u32, ModelError> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn i32(&mut self) -> Result<i32, ModelError> {
        Ok(self.u32()? as i32)
    }

    fn f32(&mut self) -> Result<f32, ModelError> {
        Ok(f32::from_bits(self.u32()?))
    }

    fn shape(&mut self) -> Result<Shape, ModelError> {
        Ok(Shape::new(self.u32()?, self.u32()?, self.u32()?))
    }

    fn quant_param(&mut self) -> Result<QuantParam, ModelError> {
        Ok(QuantParam {
            scale: self.f32()?,
            bias: self.f32()?,
        })
    }

    fn quant_affine(&mut self) -> Result<QuantAffine, ModelError> {
        Ok(QuantAffine {
            offset: self.i32()?,
            mul: self.i32()?,
            shift: self.i32()?,
        })
    }
}
