// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Quantized elementwise kernels.
//!
//! Everything here is bit-exact by contract: the model compiler chose the
//! `(offset, mul, shift)` triples assuming 64-bit signed intermediates and
//! these exact operation orders, so rearranging the arithmetic (even in ways
//! that look algebraically neutral) changes saturation behaviour and breaks
//! parity with the reference toolchain.

use crate::{KernelError, QuantAffine, QuantParam};

fn saturate_u8(value: i64) -> u8 {
    value.clamp(0, 0xFF) as u8
}

/// Quantized elementwise add.
///
/// Two evaluation orders exist depending on whether the input shifts agree:
/// with equal shifts the inputs are summed at full precision and shifted
/// once; with unequal shifts each input is shifted into the common scale
/// first. The branch is chosen once per call, not per element.
pub fn quantized_add(
    a: &[u8],
    b: &[u8],
    dest: &mut [u8],
    qa: QuantAffine,
    qb: QuantAffine,
    qo: QuantAffine,
) -> Result<(), KernelError> {
    if a.len() != dest.len() || b.len() != dest.len() {
        return Err(KernelError::LengthMismatch {
            op: "quantized_add",
            expected: dest.len(),
            actual: a.len().min(b.len()),
        });
    }

    let (off_a, mul_a, sh_a) = (qa.offset as i64, qa.mul as i64, qa.shift as u32);
    let (off_b, mul_b, sh_b) = (qb.offset as i64, qb.mul as i64, qb.shift as u32);
    let (off_o, mul_o, sh_o) = (qo.offset as i64, qo.mul as i64, qo.shift as u32);

    if sh_a == sh_b {
        for ((d, &x), &y) in dest.iter_mut().zip(a).zip(b) {
            let va = (x as i64 + off_a) * mul_a;
            let vb = (y as i64 + off_b) * mul_b;
            let value = (((va + vb) >> sh_a) * mul_o >> sh_o) + off_o;
            *d = saturate_u8(value);
        }
    } else {
        for ((d, &x), &y) in dest.iter_mut().zip(a).zip(b) {
            let va = (x as i64 + off_a) * mul_a >> sh_a;
            let vb = (y as i64 + off_b) * mul_b >> sh_b;
            let value = ((va + vb) * mul_o >> sh_o) + off_o;
            *d = saturate_u8(value);
        }
    }
    Ok(())
}

/// Float → byte quantization: `dest = (src - bias) / scale`, clamped to
/// `[0, 255]`.
pub fn quantize(src: &[f32], dest: &mut [u8], q: QuantParam) -> Result<(), KernelError> {
    if src.len() != dest.len() {
        return Err(KernelError::LengthMismatch {
            op: "quantize",
            expected: dest.len(),
            actual: src.len(),
        });
    }

    let inv_scale = 1.0f32 / q.scale;
    for (d, &s) in dest.iter_mut().zip(src) {
        let value = ((s - q.bias) * inv_scale) as i32;
        *d = value.clamp(0, 0xFF) as u8;
    }
    Ok(())
}

/// Byte → float dequantization: `dest = src * scale + bias`.
pub fn dequantize(src: &[u8], dest: &mut [f32], q: QuantParam) -> Result<(), KernelError> {
    if src.len() != dest.len() {
        return Err(KernelError::LengthMismatch {
            op: "dequantize",
            expected: dest.len(),
            actual: src.len(),
        });
    }

    for (d, &s) in dest.iter_mut().zip(src) {
        *d = s as f32 * q.scale + q.bias;
    }
    Ok(())
}

/// In-place variant of [`requantize`], for layers whose input and output
/// regions coincide.
pub fn requantize_in_place(data: &mut [u8], table: &[u8; 256]) {
    for d in data.iter_mut() {
        *d = table[*d as usize];
    }
}

/// Byte → byte requantization through a 256-entry lookup table.
pub fn requantize(src: &[u8], dest: &mut [u8], table: &[u8; 256]) -> Result<(), KernelError> {
    if src.len() != dest.len() {
        return Err(KernelError::LengthMismatch {
            op: "requantize",
            expected: dest.len(),
            actual: src.len(),
        });
    }

    for (d, &s) in dest.iter_mut().zip(src) {
        *d = table[s as usize];
    }
    Ok(())
}
