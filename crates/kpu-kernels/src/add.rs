// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Floating-point elementwise add and the dense reference kernel.

use crate::KernelError;

/// Elementwise `dest[i] = a[i] + b[i]`.
///
/// # Errors
/// Returns [`KernelError::LengthMismatch`] if the three slices disagree
/// on element count.
pub fn add_f32(a: &[f32], b: &[f32], dest: &mut [f32]) -> Result<(), KernelError> {
    if a.len() != dest.len() || b.len() != dest.len() {
        return Err(KernelError::LengthMismatch {
            op: "add_f32",
            expected: dest.len(),
            actual: a.len().min(b.len()),
        });
    }

    for ((d, &x), &y) in dest.iter_mut().zip(a).zip(b) {
        *d = x + y;
    }
    Ok(())
}

/// Dense layer: `dest[oc] = Σ_ic src[ic] * weights[oc*in + ic] + biases[oc]`.
///
/// Weights are row-major, one row of `src.len()` coefficients per output
/// channel.
pub fn fully_connected(
    src: &[f32],
    weights: &[f32],
    biases: &[f32],
    dest: &mut [f32],
) -> Result<(), KernelError> {
    let in_channels = src.len();
    let out_channels = dest.len();
    if biases.len() != out_channels {
        return Err(KernelError::LengthMismatch {
            op: "fully_connected",
            expected: out_channels,
            actual: biases.len(),
        });
    }
    if weights.len() != in_channels * out_channels {
        return Err(KernelError::LengthMismatch {
            op: "fully_connected",
            expected: in_channels * out_channels,
            actual: weights.len(),
        });
    }

    for (oc, d) in dest.iter_mut().enumerate() {
        let row = &weights[oc * in_channels..(oc + 1) * in_channels];
        let mut sum = 0.0f32;
        for (&w, &x) in row.iter().zip(src) {
            sum += w * x;
        }
        *d = sum + biases[oc];
    }
    Ok(())
}
