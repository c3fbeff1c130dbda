// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Normalisation kernels: L2 normalisation and softmax.

use crate::KernelError;

/// Floor applied to the squared-sum before the reciprocal square root.
///
/// Keeps the all-zero input well defined: the scale becomes `1/√ε` and the
/// output stays all zero instead of NaN.
const L2_EPSILON: f32 = 1e-10;

/// L2 normalisation across the whole slice:
/// `dest[i] = src[i] / max(√(Σ src²), √ε)`.
pub fn l2_normalize(src: &[f32], dest: &mut [f32]) -> Result<(), KernelError> {
    if src.len() != dest.len() {
        return Err(KernelError::LengthMismatch {
            op: "l2_normalize",
            expected: dest.len(),
            actual: src.len(),
        });
    }

    let mut sum = 0.0f32;
    for &s in src {
        sum += s * s;
    }
    if sum < L2_EPSILON {
        sum = L2_EPSILON;
    }
    let scale = 1.0 / sum.sqrt();

    for (d, &s) in dest.iter_mut().zip(src) {
        *d = s * scale;
    }
    Ok(())
}

/// Numerically stable softmax: subtract the maximum, exponentiate,
/// normalise by the sum.
///
/// The running maximum is seeded with the first element, so all-negative
/// inputs normalise correctly.
pub fn softmax(src: &[f32], dest: &mut [f32]) -> Result<(), KernelError> {
    if src.len() != dest.len() {
        return Err(KernelError::LengthMismatch {
            op: "softmax",
            expected: dest.len(),
            actual: src.len(),
        });
    }
    if src.is_empty() {
        return Ok(());
    }

    let mut max = src[0];
    for &s in &src[1..] {
        max = max.max(s);
    }

    let mut sum = 0.0f32;
    for (d, &s) in dest.iter_mut().zip(src) {
        let value = (s - max).exp();
        sum += value;
        *d = value;
    }

    for d in dest.iter_mut() {
        *d /= sum;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn norm(v: &[f32]) -> f32 {
        v.iter().map(|x| x * x).sum::<f32>().sqrt()
    }

    #[test]
    fn test_l2_unit_norm() {
        let src = [3.0f32, 4.0];
        let mut out = [0.0f32; 2];
        l2_normalize(&src, &mut out).unwrap();
        assert!((out[0] - 0.6).abs() < 1e-6);
        assert!((out[1] - 0.8).abs() < 1e-6);
        assert!((norm(&out) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_l2_all_zero_stays_zero() {
        let src = [0.0f32; 8];
        let mut out = [1.0f32; 8];
        l2_normalize(&src, &mut out).unwrap();
        assert_eq!(out, [0.0; 8]);
    }

    #[test]
    fn test_l2_tiny_input_is_floored() {
        // Squared sum under the floor: the scale is 1/√ε, not 1/norm.
        let src = [1e-8f32];
        let mut out = [0.0f32; 1];
        l2_normalize(&src, &mut out).unwrap();
        let expected = 1e-8f32 / 1e-10f32.sqrt();
        assert!((out[0] - expected).abs() < 1e-9);
    }

    #[test]
    fn test_softmax_sums_to_one() {
        let src = [1.0f32, 2.0, 3.0, 4.0];
        let mut out = [0.0f32; 4];
        softmax(&src, &mut out).unwrap();
        let sum: f32 = out.iter().sum();
        assert!((sum - 1.0).abs() < 1e-5);
        assert!(out.iter().all(|&x| x >= 0.0));
    }

    #[test]
    fn test_softmax_large_logits() {
        // Values that overflow exp() without the max-subtraction trick.
        let src = [1000.0f32, 1001.0, 1002.0];
        let mut out = [0.0f32; 3];
        softmax(&src, &mut out).unwrap();
        assert!((out[0] - 0.0900).abs() < 1e-3);
        assert!((out[1] - 0.2447).abs() < 1e-3);
        assert!((out[2] - 0.6652).abs() < 1e-3);
    }

    #[test]
    fn test_softmax_all_negative() {
        let src = [-5.0f32, -6.0, -7.0];
        let mut out = [0.0f32; 3];
        softmax(&src, &mut out).unwrap();
        let sum: f32 = out.iter().sum();
        assert!((sum - 1.0).abs() < 1e-5);
        assert!(out[0] > out[1] && out[1] > out[2]);
    }

    #[test]
    fn test_softmax_empty() {
        let src: [f32; 0] = [];
        let mut out: [f32; 0] = [];
        softmax(&src, &mut out).unwrap();
    }
}
