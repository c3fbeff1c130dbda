// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Pooling kernels.

use crate::{KernelError, Shape};

/// Window geometry for a pooling layer.
#[derive(Debug, Clone, Copy)]
pub struct PoolGeometry {
    pub kernel_width: u32,
    pub kernel_height: u32,
    pub stride_width: u32,
    pub stride_height: u32,
    pub padding_width: u32,
    pub padding_height: u32,
}

/// Global average pool: each output channel is the mean of `kernel_size`
/// consecutive input elements.
pub fn global_average_pool2d(
    src: &[f32],
    dest: &mut [f32],
    kernel_size: usize,
) -> Result<(), KernelError> {
    if src.len() != dest.len() * kernel_size {
        return Err(KernelError::LengthMismatch {
            op: "global_average_pool2d",
            expected: dest.len() * kernel_size,
            actual: src.len(),
        });
    }

    for (d, plane) in dest.iter_mut().zip(src.chunks_exact(kernel_size)) {
        let mut sum = 0.0f32;
        for &s in plane {
            sum += s;
        }
        *d = sum / kernel_size as f32;
    }
    Ok(())
}

/// Quantized max pool over planar `u8` tensors.
///
/// The window is clipped against the input bounds after applying the padding
/// origin, so border windows shrink instead of reading out of range. The
/// running maximum starts at 0: inputs are unsigned and zero is their
/// minimum, so an entirely clipped window yields 0.
pub fn quantized_max_pool2d(
    src: &[u8],
    dest: &mut [u8],
    in_shape: Shape,
    out_shape: Shape,
    geo: PoolGeometry,
) -> Result<(), KernelError> {
    if src.len() != in_shape.num_elements() {
        return Err(KernelError::ShapeMismatch {
            op: "quantized_max_pool2d",
            shape: in_shape,
            len: src.len(),
        });
    }
    if dest.len() != out_shape.num_elements() {
        return Err(KernelError::ShapeMismatch {
            op: "quantized_max_pool2d",
            shape: out_shape,
            len: dest.len(),
        });
    }

    let in_w = in_shape.width as i32;
    let in_h = in_shape.height as i32;
    let mut dest_iter = dest.iter_mut();

    for oc in 0..out_shape.channels {
        let channel_src = &src[in_shape.plane_elements() * oc as usize..];
        for out_y in 0..out_shape.height {
            for out_x in 0..out_shape.width {
                let in_x_origin = (out_x * geo.stride_width) as i32 - geo.padding_width as i32;
                let in_y_origin = (out_y * geo.stride_height) as i32 - geo.padding_height as i32;
                let kx_start = 0.max(-in_x_origin);
                let kx_end = (geo.kernel_width as i32).min(in_w - in_x_origin);
                let ky_start = 0.max(-in_y_origin);
                let ky_end = (geo.kernel_height as i32).min(in_h - in_y_origin);

                let mut value = 0u8;
                for ky in ky_start..ky_end {
                    for kx in kx_start..kx_end {
                        let in_x = in_x_origin + kx;
                        let in_y = in_y_origin + ky;
                        value = value.max(channel_src[(in_y * in_w + in_x) as usize]);
                    }
                }

                *dest_iter.next().expect("dest sized to out_shape") = value;
            }
        }
    }
    Ok(())
}
