// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Tensor staging between planar host memory and the KPU's tiled layout.
//!
//! The accelerator stores tensors in 64-byte rows. Narrow images share a
//! row between channels: up to four channels per row when the width fits
//! in 16 bytes, two when it fits in 32. Wider images span
//! `⌈width / 64⌉` rows each. Within a channel, consecutive image rows are
//! `row_length * 64` bytes apart.

use crate::{HalError, IO_RAM_ROW_BYTES};

/// Row-packing parameters chosen from the image width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowLayout {
    /// Byte stride between channels sharing one row.
    pub row_padding: usize,
    /// Channels packed side by side in a row.
    pub row_group: usize,
    /// 64-byte rows per image row.
    pub row_length: usize,
}

impl RowLayout {
    pub fn for_width(width: usize) -> Self {
        if width <= 16 {
            Self {
                row_padding: 16,
                row_group: 4,
                row_length: 1,
            }
        } else if width <= 32 {
            Self {
                row_padding: 32,
                row_group: 2,
                row_length: 1,
            }
        } else {
            Self {
                row_padding: 64,
                row_group: 1,
                row_length: width.div_ceil(IO_RAM_ROW_BYTES),
            }
        }
    }

    /// Byte offset of channel `c`, image row `y` within the staged tensor.
    pub fn row_origin(&self, c: usize, y: usize, height: usize) -> usize {
        (c / self.row_group) * self.row_length * height * IO_RAM_ROW_BYTES
            + (c % self.row_group) * self.row_padding
            + y * self.row_length * IO_RAM_ROW_BYTES
    }

    /// Total bytes the staged tensor occupies in I/O RAM.
    pub fn staged_len(&self, height: usize, channels: usize) -> usize {
        channels.div_ceil(self.row_group) * self.row_length * height * IO_RAM_ROW_BYTES
    }
}

/// Stages a planar `width × height × channels` byte tensor into the tiled
/// layout at `dest` (which starts at the target I/O RAM address).
///
/// An 8-byte-aligned source with a width that is a multiple of 8 is copied
/// in 64-bit units; anything else is copied byte-wise. The two paths write
/// identical destination bytes.
pub fn upload(
    dest: &mut [u8],
    src: &[u8],
    width: usize,
    height: usize,
    channels: usize,
) -> Result<(), HalError> {
    let needed = width * height * channels;
    if src.len() < needed {
        return Err(HalError::SourceTooShort {
            expected: needed,
            actual: src.len(),
        });
    }
    let layout = RowLayout::for_width(width);
    let staged = layout.staged_len(height, channels);
    if dest.len() < staged {
        return Err(HalError::IoRamRange {
            offset: 0,
            len: staged,
            capacity: dest.len(),
        });
    }

    let fast = width % 8 == 0 && src.as_ptr() as usize % 8 == 0;
    let mut src_rows = src.chunks_exact(width);

    for c in 0..channels {
        for y in 0..height {
            let origin = layout.row_origin(c, y, height);
            let dest_row = &mut dest[origin..origin + width];
            let src_row = src_rows.next().expect("source sized above");

            if fast {
                for (d, s) in dest_row
                    .chunks_exact_mut(8)
                    .zip(src_row.chunks_exact(8))
                {
                    d.copy_from_slice(s);
                }
            } else {
                for (d, &s) in dest_row.iter_mut().zip(src_row) {
                    *d = s;
                }
            }
        }
    }
    Ok(())
}

/// Broadcasts one byte per channel into row zero of a height-4, width-1
/// staged tensor (the narrow-image parameter set). This is how per-channel
/// vectors reach the accelerator.
pub fn add_padding(dest: &mut [u8], src: &[u8], channels: usize) -> Result<(), HalError> {
    if src.len() < channels {
        return Err(HalError::SourceTooShort {
            expected: channels,
            actual: src.len(),
        });
    }
    let layout = RowLayout::for_width(1);
    let height = 4;
    let staged = layout.staged_len(height, channels);
    if dest.len() < staged {
        return Err(HalError::IoRamRange {
            offset: 0,
            len: staged,
            capacity: dest.len(),
        });
    }

    for (c, &value) in src.iter().take(channels).enumerate() {
        dest[layout.row_origin(c, 0, height)] = value;
    }
    Ok(())
}

/// Inverse of [`add_padding`] on the host side: gathers one byte per
/// channel at stride 16 back into a packed vector.
pub fn remove_padding(src: &[u8], dest: &mut [u8], channels: usize) -> Result<(), HalError> {
    if dest.len() < channels {
        return Err(HalError::SourceTooShort {
            expected: channels,
            actual: dest.len(),
        });
    }
    if channels > 0 {
        let needed = (channels - 1) * 16 + 1;
        if src.len() < needed {
            return Err(HalError::SourceTooShort {
                expected: needed,
                actual: src.len(),
            });
        }
    }

    for (c, d) in dest.iter_mut().take(channels).enumerate() {
        *d = src[c * 16];
    }
    Ok(())
}
