// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for the hardware abstraction layer.

/// Errors that can occur while driving the accelerator or its platform
/// services.
#[derive(Debug, thiserror::Error)]
pub enum HalError {
    /// Every DMA channel is already claimed.
    #[error("no free DMA channel")]
    DmaExhausted,

    /// A DMA endpoint or staging window does not fit the I/O RAM.
    #[error("transfer of {len} bytes at I/O RAM offset {offset} exceeds {capacity} bytes")]
    IoRamRange {
        offset: usize,
        len: usize,
        capacity: usize,
    },

    /// The staged source tensor is smaller than the layer demands.
    #[error("staging source has {actual} bytes, layer needs {expected}")]
    SourceTooShort { expected: usize, actual: usize },
}
