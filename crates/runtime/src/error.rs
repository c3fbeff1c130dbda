// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for the execution driver.

/// Errors surfaced by [`KpuDriver`](crate::KpuDriver) operations.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// The artifact is malformed or addresses memory it does not have.
    #[error("model error: {0}")]
    Model(#[from] kmodel::ModelError),

    /// A platform service failed (DMA exhaustion, staging bounds).
    #[error("hardware error: {0}")]
    Hal(#[from] kpu_hal::HalError),

    /// A CPU kernel rejected its inputs.
    #[error("kernel error: {0}")]
    Kernel(#[from] kpu_kernels::KernelError),

    /// A runnable model must start with a convolution so the input tensor
    /// has somewhere to be staged.
    #[error("first layer is {kind}, expected a convolution")]
    FirstLayerNotConv { kind: &'static str },

    /// Configuration could not be parsed.
    #[error("configuration error: {0}")]
    Config(String),
}
