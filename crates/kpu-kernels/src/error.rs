// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for kernel execution.

/// Errors that can occur while executing a CPU kernel.
#[derive(Debug, thiserror::Error)]
pub enum KernelError {
    /// Input and output slices disagree on element count.
    #[error("{op}: length mismatch (expected {expected}, got {actual})")]
    LengthMismatch {
        op: &'static str,
        expected: usize,
        actual: usize,
    },

    /// A tensor shape is inconsistent with the buffer backing it.
    #[error("{op}: shape {shape} does not fit buffer of {len} elements")]
    ShapeMismatch {
        op: &'static str,
        shape: crate::Shape,
        len: usize,
    },
}
