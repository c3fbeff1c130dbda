// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # kmodel
//!
//! The pre-compiled model container consumed by the KPU inference engine.
//!
//! A kmodel is a single contiguous byte buffer emitted by the model
//! compiler: a fixed little-endian header, a table of output descriptors,
//! a table of layer headers, and a packed stream of per-layer argument
//! records. Weights, batch-norm parameters and activation tables live in
//! the same buffer and are referenced by offset — nothing is copied to the
//! heap at load time except the scratch arena the layers compute in.
//!
//! - [`ModelHeader`] / [`OutputDescriptor`] / [`LayerHeader`] — the fixed
//!   on-disk tables.
//! - [`LayerType`] / [`LayerBody`] — the closed set of layer kinds and
//!   their decoded argument records.
//! - [`ModelContainer`] — owns the scratch arena, borrows the model
//!   buffer, and hands out [`ExecutionContext`]s to the driver.
//! - [`Arena`] — checked, typed access into the scratch buffer.
//! - [`builder::ModelBuilder`] — fabricates valid kmodels for tests and
//!   benchmarks without the external compiler.

pub mod builder;

mod arena;
mod container;
mod error;
mod header;
mod layer;

pub use arena::Arena;
pub use container::{ExecutionContext, ModelContainer};
pub use error::ModelError;
pub use header::{LayerHeader, ModelHeader, OutputDescriptor, HEADER_BYTES, SUPPORTED_ARCH,
    SUPPORTED_VERSION};
pub use layer::{
    AddArgs, AddPaddingArgs, ConcatArgs, ConvArgs, DequantizeArgs, GlobalAveragePool2dArgs,
    LayerBody, LayerType, MemoryRange, QuantizeArgs, QuantizedAddArgs, QuantizedMaxPool2dArgs,
    RemovePaddingArgs, RequantizeArgs, SoftmaxArgs, UploadArgs,
};
