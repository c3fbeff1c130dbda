// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # runtime
//!
//! The execution driver that runs a kmodel end-to-end on one KPU device.
//!
//! One inference is a walk over the model's layer stream. Convolutions go
//! to the accelerator: the driver programs the register-file FIFO and
//! suspends on a completion semaphore until the interrupt handler (or the
//! output DMA) signals. Everything else runs synchronously on the CPU via
//! `kpu-kernels`. A per-device mutex serialises inferences; the DMA channel
//! is claimed at `run` entry and returned on every exit path.
//!
//! ```text
//! Idle ──run()──▶ Priming ──▶ AwaitingIrq ◀──────────┐
//!                    │             │ semaphore        │ conv issued
//!                    │ CPU input   ▼                  │
//!                    └────────▶ Stepping ─────────────┘
//!                                  │ last layer done
//!                                  ▼
//!                                Done ──▶ Idle
//! ```

mod config;
mod driver;
mod error;
mod summary;

pub use config::{InterruptPolicy, RuntimeConfig};
pub use driver::KpuDriver;
pub use error::RuntimeError;
pub use summary::{InferenceSummary, LayerProfile};
