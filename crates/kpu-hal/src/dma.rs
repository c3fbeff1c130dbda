// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The DMA engine interface the driver consumes.
//!
//! The platform owns the DMA controller; the engine only ever holds one
//! channel per inference, acquired at `run` entry and released when the
//! inference finishes.

use crate::{Completion, HalError};
use std::sync::Arc;

/// An allocated DMA channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DmaChannel(pub usize);

/// One asynchronous transfer description.
///
/// Addresses are bus addresses. A non-incrementing endpoint is a peripheral
/// FIFO; an incrementing endpoint is ordinary memory.
#[derive(Debug, Clone, Copy)]
pub struct Transfer {
    pub src: usize,
    pub dest: usize,
    pub src_inc: bool,
    pub dest_inc: bool,
    /// Bytes moved per beat.
    pub beat_bytes: usize,
    /// Number of beats in the transfer.
    pub beats: usize,
    /// Beats per burst.
    pub burst: usize,
}

impl Transfer {
    pub fn len_bytes(&self) -> usize {
        self.beat_bytes * self.beats
    }
}

/// Platform DMA controller facade.
pub trait DmaEngine: Send {
    /// Claims a free channel.
    fn open_free(&mut self) -> Result<DmaChannel, HalError>;

    /// Routes a peripheral handshake request to the channel.
    fn set_request_source(&mut self, channel: DmaChannel, request: u32);

    /// Starts an asynchronous transfer; `done` is given exactly once when
    /// the transfer completes.
    fn transmit_async(&mut self, channel: DmaChannel, transfer: Transfer, done: Arc<Completion>);

    /// Returns a channel to the free pool.
    fn release(&mut self, channel: DmaChannel);
}
