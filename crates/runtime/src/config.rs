// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Driver configuration, TOML-backed.
//!
//! # TOML Format
//! ```toml
//! profile_layers = true
//! interrupt_policy = "layer-cfg-almost-empty"
//! ```

use kpu_hal::regs::InterruptBits;

/// Which KPU interrupt line signals per-layer completion.
///
/// The production policy watches the layer-configuration FIFO running
/// empty, which keeps the accelerator pipelined. The calc-done policy
/// interrupts after each layer's arithmetic finishes; it is slower but is
/// the only way to attribute wall-clock time to individual hardware
/// layers, so the profiler uses it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InterruptPolicy {
    /// Interrupt when the layer-configuration FIFO drains (production).
    LayerCfgAlmostEmpty,
    /// Interrupt when each layer's calculation completes (per-layer
    /// timing).
    CalcDone,
}

impl InterruptPolicy {
    /// The mask to program before a hardware layer that completes by
    /// interrupt: everything suppressed except the policy's line.
    pub fn layer_mask(self) -> InterruptBits {
        match self {
            Self::LayerCfgAlmostEmpty => InterruptBits::all().with_layer_cfg_almost_empty(false),
            Self::CalcDone => InterruptBits::all().with_calc_done(false),
        }
    }

    /// Whether the hardware layer itself must raise the interrupt (the
    /// calc-done line only fires for layers with `int_en` set).
    pub fn needs_layer_int_en(self) -> bool {
        matches!(self, Self::CalcDone)
    }
}

/// Configuration for one driver instance.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RuntimeConfig {
    /// Record per-layer wall-clock timings into the inference summary.
    #[serde(default = "default_true")]
    pub profile_layers: bool,

    /// Completion interrupt policy for hardware layers.
    #[serde(default = "default_policy")]
    pub interrupt_policy: InterruptPolicy,
}

fn default_true() -> bool {
    true
}

fn default_policy() -> InterruptPolicy {
    InterruptPolicy::LayerCfgAlmostEmpty
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            profile_layers: true,
            interrupt_policy: InterruptPolicy::LayerCfgAlmostEmpty,
        }
    }
}

impl RuntimeConfig {
    /// Parses configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, crate::RuntimeError> {
        toml::from_str(toml_str)
            .map_err(|e| crate::RuntimeError::Config(format!("TOML parse error: {e}")))
    }

    /// Serialises configuration to TOML.
    pub fn to_toml(&self) -> Result<String, crate::RuntimeError> {
        toml::to_string_pretty(self)
            .map_err(|e| crate::RuntimeError::Config(format!("TOML serialise error: {e}")))
    }
}
