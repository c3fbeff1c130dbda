// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Per-inference timing summary.

use std::time::{Duration, Instant};

/// Wall-clock time attributed to one layer. For hardware layers this spans
/// programming, accelerator execution and the interrupt round-trip, which
/// is what end-to-end latency work needs.
#[derive(Debug, Clone, serde::Serialize)]
pub struct LayerProfile {
    pub index: u32,
    pub kind: &'static str,
    pub elapsed: Duration,
}

/// The result of one `run` call.
#[derive(Debug, Clone, serde::Serialize)]
pub struct InferenceSummary {
    /// Total wall-clock time of the run.
    pub total: Duration,
    /// Layers executed.
    pub layers_run: u32,
    /// Per-layer timings; empty unless profiling is enabled.
    pub layers: Vec<LayerProfile>,
}

impl InferenceSummary {
    /// One-line human-readable digest.
    pub fn digest(&self) -> String {
        format!(
            "{} layers in {:.3} ms",
            self.layers_run,
            self.total.as_secs_f64() * 1e3,
        )
    }
}

/// Attributes elapsed time to layers the way the layer loop experiences
/// them: a layer's span runs from its dispatch to the next layer's
/// dispatch (or the end of the run).
pub(crate) struct Profiler {
    enabled: bool,
    started: Instant,
    mark: Instant,
    pending: Option<(u32, &'static str)>,
    layers: Vec<LayerProfile>,
    layers_run: u32,
}

impl Profiler {
    pub fn new(enabled: bool) -> Self {
        let now = Instant::now();
        Self {
            enabled,
            started: now,
            mark: now,
            pending: None,
            layers: Vec::new(),
            layers_run: 0,
        }
    }

    /// Called at each layer dispatch.
    pub fn begin_layer(&mut self, index: u32, kind: &'static str) {
        self.layers_run += 1;
        if !self.enabled {
            return;
        }
        self.flush();
        self.pending = Some((index, kind));
        self.mark = Instant::now();
    }

    fn flush(&mut self) {
        if let Some((index, kind)) = self.pending.take() {
            let elapsed = self.mark.elapsed();
            tracing::debug!(layer = index, kind, ?elapsed, "layer complete");
            self.layers.push(LayerProfile {
                index,
                kind,
                elapsed,
            });
        }
    }

    /// Closes the last layer and produces the summary.
    pub fn finish(mut self) -> InferenceSummary {
        self.flush();
        InferenceSummary {
            total: self.started.elapsed(),
            layers_run: self.layers_run,
            layers: self.layers,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profiler_attributes_all_layers() {
        let mut p = Profiler::new(true);
        p.begin_layer(0, "K210Conv");
        p.begin_layer(1, "Softmax");
        let summary = p.finish();
        assert_eq!(summary.layers_run, 2);
        assert_eq!(summary.layers.len(), 2);
        assert_eq!(summary.layers[0].kind, "K210Conv");
        assert_eq!(summary.layers[1].index, 1);
    }

    #[test]
    fn test_profiler_disabled_counts_only() {
        let mut p = Profiler::new(false);
        p.begin_layer(0, "Add");
        let summary = p.finish();
        assert_eq!(summary.layers_run, 1);
        assert!(summary.layers.is_empty());
    }

    #[test]
    fn test_digest_format() {
        let summary = InferenceSummary {
            total: Duration::from_millis(5),
            layers_run: 3,
            layers: Vec::new(),
        };
        assert!(summary.digest().contains("3 layers"));
    }
}
