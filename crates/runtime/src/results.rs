//! Results store
//!
//! Accumulates recorded samples. Continuous signals line up index-for-index
//! with `timestamps`; modes only keep transitions and do not.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::scenario::Connection;
use crate::types::{SignalKind, UnitId, ValueRef, is_close};

/// Per-unit, per-ref value sequences
pub type SignalMap = IndexMap<UnitId, IndexMap<ValueRef, Vec<f64>>>;

/// Recorded outputs of one run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Results {
    /// Simulation time of every sample
    pub timestamps: Vec<f64>,
    /// Sampled values, aligned with `timestamps`
    pub signals: SignalMap,
    /// Mode transitions of discontinuous outputs
    pub modes: SignalMap,
}

impl Results {
    /// Empty results shaped after the output declarations.
    pub fn for_outputs(outputs: &[Connection]) -> Self {
        let mut results = Self::default();
        for output in outputs {
            let signals = results.signals.entry(output.source.clone()).or_default();
            for &vref in &output.source_refs {
                signals.entry(vref).or_default();
            }
            if output.signal_kind == SignalKind::Discontinuous {
                let modes = results.modes.entry(output.source.clone()).or_default();
                for &vref in &output.source_refs {
                    modes.entry(vref).or_default();
                }
            }
        }
        results
    }

    /// Number of samples taken
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    pub fn signal(&self, unit: &UnitId, vref: ValueRef) -> Option<&[f64]> {
        self.signals
            .get(unit)
            .and_then(|refs| refs.get(&vref))
            .map(Vec::as_slice)
    }

    pub fn modes(&self, unit: &UnitId, vref: ValueRef) -> Option<&[f64]> {
        self.modes
            .get(unit)
            .and_then(|refs| refs.get(&vref))
            .map(Vec::as_slice)
    }

    /// Last sampled value of a signal
    pub fn last(&self, unit: &UnitId, vref: ValueRef) -> Option<f64> {
        self.signal(unit, vref).and_then(|values| values.last().copied())
    }

    pub(crate) fn push_timestamp(&mut self, time: f64) {
        self.timestamps.push(time);
    }

    /// Append one sample of `output`'s values, updating its modes if discontinuous.
    pub(crate) fn record(&mut self, output: &Connection, values: &[f64]) {
        if let Some(signals) = self.signals.get_mut(&output.source) {
            for (vref, &value) in output.source_refs.iter().zip(values) {
                if let Some(signal) = signals.get_mut(vref) {
                    signal.push(value);
                }
            }
        }

        if output.signal_kind != SignalKind::Discontinuous {
            return;
        }
        let tol = output.quantization_tolerance;
        if let Some(modes) = self.modes.get_mut(&output.source) {
            for (vref, &value) in output.source_refs.iter().zip(values) {
                let Some(sequence) = modes.get_mut(vref) else {
                    continue;
                };
                match sequence.last() {
                    Some(&last) if is_close(value, last, tol, tol) => {}
                    _ => sequence.push(value),
                }
            }
        }
    }
}
