//! Core runtime types
//!
//! Identifiers, signal descriptors and timing parameters shared by the
//! scenario model, the results store and the engine.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Run-unique name of a unit.
///
/// This is the unit's identity: two handles are the same unit iff their ids
/// are equal. Results are indexed by it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnitId(pub String);

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for UnitId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for UnitId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Variable reference, meaningful only inside one unit's addressing space.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ValueRef(pub u32);

impl fmt::Display for ValueRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for ValueRef {
    fn from(v: u32) -> Self {
        Self(v)
    }
}

impl ValueRef {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Value type carried by a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VarType {
    Real,
    Boolean,
}

/// How a recorded signal is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SignalKind {
    #[default]
    Continuous,
    /// Piecewise-constant; transitions are additionally recorded as modes
    Discontinuous,
}

/// Status returned by a unit's step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StepStatus {
    Ok,
    Error,
    Fatal,
}

impl StepStatus {
    pub fn is_ok(self) -> bool {
        matches!(self, StepStatus::Ok)
    }
}

/// Default macro step size
pub const DEFAULT_STEP_SIZE: f64 = 1e-3;

/// Default interval between recorded samples
pub const DEFAULT_SAMPLING_INTERVAL: f64 = 1e-2;

/// Default quantization tolerance for discontinuous outputs
pub const DEFAULT_QUANTIZATION_TOLERANCE: f64 = 1e-3;

/// Timing parameters of a run
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timing {
    /// Macro step size
    pub step_size: f64,
    /// Fixed stop time. `None` means a stop condition decides.
    pub stop_time: Option<f64>,
    /// Simulated time between recorded samples
    pub sampling_interval: f64,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            step_size: DEFAULT_STEP_SIZE,
            stop_time: None,
            sampling_interval: DEFAULT_SAMPLING_INTERVAL,
        }
    }
}

impl Timing {
    /// Number of macro steps between two samples.
    ///
    /// `floor(sampling_interval / step_size)`, where a ratio that is an
    /// integer up to rounding noise counts as that integer. Never below one.
    pub fn steps_per_sample(&self) -> u64 {
        let ratio = self.sampling_interval / self.step_size;
        let nearest = ratio.round();
        let steps = if is_close(ratio, nearest, 1e-9, 1e-9) {
            nearest
        } else {
            ratio.floor()
        };
        (steps as u64).max(1)
    }

    /// Tolerance used for the stop tests, relative to the step size.
    pub fn boundary_tolerance(&self) -> f64 {
        self.step_size * 1e-3
    }
}

/// Combined relative and absolute closeness: `|a - b| <= atol + rtol * |b|`.
pub fn is_close(a: f64, b: f64, rtol: f64, atol: f64) -> bool {
    (a - b).abs() <= atol + rtol * b.abs()
}
