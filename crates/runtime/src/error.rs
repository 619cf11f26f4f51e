//! Runtime errors

use thiserror::Error;

use crate::types::{StepStatus, UnitId, ValueRef};
use crate::unit::UnitError;

/// Runtime result type
pub type Result<T> = std::result::Result<T, Error>;

/// Runtime errors
///
/// Every variant is fatal for the run that raised it. Configuration errors
/// are reported before any unit is touched.
#[derive(Debug, Error)]
pub enum Error {
    #[error("duplicate unit in scenario: {0}")]
    DuplicateUnit(UnitId),

    #[error("{context} refers to unit {unit}, which is not part of the scenario")]
    UnknownUnit { unit: UnitId, context: String },

    #[error("no handle registered for unit {0}")]
    MissingHandle(UnitId),

    #[error("output {unit}.{vref} is claimed by more than one output connection")]
    DuplicateOutput { unit: UnitId, vref: ValueRef },

    #[error("scenario needs a stop time or a stop condition")]
    NoTermination,

    #[error("invalid timing: {0}")]
    InvalidTiming(String),

    #[error("{context}: {left} refs paired with {right} entries")]
    RefArity {
        context: String,
        left: usize,
        right: usize,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("unit {unit} failed to step at t={time} (status {status:?})")]
    StepFailed {
        unit: UnitId,
        time: f64,
        status: StepStatus,
    },

    #[error("cannot provision unit from {origin}: {reason}")]
    Provision { origin: String, reason: String },

    #[error("unsupported: {feature}")]
    Unsupported { feature: String },

    #[error("unit {unit}: {source}")]
    Unit {
        unit: UnitId,
        #[source]
        source: UnitError,
    },
}

impl Error {
    /// Wrap a unit-level failure with the unit it came from.
    pub fn unit(unit: &UnitId, source: UnitError) -> Self {
        Error::Unit {
            unit: unit.clone(),
            source,
        }
    }

    /// True for errors raised while checking a scenario, before any unit interaction.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Error::DuplicateUnit(_)
                | Error::UnknownUnit { .. }
                | Error::MissingHandle(_)
                | Error::DuplicateOutput { .. }
                | Error::NoTermination
                | Error::InvalidTiming(_)
                | Error::RefArity { .. }
                | Error::InvalidConfig(_)
        )
    }
}
