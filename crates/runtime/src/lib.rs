//! Co-simulation runtime
//!
//! Coordinates independently stepping units that exchange signals at
//! synchronized points in time, and records a time-aligned trace of
//! selected outputs.

pub mod error;
pub mod executor;
pub mod provision;
pub mod results;
pub mod scenario;
pub mod strategy;
pub mod types;
pub mod unit;


pub use error::{Error, Result};
pub use executor::{Coordinator, RunStats, Simulation};
pub use provision::{LoadedUnit, UnitProvider};
pub use results::Results;
pub use scenario::{Connection, RealParameters, Scenario, ScenarioBuilder, Target};
pub use strategy::{IterationConfig, StepContext, StepOutcome, Strategy};
pub use types::*;
pub use unit::{StateSnapshot, Unit, UnitError, UnitSet};
