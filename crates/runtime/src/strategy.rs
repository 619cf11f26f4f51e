//! Coordination strategies
//!
//! A strategy decides, within one macro step, when data moves between units
//! relative to stepping them:
//!
//! - [`Strategy::Jacobi`]: step everything on held inputs, then propagate.
//!   One macro step of lag on every coupling; units may step in parallel.
//! - [`Strategy::GaussSeidel`]: step units in scenario order, propagating
//!   each unit's outputs right after it steps.
//! - [`Strategy::Iterative`]: Jacobi repeated with state rollback until the
//!   coupled outputs stop moving or the iteration budget runs out.
//!
//! None of them reorders units or connections; the caller's order is the
//! only ordering signal.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

use crate::error::{Error, Result};
use crate::executor::{RunStats, propagate, read_reals, step_unit, unit_mut, write_reals};
use crate::scenario::{Connection, Scenario};
use crate::types::{UnitId, VarType, is_close};
use crate::unit::{StateSnapshot, UnitSet};

/// What a strategy sees during one macro step
pub struct StepContext<'a> {
    pub scenario: &'a Scenario,
    pub units: &'a mut UnitSet,
    /// Time at the start of the step
    pub time: f64,
    pub step_size: f64,
}

/// Result of one macro step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepOutcome {
    /// Inner iterations performed (always 1 for non-iterative strategies)
    pub iterations: u32,
    /// False when the iteration budget ran out first
    pub converged: bool,
}

impl StepOutcome {
    const SINGLE: StepOutcome = StepOutcome {
        iterations: 1,
        converged: true,
    };
}

/// Convergence settings of the iterative strategy
///
/// Deserialization goes through [`IterationConfig::new`], so a loaded
/// config is as valid as a constructed one.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawIterationConfig")]
pub struct IterationConfig {
    /// Inner iterations allowed beyond the first before accepting the step
    pub max_iterations: u32,
    /// Relative and absolute closeness between consecutive iterations
    pub tolerance: f64,
}

impl IterationConfig {
    pub fn new(max_iterations: u32, tolerance: f64) -> Result<Self> {
        if max_iterations == 0 {
            return Err(Error::InvalidConfig(
                "max_iterations must be greater than zero".to_string(),
            ));
        }
        if !(tolerance >= 0.0) {
            return Err(Error::InvalidConfig(format!(
                "tolerance must be non-negative, got {tolerance}"
            )));
        }
        Ok(Self {
            max_iterations,
            tolerance,
        })
    }
}

#[derive(Deserialize)]
struct RawIterationConfig {
    max_iterations: u32,
    tolerance: f64,
}

impl TryFrom<RawIterationConfig> for IterationConfig {
    type Error = Error;

    fn try_from(raw: RawIterationConfig) -> Result<Self> {
        IterationConfig::new(raw.max_iterations, raw.tolerance)
    }
}

impl Default for IterationConfig {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            tolerance: 1e-4,
        }
    }
}

/// Single-step coordination algorithm
#[derive(Debug, Clone, PartialEq)]
pub enum Strategy {
    /// Explicit parallel stepping with deferred propagation
    Jacobi {
        /// Fan unit steps out on the rayon pool
        parallel: bool,
    },
    /// Sequential stepping with immediate propagation
    GaussSeidel,
    /// Jacobi with rollback until convergence
    Iterative(IterationConfig),
}

impl Strategy {
    pub fn jacobi() -> Self {
        Strategy::Jacobi { parallel: true }
    }

    pub fn gauss_seidel() -> Self {
        Strategy::GaussSeidel
    }

    pub fn iterative(max_iterations: u32, tolerance: f64) -> Result<Self> {
        IterationConfig::new(max_iterations, tolerance).map(Strategy::Iterative)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Strategy::Jacobi { .. } => "jacobi",
            Strategy::GaussSeidel => "gauss-seidel",
            Strategy::Iterative(_) => "iterative",
        }
    }

    /// Strategy-specific checks, run with validation before any unit interaction.
    pub fn check(&self, scenario: &Scenario) -> Result<()> {
        if let Strategy::Iterative(_) = self
            && let Some(connection) = scenario
                .couplings()
                .find(|c| c.value_type != VarType::Real)
        {
            return Err(Error::Unsupported {
                feature: format!(
                    "{:?} coupling {connection} in the iterative strategy",
                    connection.value_type
                ),
            });
        }
        Ok(())
    }

    /// Make initial outputs visible to inputs before the first step.
    ///
    /// Every strategy uses a single propagation pass in connection order.
    pub fn propagate_initial(&self, scenario: &Scenario, units: &mut UnitSet) -> Result<()> {
        propagate(units, scenario.connections())
    }

    /// Advance every unit by one macro step.
    pub fn advance(&self, ctx: &mut StepContext<'_>) -> Result<StepOutcome> {
        match self {
            Strategy::Jacobi { parallel } => jacobi_step(ctx, *parallel),
            Strategy::GaussSeidel => gauss_seidel_step(ctx),
            Strategy::Iterative(config) => iterative_step(ctx, config),
        }
    }

    /// Called once after the last macro step.
    pub fn terminate(&self, stats: &RunStats) {
        info!(
            strategy = self.name(),
            macro_steps = stats.macro_steps,
            inner_iterations = stats.inner_iterations,
            "strategy finished"
        );
        if stats.unconverged_steps > 0 {
            warn!(
                strategy = self.name(),
                unconverged_steps = stats.unconverged_steps,
                "some macro steps were accepted without converging"
            );
        }
    }
}

fn step_all(ctx: &mut StepContext<'_>, parallel: bool) -> Result<()> {
    let (time, step_size) = (ctx.time, ctx.step_size);
    let handles = ctx.units.handles_mut(ctx.scenario.units());
    let results: Vec<Result<()>> = if parallel {
        handles
            .into_par_iter()
            .map(|(id, unit)| step_unit(id, unit.as_mut(), time, step_size))
            .collect()
    } else {
        handles
            .into_iter()
            .map(|(id, unit)| step_unit(id, unit.as_mut(), time, step_size))
            .collect()
    };
    // first failure in scenario order wins
    results.into_iter().collect()
}

fn jacobi_step(ctx: &mut StepContext<'_>, parallel: bool) -> Result<StepOutcome> {
    step_all(ctx, parallel)?;
    propagate(ctx.units, ctx.scenario.connections())?;
    Ok(StepOutcome::SINGLE)
}

fn gauss_seidel_step(ctx: &mut StepContext<'_>) -> Result<StepOutcome> {
    let scenario = ctx.scenario;
    for id in scenario.units() {
        step_unit(id, unit_mut(ctx.units, id)?, ctx.time, ctx.step_size)?;
        propagate(
            ctx.units,
            scenario.connections().iter().filter(|c| &c.source == id),
        )?;
    }
    Ok(StepOutcome::SINGLE)
}

fn iterative_step(ctx: &mut StepContext<'_>, config: &IterationConfig) -> Result<StepOutcome> {
    let scenario = ctx.scenario;
    let couplings: Vec<&Connection> = scenario.couplings().collect();
    let mut previous: Option<Vec<Vec<f64>>> = None;
    let mut iteration: u32 = 0;

    loop {
        let snapshots = capture(ctx.units, scenario.units())?;

        // feed inputs: current outputs on the first pass, last pass's outputs after
        for (k, connection) in couplings.iter().enumerate() {
            let Some(target) = &connection.target else {
                continue;
            };
            match &previous {
                None => {
                    let values = read_reals(ctx.units, &connection.source, &connection.source_refs)?;
                    write_reals(ctx.units, &target.unit, &target.refs, &values)?;
                }
                Some(outputs) => {
                    write_reals(ctx.units, &target.unit, &target.refs, &outputs[k])?;
                }
            }
        }

        step_all(ctx, false)?;

        let outputs = couplings
            .iter()
            .map(|c| read_reals(ctx.units, &c.source, &c.source_refs))
            .collect::<Result<Vec<_>>>()?;

        let converged = previous
            .as_ref()
            .is_some_and(|prev| outputs_close(prev, &outputs, config.tolerance));
        iteration += 1;
        previous = Some(outputs);

        if converged || iteration > config.max_iterations {
            drop(snapshots);
            if converged {
                trace!(time = ctx.time, iteration, "macro step converged");
            } else {
                debug!(time = ctx.time, iteration, "iteration budget exhausted, accepting step");
            }
            return Ok(StepOutcome {
                iterations: iteration,
                converged,
            });
        }

        trace!(time = ctx.time, iteration, "not converged, rolling back");
        restore(ctx.units, snapshots)?;
    }
}

fn capture(units: &UnitSet, ids: &[UnitId]) -> Result<Vec<(UnitId, StateSnapshot)>> {
    ids.iter()
        .map(|id| {
            let unit = units.get(id).ok_or_else(|| Error::MissingHandle(id.clone()))?;
            let snapshot = unit.get_state().map_err(|e| Error::unit(id, e))?;
            Ok((id.clone(), snapshot))
        })
        .collect()
}

fn restore(units: &mut UnitSet, snapshots: Vec<(UnitId, StateSnapshot)>) -> Result<()> {
    for (id, snapshot) in snapshots {
        unit_mut(units, &id)?
            .set_state(snapshot)
            .map_err(|e| Error::unit(&id, e))?;
    }
    Ok(())
}

fn outputs_close(previous: &[Vec<f64>], current: &[Vec<f64>], tolerance: f64) -> bool {
    previous.iter().zip(current).all(|(prev, cur)| {
        prev.len() == cur.len()
            && prev
                .iter()
                .zip(cur)
                .all(|(&p, &c)| is_close(p, c, tolerance, tolerance))
    })
}
