//! Run executor
//!
//! Drives a scenario through the initialization protocol and the macro-step
//! loop, delegating each macro step to a [`Strategy`] and sampling outputs
//! at a fixed cadence.

use serde::Serialize;
use tracing::{error, info, instrument, trace};

use crate::error::{Error, Result};
use crate::results::Results;
use crate::scenario::{Connection, Scenario};
use crate::strategy::{StepContext, StepOutcome, Strategy};
use crate::types::{UnitId, ValueRef, VarType, is_close};
use crate::unit::{Unit, UnitError, UnitSet};

/// Counters accumulated over a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunStats {
    /// Macro steps completed
    pub macro_steps: u64,
    /// Inner iterations across all macro steps (one per step for non-iterative strategies)
    pub inner_iterations: u64,
    /// Macro steps accepted without convergence
    pub unconverged_steps: u64,
}

impl RunStats {
    fn record(&mut self, outcome: StepOutcome) {
        self.macro_steps += 1;
        self.inner_iterations += u64::from(outcome.iterations);
        if !outcome.converged {
            self.unconverged_steps += 1;
        }
    }
}

/// One run of a scenario.
///
/// Owns the results while the run is in progress. If a step fails, the
/// samples recorded so far remain available through [`Simulation::results`].
#[derive(Debug)]
pub struct Simulation<'a> {
    scenario: &'a Scenario,
    units: &'a mut UnitSet,
    strategy: &'a Strategy,
    results: Results,
    time: f64,
    steps_per_sample: u64,
    countdown: u64,
    initialized: bool,
    stats: RunStats,
}

impl<'a> Simulation<'a> {
    /// Validate the scenario against the unit set and shape the results.
    ///
    /// No unit is touched; a configuration error here leaves every unit as it was.
    pub fn new(scenario: &'a Scenario, units: &'a mut UnitSet, strategy: &'a Strategy) -> Result<Self> {
        scenario.validate()?;
        for id in scenario.units() {
            if !units.contains(id) {
                error!(unit = %id, "scenario unit has no handle");
                return Err(Error::MissingHandle(id.clone()));
            }
        }
        strategy.check(scenario)?;

        let steps_per_sample = scenario.timing().steps_per_sample();
        Ok(Self {
            scenario,
            units,
            strategy,
            results: Results::for_outputs(scenario.outputs()),
            time: 0.0,
            steps_per_sample,
            countdown: steps_per_sample,
            initialized: false,
            stats: RunStats::default(),
        })
    }

    /// Current simulation time
    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn results(&self) -> &Results {
        &self.results
    }

    pub fn into_results(self) -> Results {
        self.results
    }

    pub fn stats(&self) -> RunStats {
        self.stats
    }

    /// Run the initialization protocol and take the sample at t=0.
    #[instrument(skip_all, name = "initialize")]
    pub fn initialize(&mut self) -> Result<()> {
        let timing = *self.scenario.timing();

        for id in self.scenario.units() {
            let unit = unit_mut(self.units, id)?;
            unit.setup_experiment(None, 0.0, timing.stop_time)
                .map_err(|e| Error::unit(id, e))?;
            unit.enter_initialization_mode()
                .map_err(|e| Error::unit(id, e))?;
        }

        for (id, params) in self.scenario.parameters() {
            trace!(unit = %id, count = params.refs.len(), "applying initial parameters");
            unit_mut(self.units, id)?
                .set_real(&params.refs, &params.values)
                .map_err(|e| Error::unit(id, e))?;
        }

        self.strategy.propagate_initial(self.scenario, self.units)?;

        for id in self.scenario.units() {
            unit_mut(self.units, id)?
                .exit_initialization_mode()
                .map_err(|e| Error::unit(id, e))?;
        }

        self.time = 0.0;
        self.countdown = self.steps_per_sample;
        self.initialized = true;
        self.sample()?;

        info!(
            units = self.scenario.units().len(),
            strategy = self.strategy.name(),
            "initialization complete"
        );
        Ok(())
    }

    /// Whether another macro step fits before the end of the run.
    ///
    /// With a stop condition, continues while its value is positive and not
    /// close to zero. Otherwise continues while `time + step_size` does not
    /// pass the stop time, tolerating drift of `step_size * 1e-3`.
    pub fn should_continue(&self) -> Result<bool> {
        let timing = self.scenario.timing();
        let tol = timing.boundary_tolerance();

        if let Some(stop) = self.scenario.stop_condition() {
            let value = unit_ref(self.units, &stop.source)?
                .get_real(&stop.source_refs)
                .map_err(|e| Error::unit(&stop.source, e))?
                .first()
                .copied()
                .unwrap_or(0.0);
            return Ok(value > 0.0 && !is_close(value, 0.0, tol, tol));
        }

        let stop_time = timing.stop_time.ok_or(Error::NoTermination)?;
        let next = self.time + timing.step_size;
        Ok(next <= stop_time || is_close(next, stop_time, tol, tol))
    }

    /// Advance one macro step, sampling if the cadence says so.
    ///
    /// Initializes first if that has not happened yet.
    pub fn step(&mut self) -> Result<()> {
        if !self.initialized {
            self.initialize()?;
        }
        self.advance(&mut |_| {})
    }

    fn advance(&mut self, on_progress: &mut dyn FnMut(f64)) -> Result<()> {
        let step_size = self.scenario.timing().step_size;
        let mut ctx = StepContext {
            scenario: self.scenario,
            units: &mut *self.units,
            time: self.time,
            step_size,
        };
        let outcome = self.strategy.advance(&mut ctx)?;
        self.stats.record(outcome);

        self.countdown -= 1;
        self.time += step_size;
        if self.countdown == 0 {
            on_progress(self.time);
            self.sample()?;
            self.countdown = self.steps_per_sample;
        }
        Ok(())
    }

    /// Initialize if needed, then step until the run ends.
    #[instrument(skip_all, name = "run", fields(strategy = self.strategy.name()))]
    pub fn run(&mut self, on_progress: Option<&mut dyn FnMut(f64)>) -> Result<()> {
        if !self.initialized {
            self.initialize()?;
        }

        let mut noop = |_: f64| {};
        let on_progress: &mut dyn FnMut(f64) = match on_progress {
            Some(callback) => callback,
            None => &mut noop,
        };

        while self.should_continue()? {
            self.advance(&mut *on_progress)?;
        }

        self.strategy.terminate(&self.stats);
        info!(
            time = self.time,
            samples = self.results.len(),
            macro_steps = self.stats.macro_steps,
            "run complete"
        );
        Ok(())
    }

    fn sample(&mut self) -> Result<()> {
        trace!(time = self.time, "sample");
        // read everything first so a failed read leaves the results aligned
        let values = self
            .scenario
            .outputs()
            .iter()
            .map(|output| {
                let values = read_as_reals(self.units, output)?;
                if values.len() != output.source_refs.len() {
                    return Err(Error::unit(
                        &output.source,
                        UnitError::Arity {
                            refs: output.source_refs.len(),
                            values: values.len(),
                        },
                    ));
                }
                Ok(values)
            })
            .collect::<Result<Vec<_>>>()?;
        self.results.push_timestamp(self.time);
        for (output, values) in self.scenario.outputs().iter().zip(&values) {
            self.results.record(output, values);
        }
        Ok(())
    }
}

/// Runs scenarios with a fixed strategy
#[derive(Debug, Clone)]
pub struct Coordinator {
    strategy: Strategy,
}

impl Coordinator {
    pub fn new(strategy: Strategy) -> Self {
        Self { strategy }
    }

    pub fn strategy(&self) -> &Strategy {
        &self.strategy
    }

    /// Validate, initialize, and step the scenario to its end.
    ///
    /// `on_progress` is called with the simulation time at every sampling
    /// point after the first.
    pub fn run(
        &self,
        scenario: &Scenario,
        units: &mut UnitSet,
        on_progress: Option<&mut dyn FnMut(f64)>,
    ) -> Result<Results> {
        let mut simulation = Simulation::new(scenario, units, &self.strategy)?;
        simulation.run(on_progress)?;
        Ok(simulation.into_results())
    }
}

pub(crate) fn unit_ref<'u>(units: &'u UnitSet, id: &UnitId) -> Result<&'u dyn Unit> {
    units.get(id).ok_or_else(|| Error::MissingHandle(id.clone()))
}

pub(crate) fn unit_mut<'u>(units: &'u mut UnitSet, id: &UnitId) -> Result<&'u mut (dyn Unit + 'static)> {
    units.get_mut(id).ok_or_else(|| Error::MissingHandle(id.clone()))
}

/// Step one unit, turning a non-OK status into a fatal error.
pub(crate) fn step_unit(id: &UnitId, unit: &mut dyn Unit, time: f64, step_size: f64) -> Result<()> {
    let status = unit.step(time, step_size).map_err(|e| Error::unit(id, e))?;
    if status.is_ok() {
        Ok(())
    } else {
        error!(unit = %id, time, ?status, "step failed");
        Err(Error::StepFailed {
            unit: id.clone(),
            time,
            status,
        })
    }
}

pub(crate) fn read_reals(units: &UnitSet, id: &UnitId, refs: &[ValueRef]) -> Result<Vec<f64>> {
    unit_ref(units, id)?
        .get_real(refs)
        .map_err(|e| Error::unit(id, e))
}

pub(crate) fn write_reals(units: &mut UnitSet, id: &UnitId, refs: &[ValueRef], values: &[f64]) -> Result<()> {
    unit_mut(units, id)?
        .set_real(refs, values)
        .map_err(|e| Error::unit(id, e))
}

/// Read a connection's source values, booleans as 1.0/0.0
fn read_as_reals(units: &UnitSet, connection: &Connection) -> Result<Vec<f64>> {
    match connection.value_type {
        VarType::Real => read_reals(units, &connection.source, &connection.source_refs),
        VarType::Boolean => {
            let values = unit_ref(units, &connection.source)?
                .get_boolean(&connection.source_refs)
                .map_err(|e| Error::unit(&connection.source, e))?;
            Ok(values.into_iter().map(|b| if b { 1.0 } else { 0.0 }).collect())
        }
    }
}

/// Copy current source values to targets, in the given order.
///
/// Output-only connections are skipped.
pub(crate) fn propagate<'c>(
    units: &mut UnitSet,
    connections: impl IntoIterator<Item = &'c Connection>,
) -> Result<()> {
    for connection in connections {
        let Some(target) = &connection.target else {
            continue;
        };
        trace!(%connection, "propagate");
        match connection.value_type {
            VarType::Real => {
                let values = read_reals(units, &connection.source, &connection.source_refs)?;
                write_reals(units, &target.unit, &target.refs, &values)?;
            }
            VarType::Boolean => {
                let values = unit_ref(units, &connection.source)?
                    .get_boolean(&connection.source_refs)
                    .map_err(|e| Error::unit(&connection.source, e))?;
                unit_mut(units, &target.unit)?
                    .set_boolean(&target.refs, &values)
                    .map_err(|e| Error::unit(&target.unit, e))?;
            }
        }
    }
    Ok(())
}
