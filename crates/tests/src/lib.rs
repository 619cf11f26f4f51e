//! Integration test harness for the co-simulation runtime.
//!
//! Provides the double spring-mass-damper setup, instrumented units that
//! record every call made on them, and scripted units that replay a fixed
//! output sequence.

use std::sync::{Arc, Mutex};

use cosim_runtime::{
    Results, RunStats, Scenario, Simulation, StateSnapshot, StepStatus, Strategy, Timing, Unit, UnitError,
    UnitId, UnitSet, ValueRef,
};
use cosim_virtual::{VirtualProvider, double_msd, double_msd_units};

/// Timing of the reference double spring-mass-damper run
pub const MSD_TIMING: Timing = Timing {
    step_size: 0.01,
    stop_time: Some(7.0),
    sampling_interval: 0.1,
};

/// Test harness owning a scenario and the units it runs on.
pub struct TestHarness {
    scenario: Scenario,
    units: UnitSet,
}

impl TestHarness {
    pub fn new(scenario: Scenario, units: UnitSet) -> Self {
        Self { scenario, units }
    }

    /// The two coupled masses with the given coupling stiffness and damping.
    ///
    /// # Panics
    ///
    /// Panics if the scenario does not build or a unit cannot be provisioned.
    pub fn double_msd(ce: f64, cef: f64) -> Self {
        let scenario = double_msd(ce, cef, MSD_TIMING).expect("double msd scenario");
        let units = double_msd_units(&VirtualProvider::new()).expect("double msd units");
        Self::new(scenario, units)
    }

    pub fn scenario(&self) -> &Scenario {
        &self.scenario
    }

    pub fn units(&self) -> &UnitSet {
        &self.units
    }

    /// Run to completion, returning the trace and counters.
    pub fn try_run(&mut self, strategy: &Strategy) -> cosim_runtime::Result<(Results, RunStats)> {
        let mut simulation = Simulation::new(&self.scenario, &mut self.units, strategy)?;
        simulation.run(None)?;
        let stats = simulation.stats();
        Ok((simulation.into_results(), stats))
    }

    /// # Panics
    ///
    /// Panics if the run fails.
    pub fn run(&mut self, strategy: &Strategy) -> Results {
        match self.try_run(strategy) {
            Ok((results, _)) => results,
            Err(e) => panic!("run with {} failed: {e}", strategy.name()),
        }
    }

    pub fn release(self) {
        self.units.release();
    }
}

/// One recorded call on a [`Recorder`]
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub unit: String,
    pub method: &'static str,
    /// Recorder state when the call arrived
    pub state: Vec<f64>,
}

/// Call record shared between recorders and the test that inspects them
#[derive(Debug, Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<Call>>>);

impl CallLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, call: Call) {
        self.0.lock().expect("call log poisoned").push(call);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.0.lock().expect("call log poisoned").clone()
    }

    pub fn is_empty(&self) -> bool {
        self.0.lock().expect("call log poisoned").is_empty()
    }

    /// Method names called on `unit`, in order
    pub fn methods(&self, unit: &str) -> Vec<&'static str> {
        self.calls()
            .into_iter()
            .filter(|c| c.unit == unit)
            .map(|c| c.method)
            .collect()
    }

    /// State of `unit` at the start of each of its steps
    pub fn step_entries(&self, unit: &str) -> Vec<Vec<f64>> {
        self.calls()
            .into_iter()
            .filter(|c| c.unit == unit && c.method == "step")
            .map(|c| c.state)
            .collect()
    }
}

/// Unit with a plain vector state, a step function, and a call log
pub struct Recorder {
    name: String,
    state: Vec<f64>,
    dynamics: fn(&mut [f64]),
    log: CallLog,
}

impl Recorder {
    pub fn new(name: &str, state: Vec<f64>, dynamics: fn(&mut [f64]), log: &CallLog) -> Self {
        Self {
            name: name.to_string(),
            state,
            dynamics,
            log: log.clone(),
        }
    }

    fn record(&self, method: &'static str) {
        self.log.push(Call {
            unit: self.name.clone(),
            method,
            state: self.state.clone(),
        });
    }

    fn slot(&self, vref: ValueRef) -> Result<usize, UnitError> {
        if vref.index() < self.state.len() {
            Ok(vref.index())
        } else {
            Err(UnitError::UnknownRef(vref))
        }
    }
}

impl Unit for Recorder {
    fn setup_experiment(&mut self, _: Option<f64>, _: f64, _: Option<f64>) -> Result<(), UnitError> {
        self.record("setup_experiment");
        Ok(())
    }

    fn enter_initialization_mode(&mut self) -> Result<(), UnitError> {
        self.record("enter_initialization_mode");
        Ok(())
    }

    fn exit_initialization_mode(&mut self) -> Result<(), UnitError> {
        self.record("exit_initialization_mode");
        Ok(())
    }

    fn step(&mut self, _: f64, _: f64) -> Result<StepStatus, UnitError> {
        self.record("step");
        (self.dynamics)(&mut self.state);
        Ok(StepStatus::Ok)
    }

    fn get_real(&self, refs: &[ValueRef]) -> Result<Vec<f64>, UnitError> {
        self.record("get_real");
        refs.iter()
            .map(|&vref| self.slot(vref).map(|i| self.state[i]))
            .collect()
    }

    fn set_real(&mut self, refs: &[ValueRef], values: &[f64]) -> Result<(), UnitError> {
        self.record("set_real");
        for (&vref, &value) in refs.iter().zip(values) {
            let i = self.slot(vref)?;
            self.state[i] = value;
        }
        Ok(())
    }

    fn get_boolean(&self, refs: &[ValueRef]) -> Result<Vec<bool>, UnitError> {
        Ok(self.get_real(refs)?.into_iter().map(|v| v > 0.5).collect())
    }

    fn set_boolean(&mut self, refs: &[ValueRef], values: &[bool]) -> Result<(), UnitError> {
        let values: Vec<f64> = values.iter().map(|&b| if b { 1.0 } else { 0.0 }).collect();
        self.set_real(refs, &values)
    }

    fn get_state(&self) -> Result<StateSnapshot, UnitError> {
        self.record("get_state");
        Ok(StateSnapshot::new(self.state.clone()))
    }

    fn set_state(&mut self, state: StateSnapshot) -> Result<(), UnitError> {
        self.record("set_state");
        self.state = state.downcast()?;
        Ok(())
    }

    fn terminate(&mut self) -> Result<(), UnitError> {
        self.record("terminate");
        Ok(())
    }
}

/// Unit replaying a fixed sequence on ref 0, one entry per step.
///
/// Holds the last entry once the sequence runs out.
pub struct Scripted {
    values: Vec<f64>,
    cursor: usize,
}

impl Scripted {
    pub fn new(values: impl Into<Vec<f64>>) -> Self {
        Self {
            values: values.into(),
            cursor: 0,
        }
    }

    fn current(&self) -> f64 {
        let last = self.values.len().saturating_sub(1);
        self.values.get(self.cursor.min(last)).copied().unwrap_or(0.0)
    }
}

impl Unit for Scripted {
    fn setup_experiment(&mut self, _: Option<f64>, _: f64, _: Option<f64>) -> Result<(), UnitError> {
        Ok(())
    }

    fn enter_initialization_mode(&mut self) -> Result<(), UnitError> {
        Ok(())
    }

    fn exit_initialization_mode(&mut self) -> Result<(), UnitError> {
        Ok(())
    }

    fn step(&mut self, _: f64, _: f64) -> Result<StepStatus, UnitError> {
        self.cursor += 1;
        Ok(StepStatus::Ok)
    }

    fn get_real(&self, refs: &[ValueRef]) -> Result<Vec<f64>, UnitError> {
        refs.iter()
            .map(|&vref| match vref.0 {
                0 => Ok(self.current()),
                _ => Err(UnitError::UnknownRef(vref)),
            })
            .collect()
    }

    fn set_real(&mut self, refs: &[ValueRef], _: &[f64]) -> Result<(), UnitError> {
        match refs.first() {
            Some(&vref) => Err(UnitError::UnknownRef(vref)),
            None => Ok(()),
        }
    }

    fn get_boolean(&self, refs: &[ValueRef]) -> Result<Vec<bool>, UnitError> {
        Ok(self.get_real(refs)?.into_iter().map(|v| v > 0.5).collect())
    }

    fn set_boolean(&mut self, refs: &[ValueRef], _: &[bool]) -> Result<(), UnitError> {
        self.set_real(refs, &[])
    }

    fn get_state(&self) -> Result<StateSnapshot, UnitError> {
        Ok(StateSnapshot::new(self.cursor))
    }

    fn set_state(&mut self, state: StateSnapshot) -> Result<(), UnitError> {
        self.cursor = state.downcast()?;
        Ok(())
    }

    fn terminate(&mut self) -> Result<(), UnitError> {
        Ok(())
    }
}

/// Shorthand for a unit id
pub fn id(name: &str) -> UnitId {
    UnitId::from(name)
}
