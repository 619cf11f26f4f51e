//! In-memory units
//!
//! A [`VirtualUnit`] keeps its whole state in a vector of reals addressed by
//! [`ValueRef`], so snapshots are plain copies. The model behind it is a
//! [`Dynamics`] implementation.

pub mod msd;
pub mod provider;

use cosim_runtime::{StateSnapshot, StepStatus, Unit, UnitError, UnitId, ValueRef};
use tracing::trace;

pub use msd::{Msd1, Msd2, double_msd, double_msd_units};
pub use provider::VirtualProvider;

/// Model driven by a [`VirtualUnit`]
pub trait Dynamics: Send {
    /// State the unit starts from and returns to on reset
    fn initial_state(&self) -> Vec<f64>;

    /// Advance `state` from `time` by `step_size`
    fn step(&self, state: &mut [f64], time: f64, step_size: f64);
}

/// Unit whose state is a vector of reals
pub struct VirtualUnit<D> {
    name: UnitId,
    state: Vec<f64>,
    dynamics: D,
}

impl<D: Dynamics> VirtualUnit<D> {
    pub fn new(name: impl Into<UnitId>, dynamics: D) -> Self {
        let state = dynamics.initial_state();
        Self {
            name: name.into(),
            state,
            dynamics,
        }
    }

    pub fn name(&self) -> &UnitId {
        &self.name
    }

    pub fn state(&self) -> &[f64] {
        &self.state
    }

    pub fn reset(&mut self) {
        self.state = self.dynamics.initial_state();
    }

    fn slot(&self, vref: ValueRef) -> Result<usize, UnitError> {
        let idx = vref.index();
        if idx < self.state.len() {
            Ok(idx)
        } else {
            Err(UnitError::UnknownRef(vref))
        }
    }
}

fn check_arity(refs: usize, values: usize) -> Result<(), UnitError> {
    if refs == values {
        Ok(())
    } else {
        Err(UnitError::Arity { refs, values })
    }
}

impl<D: Dynamics> Unit for VirtualUnit<D> {
    fn setup_experiment(
        &mut self,
        _tolerance: Option<f64>,
        _start_time: f64,
        _stop_time: Option<f64>,
    ) -> Result<(), UnitError> {
        Ok(())
    }

    fn enter_initialization_mode(&mut self) -> Result<(), UnitError> {
        Ok(())
    }

    fn exit_initialization_mode(&mut self) -> Result<(), UnitError> {
        Ok(())
    }

    fn step(&mut self, current_time: f64, step_size: f64) -> Result<StepStatus, UnitError> {
        self.dynamics.step(&mut self.state, current_time, step_size);
        trace!(unit = %self.name, time = current_time, "virtual step");
        Ok(StepStatus::Ok)
    }

    fn get_real(&self, refs: &[ValueRef]) -> Result<Vec<f64>, UnitError> {
        refs.iter()
            .map(|&vref| self.slot(vref).map(|idx| self.state[idx]))
            .collect()
    }

    fn set_real(&mut self, refs: &[ValueRef], values: &[f64]) -> Result<(), UnitError> {
        check_arity(refs.len(), values.len())?;
        for (&vref, &value) in refs.iter().zip(values) {
            let idx = self.slot(vref)?;
            self.state[idx] = value;
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
        Ok(StateSnapshot::new(self.state.clone()))
    }

    fn set_state(&mut self, state: StateSnapshot) -> Result<(), UnitError> {
        let state: Vec<f64> = state.downcast()?;
        if state.len() != self.state.len() {
            return Err(UnitError::Rejected(format!(
                "snapshot holds {} values, {} has {}",
                state.len(),
                self.name,
                self.state.len()
            )));
        }
        self.state = state;
        Ok(())
    }

    fn terminate(&mut self) -> Result<(), UnitError> {
        Ok(())
    }
}
