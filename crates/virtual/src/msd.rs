//! Double spring-mass-damper
//!
//! Two masses, each on a spring and damper to the wall, coupled by a
//! spring-damper between them. [`Msd1`] receives the coupling force;
//! [`Msd2`] receives the first mass's position and velocity and computes
//! that force. Both integrate with forward Euler over ten sub-steps per
//! macro step.

use cosim_runtime::{Connection, Result, Scenario, Timing, UnitId, UnitProvider, UnitSet, ValueRef, VarType};

use crate::{Dynamics, VirtualUnit};

const SUBSTEPS: usize = 10;

/// Value references of [`Msd1`]
pub mod msd1 {
    use cosim_runtime::ValueRef;

    pub const X: ValueRef = ValueRef(0);
    pub const V: ValueRef = ValueRef(1);
    pub const M: ValueRef = ValueRef(2);
    pub const C: ValueRef = ValueRef(3);
    pub const CF: ValueRef = ValueRef(4);
    /// External force, input
    pub const FE: ValueRef = ValueRef(5);

    pub(crate) const SIZE: usize = 6;
}

/// Value references of [`Msd2`]
pub mod msd2 {
    use cosim_runtime::ValueRef;

    pub const X: ValueRef = ValueRef(0);
    pub const V: ValueRef = ValueRef(1);
    pub const M: ValueRef = ValueRef(2);
    pub const C: ValueRef = ValueRef(3);
    pub const CF: ValueRef = ValueRef(4);
    /// Coupling stiffness
    pub const CE: ValueRef = ValueRef(5);
    /// Coupling damping
    pub const CEF: ValueRef = ValueRef(6);
    /// Coupling force, output
    pub const FE: ValueRef = ValueRef(7);
    /// Position of the other mass, input
    pub const XE: ValueRef = ValueRef(8);
    /// Velocity of the other mass, input
    pub const VE: ValueRef = ValueRef(9);

    pub(crate) const SIZE: usize = 10;
}

fn at(state: &[f64], vref: ValueRef) -> f64 {
    state[vref.index()]
}

fn set(state: &mut [f64], vref: ValueRef, value: f64) {
    state[vref.index()] = value;
}

/// Mass driven by an external force
#[derive(Debug, Clone, Copy, Default)]
pub struct Msd1;

impl Dynamics for Msd1 {
    fn initial_state(&self) -> Vec<f64> {
        let mut state = vec![0.0; msd1::SIZE];
        set(&mut state, msd1::X, 1.0);
        set(&mut state, msd1::V, 0.0);
        set(&mut state, msd1::M, 1.0);
        set(&mut state, msd1::C, 1.0);
        set(&mut state, msd1::CF, 1.0);
        set(&mut state, msd1::FE, 0.0);
        state
    }

    fn step(&self, state: &mut [f64], _time: f64, step_size: f64) {
        let h = step_size / SUBSTEPS as f64;
        for _ in 0..SUBSTEPS {
            let der_x = at(state, msd1::V);
            let der_v = (1.0 / at(state, msd1::M))
                * (-at(state, msd1::C) * at(state, msd1::X) - at(state, msd1::CF) * at(state, msd1::V)
                    + at(state, msd1::FE));

            set(state, msd1::X, at(state, msd1::X) + der_x * h);
            set(state, msd1::V, at(state, msd1::V) + der_v * h);
        }
    }
}

/// Mass coupled to another through a spring-damper
#[derive(Debug, Clone, Copy, Default)]
pub struct Msd2;

impl Dynamics for Msd2 {
    fn initial_state(&self) -> Vec<f64> {
        let mut state = vec![0.0; msd2::SIZE];
        set(&mut state, msd2::M, 1.0);
        set(&mut state, msd2::C, 1.0);
        set(&mut state, msd2::CE, 1.0);
        set(&mut state, msd2::CEF, 1.0);
        state
    }

    fn step(&self, state: &mut [f64], _time: f64, step_size: f64) {
        let h = step_size / SUBSTEPS as f64;
        for _ in 0..SUBSTEPS {
            let fe = at(state, msd2::CE) * (at(state, msd2::X) - at(state, msd2::XE))
                + at(state, msd2::CEF) * (at(state, msd2::V) - at(state, msd2::VE));
            set(state, msd2::FE, fe);

            let der_x = at(state, msd2::V);
            let der_v = (1.0 / at(state, msd2::M))
                * (-at(state, msd2::C) * at(state, msd2::X) - at(state, msd2::CF) * at(state, msd2::V)
                    - fe);

            set(state, msd2::X, at(state, msd2::X) + der_x * h);
            set(state, msd2::V, at(state, msd2::V) + der_v * h);
        }
    }
}

pub fn msd1_unit(name: impl Into<UnitId>) -> VirtualUnit<Msd1> {
    VirtualUnit::new(name, Msd1)
}

pub fn msd2_unit(name: impl Into<UnitId>) -> VirtualUnit<Msd2> {
    VirtualUnit::new(name, Msd2)
}

/// Instance names used by [`double_msd`]
pub const MSD1: &str = "msd1";
pub const MSD2: &str = "msd2";

/// The two masses wired together.
///
/// `msd1` position and velocity feed `msd2`, whose coupling force feeds
/// back into `msd1`. Both couplings are recorded, along with the position
/// and velocity of `msd2`. `ce` and `cef` set the coupling stiffness and
/// damping.
pub fn double_msd(ce: f64, cef: f64, timing: Timing) -> Result<Scenario> {
    let msd1_out = Connection::real(MSD1, [msd1::X, msd1::V], MSD2, [msd2::XE, msd2::VE]);
    let msd1_in = Connection::real(MSD2, [msd2::FE], MSD1, [msd1::FE]);
    let msd2_out = Connection::output(VarType::Real, MSD2, [msd2::X, msd2::V]);

    Scenario::builder()
        .units([MSD1, MSD2])
        .connection(msd1_out.clone())
        .connection(msd1_in.clone())
        .output(msd1_out)
        .output(msd1_in)
        .output(msd2_out)
        .timing(timing)
        .real_parameters(MSD2, [msd2::CE, msd2::CEF], [ce, cef])
        .build()
}

/// Provision both masses of [`double_msd`] into a fresh unit set.
pub fn double_msd_units(provider: &dyn UnitProvider) -> Result<UnitSet> {
    let mut units = UnitSet::new();
    for name in [MSD1, MSD2] {
        units.insert_loaded(provider.provision(name, UnitId::from(name))?);
    }
    Ok(units)
}
