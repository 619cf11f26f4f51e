//! Scenario model
//!
//! The immutable description of a co-simulation run: which units take part,
//! how their signals are wired, what gets recorded and when the run stops.
//! Units themselves live in a [`UnitSet`](crate::unit::UnitSet); the
//! scenario refers to them by [`UnitId`].

use std::collections::HashSet;
use std::fmt;

use indexmap::IndexMap;
use tracing::debug;

use crate::error::{Error, Result};
use crate::types::{
    DEFAULT_QUANTIZATION_TOLERANCE, SignalKind, Timing, UnitId, ValueRef, VarType,
};

/// Receiving end of a connection
#[derive(Debug, Clone, PartialEq)]
pub struct Target {
    pub unit: UnitId,
    pub refs: Vec<ValueRef>,
}

/// Directed, typed mapping from one unit's outputs to another unit's inputs.
///
/// `source_refs[i]` feeds `target.refs[i]`. A connection without a target
/// is an output connection: it only names values to record.
#[derive(Debug, Clone, PartialEq)]
pub struct Connection {
    pub value_type: VarType,
    pub signal_kind: SignalKind,
    /// Closeness tolerance separating modes of a discontinuous signal
    pub quantization_tolerance: f64,
    pub source: UnitId,
    pub source_refs: Vec<ValueRef>,
    pub target: Option<Target>,
}

impl Connection {
    fn new(
        value_type: VarType,
        source: UnitId,
        source_refs: Vec<ValueRef>,
        target: Option<Target>,
    ) -> Self {
        Self {
            value_type,
            signal_kind: SignalKind::Continuous,
            quantization_tolerance: DEFAULT_QUANTIZATION_TOLERANCE,
            source,
            source_refs,
            target,
        }
    }

    /// Real-valued coupling from `source.source_refs` to `target.target_refs`
    pub fn real(
        source: impl Into<UnitId>,
        source_refs: impl IntoIterator<Item = impl Into<ValueRef>>,
        target: impl Into<UnitId>,
        target_refs: impl IntoIterator<Item = impl Into<ValueRef>>,
    ) -> Self {
        Self::new(
            VarType::Real,
            source.into(),
            collect_refs(source_refs),
            Some(Target {
                unit: target.into(),
                refs: collect_refs(target_refs),
            }),
        )
    }

    /// Boolean coupling from `source.source_refs` to `target.target_refs`
    pub fn boolean(
        source: impl Into<UnitId>,
        source_refs: impl IntoIterator<Item = impl Into<ValueRef>>,
        target: impl Into<UnitId>,
        target_refs: impl IntoIterator<Item = impl Into<ValueRef>>,
    ) -> Self {
        Self {
            value_type: VarType::Boolean,
            ..Self::real(source, source_refs, target, target_refs)
        }
    }

    /// Output-only connection recording `source.refs`
    pub fn output(
        value_type: VarType,
        source: impl Into<UnitId>,
        refs: impl IntoIterator<Item = impl Into<ValueRef>>,
    ) -> Self {
        Self::new(value_type, source.into(), collect_refs(refs), None)
    }

    /// Record this signal's mode transitions at the given quantization tolerance.
    pub fn discontinuous(mut self, quantization_tolerance: f64) -> Self {
        self.signal_kind = SignalKind::Discontinuous;
        self.quantization_tolerance = quantization_tolerance;
        self
    }

    pub fn is_output_only(&self) -> bool {
        self.target.is_none()
    }

    /// Units this connection touches
    pub fn units(&self) -> impl Iterator<Item = &UnitId> {
        std::iter::once(&self.source).chain(self.target.as_ref().map(|t| &t.unit))
    }
}

fn collect_refs(refs: impl IntoIterator<Item = impl Into<ValueRef>>) -> Vec<ValueRef> {
    refs.into_iter().map(Into::into).collect()
}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = match &self.target {
            Some(target) => self
                .source_refs
                .iter()
                .zip(&target.refs)
                .map(|(src, trg)| format!("{}.{}->{}.{}", self.source, src, target.unit, trg))
                .collect(),
            None => self
                .source_refs
                .iter()
                .map(|src| format!("{}.{}->Out", self.source, src))
                .collect(),
        };
        write!(f, "[{}]", parts.join(", "))
    }
}

/// Initial real values applied during initialization
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RealParameters {
    pub refs: Vec<ValueRef>,
    pub values: Vec<f64>,
}

/// A complete, read-only co-simulation scenario
#[derive(Debug, Clone)]
pub struct Scenario {
    units: Vec<UnitId>,
    connections: Vec<Connection>,
    outputs: Vec<Connection>,
    timing: Timing,
    stop_condition: Option<Connection>,
    parameters: IndexMap<UnitId, RealParameters>,
    /// (unit, ref) -> index into `outputs`
    output_index: IndexMap<(UnitId, ValueRef), usize>,
}

impl Scenario {
    pub fn builder() -> ScenarioBuilder {
        ScenarioBuilder::default()
    }

    /// Units in stepping order
    pub fn units(&self) -> &[UnitId] {
        &self.units
    }

    /// Connections in propagation order
    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    /// Connections that feed a target
    pub fn couplings(&self) -> impl Iterator<Item = &Connection> {
        self.connections.iter().filter(|c| c.target.is_some())
    }

    pub fn outputs(&self) -> &[Connection] {
        &self.outputs
    }

    pub fn timing(&self) -> &Timing {
        &self.timing
    }

    pub fn stop_condition(&self) -> Option<&Connection> {
        self.stop_condition.as_ref()
    }

    pub fn parameters(&self) -> impl Iterator<Item = (&UnitId, &RealParameters)> {
        self.parameters.iter()
    }

    /// The output connection recording `unit.vref`, if any
    pub fn output_for(&self, unit: &UnitId, vref: ValueRef) -> Option<&Connection> {
        self.output_index
            .get(&(unit.clone(), vref))
            .map(|&idx| &self.outputs[idx])
    }

    /// Check that units are unique and every reference points at one of them.
    ///
    /// Pure: touches no unit.
    pub fn validate(&self) -> Result<()> {
        let mut known = HashSet::with_capacity(self.units.len());
        for unit in &self.units {
            if !known.insert(unit) {
                return Err(Error::DuplicateUnit(unit.clone()));
            }
        }

        let check = |unit: &UnitId, context: &dyn Fn() -> String| {
            if known.contains(unit) {
                Ok(())
            } else {
                Err(Error::UnknownUnit {
                    unit: unit.clone(),
                    context: context(),
                })
            }
        };

        for connection in &self.connections {
            for unit in connection.units() {
                check(unit, &|| format!("connection {connection}"))?;
            }
        }
        for output in &self.outputs {
            for unit in output.units() {
                check(unit, &|| format!("output {output}"))?;
            }
        }
        if let Some(stop) = &self.stop_condition {
            check(&stop.source, &|| format!("stop condition {stop}"))?;
        }
        for unit in self.parameters.keys() {
            check(unit, &|| "initial parameters".to_string())?;
        }
        Ok(())
    }
}

/// Builder for [`Scenario`]
#[derive(Debug, Default)]
pub struct ScenarioBuilder {
    units: Vec<UnitId>,
    connections: Vec<Connection>,
    outputs: Vec<Connection>,
    timing: Timing,
    stop_condition: Option<Connection>,
    parameters: IndexMap<UnitId, RealParameters>,
}

impl ScenarioBuilder {
    /// Add a unit. Order of addition is stepping order.
    pub fn unit(mut self, id: impl Into<UnitId>) -> Self {
        self.units.push(id.into());
        self
    }

    pub fn units(mut self, ids: impl IntoIterator<Item = impl Into<UnitId>>) -> Self {
        self.units.extend(ids.into_iter().map(Into::into));
        self
    }

    /// Add a coupling. Order of addition is propagation order.
    pub fn connection(mut self, connection: Connection) -> Self {
        self.connections.push(connection);
        self
    }

    /// Record the source side of a connection
    pub fn output(mut self, connection: Connection) -> Self {
        self.outputs.push(connection);
        self
    }

    pub fn timing(mut self, timing: Timing) -> Self {
        self.timing = timing;
        self
    }

    pub fn step_size(mut self, step_size: f64) -> Self {
        self.timing.step_size = step_size;
        self
    }

    pub fn stop_time(mut self, stop_time: f64) -> Self {
        self.timing.stop_time = Some(stop_time);
        self
    }

    pub fn sampling_interval(mut self, interval: f64) -> Self {
        self.timing.sampling_interval = interval;
        self
    }

    /// Continue only while `unit.vref` stays positive.
    ///
    /// Takes precedence over the stop time for ending the run.
    pub fn stop_condition(mut self, unit: impl Into<UnitId>, vref: impl Into<ValueRef>) -> Self {
        self.stop_condition = Some(Connection::output(VarType::Real, unit, [vref.into()]));
        self
    }

    /// Initial real values for a unit. Repeated calls for one unit accumulate.
    pub fn real_parameters(
        mut self,
        unit: impl Into<UnitId>,
        refs: impl IntoIterator<Item = impl Into<ValueRef>>,
        values: impl IntoIterator<Item = f64>,
    ) -> Self {
        let entry = self.parameters.entry(unit.into()).or_default();
        entry.refs.extend(refs.into_iter().map(Into::into));
        entry.values.extend(values);
        self
    }

    /// Check timing and arity, then build the output index.
    pub fn build(self) -> Result<Scenario> {
        let timing = self.timing;
        if !(timing.step_size > 0.0) {
            return Err(Error::InvalidTiming(format!(
                "step size must be positive, got {}",
                timing.step_size
            )));
        }
        if !(timing.sampling_interval > 0.0) {
            return Err(Error::InvalidTiming(format!(
                "sampling interval must be positive, got {}",
                timing.sampling_interval
            )));
        }
        match (timing.stop_time, &self.stop_condition) {
            (None, None) => return Err(Error::NoTermination),
            (Some(stop), _) if !(stop > 0.0) => {
                return Err(Error::InvalidTiming(format!(
                    "stop time must be positive, got {stop}"
                )));
            }
            _ => {}
        }

        for connection in &self.connections {
            if let Some(target) = &connection.target {
                check_arity(
                    || format!("connection {connection}"),
                    connection.source_refs.len(),
                    target.refs.len(),
                )?;
            }
        }
        for (unit, params) in &self.parameters {
            check_arity(
                || format!("initial parameters of {unit}"),
                params.refs.len(),
                params.values.len(),
            )?;
        }

        let mut output_index = IndexMap::new();
        for (idx, output) in self.outputs.iter().enumerate() {
            for &vref in &output.source_refs {
                let key = (output.source.clone(), vref);
                if output_index.insert(key, idx).is_some() {
                    return Err(Error::DuplicateOutput {
                        unit: output.source.clone(),
                        vref,
                    });
                }
            }
        }

        debug!(
            units = self.units.len(),
            connections = self.connections.len(),
            outputs = output_index.len(),
            "scenario built"
        );

        Ok(Scenario {
            units: self.units,
            connections: self.connections,
            outputs: self.outputs,
            timing,
            stop_condition: self.stop_condition,
            parameters: self.parameters,
            output_index,
        })
    }
}

fn check_arity(context: impl FnOnce() -> String, left: usize, right: usize) -> Result<()> {
    if left == right {
        Ok(())
    } else {
        Err(Error::RefArity {
            context: context(),
            left,
            right,
        })
    }
}
