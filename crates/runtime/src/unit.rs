//! Unit interface
//!
//! A unit is a black box that advances its own state when told to. The
//! engine talks to it only through [`Unit`]; implementations may wrap a
//! foreign library as easily as a Rust model.

use std::any::Any;
use std::fmt;
use std::path::PathBuf;

use indexmap::IndexMap;
use thiserror::Error;
use tracing::{debug, warn};

use crate::provision::LoadedUnit;
use crate::types::{StepStatus, UnitId, ValueRef};

/// Errors reported by unit implementations
#[derive(Debug, Error)]
pub enum UnitError {
    #[error("unknown value reference {0}")]
    UnknownRef(ValueRef),

    #[error("state snapshot was not produced by this kind of unit")]
    ForeignSnapshot,

    #[error("{refs} refs paired with {values} values")]
    Arity { refs: usize, values: usize },

    #[error("{0}")]
    Rejected(String),
}

/// Opaque capture of a unit's complete internal state.
///
/// Owned by whoever captured it. Passing it to [`Unit::set_state`] consumes
/// it; dropping it discards it. It cannot be cloned, so a snapshot is
/// restored at most once.
pub struct StateSnapshot(Box<dyn Any + Send>);

impl StateSnapshot {
    pub fn new<T: Any + Send>(state: T) -> Self {
        Self(Box::new(state))
    }

    /// Recover the concrete state, or fail if it belongs to another kind of unit.
    pub fn downcast<T: Any>(self) -> Result<T, UnitError> {
        self.0
            .downcast::<T>()
            .map(|state| *state)
            .map_err(|_| UnitError::ForeignSnapshot)
    }
}

impl fmt::Debug for StateSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("StateSnapshot(..)")
    }
}

/// Capability contract of a simulation component.
///
/// Getters and setters take positionally paired ref/value slices of equal
/// length.
pub trait Unit: Send {
    fn setup_experiment(
        &mut self,
        tolerance: Option<f64>,
        start_time: f64,
        stop_time: Option<f64>,
    ) -> Result<(), UnitError>;

    fn enter_initialization_mode(&mut self) -> Result<(), UnitError>;

    fn exit_initialization_mode(&mut self) -> Result<(), UnitError>;

    /// Advance from `current_time` by `step_size`. Blocks until done.
    fn step(&mut self, current_time: f64, step_size: f64) -> Result<StepStatus, UnitError>;

    fn get_real(&self, refs: &[ValueRef]) -> Result<Vec<f64>, UnitError>;

    fn set_real(&mut self, refs: &[ValueRef], values: &[f64]) -> Result<(), UnitError>;

    fn get_boolean(&self, refs: &[ValueRef]) -> Result<Vec<bool>, UnitError>;

    fn set_boolean(&mut self, refs: &[ValueRef], values: &[bool]) -> Result<(), UnitError>;

    fn get_state(&self) -> Result<StateSnapshot, UnitError>;

    fn set_state(&mut self, state: StateSnapshot) -> Result<(), UnitError>;

    fn terminate(&mut self) -> Result<(), UnitError>;
}

/// A live unit handle plus whatever it keeps on disk.
struct UnitSlot {
    unit: Box<dyn Unit>,
    resources: Option<PathBuf>,
}

/// The live unit handles of a run, keyed by identity.
#[derive(Default)]
pub struct UnitSet {
    slots: IndexMap<UnitId, UnitSlot>,
}

impl UnitSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a unit. Returns the previous handle under the same id, if any.
    pub fn insert(&mut self, id: impl Into<UnitId>, unit: Box<dyn Unit>) -> Option<Box<dyn Unit>> {
        let id = id.into();
        debug!(unit = %id, "unit registered");
        self.slots
            .insert(
                id,
                UnitSlot {
                    unit,
                    resources: None,
                },
            )
            .map(|slot| slot.unit)
    }

    /// Register a provisioned unit, keeping its resources for [`UnitSet::release`].
    pub fn insert_loaded(&mut self, loaded: LoadedUnit) -> Option<Box<dyn Unit>> {
        debug!(unit = %loaded.id, resources = ?loaded.resources, "provisioned unit registered");
        self.slots
            .insert(
                loaded.id,
                UnitSlot {
                    unit: loaded.unit,
                    resources: loaded.resources,
                },
            )
            .map(|slot| slot.unit)
    }

    pub fn contains(&self, id: &UnitId) -> bool {
        self.slots.contains_key(id)
    }

    pub fn get(&self, id: &UnitId) -> Option<&dyn Unit> {
        self.slots.get(id).map(|slot| slot.unit.as_ref())
    }

    pub fn get_mut(&mut self, id: &UnitId) -> Option<&mut (dyn Unit + 'static)> {
        self.slots.get_mut(id).map(|slot| slot.unit.as_mut())
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &UnitId> {
        self.slots.keys()
    }

    /// Mutable handles for the given ids, in the order given.
    ///
    /// Ids must be distinct and registered; validation guarantees both for
    /// scenario units.
    pub(crate) fn handles_mut(&mut self, ids: &[UnitId]) -> Vec<(&UnitId, &mut Box<dyn Unit>)> {
        let mut handles: Vec<_> = self
            .slots
            .iter_mut()
            .filter(|(id, _)| ids.contains(*id))
            .map(|(id, slot)| (id, &mut slot.unit))
            .collect();
        handles.sort_by_key(|(id, _)| ids.iter().position(|wanted| wanted == *id));
        handles
    }

    /// Terminate and drop every handle, then remove extracted resources
    /// best-effort.
    ///
    /// Termination and cleanup failures are logged and swallowed.
    pub fn release(self) {
        for (id, slot) in self.slots {
            let mut unit = slot.unit;
            if let Err(err) = unit.terminate() {
                warn!(unit = %id, error = %err, "failed to terminate unit");
            }
            drop(unit);
            let Some(dir) = slot.resources else {
                continue;
            };
            match std::fs::remove_dir_all(&dir) {
                Ok(()) => debug!(unit = %id, dir = %dir.display(), "unit resources removed"),
                Err(err) if err.kind() == std::io::ErrorKind::PermissionDenied => {
                    warn!(unit = %id, dir = %dir.display(), "failed to clear unit resources: permission denied");
                }
                Err(err) => {
                    warn!(unit = %id, dir = %dir.display(), error = %err, "failed to clear unit resources");
                }
            }
        }
    }
}

impl fmt::Debug for UnitSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.slots.keys()).finish()
    }
}
