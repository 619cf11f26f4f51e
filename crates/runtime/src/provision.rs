//! Unit provisioning
//!
//! Turning a packaged unit description into a live handle is left to
//! providers. The runtime only fixes the shape of the result and owns the
//! teardown: see [`UnitSet::release`](crate::unit::UnitSet::release).

use std::fmt;
use std::path::PathBuf;

use crate::error::Result;
use crate::types::UnitId;
use crate::unit::Unit;

/// A unit produced by a provider.
pub struct LoadedUnit {
    pub id: UnitId,
    pub unit: Box<dyn Unit>,
    /// Directory the provider extracted for this unit, removed on release.
    pub resources: Option<PathBuf>,
}

impl LoadedUnit {
    pub fn new(id: impl Into<UnitId>, unit: Box<dyn Unit>) -> Self {
        Self {
            id: id.into(),
            unit,
            resources: None,
        }
    }

    pub fn with_resources(mut self, dir: impl Into<PathBuf>) -> Self {
        self.resources = Some(dir.into());
        self
    }
}

impl fmt::Debug for LoadedUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedUnit")
            .field("id", &self.id)
            .field("resources", &self.resources)
            .finish_non_exhaustive()
    }
}

/// Produces ready-to-use units from an implementation identifier.
pub trait UnitProvider {
    fn provision(&self, source: &str, instance: UnitId) -> Result<LoadedUnit>;
}
