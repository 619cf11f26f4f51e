//! Provider for the built-in virtual units

use std::fs;
use std::path::{Path, PathBuf};

use cosim_runtime::{Error, LoadedUnit, Result, Unit, UnitId, UnitProvider};
use tracing::{debug, instrument};

use crate::msd::{msd1_unit, msd2_unit};

/// Provisions units by model name: `msd1` or `msd2`.
///
/// With a staging root, each instance gets its own directory under it
/// holding a variable listing. The directory is attached to the loaded unit
/// and removed when the unit set is released.
#[derive(Debug, Clone, Default)]
pub struct VirtualProvider {
    staging: Option<PathBuf>,
}

impl VirtualProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn staged_in(root: impl Into<PathBuf>) -> Self {
        Self {
            staging: Some(root.into()),
        }
    }

    pub fn models() -> &'static [&'static str] {
        &["msd1", "msd2"]
    }
}

fn variables(model: &str) -> &'static [&'static str] {
    match model {
        "msd1" => &["x", "v", "m", "c", "cf", "fe"],
        _ => &["x", "v", "m", "c", "cf", "ce", "cef", "fe", "xe", "ve"],
    }
}

fn stage(root: &Path, model: &str, instance: &UnitId) -> std::io::Result<PathBuf> {
    let dir = root.join(&instance.0);
    fs::create_dir_all(&dir)?;
    let listing: String = variables(model)
        .iter()
        .enumerate()
        .map(|(vref, name)| format!("{vref} {name}\n"))
        .collect();
    fs::write(dir.join("variables.txt"), listing)?;
    Ok(dir)
}

impl UnitProvider for VirtualProvider {
    #[instrument(skip(self), name = "virtual.provision")]
    fn provision(&self, source: &str, instance: UnitId) -> Result<LoadedUnit> {
        let unit: Box<dyn Unit> = match source {
            "msd1" => Box::new(msd1_unit(instance.clone())),
            "msd2" => Box::new(msd2_unit(instance.clone())),
            other => {
                return Err(Error::Provision {
                    origin: other.to_string(),
                    reason: format!("no virtual model named '{other}'"),
                });
            }
        };

        let mut loaded = LoadedUnit::new(instance, unit);
        if let Some(root) = &self.staging {
            let dir = stage(root, source, &loaded.id).map_err(|err| Error::Provision {
                origin: source.to_string(),
                reason: err.to_string(),
            })?;
            debug!(dir = %dir.display(), "staged unit resources");
            loaded = loaded.with_resources(dir);
        }
        Ok(loaded)
    }
}
