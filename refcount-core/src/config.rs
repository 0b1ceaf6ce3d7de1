use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Which families of predefined summaries (spec §4.8) are seeded into a
/// fresh summary base.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PredefinedFamilies {
    pub kref: bool,
    pub dpm: bool,
    pub ffs: bool,
    pub py: bool,
}

impl PredefinedFamilies {
    pub fn all() -> Self {
        Self {
            kref: true,
            dpm: true,
            ffs: true,
            py: true,
        }
    }

    pub fn none() -> Self {
        Self::default()
    }
}

/// Every knob spec §6 "Configuration (enumerated)" lists. This is plain
/// data, not a CLI parser — flag parsing is the driver's job and out of
/// scope here.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    pub max_path_per_func: usize,
    pub max_subcase_per_path: usize,
    pub force_exclude: bool,
    pub predefined: PredefinedFamilies,
    pub blacklist: Option<PathBuf>,
    pub sensilist: Option<PathBuf>,
    pub i_cache: Option<PathBuf>,
    pub o_cache: Option<PathBuf>,
    pub prefix: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_path_per_func: 100,
            max_subcase_per_path: 10,
            force_exclude: true,
            predefined: PredefinedFamilies::default(),
            blacklist: None,
            sensilist: None,
            i_cache: None,
            o_cache: None,
            prefix: None,
        }
    }
}
