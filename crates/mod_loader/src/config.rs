//! Loader settings and debug switches.

use crate::materialize::LoadOrder;
use crate::metadata::Environment;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Settings consumed by [`LoaderContext`](crate::LoaderContext).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    pub environment: Environment,
    /// Extra debug logging of per-candidate decisions.
    pub development: bool,
    /// Let the first entrypoint failure escape instead of aggregating.
    pub throw_directly: bool,
    pub load_order: LoadOrder,
    /// Module id to the version that replaces its declared one.
    pub replace_versions: BTreeMap<String, String>,
    /// Modules excluded from selection.
    pub disabled_mods: BTreeSet<String>,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            environment: Environment::Client,
            development: false,
            throw_directly: false,
            load_order: LoadOrder::Resolution,
            replace_versions: BTreeMap::new(),
            disabled_mods: BTreeSet::new(),
        }
    }
}

/// Parses `modA:1.0.0,modB:2.0.0` into a replacement map.
pub fn parse_version_replacements(input: &str) -> Result<BTreeMap<String, String>, String> {
    let mut replacements = BTreeMap::new();
    for entry in input.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let (id, version) = entry
            .split_once(':')
            .ok_or_else(|| format!("invalid version replacement `{entry}`, expected id:version"))?;
        let (id, version) = (id.trim(), version.trim());
        if id.is_empty() || version.is_empty() {
            return Err(format!("invalid version replacement `{entry}`, expected id:version"));
        }
        replacements.insert(id.to_string(), version.to_string());
    }
    Ok(replacements)
}

/// Parses a comma separated list of module ids.
pub fn parse_mod_list(input: &str) -> BTreeSet<String> {
    input
        .split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .collect()
}
