//! Externally supplied dependency overrides.
//!
//! The override file maps a module id to edits of its relation lists:
//!
//! ```json
//! {
//!   "version": 1,
//!   "overrides": {
//!     "mod-a": {
//!       "+depends": { "extra": ">=1.0" },
//!       "-depends": { "lib": "*" },
//!       "breaks":   { "old": "<2.0" }
//!     }
//!   }
//! }
//! ```
//!
//! `+kind` adds a relation, `-kind` removes every relation on that target,
//! and a bare `kind` replaces the constraint on that target (adding it when
//! the module did not declare one).
//!
//! JSON objects are unordered, so edits from a file are applied in a fixed
//! order per module: every removal first, then additions, then
//! replacements. A `-depends` and `+depends` on the same target therefore
//! swaps the declared constraint for the added one.

use crate::descriptor::ConstraintSpec;
use crate::metadata::{Dependency, ModuleMetadata, RelationKind};
use crate::version::{VersionConstraint, VersionError};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const SUPPORTED_FORMAT: u32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum OverrideError {
    #[error("failed to read dependency overrides {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed dependency overrides: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unsupported dependency override format version {0}")]
    UnsupportedVersion(u32),

    #[error("unknown override key `{key}` for module `{module}`")]
    UnknownKey { module: String, key: String },

    #[error("invalid override constraint for `{module}` -> `{target}`: {source}")]
    Constraint {
        module: String,
        target: String,
        #[source]
        source: VersionError,
    },
}

/// One edit applied to a module's relation list.
#[derive(Debug, Clone, PartialEq)]
pub enum OverrideOp {
    Add(RelationKind, Dependency),
    Remove(RelationKind, String),
    Replace(RelationKind, Dependency),
}

#[derive(Debug, Deserialize)]
struct OverrideFile {
    version: u32,
    #[serde(default)]
    overrides: BTreeMap<String, BTreeMap<String, BTreeMap<String, ConstraintSpec>>>,
}

/// Dependency overrides keyed by module id. Empty by default.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DependencyOverrides {
    overrides: BTreeMap<String, Vec<OverrideOp>>,
}

impl DependencyOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, OverrideError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| OverrideError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }

    pub fn parse(json: &str) -> Result<Self, OverrideError> {
        let file: OverrideFile = serde_json::from_str(json)?;
        if file.version != SUPPORTED_FORMAT {
            return Err(OverrideError::UnsupportedVersion(file.version));
        }

        let mut result = Self::default();
        for (module, edits) in file.overrides {
            let mut removals = Vec::new();
            let mut additions = Vec::new();
            let mut replacements = Vec::new();

            for (key, targets) in edits {
                let (prefix, kind_key) = match key.chars().next() {
                    Some(c @ ('+' | '-')) => (Some(c), &key[1..]),
                    _ => (None, key.as_str()),
                };
                let kind = RelationKind::from_key(kind_key).ok_or_else(|| OverrideError::UnknownKey {
                    module: module.clone(),
                    key: key.clone(),
                })?;

                for (target, spec) in targets {
                    match prefix {
                        Some('-') => removals.push(OverrideOp::Remove(kind, target)),
                        _ => {
                            let constraint = spec.to_constraint().map_err(|source| {
                                OverrideError::Constraint {
                                    module: module.clone(),
                                    target: target.clone(),
                                    source,
                                }
                            })?;
                            let dependency = Dependency::new(target, constraint);
                            if prefix == Some('+') {
                                additions.push(OverrideOp::Add(kind, dependency));
                            } else {
                                replacements.push(OverrideOp::Replace(kind, dependency));
                            }
                        }
                    }
                }
            }

            for op in removals.into_iter().chain(additions).chain(replacements) {
                result.push(&module, op);
            }
        }
        Ok(result)
    }

    pub fn push(&mut self, module: &str, op: OverrideOp) {
        self.overrides.entry(module.to_string()).or_default().push(op);
    }

    /// Replaces the constraint on `target` in `module`'s dependency list.
    pub fn replace_dependency(&mut self, module: &str, target: &str, constraint: VersionConstraint) {
        self.push(
            module,
            OverrideOp::Replace(RelationKind::Depends, Dependency::new(target, constraint)),
        );
    }

    pub fn is_empty(&self) -> bool {
        self.overrides.is_empty()
    }

    pub fn len(&self) -> usize {
        self.overrides.len()
    }

    /// Ids of modules that have overrides, sorted.
    pub fn module_ids(&self) -> impl Iterator<Item = &str> {
        self.overrides.keys().map(String::as_str)
    }

    /// Applies the overrides for `metadata`'s module, if any.
    ///
    /// Returns `None` when nothing applies so callers can keep sharing the
    /// original value.
    pub fn apply(&self, metadata: &ModuleMetadata) -> Option<ModuleMetadata> {
        let ops = self.overrides.get(metadata.id())?;
        let mut result = metadata.clone();

        for op in ops {
            let kind = match op {
                OverrideOp::Add(kind, _) | OverrideOp::Remove(kind, _) | OverrideOp::Replace(kind, _) => *kind,
            };
            let mut relations = result.relations(kind).to_vec();

            match op {
                OverrideOp::Add(_, dependency) => relations.push(dependency.clone()),
                OverrideOp::Remove(_, target) => relations.retain(|d| &d.target != target),
                OverrideOp::Replace(_, dependency) => {
                    let mut replaced = false;
                    for existing in relations.iter_mut().filter(|d| d.target == dependency.target) {
                        existing.constraint = dependency.constraint.clone();
                        replaced = true;
                    }
                    if !replaced {
                        relations.push(dependency.clone());
                    }
                }
            }

            debug!(module = metadata.id(), ?op, "Applied dependency override");
            result = result.with_relations(kind, relations);
        }

        info!(
            "Dependencies overridden for \"{}\" ({} edit(s))",
            metadata.id(),
            ops.len()
        );
        Some(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn module() -> ModuleMetadata {
        ModuleMetadata::builder("mod-a", "1.0.0")
            .depends("lib", ">=2.0")
            .depends("other", "*")
            .build()
            .unwrap()
    }

    #[test]
    fn test_parse_and_apply_file() {
        let overrides = DependencyOverrides::parse(
            r#"{
                "version": 1,
                "overrides": {
                    "mod-a": {
                        "+depends": { "extra": ">=1.0" },
                        "-depends": { "other": "*" },
                        "depends": { "lib": ["<1.0", ">=1.5"] },
                        "+breaks": { "evil": "*" }
                    }
                }
            }"#,
        )
        .unwrap();

        let applied = overrides.apply(&module()).unwrap();
        let targets: Vec<&str> = applied.depends().iter().map(|d| d.target.as_str()).collect();
        assert_eq!(targets, vec!["lib", "extra"]);
        assert_eq!(applied.depends()[0].constraint.as_str(), "<1.0 || >=1.5");
        assert_eq!(applied.breaks()[0].target, "evil");
    }

    #[test]
    fn test_removal_runs_before_addition() {
        let overrides = DependencyOverrides::parse(
            r#"{
                "version": 1,
                "overrides": {
                    "mod-a": {
                        "-depends": { "lib": "*" },
                        "+depends": { "lib": ">=3" }
                    }
                }
            }"#,
        )
        .unwrap();

        let applied = overrides.apply(&module()).unwrap();
        let lib: Vec<&str> = applied
            .depends()
            .iter()
            .filter(|d| d.target == "lib")
            .map(|d| d.constraint.as_str())
            .collect();
        assert_eq!(lib, vec![">=3"]);
    }

    #[test]
    fn test_untouched_module_returns_none() {
        let mut overrides = DependencyOverrides::new();
        overrides.replace_dependency("someone-else", "lib", VersionConstraint::any());
        assert!(overrides.apply(&module()).is_none());
        assert_eq!(overrides.module_ids().collect::<Vec<_>>(), vec!["someone-else"]);
    }

    #[test]
    fn test_replace_inserts_missing_target() {
        let mut overrides = DependencyOverrides::new();
        overrides.replace_dependency("mod-a", "fresh", VersionConstraint::parse("^3").unwrap());
        let applied = overrides.apply(&module()).unwrap();
        assert_eq!(applied.depends().len(), 3);
        assert_eq!(applied.depends()[2].target, "fresh");
    }

    #[test]
    fn test_rejects_unknown_keys_and_versions() {
        assert!(matches!(
            DependencyOverrides::parse(r#"{"version": 1, "overrides": {"a": {"needs": {"b": "*"}}}}"#),
            Err(OverrideError::UnknownKey { .. })
        ));
        assert!(matches!(
            DependencyOverrides::parse(r#"{"version": 2}"#),
            Err(OverrideError::UnsupportedVersion(2))
        ));
        assert!(matches!(
            DependencyOverrides::parse(r#"{"version": 1, "overrides": {"a": {"depends": {"b": ">="}}}}"#),
            Err(OverrideError::Constraint { .. })
        ));
    }
}
