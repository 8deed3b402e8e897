//! On-disk module descriptors (`mod.json`).
//!
//! ```json
//! {
//!   "id": "example",
//!   "version": "1.4.0",
//!   "environment": "*",
//!   "depends": { "lib": ">=1.2", "other": ["1.x", "2.x"] },
//!   "breaks": { "old-example": "*" },
//!   "provides": ["example-api", { "id": "legacy", "version": "0.9.0" }],
//!   "entrypoints": {
//!     "init": ["example::Init", { "adapter": "scripted", "value": "init.lua" }]
//!   },
//!   "language_adapters": { "scripted": "example::ScriptAdapter" }
//! }
//! ```

use crate::candidate::{ModuleCandidate, Origin};
use crate::metadata::{
    EnvironmentRestriction, ModuleMetadata, ParseError, RelationKind, DEFAULT_ADAPTER,
};
use crate::version::{VersionConstraint, VersionError};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

/// A constraint written as one string or as a list of alternatives.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ConstraintSpec {
    One(String),
    AnyOf(Vec<String>),
}

impl ConstraintSpec {
    pub fn to_constraint(&self) -> Result<VersionConstraint, VersionError> {
        match self {
            ConstraintSpec::One(value) => VersionConstraint::parse(value),
            ConstraintSpec::AnyOf(values) => VersionConstraint::any_of(values),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum ProvidesSpec {
    Id(String),
    Full { id: String, version: Option<String> },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum EntrypointSpec {
    Value(String),
    Full { adapter: Option<String>, value: String },
}

/// Raw descriptor as deserialized. Unknown fields are ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct ModDescriptor {
    pub id: String,
    pub version: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub environment: Option<String>,
    #[serde(default)]
    depends: BTreeMap<String, ConstraintSpec>,
    #[serde(default)]
    recommends: BTreeMap<String, ConstraintSpec>,
    #[serde(default)]
    conflicts: BTreeMap<String, ConstraintSpec>,
    #[serde(default)]
    breaks: BTreeMap<String, ConstraintSpec>,
    #[serde(default)]
    provides: Vec<ProvidesSpec>,
    #[serde(default)]
    entrypoints: BTreeMap<String, Vec<EntrypointSpec>>,
    #[serde(default, alias = "languageAdapters")]
    language_adapters: BTreeMap<String, String>,
    #[serde(default)]
    initializers: Vec<String>,
    #[serde(default)]
    legacy_adapter: Option<String>,
}

impl ModDescriptor {
    pub fn from_json(json: &str, origin: &Origin) -> Result<Self, ParseError> {
        serde_json::from_str(json).map_err(|source| ParseError::Json {
            origin: origin.to_string(),
            source,
        })
    }

    pub fn into_metadata(self) -> Result<ModuleMetadata, ParseError> {
        let environment = match self.environment.as_deref() {
            None => EnvironmentRestriction::Universal,
            Some(value) => EnvironmentRestriction::parse(value).ok_or_else(|| {
                ParseError::InvalidEnvironment {
                    id: self.id.clone(),
                    value: value.to_string(),
                }
            })?,
        };

        let mut builder = ModuleMetadata::builder(self.id.clone(), &self.version).environment(environment);
        if let Some(name) = self.name {
            builder = builder.name(name);
        }

        for (kind, relations) in [
            (RelationKind::Depends, &self.depends),
            (RelationKind::Recommends, &self.recommends),
            (RelationKind::Conflicts, &self.conflicts),
            (RelationKind::Breaks, &self.breaks),
        ] {
            for (target, spec) in relations {
                let constraint = spec.to_constraint().map_err(|source| ParseError::InvalidConstraint {
                    id: self.id.clone(),
                    target: target.clone(),
                    source,
                })?;
                builder = builder.relation(kind, target, constraint.as_str());
            }
        }

        for provided in &self.provides {
            builder = match provided {
                ProvidesSpec::Id(id) => builder.provides(id, None),
                ProvidesSpec::Full { id, version } => builder.provides(id, version.as_deref()),
            };
        }

        for (phase_key, entries) in &self.entrypoints {
            for entry in entries {
                builder = match entry {
                    EntrypointSpec::Value(value) => builder.entrypoint(phase_key, DEFAULT_ADAPTER, value),
                    EntrypointSpec::Full { adapter, value } => builder.entrypoint(
                        phase_key,
                        adapter.as_deref().unwrap_or(DEFAULT_ADAPTER),
                        value,
                    ),
                };
            }
        }

        for (name, implementation) in &self.language_adapters {
            builder = builder.adapter(name, implementation);
        }

        for initializer in &self.initializers {
            builder = builder.legacy_initializer(initializer);
        }
        if let Some(adapter) = &self.legacy_adapter {
            builder = builder.legacy_adapter(adapter);
        }

        builder.build()
    }
}

/// Parses a descriptor into a candidate located at `origin`.
pub fn parse_candidate(json: &str, origin: Origin) -> Result<ModuleCandidate, ParseError> {
    let metadata = ModDescriptor::from_json(json, &origin)?
        .into_metadata()
        .map_err(|source| ParseError::AtOrigin {
            origin: origin.to_string(),
            source: Box::new(source),
        })?;
    Ok(ModuleCandidate::new(metadata, origin))
}

/// Reads and parses the descriptor file at `path`.
pub fn read_candidate(path: &Path) -> Result<ModuleCandidate, ParseError> {
    let json = std::fs::read_to_string(path).map_err(|source| ParseError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_candidate(&json, Origin::new(path.display().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version::Version;

    const FULL: &str = r#"{
        "id": "example",
        "version": "1.4.0",
        "name": "Example",
        "environment": "client",
        "depends": { "lib": ">=1.2", "other": ["1.x", "2.x"] },
        "recommends": { "extras": "*" },
        "breaks": { "old-example": "*" },
        "provides": ["example-api", { "id": "legacy", "version": "0.9.0" }],
        "entrypoints": {
            "init": ["example::Init", { "adapter": "scripted", "value": "init.lua" }]
        },
        "languageAdapters": { "scripted": "example::ScriptAdapter" },
        "initializers": ["example::OldInit"],
        "custom": { "ignored": true }
    }"#;

    #[test]
    fn test_full_descriptor() {
        let candidate = parse_candidate(FULL, Origin::new("mods/example.json")).unwrap();
        let meta = candidate.metadata();

        assert_eq!(meta.id(), "example");
        assert_eq!(meta.name(), "Example");
        assert_eq!(meta.environment(), EnvironmentRestriction::ClientOnly);
        assert_eq!(meta.depends().len(), 2);
        assert_eq!(meta.depends()[1].constraint.as_str(), "1.x || 2.x");
        assert_eq!(meta.recommends()[0].target, "extras");
        assert_eq!(meta.provides()[0].version, Version::parse("1.4.0"));
        assert_eq!(meta.provides()[1].version, Version::parse("0.9.0"));
        assert_eq!(meta.entrypoints().len(), 2);
        assert_eq!(meta.entrypoints()[1].adapter, "scripted");
        assert_eq!(meta.adapters()["scripted"], "example::ScriptAdapter");
        assert_eq!(meta.legacy_initializers(), ["example::OldInit".to_string()]);
        assert_eq!(candidate.origin().as_str(), "mods/example.json");
    }

    #[test]
    fn test_minimal_descriptor_defaults() {
        let candidate = parse_candidate(r#"{"id": "tiny", "version": "snapshot"}"#, Origin::new("x")).unwrap();
        assert_eq!(candidate.metadata().environment(), EnvironmentRestriction::Universal);
        assert!(!candidate.metadata().version().is_semantic());
        assert_eq!(candidate.metadata().legacy_adapter(), DEFAULT_ADAPTER);
    }

    #[test]
    fn test_malformed_json() {
        let err = parse_candidate("{ not json", Origin::new("broken.json")).unwrap_err();
        assert!(matches!(err, ParseError::Json { ref origin, .. } if origin == "broken.json"));
    }

    #[test]
    fn test_bad_environment_and_constraint_name_origin() {
        let err = parse_candidate(
            r#"{"id": "x", "version": "1.0.0", "environment": "toaster"}"#,
            Origin::new("x.json"),
        )
        .unwrap_err();
        assert!(err.to_string().contains("x.json"));

        let err = parse_candidate(
            r#"{"id": "x", "version": "1.0.0", "depends": {"y": ">="}}"#,
            Origin::new("x.json"),
        )
        .unwrap_err();
        match err {
            ParseError::AtOrigin { source, .. } => {
                assert!(matches!(*source, ParseError::InvalidConstraint { .. }))
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
