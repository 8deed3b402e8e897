//! Immutable module metadata.
//!
//! A [`ModuleMetadata`] is built once from a parsed descriptor and never
//! mutated afterwards. The few places that need a changed copy (dependency
//! overrides, version replacement) use the consuming `with_*` functions, which
//! return a new value.

use crate::version::{Version, VersionConstraint, VersionError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Adapter name every loader provides.
pub const DEFAULT_ADAPTER: &str = "default";

/// Errors raised while turning a descriptor into [`ModuleMetadata`].
///
/// These are per-candidate: the candidate is dropped from the pool and the
/// error is reported, but discovery continues.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("failed to read descriptor {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed descriptor at {origin}: {source}")]
    Json {
        origin: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid module id `{id}`: {reason}")]
    InvalidId { id: String, reason: String },

    #[error("module `{id}` declares an invalid constraint for `{target}`: {source}")]
    InvalidConstraint {
        id: String,
        target: String,
        #[source]
        source: VersionError,
    },

    #[error("module `{id}` declares unknown environment `{value}`")]
    InvalidEnvironment { id: String, value: String },

    #[error("descriptor at {origin}: {source}")]
    AtOrigin {
        origin: String,
        #[source]
        source: Box<ParseError>,
    },
}

// ============================================================================
// Environment
// ============================================================================

/// The side the host is currently running as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Client,
    Server,
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "client" => Ok(Environment::Client),
            "server" | "dedicated_server" => Ok(Environment::Server),
            other => Err(format!("unknown environment `{other}`")),
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Environment::Client => f.write_str("client"),
            Environment::Server => f.write_str("server"),
        }
    }
}

/// Where a module may be loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum EnvironmentRestriction {
    #[default]
    Universal,
    ClientOnly,
    ServerOnly,
}

impl EnvironmentRestriction {
    pub fn matches(self, environment: Environment) -> bool {
        match self {
            EnvironmentRestriction::Universal => true,
            EnvironmentRestriction::ClientOnly => environment == Environment::Client,
            EnvironmentRestriction::ServerOnly => environment == Environment::Server,
        }
    }

    /// Parses the descriptor spelling: `*`, `client` or `server`.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "" | "*" => Some(EnvironmentRestriction::Universal),
            other => other.parse::<Environment>().ok().map(|env| match env {
                Environment::Client => EnvironmentRestriction::ClientOnly,
                Environment::Server => EnvironmentRestriction::ServerOnly,
            }),
        }
    }
}

// ============================================================================
// Declarations
// ============================================================================

/// A relation to another module: `depends`, `breaks`, `recommends` or `conflicts`.
#[derive(Debug, Clone, PartialEq)]
pub struct Dependency {
    pub target: String,
    pub constraint: VersionConstraint,
}

impl Dependency {
    pub fn new(target: impl Into<String>, constraint: VersionConstraint) -> Self {
        Self {
            target: target.into(),
            constraint,
        }
    }
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.target, self.constraint)
    }
}

/// The four relation lists a module can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RelationKind {
    Depends,
    Recommends,
    Conflicts,
    Breaks,
}

impl RelationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RelationKind::Depends => "depends",
            RelationKind::Recommends => "recommends",
            RelationKind::Conflicts => "conflicts",
            RelationKind::Breaks => "breaks",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        match key {
            "depends" => Some(RelationKind::Depends),
            "recommends" => Some(RelationKind::Recommends),
            "conflicts" => Some(RelationKind::Conflicts),
            "breaks" => Some(RelationKind::Breaks),
            _ => None,
        }
    }
}

/// An additional identity the module satisfies.
#[derive(Debug, Clone, PartialEq)]
pub struct ProvidedAlias {
    pub id: String,
    pub version: Version,
}

/// One declared hook: phase key, adapter name and loadable descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntrypointDeclaration {
    pub phase_key: String,
    pub adapter: String,
    pub value: String,
}

// ============================================================================
// Module metadata
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct ModuleMetadata {
    id: String,
    version: Version,
    name: Option<String>,
    depends: Vec<Dependency>,
    recommends: Vec<Dependency>,
    conflicts: Vec<Dependency>,
    breaks: Vec<Dependency>,
    provides: Vec<ProvidedAlias>,
    entrypoints: Vec<EntrypointDeclaration>,
    adapters: BTreeMap<String, String>,
    environment: EnvironmentRestriction,
    legacy_initializers: Vec<String>,
    legacy_adapter: String,
}

impl ModuleMetadata {
    /// Starts a builder for module `id` at `version`.
    pub fn builder(id: impl Into<String>, version: &str) -> ModuleMetadataBuilder {
        ModuleMetadataBuilder::new(id.into(), Version::parse(version))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn version(&self) -> &Version {
        &self.version
    }

    /// Human-readable name, falling back to the id.
    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }

    pub fn depends(&self) -> &[Dependency] {
        &self.depends
    }

    pub fn recommends(&self) -> &[Dependency] {
        &self.recommends
    }

    pub fn conflicts(&self) -> &[Dependency] {
        &self.conflicts
    }

    pub fn breaks(&self) -> &[Dependency] {
        &self.breaks
    }

    pub fn relations(&self, kind: RelationKind) -> &[Dependency] {
        match kind {
            RelationKind::Depends => &self.depends,
            RelationKind::Recommends => &self.recommends,
            RelationKind::Conflicts => &self.conflicts,
            RelationKind::Breaks => &self.breaks,
        }
    }

    pub fn provides(&self) -> &[ProvidedAlias] {
        &self.provides
    }

    /// All declared entrypoints in declaration order.
    pub fn entrypoints(&self) -> &[EntrypointDeclaration] {
        &self.entrypoints
    }

    /// Distinct phase keys in first-declaration order.
    pub fn entrypoint_keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = Vec::new();
        for decl in &self.entrypoints {
            if !keys.contains(&decl.phase_key.as_str()) {
                keys.push(&decl.phase_key);
            }
        }
        keys
    }

    /// Adapters this module contributes: name to implementation descriptor.
    pub fn adapters(&self) -> &BTreeMap<String, String> {
        &self.adapters
    }

    pub fn environment(&self) -> EnvironmentRestriction {
        self.environment
    }

    pub fn legacy_initializers(&self) -> &[String] {
        &self.legacy_initializers
    }

    pub fn legacy_adapter(&self) -> &str {
        &self.legacy_adapter
    }

    pub fn with_version(self, version: Version) -> Self {
        Self { version, ..self }
    }

    pub fn with_relations(mut self, kind: RelationKind, relations: Vec<Dependency>) -> Self {
        match kind {
            RelationKind::Depends => self.depends = relations,
            RelationKind::Recommends => self.recommends = relations,
            RelationKind::Conflicts => self.conflicts = relations,
            RelationKind::Breaks => self.breaks = relations,
        }
        self
    }
}

/// Builder for [`ModuleMetadata`].
///
/// Constraint strings are parsed as they are added; the first failure is
/// returned from [`build`](Self::build).
#[derive(Debug)]
pub struct ModuleMetadataBuilder {
    metadata: ModuleMetadata,
    error: Option<ParseError>,
}

impl ModuleMetadataBuilder {
    fn new(id: String, version: Version) -> Self {
        Self {
            metadata: ModuleMetadata {
                id,
                version,
                name: None,
                depends: Vec::new(),
                recommends: Vec::new(),
                conflicts: Vec::new(),
                breaks: Vec::new(),
                provides: Vec::new(),
                entrypoints: Vec::new(),
                adapters: BTreeMap::new(),
                environment: EnvironmentRestriction::Universal,
                legacy_initializers: Vec::new(),
                legacy_adapter: DEFAULT_ADAPTER.to_string(),
            },
            error: None,
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.metadata.name = Some(name.into());
        self
    }

    pub fn relation(mut self, kind: RelationKind, target: &str, constraint: &str) -> Self {
        match VersionConstraint::parse(constraint) {
            Ok(constraint) => {
                let dependency = Dependency::new(target, constraint);
                match kind {
                    RelationKind::Depends => self.metadata.depends.push(dependency),
                    RelationKind::Recommends => self.metadata.recommends.push(dependency),
                    RelationKind::Conflicts => self.metadata.conflicts.push(dependency),
                    RelationKind::Breaks => self.metadata.breaks.push(dependency),
                }
            }
            Err(source) => {
                self.error.get_or_insert(ParseError::InvalidConstraint {
                    id: self.metadata.id.clone(),
                    target: target.to_string(),
                    source,
                });
            }
        }
        self
    }

    pub fn depends(self, target: &str, constraint: &str) -> Self {
        self.relation(RelationKind::Depends, target, constraint)
    }

    pub fn breaks(self, target: &str, constraint: &str) -> Self {
        self.relation(RelationKind::Breaks, target, constraint)
    }

    pub fn recommends(self, target: &str, constraint: &str) -> Self {
        self.relation(RelationKind::Recommends, target, constraint)
    }

    pub fn conflicts(self, target: &str, constraint: &str) -> Self {
        self.relation(RelationKind::Conflicts, target, constraint)
    }

    /// Declares an alias. Without an explicit version the alias carries the
    /// module's own version.
    pub fn provides(mut self, alias: &str, version: Option<&str>) -> Self {
        let version = version
            .map(Version::parse)
            .unwrap_or_else(|| self.metadata.version.clone());
        self.metadata.provides.push(ProvidedAlias {
            id: alias.to_string(),
            version,
        });
        self
    }

    pub fn entrypoint(mut self, phase_key: &str, adapter: &str, value: &str) -> Self {
        self.metadata.entrypoints.push(EntrypointDeclaration {
            phase_key: phase_key.to_string(),
            adapter: adapter.to_string(),
            value: value.to_string(),
        });
        self
    }

    pub fn adapter(mut self, name: &str, implementation: &str) -> Self {
        self.metadata
            .adapters
            .insert(name.to_string(), implementation.to_string());
        self
    }

    pub fn environment(mut self, environment: EnvironmentRestriction) -> Self {
        self.metadata.environment = environment;
        self
    }

    pub fn legacy_initializer(mut self, value: &str) -> Self {
        self.metadata.legacy_initializers.push(value.to_string());
        self
    }

    pub fn legacy_adapter(mut self, adapter: &str) -> Self {
        self.metadata.legacy_adapter = adapter.to_string();
        self
    }

    pub fn build(self) -> Result<ModuleMetadata, ParseError> {
        if let Some(error) = self.error {
            return Err(error);
        }
        validate_id(&self.metadata.id)?;
        for alias in &self.metadata.provides {
            validate_id(&alias.id)?;
        }
        Ok(self.metadata)
    }
}

fn validate_id(id: &str) -> Result<(), ParseError> {
    let reason = if id.is_empty() {
        "id is empty"
    } else if id.chars().any(char::is_whitespace) {
        "id contains whitespace"
    } else {
        return Ok(());
    };
    Err(ParseError::InvalidId {
        id: id.to_string(),
        reason: reason.to_string(),
    })
}
