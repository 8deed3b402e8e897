//! Module loader for plugin ecosystems.
//!
//! Discovers module candidates, resolves their dependencies into one
//! deterministic load set, commits it into a [`ModuleRegistry`] and
//! dispatches declared entrypoints lazily through named language adapters.
//!
//! ```text
//! CandidatePool -> Resolver -> materialize -> AdapterRegistry -> EntrypointStorage
//! ```
//!
//! [`LoaderContext`] wires the stages together with a load-once, freeze-once
//! lifecycle. Each stage is also usable on its own.

pub mod adapter;
pub mod candidate;
pub mod config;
pub mod context;
pub mod descriptor;
pub mod discovery;
pub mod entrypoint;
pub mod materialize;
pub mod metadata;
pub mod overrides;
pub mod resolver;
pub mod status;
pub mod version;

pub use adapter::{
    AdapterError, AdapterRegistry, BoxError, DefaultAdapter, Hook, HookCatalog, LanguageAdapter,
};
pub use candidate::{CandidatePool, ModuleCandidate, Origin, SourceId};
pub use config::LoaderConfig;
pub use context::{LoadReport, LoaderContext, LoaderError};
pub use descriptor::{parse_candidate, read_candidate, ModDescriptor};
pub use discovery::{
    discover_all, CandidateFinder, DirectoryCandidateFinder, DiscoveryError, StaticCandidateFinder,
};
pub use entrypoint::{
    EntrypointContainer, EntrypointError, EntrypointSlot, EntrypointStorage, SlotStatus,
    LEGACY_PHASE_KEY,
};
pub use materialize::{materialize, LoadOrder, MaterializeError, Module, ModuleRegistry};
pub use metadata::{
    Dependency, EntrypointDeclaration, Environment, EnvironmentRestriction, ModuleMetadata,
    ParseError, ProvidedAlias, RelationKind, DEFAULT_ADAPTER,
};
pub use overrides::{DependencyOverrides, OverrideError};
pub use resolver::{
    ResolutionError, ResolutionFailure, ResolutionResult, ResolutionWarning, Resolver,
};
pub use status::{StatusTree, WarningLevel};
pub use version::{SemanticVersion, Version, VersionConstraint, VersionError};
