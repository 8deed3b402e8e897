//! Commits a resolution into the module registry.

use crate::candidate::{ModuleCandidate, Origin};
use crate::metadata::{Environment, ModuleMetadata};
use crate::resolver::ResolutionResult;
use crate::version::Version;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, thiserror::Error)]
pub enum MaterializeError {
    #[error("duplicate mod `{id}`: {incoming_module} at {incoming_origin} collides with {existing_module} at {existing_origin}")]
    DuplicateIdentity {
        id: String,
        existing_module: String,
        existing_origin: Origin,
        incoming_module: String,
        incoming_origin: Origin,
    },

    #[error("alias `{alias}` provided by {incoming_module} at {incoming_origin} collides with {existing_module} at {existing_origin}")]
    DuplicateAlias {
        alias: String,
        existing_module: String,
        existing_origin: Origin,
        incoming_module: String,
        incoming_origin: Origin,
    },
}

/// A committed, runtime-visible module.
#[derive(Debug, Clone, PartialEq)]
pub struct Module {
    metadata: Arc<ModuleMetadata>,
    origin: Origin,
}

impl Module {
    pub fn new(metadata: Arc<ModuleMetadata>, origin: Origin) -> Self {
        Self { metadata, origin }
    }

    fn from_candidate(candidate: &ModuleCandidate) -> Self {
        Self::new(candidate.shared_metadata(), candidate.origin().clone())
    }

    pub fn id(&self) -> &str {
        self.metadata.id()
    }

    pub fn version(&self) -> &Version {
        self.metadata.version()
    }

    pub fn metadata(&self) -> &ModuleMetadata {
        &self.metadata
    }

    pub fn origin(&self) -> &Origin {
        &self.origin
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.id(), self.version())
    }
}

/// Order in which committed modules are registered and iterated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadOrder {
    /// Resolution-decision order.
    #[default]
    Resolution,
    /// Sorted by identity, for reproducible runs.
    Alphabetical,
}

impl FromStr for LoadOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "resolution" => Ok(LoadOrder::Resolution),
            "alphabetical" => Ok(LoadOrder::Alphabetical),
            other => Err(format!("unknown load order `{other}`")),
        }
    }
}

/// The committed load set: identity and alias keys mapped to modules.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModuleRegistry {
    modules: Vec<Arc<Module>>,
    index: HashMap<String, usize>,
    not_applicable: Vec<Arc<Module>>,
}

impl ModuleRegistry {
    /// Looks up a module by identity or provided alias.
    pub fn get(&self, id: &str) -> Option<&Arc<Module>> {
        self.index.get(id).map(|&index| &self.modules[index])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Modules in insertion order.
    pub fn modules(&self) -> &[Arc<Module>] {
        &self.modules
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.modules.iter().map(|module| module.id())
    }

    /// Resolved modules dropped because they do not apply to the environment.
    pub fn not_applicable(&self) -> &[Arc<Module>] {
        &self.not_applicable
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    fn insert(&mut self, module: Arc<Module>) -> Result<(), MaterializeError> {
        let slot = self.modules.len();

        if let Some(existing) = self.get(module.id()) {
            return Err(MaterializeError::DuplicateIdentity {
                id: module.id().to_string(),
                existing_module: existing.id().to_string(),
                existing_origin: existing.origin().clone(),
                incoming_module: module.id().to_string(),
                incoming_origin: module.origin().clone(),
            });
        }
        self.index.insert(module.id().to_string(), slot);

        for alias in module.metadata().provides() {
            match self.index.get(&alias.id) {
                Some(&index) if index == slot => continue,
                None => {}
                Some(&index) => {
                    let existing = &self.modules[index];
                    return Err(MaterializeError::DuplicateAlias {
                        alias: alias.id.clone(),
                        existing_module: existing.id().to_string(),
                        existing_origin: existing.origin().clone(),
                        incoming_module: module.id().to_string(),
                        incoming_origin: module.origin().clone(),
                    });
                }
            }
            self.index.insert(alias.id.clone(), slot);
        }

        self.modules.push(module);
        Ok(())
    }
}

/// Builds the registry for `environment`.
///
/// Works on a private registry and returns it only when every module was
/// inserted, so a collision never leaves a partial registry behind.
pub fn materialize(
    result: &ResolutionResult,
    environment: Environment,
    order: LoadOrder,
) -> Result<ModuleRegistry, MaterializeError> {
    let mut candidates: Vec<&ModuleCandidate> = result.modules().iter().collect();
    if order == LoadOrder::Alphabetical {
        candidates.sort_by(|a, b| a.id().cmp(b.id()));
    }

    let mut registry = ModuleRegistry::default();
    for candidate in candidates {
        let module = Arc::new(Module::from_candidate(candidate));

        if !module.metadata().environment().matches(environment) {
            debug!("Skipping {} at {}: not applicable to the {} environment", module, module.origin(), environment);
            registry.not_applicable.push(module);
            continue;
        }

        check_version_format(&module);
        registry.insert(module)?;
    }
    Ok(registry)
}

fn check_version_format(module: &Module) {
    match module.version() {
        Version::Opaque(raw) => warn!(
            "Mod `{}` ({}) uses the version `{}` which isn't compatible with semantic versioning. \
             Version ranges will not match it and some features may not work",
            module.id(),
            module.origin(),
            raw
        ),
        Version::Semantic(version) if version.component_count() >= 4 => warn!(
            "Mod `{}` ({}) uses the version `{}` which has more than three components. \
             Only the first three are meaningful to most constraints",
            module.id(),
            module.origin(),
            version
        ),
        Version::Semantic(_) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::EnvironmentRestriction;
    use crate::overrides::DependencyOverrides;
    use crate::resolver::Resolver;

    fn resolve(modules: Vec<ModuleMetadata>) -> ResolutionResult {
        let candidates: Vec<ModuleCandidate> = modules
            .into_iter()
            .map(|metadata| {
                let origin = Origin::new(format!("mods/{}.json", metadata.id()));
                ModuleCandidate::new(metadata, origin)
            })
            .collect();
        Resolver::new(&DependencyOverrides::new())
            .resolve_candidates(&candidates)
            .unwrap()
    }

    #[test]
    fn test_aliases_share_the_module_slot() {
        let result = resolve(vec![ModuleMetadata::builder("impl", "1.0.0")
            .provides("api", None)
            .build()
            .unwrap()]);
        let registry = materialize(&result, Environment::Client, LoadOrder::Resolution).unwrap();

        assert_eq!(registry.len(), 1);
        assert!(Arc::ptr_eq(registry.get("api").unwrap(), registry.get("impl").unwrap()));
    }

    #[test]
    fn test_alias_collides_with_declared_identity() {
        let result = resolve(vec![
            ModuleMetadata::builder("a", "1.0.0").provides("lib", None).build().unwrap(),
            ModuleMetadata::builder("lib", "1.0.0").build().unwrap(),
        ]);
        let err = materialize(&result, Environment::Server, LoadOrder::Resolution).unwrap_err();

        let message = err.to_string();
        assert!(message.contains("mods/a.json"), "{message}");
        assert!(message.contains("mods/lib.json"), "{message}");
    }

    #[test]
    fn test_environment_filter_and_order() {
        let result = resolve(vec![
            ModuleMetadata::builder("zeta", "1.0.0").build().unwrap(),
            ModuleMetadata::builder("client-ui", "1.0.0")
                .environment(EnvironmentRestriction::ClientOnly)
                .build()
                .unwrap(),
            ModuleMetadata::builder("alpha", "1.0.0").build().unwrap(),
        ]);

        let server = materialize(&result, Environment::Server, LoadOrder::Resolution).unwrap();
        assert_eq!(server.ids().collect::<Vec<_>>(), vec!["zeta", "alpha"]);
        assert_eq!(server.not_applicable()[0].id(), "client-ui");
        assert!(!server.contains("client-ui"));

        let sorted = materialize(&result, Environment::Client, LoadOrder::Alphabetical).unwrap();
        assert_eq!(sorted.ids().collect::<Vec<_>>(), vec!["alpha", "client-ui", "zeta"]);
    }

    #[test]
    fn test_load_order_parse() {
        assert_eq!("Alphabetical".parse::<LoadOrder>(), Ok(LoadOrder::Alphabetical));
        assert!("random".parse::<LoadOrder>().is_err());
    }
}
