//! The loader context: one explicitly constructed object owning the whole
//! lifecycle.
//!
//! 1. [`LoaderContext::load`] discovers, resolves and materializes, then
//!    publishes the registry. Runs at most once.
//! 2. [`LoaderContext::freeze`] registers adapters and populates the
//!    entrypoint table. Runs at most once, after `load`.
//! 3. Queries are read-only from then on.

use crate::adapter::{AdapterError, AdapterRegistry, HookCatalog};
use crate::candidate::{CandidatePool, ModuleCandidate};
use crate::config::LoaderConfig;
use crate::discovery::{discover_all, CandidateFinder, DiscoveryError};
use crate::entrypoint::{EntrypointContainer, EntrypointError, EntrypointStorage};
use crate::materialize::{materialize, MaterializeError, Module, ModuleRegistry};
use crate::metadata::ParseError;
use crate::overrides::DependencyOverrides;
use crate::resolver::{ResolutionError, ResolutionWarning, Resolver};
use crate::status::StatusTree;
use crate::version::Version;
use once_cell::sync::OnceCell;
use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, thiserror::Error)]
pub enum LoaderError {
    #[error("mods have already been loaded")]
    AlreadyLoaded,

    #[error("mods have not been loaded yet")]
    NotLoaded,

    #[error("the loader has already been frozen")]
    AlreadyFrozen,

    #[error("the loader has not been frozen yet")]
    NotFrozen,

    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error(transparent)]
    Materialize(#[from] MaterializeError),

    #[error(transparent)]
    Adapter(#[from] AdapterError),

    #[error(transparent)]
    Entrypoint(#[from] EntrypointError),
}

impl LoaderError {
    /// Renders the failure as a diagnostic tree.
    pub fn to_status_tree(&self) -> StatusTree {
        match self {
            LoaderError::Resolution(e) => e.to_status_tree(),
            LoaderError::Entrypoint(e) => e.to_status_tree(),
            other => StatusTree::from_error("Mod loading failed", other),
        }
    }
}

/// What happened during [`LoaderContext::load`] besides the registry itself.
#[derive(Debug, Default)]
pub struct LoadReport {
    pub candidates: usize,
    pub parse_errors: Vec<ParseError>,
    pub disabled: Vec<String>,
    pub warnings: Vec<ResolutionWarning>,
    pub not_applicable: Vec<String>,
}

#[derive(Debug)]
pub struct LoaderContext {
    config: LoaderConfig,
    overrides: DependencyOverrides,
    load_started: AtomicBool,
    freeze_started: AtomicBool,
    registry: OnceCell<Arc<ModuleRegistry>>,
    adapters: OnceCell<AdapterRegistry>,
    entrypoints: OnceCell<EntrypointStorage>,
}

impl LoaderContext {
    pub fn new(config: LoaderConfig, overrides: DependencyOverrides) -> Self {
        Self {
            config,
            overrides,
            load_started: AtomicBool::new(false),
            freeze_started: AtomicBool::new(false),
            registry: OnceCell::new(),
            adapters: OnceCell::new(),
            entrypoints: OnceCell::new(),
        }
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// Runs every finder, then loads from the collected pool.
    pub fn load(&self, finders: &[&dyn CandidateFinder]) -> Result<LoadReport, LoaderError> {
        self.begin_load()?;
        let pool = CandidatePool::new();
        discover_all(finders, &pool)?;
        self.load_pool(&pool)
    }

    /// Resolves and materializes an already populated pool.
    pub fn load_from_pool(&self, pool: &CandidatePool) -> Result<LoadReport, LoaderError> {
        self.begin_load()?;
        self.load_pool(pool)
    }

    fn begin_load(&self) -> Result<(), LoaderError> {
        if self.load_started.swap(true, Ordering::SeqCst) {
            return Err(LoaderError::AlreadyLoaded);
        }
        Ok(())
    }

    fn load_pool(&self, pool: &CandidatePool) -> Result<LoadReport, LoaderError> {
        let mut report = LoadReport {
            parse_errors: pool.take_parse_errors(),
            ..LoadReport::default()
        };
        for error in &report.parse_errors {
            warn!("Ignoring mod candidate: {}", error);
        }

        let candidates: Vec<ModuleCandidate> = pool
            .candidates()
            .into_iter()
            .map(|candidate| self.apply_debug_settings(candidate, &mut report))
            .collect();
        report.candidates = candidates.len();

        let result = Resolver::new(&self.overrides)
            .with_decision_logging(self.config.development)
            .resolve_candidates(&candidates)?;
        report.warnings = result.warnings().to_vec();

        let registry = materialize(&result, self.config.environment, self.config.load_order)?;
        report.not_applicable = registry
            .not_applicable()
            .iter()
            .map(|module| module.id().to_string())
            .collect();

        log_module_list(&registry);
        self.registry
            .set(Arc::new(registry))
            .map_err(|_| LoaderError::AlreadyLoaded)?;
        Ok(report)
    }

    fn apply_debug_settings(&self, candidate: ModuleCandidate, report: &mut LoadReport) -> ModuleCandidate {
        let mut candidate = candidate;

        if let Some(version) = self.config.replace_versions.get(candidate.id()) {
            info!(
                "Replacing version of {} ({}) with {}",
                candidate.id(),
                candidate.metadata().version(),
                version
            );
            let metadata = candidate.metadata().clone().with_version(Version::parse(version));
            candidate = candidate.with_metadata(metadata);
        }

        if self.config.disabled_mods.contains(candidate.id()) {
            info!("Disabling {} at {}", candidate.id(), candidate.origin());
            report.disabled.push(candidate.id().to_string());
            candidate = candidate.with_eligibility(false);
        }
        candidate
    }

    /// Registers adapters and populates entrypoints from the loaded registry.
    pub fn freeze(&self, catalog: Arc<HookCatalog>) -> Result<(), LoaderError> {
        let registry = self.registry.get().ok_or(LoaderError::NotLoaded)?;
        if self.freeze_started.swap(true, Ordering::SeqCst) {
            return Err(LoaderError::AlreadyFrozen);
        }

        let mut adapters = AdapterRegistry::with_catalog(Arc::clone(&catalog));
        adapters.register_module_adapters(registry, &catalog)?;

        let mut storage = EntrypointStorage::new().with_throw_directly(self.config.throw_directly);
        storage.populate(registry, &adapters)?;

        self.adapters
            .set(adapters)
            .map_err(|_| LoaderError::AlreadyFrozen)?;
        self.entrypoints
            .set(storage)
            .map_err(|_| LoaderError::AlreadyFrozen)?;
        Ok(())
    }

    pub fn is_loaded(&self) -> bool {
        self.registry.get().is_some()
    }

    pub fn is_frozen(&self) -> bool {
        self.entrypoints.get().is_some()
    }

    pub fn registry(&self) -> Result<&Arc<ModuleRegistry>, LoaderError> {
        self.registry.get().ok_or(LoaderError::NotLoaded)
    }

    pub fn adapters(&self) -> Result<&AdapterRegistry, LoaderError> {
        self.adapters.get().ok_or(LoaderError::NotFrozen)
    }

    pub fn get_module_container(&self, id: &str) -> Option<Arc<Module>> {
        self.registry.get()?.get(id).cloned()
    }

    pub fn get_all_modules(&self) -> Vec<Arc<Module>> {
        self.registry
            .get()
            .map(|registry| registry.modules().to_vec())
            .unwrap_or_default()
    }

    pub fn is_module_loaded(&self, id: &str) -> bool {
        self.registry.get().is_some_and(|registry| registry.contains(id))
    }

    /// False until frozen.
    pub fn has_entrypoints(&self, phase_key: &str) -> bool {
        self.entrypoints
            .get()
            .is_some_and(|storage| storage.has_entrypoints(phase_key))
    }

    pub fn get_entrypoints<T: Any + Send + Sync>(&self, phase_key: &str) -> Result<Vec<Arc<T>>, LoaderError> {
        let storage = self.entrypoints.get().ok_or(LoaderError::NotFrozen)?;
        Ok(storage.get_entrypoints::<T>(phase_key)?)
    }

    pub fn get_entrypoint_containers<T: Any + Send + Sync>(
        &self,
        phase_key: &str,
    ) -> Result<Vec<EntrypointContainer<T>>, LoaderError> {
        let storage = self.entrypoints.get().ok_or(LoaderError::NotFrozen)?;
        Ok(storage.get_entrypoint_containers::<T>(phase_key)?)
    }
}

fn log_module_list(registry: &ModuleRegistry) {
    let mut lines: Vec<String> = registry
        .modules()
        .iter()
        .map(|module| format!("\t- {} {}", module.id(), module.version()))
        .collect();
    lines.sort();

    let count = registry.len();
    info!(
        "Loading {} mod{}:\n{}",
        count,
        if count == 1 { "" } else { "s" },
        lines.join("\n")
    );
}
