//! Lazy, memoized entrypoint dispatch.
//!
//! Every declared hook becomes an [`EntrypointSlot`] under its phase key. A
//! slot is built through its adapter the first time the key is queried and
//! the outcome, hook or failure, is cached for the life of the process.
//!
//! Queries are atomic: if any slot under a key fails, the whole query fails
//! with an [`EntrypointError::Aggregate`] naming every failing module. Slots
//! that did resolve stay cached and are not rebuilt by later queries.
//!
//! The first query for a type the hook does not have fails the slot for
//! good, whether or not an earlier query with the right type succeeded.
//!
//! A hook constructor must not query its own slot. Such a query returns
//! [`EntrypointError::Reentrant`] instead of waiting on itself.

use crate::adapter::{construct_guarded, AdapterError, AdapterRegistry, Hook, LanguageAdapter};
use crate::materialize::{Module, ModuleRegistry};
use crate::metadata::EntrypointDeclaration;
use crate::status::{StatusTree, ICON_MODULE};
use once_cell::sync::OnceCell;
use std::any::{self, Any};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, ThreadId};
use tracing::{debug, info};

/// Phase key used for legacy `initializers`.
pub const LEGACY_PHASE_KEY: &str = "main";

#[derive(Debug, Clone, thiserror::Error)]
pub enum EntrypointError {
    #[error("mod {module} declares `{descriptor}` for `{phase_key}` with language adapter `{adapter}`, which is not registered")]
    AdapterNotFound {
        module: String,
        phase_key: String,
        adapter: String,
        descriptor: String,
    },

    #[error("exception while loading entrypoint `{phase_key}` provided by `{module}` ({descriptor})")]
    ConstructionFailed {
        phase_key: String,
        module: String,
        descriptor: String,
        #[source]
        source: Arc<AdapterError>,
    },

    #[error("entrypoint `{phase_key}` provided by `{module}` ({descriptor}) is a {found}, expected {expected}")]
    TypeMismatch {
        phase_key: String,
        module: String,
        descriptor: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("entrypoint `{phase_key}` provided by `{module}` ({descriptor}) was queried from its own constructor")]
    Reentrant {
        phase_key: String,
        module: String,
        descriptor: String,
    },

    #[error("could not load {} entrypoint(s) for `{phase_key}` from: {}", .failures.len(), failing_modules(.failures))]
    Aggregate {
        phase_key: String,
        failures: Vec<EntrypointError>,
    },
}

fn failing_modules(failures: &[EntrypointError]) -> String {
    failures
        .iter()
        .filter_map(EntrypointError::module)
        .collect::<Vec<_>>()
        .join(", ")
}

impl EntrypointError {
    /// The module a single-slot failure is attributed to.
    pub fn module(&self) -> Option<&str> {
        match self {
            EntrypointError::AdapterNotFound { module, .. }
            | EntrypointError::ConstructionFailed { module, .. }
            | EntrypointError::TypeMismatch { module, .. }
            | EntrypointError::Reentrant { module, .. } => Some(module),
            EntrypointError::Aggregate { .. } => None,
        }
    }

    /// Renders the failure with one node per failing module.
    pub fn to_status_tree(&self) -> StatusTree {
        let failures = match self {
            EntrypointError::Aggregate { failures, .. } => failures.as_slice(),
            single => std::slice::from_ref(single),
        };

        let mut tree = StatusTree::new("Entrypoint failure", self.to_string());
        let root = tree.add_tab("Errors");
        for failure in failures {
            let module = tree.add_child(root, &format!("${ICON_MODULE}$ {}", failure.module().unwrap_or("?")));
            tree.add_error(module, failure);
        }
        tree
    }
}

/// Observable state of a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotStatus {
    Declared,
    Resolved,
    Failed,
}

#[derive(Debug)]
enum SlotState {
    Resolved(Hook),
    Failed(EntrypointError),
}

/// One declared hook under a phase key.
pub struct EntrypointSlot {
    module: Arc<Module>,
    phase_key: String,
    adapter_name: String,
    adapter: Arc<dyn LanguageAdapter>,
    descriptor: String,
    state: OnceCell<SlotState>,
    mismatch: OnceCell<EntrypointError>,
    /// Thread currently running the constructor.
    builder: Mutex<Option<ThreadId>>,
}

impl EntrypointSlot {
    pub fn module(&self) -> &Arc<Module> {
        &self.module
    }

    pub fn adapter_name(&self) -> &str {
        &self.adapter_name
    }

    pub fn descriptor(&self) -> &str {
        &self.descriptor
    }

    pub fn status(&self) -> SlotStatus {
        if self.mismatch.get().is_some() {
            return SlotStatus::Failed;
        }
        match self.state.get() {
            None => SlotStatus::Declared,
            Some(SlotState::Resolved(_)) => SlotStatus::Resolved,
            Some(SlotState::Failed(_)) => SlotStatus::Failed,
        }
    }

    /// Resolves the slot as `T`. Concurrent callers block on the first one,
    /// so the hook is constructed at most once.
    pub fn resolve<T: Any + Send + Sync>(&self) -> Result<Arc<T>, EntrypointError> {
        if let Some(error) = self.mismatch.get() {
            return Err(error.clone());
        }
        if self.state.get().is_none() && self.builder() == Some(thread::current().id()) {
            return Err(EntrypointError::Reentrant {
                phase_key: self.phase_key.clone(),
                module: self.module.id().to_string(),
                descriptor: self.descriptor.clone(),
            });
        }

        let state = self.state.get_or_init(|| {
            self.set_builder(Some(thread::current().id()));
            let state = self.construct();
            self.set_builder(None);
            state
        });

        match state {
            SlotState::Resolved(hook) => match hook.downcast::<T>() {
                Some(hook) => Ok(hook),
                None => Err(self.mismatch.get_or_init(|| self.type_mismatch::<T>(hook)).clone()),
            },
            SlotState::Failed(error) => Err(error.clone()),
        }
    }

    fn builder(&self) -> Option<ThreadId> {
        *self.builder.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_builder(&self, builder: Option<ThreadId>) {
        *self.builder.lock().unwrap_or_else(PoisonError::into_inner) = builder;
    }

    fn construct(&self) -> SlotState {
        debug!(
            "Constructing entrypoint {} for {} via adapter `{}`",
            self.descriptor,
            self.module.id(),
            self.adapter_name
        );
        match construct_guarded(self.adapter.as_ref(), &self.module, &self.descriptor) {
            Ok(hook) => SlotState::Resolved(hook),
            Err(source) => SlotState::Failed(EntrypointError::ConstructionFailed {
                phase_key: self.phase_key.clone(),
                module: self.module.id().to_string(),
                descriptor: self.descriptor.clone(),
                source: Arc::new(source),
            }),
        }
    }

    fn type_mismatch<T>(&self, hook: &Hook) -> EntrypointError {
        EntrypointError::TypeMismatch {
            phase_key: self.phase_key.clone(),
            module: self.module.id().to_string(),
            descriptor: self.descriptor.clone(),
            expected: any::type_name::<T>(),
            found: hook.type_name(),
        }
    }
}

impl fmt::Debug for EntrypointSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntrypointSlot")
            .field("module", &self.module.id())
            .field("adapter", &self.adapter_name)
            .field("descriptor", &self.descriptor)
            .field("status", &self.status())
            .finish()
    }
}

/// A resolved hook together with the module that provided it.
#[derive(Debug)]
pub struct EntrypointContainer<T> {
    entrypoint: Arc<T>,
    provider: Arc<Module>,
    definition: String,
}

impl<T> EntrypointContainer<T> {
    pub fn entrypoint(&self) -> &Arc<T> {
        &self.entrypoint
    }

    pub fn provider(&self) -> &Arc<Module> {
        &self.provider
    }

    /// The descriptor the hook was built from.
    pub fn definition(&self) -> &str {
        &self.definition
    }
}

impl<T> Clone for EntrypointContainer<T> {
    fn clone(&self) -> Self {
        Self {
            entrypoint: Arc::clone(&self.entrypoint),
            provider: Arc::clone(&self.provider),
            definition: self.definition.clone(),
        }
    }
}

/// Phase key to ordered slots.
#[derive(Debug, Default)]
pub struct EntrypointStorage {
    entries: HashMap<String, Vec<Arc<EntrypointSlot>>>,
    throw_directly: bool,
}

impl EntrypointStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lets the first slot failure of a query escape instead of aggregating.
    pub fn with_throw_directly(mut self, throw_directly: bool) -> Self {
        self.throw_directly = throw_directly;
        self
    }

    /// Adds a legacy initializer under [`LEGACY_PHASE_KEY`].
    pub fn add_deprecated(
        &mut self,
        module: &Arc<Module>,
        adapter_name: &str,
        descriptor: &str,
        adapters: &AdapterRegistry,
    ) -> Result<(), EntrypointError> {
        debug!("Registering legacy initializer {} for {}", descriptor, module.id());
        self.push(module, LEGACY_PHASE_KEY, adapter_name, descriptor, adapters)
    }

    /// Adds a declared entrypoint. Fails if its adapter is not registered.
    pub fn add(
        &mut self,
        module: &Arc<Module>,
        declaration: &EntrypointDeclaration,
        adapters: &AdapterRegistry,
    ) -> Result<(), EntrypointError> {
        self.push(
            module,
            &declaration.phase_key,
            &declaration.adapter,
            &declaration.value,
            adapters,
        )
    }

    fn push(
        &mut self,
        module: &Arc<Module>,
        phase_key: &str,
        adapter_name: &str,
        descriptor: &str,
        adapters: &AdapterRegistry,
    ) -> Result<(), EntrypointError> {
        let adapter = adapters
            .resolve(adapter_name)
            .map_err(|_| EntrypointError::AdapterNotFound {
                module: module.id().to_string(),
                phase_key: phase_key.to_string(),
                adapter: adapter_name.to_string(),
                descriptor: descriptor.to_string(),
            })?;

        self.entries
            .entry(phase_key.to_string())
            .or_default()
            .push(Arc::new(EntrypointSlot {
                module: Arc::clone(module),
                phase_key: phase_key.to_string(),
                adapter_name: adapter_name.to_string(),
                adapter,
                descriptor: descriptor.to_string(),
                state: OnceCell::new(),
                mismatch: OnceCell::new(),
                builder: Mutex::new(None),
            }));
        Ok(())
    }

    /// Adds every legacy initializer and declared entrypoint of the
    /// committed modules, in registry order then declaration order.
    pub fn populate(&mut self, registry: &ModuleRegistry, adapters: &AdapterRegistry) -> Result<(), EntrypointError> {
        for module in registry.modules() {
            let metadata = module.metadata();
            for initializer in metadata.legacy_initializers() {
                self.add_deprecated(module, metadata.legacy_adapter(), initializer, adapters)?;
            }
            for declaration in metadata.entrypoints() {
                self.add(module, declaration, adapters)?;
            }
        }
        info!(
            "Registered {} entrypoint(s) under {} key(s)",
            self.entries.values().map(Vec::len).sum::<usize>(),
            self.entries.len()
        );
        Ok(())
    }

    /// True if any slot is registered under `phase_key`. Never resolves.
    pub fn has_entrypoints(&self, phase_key: &str) -> bool {
        self.entries.contains_key(phase_key)
    }

    pub fn slots(&self, phase_key: &str) -> &[Arc<EntrypointSlot>] {
        self.entries.get(phase_key).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Registered phase keys, sorted.
    pub fn phase_keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }

    pub fn get_entrypoints<T: Any + Send + Sync>(&self, phase_key: &str) -> Result<Vec<Arc<T>>, EntrypointError> {
        Ok(self
            .get_entrypoint_containers::<T>(phase_key)?
            .into_iter()
            .map(|container| container.entrypoint)
            .collect())
    }

    pub fn get_entrypoint_containers<T: Any + Send + Sync>(
        &self,
        phase_key: &str,
    ) -> Result<Vec<EntrypointContainer<T>>, EntrypointError> {
        let mut containers = Vec::new();
        let mut failures = Vec::new();

        for slot in self.slots(phase_key) {
            match slot.resolve::<T>() {
                Ok(entrypoint) => containers.push(EntrypointContainer {
                    entrypoint,
                    provider: Arc::clone(&slot.module),
                    definition: slot.descriptor.clone(),
                }),
                Err(error) if self.throw_directly => return Err(error),
                Err(error) => failures.push(error),
            }
        }

        if !failures.is_empty() {
            return Err(EntrypointError::Aggregate {
                phase_key: phase_key.to_string(),
                failures,
            });
        }
        Ok(containers)
    }
}
