//! Language adapters: turning a loadable descriptor into a live hook object.
//!
//! Nothing is looked up by name at runtime. The collaborator that loads
//! module code registers constructors in a [`HookCatalog`] ahead of time, and
//! adapters resolve descriptors against it.

use crate::materialize::{Module, ModuleRegistry};
use std::any::{self, Any};
use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, info};

pub use crate::metadata::DEFAULT_ADAPTER;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

const BUILTIN_OWNER: &str = "<builtin>";

#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error("language adapter `{name}` is not registered")]
    NotFound { name: String },

    #[error("duplicate language adapter `{name}`: provided by both {existing_owner} and {incoming_owner}")]
    Duplicate {
        name: String,
        existing_owner: String,
        incoming_owner: String,
    },

    #[error("mod {owner} declares language adapter `{name}` with unknown implementation `{implementation}`")]
    ImplementationNotFound {
        name: String,
        owner: String,
        implementation: String,
    },

    #[error("no hook is registered for `{descriptor}`")]
    HookNotFound { descriptor: String },

    #[error("constructing `{descriptor}` failed: {source}")]
    ConstructionFailed {
        descriptor: String,
        #[source]
        source: BoxError,
    },

    #[error("constructing `{descriptor}` panicked: {message}")]
    Panicked { descriptor: String, message: String },
}

// ============================================================================
// Hooks
// ============================================================================

/// A constructed hook object of any type.
#[derive(Clone)]
pub struct Hook {
    value: Arc<dyn Any + Send + Sync>,
    type_name: &'static str,
}

impl Hook {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self {
            value: Arc::new(value),
            type_name: any::type_name::<T>(),
        }
    }

    /// Name of the concrete type, for diagnostics.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn is<T: Any>(&self) -> bool {
        self.value.is::<T>()
    }

    /// Shares the hook as `T`, or `None` if it is of another type.
    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        Arc::clone(&self.value).downcast::<T>().ok()
    }
}

impl fmt::Debug for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hook").field("type", &self.type_name).finish()
    }
}

/// The capability behind an adapter name.
pub trait LanguageAdapter: Send + Sync {
    /// Builds the hook named by `descriptor` on behalf of `module`.
    fn create(&self, module: &Module, descriptor: &str) -> Result<Hook, AdapterError>;
}

pub type HookConstructor = Arc<dyn Fn(&Module) -> Result<Hook, BoxError> + Send + Sync>;

/// Constructors and adapter implementations registered by the code loader.
#[derive(Default)]
pub struct HookCatalog {
    hooks: HashMap<String, HookConstructor>,
    adapters: HashMap<String, Arc<dyn LanguageAdapter>>,
}

impl HookCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a fallible constructor for `descriptor`.
    ///
    /// The constructor may query other phase keys, but a query that reaches
    /// the slot being built fails with `EntrypointError::Reentrant`.
    pub fn register_hook<F>(&mut self, descriptor: impl Into<String>, constructor: F)
    where
        F: Fn(&Module) -> Result<Hook, BoxError> + Send + Sync + 'static,
    {
        self.hooks.insert(descriptor.into(), Arc::new(constructor));
    }

    /// Registers a constructor that always succeeds.
    pub fn register<T, F>(&mut self, descriptor: impl Into<String>, constructor: F)
    where
        T: Any + Send + Sync,
        F: Fn() -> T + Send + Sync + 'static,
    {
        self.register_hook(descriptor, move |_| Ok(Hook::new(constructor())));
    }

    /// Registers an adapter implementation that modules can name in their
    /// `language_adapters` table.
    pub fn register_adapter(&mut self, implementation: impl Into<String>, adapter: Arc<dyn LanguageAdapter>) {
        self.adapters.insert(implementation.into(), adapter);
    }

    pub fn hook(&self, descriptor: &str) -> Option<&HookConstructor> {
        self.hooks.get(descriptor)
    }

    pub fn adapter(&self, implementation: &str) -> Option<Arc<dyn LanguageAdapter>> {
        self.adapters.get(implementation).cloned()
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }
}

impl fmt::Debug for HookCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut hooks: Vec<&String> = self.hooks.keys().collect();
        hooks.sort();
        let mut adapters: Vec<&String> = self.adapters.keys().collect();
        adapters.sort();
        f.debug_struct("HookCatalog")
            .field("hooks", &hooks)
            .field("adapters", &adapters)
            .finish()
    }
}

/// The `default` adapter: builds hooks straight from the catalog.
pub struct DefaultAdapter {
    catalog: Arc<HookCatalog>,
}

impl DefaultAdapter {
    pub fn new(catalog: Arc<HookCatalog>) -> Self {
        Self { catalog }
    }
}

impl LanguageAdapter for DefaultAdapter {
    fn create(&self, module: &Module, descriptor: &str) -> Result<Hook, AdapterError> {
        let constructor = self
            .catalog
            .hook(descriptor)
            .ok_or_else(|| AdapterError::HookNotFound {
                descriptor: descriptor.to_string(),
            })?;
        constructor(module).map_err(|source| AdapterError::ConstructionFailed {
            descriptor: descriptor.to_string(),
            source,
        })
    }
}

/// Runs `adapter.create`, turning a panic into [`AdapterError::Panicked`].
pub fn construct_guarded(
    adapter: &dyn LanguageAdapter,
    module: &Module,
    descriptor: &str,
) -> Result<Hook, AdapterError> {
    match catch_unwind(AssertUnwindSafe(|| adapter.create(module, descriptor))) {
        Ok(result) => result,
        Err(panic_info) => Err(panic_to_error(descriptor, panic_info)),
    }
}

fn panic_to_error(descriptor: &str, panic_info: Box<dyn Any + Send>) -> AdapterError {
    let message = if let Some(s) = panic_info.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic_info.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    };

    AdapterError::Panicked {
        descriptor: descriptor.to_string(),
        message,
    }
}

// ============================================================================
// Adapter registry
// ============================================================================

struct RegisteredAdapter {
    adapter: Arc<dyn LanguageAdapter>,
    owner: String,
}

/// Adapter name to capability. `default` is always present and cannot be
/// replaced.
pub struct AdapterRegistry {
    adapters: HashMap<String, RegisteredAdapter>,
}

impl AdapterRegistry {
    pub fn new(default_adapter: Arc<dyn LanguageAdapter>) -> Self {
        let mut adapters = HashMap::new();
        adapters.insert(
            DEFAULT_ADAPTER.to_string(),
            RegisteredAdapter {
                adapter: default_adapter,
                owner: BUILTIN_OWNER.to_string(),
            },
        );
        Self { adapters }
    }

    /// A registry whose `default` adapter reads from `catalog`.
    pub fn with_catalog(catalog: Arc<HookCatalog>) -> Self {
        Self::new(Arc::new(DefaultAdapter::new(catalog)))
    }

    pub fn register(
        &mut self,
        name: &str,
        owner: &str,
        adapter: Arc<dyn LanguageAdapter>,
    ) -> Result<(), AdapterError> {
        if let Some(existing) = self.adapters.get(name) {
            return Err(AdapterError::Duplicate {
                name: name.to_string(),
                existing_owner: existing.owner.clone(),
                incoming_owner: owner.to_string(),
            });
        }
        debug!("Registered language adapter `{}` from {}", name, owner);
        self.adapters.insert(
            name.to_string(),
            RegisteredAdapter {
                adapter,
                owner: owner.to_string(),
            },
        );
        Ok(())
    }

    pub fn resolve(&self, name: &str) -> Result<Arc<dyn LanguageAdapter>, AdapterError> {
        self.adapters
            .get(name)
            .map(|entry| Arc::clone(&entry.adapter))
            .ok_or_else(|| AdapterError::NotFound {
                name: name.to_string(),
            })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.adapters.contains_key(name)
    }

    /// Which module contributed `name`.
    pub fn owner(&self, name: &str) -> Option<&str> {
        self.adapters.get(name).map(|entry| entry.owner.as_str())
    }

    /// Registered adapter names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.adapters.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Registers every adapter the committed modules contribute. Runs before
    /// any entrypoint is added, since declarations may name adapters from
    /// other modules.
    pub fn register_module_adapters(
        &mut self,
        registry: &ModuleRegistry,
        catalog: &HookCatalog,
    ) -> Result<(), AdapterError> {
        for module in registry.modules() {
            for (name, implementation) in module.metadata().adapters() {
                let adapter = catalog.adapter(implementation).ok_or_else(|| {
                    AdapterError::ImplementationNotFound {
                        name: name.clone(),
                        owner: module.id().to_string(),
                        implementation: implementation.clone(),
                    }
                })?;
                self.register(name, module.id(), adapter)?;
            }
        }
        info!("Language adapters ready: {}", self.names().join(", "));
        Ok(())
    }
}

impl fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdapterRegistry")
            .field("adapters", &self.names())
            .finish()
    }
}
