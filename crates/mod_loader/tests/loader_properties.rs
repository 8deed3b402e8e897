//! End-to-end tests for resolution, materialization and entrypoint dispatch
//!
//! These tests drive the public API the way a host does: candidates go into a
//! pool, the pool is resolved and committed, and hooks are queried by phase.

use mod_loader::{
    materialize, parse_candidate, CandidatePool, DependencyOverrides, Environment, EntrypointError,
    HookCatalog, LoadOrder, LoaderConfig, LoaderContext, LoaderError, MaterializeError,
    ModuleCandidate, ModuleMetadata, Origin, ResolutionFailure, ResolutionResult, Resolver,
    DEFAULT_ADAPTER,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

trait Initializer: Send + Sync {
    fn id(&self) -> &str;
}

struct Init(String);

impl Initializer for Init {
    fn id(&self) -> &str {
        &self.0
    }
}

type DynInit = Box<dyn Initializer>;

/// Helper to build a candidate at `mods/<id>-<version>.json`
fn candidate(metadata: ModuleMetadata) -> ModuleCandidate {
    let origin = Origin::new(format!("mods/{}-{}.json", metadata.id(), metadata.version()));
    ModuleCandidate::new(metadata, origin)
}

fn module(id: &str, version: &str) -> ModuleMetadata {
    ModuleMetadata::builder(id, version).build().unwrap()
}

fn resolve(candidates: &[ModuleCandidate]) -> Result<ResolutionResult, mod_loader::ResolutionError> {
    Resolver::new(&DependencyOverrides::new()).resolve_candidates(candidates)
}

#[test]
fn test_resolution_is_deterministic() {
    let pool = CandidatePool::new();
    let overrides = DependencyOverrides::parse(
        r#"{"version": 1, "overrides": {"app": {"+depends": {"core": ">=1"}}}}"#,
    )
    .unwrap();
    for metadata in [
        ModuleMetadata::builder("app", "1.0.0").depends("lib", "^2").build().unwrap(),
        module("lib", "2.0.0"),
        module("lib", "2.1.0"),
        ModuleMetadata::builder("core", "1.3.0").provides("core-api", None).build().unwrap(),
        module("extra", "0.1.0"),
    ] {
        pool.add(candidate(metadata));
    }

    let resolver = Resolver::new(&overrides);
    let first = resolver.resolve(&pool).unwrap();
    let second = resolver.resolve(&pool).unwrap();

    assert_eq!(first, second);
    let ids: Vec<&str> = first.modules().iter().map(|c| c.id()).collect();
    assert_eq!(ids, vec!["app", "lib", "core", "extra"]);
}

#[test]
fn test_duplicate_identity_prefers_higher_version() {
    let result = resolve(&[candidate(module("mod-a", "1.0.0")), candidate(module("mod-a", "2.0.0"))]).unwrap();
    assert_eq!(result.get("mod-a").unwrap().metadata().version().to_string(), "2.0.0");
}

#[test]
fn test_duplicate_identity_with_equal_versions_fails() {
    let first = ModuleCandidate::new(module("mod-a", "1.0.0"), Origin::new("mods/first.json"));
    let second = ModuleCandidate::new(module("mod-a", "1.0.0"), Origin::new("other/second.json"));

    let err = resolve(&[first, second]).unwrap_err();
    assert_eq!(err.failures.len(), 1);
    match &err.failures[0] {
        ResolutionFailure::DuplicateIdentity { id, first, second } => {
            assert_eq!(id, "mod-a");
            assert_eq!(first.as_str(), "mods/first.json");
            assert_eq!(second.as_str(), "other/second.json");
        }
        other => panic!("unexpected failure: {other}"),
    }
}

#[test]
fn test_alias_collision_fails_materialization() {
    let a = ModuleMetadata::builder("A", "1.0.0").provides("lib", None).build().unwrap();
    let b = ModuleMetadata::builder("lib", "1.0.0").build().unwrap();
    let result = resolve(&[candidate(a), candidate(b)]).unwrap();

    let err = materialize(&result, Environment::Client, LoadOrder::Resolution).unwrap_err();
    match err {
        MaterializeError::DuplicateIdentity {
            existing_module,
            incoming_module,
            ..
        } => {
            assert_eq!(existing_module, "A");
            assert_eq!(incoming_module, "lib");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_dependency_satisfaction() {
    let x = || ModuleMetadata::builder("X", "1.0.0").depends("Y", ">=1.2.0").build().unwrap();

    let err = resolve(&[candidate(x()), candidate(module("Y", "1.1.0"))]).unwrap_err();
    match &err.failures[0] {
        ResolutionFailure::UnsatisfiedDependency {
            requester,
            target,
            constraint,
            found,
        } => {
            assert_eq!(requester, "X");
            assert_eq!(target, "Y");
            assert_eq!(constraint.as_str(), ">=1.2.0");
            assert_eq!(found.as_ref().map(ToString::to_string).as_deref(), Some("1.1.0"));
        }
        other => panic!("unexpected failure: {other}"),
    }

    let result = resolve(&[
        candidate(x()),
        candidate(module("Y", "1.2.0")),
        candidate(module("Y", "1.3.0")),
    ])
    .unwrap();
    assert_eq!(result.get("Y").unwrap().metadata().version().to_string(), "1.3.0");
}

#[test]
fn test_breaks_enforcement() {
    let p = || ModuleMetadata::builder("P", "1.0.0").breaks("Q", "=2.0.0").build().unwrap();

    let err = resolve(&[candidate(p()), candidate(module("Q", "2.0.0"))]).unwrap_err();
    assert!(matches!(
        &err.failures[0],
        ResolutionFailure::Conflict { module, peer, .. } if module == "P" && peer == "Q"
    ));

    assert!(resolve(&[candidate(p()), candidate(module("Q", "3.0.0"))]).is_ok());
}

#[test]
fn test_mixed_version_kinds_never_compare_equal() {
    let err = resolve(&[
        candidate(ModuleMetadata::builder("X", "1.0.0").depends("Y", ">=1.0").build().unwrap()),
        candidate(module("Y", "nightly-2024")),
    ])
    .unwrap_err();
    assert!(matches!(
        err.failures[0],
        ResolutionFailure::UnresolvableVersionComparison { .. }
    ));
}

#[test]
fn test_entrypoints_memoized_and_failures_aggregated() {
    let built = Arc::new(AtomicUsize::new(0));
    let mut catalog = HookCatalog::new();
    for id in ["alpha", "beta"] {
        let built = Arc::clone(&built);
        catalog.register(format!("{id}::Init"), move || {
            built.fetch_add(1, Ordering::SeqCst);
            Box::new(Init(id.to_string())) as DynInit
        });
    }
    catalog.register_hook("gamma::Init", |_| Err("gamma cannot start".into()));

    let pool = CandidatePool::new();
    for id in ["alpha", "beta"] {
        pool.add(candidate(
            ModuleMetadata::builder(id, "1.0.0")
                .entrypoint("init", DEFAULT_ADAPTER, &format!("{id}::Init"))
                .build()
                .unwrap(),
        ));
    }

    let context = LoaderContext::new(LoaderConfig::default(), DependencyOverrides::new());
    context.load_from_pool(&pool).unwrap();
    let catalog = Arc::new(catalog);
    context.freeze(Arc::clone(&catalog)).unwrap();

    let first = context.get_entrypoints::<DynInit>("init").unwrap();
    let second = context.get_entrypoints::<DynInit>("init").unwrap();
    assert_eq!(built.load(Ordering::SeqCst), 2);
    assert_eq!(first.iter().map(|hook| hook.id()).collect::<Vec<_>>(), vec!["alpha", "beta"]);
    assert!(Arc::ptr_eq(&first[1], &second[1]));

    // Same two modules plus a third whose hook fails: the query is atomic.
    let pool = CandidatePool::new();
    for id in ["alpha", "beta", "gamma"] {
        pool.add(candidate(
            ModuleMetadata::builder(id, "1.0.0")
                .entrypoint("init", DEFAULT_ADAPTER, &format!("{id}::Init"))
                .build()
                .unwrap(),
        ));
    }
    let context = LoaderContext::new(LoaderConfig::default(), DependencyOverrides::new());
    context.load_from_pool(&pool).unwrap();
    context.freeze(catalog).unwrap();

    let err = context.get_entrypoint_containers::<DynInit>("init").err().unwrap();
    match err {
        LoaderError::Entrypoint(EntrypointError::Aggregate { failures, .. }) => {
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].module(), Some("gamma"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(built.load(Ordering::SeqCst), 4);

    // Successful slots stay memoized across failing queries.
    assert!(context.get_entrypoints::<DynInit>("init").is_err());
    assert_eq!(built.load(Ordering::SeqCst), 4);
}

#[test]
fn test_environment_filtering_is_idempotent() {
    let client_only = parse_candidate(
        r#"{"id": "hud", "version": "1.0.0", "environment": "client"}"#,
        Origin::new("mods/hud.json"),
    )
    .unwrap();
    let server_only = parse_candidate(
        r#"{"id": "admin", "version": "1.0.0", "environment": "server"}"#,
        Origin::new("mods/admin.json"),
    )
    .unwrap();
    let result = resolve(&[client_only, server_only, candidate(module("common", "1.0.0"))]).unwrap();

    let first = materialize(&result, Environment::Server, LoadOrder::Resolution).unwrap();
    let second = materialize(&result, Environment::Server, LoadOrder::Resolution).unwrap();

    assert_eq!(first, second);
    assert_eq!(first.ids().collect::<Vec<_>>(), vec!["admin", "common"]);
    assert_eq!(first.not_applicable()[0].id(), "hud");
}
