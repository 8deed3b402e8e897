//! Dependency resolution.
//!
//! The resolver turns a [`CandidatePool`] into a [`ResolutionResult`]: exactly
//! one candidate per declared identity, every hard relation satisfied. It is
//! deterministic and side-effect free apart from logging. Every failure found
//! is collected into one [`ResolutionError`] instead of stopping at the first.

use crate::candidate::{CandidatePool, ModuleCandidate, Origin};
use crate::metadata::Dependency;
use crate::overrides::DependencyOverrides;
use crate::status::{StatusTree, ICON_MODULE};
use crate::version::{Version, VersionConstraint, VersionError};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use tracing::{debug, info, warn};

/// One reason resolution failed.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ResolutionFailure {
    #[error("module `{id}` is present twice with the same version ({first} and {second})")]
    DuplicateIdentity {
        id: String,
        first: Origin,
        second: Origin,
    },

    #[error(
        "alias `{alias}` is provided by both `{first_module}` ({first}) and `{second_module}` ({second}) with the same version"
    )]
    DuplicateAlias {
        alias: String,
        first_module: String,
        first: Origin,
        second_module: String,
        second: Origin,
    },

    #[error(
        "cannot decide between versions of `{target}`{}{}: {source}",
        requested_by(.requester),
        located_at(.origins)
    )]
    UnresolvableVersionComparison {
        requester: Option<String>,
        target: String,
        /// Where the versions that could not be ordered came from.
        origins: Vec<Origin>,
        #[source]
        source: VersionError,
    },

    #[error("module `{requester}` requires `{target}` {constraint}, {}", describe_found(.found))]
    UnsatisfiedDependency {
        requester: String,
        target: String,
        constraint: VersionConstraint,
        found: Option<Version>,
    },

    #[error("module `{module}` breaks `{peer}` {constraint}, but {peer} {peer_version} is present")]
    Conflict {
        module: String,
        peer: String,
        peer_version: Version,
        constraint: VersionConstraint,
    },
}

fn requested_by(requester: &Option<String>) -> String {
    match requester {
        Some(id) => format!(" (required by `{id}`)"),
        None => String::new(),
    }
}

fn located_at(origins: &[Origin]) -> String {
    if origins.is_empty() {
        return String::new();
    }
    let origins: Vec<&str> = origins.iter().map(Origin::as_str).collect();
    format!(" at {}", origins.join(" and "))
}

fn describe_found(found: &Option<Version>) -> String {
    match found {
        Some(version) => format!("but only {version} is present"),
        None => "which is missing".to_string(),
    }
}

impl ResolutionFailure {
    /// The module the failure is reported under.
    pub fn subject(&self) -> &str {
        match self {
            ResolutionFailure::DuplicateIdentity { id, .. } => id,
            ResolutionFailure::DuplicateAlias { alias, .. } => alias,
            ResolutionFailure::UnresolvableVersionComparison {
                requester, target, ..
            } => requester.as_deref().unwrap_or(target),
            ResolutionFailure::UnsatisfiedDependency { requester, .. } => requester,
            ResolutionFailure::Conflict { module, .. } => module,
        }
    }

    /// The offending peers, for diagnostics.
    pub fn peers(&self) -> Vec<String> {
        match self {
            ResolutionFailure::DuplicateIdentity { first, second, .. } => {
                vec![first.to_string(), second.to_string()]
            }
            ResolutionFailure::DuplicateAlias {
                first_module,
                first,
                second_module,
                second,
                ..
            } => vec![
                format!("{first_module} ({first})"),
                format!("{second_module} ({second})"),
            ],
            ResolutionFailure::UnresolvableVersionComparison { target, origins, .. } => {
                if origins.is_empty() {
                    vec![target.clone()]
                } else {
                    origins.iter().map(|origin| format!("{target} ({origin})")).collect()
                }
            }
            ResolutionFailure::UnsatisfiedDependency { target, found, .. } => match found {
                Some(version) => vec![format!("{target} {version}")],
                None => vec![format!("{target} (missing)")],
            },
            ResolutionFailure::Conflict {
                peer, peer_version, ..
            } => vec![format!("{peer} {peer_version}")],
        }
    }
}

/// Every failure found while resolving one pool.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolutionError {
    pub failures: Vec<ResolutionFailure>,
}

impl fmt::Display for ResolutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mod resolution failed with {} problem(s)", self.failures.len())?;
        for failure in &self.failures {
            write!(f, "\n - {failure}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ResolutionError {}

impl ResolutionError {
    /// Renders the failures as a module → reason → peer tree.
    pub fn to_status_tree(&self) -> StatusTree {
        let mut tree = StatusTree::new("Mod resolution failed", self.failures.len().to_string() + " problem(s) found");
        let root = tree.add_tab("Errors");
        let mut modules = HashMap::new();

        for failure in &self.failures {
            let subject = failure.subject().to_string();
            let module = *modules
                .entry(subject.clone())
                .or_insert_with(|| tree.add_child(root, &format!("${ICON_MODULE}$ {subject}")));
            let reason = tree.add_child(module, &format!("x {failure}"));
            for peer in failure.peers() {
                tree.add_child(reason, &format!("- {peer}"));
            }
        }
        tree
    }
}

/// A soft relation that did not hold. Never fails resolution.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolutionWarning {
    MissingRecommendation {
        module: String,
        target: String,
        constraint: VersionConstraint,
        found: Option<Version>,
    },
    SoftConflict {
        module: String,
        peer: String,
        peer_version: Version,
        constraint: VersionConstraint,
    },
}

impl fmt::Display for ResolutionWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolutionWarning::MissingRecommendation {
                module,
                target,
                constraint,
                found,
            } => write!(
                f,
                "module `{module}` recommends `{target}` {constraint}, {}",
                describe_found(found)
            ),
            ResolutionWarning::SoftConflict {
                module,
                peer,
                peer_version,
                constraint,
            } => write!(
                f,
                "module `{module}` conflicts with `{peer}` {constraint}, but {peer} {peer_version} is present"
            ),
        }
    }
}

/// A successful resolution: one chosen candidate per identity.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolutionResult {
    selected: Vec<ModuleCandidate>,
    by_id: HashMap<String, usize>,
    aliases: BTreeMap<String, (usize, Version)>,
    warnings: Vec<ResolutionWarning>,
}

impl ResolutionResult {
    /// Chosen candidates in decision order.
    pub fn modules(&self) -> &[ModuleCandidate] {
        &self.selected
    }

    /// The candidate answering to `id`, by declared identity or by alias.
    pub fn get(&self, id: &str) -> Option<&ModuleCandidate> {
        self.provider(id).map(|(candidate, _)| candidate)
    }

    /// The candidate answering to `id` and the version it answers with.
    pub fn provider(&self, id: &str) -> Option<(&ModuleCandidate, &Version)> {
        if let Some(&index) = self.by_id.get(id) {
            let candidate = &self.selected[index];
            return Some((candidate, candidate.metadata().version()));
        }
        self.aliases
            .get(id)
            .map(|(index, version)| (&self.selected[*index], version))
    }

    /// Alias identities and the module chosen for each.
    pub fn aliases(&self) -> impl Iterator<Item = (&str, &str)> {
        self.aliases
            .iter()
            .map(|(alias, (index, _))| (alias.as_str(), self.selected[*index].id()))
    }

    pub fn warnings(&self) -> &[ResolutionWarning] {
        &self.warnings
    }

    pub fn len(&self) -> usize {
        self.selected.len()
    }

    pub fn is_empty(&self) -> bool {
        self.selected.is_empty()
    }
}

/// Picks the load set from a candidate pool.
#[derive(Debug, Clone)]
pub struct Resolver<'a> {
    overrides: &'a DependencyOverrides,
    log_decisions: bool,
}

impl<'a> Resolver<'a> {
    pub fn new(overrides: &'a DependencyOverrides) -> Self {
        Self {
            overrides,
            log_decisions: false,
        }
    }

    /// Logs every per-identity decision at debug level.
    pub fn with_decision_logging(mut self, enabled: bool) -> Self {
        self.log_decisions = enabled;
        self
    }

    pub fn resolve(&self, pool: &CandidatePool) -> Result<ResolutionResult, ResolutionError> {
        self.resolve_candidates(&pool.candidates())
    }

    pub fn resolve_candidates(
        &self,
        candidates: &[ModuleCandidate],
    ) -> Result<ResolutionResult, ResolutionError> {
        let mut failures = Vec::new();

        let candidates: Vec<ModuleCandidate> = candidates
            .iter()
            .filter(|candidate| {
                if !candidate.is_eligible() && self.log_decisions {
                    debug!("Skipping disabled candidate {} at {}", candidate.id(), candidate.origin());
                }
                candidate.is_eligible()
            })
            .map(|candidate| match self.overrides.apply(candidate.metadata()) {
                Some(metadata) => candidate.clone().with_metadata(metadata),
                None => candidate.clone(),
            })
            .collect();

        // Group by declared identity, in order of first appearance.
        let mut groups: Vec<(String, Vec<&ModuleCandidate>)> = Vec::new();
        let mut group_index: HashMap<&str, usize> = HashMap::new();
        for candidate in &candidates {
            match group_index.get(candidate.id()) {
                Some(&index) => groups[index].1.push(candidate),
                None => {
                    group_index.insert(candidate.id(), groups.len());
                    groups.push((candidate.id().to_string(), vec![candidate]));
                }
            }
        }

        let mut selected = Vec::new();
        let mut by_id = HashMap::new();
        for (id, group) in &groups {
            match self.select(id, group) {
                Ok(chosen) => {
                    by_id.insert(id.clone(), selected.len());
                    selected.push(chosen.clone());
                }
                Err(failure) => failures.push(failure),
            }
        }

        let aliases = self.select_aliases(&selected, &by_id, &mut failures);
        let mut result = ResolutionResult {
            selected,
            by_id,
            aliases,
            warnings: Vec::new(),
        };

        self.check_relations(&mut result, &mut failures);

        if !failures.is_empty() {
            return Err(ResolutionError { failures });
        }

        for warning in &result.warnings {
            warn!("{}", warning);
        }
        info!("Resolved {} mod(s) from {} candidate(s)", result.len(), candidates.len());
        Ok(result)
    }

    /// Chooses one candidate among those declaring the same identity.
    fn select<'c>(
        &self,
        id: &str,
        group: &[&'c ModuleCandidate],
    ) -> Result<&'c ModuleCandidate, ResolutionFailure> {
        let mut best = group[0];
        let mut tied: Option<&ModuleCandidate> = None;

        for &candidate in &group[1..] {
            let ordering = compare_versions(candidate.metadata().version(), best.metadata().version())
                .map_err(|source| ResolutionFailure::UnresolvableVersionComparison {
                    requester: None,
                    target: id.to_string(),
                    origins: vec![best.origin().clone(), candidate.origin().clone()],
                    source,
                })?;

            match ordering {
                Ordering::Greater => {
                    best = candidate;
                    tied = None;
                }
                Ordering::Equal => {
                    tied.get_or_insert(candidate);
                }
                Ordering::Less => {}
            }
        }

        if let Some(other) = tied {
            return Err(ResolutionFailure::DuplicateIdentity {
                id: id.to_string(),
                first: best.origin().clone(),
                second: other.origin().clone(),
            });
        }

        if self.log_decisions {
            debug!(
                "Selected {} {} from {} ({} candidate(s))",
                id,
                best.metadata().version(),
                best.origin(),
                group.len()
            );
        }
        Ok(best)
    }

    /// Maps alias identities to selected modules. Declared identities always
    /// win over aliases; among alias providers the higher alias version wins.
    fn select_aliases(
        &self,
        selected: &[ModuleCandidate],
        by_id: &HashMap<String, usize>,
        failures: &mut Vec<ResolutionFailure>,
    ) -> BTreeMap<String, (usize, Version)> {
        let mut providers: Vec<(String, Vec<(usize, Version)>)> = Vec::new();
        for (index, candidate) in selected.iter().enumerate() {
            for alias in candidate.metadata().provides() {
                if by_id.contains_key(&alias.id) {
                    continue;
                }
                match providers.iter_mut().find(|(id, _)| *id == alias.id) {
                    Some((_, list)) => {
                        if !list.iter().any(|(i, _)| *i == index) {
                            list.push((index, alias.version.clone()));
                        }
                    }
                    None => providers.push((alias.id.clone(), vec![(index, alias.version.clone())])),
                }
            }
        }

        let mut aliases = BTreeMap::new();
        'aliases: for (alias, list) in providers {
            let mut best = 0;
            let mut tied = None;
            for current in 1..list.len() {
                match compare_versions(&list[current].1, &list[best].1) {
                    Ok(Ordering::Greater) => {
                        best = current;
                        tied = None;
                    }
                    Ok(Ordering::Equal) => {
                        tied.get_or_insert(current);
                    }
                    Ok(Ordering::Less) => {}
                    Err(source) => {
                        failures.push(ResolutionFailure::UnresolvableVersionComparison {
                            requester: None,
                            target: alias,
                            origins: vec![
                                selected[list[best].0].origin().clone(),
                                selected[list[current].0].origin().clone(),
                            ],
                            source,
                        });
                        continue 'aliases;
                    }
                }
            }

            if let Some(other) = tied {
                let first = &selected[list[best].0];
                let second = &selected[list[other].0];
                failures.push(ResolutionFailure::DuplicateAlias {
                    alias,
                    first_module: first.id().to_string(),
                    first: first.origin().clone(),
                    second_module: second.id().to_string(),
                    second: second.origin().clone(),
                });
                continue;
            }
            aliases.insert(alias, list[best].clone());
        }
        aliases
    }

    fn check_relations(&self, result: &mut ResolutionResult, failures: &mut Vec<ResolutionFailure>) {
        let mut warnings = Vec::new();

        for candidate in &result.selected {
            let metadata = candidate.metadata();
            let module = metadata.id();

            for dependency in metadata.depends() {
                let provider = result.provider(&dependency.target);
                let found = provider.map(|(_, v)| v);
                match satisfies(dependency, found) {
                    Ok(true) => {}
                    Ok(false) => failures.push(ResolutionFailure::UnsatisfiedDependency {
                        requester: module.to_string(),
                        target: dependency.target.clone(),
                        constraint: dependency.constraint.clone(),
                        found: found.cloned(),
                    }),
                    Err(source) => failures.push(ResolutionFailure::UnresolvableVersionComparison {
                        requester: Some(module.to_string()),
                        target: dependency.target.clone(),
                        origins: provider
                            .map(|(peer, _)| vec![peer.origin().clone()])
                            .unwrap_or_default(),
                        source,
                    }),
                }
            }

            for broken in metadata.breaks() {
                let Some((peer, peer_version)) = result.provider(&broken.target) else {
                    continue;
                };
                if peer.id() == module {
                    continue;
                }
                match broken.constraint.matches(peer_version) {
                    Ok(false) => {}
                    Ok(true) => failures.push(ResolutionFailure::Conflict {
                        module: module.to_string(),
                        peer: broken.target.clone(),
                        peer_version: peer_version.clone(),
                        constraint: broken.constraint.clone(),
                    }),
                    Err(source) => failures.push(ResolutionFailure::UnresolvableVersionComparison {
                        requester: Some(module.to_string()),
                        target: broken.target.clone(),
                        origins: vec![peer.origin().clone()],
                        source,
                    }),
                }
            }

            for recommended in metadata.recommends() {
                let found = result.provider(&recommended.target).map(|(_, v)| v);
                if !matches!(satisfies(recommended, found), Ok(true)) {
                    warnings.push(ResolutionWarning::MissingRecommendation {
                        module: module.to_string(),
                        target: recommended.target.clone(),
                        constraint: recommended.constraint.clone(),
                        found: found.cloned(),
                    });
                }
            }

            for conflict in metadata.conflicts() {
                let Some((peer, peer_version)) = result.provider(&conflict.target) else {
                    continue;
                };
                if peer.id() != module && matches!(conflict.constraint.matches(peer_version), Ok(true)) {
                    warnings.push(ResolutionWarning::SoftConflict {
                        module: module.to_string(),
                        peer: conflict.target.clone(),
                        peer_version: peer_version.clone(),
                        constraint: conflict.constraint.clone(),
                    });
                }
            }
        }

        result.warnings = warnings;
    }
}

fn satisfies(dependency: &Dependency, found: Option<&Version>) -> Result<bool, VersionError> {
    match found {
        Some(version) => dependency.constraint.matches(version),
        None => Ok(false),
    }
}

/// Orders two competing versions. Equal versions, opaque ones included,
/// compare as a tie so they surface as duplicates.
fn compare_versions(left: &Version, right: &Version) -> Result<Ordering, VersionError> {
    if left == right {
        return Ok(Ordering::Equal);
    }
    left.try_cmp(right)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{ModuleMetadata, ModuleMetadataBuilder};

    fn candidate(builder: ModuleMetadataBuilder, origin: &str) -> ModuleCandidate {
        ModuleCandidate::new(builder.build().unwrap(), Origin::new(origin))
    }

    fn resolve(candidates: &[ModuleCandidate]) -> Result<ResolutionResult, ResolutionError> {
        Resolver::new(&DependencyOverrides::new()).resolve_candidates(candidates)
    }

    #[test]
    fn test_highest_version_wins() {
        let result = resolve(&[
            candidate(ModuleMetadata::builder("mod-a", "1.0.0"), "a1"),
            candidate(ModuleMetadata::builder("mod-a", "2.0.0"), "a2"),
            candidate(ModuleMetadata::builder("mod-a", "1.5.0"), "a3"),
        ])
        .unwrap();

        assert_eq!(result.len(), 1);
        assert_eq!(result.get("mod-a").unwrap().origin().as_str(), "a2");
    }

    #[test]
    fn test_opaque_duplicates_are_unresolvable() {
        let err = resolve(&[
            candidate(ModuleMetadata::builder("mod-a", "snapshot"), "a1"),
            candidate(ModuleMetadata::builder("mod-a", "1.0.0"), "a2"),
        ])
        .unwrap_err();

        assert!(matches!(
            err.failures[0],
            ResolutionFailure::UnresolvableVersionComparison { ref target, .. } if target == "mod-a"
        ));
    }

    #[test]
    fn test_incomparable_duplicates_name_both_origins() {
        let err = resolve(&[
            candidate(ModuleMetadata::builder("m", "snapshot"), "mods/one.json"),
            candidate(ModuleMetadata::builder("m", "nightly"), "mods/two.json"),
        ])
        .unwrap_err();

        let failure = &err.failures[0];
        assert_eq!(failure.peers(), vec!["m (mods/one.json)", "m (mods/two.json)"]);
        let message = failure.to_string();
        assert!(message.contains("mods/one.json"));
        assert!(message.contains("mods/two.json"));
    }

    #[test]
    fn test_identical_opaque_versions_are_duplicates() {
        let err = resolve(&[
            candidate(ModuleMetadata::builder("m", "snapshot"), "mods/one.json"),
            candidate(ModuleMetadata::builder("m", "snapshot"), "mods/two.json"),
        ])
        .unwrap_err();

        assert_eq!(
            err.failures,
            vec![ResolutionFailure::DuplicateIdentity {
                id: "m".to_string(),
                first: Origin::new("mods/one.json"),
                second: Origin::new("mods/two.json"),
            }]
        );
    }

    #[test]
    fn test_incomparable_alias_providers_name_both_origins() {
        let err = resolve(&[
            candidate(ModuleMetadata::builder("a", "1.0.0").provides("api", Some("snapshot")), "mods/a.json"),
            candidate(ModuleMetadata::builder("b", "1.0.0").provides("api", Some("2.0.0")), "mods/b.json"),
        ])
        .unwrap_err();

        match &err.failures[0] {
            ResolutionFailure::UnresolvableVersionComparison { target, origins, .. } => {
                assert_eq!(target, "api");
                assert_eq!(origins, &vec![Origin::new("mods/a.json"), Origin::new("mods/b.json")]);
            }
            other => panic!("unexpected failure: {other}"),
        }
    }

    #[test]
    fn test_all_failures_are_aggregated() {
        let err = resolve(&[
            candidate(ModuleMetadata::builder("x", "1.0.0").depends("missing", "*"), "x"),
            candidate(ModuleMetadata::builder("y", "1.0.0").depends("x", ">=2"), "y"),
            candidate(ModuleMetadata::builder("p", "1.0.0").breaks("x", "*"), "p"),
        ])
        .unwrap_err();

        assert_eq!(err.failures.len(), 3);
        let subjects: Vec<&str> = err.failures.iter().map(|f| f.subject()).collect();
        assert_eq!(subjects, vec!["x", "y", "p"]);
        assert!(err.to_string().contains("which is missing"));
    }

    #[test]
    fn test_alias_satisfies_dependency() {
        let result = resolve(&[
            candidate(ModuleMetadata::builder("impl", "3.1.0").provides("api", Some("1.4.0")), "impl"),
            candidate(ModuleMetadata::builder("user", "1.0.0").depends("api", "^1.2"), "user"),
        ])
        .unwrap();

        let (provider, version) = result.provider("api").unwrap();
        assert_eq!(provider.id(), "impl");
        assert_eq!(version.to_string(), "1.4.0");
        assert_eq!(result.aliases().collect::<Vec<_>>(), vec![("api", "impl")]);
    }

    #[test]
    fn test_equal_alias_versions_are_duplicates() {
        let err = resolve(&[
            candidate(ModuleMetadata::builder("a", "1.0.0").provides("api", Some("1.0.0")), "a"),
            candidate(ModuleMetadata::builder("b", "1.0.0").provides("api", Some("1.0.0")), "b"),
        ])
        .unwrap_err();

        assert!(matches!(
            err.failures[0],
            ResolutionFailure::DuplicateAlias { ref first_module, ref second_module, .. }
                if first_module == "a" && second_module == "b"
        ));
    }

    #[test]
    fn test_soft_relations_only_warn() {
        let result = resolve(&[
            candidate(
                ModuleMetadata::builder("a", "1.0.0")
                    .recommends("extras", "*")
                    .conflicts("b", "<2"),
                "a",
            ),
            candidate(ModuleMetadata::builder("b", "1.5.0"), "b"),
        ])
        .unwrap();

        assert_eq!(result.warnings().len(), 2);
        assert!(result.warnings()[0].to_string().contains("recommends `extras`"));
        assert!(matches!(result.warnings()[1], ResolutionWarning::SoftConflict { .. }));
    }

    #[test]
    fn test_disabled_and_overridden_candidates() {
        let mut overrides = DependencyOverrides::new();
        overrides.replace_dependency("x", "y", VersionConstraint::parse(">=1.0").unwrap());

        let candidates = [
            candidate(ModuleMetadata::builder("x", "1.0.0").depends("y", ">=5"), "x"),
            candidate(ModuleMetadata::builder("y", "1.0.0"), "y"),
            candidate(ModuleMetadata::builder("z", "1.0.0"), "z").with_eligibility(false),
        ];
        let result = Resolver::new(&overrides).resolve_candidates(&candidates).unwrap();

        assert!(result.get("z").is_none());
        assert_eq!(result.get("x").unwrap().metadata().depends()[0].constraint.as_str(), ">=1.0");
    }

    #[test]
    fn test_failure_tree_groups_by_module() {
        let err = resolve(&[
            candidate(
                ModuleMetadata::builder("x", "1.0.0")
                    .depends("a", "*")
                    .depends("b", "*"),
                "x",
            ),
        ])
        .unwrap_err();

        let text = err.to_status_tree().render_text();
        assert_eq!(text.matches("[x] x\n").count(), 1);
        assert!(text.contains("a (missing)"));
        assert!(text.contains("b (missing)"));
    }
}
