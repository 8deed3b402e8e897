//! Module versions and version constraints.
//!
//! A [`Version`] is either semantic (`N(.N)*[-pre][+build]`) or opaque. Only two
//! semantic versions can be ordered; every other ordered comparison is an
//! [`VersionError::Incomparable`] error rather than a guess.

use semver::Prerelease;
use std::cmp::Ordering;
use std::fmt;

/// Errors produced while parsing or comparing versions.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VersionError {
    #[error("cannot order `{left}` against `{right}`: both sides must be semantic versions")]
    Incomparable { left: String, right: String },

    #[error("invalid semantic version `{input}`: {reason}")]
    InvalidSemantic { input: String, reason: String },

    #[error("invalid version constraint `{input}`: {reason}")]
    InvalidConstraint { input: String, reason: String },
}

// ============================================================================
// Semantic versions
// ============================================================================

/// A semantic version with an arbitrary number of numeric components.
///
/// Missing trailing components compare as zero, so `1.2` equals `1.2.0`.
/// Build metadata is kept for display but ignored by ordering and equality.
#[derive(Debug, Clone)]
pub struct SemanticVersion {
    components: Vec<u64>,
    pre: Option<Prerelease>,
    build: Option<String>,
}

impl SemanticVersion {
    /// Parses `input` as a semantic version.
    pub fn parse(input: &str) -> Result<Self, VersionError> {
        let invalid = |reason: &str| VersionError::InvalidSemantic {
            input: input.to_string(),
            reason: reason.to_string(),
        };

        let (rest, build) = match input.split_once('+') {
            Some((rest, build)) if !build.is_empty() => (rest, Some(build.to_string())),
            Some(_) => return Err(invalid("empty build metadata")),
            None => (input, None),
        };

        let (core, pre) = match rest.split_once('-') {
            Some((core, pre)) => {
                let pre = Prerelease::new(pre).map_err(|e| invalid(&e.to_string()))?;
                if pre.is_empty() {
                    return Err(invalid("empty pre-release"));
                }
                (core, Some(pre))
            }
            None => (rest, None),
        };

        if core.is_empty() {
            return Err(invalid("missing version number"));
        }

        let components = core
            .split('.')
            .map(|part| {
                if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                    return Err(invalid(&format!("`{part}` is not a number")));
                }
                part.parse::<u64>()
                    .map_err(|_| invalid(&format!("`{part}` is out of range")))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            components,
            pre,
            build,
        })
    }

    /// Returns the numeric component at `index`, or zero when absent.
    pub fn component(&self, index: usize) -> u64 {
        self.components.get(index).copied().unwrap_or(0)
    }

    /// Number of dot-separated numeric components as written.
    pub fn component_count(&self) -> usize {
        self.components.len()
    }

    pub fn components(&self) -> &[u64] {
        &self.components
    }

    pub fn prerelease(&self) -> Option<&str> {
        self.pre.as_ref().map(Prerelease::as_str)
    }

    pub fn build(&self) -> Option<&str> {
        self.build.as_deref()
    }
}

impl Ord for SemanticVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        let width = self.components.len().max(other.components.len());
        for index in 0..width {
            match self.component(index).cmp(&other.component(index)) {
                Ordering::Equal => {}
                unequal => return unequal,
            }
        }

        // A release sorts above any of its pre-releases.
        match (&self.pre, &other.pre) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Greater,
            (Some(_), None) => Ordering::Less,
            (Some(a), Some(b)) => a.cmp(b),
        }
    }
}

impl PartialOrd for SemanticVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for SemanticVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for SemanticVersion {}

impl fmt::Display for SemanticVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for component in &self.components {
            if !first {
                f.write_str(".")?;
            }
            write!(f, "{component}")?;
            first = false;
        }
        if let Some(pre) = &self.pre {
            write!(f, "-{pre}")?;
        }
        if let Some(build) = &self.build {
            write!(f, "+{build}")?;
        }
        Ok(())
    }
}

// ============================================================================
// Versions
// ============================================================================

/// The declared version of a module.
#[derive(Debug, Clone)]
pub enum Version {
    Semantic(SemanticVersion),
    /// A version string that does not follow semantic versioning. It can only
    /// be compared for equality.
    Opaque(String),
}

impl Version {
    /// Parses a version, falling back to an opaque version when the input is
    /// not semantic. Never fails.
    pub fn parse(input: &str) -> Self {
        let trimmed = input.trim();
        match SemanticVersion::parse(trimmed) {
            Ok(version) => Version::Semantic(version),
            Err(_) => Version::Opaque(trimmed.to_string()),
        }
    }

    pub fn is_semantic(&self) -> bool {
        matches!(self, Version::Semantic(_))
    }

    pub fn as_semantic(&self) -> Option<&SemanticVersion> {
        match self {
            Version::Semantic(version) => Some(version),
            Version::Opaque(_) => None,
        }
    }

    /// Orders two versions. Fails unless both are semantic.
    pub fn try_cmp(&self, other: &Version) -> Result<Ordering, VersionError> {
        match (self, other) {
            (Version::Semantic(a), Version::Semantic(b)) => Ok(a.cmp(b)),
            _ => Err(VersionError::Incomparable {
                left: self.to_string(),
                right: other.to_string(),
            }),
        }
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Version::Semantic(a), Version::Semantic(b)) => a == b,
            (Version::Opaque(a), Version::Opaque(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Version::Semantic(version) => version.fmt(f),
            Version::Opaque(raw) => f.write_str(raw),
        }
    }
}

// ============================================================================
// Constraints
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operator {
    Exact,
    Greater,
    GreaterOrEqual,
    Less,
    LessOrEqual,
    SameMajor,
    SameMinor,
}

impl Operator {
    fn is_ordered(self) -> bool {
        !matches!(self, Operator::Exact)
    }
}

#[derive(Debug, Clone)]
enum Term {
    Compare(Operator, Version),
    /// `1.2.x`: the leading components must equal the prefix.
    Prefix(Vec<u64>),
}

impl Term {
    fn matches(&self, version: &Version) -> Result<bool, VersionError> {
        match self {
            Term::Compare(Operator::Exact, expected) => match (expected, version) {
                (Version::Semantic(a), Version::Semantic(b)) => Ok(a == b),
                // Equality on raw text is well defined for mixed kinds.
                _ => Ok(expected.to_string() == version.to_string()),
            },
            Term::Compare(op, bound) => {
                let (Version::Semantic(actual), Version::Semantic(bound)) = (version, bound) else {
                    return Err(VersionError::Incomparable {
                        left: version.to_string(),
                        right: bound.to_string(),
                    });
                };
                let ordering = actual.cmp(bound);
                Ok(match op {
                    Operator::Greater => ordering == Ordering::Greater,
                    Operator::GreaterOrEqual => ordering != Ordering::Less,
                    Operator::Less => ordering == Ordering::Less,
                    Operator::LessOrEqual => ordering != Ordering::Greater,
                    Operator::SameMajor => {
                        ordering != Ordering::Less && actual.component(0) == bound.component(0)
                    }
                    Operator::SameMinor => {
                        ordering != Ordering::Less
                            && actual.component(0) == bound.component(0)
                            && actual.component(1) == bound.component(1)
                    }
                    Operator::Exact => ordering == Ordering::Equal,
                })
            }
            Term::Prefix(prefix) => match version {
                Version::Semantic(actual) => Ok(prefix
                    .iter()
                    .enumerate()
                    .all(|(index, expected)| actual.component(index) == *expected)),
                Version::Opaque(_) => Err(VersionError::Incomparable {
                    left: version.to_string(),
                    right: format!("{}.x", join_components(prefix)),
                }),
            },
        }
    }
}

fn join_components(components: &[u64]) -> String {
    components
        .iter()
        .map(u64::to_string)
        .collect::<Vec<_>>()
        .join(".")
}

/// A predicate over [`Version`].
///
/// Whitespace-separated terms must all hold; `||` separates alternatives of
/// which at least one must hold. `*` matches anything.
#[derive(Debug, Clone)]
pub struct VersionConstraint {
    raw: String,
    alternatives: Vec<Vec<Term>>,
}

impl VersionConstraint {
    /// The constraint that every version satisfies.
    pub fn any() -> Self {
        Self {
            raw: "*".to_string(),
            alternatives: vec![Vec::new()],
        }
    }

    /// A constraint satisfied only by `version`.
    pub fn exact(version: &Version) -> Self {
        Self {
            raw: format!("={version}"),
            alternatives: vec![vec![Term::Compare(Operator::Exact, version.clone())]],
        }
    }

    /// Parses a constraint expression such as `>=1.2.0 <2`, `^1.4 || 2.x` or `*`.
    pub fn parse(input: &str) -> Result<Self, VersionError> {
        let raw = input.trim();
        let mut alternatives = Vec::new();

        for alternative in raw.split("||") {
            let alternative = alternative.trim();
            if alternative.is_empty() {
                if raw.is_empty() {
                    return Ok(Self::any());
                }
                return Err(VersionError::InvalidConstraint {
                    input: raw.to_string(),
                    reason: "empty alternative".to_string(),
                });
            }
            alternatives.push(parse_conjunction(raw, alternative)?);
        }

        Ok(Self {
            raw: raw.to_string(),
            alternatives,
        })
    }

    /// Builds a constraint satisfied when any of `inputs` is satisfied.
    pub fn any_of<S: AsRef<str>>(inputs: &[S]) -> Result<Self, VersionError> {
        if inputs.is_empty() {
            return Ok(Self::any());
        }
        let joined = inputs
            .iter()
            .map(|s| s.as_ref().trim())
            .collect::<Vec<_>>()
            .join(" || ");
        Self::parse(&joined)
    }

    pub fn is_any(&self) -> bool {
        self.alternatives.iter().any(Vec::is_empty)
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Does `version` satisfy this constraint?
    ///
    /// Returns an error only when no alternative is satisfied and at least one
    /// of them required ordering a non-semantic version.
    pub fn matches(&self, version: &Version) -> Result<bool, VersionError> {
        let mut incomparable = None;

        'alternatives: for terms in &self.alternatives {
            for term in terms {
                match term.matches(version) {
                    Ok(true) => {}
                    Ok(false) => continue 'alternatives,
                    Err(e) => {
                        incomparable.get_or_insert(e);
                        continue 'alternatives;
                    }
                }
            }
            return Ok(true);
        }

        match incomparable {
            Some(e) => Err(e),
            None => Ok(false),
        }
    }
}

impl PartialEq for VersionConstraint {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl fmt::Display for VersionConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

fn parse_conjunction(raw: &str, alternative: &str) -> Result<Vec<Term>, VersionError> {
    let invalid = |reason: String| VersionError::InvalidConstraint {
        input: raw.to_string(),
        reason,
    };

    let mut terms = Vec::new();
    let mut tokens = alternative.split_whitespace().peekable();

    while let Some(token) = tokens.next() {
        let (op, rest) = split_operator(token);

        // Allow `>= 1.0` with a space after the operator.
        let text = if rest.is_empty() {
            match tokens.next() {
                Some(next) => next.to_string(),
                None => return Err(invalid(format!("operator `{token}` has no version"))),
            }
        } else {
            rest.to_string()
        };

        if text == "*" || text.eq_ignore_ascii_case("x") {
            if op.is_some_and(Operator::is_ordered) {
                return Err(invalid(format!("`{token}` cannot apply an ordering to a wildcard")));
            }
            continue;
        }

        if let Some(prefix) = parse_wildcard_prefix(&text).map_err(&invalid)? {
            if op.is_some_and(Operator::is_ordered) {
                return Err(invalid(format!("`{token}` cannot apply an ordering to a wildcard")));
            }
            terms.push(Term::Prefix(prefix));
            continue;
        }

        let op = op.unwrap_or(Operator::Exact);
        let version = Version::parse(&text);
        if op.is_ordered() && !version.is_semantic() {
            return Err(invalid(format!(
                "`{text}` is not a semantic version and cannot be ordered"
            )));
        }
        terms.push(Term::Compare(op, version));
    }

    Ok(terms)
}

fn split_operator(token: &str) -> (Option<Operator>, &str) {
    const OPERATORS: [(&str, Operator); 7] = [
        (">=", Operator::GreaterOrEqual),
        ("<=", Operator::LessOrEqual),
        (">", Operator::Greater),
        ("<", Operator::Less),
        ("=", Operator::Exact),
        ("^", Operator::SameMajor),
        ("~", Operator::SameMinor),
    ];

    for (prefix, op) in OPERATORS {
        if let Some(rest) = token.strip_prefix(prefix) {
            return (Some(op), rest);
        }
    }
    (None, token)
}

/// Parses `1.2.x` style versions into their numeric prefix.
fn parse_wildcard_prefix(text: &str) -> Result<Option<Vec<u64>>, String> {
    let parts: Vec<&str> = text.split('.').collect();
    let Some(wildcard) = parts
        .iter()
        .position(|p| *p == "*" || p.eq_ignore_ascii_case("x"))
    else {
        return Ok(None);
    };

    if parts[wildcard + 1..]
        .iter()
        .any(|p| *p != "*" && !p.eq_ignore_ascii_case("x"))
    {
        return Err(format!("`{text}` has components after a wildcard"));
    }

    parts[..wildcard]
        .iter()
        .map(|p| {
            p.parse::<u64>()
                .map_err(|_| format!("`{p}` is not a number in `{text}`"))
        })
        .collect::<Result<Vec<_>, _>>()
        .map(Some)
}
