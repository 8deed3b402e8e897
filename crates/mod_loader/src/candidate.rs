//! Discovered module candidates and the pool that accumulates them.

use crate::metadata::{ModuleMetadata, ParseError};
use dashmap::DashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Opaque locator of a candidate (a path, an archive entry, `builtin`, ...).
///
/// Used only for diagnostics and, after resolution, for loading code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Origin(String);

impl Origin {
    pub fn new(locator: impl Into<String>) -> Self {
        Self(locator.into())
    }

    pub fn builtin() -> Self {
        Self("<builtin>".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Module metadata paired with where it was found.
#[derive(Debug, Clone, PartialEq)]
pub struct ModuleCandidate {
    metadata: Arc<ModuleMetadata>,
    origin: Origin,
    eligible: bool,
}

impl ModuleCandidate {
    pub fn new(metadata: ModuleMetadata, origin: Origin) -> Self {
        Self {
            metadata: Arc::new(metadata),
            origin,
            eligible: true,
        }
    }

    pub fn metadata(&self) -> &ModuleMetadata {
        &self.metadata
    }

    pub fn shared_metadata(&self) -> Arc<ModuleMetadata> {
        Arc::clone(&self.metadata)
    }

    pub fn origin(&self) -> &Origin {
        &self.origin
    }

    pub fn id(&self) -> &str {
        self.metadata.id()
    }

    /// Whether the candidate may take part in selection at all.
    pub fn is_eligible(&self) -> bool {
        self.eligible
    }

    pub fn with_eligibility(self, eligible: bool) -> Self {
        Self { eligible, ..self }
    }

    pub fn with_metadata(self, metadata: ModuleMetadata) -> Self {
        Self {
            metadata: Arc::new(metadata),
            ..self
        }
    }
}

/// Handle for one discovery source feeding the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceId(usize);

impl SourceId {
    /// The source used by [`CandidatePool::add`].
    pub const DIRECT: SourceId = SourceId(0);
}

#[derive(Debug, Default)]
struct SourceBatch {
    name: String,
    candidates: Vec<ModuleCandidate>,
    errors: Vec<ParseError>,
}

/// Candidates accumulated from any number of discovery sources.
///
/// Appending is safe from several threads at once. Each source keeps its own
/// insertion order, and sources are read back in the order they were opened,
/// so the resulting candidate list is the same however the sources
/// interleaved.
#[derive(Debug)]
pub struct CandidatePool {
    batches: DashMap<usize, SourceBatch>,
    next_source: AtomicUsize,
}

impl Default for CandidatePool {
    fn default() -> Self {
        Self::new()
    }
}

impl CandidatePool {
    pub fn new() -> Self {
        let batches = DashMap::new();
        batches.insert(
            SourceId::DIRECT.0,
            SourceBatch {
                name: "direct".to_string(),
                ..SourceBatch::default()
            },
        );
        Self {
            batches,
            next_source: AtomicUsize::new(1),
        }
    }

    /// Registers a discovery source. Sources opened earlier sort first.
    pub fn open_source(&self, name: &str) -> SourceId {
        let id = self.next_source.fetch_add(1, Ordering::SeqCst);
        self.batches.insert(
            id,
            SourceBatch {
                name: name.to_string(),
                ..SourceBatch::default()
            },
        );
        SourceId(id)
    }

    pub fn push(&self, source: SourceId, candidate: ModuleCandidate) {
        self.batches
            .entry(source.0)
            .or_default()
            .candidates
            .push(candidate);
    }

    /// Records a per-candidate parse failure; the candidate never enters the pool.
    pub fn report_parse_error(&self, source: SourceId, error: ParseError) {
        self.batches.entry(source.0).or_default().errors.push(error);
    }

    /// Appends to the direct source.
    pub fn add(&self, candidate: ModuleCandidate) {
        self.push(SourceId::DIRECT, candidate);
    }

    pub fn source_name(&self, source: SourceId) -> Option<String> {
        self.batches.get(&source.0).map(|batch| batch.name.clone())
    }

    /// All candidates, ordered by source and then by insertion.
    pub fn candidates(&self) -> Vec<ModuleCandidate> {
        let mut sources: Vec<usize> = self.batches.iter().map(|entry| *entry.key()).collect();
        sources.sort_unstable();

        sources
            .into_iter()
            .filter_map(|source| self.batches.get(&source))
            .flat_map(|batch| batch.candidates.clone())
            .collect()
    }

    /// Removes and returns every recorded parse failure, in source order.
    pub fn take_parse_errors(&self) -> Vec<ParseError> {
        let mut sources: Vec<usize> = self.batches.iter().map(|entry| *entry.key()).collect();
        sources.sort_unstable();

        let mut errors = Vec::new();
        for source in sources {
            if let Some(mut batch) = self.batches.get_mut(&source) {
                errors.append(&mut batch.errors);
            }
        }
        errors
    }

    pub fn len(&self) -> usize {
        self.batches.iter().map(|batch| batch.candidates.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
