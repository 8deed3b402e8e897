//! Discovery sources that feed the candidate pool.

use crate::candidate::{CandidatePool, ModuleCandidate, Origin, SourceId};
use crate::descriptor::read_candidate;
use crate::metadata::{ModuleMetadata, ParseError};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Identity of the loader's own built-in module.
pub const LOADER_MODULE_ID: &str = "mod_loader";

/// File name looked up inside module directories.
pub const DESCRIPTOR_FILE: &str = "mod.json";

#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("failed to read mods directory {path}: {source}")]
    ReadDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path} is not a directory")]
    NotADirectory { path: PathBuf },
}

/// Produces candidates for the pool.
///
/// A finder pushes well-formed candidates and reports per-candidate parse
/// failures to its own source; only failures of the source as a whole are
/// returned as errors.
pub trait CandidateFinder: Send + Sync {
    fn name(&self) -> &str;

    fn find(&self, pool: &CandidatePool, source: SourceId) -> Result<(), DiscoveryError>;
}

/// Reads `*.json` descriptors and `<dir>/mod.json` from one directory.
#[derive(Debug, Clone)]
pub struct DirectoryCandidateFinder {
    directory: PathBuf,
    name: String,
}

impl DirectoryCandidateFinder {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        let directory = directory.into();
        let name = format!("directory {}", directory.display());
        Self { directory, name }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Descriptor files in the directory, sorted by path.
    fn descriptor_paths(&self) -> Result<Vec<PathBuf>, DiscoveryError> {
        let entries = std::fs::read_dir(&self.directory).map_err(|source| DiscoveryError::ReadDir {
            path: self.directory.clone(),
            source,
        })?;

        let mut paths = Vec::new();
        for entry in entries {
            let path = entry
                .map_err(|source| DiscoveryError::ReadDir {
                    path: self.directory.clone(),
                    source,
                })?
                .path();

            if path.is_dir() {
                let nested = path.join(DESCRIPTOR_FILE);
                if nested.is_file() {
                    paths.push(nested);
                }
            } else if path.extension().is_some_and(|ext| ext == "json") {
                paths.push(path);
            }
        }
        paths.sort();
        Ok(paths)
    }
}

impl CandidateFinder for DirectoryCandidateFinder {
    fn name(&self) -> &str {
        &self.name
    }

    fn find(&self, pool: &CandidatePool, source: SourceId) -> Result<(), DiscoveryError> {
        if !self.directory.exists() {
            warn!("Mods directory does not exist: {}", self.directory.display());
            return Ok(());
        }
        if !self.directory.is_dir() {
            return Err(DiscoveryError::NotADirectory {
                path: self.directory.clone(),
            });
        }

        let mut found = 0;
        for path in self.descriptor_paths()? {
            match read_candidate(&path) {
                Ok(candidate) => {
                    debug!("Found {} {} at {}", candidate.id(), candidate.metadata().version(), path.display());
                    pool.push(source, candidate);
                    found += 1;
                }
                Err(e) => {
                    warn!("Skipping unreadable descriptor {}: {}", path.display(), e);
                    pool.report_parse_error(source, e);
                }
            }
        }

        info!("Discovered {} candidate(s) in {}", found, self.directory.display());
        Ok(())
    }
}

/// Candidates supplied in memory, such as the loader itself.
#[derive(Debug, Clone)]
pub struct StaticCandidateFinder {
    name: String,
    candidates: Vec<ModuleCandidate>,
}

impl StaticCandidateFinder {
    pub fn new(name: impl Into<String>, candidates: Vec<ModuleCandidate>) -> Self {
        Self {
            name: name.into(),
            candidates,
        }
    }

    /// The built-in source holding the loader's own module.
    pub fn builtin() -> Result<Self, ParseError> {
        Ok(Self::new("builtin", vec![loader_candidate()?]))
    }
}

impl CandidateFinder for StaticCandidateFinder {
    fn name(&self) -> &str {
        &self.name
    }

    fn find(&self, pool: &CandidatePool, source: SourceId) -> Result<(), DiscoveryError> {
        for candidate in &self.candidates {
            pool.push(source, candidate.clone());
        }
        Ok(())
    }
}

/// The loader's own module, so others can depend on a loader version.
pub fn loader_candidate() -> Result<ModuleCandidate, ParseError> {
    let metadata = ModuleMetadata::builder(LOADER_MODULE_ID, env!("CARGO_PKG_VERSION"))
        .name("Mod Loader")
        .build()?;
    Ok(ModuleCandidate::new(metadata, Origin::builtin()))
}

/// Runs every finder in sequence, each under its own source.
pub fn discover_all(finders: &[&dyn CandidateFinder], pool: &CandidatePool) -> Result<(), DiscoveryError> {
    for finder in finders {
        let source = pool.open_source(finder.name());
        finder.find(pool, source)?;
    }
    Ok(())
}
