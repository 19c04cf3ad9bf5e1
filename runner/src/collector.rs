pub mod graph;


use crate::config::BenchmarkConfig;
use globset::{GlobBuilder, GlobMatcher};
use graph::Graph;
use ignore::{DirEntry, WalkBuilder};
use itertools::Itertools;
use std::{
    collections::BTreeSet,
    io,
    path::{Path, PathBuf},
    sync::Arc,
};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum CollectorError {
    #[error("Glob was invalid")]
    InvalidGlob(#[from] globset::Error),
    #[error("Benchmark set {0} has no paths to search")]
    NoPaths(String),
    #[error("Failed to read {path:?}: {source}")]
    Read { path: PathBuf, source: io::Error },
    #[error("Failed to read graph")]
    Io(io::Error),
    #[error("{path:?}:{line}: {reason}")]
    Malformed {
        path: PathBuf,
        line: usize,
        reason: &'static str,
    },
    #[error("Graph has no `p tw` problem line")]
    MissingProblemLine,
}

/// A single benchmark input, read-only once enumerated
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instance {
    pub benchmark: String,
    pub name: String,
    pub path: PathBuf,
    pub vertices: usize,
    pub edges: usize,
}

impl Instance {
    /// read the graph header and edge count of a `.gr` file
    pub fn load(benchmark: &str, path: &Path) -> Result<Self, CollectorError> {
        let graph = Graph::read(path)?;

        Ok(Self {
            benchmark: benchmark.to_owned(),
            name: instance_name(path),
            path: path.to_path_buf(),
            vertices: graph.vertices,
            edges: graph.edges.len(),
        })
    }
}

/// All instances of one benchmark set, sorted by name
#[derive(Debug, Clone)]
pub struct InstanceSet {
    pub name: String,
    pub instances: Vec<Arc<Instance>>,
}

/// Walks the roots of a benchmark set and keeps every file matching its glob
#[derive(Debug)]
pub struct Collector {
    name: String,
    roots: Vec<PathBuf>,
    glob: GlobMatcher,
}

impl Collector {
    pub fn load(name: &str, config: &BenchmarkConfig) -> Result<Self, CollectorError> {
        let roots = config.roots();

        if roots.is_empty() {
            return Err(CollectorError::NoPaths(name.to_owned()));
        }

        let glob = GlobBuilder::new(config.glob.as_str())
            .literal_separator(true)
            .build()?
            .compile_matcher();

        debug!(benchmark = name, glob = %config.glob, "Filtering with glob");

        Ok(Self {
            name: name.to_owned(),
            roots,
            glob,
        })
    }

    /// matching files, sorted by path
    pub fn paths(&self) -> Vec<PathBuf> {
        let mut paths = BTreeSet::new();

        for root in self.roots.iter() {
            let mut builder = WalkBuilder::new(root);
            // benchmark checkouts are not source trees, only skip hidden entries
            builder.standard_filters(false).hidden(true);

            builder
                .build()
                .filter_map(|entry| match entry {
                    Ok(entry) => Some(entry),
                    Err(error) => {
                        warn!(benchmark = %self.name, error = %error, "Failed to search for instances");
                        None
                    }
                })
                .filter(|entry| entry.file_type().is_some_and(|kind| kind.is_file()))
                .map(DirEntry::into_path)
                .filter(|path| {
                    let relative = path.strip_prefix(root).unwrap_or(path);
                    self.glob.is_match(relative)
                })
                .for_each(|path| {
                    paths.insert(path);
                });
        }

        paths.into_iter().collect_vec()
    }

    /// Enumerate the benchmark set. Unreadable graphs and duplicate instance names are
    /// skipped with a warning so that every (set, instance) key stays unique.
    pub fn collect(&self) -> InstanceSet {
        let mut seen = BTreeSet::new();
        let mut instances = Vec::new();

        for path in self.paths() {
            match Instance::load(&self.name, &path) {
                Ok(instance) => {
                    if seen.insert(instance.name.clone()) {
                        instances.push(Arc::new(instance));
                    } else {
                        warn!(
                            benchmark = %self.name,
                            path = ?path,
                            "Skipped instance, another file with the same name was already found"
                        );
                    }
                }
                Err(error) => {
                    warn!(benchmark = %self.name, error = %error, "Skipped unreadable instance");
                }
            }
        }

        // enumeration order matches the order of result rows
        instances.sort_by(|a, b| a.name.cmp(&b.name));

        debug!(
            benchmark = %self.name,
            instances = instances.len(),
            "Collected benchmark set"
        );

        InstanceSet {
            name: self.name.clone(),
            instances,
        }
    }
}

/// the file stem, `foo/bar.gr` is instance `bar`
pub fn instance_name(path: &Path) -> String {
    path.file_stem()
        .unwrap_or(path.as_os_str())
        .to_string_lossy()
        .into_owned()
}
