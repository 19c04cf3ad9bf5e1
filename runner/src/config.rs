
use crate::{
    executors::RunOptions,
    registry::{Mode, SolverDescriptor, SolverRegistry},
};
use globset::GlobBuilder;
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fs::{self, File},
    io::Error,
    os::unix::fs::MetadataExt,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};
use thiserror::Error;
use tracing::{error, warn};

// check if a file is executable
pub fn check_executable(path: &Path) -> Result<bool, ConfigErrors> {
    if !path.is_file() {
        Err(ConfigErrors::FileNotFound(path.to_path_buf()))
    } else {
        match File::open(path).map(|file| file.metadata()) {
            Ok(Ok(metadata)) => Ok((metadata.mode() & 0o111) != 0),
            Ok(Err(e)) | Err(e) => Err(ConfigErrors::MetadataNotFound(e)),
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigErrors {
    #[error("File not found: {0:?}")]
    FileNotFound(PathBuf),
    #[error("Metadata not found")]
    MetadataNotFound(#[source] Error),
    #[error("Failed to read config {path:?}: {source}")]
    Read { path: PathBuf, source: Error },
    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Solver {0} is not defined")]
    UnknownSolver(String),
    #[error("Benchmark set {0} is not defined")]
    UnknownBenchmark(String),
    #[error("Config failed preflight checks")]
    Preflight,
}

/// Complete suite description, usually loaded from a yaml file
#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct SuiteConfig {
    #[serde(default)]
    pub executor: ExecutorConfig,
    // Solvers as executables with an argument template
    pub solvers: BTreeMap<String, SolverDescriptor>,
    // Benchmark sets as directories of .gr files
    #[serde(alias = "tests")]
    pub benchmarks: BTreeMap<String, BenchmarkConfig>,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct ExecutorConfig {
    // size of the worker pool
    #[serde(default = "default_jobs")]
    pub jobs: usize,
    // seconds per trial
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    // seconds between SIGTERM and SIGKILL
    #[serde(default = "default_grace")]
    pub grace: u64,
    #[serde(default)]
    pub max_instances: Option<usize>,
    #[serde(default)]
    pub mode: Mode,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            jobs: default_jobs(),
            timeout: default_timeout(),
            grace: default_grace(),
            max_instances: None,
            mode: Mode::default(),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default)]
#[serde(deny_unknown_fields)]
pub struct BenchmarkConfig {
    #[serde(default)]
    pub paths: Vec<PathBuf>,
    pub path: Option<PathBuf>,
    #[serde(default = "default_glob")]
    pub glob: String,
}

impl BenchmarkConfig {
    /// `path` is treated as a member of `paths`
    pub fn roots(&self) -> Vec<PathBuf> {
        let mut roots = self.paths.clone();

        if let Some(ref path) = self.path {
            if !roots.contains(path) {
                roots.push(path.clone());
            }
        }

        roots
    }
}

impl FromStr for SuiteConfig {
    type Err = ConfigErrors;

    fn from_str(content: &str) -> Result<Self, Self::Err> {
        let mut config: Self = serde_yaml::from_str(content)?;

        for (name, solver) in config.solvers.iter_mut() {
            solver.name = name.clone();
        }

        Ok(config)
    }
}

impl SuiteConfig {
    /// read a suite file, relative paths are resolved against its directory
    pub fn load(path: &Path) -> Result<Self, ConfigErrors> {
        let content = fs::read_to_string(path).map_err(|source| ConfigErrors::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_str(&content)?;

        if let Some(base) = path.parent().filter(|base| !base.as_os_str().is_empty()) {
            config.rebase(base);
        }

        Ok(config)
    }

    fn rebase(&mut self, base: &Path) {
        for solver in self.solvers.values_mut() {
            // bare command names are looked up in PATH instead
            if solver.exec.components().count() > 1 && solver.exec.is_relative() {
                solver.exec = base.join(&solver.exec);
            }
            if let Some(ref mut workdir) = solver.workdir {
                if workdir.is_relative() {
                    *workdir = base.join(&*workdir);
                }
            }
        }

        for set in self.benchmarks.values_mut() {
            for path in set.paths.iter_mut().chain(set.path.iter_mut()) {
                if path.is_relative() {
                    *path = base.join(&*path);
                }
            }
        }
    }

    pub fn registry(&self) -> SolverRegistry {
        SolverRegistry::new(&self.solvers)
    }

    pub fn run_options(&self) -> RunOptions {
        RunOptions {
            jobs: self.executor.jobs,
            timeout: Duration::from_secs(self.executor.timeout),
            grace: Duration::from_secs(self.executor.grace),
            max_instances: self.executor.max_instances,
            mode: self.executor.mode,
        }
    }

    /// Benchmark sets by name in registry order, an empty selection or `all` selects
    /// every set
    pub fn select_benchmarks(
        &self,
        names: &[String],
    ) -> Result<Vec<(&String, &BenchmarkConfig)>, ConfigErrors> {
        if names.is_empty() || names.iter().any(|name| name == "all") {
            return Ok(self.benchmarks.iter().collect());
        }

        if let Some(unknown) = names
            .iter()
            .find(|name| !self.benchmarks.contains_key(name.as_str()))
        {
            return Err(ConfigErrors::UnknownBenchmark(unknown.clone()));
        }

        Ok(self
            .benchmarks
            .iter()
            .filter(|(name, _)| names.contains(name))
            .collect())
    }

    pub fn preflight_checks(&mut self) -> bool {
        // attempt to catch all errors instead of piece-by-piece to make debugging easier for users
        let mut contains_error = false;

        if self.solvers.is_empty() {
            error!("No solver was defined, unable to build a queue of trials");
            contains_error = true;
        }

        if self.benchmarks.is_empty() {
            error!("No benchmark set was defined, unable to build a queue of trials");
            contains_error = true;
        }

        if self.executor.jobs == 0 {
            error!("executor.jobs cannot be 0, at least one worker is required");
            contains_error = true;
        }

        if self.executor.timeout == 0 {
            error!("executor.timeout cannot be 0");
            contains_error = true;
        }

        for (name, solver) in self.solvers.iter() {
            if solver.modes.is_empty() {
                error!("solvers.{name}.modes must contain at least one of `exact` or `heuristic`");
                contains_error = true;
            }

            if solver.timeout == Some(0) {
                error!("solvers.{name}.timeout cannot be 0");
                contains_error = true;
            }

            // a missing solver is not fatal, its trials are reported as errors
            match solver.resolve_exec() {
                Some(exec) => match check_executable(&exec) {
                    Ok(true) => {}
                    Ok(false) => warn!(
                        "Solver {name} target {} is not executable, its trials will fail",
                        exec.to_string_lossy()
                    ),
                    Err(e) => warn!(
                        "Failed to determine if solvers.{name}.exec ({}) is an executable: {e}",
                        exec.to_string_lossy()
                    ),
                },
                None => warn!(
                    "Failed to find solvers.{name}.exec ({}), its trials will fail",
                    solver.exec.to_string_lossy()
                ),
            }
        }

        for (name, set) in self.benchmarks.iter_mut() {
            if set.path.is_none() && set.paths.is_empty() {
                error!("Benchmark {name} contains neither 'path' nor 'paths', a benchmark set can't be empty");
                contains_error = true;
            } else if set.path.is_some() && !set.paths.is_empty() {
                warn!("Benchmark {name} contains both 'path' and 'paths'. This will be treated as if 'path' is a member of 'paths'");
            }
            // merge path into paths if neccessary
            set.paths = set.roots();
            set.path = None;

            if let Err(e) = GlobBuilder::new(&set.glob).build() {
                error!("Failed to compile glob for benchmark {name}: {e}");
                contains_error = true;
            }
        }

        contains_error
    }
}

fn default_jobs() -> usize {
    1
}

fn default_timeout() -> u64 {
    300
}

fn default_grace() -> u64 {
    5
}

fn default_glob() -> String {
    "**/*.gr".to_owned()
}
