pub mod local;
pub mod process;
pub mod trial;


pub use local::LocalExecutor;
pub use trial::TrialRunner;

use crate::{
    collector::{CollectorError, Instance, InstanceSet},
    registry::{Mode, SolverDescriptor},
    results::TrialKey,
};
use itertools::iproduct;
use std::{io, path::PathBuf, sync::Arc, time::Duration};
use thiserror::Error;
use tracing::warn;

/// Failures of the harness itself, never caused by the solver under test
#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("Failed to spawn solver: {0}")]
    Spawn(#[source] io::Error),
    #[error("Failed to wait for solver: {0}")]
    Wait(#[source] io::Error),
    #[error("Failed to read input {path:?}: {source}")]
    Input { path: PathBuf, source: io::Error },
    #[error("Failed to convert input graph")]
    Graph(#[from] CollectorError),
    #[error("Failed to use temporary file: {0}")]
    TempFile(#[source] io::Error),
    #[error("Trial was cancelled")]
    Cancelled,
}

#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error("Failed to build worker pool")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
    #[error("Trial failed: {0}")]
    Trial(#[from] RunnerError),
}

/// Knobs consumed by the engine, owned by the config/ cli layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOptions {
    pub jobs: usize,
    pub timeout: Duration,
    pub grace: Duration,
    pub max_instances: Option<usize>,
    pub mode: Mode,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            jobs: 1,
            timeout: Duration::from_secs(300),
            grace: Duration::from_secs(5),
            max_instances: None,
            mode: Mode::Exact,
        }
    }
}

/// One unit of work, read-only once created
#[derive(Debug, Clone)]
pub struct Trial {
    pub solver: Arc<SolverDescriptor>,
    pub instance: Arc<Instance>,
    pub timeout: Duration,
    pub mode: Mode,
}

impl Trial {
    pub fn new(solver: Arc<SolverDescriptor>, instance: Arc<Instance>, options: &RunOptions) -> Self {
        Self {
            timeout: solver.timeout_override().unwrap_or(options.timeout),
            mode: options.mode,
            solver,
            instance,
        }
    }

    pub fn key(&self) -> TrialKey {
        TrialKey {
            solver: self.solver.name.clone(),
            benchmark: self.instance.benchmark.clone(),
            instance: self.instance.name.clone(),
        }
    }
}

/// Cartesian product of solvers and benchmark sets in canonical order: by solver, then
/// benchmark set, then instance. Solvers lacking the selected mode are skipped.
pub fn build_trials(
    solvers: &[Arc<SolverDescriptor>],
    sets: &[InstanceSet],
    options: &RunOptions,
) -> Vec<Trial> {
    let solvers = solvers
        .iter()
        .filter(|solver| {
            let supported = solver.supports(options.mode);

            if !supported {
                warn!(
                    solver = %solver.name,
                    mode = %options.mode,
                    "Skipping solver, it does not support the selected mode"
                );
            }

            supported
        })
        .collect::<Vec<_>>();
    let cap = options.max_instances.unwrap_or(usize::MAX);

    iproduct!(solvers, sets)
        .flat_map(|(solver, set)| {
            set.instances
                .iter()
                .take(cap)
                .map(move |instance| Trial::new(solver.clone(), instance.clone(), options))
        })
        .collect()
}
