mod export;
mod table;


pub use export::HEADER;
pub use table::{ResultTable, Summary};

use crate::executors::Trial;
use parking_lot::FairMutex;
use serde::{Deserialize, Serialize};
use std::{fmt, sync::Arc, time::Duration};
use tracing_unwrap::ResultExt;

/// Classification of a finished trial
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum Status {
    Ok,
    Timeout,
    Error,
    InvalidOutput,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Timeout => "timeout",
            Self::Error => "error",
            Self::InvalidOutput => "invalid-output",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a row in the result table, ordered like the trials are enumerated
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TrialKey {
    pub solver: String,
    pub benchmark: String,
    pub instance: String,
}

/// Outcome of one trial, only `Status::Ok` carries a treewidth
#[derive(Clone, Debug, PartialEq)]
pub struct TrialResult {
    pub solver: String,
    pub benchmark: String,
    pub instance: String,
    pub vertices: usize,
    pub edges: usize,
    treewidth: Option<usize>,
    pub elapsed: Duration,
    status: Status,
    /// peak resident set size in KiB, if it could be sampled
    pub memory_kb: Option<u64>,
}

impl TrialResult {
    fn new(trial: &Trial, status: Status, treewidth: Option<usize>, elapsed: Duration) -> Self {
        Self {
            solver: trial.solver.name.clone(),
            benchmark: trial.instance.benchmark.clone(),
            instance: trial.instance.name.clone(),
            vertices: trial.instance.vertices,
            edges: trial.instance.edges,
            treewidth,
            elapsed,
            status,
            memory_kb: None,
        }
    }

    /// width parsed from a cleanly exited solver
    pub fn ok(trial: &Trial, treewidth: usize, elapsed: Duration) -> Self {
        Self::new(trial, Status::Ok, Some(treewidth), elapsed)
    }

    /// the elapsed time of a timeout is the timeout itself
    pub fn timeout(trial: &Trial) -> Self {
        Self::new(trial, Status::Timeout, None, trial.timeout)
    }

    pub fn error(trial: &Trial, elapsed: Duration) -> Self {
        Self::new(trial, Status::Error, None, elapsed)
    }

    pub fn invalid_output(trial: &Trial, elapsed: Duration) -> Self {
        Self::new(trial, Status::InvalidOutput, None, elapsed)
    }

    pub fn with_memory(mut self, memory_kb: Option<u64>) -> Self {
        self.memory_kb = memory_kb;
        self
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn treewidth(&self) -> Option<usize> {
        self.treewidth
    }

    pub fn key(&self) -> TrialKey {
        TrialKey {
            solver: self.solver.clone(),
            benchmark: self.benchmark.clone(),
            instance: self.instance.clone(),
        }
    }

    pub fn time_sec(&self) -> f64 {
        self.elapsed.as_secs_f64()
    }

    pub fn memory_mb(&self) -> Option<f64> {
        self.memory_kb.map(|kb| kb as f64 / 1024.0)
    }
}

#[derive(Debug, Clone, Default)]
/// Transparent, thread safe handle on the `ResultTable` shared by all workers
pub struct Aggregator(Arc<FairMutex<ResultTable>>);

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// continue an existing table, e.g. to re-run a subset of trials
    pub fn from_table(table: ResultTable) -> Self {
        Self(Arc::new(FairMutex::new(table)))
    }

    /// last write wins, returns the replaced result
    pub fn merge(&self, result: TrialResult) -> Option<TrialResult> {
        self.0.lock().insert(result)
    }

    pub fn len(&self) -> usize {
        self.0.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.lock().is_empty()
    }

    pub fn snapshot(&self) -> ResultTable {
        self.0.lock().clone()
    }

    /// Panics if other handles are still alive, i.e. the executor has not returned yet
    pub fn into_table(self) -> ResultTable {
        Arc::try_unwrap(self.0).unwrap_or_log().into_inner()
    }
}
