
use crate::{config::ConfigErrors, ingest::Ingestors};
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    ffi::OsString,
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

/// Which track of a solver is benchmarked
#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Exact,
    Heuristic,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact => write!(f, "exact"),
            Self::Heuristic => write!(f, "heuristic"),
        }
    }
}

/// How the graph reaches the solver
#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum InputDelivery {
    /// the input file is connected to stdin
    #[default]
    Stdin,
    /// stdin is closed, the solver opens `{input}` itself
    Path,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum InputFormat {
    #[default]
    Pace,
    /// converted into a temporary `p cnf` file before launch
    QuickbbCnf,
}

/// Where the width is read from after the solver exited
#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum OutputSource {
    #[default]
    Stdout,
    /// the decomposition the solver wrote to `{output_td}`, stdout if that stays empty
    TdFile,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct SolverDescriptor {
    #[serde(default, skip)]
    pub name: String,
    pub exec: PathBuf,
    #[serde(default)]
    pub params: Vec<String>,
    // replaces `params` in heuristic mode
    #[serde(default)]
    pub heuristic_params: Option<Vec<String>>,
    #[serde(default = "default_modes")]
    pub modes: Vec<Mode>,
    #[serde(default)]
    pub input: InputDelivery,
    #[serde(default)]
    pub input_format: InputFormat,
    #[serde(default)]
    pub output: OutputSource,
    #[serde(default)]
    pub ingest: Ingestors,
    // seconds, overrides the suite timeout
    #[serde(default)]
    pub timeout: Option<u64>,
    #[serde(default)]
    pub workdir: Option<PathBuf>,
}

/// Values substituted into the argument template of a solver
#[derive(Debug, Clone)]
pub struct Placeholders<'a> {
    pub input: &'a Path,
    pub input_dir: &'a Path,
    pub instance_name: &'a str,
    pub output_td: &'a Path,
    pub output_dir: &'a Path,
    pub timeout: Duration,
}

impl Placeholders<'_> {
    pub fn substitute(&self, template: &str) -> String {
        template
            .replace("{input}", &self.input.to_string_lossy())
            .replace("{input_dir}", &self.input_dir.to_string_lossy())
            .replace("{instance_name}", self.instance_name)
            .replace("{output_td}", &self.output_td.to_string_lossy())
            .replace("{output_dir}", &self.output_dir.to_string_lossy())
            .replace("{timeout}", &self.timeout.as_secs().to_string())
    }
}

impl SolverDescriptor {
    pub fn new(name: &str, exec: impl Into<PathBuf>) -> Self {
        Self {
            name: name.to_owned(),
            exec: exec.into(),
            params: Vec::new(),
            heuristic_params: None,
            modes: default_modes(),
            input: InputDelivery::default(),
            input_format: InputFormat::default(),
            output: OutputSource::default(),
            ingest: Ingestors::default(),
            timeout: None,
            workdir: None,
        }
    }

    pub fn supports(&self, mode: Mode) -> bool {
        self.modes.contains(&mode)
    }

    pub fn params(&self, mode: Mode) -> &[String] {
        match (mode, self.heuristic_params.as_ref()) {
            (Mode::Heuristic, Some(params)) => params,
            _ => &self.params,
        }
    }

    pub fn args(&self, mode: Mode, placeholders: &Placeholders<'_>) -> Vec<OsString> {
        self.params(mode)
            .iter()
            .map(|param| OsString::from(placeholders.substitute(param)))
            .collect()
    }

    pub fn timeout_override(&self) -> Option<Duration> {
        self.timeout.map(Duration::from_secs)
    }

    /// Path of the executable. Names without a directory are looked up in PATH.
    pub fn resolve_exec(&self) -> Option<PathBuf> {
        if self.exec.components().count() > 1 || self.exec.is_absolute() {
            Some(self.exec.clone())
        } else {
            which::which(&self.exec).ok()
        }
    }
}

/// Read-only set of solvers, in name order
#[derive(Debug, Clone, Default)]
pub struct SolverRegistry {
    solvers: Vec<Arc<SolverDescriptor>>,
}

impl SolverRegistry {
    pub fn new(solvers: &BTreeMap<String, SolverDescriptor>) -> Self {
        Self {
            solvers: solvers
                .iter()
                .map(|(name, solver)| {
                    let mut solver = solver.clone();
                    solver.name = name.clone();

                    Arc::new(solver)
                })
                .collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Arc<SolverDescriptor>> {
        self.solvers.iter().find(|solver| solver.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<SolverDescriptor>> {
        self.solvers.iter()
    }

    pub fn len(&self) -> usize {
        self.solvers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.solvers.is_empty()
    }

    /// Solvers by name in registry order, an empty selection or `all` selects every solver
    pub fn select(&self, names: &[String]) -> Result<Vec<Arc<SolverDescriptor>>, ConfigErrors> {
        if names.is_empty() || names.iter().any(|name| name == "all") {
            return Ok(self.solvers.clone());
        }

        if let Some(unknown) = names.iter().find(|name| self.get(name).is_none()) {
            return Err(ConfigErrors::UnknownSolver(unknown.clone()));
        }

        Ok(self
            .solvers
            .iter()
            .filter(|solver| names.contains(&solver.name))
            .cloned()
            .collect())
    }
}

fn default_modes() -> Vec<Mode> {
    vec![Mode::Exact, Mode::Heuristic]
}
