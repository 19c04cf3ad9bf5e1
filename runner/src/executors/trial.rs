use super::{
    process::{Exit, ProcessGuard, Supervised},
    RunnerError, Trial,
};
use crate::{
    collector::graph::Graph,
    config::check_executable,
    registry::{InputDelivery, InputFormat, OutputSource, Placeholders},
    results::TrialResult,
    sync::Cancellation,
};
use nix::errno::Errno;
use std::{
    fs::{self, File},
    io::{self, BufWriter, ErrorKind},
    os::unix::process::ExitStatusExt,
    path::{Path, PathBuf},
    process::{Command, Stdio},
    time::Duration,
};
use tempfile::{Builder, NamedTempFile, TempDir};
use tracing::{debug, instrument, trace, warn};

/// characters of stderr kept in the log when a solver fails
const STDERR_TAIL: usize = 500;
/// results solvers write as `{output_dir}/{instance_name}.<extension>`, in lookup order
const OUTPUT_DIR_EXTENSIONS: [&str; 2] = ["twc", "td"];

/// Runs a single trial as a supervised child process
#[derive(Debug, Clone)]
pub struct TrialRunner {
    grace: Duration,
    cancellation: Cancellation,
}

impl TrialRunner {
    pub fn new(grace: Duration, cancellation: Cancellation) -> Self {
        Self {
            grace,
            cancellation,
        }
    }

    /// Execute `trial` and classify the outcome. Solver failures are reported through the
    /// status of the result, errors are reserved for the harness itself.
    #[instrument(
        level = "debug",
        skip_all,
        fields(
            solver = %trial.solver.name,
            benchmark = %trial.instance.benchmark,
            instance = %trial.instance.name,
        )
    )]
    pub fn run(&self, trial: &Trial) -> Result<TrialResult, RunnerError> {
        let solver = &trial.solver;

        let Some(exec) = solver
            .resolve_exec()
            .filter(|exec| matches!(check_executable(exec), Ok(true)))
        else {
            warn!(exec = ?solver.exec, "Solver is missing or not executable");

            return Ok(TrialResult::error(trial, Duration::ZERO));
        };

        // removed again when dropped, on every path out of this function
        let files = TrialFiles::prepare(trial)?;
        let placeholders = Placeholders {
            input: files.input(),
            input_dir: files.input_dir(),
            instance_name: &trial.instance.name,
            output_td: files.output_td(),
            output_dir: files.output_dir(),
            timeout: trial.timeout,
        };

        let mut command = Command::new(&exec);
        command
            .args(solver.args(trial.mode, &placeholders))
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        match solver.input {
            // the graph itself, `{input}` still names the converted file
            InputDelivery::Stdin => {
                let input = File::open(files.source()).map_err(|source| RunnerError::Input {
                    path: files.source().to_path_buf(),
                    source,
                })?;
                command.stdin(Stdio::from(input));
            }
            InputDelivery::Path => {
                command.stdin(Stdio::null());
            }
        }

        if let Some(ref workdir) = solver.workdir {
            command.current_dir(workdir);
        }

        debug!(command = ?command, timeout = ?trial.timeout, "Launching solver");

        let process = match ProcessGuard::spawn(&mut command) {
            Ok(process) => process,
            Err(error) if is_solver_fault(&error) => {
                warn!(error = %error, "Failed to launch solver");

                return Ok(TrialResult::error(trial, Duration::ZERO));
            }
            Err(error) => return Err(RunnerError::Spawn(error)),
        };

        let supervised = process
            .supervise(trial.timeout, self.grace, &self.cancellation)
            .map_err(RunnerError::Wait)?;

        classify(trial, &files, supervised)
    }
}

fn classify(
    trial: &Trial,
    files: &TrialFiles,
    supervised: Supervised,
) -> Result<TrialResult, RunnerError> {
    let Supervised {
        exit,
        elapsed,
        stdout,
        stderr,
        peak_rss_kb,
    } = supervised;

    let result = match exit {
        Exit::Cancelled => return Err(RunnerError::Cancelled),
        Exit::TimedOut => TrialResult::timeout(trial),
        Exit::Exited(status) => {
            if let Some(signal) = status.signal() {
                debug!(signal = signal, stderr = %tail(&stderr), "Solver was killed by a signal");

                TrialResult::error(trial, elapsed)
            } else if !status.success() {
                debug!(code = ?status.code(), stderr = %tail(&stderr), "Solver exited with an error");

                TrialResult::error(trial, elapsed)
            } else {
                let output = files.output(trial.solver.output, &trial.instance.name, &stdout)?;
                trace!("Output: {output}");

                match trial
                    .solver
                    .ingest
                    .ingest(&output, trial.instance.vertices)
                {
                    Ok(width) => TrialResult::ok(trial, width, elapsed),
                    Err(error) => {
                        debug!(error = %error, "Failed to ingest solver output");

                        TrialResult::invalid_output(trial, elapsed)
                    }
                }
            }
        }
    };

    Ok(result.with_memory(peak_rss_kb))
}

/// launch failures caused by the solver binary or its configuration, not by the host
fn is_solver_fault(error: &io::Error) -> bool {
    matches!(
        error.raw_os_error().map(Errno::from_i32),
        Some(
            Errno::ENOENT
                | Errno::EACCES
                | Errno::ENOEXEC
                | Errno::ENOTDIR
                | Errno::ELOOP
                | Errno::ETXTBSY
        )
    )
}

fn tail(stderr: &[u8]) -> String {
    let stderr = String::from_utf8_lossy(stderr);
    let skip = stderr.chars().count().saturating_sub(STDERR_TAIL);

    stderr.chars().skip(skip).collect()
}

/// Temporary files of a single trial, deleted on drop
#[derive(Debug)]
struct TrialFiles {
    source: PathBuf,
    converted: Option<NamedTempFile>,
    output_td: NamedTempFile,
    // private to the trial, whatever the solver leaves in there goes with it
    output_dir: TempDir,
}

impl TrialFiles {
    fn prepare(trial: &Trial) -> Result<Self, RunnerError> {
        let source =
            fs::canonicalize(&trial.instance.path).map_err(|source| RunnerError::Input {
                path: trial.instance.path.clone(),
                source,
            })?;

        let converted = match trial.solver.input_format {
            InputFormat::Pace => None,
            InputFormat::QuickbbCnf => {
                let graph = Graph::read(&source)?;
                let mut file = temp_file(".cnf")?;

                graph
                    .write_quickbb_cnf(BufWriter::new(file.as_file_mut()))
                    .map_err(RunnerError::TempFile)?;

                Some(file)
            }
        };

        let output_dir = Builder::new()
            .prefix("twbench-")
            .tempdir()
            .map_err(RunnerError::TempFile)?;

        Ok(Self {
            source,
            converted,
            output_td: temp_file(".td")?,
            output_dir,
        })
    }

    fn source(&self) -> &Path {
        &self.source
    }

    /// the file handed to the solver, converted if the solver needs another format
    fn input(&self) -> &Path {
        self.converted
            .as_ref()
            .map(|file| file.path())
            .unwrap_or(self.source.as_path())
    }

    /// directory of the original instance
    fn input_dir(&self) -> &Path {
        self.source.parent().unwrap_or(Path::new("/"))
    }

    fn output_td(&self) -> &Path {
        self.output_td.path()
    }

    fn output_dir(&self) -> &Path {
        self.output_dir.path()
    }

    /// Solver output to ingest. File based solvers are read from a result named after
    /// the instance in `{output_dir}`, then from `{output_td}`, then from stdout.
    fn output(
        &self,
        source: OutputSource,
        instance_name: &str,
        stdout: &[u8],
    ) -> Result<String, RunnerError> {
        if source == OutputSource::TdFile {
            let named = OUTPUT_DIR_EXTENSIONS
                .iter()
                .map(|extension| self.output_dir().join(format!("{instance_name}.{extension}")));

            for path in named.chain([self.output_td().to_path_buf()]) {
                if let Some(content) = read_result(&path)? {
                    trace!(path = ?path, "Reading result file");

                    return Ok(content);
                }
            }

            debug!("No result file was written, falling back to stdout");
        }

        Ok(String::from_utf8_lossy(stdout).into_owned())
    }
}

/// content of a result file, `None` if it is missing or empty
fn read_result(path: &Path) -> Result<Option<String>, RunnerError> {
    match fs::read(path) {
        Ok(content) if !content.is_empty() => {
            Ok(Some(String::from_utf8_lossy(&content).into_owned()))
        }
        Ok(_) => Ok(None),
        Err(error) if error.kind() == ErrorKind::NotFound => Ok(None),
        Err(error) => Err(RunnerError::TempFile(error)),
    }
}

fn temp_file(suffix: &str) -> Result<NamedTempFile, RunnerError> {
    Builder::new()
        .prefix("twbench-")
        .suffix(suffix)
        .tempfile()
        .map_err(RunnerError::TempFile)
}
