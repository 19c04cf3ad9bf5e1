use clap::Parser;
use std::{
    fs::File,
    io::{self, BufWriter, Write},
    path::PathBuf,
    process::ExitCode,
};
use thiserror::Error;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use twbench::{
    collector::{Collector, CollectorError, InstanceSet},
    config::{ConfigErrors, ExecutorConfig, SuiteConfig},
    executors::{build_trials, ExecutorError, LocalExecutor},
    registry::Mode,
    results::Aggregator,
    sync::Cancellation,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Benchmark treewidth solvers on PACE graph sets")]
struct Args {
    /// Suite file describing solvers and benchmark sets
    #[arg(short, long, default_value = "twbench.yaml")]
    config: PathBuf,

    /// Solvers to run, `all` selects every solver
    #[arg(short, long)]
    solver: Vec<String>,

    /// Benchmark sets to run, `all` selects every set
    #[arg(short, long)]
    benchmark: Vec<String>,

    /// Seconds per trial
    #[arg(short, long)]
    timeout: Option<u64>,

    /// Number of trials running at the same time
    #[arg(short, long)]
    jobs: Option<usize>,

    /// Run the heuristic track instead of the exact one
    #[arg(long)]
    heuristic: bool,

    /// Run at most this many instances of every benchmark set
    #[arg(long)]
    max_instances: Option<usize>,

    /// Write the csv report to a file instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// List solvers and benchmark sets, then exit
    #[arg(long)]
    list: bool,
}

impl Args {
    fn apply(&self, executor: &mut ExecutorConfig) {
        if let Some(timeout) = self.timeout {
            executor.timeout = timeout;
        }
        if let Some(jobs) = self.jobs {
            executor.jobs = jobs;
        }
        if let Some(max_instances) = self.max_instances {
            executor.max_instances = Some(max_instances);
        }
        if self.heuristic {
            executor.mode = Mode::Heuristic;
        }
    }
}

#[derive(Error, Debug)]
enum Error {
    #[error(transparent)]
    Config(#[from] ConfigErrors),
    #[error("Failed to collect benchmark set: {0}")]
    Collector(#[from] CollectorError),
    #[error(transparent)]
    Executor(#[from] ExecutorError),
    #[error("Failed to install interrupt handler: {0}")]
    Interrupt(#[from] ctrlc::Error),
    #[error("Interrupted, the report only contains finished trials")]
    Interrupted,
    #[error("Failed to write report: {0}")]
    Report(#[from] csv::Error),
    #[error("Failed to write report: {0}")]
    Io(#[from] io::Error),
}

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    match run(Args::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<(), Error> {
    let mut config = SuiteConfig::load(&args.config)?;
    args.apply(&mut config.executor);

    if config.preflight_checks() {
        return Err(ConfigErrors::Preflight.into());
    }

    if args.list {
        return list(&config);
    }

    let solvers = config.registry().select(&args.solver)?;
    let sets = config
        .select_benchmarks(&args.benchmark)?
        .into_iter()
        .map(|(name, set)| Collector::load(name, set).map(|collector| collector.collect()))
        .collect::<Result<Vec<InstanceSet>, _>>()?;

    let options = config.run_options();
    let trials = build_trials(&solvers, &sets, &options);
    if trials.is_empty() {
        warn!("Selection contains no trials");
    }

    let cancellation = Cancellation::new();
    cancellation.install_handler()?;

    let aggregator = Aggregator::new();
    let outcome = LocalExecutor::new(options, cancellation.clone()).execute(trials, &aggregator);

    // whatever was delivered is reported, also if the suite failed
    let table = aggregator.into_table();
    match args.output {
        Some(ref path) => {
            let mut file = BufWriter::new(File::create(path)?);
            table.write_csv(&mut file)?;
            file.flush()?;
            info!("Wrote report to {}", path.to_string_lossy());
        }
        None => table.write_csv(io::stdout().lock())?,
    }

    let summary = table.summary();
    info!(
        ok = summary.ok,
        timeout = summary.timeout,
        error = summary.error,
        invalid_output = summary.invalid_output,
        "Finished {} trials",
        summary.total()
    );

    outcome?;

    if cancellation.is_cancelled() {
        return Err(Error::Interrupted);
    }

    Ok(())
}

fn list(config: &SuiteConfig) -> Result<(), Error> {
    let mut stdout = io::stdout().lock();

    writeln!(stdout, "solvers:")?;
    for solver in config.registry().iter() {
        let modes = solver
            .modes
            .iter()
            .map(Mode::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        writeln!(
            stdout,
            "  {} ({modes}): {}",
            solver.name,
            solver.exec.to_string_lossy()
        )?;
    }

    writeln!(stdout, "benchmarks:")?;
    for (name, set) in config.select_benchmarks(&[])? {
        let instances = Collector::load(name, set)?.paths().len();
        writeln!(stdout, "  {name}: {instances} instances")?;
    }

    Ok(())
}
