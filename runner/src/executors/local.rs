use super::{ExecutorError, RunOptions, RunnerError, Trial, TrialRunner};
use crate::{results::Aggregator, sync::Cancellation};
use parking_lot::Mutex;
use rayon::{prelude::*, ThreadPoolBuilder};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, error, info, instrument};

/// Executor that works on a local thread pool
#[derive(Debug, Clone)]
pub struct LocalExecutor {
    options: RunOptions,
    cancellation: Cancellation,
}

impl LocalExecutor {
    pub fn new(options: RunOptions, cancellation: Cancellation) -> Self {
        Self {
            options,
            cancellation,
        }
    }

    /// Execute trials concurrently on `jobs` workers, every result is merged into
    /// `aggregator` as soon as it is available. Returns the number of delivered results.
    ///
    /// A failing harness cancels the suite, the error is returned once all workers
    /// stopped. Results delivered up to that point stay in `aggregator`.
    #[instrument(skip_all, level = "info", fields(jobs = self.options.jobs, trials = trials.len()))]
    pub fn execute(&self, trials: Vec<Trial>, aggregator: &Aggregator) -> Result<usize, ExecutorError> {
        let thread_number = self.options.jobs.max(1);

        debug!("Starting thread pool with {thread_number} threads");

        let pool = ThreadPoolBuilder::new()
            .num_threads(thread_number)
            .thread_name(|index| format!("twbench-worker-{index}"))
            .build()?;

        // general counters to provide progress
        let total = trials.len();
        let processed = AtomicUsize::new(0);
        let failure = Mutex::new(None);
        let runner = TrialRunner::new(self.options.grace, self.cancellation.clone());

        pool.install(|| {
            trials.into_iter().par_bridge().for_each(|trial| {
                if self.cancellation.is_cancelled() {
                    return;
                }

                debug!(
                    "Processing {:?} with {} for {} with timeout {:?}",
                    trial.instance.path, trial.solver.name, trial.instance.benchmark, trial.timeout
                );

                match runner.run(&trial) {
                    Ok(result) => {
                        let done = processed.fetch_add(1, Ordering::SeqCst) + 1;

                        info!(
                            solver = %result.solver,
                            benchmark = %result.benchmark,
                            instance = %result.instance,
                            treewidth = ?result.treewidth(),
                            time_sec = result.time_sec(),
                            status = %result.status(),
                            "Done with {done}/{total}"
                        );

                        aggregator.merge(result);
                    }
                    Err(RunnerError::Cancelled) => {
                        debug!(instance = %trial.instance.name, "Trial cancelled");
                    }
                    Err(error) => {
                        error!(error = %error, "Harness failure, cancelling remaining trials");

                        self.cancellation.cancel();
                        failure.lock().get_or_insert(error);
                    }
                }
            });
        });

        let delivered = processed.into_inner();

        match failure.into_inner() {
            Some(error) => Err(error.into()),
            None => {
                if self.cancellation.is_cancelled() {
                    info!("Cancelled after {delivered}/{total} trials");
                } else {
                    info!("Done with processing");
                }

                Ok(delivered)
            }
        }
    }
}
