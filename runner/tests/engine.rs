use std::{
    fs,
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
    sync::Arc,
    thread,
    time::{Duration, Instant},
};
use nix::{errno::Errno, sys::signal::kill, unistd::Pid};
use tempfile::TempDir;
use twbench::{
    collector::{Collector, Instance, InstanceSet},
    config::BenchmarkConfig,
    executors::{build_trials, ExecutorError, LocalExecutor, RunOptions, RunnerError},
    ingest::Ingestors,
    registry::{InputDelivery, InputFormat, Mode, OutputSource, SolverDescriptor},
    results::{Aggregator, ResultTable, Status, TrialKey, TrialResult},
    sync::Cancellation,
};

fn solver(dir: &Path, name: &str, body: &str) -> SolverDescriptor {
    let path = dir.join(name);

    fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();

    SolverDescriptor::new(name, path)
}

/// a graph with `edges` distinct edges, joining vertices of growing distance
fn graph(dir: &Path, name: &str, vertices: usize, edges: usize) -> PathBuf {
    let path = dir.join(format!("{name}.gr"));
    let mut content = format!("c generated\np tw {vertices} {edges}\n");

    (1..vertices)
        .flat_map(|distance| (1..=vertices - distance).map(move |u| (u, u + distance)))
        .take(edges)
        .for_each(|(u, v)| content.push_str(&format!("{u} {v}\n")));

    fs::write(&path, content).unwrap();

    path
}

fn collect(dir: &Path, name: &str) -> InstanceSet {
    let config = BenchmarkConfig {
        paths: vec![dir.to_path_buf()],
        path: None,
        glob: "*.gr".to_owned(),
    };

    Collector::load(name, &config).unwrap().collect()
}

fn options(jobs: usize, timeout: Duration) -> RunOptions {
    RunOptions {
        jobs,
        timeout,
        grace: Duration::from_millis(500),
        max_instances: None,
        mode: Mode::Exact,
    }
}

fn execute(solvers: Vec<SolverDescriptor>, sets: &[InstanceSet], options: RunOptions) -> ResultTable {
    let aggregator = Aggregator::new();

    execute_into(&aggregator, solvers, sets, options);

    aggregator.into_table()
}

fn execute_into(
    aggregator: &Aggregator,
    solvers: Vec<SolverDescriptor>,
    sets: &[InstanceSet],
    options: RunOptions,
) -> usize {
    let solvers = solvers.into_iter().map(Arc::new).collect::<Vec<_>>();
    let trials = build_trials(&solvers, sets, &options);

    LocalExecutor::new(options, Cancellation::new())
        .execute(trials, aggregator)
        .unwrap()
}

fn row<'a>(table: &'a ResultTable, solver: &str, instance: &str) -> &'a TrialResult {
    table
        .iter()
        .find(|result| result.solver == solver && result.instance == instance)
        .unwrap()
}

/// everything but the timing fields
fn outcomes(table: &ResultTable) -> Vec<(TrialKey, Status, Option<usize>)> {
    table
        .iter()
        .map(|result| (result.key(), result.status(), result.treewidth()))
        .collect()
}

#[test]
pub fn reported_width_is_ok() {
    let solvers = TempDir::new().unwrap();
    let instances = TempDir::new().unwrap();
    graph(instances.path(), "ex001", 100, 250);

    let table = execute(
        vec![solver(solvers.path(), "tamaki", "cat > /dev/null\necho 'tw 12'")],
        &[collect(instances.path(), "small")],
        options(1, Duration::from_secs(30)),
    );

    let result = row(&table, "tamaki", "ex001");
    assert_eq!(table.len(), 1);
    assert_eq!(result.status(), Status::Ok);
    assert_eq!(result.treewidth(), Some(12));
    assert_eq!(result.benchmark, "small");
    assert_eq!(result.vertices, 100);
    assert_eq!(result.edges, 250);
    assert!(result.elapsed < Duration::from_secs(30));
}

#[test]
pub fn stuck_solver_times_out() {
    let solvers = TempDir::new().unwrap();
    let instances = TempDir::new().unwrap();
    graph(instances.path(), "ex001", 10, 9);
    let timeout = Duration::from_secs(1);

    let start = Instant::now();
    let table = execute(
        vec![solver(solvers.path(), "sleepy", "exec sleep 30")],
        &[collect(instances.path(), "small")],
        options(1, timeout),
    );

    let result = row(&table, "sleepy", "ex001");
    assert_eq!(result.status(), Status::Timeout);
    assert_eq!(result.treewidth(), None);
    assert_eq!(result.elapsed, timeout);
    // timeout, grace and some slack for the poll interval
    assert!(start.elapsed() < Duration::from_secs(5));
}

#[test]
pub fn solver_ignoring_sigterm_is_killed() {
    let solvers = TempDir::new().unwrap();
    let instances = TempDir::new().unwrap();
    graph(instances.path(), "ex001", 10, 9);

    let start = Instant::now();
    let table = execute(
        vec![solver(
            solvers.path(),
            "stubborn",
            "trap '' TERM\nsleep 30\necho 'tw 1'",
        )],
        &[collect(instances.path(), "small")],
        options(1, Duration::from_secs(1)),
    );

    assert_eq!(row(&table, "stubborn", "ex001").status(), Status::Timeout);
    assert!(start.elapsed() < Duration::from_secs(5));
}

#[test]
pub fn missing_binary_is_an_error() {
    let solvers = TempDir::new().unwrap();
    let instances = TempDir::new().unwrap();
    graph(instances.path(), "ex001", 10, 9);

    let not_executable = solver(solvers.path(), "plain-file", "echo 'tw 1'");
    fs::set_permissions(&not_executable.exec, fs::Permissions::from_mode(0o644)).unwrap();

    let table = execute(
        vec![
            SolverDescriptor::new("missing", solvers.path().join("does-not-exist")),
            SolverDescriptor::new("unknown-command", "twbench-no-such-solver"),
            not_executable,
        ],
        &[collect(instances.path(), "small")],
        options(2, Duration::from_secs(30)),
    );

    assert_eq!(table.len(), 3);
    for result in table.iter() {
        assert_eq!(result.status(), Status::Error, "{}", result.solver);
        assert_eq!(result.treewidth(), None);
    }
}

#[test]
pub fn output_without_marker_is_invalid() {
    let solvers = TempDir::new().unwrap();
    let instances = TempDir::new().unwrap();
    graph(instances.path(), "ex001", 10, 9);

    let mut cut_off = solver(solvers.path(), "cut-off", "echo 'tw'");
    cut_off.ingest = Ingestors::marker("tw");

    let table = execute(
        vec![solver(solvers.path(), "chatty", "echo 'hello world'"), cut_off],
        &[collect(instances.path(), "small")],
        options(1, Duration::from_secs(30)),
    );

    assert_eq!(row(&table, "chatty", "ex001").status(), Status::InvalidOutput);
    assert_eq!(row(&table, "cut-off", "ex001").status(), Status::InvalidOutput);
}

#[test]
pub fn failing_solver_is_an_error() {
    let solvers = TempDir::new().unwrap();
    let instances = TempDir::new().unwrap();
    graph(instances.path(), "ex001", 10, 9);

    let table = execute(
        vec![
            solver(solvers.path(), "crashing", "echo 'tw 3'\nexit 2"),
            solver(solvers.path(), "killed", "echo 'tw 3'\nkill -9 $$"),
        ],
        &[collect(instances.path(), "small")],
        options(2, Duration::from_secs(30)),
    );

    let crashing = row(&table, "crashing", "ex001");
    assert_eq!(crashing.status(), Status::Error);
    assert_eq!(crashing.treewidth(), None);
    assert_eq!(row(&table, "killed", "ex001").status(), Status::Error);
}

#[test]
pub fn input_is_delivered_on_stdin() {
    let solvers = TempDir::new().unwrap();
    let instances = TempDir::new().unwrap();
    graph(instances.path(), "ex001", 20, 37);

    // echoes the edge count of the problem line as width
    let table = execute(
        vec![solver(
            solvers.path(),
            "counting",
            "awk '/^p/ { print \"c width\", $4 }'",
        )],
        &[collect(instances.path(), "small")],
        options(1, Duration::from_secs(30)),
    );

    assert_eq!(row(&table, "counting", "ex001").treewidth(), Some(37));
}

#[test]
pub fn input_is_delivered_as_path() {
    let solvers = TempDir::new().unwrap();
    let instances = TempDir::new().unwrap();
    graph(instances.path(), "ex001", 20, 19);

    let mut by_path = solver(
        solvers.path(),
        "by-path",
        "test -t 0 && exit 3\ntest \"$2\" = ex001 || exit 4\nawk '/^p/ { print $3 }' \"$1\"",
    );
    by_path.input = InputDelivery::Path;
    by_path.params = vec!["{input}".to_owned(), "{instance_name}".to_owned()];

    let table = execute(
        vec![by_path],
        &[collect(instances.path(), "small")],
        options(1, Duration::from_secs(30)),
    );

    let result = row(&table, "by-path", "ex001");
    assert_eq!(result.status(), Status::Ok);
    assert_eq!(result.treewidth(), Some(20));
}

#[test]
pub fn decomposition_file_is_read_and_removed() {
    let solvers = TempDir::new().unwrap();
    let instances = TempDir::new().unwrap();
    graph(instances.path(), "ex001", 4, 4);
    let side = solvers.path().join("output-path");

    let mut td = solver(
        solvers.path(),
        "td",
        &format!(
            "echo \"$1\" > {}\nprintf 's td 2 3 4\\nb 1 1 2 3\\nb 2 3 4\\n1 2\\n' > \"$1\"\necho 'c done'",
            side.to_string_lossy()
        ),
    );
    td.output = OutputSource::TdFile;
    td.params = vec!["{output_td}".to_owned()];

    let table = execute(
        vec![td],
        &[collect(instances.path(), "small")],
        options(1, Duration::from_secs(30)),
    );

    let result = row(&table, "td", "ex001");
    assert_eq!(result.status(), Status::Ok);
    assert_eq!(result.treewidth(), Some(2));

    let output = PathBuf::from(fs::read_to_string(side).unwrap().trim());
    assert!(output.extension().is_some_and(|extension| extension == "td"));
    assert!(!output.exists());
}

#[test]
pub fn quickbb_input_is_converted_and_removed() {
    let solvers = TempDir::new().unwrap();
    let instances = TempDir::new().unwrap();
    let original = graph(instances.path(), "ex001", 12, 15);
    let side = solvers.path().join("input-path");

    let mut quickbb = solver(
        solvers.path(),
        "quickbb",
        &format!(
            "echo \"$1\" > {}\nhead -n 1 \"$1\" | awk '$2 == \"cnf\" {{ print \"tw\", $4 }}'",
            side.to_string_lossy()
        ),
    );
    quickbb.input = InputDelivery::Path;
    quickbb.input_format = InputFormat::QuickbbCnf;
    quickbb.params = vec!["{input}".to_owned()];

    let table = execute(
        vec![quickbb],
        &[collect(instances.path(), "small")],
        options(1, Duration::from_secs(30)),
    );

    assert_eq!(row(&table, "quickbb", "ex001").treewidth(), Some(15));

    let converted = PathBuf::from(fs::read_to_string(side).unwrap().trim());
    assert!(converted.extension().is_some_and(|extension| extension == "cnf"));
    assert!(!converted.exists());
    assert!(original.exists());
}

#[test]
pub fn every_trial_is_reported_once() {
    let solvers = TempDir::new().unwrap();
    let instances = TempDir::new().unwrap();
    graph(instances.path(), "ex001", 10, 9);
    graph(instances.path(), "ex002", 10, 12);

    let table = execute(
        vec![
            solver(solvers.path(), "a", "sleep 0.2\necho 'tw 3'"),
            solver(solvers.path(), "b", "echo 'tw 4'"),
        ],
        &[collect(instances.path(), "x")],
        options(4, Duration::from_secs(30)),
    );

    assert_eq!(table.len(), 4);
    assert_eq!(
        table
            .iter()
            .map(|result| format!("{}/{}", result.solver, result.instance))
            .collect::<Vec<_>>(),
        ["a/ex001", "a/ex002", "b/ex001", "b/ex002"]
    );
    assert_eq!(table.summary().ok, 4);
}

#[test]
pub fn worker_count_does_not_change_outcomes() {
    let solvers = TempDir::new().unwrap();
    let instances = TempDir::new().unwrap();
    for index in 1..=4 {
        graph(instances.path(), &format!("ex{index:03}"), 10, 5 + index);
    }
    let all = || {
        vec![
            solver(solvers.path(), "counting", "awk '/^p/ { print \"tw\", $4 }'"),
            solver(solvers.path(), "silent", "cat > /dev/null"),
            solver(solvers.path(), "crashing", "exit 1"),
        ]
    };
    let sets = [collect(instances.path(), "x")];

    let sequential = execute(all(), &sets, options(1, Duration::from_secs(30)));
    let parallel = execute(all(), &sets, options(4, Duration::from_secs(30)));

    assert_eq!(sequential.len(), 12);
    assert_eq!(outcomes(&sequential), outcomes(&parallel));
}

#[test]
pub fn rerun_replaces_results() {
    let solvers = TempDir::new().unwrap();
    let instances = TempDir::new().unwrap();
    graph(instances.path(), "ex001", 10, 9);
    graph(instances.path(), "ex002", 10, 9);
    let sets = [collect(instances.path(), "x")];
    let tamaki = || vec![solver(solvers.path(), "tamaki", "echo 'tw 5'")];

    let aggregator = Aggregator::new();
    assert_eq!(
        execute_into(&aggregator, tamaki(), &sets, options(2, Duration::from_secs(30))),
        2
    );
    let first = aggregator.snapshot();
    execute_into(&aggregator, tamaki(), &sets, options(2, Duration::from_secs(30)));

    let fresh = execute(tamaki(), &sets, options(2, Duration::from_secs(30)));
    let rerun = aggregator.into_table();

    assert_eq!(rerun.len(), 2);
    assert_eq!(outcomes(&rerun), outcomes(&first));
    assert_eq!(outcomes(&rerun), outcomes(&fresh));
}

#[test]
pub fn max_instances_caps_the_run() {
    let solvers = TempDir::new().unwrap();
    let instances = TempDir::new().unwrap();
    for index in 1..=5 {
        graph(instances.path(), &format!("ex{index:03}"), 10, 9);
    }

    let table = execute(
        vec![solver(solvers.path(), "tamaki", "echo 'tw 5'")],
        &[collect(instances.path(), "x")],
        RunOptions {
            max_instances: Some(2),
            ..options(2, Duration::from_secs(30))
        },
    );

    assert_eq!(
        table
            .iter()
            .map(|result| result.instance.as_str())
            .collect::<Vec<_>>(),
        ["ex001", "ex002"]
    );
}

#[cfg(target_os = "linux")]
#[test]
pub fn peak_memory_is_sampled() {
    let solvers = TempDir::new().unwrap();
    let instances = TempDir::new().unwrap();
    graph(instances.path(), "ex001", 10, 9);

    let table = execute(
        vec![solver(solvers.path(), "tamaki", "sleep 0.3\necho 'tw 5'")],
        &[collect(instances.path(), "x")],
        options(1, Duration::from_secs(30)),
    );

    let result = row(&table, "tamaki", "ex001");
    assert!(result.memory_kb.is_some_and(|kb| kb > 0));
    assert!(result.memory_mb().is_some());
}

#[test]
pub fn cancellation_stops_the_suite() {
    let solvers = TempDir::new().unwrap();
    let instances = TempDir::new().unwrap();
    graph(instances.path(), "ex001", 10, 9);
    graph(instances.path(), "ex002", 10, 9);
    let pid_file = solvers.path().join("pid");
    let sleepy = Arc::new(solver(
        solvers.path(),
        "sleepy",
        &format!("echo $$ > {}\nexec sleep 30", pid_file.to_string_lossy()),
    ));
    let sets = [collect(instances.path(), "x")];
    let options = options(1, Duration::from_secs(60));

    let cancellation = Cancellation::new();
    let aggregator = Aggregator::new();
    let executor = LocalExecutor::new(options.clone(), cancellation.clone());

    let start = Instant::now();
    let delivered = thread::scope(|scope| {
        scope.spawn(|| {
            thread::sleep(Duration::from_millis(300));
            cancellation.cancel();
        });

        executor
            .execute(build_trials(&[sleepy], &sets, &options), &aggregator)
            .unwrap()
    });

    assert_eq!(delivered, 0);
    assert!(aggregator.is_empty());
    assert!(start.elapsed() < Duration::from_secs(10));

    // the in-flight solver is gone once `execute` returned
    let pid = fs::read_to_string(pid_file)
        .unwrap()
        .trim()
        .parse::<i32>()
        .unwrap();
    assert_eq!(kill(Pid::from_raw(pid), None), Err(Errno::ESRCH));
}

#[test]
pub fn broken_harness_fails_the_suite() {
    let solvers = TempDir::new().unwrap();
    let instance = Instance {
        benchmark: "x".to_owned(),
        name: "vanished".to_owned(),
        path: solvers.path().join("vanished.gr"),
        vertices: 10,
        edges: 9,
    };
    let set = InstanceSet {
        name: "x".to_owned(),
        instances: vec![Arc::new(instance)],
    };
    let options = options(1, Duration::from_secs(30));
    let tamaki = Arc::new(solver(solvers.path(), "tamaki", "echo 'tw 5'"));

    let aggregator = Aggregator::new();
    let outcome = LocalExecutor::new(options.clone(), Cancellation::new())
        .execute(build_trials(&[tamaki], &[set], &options), &aggregator);

    assert!(matches!(
        outcome,
        Err(ExecutorError::Trial(RunnerError::Input { .. }))
    ));
    assert!(aggregator.is_empty());
}

#[test]
pub fn escaped_descendant_does_not_hold_the_trial() {
    let solvers = TempDir::new().unwrap();
    let instances = TempDir::new().unwrap();
    graph(instances.path(), "ex001", 10, 9);

    let start = Instant::now();
    let table = execute(
        vec![
            solver(solvers.path(), "daemon", "setsid sleep 8 &\necho 'tw 3'"),
            solver(solvers.path(), "daemon-stuck", "setsid sleep 8 &\nexec sleep 30"),
        ],
        &[collect(instances.path(), "small")],
        options(2, Duration::from_secs(1)),
    );

    let daemon = row(&table, "daemon", "ex001");
    assert_eq!(daemon.status(), Status::Ok);
    assert_eq!(daemon.treewidth(), Some(3));
    assert_eq!(row(&table, "daemon-stuck", "ex001").status(), Status::Timeout);
    // timeout, grace and the drain deadline, far below the descendants' lifetime
    assert!(start.elapsed() < Duration::from_secs(3));
}

#[test]
pub fn partial_rerun_keeps_canonical_order() {
    let solvers = TempDir::new().unwrap();
    let instances = TempDir::new().unwrap();
    graph(instances.path(), "ex001", 10, 9);
    let sets = [collect(instances.path(), "x")];

    let earlier = execute(
        vec![solver(solvers.path(), "b", "echo 'tw 4'")],
        &sets,
        options(1, Duration::from_secs(30)),
    );

    let aggregator = Aggregator::from_table(earlier);
    execute_into(
        &aggregator,
        vec![solver(solvers.path(), "a", "echo 'tw 3'")],
        &sets,
        options(1, Duration::from_secs(30)),
    );
    let table = aggregator.into_table();

    assert_eq!(
        table
            .iter()
            .map(|result| result.solver.as_str())
            .collect::<Vec<_>>(),
        ["a", "b"]
    );
    assert_eq!(row(&table, "b", "ex001").treewidth(), Some(4));
}

#[test]
pub fn result_in_output_dir_is_read_and_removed() {
    let solvers = TempDir::new().unwrap();
    let instances = TempDir::new().unwrap();
    graph(instances.path(), "ex001", 10, 9);
    let side = solvers.path().join("output-dir");

    let mut rtw = solver(
        solvers.path(),
        "rtw",
        &format!(
            "echo \"$1\" > {}\necho 6 > \"$1/$2.twc\"\necho 'tw 9'",
            side.to_string_lossy()
        ),
    );
    rtw.output = OutputSource::TdFile;
    rtw.params = vec!["{output_dir}".to_owned(), "{instance_name}".to_owned()];

    let table = execute(
        vec![rtw],
        &[collect(instances.path(), "small")],
        options(1, Duration::from_secs(30)),
    );

    assert_eq!(row(&table, "rtw", "ex001").treewidth(), Some(6));

    let output_dir = PathBuf::from(fs::read_to_string(side).unwrap().trim());
    assert!(!output_dir.exists());
}

/// records its converted input and decomposition path, then runs `body`
fn recording_solver(dir: &Path, name: &str, side: &Path, body: &str) -> SolverDescriptor {
    let mut solver = solver(
        dir,
        name,
        &format!(
            "echo \"$1\" > {side}\necho \"$2\" >> {side}\n{body}",
            side = side.to_string_lossy()
        ),
    );
    solver.input = InputDelivery::Path;
    solver.input_format = InputFormat::QuickbbCnf;
    solver.output = OutputSource::TdFile;
    solver.params = vec!["{input}".to_owned(), "{output_td}".to_owned()];

    solver
}

#[test]
pub fn temporary_files_are_removed_on_failure() {
    let solvers = TempDir::new().unwrap();
    let instances = TempDir::new().unwrap();
    graph(instances.path(), "ex001", 10, 9);
    let killed = solvers.path().join("killed-paths");
    let garbled = solvers.path().join("garbled-paths");

    let table = execute(
        vec![
            recording_solver(solvers.path(), "killed", &killed, "exec sleep 30"),
            recording_solver(solvers.path(), "garbled", &garbled, "echo 'no width here'"),
        ],
        &[collect(instances.path(), "small")],
        options(2, Duration::from_secs(1)),
    );

    assert_eq!(row(&table, "killed", "ex001").status(), Status::Timeout);
    assert_eq!(row(&table, "garbled", "ex001").status(), Status::InvalidOutput);

    for side in [killed, garbled] {
        let paths = fs::read_to_string(side).unwrap();
        let paths = paths.lines().map(PathBuf::from).collect::<Vec<_>>();

        assert_eq!(paths.len(), 2);
        assert!(paths[0].extension().is_some_and(|extension| extension == "cnf"));
        assert!(paths[1].extension().is_some_and(|extension| extension == "td"));
        assert!(paths.iter().all(|path| !path.exists()));
    }
}

#[test]
pub fn stdin_receives_the_graph_when_input_is_converted() {
    let solvers = TempDir::new().unwrap();
    let instances = TempDir::new().unwrap();
    graph(instances.path(), "ex001", 12, 15);

    let mut mixed = solver(
        solvers.path(),
        "mixed",
        "head -n 1 \"$1\" | grep -q '^p cnf' || exit 5\nawk '/^p tw/ { print \"tw\", $4 }'",
    );
    mixed.input_format = InputFormat::QuickbbCnf;
    mixed.params = vec!["{input}".to_owned()];

    let table = execute(
        vec![mixed],
        &[collect(instances.path(), "small")],
        options(1, Duration::from_secs(30)),
    );

    let result = row(&table, "mixed", "ex001");
    assert_eq!(result.status(), Status::Ok);
    assert_eq!(result.treewidth(), Some(15));
}
