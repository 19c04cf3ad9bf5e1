use super::{ResultTable, Status, TrialResult};
use serde::Serialize;
use std::io::Write;

pub const HEADER: [&str; 9] = [
    "solver",
    "benchmark_set",
    "instance",
    "vertices",
    "edges",
    "treewidth",
    "time_sec",
    "status",
    "memory_mb",
];

/// One csv row, absent values are written as empty fields
#[derive(Serialize)]
struct Record<'a> {
    solver: &'a str,
    benchmark_set: &'a str,
    instance: &'a str,
    vertices: usize,
    edges: usize,
    treewidth: Option<usize>,
    time_sec: String,
    status: Status,
    memory_mb: Option<String>,
}

impl<'a> From<&'a TrialResult> for Record<'a> {
    fn from(result: &'a TrialResult) -> Self {
        Self {
            solver: &result.solver,
            benchmark_set: &result.benchmark,
            instance: &result.instance,
            vertices: result.vertices,
            edges: result.edges,
            treewidth: result.treewidth(),
            time_sec: format!("{:.3}", result.time_sec()),
            status: result.status(),
            memory_mb: result.memory_mb().map(|mb| format!("{mb:.1}")),
        }
    }
}

impl ResultTable {
    pub fn write_csv<W: Write>(&self, writer: W) -> Result<(), csv::Error> {
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(writer);

        writer.write_record(HEADER)?;

        for result in self.iter() {
            writer.serialize(Record::from(result))?;
        }

        writer.flush()?;

        Ok(())
    }
}
