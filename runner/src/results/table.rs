use super::{Status, TrialKey, TrialResult};
use std::collections::BTreeMap;

/// Latest result per key. Rows are kept sorted by solver, benchmark set and instance
/// name, the order trials are enumerated in, so merging runs never reorders the table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultTable {
    rows: BTreeMap<TrialKey, TrialResult>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Summary {
    pub ok: usize,
    pub timeout: usize,
    pub error: usize,
    pub invalid_output: usize,
}

impl Summary {
    pub fn total(&self) -> usize {
        self.ok + self.timeout + self.error + self.invalid_output
    }
}

impl ResultTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, result: TrialResult) -> Option<TrialResult> {
        self.rows.insert(result.key(), result)
    }

    pub fn get(&self, key: &TrialKey) -> Option<&TrialResult> {
        self.rows.get(key)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// rows in canonical order, independent of arrival order
    pub fn iter(&self) -> impl Iterator<Item = &TrialResult> {
        self.rows.values()
    }

    pub fn summary(&self) -> Summary {
        self.rows
            .values()
            .fold(Summary::default(), |mut summary, result| {
                match result.status() {
                    Status::Ok => summary.ok += 1,
                    Status::Timeout => summary.timeout += 1,
                    Status::Error => summary.error += 1,
                    Status::InvalidOutput => summary.invalid_output += 1,
                }

                summary
            })
    }
}

impl Extend<TrialResult> for ResultTable {
    fn extend<T: IntoIterator<Item = TrialResult>>(&mut self, iter: T) {
        iter.into_iter().for_each(|result| {
            self.insert(result);
        });
    }
}
