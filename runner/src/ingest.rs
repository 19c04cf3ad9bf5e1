pub mod td;


use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IngestorError {
    #[error("No width marker found in solver output")]
    NoMarker,
    #[error("Width marker has no valid value: {0:?}")]
    InvalidValue(String),
    #[error("Decomposition covers {found} vertices but the instance has {expected}")]
    VertexMismatch { expected: usize, found: usize },
}

/// The closed set of rules used to extract a width from solver output
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Ingestors {
    /// `td`, then the `c width` and `tw` markers, then `plain`
    #[default]
    Auto,
    /// PACE decomposition header `s td <bags> <width + 1> <vertices>`
    Td,
    /// first line starting with `prefix`, followed by the width
    Marker { prefix: String },
    /// first line that is a bare number
    Plain,
}

/// markers tried by `Ingestors::Auto` after the td header
const AUTO_MARKERS: [&str; 2] = ["c width", "tw"];

impl Ingestors {
    pub fn marker(prefix: &str) -> Self {
        Self::Marker {
            prefix: prefix.to_owned(),
        }
    }

    /// Extract the width from `output`, `vertices` is the vertex count of the instance
    #[tracing::instrument(level = "trace", skip(output))]
    pub fn ingest(&self, output: &str, vertices: usize) -> Result<usize, IngestorError> {
        match self {
            Self::Td => td::ingest(output, vertices),
            Self::Marker { prefix } => ingest_marker(output, prefix),
            Self::Plain => ingest_plain(output),
            Self::Auto => {
                let rules = [Self::Td]
                    .into_iter()
                    .chain(AUTO_MARKERS.into_iter().map(Self::marker))
                    .chain([Self::Plain]);

                for rule in rules {
                    match rule.ingest(output, vertices) {
                        Err(IngestorError::NoMarker) => continue,
                        result => return result,
                    }
                }

                Err(IngestorError::NoMarker)
            }
        }
    }
}

fn ingest_marker(output: &str, prefix: &str) -> Result<usize, IngestorError> {
    let marker = prefix.split_whitespace().collect::<Vec<_>>();

    for line in output.lines() {
        let tokens = line.split_whitespace().collect::<Vec<_>>();

        if marker.is_empty() || !tokens.starts_with(&marker) {
            continue;
        }

        return match tokens.get(marker.len()) {
            Some(value) => parse_width(value).ok_or_else(|| invalid(line)),
            None => Err(invalid(line)),
        };
    }

    Err(IngestorError::NoMarker)
}

fn ingest_plain(output: &str) -> Result<usize, IngestorError> {
    output
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty() && line.bytes().all(|byte| byte.is_ascii_digit()))
        .map(|line| parse_width(line).ok_or_else(|| invalid(line)))
        .unwrap_or(Err(IngestorError::NoMarker))
}

/// unsigned decimal, signs are rejected
pub(crate) fn parse_width(value: &str) -> Option<usize> {
    if value.bytes().all(|byte| byte.is_ascii_digit()) {
        value.parse().ok()
    } else {
        None
    }
}

pub(crate) fn invalid(line: &str) -> IngestorError {
    IngestorError::InvalidValue(line.trim().to_owned())
}
