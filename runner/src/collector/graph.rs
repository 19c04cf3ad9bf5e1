use super::CollectorError;
use std::{
    fs::File,
    io::{BufRead, BufReader, Write},
    path::Path,
};

/// Undirected graph as read from a PACE `.gr` file, vertices are 1-indexed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Graph {
    pub vertices: usize,
    pub edges: Vec<(usize, usize)>,
}

impl Graph {
    pub fn read(path: &Path) -> Result<Self, CollectorError> {
        let file = File::open(path).map_err(|source| CollectorError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        Self::parse(BufReader::new(file)).map_err(|error| match error {
            CollectorError::Malformed { line, reason, .. } => CollectorError::Malformed {
                path: path.to_path_buf(),
                line,
                reason,
            },
            other => other,
        })
    }

    /// Parse the line based `.gr` encoding: comments start with `c`, a single
    /// `p tw <n> <m>` problem line, then one `<u> <v>` line per edge
    pub fn parse<R: BufRead>(reader: R) -> Result<Self, CollectorError> {
        let mut vertices = None;
        let mut edges = Vec::new();

        for (number, line) in reader.lines().enumerate() {
            let line = line.map_err(CollectorError::Io)?;
            let line = line.trim();
            let number = number + 1;

            if line.is_empty() || line.starts_with('c') {
                continue;
            }

            let mut tokens = line.split_whitespace();

            if line.starts_with('p') {
                if vertices.is_some() {
                    return Err(malformed(number, "duplicate problem line"));
                }

                match (tokens.next(), tokens.next(), tokens.next(), tokens.next()) {
                    (Some("p"), Some("tw"), Some(n), Some(m)) => {
                        let n = n
                            .parse::<usize>()
                            .map_err(|_| malformed(number, "vertex count is not a number"))?;
                        m.parse::<usize>()
                            .map_err(|_| malformed(number, "edge count is not a number"))?;

                        vertices = Some(n);
                    }
                    _ => return Err(malformed(number, "expected `p tw <vertices> <edges>`")),
                }

                continue;
            }

            let Some(n) = vertices else {
                return Err(malformed(number, "edge before problem line"));
            };

            let edge = match (tokens.next(), tokens.next()) {
                (Some(u), Some(v)) => (u.parse::<usize>(), v.parse::<usize>()),
                _ => return Err(malformed(number, "expected `<u> <v>`")),
            };

            match edge {
                (Ok(u), Ok(v)) if (1..=n).contains(&u) && (1..=n).contains(&v) => {
                    edges.push((u, v))
                }
                (Ok(_), Ok(_)) => return Err(malformed(number, "vertex out of range")),
                _ => return Err(malformed(number, "vertex is not a number")),
            }
        }

        match vertices {
            Some(vertices) => Ok(Self { vertices, edges }),
            None => Err(CollectorError::MissingProblemLine),
        }
    }

    /// Write the QuickBB flavour of DIMACS cnf, one `<u> <v> 0` clause per edge
    pub fn write_quickbb_cnf<W: Write>(&self, mut writer: W) -> std::io::Result<()> {
        writeln!(writer, "p cnf {} {}", self.vertices, self.edges.len())?;

        for (u, v) in self.edges.iter() {
            writeln!(writer, "{u} {v} 0")?;
        }

        writer.flush()
    }
}

fn malformed(line: usize, reason: &'static str) -> CollectorError {
    CollectorError::Malformed {
        path: Default::default(),
        line,
        reason,
    }
}
