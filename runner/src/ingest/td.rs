use super::{invalid, parse_width, IngestorError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TdHeader {
    pub bags: usize,
    pub width: usize,
    pub vertices: usize,
}

/// Parse the solution line of a `.td` file, `None` if `line` is no solution line
pub fn parse_header(line: &str) -> Option<Result<TdHeader, IngestorError>> {
    let mut tokens = line.split_whitespace();

    if tokens.next() != Some("s") || tokens.next() != Some("td") {
        return None;
    }

    let numbers = tokens.map(parse_width).collect::<Vec<_>>();

    let header = match numbers.as_slice() {
        [Some(bags), Some(bag_size), Some(vertices)] => match (*bags, bag_size.checked_sub(1)) {
            // only the empty decomposition may have empty bags
            (0, None) => Ok(TdHeader {
                bags: 0,
                width: 0,
                vertices: *vertices,
            }),
            (bags, Some(width)) => Ok(TdHeader {
                bags,
                width,
                vertices: *vertices,
            }),
            (_, None) => Err(invalid(line)),
        },
        _ => Err(invalid(line)),
    };

    Some(header)
}

pub fn ingest(output: &str, vertices: usize) -> Result<usize, IngestorError> {
    let header = output
        .lines()
        .find_map(parse_header)
        .unwrap_or(Err(IngestorError::NoMarker))?;

    if header.vertices != vertices {
        return Err(IngestorError::VertexMismatch {
            expected: vertices,
            found: header.vertices,
        });
    }

    Ok(header.width)
}
