use nalgebra::DMatrix;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MatrixError {
    #[error("File I/O error for '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("Invalid number '{token}' on line {line}")]
    Parse { line: usize, token: String },
    #[error("Line {line} has {found} columns, expected {expected}")]
    Ragged {
        line: usize,
        expected: usize,
        found: usize,
    },
    #[error("Matrix contains no values")]
    Empty,
}

/// Parses a numeric matrix written one row per line.
///
/// Values may be separated by whitespace or commas; `#` starts a comment that runs to
/// the end of the line and blank lines are ignored.
pub fn parse_matrix(content: &str) -> Result<DMatrix<f64>, MatrixError> {
    let mut rows: Vec<Vec<f64>> = Vec::new();
    for (i, raw) in content.lines().enumerate() {
        let line = raw.split('#').next().unwrap_or_default().trim();
        if line.is_empty() {
            continue;
        }
        let row = line
            .split(|c: char| c.is_whitespace() || c == ',')
            .filter(|t| !t.is_empty())
            .map(|t| {
                t.parse::<f64>().map_err(|_| MatrixError::Parse {
                    line: i + 1,
                    token: t.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        if let Some(first) = rows.first() {
            if first.len() != row.len() {
                return Err(MatrixError::Ragged {
                    line: i + 1,
                    expected: first.len(),
                    found: row.len(),
                });
            }
        }
        rows.push(row);
    }

    let ncols = rows.first().map_or(0, Vec::len);
    if rows.is_empty() || ncols == 0 {
        return Err(MatrixError::Empty);
    }
    Ok(DMatrix::from_row_iterator(
        rows.len(),
        ncols,
        rows.into_iter().flatten(),
    ))
}

pub fn read_matrix(path: &Path) -> Result<DMatrix<f64>, MatrixError> {
    let content = std::fs::read_to_string(path).map_err(|e| MatrixError::Io {
        path: path.to_string_lossy().to_string(),
        source: e,
    })?;
    parse_matrix(&content)
}
