use gtrack::core::gradient::{GradientError, GradientTable};
use gtrack::core::io::matrix::{MatrixError, read_matrix};
use std::path::Path;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum GradientFileError {
    #[error(transparent)]
    Matrix(#[from] MatrixError),
    #[error("Gradient file must have 4 columns (x y z b), found a {rows}x{cols} matrix")]
    Shape { rows: usize, cols: usize },
    #[error(transparent)]
    Table(#[from] GradientError),
}

/// Reads an `x y z b` gradient table, one row per volume.
///
/// A table stored with one column per volume is accepted as well.
pub fn read_gradients(path: &Path) -> Result<GradientTable, GradientFileError> {
    let matrix = read_matrix(path)?;
    let matrix = match (matrix.nrows(), matrix.ncols()) {
        (_, 4) => matrix,
        (4, _) => matrix.transpose(),
        (rows, cols) => return Err(GradientFileError::Shape { rows, cols }),
    };
    let rows: Vec<[f64; 4]> = matrix
        .row_iter()
        .map(|r| [r[0], r[1], r[2], r[3]])
        .collect();
    debug!(path = %path.display(), volumes = rows.len(), "Read gradient table.");
    Ok(GradientTable::new(&rows)?)
}
