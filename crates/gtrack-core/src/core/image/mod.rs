//! In-memory image support: scanner geometry ([`geometry`]), multi-component voxel grids
//! ([`volume`]) and the region in which particles may live ([`domain`]).

pub mod domain;
pub mod geometry;
pub mod volume;

use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ImageError {
    #[error("Image data length mismatch: expected {expected} values, found {actual}")]
    DataLength { expected: usize, actual: usize },
    #[error("Voxel-to-scanner transform is not invertible")]
    SingularTransform,
    #[error("Image dimensions {found:?} do not match the reference dimensions {expected:?}")]
    DimensionMismatch {
        expected: [usize; 3],
        found: [usize; 3],
    },
    #[error("Image has no voxels")]
    Empty,
}
