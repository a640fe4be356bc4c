use nalgebra::Vector3;
use thiserror::Error;

/// Volumes whose b-values differ by less than this are assigned to the same shell.
pub const SHELL_TOLERANCE: f64 = 80.0;

#[derive(Debug, Error, PartialEq)]
pub enum GradientError {
    #[error("Gradient table is empty")]
    Empty,
    #[error("Gradient entry {index} has a non-finite or negative b-value")]
    InvalidBValue { index: usize },
    #[error("Gradient entry {index} has b = {b} but a zero-length direction")]
    MissingDirection { index: usize, b: f64 },
}

/// A group of volumes acquired with (nearly) the same b-value.
#[derive(Debug, Clone, PartialEq)]
pub struct Shell {
    pub mean_b: f64,
    pub volumes: Vec<usize>,
}

/// Per-volume diffusion encoding (unit direction and b-value), grouped into shells.
#[derive(Debug, Clone, PartialEq)]
pub struct GradientTable {
    directions: Vec<Vector3<f64>>,
    bvalues: Vec<f64>,
    shells: Vec<Shell>,
    shell_of: Vec<usize>,
}

impl GradientTable {
    /// Builds a table from `(x, y, z, b)` rows. Directions of b = 0 volumes may be zero.
    pub fn new(rows: &[[f64; 4]]) -> Result<Self, GradientError> {
        if rows.is_empty() {
            return Err(GradientError::Empty);
        }

        let mut directions = Vec::with_capacity(rows.len());
        let mut bvalues = Vec::with_capacity(rows.len());
        for (index, row) in rows.iter().enumerate() {
            let b = row[3];
            if !b.is_finite() || b < 0.0 {
                return Err(GradientError::InvalidBValue { index });
            }
            let dir = Vector3::new(row[0], row[1], row[2]);
            let norm = dir.norm();
            if b >= SHELL_TOLERANCE && norm < 1e-6 {
                return Err(GradientError::MissingDirection { index, b });
            }
            directions.push(if norm > 1e-6 { dir / norm } else { Vector3::z() });
            bvalues.push(b);
        }

        let (shells, shell_of) = cluster_shells(&bvalues);
        Ok(Self {
            directions,
            bvalues,
            shells,
            shell_of,
        })
    }

    pub fn len(&self) -> usize {
        self.bvalues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bvalues.is_empty()
    }

    pub fn direction(&self, volume: usize) -> &Vector3<f64> {
        &self.directions[volume]
    }

    pub fn bvalue(&self, volume: usize) -> f64 {
        self.bvalues[volume]
    }

    /// Shells in order of increasing b-value.
    pub fn shells(&self) -> &[Shell] {
        &self.shells
    }

    pub fn shell_of(&self, volume: usize) -> usize {
        self.shell_of[volume]
    }
}

fn cluster_shells(bvalues: &[f64]) -> (Vec<Shell>, Vec<usize>) {
    let mut order: Vec<usize> = (0..bvalues.len()).collect();
    order.sort_by(|&a, &b| {
        bvalues[a]
            .partial_cmp(&bvalues[b])
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut shells: Vec<Shell> = Vec::new();
    let mut shell_of = vec![0; bvalues.len()];
    let mut shell_start = f64::NEG_INFINITY;

    for volume in order {
        let b = bvalues[volume];
        if shells.is_empty() || b - shell_start >= SHELL_TOLERANCE {
            shells.push(Shell {
                mean_b: 0.0,
                volumes: Vec::new(),
            });
            shell_start = b;
        }
        let index = shells.len() - 1;
        shells[index].volumes.push(volume);
        shell_of[volume] = index;
    }

    for shell in &mut shells {
        shell.volumes.sort_unstable();
        shell.mean_b =
            shell.volumes.iter().map(|&v| bvalues[v]).sum::<f64>() / shell.volumes.len() as f64;
    }
    (shells, shell_of)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn volumes_are_grouped_into_shells_by_b_value() {
        let rows = [
            [0.0, 0.0, 0.0, 0.0],
            [1.0, 0.0, 0.0, 1000.0],
            [0.0, 1.0, 0.0, 995.0],
            [0.0, 0.0, 1.0, 3000.0],
            [0.0, 0.0, 0.0, 5.0],
            [1.0, 1.0, 0.0, 1010.0],
        ];
        let table = GradientTable::new(&rows).unwrap();
        assert_eq!(table.shells().len(), 3);
        assert_eq!(table.shells()[0].volumes, vec![0, 4]);
        assert_eq!(table.shells()[1].volumes, vec![1, 2, 5]);
        assert_eq!(table.shells()[2].volumes, vec![3]);
        assert_eq!(table.shell_of(5), 1);
        assert!((table.shells()[1].mean_b - 1001.666_666_666_7).abs() < 1e-6);
        assert!((table.direction(5).norm() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn weighted_volume_without_direction_is_rejected() {
        let rows = [[0.0, 0.0, 0.0, 1000.0]];
        assert_eq!(
            GradientTable::new(&rows),
            Err(GradientError::MissingDirection { index: 0, b: 1000.0 })
        );
    }

    #[test]
    fn empty_table_is_rejected() {
        assert_eq!(GradientTable::new(&[]), Err(GradientError::Empty));
    }
}
