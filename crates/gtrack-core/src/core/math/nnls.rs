//! Lawson-Hanson active-set solver for `min ||A x - b||^2` subject to `x >= 0`.
//!
//! The external energy solves one of these per touched voxel, with one column per
//! isotropic tissue class, so problems are tiny and the solver favours clarity over
//! blocked updates.

use nalgebra::{DMatrix, DVector};

const DEFAULT_TOLERANCE: f64 = 1e-10;
const SVD_EPSILON: f64 = 1e-12;

#[derive(Debug, Clone, PartialEq)]
pub struct NnlsSolution {
    pub x: DVector<f64>,
    /// Squared norm of the residual `b - A x`.
    pub residual_sq: f64,
    /// `false` if the iteration cap was hit or a sub-problem was singular; `x` is then the
    /// best feasible iterate found.
    pub converged: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct NnlsSolver {
    max_iterations: usize,
    tolerance: f64,
}

impl Default for NnlsSolver {
    fn default() -> Self {
        Self {
            max_iterations: 0,
            tolerance: DEFAULT_TOLERANCE,
        }
    }
}

impl NnlsSolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Caps the number of outer iterations (default `3 * ncols`).
    pub fn with_max_iterations(mut self, iterations: usize) -> Self {
        self.max_iterations = iterations;
        self
    }

    pub fn solve(&self, a: &DMatrix<f64>, b: &DVector<f64>) -> NnlsSolution {
        let n = a.ncols();
        let mut x = DVector::zeros(n);
        if n == 0 {
            return NnlsSolution {
                x,
                residual_sq: b.norm_squared(),
                converged: true,
            };
        }

        let max_iterations = if self.max_iterations == 0 {
            3 * n
        } else {
            self.max_iterations
        };
        let mut passive = vec![false; n];
        let mut converged = false;

        for _ in 0..max_iterations {
            let w = a.tr_mul(&(b - a * &x));
            let candidate = (0..n)
                .filter(|&j| !passive[j] && w[j] > self.tolerance)
                .max_by(|&i, &j| w[i].partial_cmp(&w[j]).unwrap_or(std::cmp::Ordering::Equal));

            let Some(j) = candidate else {
                converged = true;
                break;
            };
            passive[j] = true;

            loop {
                let Some(z) = solve_passive(a, b, &passive) else {
                    return finish(a, b, x, false);
                };

                let infeasible: Vec<usize> = (0..n)
                    .filter(|&i| passive[i] && z[i] <= self.tolerance)
                    .collect();
                if infeasible.is_empty() {
                    x = z;
                    break;
                }

                let alpha = infeasible
                    .iter()
                    .map(|&i| {
                        let denom = x[i] - z[i];
                        if denom.abs() < f64::EPSILON { 0.0 } else { x[i] / denom }
                    })
                    .fold(f64::INFINITY, f64::min);

                x += (z - &x) * alpha;
                for i in 0..n {
                    if passive[i] && x[i] <= self.tolerance {
                        passive[i] = false;
                        x[i] = 0.0;
                    }
                }
                if !passive.iter().any(|&p| p) {
                    break;
                }
            }
        }

        finish(a, b, x, converged)
    }
}

/// Unconstrained least squares restricted to the passive columns; zero elsewhere.
fn solve_passive(a: &DMatrix<f64>, b: &DVector<f64>, passive: &[bool]) -> Option<DVector<f64>> {
    let columns: Vec<usize> = (0..passive.len()).filter(|&i| passive[i]).collect();
    let sub = a.select_columns(&columns);
    let sol = sub.svd(true, true).solve(b, SVD_EPSILON).ok()?;
    if sol.iter().any(|v| !v.is_finite()) {
        return None;
    }
    let mut full = DVector::zeros(passive.len());
    for (k, &col) in columns.iter().enumerate() {
        full[col] = sol[k];
    }
    Some(full)
}

fn finish(a: &DMatrix<f64>, b: &DVector<f64>, x: DVector<f64>, converged: bool) -> NnlsSolution {
    let residual_sq = (b - a * &x).norm_squared();
    NnlsSolution {
        x,
        residual_sq,
        converged,
    }
}

/// Convenience wrapper with default settings.
pub fn nnls(a: &DMatrix<f64>, b: &DVector<f64>) -> NnlsSolution {
    NnlsSolver::default().solve(a, b)
}
