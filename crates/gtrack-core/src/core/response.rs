//! Response kernels and the linear forward model of the diffusion signal.
//!
//! The white-matter response holds one row per shell with the zonal SH coefficients
//! `r_l` (`l = 0, 2, 4, ...`) of the single-fibre signal. Each isotropic response holds
//! one row per shell with a single `l = 0` coefficient. From these and the gradient table
//! the model builds
//!
//! - `K` (`volumes x coefficients`): maps an orientation-density SH expansion to the
//!   predicted signal, `K[j, (l, m)] = Y_lm(g_j) r_{s(j), l} sqrt(4 pi / (2l + 1))`;
//! - `A_iso` (`volumes x tissues`): signal of a unit fraction of each isotropic tissue.

use super::gradient::GradientTable;
use super::io::matrix::{MatrixError, read_matrix};
use super::math::sh;
use nalgebra::DMatrix;
use std::f64::consts::PI;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum KernelError {
    #[error("Failed to load response '{name}': {source}")]
    Load {
        name: String,
        #[source]
        source: MatrixError,
    },
    #[error("Response '{name}' has {found} rows but the data has {expected} shells")]
    ShellMismatch {
        name: String,
        expected: usize,
        found: usize,
    },
    #[error("Isotropic response '{name}' must have exactly one column, found {found}")]
    IsotropicShape { name: String, found: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResponseKernels {
    wm: DMatrix<f64>,
    iso: Vec<DMatrix<f64>>,
}

impl ResponseKernels {
    pub fn new(wm: DMatrix<f64>, iso: Vec<DMatrix<f64>>) -> Result<Self, KernelError> {
        for (i, m) in iso.iter().enumerate() {
            if m.ncols() != 1 {
                return Err(KernelError::IsotropicShape {
                    name: format!("isotropic #{}", i + 1),
                    found: m.ncols(),
                });
            }
        }
        Ok(Self { wm, iso })
    }

    pub fn load(wm_path: &Path, iso_paths: &[impl AsRef<Path>]) -> Result<Self, KernelError> {
        let load = |path: &Path| {
            read_matrix(path).map_err(|source| KernelError::Load {
                name: path.display().to_string(),
                source,
            })
        };
        let wm = load(wm_path)?;
        let iso = iso_paths
            .iter()
            .map(|p| load(p.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(wm, iso)
    }

    /// Maximum harmonic degree implied by the white-matter response.
    pub fn lmax(&self) -> usize {
        2 * (self.wm.ncols().saturating_sub(1))
    }

    pub fn n_isotropic(&self) -> usize {
        self.iso.len()
    }

    /// Checks every response against the number of shells in the data.
    pub fn validate(&self, n_shells: usize) -> Result<(), KernelError> {
        if self.wm.nrows() != n_shells {
            return Err(KernelError::ShellMismatch {
                name: "white matter".to_string(),
                expected: n_shells,
                found: self.wm.nrows(),
            });
        }
        for (i, m) in self.iso.iter().enumerate() {
            if m.nrows() != n_shells {
                return Err(KernelError::ShellMismatch {
                    name: format!("isotropic #{}", i + 1),
                    expected: n_shells,
                    found: m.nrows(),
                });
            }
        }
        Ok(())
    }
}

/// Precomputed forward matrices; immutable and shared by every energy computer.
#[derive(Debug, Clone, PartialEq)]
pub struct ForwardModel {
    lmax: usize,
    k: DMatrix<f64>,
    a_iso: DMatrix<f64>,
}

impl ForwardModel {
    pub fn build(kernels: &ResponseKernels, gradients: &GradientTable) -> Result<Self, KernelError> {
        kernels.validate(gradients.shells().len())?;

        let lmax = kernels.lmax();
        let n_volumes = gradients.len();
        let mut k = DMatrix::zeros(n_volumes, sh::n_coefs(lmax));
        let mut a_iso = DMatrix::zeros(n_volumes, kernels.n_isotropic());

        for j in 0..n_volumes {
            let shell = gradients.shell_of(j);
            let y = sh::delta(gradients.direction(j), lmax);
            for l in (0..=lmax).step_by(2) {
                let scale = kernels.wm[(shell, l / 2)] * (4.0 * PI / (2 * l + 1) as f64).sqrt();
                for m in -(l as isize)..=(l as isize) {
                    let idx = sh::index(l, m);
                    k[(j, idx)] = y[idx] * scale;
                }
            }
            for (t, iso) in kernels.iso.iter().enumerate() {
                a_iso[(j, t)] = iso[(shell, 0)] / (4.0 * PI).sqrt();
            }
        }

        Ok(Self { lmax, k, a_iso })
    }

    pub fn lmax(&self) -> usize {
        self.lmax
    }

    pub fn n_coefs(&self) -> usize {
        self.k.ncols()
    }

    pub fn n_volumes(&self) -> usize {
        self.k.nrows()
    }

    pub fn n_isotropic(&self) -> usize {
        self.a_iso.ncols()
    }

    pub fn k(&self) -> &DMatrix<f64> {
        &self.k
    }

    pub fn a_iso(&self) -> &DMatrix<f64> {
        &self.a_iso
    }
}
