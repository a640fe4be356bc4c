//! Real, even-order spherical harmonics.
//!
//! Coefficients are stored degree by degree (`l = 0, 2, 4, ...`) with the order `m`
//! running from `-l` to `l`, so the index of `(l, m)` is `l (l + 1) / 2 + m`. The basis
//! is orthonormal on the unit sphere; `m > 0` terms use `cos(m phi)` and `m < 0` terms
//! use `sin(|m| phi)`, each scaled by `sqrt(2)`.

use nalgebra::{DVector, Vector3};
use std::f64::consts::PI;

/// Number of coefficients of an even-order expansion up to degree `lmax`.
#[inline]
pub fn n_coefs(lmax: usize) -> usize {
    (lmax + 1) * (lmax + 2) / 2
}

#[inline]
pub fn index(l: usize, m: isize) -> usize {
    ((l * (l + 1) / 2) as isize + m) as usize
}

/// Associated Legendre function `P_l^m(x)` without the Condon-Shortley phase.
fn legendre(l: usize, m: usize, x: f64) -> f64 {
    let somx2 = ((1.0 - x) * (1.0 + x)).max(0.0).sqrt();
    let mut pmm = 1.0;
    let mut fact = 1.0;
    for _ in 0..m {
        pmm *= fact * somx2;
        fact += 2.0;
    }
    if l == m {
        return pmm;
    }
    let mut pmmp1 = x * (2 * m + 1) as f64 * pmm;
    if l == m + 1 {
        return pmmp1;
    }
    let mut pll = 0.0;
    for ll in (m + 2)..=l {
        pll = ((2 * ll - 1) as f64 * x * pmmp1 - (ll + m - 1) as f64 * pmm) / (ll - m) as f64;
        pmm = pmmp1;
        pmmp1 = pll;
    }
    pll
}

/// Normalisation `sqrt((2l + 1) / 4pi * (l - m)! / (l + m)!)`.
fn normalization(l: usize, m: usize) -> f64 {
    let ratio: f64 = ((l - m + 1)..=(l + m)).fold(1.0, |acc, k| acc / k as f64);
    ((2 * l + 1) as f64 / (4.0 * PI) * ratio).sqrt()
}

/// Evaluates every basis function at the direction `dir`.
///
/// The result is also the SH expansion of a unit delta function oriented along `dir`,
/// which is how particles contribute to the orientation-density image.
pub fn delta(dir: &Vector3<f64>, lmax: usize) -> DVector<f64> {
    let d = dir.normalize();
    let cos_theta = d.z.clamp(-1.0, 1.0);
    let phi = d.y.atan2(d.x);
    let mut out = DVector::zeros(n_coefs(lmax));

    for l in (0..=lmax).step_by(2) {
        let centre = l * (l + 1) / 2;
        out[centre] = normalization(l, 0) * legendre(l, 0, cos_theta);
        for m in 1..=l {
            let value = std::f64::consts::SQRT_2 * normalization(l, m) * legendre(l, m, cos_theta);
            let angle = m as f64 * phi;
            out[centre + m] = value * angle.cos();
            out[centre - m] = value * angle.sin();
        }
    }
    out
}
