//! Numerical kernels used by the external energy: the real spherical-harmonic basis
//! ([`sh`]) and a small non-negative least-squares solver ([`nnls`]).

pub mod nnls;
pub mod sh;
