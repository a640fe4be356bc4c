//! # Core Module
//!
//! Stateless building blocks of the tractography engine.
//!
//! - **Particle Representation** ([`models`]) - Particles, particle ends and arena handles
//! - **Mathematics** ([`math`]) - Spherical harmonics and non-negative least squares
//! - **Images** ([`image`]) - Voxel grids, scanner geometry and the sampling domain
//! - **Diffusion Model** ([`gradient`], [`response`]) - Shell detection and forward kernels
//! - **File I/O** ([`io`]) - Track sinks, `.tck` output and kernel text matrices
//! - **Utilities** ([`utils`]) - Small geometric helpers

pub mod gradient;
pub mod image;
pub mod io;
pub mod math;
pub mod models;
pub mod response;
pub mod utils;
