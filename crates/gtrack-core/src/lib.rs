//! # gtrack Core Library
//!
//! A particle-based global tractography engine. White-matter pathways are modelled as a
//! single population of short fibre segments ("particles") that are created, destroyed,
//! moved and linked into chains by a concurrent Metropolis-Hastings sampler with simulated
//! annealing, driven by an energy that balances the fit to the diffusion signal against a
//! connectivity prior.
//!
//! ## Architectural Philosophy
//!
//! The library follows a strict three-layer architecture:
//!
//! - **[`core`]: The Foundation.** Stateless data models (`Particle`, `Volume`), pure
//!   mathematics (spherical harmonics, NNLS), response kernels and track I/O.
//!
//! - **[`engine`]: The Logic Core.** The shared, thread-safe run state (`ParticlePool`,
//!   `ParticleGrid`, `SpatialLock`, `Stats`), the transactional energy computers and the
//!   `MhSampler` state machine executed by every worker thread.
//!
//! - **[`workflows`]: The Public API.** Ties `engine` and `core` together into a complete
//!   global tractography run: setup, multi-threaded sampling, join, track and diagnostic
//!   export.

pub mod core;
pub mod engine;
pub mod workflows;
