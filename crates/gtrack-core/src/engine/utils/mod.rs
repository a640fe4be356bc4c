//! Helpers shared by the energy computers and the sampler.

pub mod sampling;
