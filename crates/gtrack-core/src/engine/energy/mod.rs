//! Transactional energy computers.
//!
//! Every proposal of the sampler is priced in two phases. A `stage_*` call returns the
//! temperature-scaled energy change of the proposed move and buffers whatever state the
//! move would change; the sampler then calls exactly one of
//! [`EnergyComputer::accept_changes`] or [`EnergyComputer::clear_changes`]. Each worker
//! owns a private [`EnergyComputer::fork`] of the run's computer, so staged but
//! uncommitted changes never leak between threads.

pub mod external;
pub mod internal;
pub mod sum;

use crate::core::models::ids::ParticleId;
use crate::core::models::particle::{Particle, ParticleEnd};
use nalgebra::Vector3;
use rand::RngCore;

pub use external::{ExternalEnergy, ExternalModel, ExternalOutputs};
pub use internal::InternalEnergy;
pub use sum::EnergySum;

pub trait EnergyComputer: Send {
    /// Energy change of creating a particle with the given pose.
    fn stage_add(&mut self, pos: &Vector3<f64>, dir: &Vector3<f64>) -> f64;

    /// Energy change of moving `particle` (whose current state is `current`) to a new pose.
    fn stage_shift(
        &mut self,
        particle: ParticleId,
        current: &Particle,
        pos: &Vector3<f64>,
        dir: &Vector3<f64>,
    ) -> f64;

    /// Energy change of destroying `particle`.
    fn stage_remove(&mut self, particle: ParticleId, current: &Particle) -> f64;

    /// Energy change of re-linking `end`.
    ///
    /// A computer that chooses the new partner writes it to `target`; `None` after the call
    /// means the end is to be left (or made) free. Computers that do not depend on links
    /// leave `target` untouched and return zero.
    fn stage_connect(
        &mut self,
        end: &ParticleEnd,
        rng: &mut dyn RngCore,
        target: &mut Option<ParticleEnd>,
    ) -> f64;

    /// Commits the staged changes.
    fn accept_changes(&mut self);

    /// Discards the staged changes.
    fn clear_changes(&mut self);

    /// An independent instance with empty buffers, sharing only immutable and
    /// internally-locked state with `self`.
    fn fork(&self) -> Box<dyn EnergyComputer + '_>;
}
