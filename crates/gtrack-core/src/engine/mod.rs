//! # Engine Module
//!
//! The stateful machinery of a global tractography run.
//!
//! ## Overview
//!
//! Every worker thread runs its own [`sampler::MhSampler`] against state that is shared by
//! all workers and protected by short internal locks:
//!
//! - **Particles** ([`pool`], [`grid`]) - the arena of live particles and the uniform
//!   spatial hash used for neighbourhood queries and track export.
//! - **Exclusion** ([`spatial_lock`]) - mutual exclusion over regions of scanner space, so
//!   that concurrent proposals never touch overlapping neighbourhoods.
//! - **Energy** ([`energy`]) - the transactional stage / accept / clear computers for the
//!   connectivity prior and the data fit, and their weighted sum.
//! - **Bookkeeping** ([`stats`]) - move counters, energy totals, the iteration budget and
//!   the annealing schedule.
//!
//! The immutable run parameters live in [`config`], errors in [`error`] and progress
//! callbacks in [`progress`].

pub mod config;
pub mod energy;
pub mod error;
pub mod grid;
pub mod pool;
pub mod progress;
pub mod sampler;
pub mod spatial_lock;
pub mod stats;
pub(crate) mod utils;
