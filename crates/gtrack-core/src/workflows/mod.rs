//! # Workflows Module
//!
//! High-level entry points that run a complete global tractography job.
//!
//! ## Overview
//!
//! A workflow takes fully loaded inputs (diffusion image, gradient table, sampling
//! domain, response kernels) and a validated [`crate::engine::config::SamplerConfig`],
//! builds the shared run state, drives the worker threads to the end of the iteration
//! budget and hands back the exported tracks and diagnostic volumes. File formats are
//! the caller's concern: tracks go to any [`crate::core::io::traits::TrackSink`] and the
//! trend log to any writer.
//!
//! - **Tracking Workflow** ([`track`]) - Setup, multi-threaded sampling and export.

pub mod track;
