use super::EnergyComputer;
use crate::core::image::ImageError;
use crate::core::image::domain::SamplingDomain;
use crate::core::image::geometry::ImageGeometry;
use crate::core::image::volume::Volume;
use crate::core::math::nnls::nnls;
use crate::core::math::sh;
use crate::core::models::ids::ParticleId;
use crate::core::models::particle::{Particle, ParticleEnd};
use crate::core::response::ForwardModel;
use crate::engine::config::{Interpolation, SamplerConfig};
use crate::engine::error::EngineError;
use crate::engine::stats::Stats;
use nalgebra::{DVector, Vector3};
use parking_lot::RwLock;
use rand::RngCore;
use rayon::prelude::*;
use std::collections::HashMap;
use std::f64::consts::PI;
use tracing::{debug, info, trace};

/// Per-voxel state of the data fit.
#[derive(Debug)]
struct Accumulators {
    /// Orientation density (SH coefficients), `n_coefs` per voxel.
    tod: Vec<f64>,
    /// Isotropic tissue fractions, `n_isotropic` per voxel.
    fractions: Vec<f64>,
    /// Residual sum of squares per voxel.
    residual: Vec<f64>,
}

/// Diagnostic images produced at the end of a run.
#[derive(Debug, Clone)]
pub struct ExternalOutputs {
    pub tod: Volume<f64>,
    pub fractions: Volume<f64>,
    pub residual: Volume<f64>,
}

/// Data shared by every [`ExternalEnergy`] of a run: the measured signal, the forward
/// model and the accumulators that hold the currently committed fit.
#[derive(Debug)]
pub struct ExternalModel {
    geometry: ImageGeometry,
    dwi: Volume<f64>,
    /// Voxels that take part in the fit: inside the domain and with finite data.
    valid: Vec<bool>,
    forward: ForwardModel,
    weight: f64,
    particle_potential: f64,
    interpolation: Interpolation,
    state: RwLock<Accumulators>,
}

/// Result of fitting the isotropic compartments to one voxel's residual signal.
struct VoxelFit {
    energy: f64,
    fractions: DVector<f64>,
}

impl ExternalModel {
    pub fn new(
        dwi: Volume<f64>,
        domain: &SamplingDomain,
        forward: ForwardModel,
        config: &SamplerConfig,
    ) -> Result<Self, EngineError> {
        let geometry = dwi.geometry().clone();
        if geometry.dims() != domain.geometry().dims() {
            return Err(ImageError::DimensionMismatch {
                expected: geometry.dims(),
                found: domain.geometry().dims(),
            }
            .into());
        }
        if dwi.components() != forward.n_volumes() {
            return Err(EngineError::Initialization(format!(
                "image has {} volumes but the gradient table lists {}",
                dwi.components(),
                forward.n_volumes()
            )));
        }

        let n_voxels = geometry.n_voxels();
        let valid: Vec<bool> = (0..n_voxels)
            .map(|v| domain.contains_voxel(v) && dwi.at_index(v).iter().all(|x| x.is_finite()))
            .collect();
        let skipped = (0..n_voxels)
            .filter(|&v| domain.contains_voxel(v) && !valid[v])
            .count();
        if skipped > 0 {
            info!("Excluding {} voxel(s) with non-finite data from the fit.", skipped);
        }

        let mut model = Self {
            geometry,
            dwi,
            valid,
            weight: config.particle_weight,
            particle_potential: config.particle_potential,
            interpolation: config.interpolation,
            state: RwLock::new(Accumulators {
                tod: vec![0.0; n_voxels * forward.n_coefs()],
                fractions: vec![0.0; n_voxels * forward.n_isotropic()],
                residual: vec![0.0; n_voxels],
            }),
            forward,
        };
        model.initialise_fit();
        Ok(model)
    }

    /// Fits the empty model (isotropic compartments only) in every valid voxel.
    fn initialise_fit(&mut self) {
        let n_coefs = self.forward.n_coefs();
        let n_iso = self.forward.n_isotropic();
        let fits: Vec<Option<VoxelFit>> = (0..self.geometry.n_voxels())
            .into_par_iter()
            .map(|v| {
                self.valid[v]
                    .then(|| self.fit(v, &DVector::zeros(n_coefs)))
            })
            .collect();

        let state = self.state.get_mut();
        for (v, fit) in fits.into_iter().enumerate() {
            if let Some(fit) = fit {
                state.residual[v] = fit.energy;
                state.fractions[v * n_iso..(v + 1) * n_iso].copy_from_slice(fit.fractions.as_slice());
            }
        }
        debug!(
            "Initial data-fit energy {:.6} over {} voxel(s).",
            state.residual.iter().sum::<f64>(),
            self.valid.iter().filter(|&&v| v).count()
        );
    }

    fn fit(&self, voxel: usize, tod: &DVector<f64>) -> VoxelFit {
        let measured = DVector::from_column_slice(self.dwi.at_index(voxel));
        let residual = measured - self.forward.k() * tod;
        let solution = nnls(self.forward.a_iso(), &residual);
        VoxelFit {
            energy: solution.residual_sq,
            fractions: solution.x,
        }
    }

    /// Current total data-fit energy (residuals plus particle potential for `particles`).
    pub fn total_energy(&self, particles: usize) -> f64 {
        self.state.read().residual.iter().sum::<f64>()
            + self.particle_potential * particles as f64
    }

    pub fn geometry(&self) -> &ImageGeometry {
        &self.geometry
    }

    /// Valid voxels touched by a particle at `pos`, with normalised weights.
    fn footprint(&self, pos: &Vector3<f64>) -> Vec<(usize, f64)> {
        let v = self.geometry.to_voxel(pos);
        let mut weights: Vec<([f64; 3], f64)> = Vec::new();
        match self.interpolation {
            Interpolation::Trilinear => {
                let base = v.map(f64::floor);
                let frac = v - base;
                for corner in 0..8 {
                    let offset = [corner & 1, (corner >> 1) & 1, (corner >> 2) & 1];
                    let w: f64 = (0..3)
                        .map(|a| if offset[a] == 1 { frac[a] } else { 1.0 - frac[a] })
                        .product();
                    let index = [0, 1, 2].map(|a| base[a] + offset[a] as f64);
                    weights.push((index, w));
                }
            }
            Interpolation::Hanning { width } => {
                let axis_weights = |a: usize| -> Vec<(f64, f64)> {
                    let lo = (v[a] - width).ceil() as i64;
                    let hi = (v[a] + width).floor() as i64;
                    (lo..=hi)
                        .filter_map(|i| {
                            let d = (i as f64 - v[a]).abs();
                            (d < width).then(|| (i as f64, 0.5 * (1.0 + (PI * d / width).cos())))
                        })
                        .collect()
                };
                let (wx, wy, wz) = (axis_weights(0), axis_weights(1), axis_weights(2));
                for &(x, a) in &wx {
                    for &(y, b) in &wy {
                        for &(z, c) in &wz {
                            weights.push(([x, y, z], a * b * c));
                        }
                    }
                }
            }
        }

        let total: f64 = weights.iter().map(|(_, w)| w).sum();
        if total <= 0.0 {
            return Vec::new();
        }
        weights
            .into_iter()
            .filter(|&(_, w)| w > 0.0)
            .filter_map(|(index, w)| {
                let voxel = self.geometry.checked_voxel(index)?;
                let linear = self.geometry.linear_index(voxel);
                self.valid[linear].then_some((linear, w / total))
            })
            .collect()
    }

    /// Consumes the model and returns the committed fit as images.
    pub fn into_outputs(self) -> Result<ExternalOutputs, ImageError> {
        let state = self.state.into_inner();
        Ok(ExternalOutputs {
            tod: Volume::from_data(self.geometry.clone(), self.forward.n_coefs(), state.tod)?,
            fractions: Volume::from_data(
                self.geometry.clone(),
                self.forward.n_isotropic(),
                state.fractions,
            )?,
            residual: Volume::from_data(self.geometry, 1, state.residual)?,
        })
    }
}

#[derive(Debug)]
struct PendingVoxel {
    voxel: usize,
    /// Committed density the fit was computed against.
    seen: DVector<f64>,
    fit: VoxelFit,
}

impl std::fmt::Debug for VoxelFit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoxelFit")
            .field("energy", &self.energy)
            .finish()
    }
}

/// Data-fit energy: sum over voxels of the squared residual between the measured signal
/// and the signal predicted from the particles, after fitting the isotropic compartments
/// by non-negative least squares.
pub struct ExternalEnergy<'a> {
    model: &'a ExternalModel,
    stats: &'a Stats,
    changes: HashMap<usize, DVector<f64>>,
    pending: Vec<PendingVoxel>,
    particle_delta: f64,
}

impl<'a> ExternalEnergy<'a> {
    pub fn new(model: &'a ExternalModel, stats: &'a Stats) -> Self {
        Self {
            model,
            stats,
            changes: HashMap::new(),
            pending: Vec::new(),
            particle_delta: 0.0,
        }
    }

    fn reset(&mut self) {
        self.changes.clear();
        self.pending.clear();
        self.particle_delta = 0.0;
    }

    /// Adds `sign` times the particle's contribution to the change buffer.
    fn stage_contribution(&mut self, pos: &Vector3<f64>, dir: &Vector3<f64>, sign: f64) {
        let coefs = sh::delta(dir, self.model.forward.lmax()) * (sign * self.model.weight);
        let n_coefs = coefs.len();
        for (voxel, w) in self.model.footprint(pos) {
            let entry = self
                .changes
                .entry(voxel)
                .or_insert_with(|| DVector::zeros(n_coefs));
            entry.axpy(w, &coefs, 1.0);
        }
    }

    /// Refits every touched voxel and returns the change in residual energy.
    fn evaluate(&mut self) -> f64 {
        let n_coefs = self.model.forward.n_coefs();
        let state = self.model.state.read();
        let mut delta = 0.0;
        for (&voxel, change) in &self.changes {
            let seen = DVector::from_column_slice(&state.tod[voxel * n_coefs..(voxel + 1) * n_coefs]);
            let fit = self.model.fit(voxel, &(&seen + change));
            delta += fit.energy - state.residual[voxel];
            self.pending.push(PendingVoxel { voxel, seen, fit });
        }
        delta
    }

    fn finish_stage(&mut self, particle_delta: f64) -> f64 {
        self.particle_delta = particle_delta;
        let delta = self.evaluate() + self.model.particle_potential * particle_delta;
        delta / self.stats.temperature()
    }
}

impl EnergyComputer for ExternalEnergy<'_> {
    fn stage_add(&mut self, pos: &Vector3<f64>, dir: &Vector3<f64>) -> f64 {
        self.reset();
        self.stage_contribution(pos, dir, 1.0);
        self.finish_stage(1.0)
    }

    fn stage_shift(
        &mut self,
        _particle: ParticleId,
        current: &Particle,
        pos: &Vector3<f64>,
        dir: &Vector3<f64>,
    ) -> f64 {
        self.reset();
        self.stage_contribution(&current.pos, &current.dir, -1.0);
        self.stage_contribution(pos, dir, 1.0);
        self.finish_stage(0.0)
    }

    fn stage_remove(&mut self, _particle: ParticleId, current: &Particle) -> f64 {
        self.reset();
        self.stage_contribution(&current.pos, &current.dir, -1.0);
        self.finish_stage(-1.0)
    }

    fn stage_connect(
        &mut self,
        _end: &ParticleEnd,
        _rng: &mut dyn RngCore,
        _target: &mut Option<ParticleEnd>,
    ) -> f64 {
        self.reset();
        0.0
    }

    // Voxels whose committed density changed since staging are refitted.
    fn accept_changes(&mut self) {
        let n_coefs = self.model.forward.n_coefs();
        let n_iso = self.model.forward.n_isotropic();
        let mut delta = self.model.particle_potential * self.particle_delta;
        {
            let mut guard = self.model.state.write();
            let state = &mut *guard;
            for p in &self.pending {
                let Some(change) = self.changes.get(&p.voxel) else {
                    continue;
                };
                let tod = &mut state.tod[p.voxel * n_coefs..(p.voxel + 1) * n_coefs];
                let stale = tod.iter().zip(p.seen.iter()).any(|(a, b)| a != b);
                for (dst, src) in tod.iter_mut().zip(change.iter()) {
                    *dst += src;
                }
                let refit = stale.then(|| {
                    trace!(voxel = p.voxel, "Refitting a voxel changed since staging.");
                    self.model.fit(p.voxel, &DVector::from_column_slice(tod))
                });
                let fit = refit.as_ref().unwrap_or(&p.fit);

                delta += fit.energy - state.residual[p.voxel];
                state.residual[p.voxel] = fit.energy;
                state.fractions[p.voxel * n_iso..(p.voxel + 1) * n_iso]
                    .copy_from_slice(fit.fractions.as_slice());
            }
        }
        self.stats.add_external(delta);
        self.reset();
    }

    fn clear_changes(&mut self) {
        self.reset();
    }

    fn fork(&self) -> Box<dyn EnergyComputer + '_> {
        Box::new(ExternalEnergy::new(self.model, self.stats))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::gradient::GradientTable;
    use crate::core::response::ResponseKernels;
    use crate::engine::config::SamplerConfigBuilder;
    use crate::engine::spatial_lock::SpatialLock;
    use nalgebra::DMatrix;

    fn gradients() -> GradientTable {
        let mut rows = vec![[0.0, 0.0, 0.0, 0.0]];
        let dirs = [
            [1.0, 0.0, 0.0],
            [0.0, 1.0, 0.0],
            [0.0, 0.0, 1.0],
            [0.7071, 0.7071, 0.0],
            [0.7071, 0.0, 0.7071],
            [0.0, 0.7071, 0.7071],
        ];
        for d in dirs {
            rows.push([d[0], d[1], d[2], 1000.0]);
        }
        GradientTable::new(&rows).unwrap()
    }

    fn forward() -> ForwardModel {
        let wm = DMatrix::from_row_slice(2, 2, &[2.0, 0.0, 1.0, -0.6]);
        let csf = DMatrix::from_row_slice(2, 1, &[3.0, 0.5]);
        let kernels = ResponseKernels::new(wm, vec![csf]).unwrap();
        ForwardModel::build(&kernels, &gradients()).unwrap()
    }

    fn config(interpolation: Interpolation, ppot: f64) -> SamplerConfig {
        SamplerConfigBuilder::new()
            .particle_length(1.0)
            .particle_weight(0.5)
            .density(1.0)
            .connection_potential(1.0)
            .particle_potential(ppot)
            .temperatures(0.5, 0.5)
            .iterations(10)
            .interpolation(interpolation)
            .build()
            .unwrap()
    }

    /// A 4x4x4 image with 2 mm voxels whose signal is exactly that of one particle along x
    /// centred on voxel (1, 1, 1), plus one voxel of NaNs.
    fn model(interpolation: Interpolation, ppot: f64) -> ExternalModel {
        let geometry = ImageGeometry::axis_aligned([4, 4, 4], [2.0, 2.0, 2.0]).unwrap();
        let forward = forward();
        let n_volumes = forward.n_volumes();
        let signal = forward.k() * sh::delta(&Vector3::x(), forward.lmax()) * 0.5;

        let mut dwi = Volume::filled(geometry.clone(), n_volumes, 0.0);
        dwi.at_mut([1, 1, 1]).copy_from_slice(signal.as_slice());
        dwi.at_mut([3, 3, 3])[0] = f64::NAN;

        let domain = SamplingDomain::whole_image(geometry);
        ExternalModel::new(dwi, &domain, forward, &config(interpolation, ppot)).unwrap()
    }

    #[test]
    fn adding_the_true_particle_lowers_the_energy_to_zero() {
        let model = model(Interpolation::Trilinear, 0.0);
        let stats = Stats::new(0.5, 0.5, 10, 1);
        let before = model.total_energy(0);
        assert!(before > 0.0);

        let mut energy = ExternalEnergy::new(&model, &stats);
        let scaled = energy.stage_add(&Vector3::new(2.0, 2.0, 2.0), &Vector3::x());
        assert!((scaled * 0.5 + before).abs() < 1e-9, "scaled = {}", scaled);

        energy.accept_changes();
        assert!(model.total_energy(1).abs() < 1e-9);
        assert!((stats.external_energy() + before).abs() < 1e-9);
    }

    #[test]
    fn cleared_changes_leave_the_accumulators_untouched() {
        let model = model(Interpolation::Trilinear, 0.0);
        let stats = Stats::new(0.5, 0.5, 10, 1);
        let before = model.total_energy(0);

        let mut energy = ExternalEnergy::new(&model, &stats);
        energy.stage_add(&Vector3::new(2.0, 2.0, 2.0), &Vector3::x());
        energy.clear_changes();
        assert_eq!(model.total_energy(0), before);
        assert_eq!(stats.external_energy(), 0.0);
    }

    #[test]
    fn add_then_remove_restores_the_fit() {
        let model = model(Interpolation::Hanning { width: 1.5 }, 0.2);
        let stats = Stats::new(0.5, 0.5, 10, 1);
        let before = model.total_energy(0);
        let mut energy = ExternalEnergy::new(&model, &stats);

        let pos = Vector3::new(3.1, 2.4, 1.7);
        let dir = Vector3::new(0.3, 0.9, -0.2).normalize();
        energy.stage_add(&pos, &dir);
        energy.accept_changes();
        let particle = Particle::new(pos, dir);
        energy.stage_remove(ParticleId::default(), &particle);
        energy.accept_changes();

        assert!((model.total_energy(0) - before).abs() < 1e-9);
        assert!(stats.external_energy().abs() < 1e-9);
    }

    #[test]
    fn particle_potential_is_charged_per_particle() {
        let stats = Stats::new(1.0, 1.0, 10, 1);
        let plain = model(Interpolation::Trilinear, 0.0);
        let charged = model(Interpolation::Trilinear, 0.3);
        // Footprint lies only on empty voxels.
        let pos = Vector3::new(4.0, 0.0, 0.0);

        let without = ExternalEnergy::new(&plain, &stats).stage_add(&pos, &Vector3::z());
        let with = ExternalEnergy::new(&charged, &stats).stage_add(&pos, &Vector3::z());
        assert!(without > 0.0);
        assert!((with - without - 0.3).abs() < 1e-9);
    }

    #[test]
    fn footprint_weights_sum_to_one_away_from_invalid_voxels() {
        for interpolation in [Interpolation::Trilinear, Interpolation::Hanning { width: 1.2 }] {
            let model = model(interpolation, 0.0);
            let fp = model.footprint(&Vector3::new(2.7, 3.3, 2.2));
            let total: f64 = fp.iter().map(|(_, w)| w).sum();
            assert!((total - 1.0).abs() < 1e-12, "{:?}: {}", interpolation, total);
        }
    }

    #[test]
    fn non_finite_voxels_are_excluded() {
        let model = model(Interpolation::Trilinear, 0.0);
        let nan_voxel = model.geometry().linear_index([3, 3, 3]);
        assert!(!model.valid[nan_voxel]);
        let fp = model.footprint(&Vector3::new(6.0, 6.0, 6.0));
        assert!(fp.iter().all(|&(v, _)| v != nan_voxel));
        assert!(model.total_energy(0).is_finite());
    }

    #[test]
    fn concurrent_commits_sharing_a_voxel_match_sequential_commits() {
        let interpolation = Interpolation::Hanning { width: 1.5 };
        let a = (Vector3::new(3.1, 2.0, 2.0), Vector3::x());
        let b = (Vector3::new(8.2, 2.0, 2.0), Vector3::new(0.2, 0.9, 0.1).normalize());

        // Both regions can be held at once, yet both footprints cover voxel (3, 1, 1).
        let lock = SpatialLock::with_range(5.0);
        let _first_region = lock.try_lock(&a.0).unwrap();
        let _second_region = lock.try_lock(&b.0).unwrap();
        let shared = model(interpolation, 0.0);
        let voxel = shared.geometry().linear_index([3, 1, 1]);
        assert!(shared.footprint(&a.0).iter().any(|&(v, _)| v == voxel));
        assert!(shared.footprint(&b.0).iter().any(|&(v, _)| v == voxel));

        let concurrent_stats = Stats::new(0.5, 0.5, 10, 1);
        let mut first = ExternalEnergy::new(&shared, &concurrent_stats);
        let mut second = ExternalEnergy::new(&shared, &concurrent_stats);
        first.stage_add(&a.0, &a.1);
        second.stage_add(&b.0, &b.1);
        first.accept_changes();
        second.accept_changes();
        drop(second);
        drop(first);

        let sequential = model(interpolation, 0.0);
        let sequential_stats = Stats::new(0.5, 0.5, 10, 1);
        let mut energy = ExternalEnergy::new(&sequential, &sequential_stats);
        energy.stage_add(&a.0, &a.1);
        energy.accept_changes();
        energy.stage_add(&b.0, &b.1);
        energy.accept_changes();
        drop(energy);

        let initial = model(interpolation, 0.0).total_energy(0);
        let concurrent_total = shared.total_energy(2);
        assert!((concurrent_total - sequential.total_energy(2)).abs() < 1e-12);
        assert!(
            (concurrent_stats.external_energy() - sequential_stats.external_energy()).abs() < 1e-12
        );
        assert!((concurrent_stats.external_energy() - (concurrent_total - initial)).abs() < 1e-12);

        let concurrent = shared.into_outputs().unwrap();
        let sequential = sequential.into_outputs().unwrap();
        for (x, y) in concurrent.residual.data().iter().zip(sequential.residual.data()) {
            assert!((x - y).abs() < 1e-12, "committed residuals diverge: {} vs {}", x, y);
        }
        for (x, y) in concurrent.fractions.data().iter().zip(sequential.fractions.data()) {
            assert!((x - y).abs() < 1e-12);
        }
    }

    #[test]
    fn outputs_have_the_model_layout() {
        let model = model(Interpolation::Trilinear, 0.0);
        let stats = Stats::new(0.5, 0.5, 10, 1);
        let mut energy = ExternalEnergy::new(&model, &stats);
        energy.stage_add(&Vector3::new(2.0, 2.0, 2.0), &Vector3::x());
        energy.accept_changes();
        drop(energy);

        let outputs = model.into_outputs().unwrap();
        assert_eq!(outputs.tod.components(), 6);
        assert_eq!(outputs.fractions.components(), 1);
        assert_eq!(outputs.residual.components(), 1);
        assert!(outputs.tod.at([1, 1, 1])[0] > 0.0);
    }
}
