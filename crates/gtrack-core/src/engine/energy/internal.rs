use super::EnergyComputer;
use crate::core::models::ids::ParticleId;
use crate::core::models::particle::{End, Particle, ParticleEnd};
use crate::engine::grid::ParticleGrid;
use crate::engine::stats::Stats;
use crate::engine::utils::sampling::boltzmann_sample;
use itertools::iproduct;
use nalgebra::Vector3;
use rand::RngCore;
use std::f64::consts::FRAC_1_SQRT_2;
use tracing::{trace, warn};

/// Cosine of the largest angle at which two ends may be joined.
const MAX_CONNECTION_COS: f64 = FRAC_1_SQRT_2;

/// Connectivity prior.
///
/// A link between end `e1` of a particle at `x1` and end `e2` of a particle at `x2` costs
/// `(|e1 - m|^2 + |e2 - m|^2) / L^2 - cpot` with `m = (x1 + x2) / 2`; two perfectly
/// aligned, touching particles therefore earn `-cpot`.
pub struct InternalEnergy<'a> {
    grid: &'a ParticleGrid,
    stats: &'a Stats,
    length: f64,
    cpot: f64,
    delta: f64,
}

impl<'a> InternalEnergy<'a> {
    pub fn new(grid: &'a ParticleGrid, stats: &'a Stats, connection_potential: f64) -> Self {
        Self {
            grid,
            stats,
            length: grid.particle_length(),
            cpot: connection_potential,
            delta: 0.0,
        }
    }

    /// Energy of linking end `ea` of `a` to end `eb` of `b`.
    pub fn link_energy(&self, a: &Particle, ea: End, b: &Particle, eb: End) -> f64 {
        let m = (a.pos + b.pos) * 0.5;
        let d1 = (a.end_point(ea, self.length) - m).norm_squared();
        let d2 = (b.end_point(eb, self.length) - m).norm_squared();
        (d1 + d2) / (self.length * self.length) - self.cpot
    }

    /// Energy of the existing link at `end` of `p`, or `None` if that end is free.
    fn existing_link(&self, id: ParticleId, p: &Particle, end: End) -> Option<f64> {
        let other_id = p.link(end)?;
        let other = self.grid.get(other_id)?;
        let other_end = other.end_linked_to(id)?;
        Some(self.link_energy(p, end, &other, other_end))
    }

    fn links_energy(&self, id: ParticleId, p: &Particle) -> f64 {
        End::BOTH
            .iter()
            .filter_map(|&end| self.existing_link(id, p, end))
            .sum()
    }

    /// Every end within one particle length of `end` that points roughly the other way.
    fn candidates(&self, id: ParticleId, p: &Particle, end: End) -> Vec<(ParticleEnd, Particle)> {
        let point = p.end_point(end, self.length);
        // The end may stick out of the grid while its neighbours do not.
        let [cx, cy, cz] = self.grid.cell_unchecked(&point);

        let mut out = Vec::new();
        for (dx, dy, dz) in iproduct!(-1..=1, -1..=1, -1..=1) {
            let Some(ids) = self.grid.neighbours([cx + dx, cy + dy, cz + dz]) else {
                continue;
            };
            for other_id in ids {
                if other_id == id || p.end_linked_to(other_id).is_some_and(|e| e != end) {
                    continue;
                }
                let Some(other) = self.grid.get(other_id) else {
                    continue;
                };
                for other_end in End::BOTH {
                    let distance = (other.end_point(other_end, self.length) - point).norm();
                    let alignment = -end.sign() * other_end.sign() * p.dir.dot(&other.dir);
                    if distance < self.length && alignment > MAX_CONNECTION_COS {
                        out.push((ParticleEnd::new(other_id, other_end), other));
                    }
                }
            }
        }
        out
    }
}

impl EnergyComputer for InternalEnergy<'_> {
    fn stage_add(&mut self, _pos: &Vector3<f64>, _dir: &Vector3<f64>) -> f64 {
        self.delta = 0.0;
        0.0
    }

    fn stage_shift(
        &mut self,
        particle: ParticleId,
        current: &Particle,
        pos: &Vector3<f64>,
        dir: &Vector3<f64>,
    ) -> f64 {
        let mut moved = *current;
        moved.pos = *pos;
        moved.dir = dir.normalize();
        self.delta = self.links_energy(particle, &moved) - self.links_energy(particle, current);
        self.delta / self.stats.temperature()
    }

    fn stage_remove(&mut self, particle: ParticleId, current: &Particle) -> f64 {
        self.delta = -self.links_energy(particle, current);
        self.delta / self.stats.temperature()
    }

    fn stage_connect(
        &mut self,
        end: &ParticleEnd,
        rng: &mut dyn RngCore,
        target: &mut Option<ParticleEnd>,
    ) -> f64 {
        self.delta = 0.0;
        *target = None;
        let Some(p) = self.grid.get(end.particle) else {
            return 0.0;
        };
        let temperature = self.stats.temperature();

        let mut options = self.candidates(end.particle, &p, end.end);
        for (option, other) in options.iter_mut() {
            option.energy = self.link_energy(&p, end.end, other, option.end);
            option.weight = (-option.energy / temperature).exp();
        }

        // The free option has zero energy and therefore unit weight.
        let mut energies: Vec<f64> = options.iter().map(|(o, _)| o.energy).collect();
        energies.push(0.0);
        let choice = match boltzmann_sample(&energies, temperature, rng) {
            Ok(i) => i,
            Err(e) => {
                warn!("Connection draw failed, keeping the end free: {}", e);
                energies.len() - 1
            }
        };

        let current = p.link(end.end);
        let severed_own = self.existing_link(end.particle, &p, end.end).unwrap_or(0.0);
        self.delta = match options.get(choice) {
            Some((option, other)) => {
                *target = Some(*option);
                if current == Some(option.particle) && other.link(option.end) == Some(end.particle) {
                    0.0
                } else {
                    let severed_other = other
                        .link(option.end)
                        .filter(|&l| l != end.particle)
                        .and_then(|_| self.existing_link(option.particle, other, option.end))
                        .unwrap_or(0.0);
                    option.energy - severed_own - severed_other
                }
            }
            None => -severed_own,
        };
        trace!(
            candidates = options.len(),
            linked = target.is_some(),
            delta = self.delta,
            "Staged connection."
        );
        self.delta / temperature
    }

    fn accept_changes(&mut self) {
        self.stats.add_internal(self.delta);
        self.delta = 0.0;
    }

    fn clear_changes(&mut self) {
        self.delta = 0.0;
    }

    fn fork(&self) -> Box<dyn EnergyComputer + '_> {
        Box::new(InternalEnergy {
            grid: self.grid,
            stats: self.stats,
            length: self.length,
            cpot: self.cpot,
            delta: 0.0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::image::geometry::ImageGeometry;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn setup() -> (ParticleGrid, Stats) {
        let geometry = ImageGeometry::axis_aligned([10, 10, 10], [2.0, 2.0, 2.0]).unwrap();
        (ParticleGrid::new(&geometry, 1.0), Stats::new(0.1, 0.1, 10, 1))
    }

    #[test]
    fn touching_aligned_particles_earn_the_connection_potential() {
        let (grid, stats) = setup();
        let energy = InternalEnergy::new(&grid, &stats, 0.5);
        let a = Particle::new(Vector3::new(0.0, 0.0, 0.0), Vector3::x());
        let b = Particle::new(Vector3::new(2.0, 0.0, 0.0), Vector3::x());
        assert!((energy.link_energy(&a, End::Head, &b, End::Tail) + 0.5).abs() < 1e-12);
        // Joining the far ends is much worse.
        assert!(energy.link_energy(&a, End::Tail, &b, End::Head) > 1.0);
    }

    #[test]
    fn shift_and_remove_price_existing_links_only() {
        let (grid, stats) = setup();
        let mut energy = InternalEnergy::new(&grid, &stats, 1.0);
        let a = grid.add(Vector3::new(5.0, 5.0, 5.0), Vector3::x());
        let b = grid.add(Vector3::new(7.0, 5.0, 5.0), Vector3::x());
        let lonely = grid.add(Vector3::new(15.0, 15.0, 15.0), Vector3::x());
        grid.connect(&ParticleEnd::new(a, End::Head), &ParticleEnd::new(b, End::Tail));

        let pa = grid.get(a).unwrap();
        let removed = energy.stage_remove(a, &pa) * stats.temperature();
        assert!((removed - 1.0).abs() < 1e-12);
        energy.clear_changes();

        // Moving `a` back by 0.2 stretches the link.
        let shifted = energy.stage_shift(a, &pa, &Vector3::new(4.8, 5.0, 5.0), &Vector3::x());
        assert!(shifted > 0.0);
        energy.clear_changes();

        let pl = grid.get(lonely).unwrap();
        assert_eq!(energy.stage_remove(lonely, &pl), 0.0);
        assert_eq!(
            energy.stage_shift(lonely, &pl, &Vector3::new(1.0, 1.0, 1.0), &Vector3::y()),
            0.0
        );
        assert_eq!(energy.stage_add(&Vector3::zeros(), &Vector3::z()), 0.0);
    }

    #[test]
    fn connect_prefers_a_well_aligned_neighbour_at_low_temperature() {
        let (grid, _) = setup();
        let stats = Stats::new(0.01, 0.01, 10, 1);
        let mut energy = InternalEnergy::new(&grid, &stats, 1.0);
        let a = grid.add(Vector3::new(5.0, 5.0, 5.0), Vector3::x());
        let b = grid.add(Vector3::new(7.0, 5.0, 5.0), Vector3::x());
        // Perpendicular particle near the head: filtered out by the angle test.
        grid.add(Vector3::new(6.0, 5.5, 5.0), Vector3::y());

        let mut rng = StdRng::seed_from_u64(4);
        let mut target = None;
        let scaled = energy.stage_connect(&ParticleEnd::new(a, End::Head), &mut rng, &mut target);
        let chosen = target.unwrap();
        assert_eq!((chosen.particle, chosen.end), (b, End::Tail));
        assert!((scaled * stats.temperature() + 1.0).abs() < 1e-9);

        energy.accept_changes();
        assert!((stats.internal_energy() + 1.0).abs() < 1e-9);
    }

    #[test]
    fn ends_outside_the_grid_still_reach_neighbours_inside_it() {
        let (grid, _) = setup();
        let stats = Stats::new(0.01, 0.01, 10, 1);
        let mut energy = InternalEnergy::new(&grid, &stats, 1.0);
        let half_root3 = 3f64.sqrt() / 2.0;
        let a = grid.add(Vector3::new(-0.7, 5.0, 5.0), Vector3::new(-0.5, half_root3, 0.0));
        let b = grid.add(Vector3::new(-0.8, 6.0 + half_root3, 5.0), Vector3::y());
        let head = grid.get(a).unwrap().end_point(End::Head, 1.0);
        assert!(grid.cell_of(&head).is_none());

        let mut rng = StdRng::seed_from_u64(2);
        let mut target = None;
        energy.stage_connect(&ParticleEnd::new(a, End::Head), &mut rng, &mut target);
        assert_eq!(target.map(|t| (t.particle, t.end)), Some((b, End::Tail)));
    }

    #[test]
    fn connect_without_candidates_keeps_the_end_free() {
        let (grid, stats) = setup();
        let mut energy = InternalEnergy::new(&grid, &stats, 1.0);
        let a = grid.add(Vector3::new(5.0, 5.0, 5.0), Vector3::x());
        let mut rng = StdRng::seed_from_u64(0);
        let mut target = Some(ParticleEnd::new(a, End::Tail));
        let delta = energy.stage_connect(&ParticleEnd::new(a, End::Head), &mut rng, &mut target);
        assert!(target.is_none());
        assert_eq!(delta, 0.0);
    }

    #[test]
    fn choosing_the_free_option_releases_the_existing_link() {
        let (grid, _) = setup();
        // High temperature and a large positive link energy make "free" nearly certain.
        let stats = Stats::new(1.0, 1.0, 10, 1);
        let mut energy = InternalEnergy::new(&grid, &stats, -20.0);
        let a = grid.add(Vector3::new(5.0, 5.0, 5.0), Vector3::x());
        let b = grid.add(Vector3::new(7.0, 5.0, 5.0), Vector3::x());
        grid.connect(&ParticleEnd::new(a, End::Head), &ParticleEnd::new(b, End::Tail));

        let mut rng = StdRng::seed_from_u64(8);
        let mut target = None;
        let delta = energy.stage_connect(&ParticleEnd::new(a, End::Head), &mut rng, &mut target);
        assert!(target.is_none());
        assert!((delta + 20.0).abs() < 1e-9);
    }

    #[test]
    fn fork_starts_with_an_empty_buffer() {
        let (grid, stats) = setup();
        let energy = InternalEnergy::new(&grid, &stats, 1.0);
        let mut forked = energy.fork();
        forked.accept_changes();
        assert_eq!(stats.internal_energy(), 0.0);
    }
}
