use super::config::{MoveKind, SamplerConfig};
use super::energy::EnergyComputer;
use super::grid::ParticleGrid;
use super::progress::{Progress, ProgressReporter};
use super::spatial_lock::{SPATIAL_LOCK_RANGE, SpatialLock, SpatialLockGuard};
use super::stats::{Stats, Step};
use crate::core::image::domain::SamplingDomain;
use crate::core::models::ids::ParticleId;
use crate::core::models::particle::{End, Particle, ParticleEnd};
use crate::core::utils::geometry::{perturb_direction, random_direction, random_normal};
use nalgebra::Vector3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::trace;

/// Attempts at winning a spatial lock before a move is given up.
const MAX_LOCK_ATTEMPTS: usize = 1000;

#[derive(Clone, Copy)]
pub struct SharedState<'a> {
    pub config: &'a SamplerConfig,
    pub domain: &'a SamplingDomain,
    pub grid: &'a ParticleGrid,
    pub lock: &'a SpatialLock,
    pub stats: &'a Stats,
}

impl<'a> SharedState<'a> {
    pub fn lock_for(config: &SamplerConfig) -> SpatialLock {
        SpatialLock::with_range(SPATIAL_LOCK_RANGE * config.particle_length)
    }
}

/// The Metropolis-Hastings proposal loop run by one worker.
///
/// Each iteration selects one of birth, death, random shift, optimal shift and connect,
/// stages it on the worker's own energy computer and commits or discards it. Moves whose
/// preconditions are not met (no particles, no linked neighbour, lock not won) are no-ops.
pub struct MhSampler<'a> {
    shared: SharedState<'a>,
    energy: Box<dyn EnergyComputer + 'a>,
    rng: StdRng,
    /// Expected particle count of the Poisson prior.
    expected_count: f64,
}

impl<'a> MhSampler<'a> {
    pub fn new(shared: SharedState<'a>, energy: Box<dyn EnergyComputer + 'a>, seed: u64) -> Self {
        Self {
            expected_count: shared.config.density * shared.domain.volume(),
            shared,
            energy,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn run(&mut self, reporter: &ProgressReporter) {
        loop {
            match self.shared.stats.next() {
                Step::Done => break,
                Step::Run => self.step(),
                Step::RunAfterUpdate(snapshot) => {
                    reporter.report(Progress::Annealed {
                        temperature: snapshot.temperature,
                        particles: self.shared.grid.len(),
                        acceptance: snapshot.overall_acceptance_rate(),
                    });
                    self.step();
                }
            }
        }
    }

    pub fn step(&mut self) {
        let u: f64 = self.rng.r#gen();
        match self.shared.config.proposals.select(u) {
            MoveKind::Birth => self.birth(),
            MoveKind::Death => self.death(),
            MoveKind::RandShift => self.rand_shift(),
            MoveKind::OptShift => self.opt_shift(),
            MoveKind::Connect => self.connect(),
        }
    }

    pub fn birth(&mut self) {
        let SharedState {
            config,
            domain,
            grid,
            lock,
            stats,
        } = self.shared;
        stats.inc_generated(MoveKind::Birth);

        let mut claimed = None;
        for _ in 0..MAX_LOCK_ATTEMPTS {
            let pos = domain.random_position(&mut self.rng);
            if let Some(guard) = lock.try_lock(&pos) {
                claimed = Some((pos, guard));
                break;
            }
        }
        let Some((pos, _guard)) = claimed else {
            trace!("Birth abandoned: no free region found.");
            return;
        };

        let dir = random_direction(&mut self.rng);
        let de = self.energy.stage_add(&pos, &dir);
        let n = grid.len() as f64;
        let ratio = (-de).exp() * self.expected_count / (n + 1.0) * config.proposals.death
            / config.proposals.birth;
        if self.accept(ratio) {
            grid.add(pos, dir);
            self.energy.accept_changes();
            stats.inc_accepted(MoveKind::Birth);
        } else {
            self.energy.clear_changes();
        }
    }

    pub fn death(&mut self) {
        let SharedState {
            config,
            grid,
            stats,
            ..
        } = self.shared;
        let Some((id, p)) = self.pick() else {
            return;
        };
        // Only free particles can die; other picks leave no trace in the counters.
        if p.has_links() {
            return;
        }
        stats.inc_generated(MoveKind::Death);
        let Some((p, _guard)) = self.lock_particle(id, &p) else {
            return;
        };
        if p.has_links() {
            return;
        }

        let de = self.energy.stage_remove(id, &p);
        let n = grid.len() as f64;
        let ratio = (-de).exp() * n / self.expected_count * config.proposals.birth
            / config.proposals.death;
        if self.accept(ratio) {
            grid.remove(id);
            self.energy.accept_changes();
            stats.inc_accepted(MoveKind::Death);
        } else {
            self.energy.clear_changes();
        }
    }

    pub fn rand_shift(&mut self) {
        let SharedState {
            config,
            domain,
            stats,
            ..
        } = self.shared;
        stats.inc_generated(MoveKind::RandShift);
        let Some((id, p)) = self.pick() else {
            return;
        };
        let Some((p, _guard)) = self.lock_particle(id, &p) else {
            return;
        };

        let pos = p.pos + random_normal(&mut self.rng) * config.sigma_position;
        let dir = perturb_direction(&mut self.rng, &p.dir, config.sigma_direction);
        if !domain.contains(&pos) || !dir.iter().all(|c| c.is_finite()) {
            return;
        }
        let de = self.energy.stage_shift(id, &p, &pos, &dir);
        self.finish_shift(MoveKind::RandShift, id, pos, dir, (-de).exp());
    }

    pub fn opt_shift(&mut self) {
        let SharedState {
            config,
            domain,
            stats,
            ..
        } = self.shared;
        stats.inc_generated(MoveKind::OptShift);
        let Some((id, p)) = self.pick() else {
            return;
        };
        let Some((p, _guard)) = self.lock_particle(id, &p) else {
            return;
        };
        let Some((pos, dir)) = self.optimal_pose(id, &p) else {
            return;
        };
        if !domain.contains(&pos) {
            return;
        }

        let de = self.energy.stage_shift(id, &p, &pos, &dir);
        let q = shift_kernel(&(pos - p.pos), &p.dir, &dir, config);
        let p_rand = config.proposals.rand_shift;
        let p_opt = config.proposals.opt_shift;
        let correction = p_rand * q / (p_rand * q + p_opt);
        self.finish_shift(MoveKind::OptShift, id, pos, dir, (-de).exp() * correction);
    }

    pub fn connect(&mut self) {
        let stats = self.shared.stats;
        stats.inc_generated(MoveKind::Connect);
        let Some((id, p)) = self.pick() else {
            return;
        };
        let Some((_, _guard)) = self.lock_particle(id, &p) else {
            return;
        };

        let end = if self.rng.gen_bool(0.5) {
            End::Head
        } else {
            End::Tail
        };
        let from = ParticleEnd::new(id, end);
        let mut target = None;
        let de = self.energy.stage_connect(&from, &mut self.rng, &mut target);
        if self.accept((-de).exp()) {
            match target {
                Some(to) => {
                    self.shared.grid.connect(&from, &to);
                }
                None => {
                    self.shared.grid.disconnect(id, end);
                }
            }
            self.energy.accept_changes();
            stats.inc_accepted(MoveKind::Connect);
        } else {
            self.energy.clear_changes();
        }
    }

    fn finish_shift(
        &mut self,
        kind: MoveKind,
        id: ParticleId,
        pos: Vector3<f64>,
        dir: Vector3<f64>,
        ratio: f64,
    ) {
        if self.accept(ratio) {
            self.shared.grid.shift(id, pos, dir);
            self.energy.accept_changes();
            self.shared.stats.inc_accepted(kind);
        } else {
            self.energy.clear_changes();
        }
    }

    /// Pose that joins the particle seamlessly to its linked neighbours.
    ///
    /// With two neighbours the particle spans the gap between their ends; with one it
    /// continues that neighbour straight on. `None` if the particle is unlinked.
    pub fn optimal_pose(&self, id: ParticleId, p: &Particle) -> Option<(Vector3<f64>, Vector3<f64>)> {
        let length = self.shared.config.particle_length;
        let neighbour = |link: Option<ParticleId>| {
            let q = self.shared.grid.get(link?)?;
            let end = q.end_linked_to(id)?;
            Some((q, end))
        };

        match (neighbour(p.predecessor), neighbour(p.successor)) {
            (Some((q, qe)), Some((s, se))) => {
                let tail = q.end_point(qe, length);
                let head = s.end_point(se, length);
                let span = head - tail;
                let dir = if span.norm() > f64::EPSILON {
                    span.normalize()
                } else {
                    p.dir
                };
                Some(((tail + head) * 0.5, dir))
            }
            (Some((q, qe)), None) => {
                let a = qe.sign();
                Some((q.pos + q.dir * (2.0 * a * length), q.dir * a))
            }
            (None, Some((s, se))) => {
                let a = se.sign();
                Some((s.pos + s.dir * (2.0 * a * length), -s.dir * a))
            }
            (None, None) => None,
        }
    }

    fn pick(&mut self) -> Option<(ParticleId, Particle)> {
        let id = self.shared.grid.random(&mut self.rng)?;
        let p = self.shared.grid.get(id)?;
        Some((id, p))
    }

    /// Locks the neighbourhood of a particle and re-reads it.
    ///
    /// Returns `None` if the lock could not be won or the particle died or moved while
    /// waiting for it.
    fn lock_particle(
        &self,
        id: ParticleId,
        seen: &Particle,
    ) -> Option<(Particle, SpatialLockGuard<'a>)> {
        let lock: &'a SpatialLock = self.shared.lock;
        let guard = (0..MAX_LOCK_ATTEMPTS).find_map(|_| lock.try_lock(&seen.pos))?;
        let current = self.shared.grid.get(id)?;
        (current.pos == seen.pos).then_some((current, guard))
    }

    fn accept(&mut self, ratio: f64) -> bool {
        ratio >= 1.0 || self.rng.r#gen::<f64>() < ratio
    }
}

/// Density of the random-shift proposal moving a particle by `dpos` and turning it from
/// `from` to `to`, relative to the density of staying put.
///
/// See [`perturb_direction`] for the direction density. Turns of a right angle or more
/// cannot be proposed and get zero.
pub fn shift_kernel(
    dpos: &Vector3<f64>,
    from: &Vector3<f64>,
    to: &Vector3<f64>,
    config: &SamplerConfig,
) -> f64 {
    let gaussian = |d2: f64, sigma: f64| {
        if sigma > 0.0 {
            (-d2 / (2.0 * sigma * sigma)).exp()
        } else if d2 > 0.0 {
            0.0
        } else {
            1.0
        }
    };
    let cos = from.dot(to).min(1.0);
    if cos <= 0.0 {
        return 0.0;
    }
    let tan2 = (1.0 - cos * cos) / (cos * cos);
    gaussian(dpos.norm_squared(), config.sigma_position)
        * gaussian(tan2, config.sigma_direction)
        / cos.powi(3)
}
