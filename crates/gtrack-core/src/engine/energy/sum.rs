use super::EnergyComputer;
use crate::core::models::ids::ParticleId;
use crate::core::models::particle::{Particle, ParticleEnd};
use nalgebra::Vector3;
use rand::RngCore;

pub struct EnergySum<'a> {
    first: Box<dyn EnergyComputer + 'a>,
    lambda1: f64,
    second: Box<dyn EnergyComputer + 'a>,
    lambda2: f64,
}

impl<'a> EnergySum<'a> {
    pub fn new(
        first: Box<dyn EnergyComputer + 'a>,
        lambda1: f64,
        second: Box<dyn EnergyComputer + 'a>,
        lambda2: f64,
    ) -> Self {
        Self {
            first,
            lambda1,
            second,
            lambda2,
        }
    }
}

impl EnergyComputer for EnergySum<'_> {
    fn stage_add(&mut self, pos: &Vector3<f64>, dir: &Vector3<f64>) -> f64 {
        self.lambda1 * self.first.stage_add(pos, dir) + self.lambda2 * self.second.stage_add(pos, dir)
    }

    fn stage_shift(
        &mut self,
        particle: ParticleId,
        current: &Particle,
        pos: &Vector3<f64>,
        dir: &Vector3<f64>,
    ) -> f64 {
        self.lambda1 * self.first.stage_shift(particle, current, pos, dir)
            + self.lambda2 * self.second.stage_shift(particle, current, pos, dir)
    }

    fn stage_remove(&mut self, particle: ParticleId, current: &Particle) -> f64 {
        self.lambda1 * self.first.stage_remove(particle, current)
            + self.lambda2 * self.second.stage_remove(particle, current)
    }

    fn stage_connect(
        &mut self,
        end: &ParticleEnd,
        rng: &mut dyn RngCore,
        target: &mut Option<ParticleEnd>,
    ) -> f64 {
        self.lambda1 * self.first.stage_connect(end, rng, target)
            + self.lambda2 * self.second.stage_connect(end, rng, target)
    }

    fn accept_changes(&mut self) {
        self.first.accept_changes();
        self.second.accept_changes();
    }

    fn clear_changes(&mut self) {
        self.first.clear_changes();
        self.second.clear_changes();
    }

    fn fork(&self) -> Box<dyn EnergyComputer + '_> {
        Box::new(EnergySum::new(
            self.first.fork(),
            self.lambda1,
            self.second.fork(),
            self.lambda2,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fixed {
        value: f64,
        accepted: Arc<AtomicUsize>,
        cleared: Arc<AtomicUsize>,
    }

    impl Fixed {
        fn boxed(value: f64) -> (Box<Self>, Arc<AtomicUsize>, Arc<AtomicUsize>) {
            let accepted = Arc::new(AtomicUsize::new(0));
            let cleared = Arc::new(AtomicUsize::new(0));
            let computer = Box::new(Self {
                value,
                accepted: Arc::clone(&accepted),
                cleared: Arc::clone(&cleared),
            });
            (computer, accepted, cleared)
        }
    }

    impl EnergyComputer for Fixed {
        fn stage_add(&mut self, _: &Vector3<f64>, _: &Vector3<f64>) -> f64 {
            self.value
        }
        fn stage_shift(&mut self, _: ParticleId, _: &Particle, _: &Vector3<f64>, _: &Vector3<f64>) -> f64 {
            2.0 * self.value
        }
        fn stage_remove(&mut self, _: ParticleId, _: &Particle) -> f64 {
            -self.value
        }
        fn stage_connect(
            &mut self,
            end: &ParticleEnd,
            _: &mut dyn RngCore,
            target: &mut Option<ParticleEnd>,
        ) -> f64 {
            if self.value > 0.0 {
                *target = Some(*end);
            }
            self.value
        }
        fn accept_changes(&mut self) {
            self.accepted.fetch_add(1, Ordering::SeqCst);
        }
        fn clear_changes(&mut self) {
            self.cleared.fetch_add(1, Ordering::SeqCst);
        }
        fn fork(&self) -> Box<dyn EnergyComputer + '_> {
            Box::new(Fixed {
                value: self.value,
                accepted: Arc::clone(&self.accepted),
                cleared: Arc::clone(&self.cleared),
            })
        }
    }

    #[test]
    fn every_stage_returns_the_weighted_sum() {
        let (a, _, _) = Fixed::boxed(2.0);
        let (b, _, _) = Fixed::boxed(5.0);
        let mut sum = EnergySum::new(a, 0.5, b, 3.0);
        let p = Particle::new(Vector3::zeros(), Vector3::x());
        let id = ParticleId::default();

        assert_eq!(sum.stage_add(&p.pos, &p.dir), 16.0);
        assert_eq!(sum.stage_shift(id, &p, &p.pos, &p.dir), 32.0);
        assert_eq!(sum.stage_remove(id, &p), -16.0);

        let mut rng = rand::rngs::mock::StepRng::new(0, 1);
        let mut target = None;
        let end = ParticleEnd::new(id, crate::core::models::particle::End::Head);
        assert_eq!(sum.stage_connect(&end, &mut rng, &mut target), 16.0);
        assert_eq!(target, Some(end));
    }

    #[test]
    fn accept_and_clear_reach_both_children() {
        let (a, acc_a, clr_a) = Fixed::boxed(1.0);
        let (b, acc_b, clr_b) = Fixed::boxed(1.0);
        let mut sum = EnergySum::new(a, 1.0, b, 1.0);
        sum.accept_changes();
        sum.clear_changes();
        sum.clear_changes();
        assert_eq!(acc_a.load(Ordering::SeqCst), 1);
        assert_eq!(acc_b.load(Ordering::SeqCst), 1);
        assert_eq!(clr_a.load(Ordering::SeqCst), 2);
        assert_eq!(clr_b.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn forks_keep_the_weights() {
        let (a, _, _) = Fixed::boxed(1.0);
        let (b, _, _) = Fixed::boxed(-4.0);
        let sum = EnergySum::new(a, 2.0, b, 0.25);
        let mut forked = sum.fork();
        assert_eq!(forked.stage_add(&Vector3::zeros(), &Vector3::z()), 1.0);
    }
}
