use crate::core::models::ids::ParticleId;
use crate::core::models::particle::{End, Particle, ParticleEnd};
use nalgebra::Vector3;
use parking_lot::Mutex;
use rand::Rng;
use slotmap::{SecondaryMap, SlotMap};

#[derive(Debug, Default)]
struct PoolInner {
    particles: SlotMap<ParticleId, Particle>,
    live: Vec<ParticleId>,
    slot: SecondaryMap<ParticleId, usize>,
}

impl PoolInner {
    fn sever(&mut self, id: ParticleId, end: End) -> Option<ParticleId> {
        let other = self.particles.get_mut(id)?.link(end)?;
        if let Some(p) = self.particles.get_mut(id) {
            p.set_link(end, None);
        }
        if let Some(q) = self.particles.get_mut(other) {
            if let Some(back) = q.end_linked_to(id) {
                q.set_link(back, None);
            }
        }
        Some(other)
    }
}

#[derive(Debug, Default)]
pub struct ParticlePool {
    inner: Mutex<PoolInner>,
}

impl ParticlePool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self, pos: Vector3<f64>, dir: Vector3<f64>) -> ParticleId {
        let mut inner = self.inner.lock();
        let id = inner.particles.insert(Particle::new(pos, dir));
        let index = inner.live.len();
        inner.live.push(id);
        inner.slot.insert(id, index);
        id
    }

    pub fn destroy(&self, id: ParticleId) -> Option<Particle> {
        let mut inner = self.inner.lock();
        for end in End::BOTH {
            inner.sever(id, end);
        }
        let particle = inner.particles.remove(id)?;
        if let Some(index) = inner.slot.remove(id) {
            inner.live.swap_remove(index);
            if let Some(&moved) = inner.live.get(index) {
                inner.slot.insert(moved, index);
            }
        }
        Some(particle)
    }

    pub fn get(&self, id: ParticleId) -> Option<Particle> {
        self.inner.lock().particles.get(id).copied()
    }

    pub fn contains(&self, id: ParticleId) -> bool {
        self.inner.lock().particles.contains_key(id)
    }

    pub fn set_pose(&self, id: ParticleId, pos: Vector3<f64>, dir: Vector3<f64>) -> bool {
        match self.inner.lock().particles.get_mut(id) {
            Some(p) => {
                p.pos = pos;
                p.dir = dir.normalize();
                true
            }
            None => false,
        }
    }

    pub fn connect(&self, a: &ParticleEnd, b: &ParticleEnd) -> bool {
        let mut inner = self.inner.lock();
        if a.particle == b.particle
            || !inner.particles.contains_key(a.particle)
            || !inner.particles.contains_key(b.particle)
        {
            return false;
        }
        inner.sever(a.particle, a.end);
        inner.sever(b.particle, b.end);
        inner.particles[a.particle].set_link(a.end, Some(b.particle));
        inner.particles[b.particle].set_link(b.end, Some(a.particle));
        true
    }

    pub fn disconnect(&self, id: ParticleId, end: End) -> Option<ParticleId> {
        self.inner.lock().sever(id, end)
    }

    pub fn random(&self, rng: &mut impl Rng) -> Option<ParticleId> {
        let inner = self.inner.lock();
        if inner.live.is_empty() {
            return None;
        }
        Some(inner.live[rng.gen_range(0..inner.live.len())])
    }

    pub fn size(&self) -> usize {
        self.inner.lock().live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    pub fn ids(&self) -> Vec<ParticleId> {
        self.inner.lock().live.clone()
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.particles.clear();
        inner.live.clear();
        inner.slot.clear();
    }

    pub(crate) fn particles_mut(&mut self) -> &mut SlotMap<ParticleId, Particle> {
        &mut self.inner.get_mut().particles
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::collections::HashSet;

    fn end(particle: ParticleId, end: End) -> ParticleEnd {
        ParticleEnd::new(particle, end)
    }

    #[test]
    fn size_tracks_creations_minus_destructions() {
        let pool = ParticlePool::new();
        let ids: Vec<_> = (0..10)
            .map(|i| pool.create(Vector3::new(i as f64, 0.0, 0.0), Vector3::x()))
            .collect();
        for id in ids.iter().take(4) {
            assert!(pool.destroy(*id).is_some());
        }
        assert_eq!(pool.size(), 6);
        assert!(pool.destroy(ids[0]).is_none());
        assert_eq!(pool.size(), 6);
    }

    #[test]
    fn stale_handles_do_not_resolve_after_slot_reuse() {
        let pool = ParticlePool::new();
        let old = pool.create(Vector3::zeros(), Vector3::x());
        pool.destroy(old);
        let new = pool.create(Vector3::zeros(), Vector3::y());
        assert_ne!(old, new);
        assert!(pool.get(old).is_none());
        assert!(pool.get(new).is_some());
    }

    #[test]
    fn connect_is_mutual_and_replaces_existing_links() {
        let pool = ParticlePool::new();
        let a = pool.create(Vector3::zeros(), Vector3::x());
        let b = pool.create(Vector3::new(2.0, 0.0, 0.0), Vector3::x());
        let c = pool.create(Vector3::new(2.0, 0.5, 0.0), Vector3::x());

        assert!(pool.connect(&end(a, End::Head), &end(b, End::Tail)));
        assert_eq!(pool.get(a).unwrap().successor, Some(b));
        assert_eq!(pool.get(b).unwrap().predecessor, Some(a));

        assert!(pool.connect(&end(a, End::Head), &end(c, End::Tail)));
        assert_eq!(pool.get(a).unwrap().successor, Some(c));
        assert_eq!(pool.get(c).unwrap().predecessor, Some(a));
        assert_eq!(pool.get(b).unwrap().predecessor, None);
    }

    #[test]
    fn connect_rejects_self_links_and_stale_handles() {
        let pool = ParticlePool::new();
        let a = pool.create(Vector3::zeros(), Vector3::x());
        let b = pool.create(Vector3::zeros(), Vector3::x());
        assert!(!pool.connect(&end(a, End::Head), &end(a, End::Tail)));
        pool.destroy(b);
        assert!(!pool.connect(&end(a, End::Head), &end(b, End::Tail)));
        assert!(!pool.get(a).unwrap().has_links());
    }

    #[test]
    fn destroy_severs_neighbour_links() {
        let pool = ParticlePool::new();
        let a = pool.create(Vector3::zeros(), Vector3::x());
        let b = pool.create(Vector3::new(2.0, 0.0, 0.0), Vector3::x());
        let c = pool.create(Vector3::new(4.0, 0.0, 0.0), Vector3::x());
        pool.connect(&end(a, End::Head), &end(b, End::Tail));
        pool.connect(&end(b, End::Head), &end(c, End::Tail));

        pool.destroy(b);
        assert!(!pool.get(a).unwrap().has_links());
        assert!(!pool.get(c).unwrap().has_links());
    }

    #[test]
    fn disconnect_clears_both_sides() {
        let pool = ParticlePool::new();
        let a = pool.create(Vector3::zeros(), Vector3::x());
        let b = pool.create(Vector3::new(2.0, 0.0, 0.0), -Vector3::x());
        pool.connect(&end(a, End::Head), &end(b, End::Head));
        assert_eq!(pool.disconnect(b, End::Head), Some(a));
        assert!(!pool.get(a).unwrap().has_links());
        assert!(!pool.get(b).unwrap().has_links());
        assert_eq!(pool.disconnect(b, End::Head), None);
    }

    #[test]
    fn random_covers_every_live_particle_and_nothing_else() {
        let pool = ParticlePool::new();
        let ids: Vec<_> = (0..5)
            .map(|_| pool.create(Vector3::zeros(), Vector3::z()))
            .collect();
        pool.destroy(ids[2]);

        let mut rng = StdRng::seed_from_u64(9);
        let seen: HashSet<_> = (0..500).filter_map(|_| pool.random(&mut rng)).collect();
        assert_eq!(seen.len(), 4);
        assert!(!seen.contains(&ids[2]));
    }

    #[test]
    fn random_on_empty_pool_is_none() {
        let pool = ParticlePool::new();
        let mut rng = StdRng::seed_from_u64(0);
        assert!(pool.random(&mut rng).is_none());
    }
}
