use super::ids::ParticleId;
use nalgebra::Vector3;

/// One of the two ends of a particle.
///
/// The successor of a particle is always attached at its [`End::Head`] and the
/// predecessor at its [`End::Tail`], so the polarity of an end fully determines
/// which link slot it occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum End {
    /// The end at `pos + L * dir` (polarity `+1`).
    Head,
    /// The end at `pos - L * dir` (polarity `-1`).
    Tail,
}

impl End {
    /// Returns the polarity of this end as `+1.0` or `-1.0`.
    #[inline]
    pub fn sign(self) -> f64 {
        match self {
            End::Head => 1.0,
            End::Tail => -1.0,
        }
    }

    #[inline]
    pub fn opposite(self) -> Self {
        match self {
            End::Head => End::Tail,
            End::Tail => End::Head,
        }
    }

    pub const BOTH: [End; 2] = [End::Head, End::Tail];
}

/// A minimal fibre segment of the generative track model.
///
/// Particles never own their neighbours: links are arena handles into the
/// `ParticlePool` that stores every particle. A particle has at most one
/// predecessor and one successor, and linkage is always mutual: if `A.successor`
/// is `B` then either `B.predecessor` or `B.successor` is `A`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Particle {
    /// Centre of the segment in scanner coordinates (mm).
    pub pos: Vector3<f64>,
    /// Unit direction of the segment.
    pub dir: Vector3<f64>,
    /// Particle linked at the tail end.
    pub predecessor: Option<ParticleId>,
    /// Particle linked at the head end.
    pub successor: Option<ParticleId>,
    /// Transient marker used only while exporting tracks.
    pub visited: bool,
}

impl Particle {
    /// Creates an unlinked particle. The direction is normalised.
    pub fn new(pos: Vector3<f64>, dir: Vector3<f64>) -> Self {
        Self {
            pos,
            dir: dir.normalize(),
            predecessor: None,
            successor: None,
            visited: false,
        }
    }

    /// Returns the position of the given end for a particle of half-length `length`.
    #[inline]
    pub fn end_point(&self, end: End, length: f64) -> Vector3<f64> {
        self.pos + self.dir * (end.sign() * length)
    }

    /// Returns the particle linked at `end`, if any.
    #[inline]
    pub fn link(&self, end: End) -> Option<ParticleId> {
        match end {
            End::Head => self.successor,
            End::Tail => self.predecessor,
        }
    }

    #[inline]
    pub fn set_link(&mut self, end: End, other: Option<ParticleId>) {
        match end {
            End::Head => self.successor = other,
            End::Tail => self.predecessor = other,
        }
    }

    #[inline]
    pub fn has_links(&self) -> bool {
        self.predecessor.is_some() || self.successor.is_some()
    }

    /// Returns which end of `self` is attached to `other`, if they are linked.
    pub fn end_linked_to(&self, other: ParticleId) -> Option<End> {
        if self.successor == Some(other) {
            Some(End::Head)
        } else if self.predecessor == Some(other) {
            Some(End::Tail)
        } else {
            None
        }
    }
}

/// A particle end considered during a neighbourhood scan for the connect move.
///
/// This is an ephemeral value: it is produced by an energy computer, consumed by
/// the sampler and never stored in the pool.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParticleEnd {
    pub particle: ParticleId,
    pub end: End,
    /// Connection energy of linking this end to the scanned end.
    pub energy: f64,
    /// Unnormalised selection weight, `exp(-energy / T)`.
    pub weight: f64,
}

impl ParticleEnd {
    pub fn new(particle: ParticleId, end: End) -> Self {
        Self {
            particle,
            end,
            energy: 0.0,
            weight: 1.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::SlotMap;

    #[test]
    fn new_normalizes_direction() {
        let p = Particle::new(Vector3::zeros(), Vector3::new(0.0, 3.0, 4.0));
        assert!((p.dir.norm() - 1.0).abs() < 1e-12);
        assert!(!p.has_links());
        assert!(!p.visited);
    }

    #[test]
    fn end_points_lie_on_either_side_of_the_centre() {
        let p = Particle::new(Vector3::new(1.0, 2.0, 3.0), Vector3::x());
        assert_eq!(p.end_point(End::Head, 0.5), Vector3::new(1.5, 2.0, 3.0));
        assert_eq!(p.end_point(End::Tail, 0.5), Vector3::new(0.5, 2.0, 3.0));
    }

    #[test]
    fn links_map_head_to_successor_and_tail_to_predecessor() {
        let mut keys: SlotMap<ParticleId, ()> = SlotMap::with_key();
        let a = keys.insert(());
        let b = keys.insert(());

        let mut p = Particle::new(Vector3::zeros(), Vector3::z());
        p.set_link(End::Head, Some(a));
        p.set_link(End::Tail, Some(b));

        assert_eq!(p.successor, Some(a));
        assert_eq!(p.predecessor, Some(b));
        assert_eq!(p.end_linked_to(a), Some(End::Head));
        assert_eq!(p.end_linked_to(b), Some(End::Tail));
        assert!(p.has_links());
    }

    #[test]
    fn end_sign_and_opposite_are_consistent() {
        assert_eq!(End::Head.sign(), 1.0);
        assert_eq!(End::Tail.sign(), -1.0);
        assert_eq!(End::Head.opposite(), End::Tail);
        assert_eq!(End::Tail.opposite().sign(), 1.0);
    }
}
