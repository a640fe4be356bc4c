use nalgebra::Vector3;
use parking_lot::Mutex;

// In particle lengths.
pub const SPATIAL_LOCK_RANGE: f64 = 5.0;

#[derive(Debug, Clone, Copy)]
struct Slot {
    centre: Vector3<f64>,
    active: bool,
}

#[derive(Debug)]
pub struct SpatialLock {
    slots: Mutex<Vec<Slot>>,
    threshold: Vector3<f64>,
}

#[derive(Debug)]
#[must_use = "the region is released as soon as the guard is dropped"]
pub struct SpatialLockGuard<'a> {
    lock: &'a SpatialLock,
    slot: usize,
}

impl SpatialLockGuard<'_> {
    pub fn centre(&self) -> Vector3<f64> {
        self.lock.slots.lock()[self.slot].centre
    }
}

impl Drop for SpatialLockGuard<'_> {
    fn drop(&mut self) {
        self.lock.slots.lock()[self.slot].active = false;
    }
}

impl SpatialLock {
    pub fn new(threshold: Vector3<f64>) -> Self {
        Self {
            slots: Mutex::new(Vec::new()),
            threshold,
        }
    }

    pub fn with_range(range: f64) -> Self {
        Self::new(Vector3::repeat(range))
    }

    pub fn try_lock(&self, pos: &Vector3<f64>) -> Option<SpatialLockGuard<'_>> {
        let mut slots = self.slots.lock();
        let conflict = slots.iter().any(|s| {
            s.active && (0..3).all(|axis| (s.centre[axis] - pos[axis]).abs() < self.threshold[axis])
        });
        if conflict {
            return None;
        }

        let slot = match slots.iter().position(|s| !s.active) {
            Some(i) => {
                slots[i] = Slot {
                    centre: *pos,
                    active: true,
                };
                i
            }
            None => {
                slots.push(Slot {
                    centre: *pos,
                    active: true,
                });
                slots.len() - 1
            }
        };
        Some(SpatialLockGuard { lock: self, slot })
    }

    pub fn unlock(&self, guard: SpatialLockGuard<'_>) {
        debug_assert!(std::ptr::eq(guard.lock, self));
        drop(guard);
    }

    pub fn held(&self) -> usize {
        self.slots.lock().iter().filter(|s| s.active).count()
    }
}
