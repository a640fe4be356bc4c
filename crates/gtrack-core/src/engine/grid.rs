use super::pool::ParticlePool;
use crate::core::image::geometry::ImageGeometry;
use crate::core::io::traits::TrackSink;
use crate::core::models::ids::ParticleId;
use crate::core::models::particle::{End, Particle, ParticleEnd};
use nalgebra::Vector3;
use parking_lot::Mutex;
use rand::Rng;
use slotmap::SlotMap;
use tracing::debug;

/// Uniform spatial hash over the particles of a [`ParticlePool`].
///
/// The grid covers the scanner-space bounding box of the image with cubic cells whose
/// edge is twice the particle length, so every end within one particle length of a
/// point lies in the 27 cells around it. Cells and pool are guarded by separate locks
/// that are never held at the same time.
#[derive(Debug)]
pub struct ParticleGrid {
    pool: ParticlePool,
    cells: Mutex<Vec<Vec<ParticleId>>>,
    origin: Vector3<f64>,
    cell_size: f64,
    dims: [usize; 3],
    particle_length: f64,
}

impl ParticleGrid {
    pub fn new(geometry: &ImageGeometry, particle_length: f64) -> Self {
        let (lo, hi) = geometry.bounding_box();
        let cell_size = 2.0 * particle_length;
        let dims = [0, 1, 2].map(|axis| (((hi[axis] - lo[axis]) / cell_size).ceil() as usize).max(1));
        debug!(
            "Particle grid: {}x{}x{} cells of {:.3} mm.",
            dims[0], dims[1], dims[2], cell_size
        );
        Self {
            pool: ParticlePool::new(),
            cells: Mutex::new(vec![Vec::new(); dims[0] * dims[1] * dims[2]]),
            origin: lo,
            cell_size,
            dims,
            particle_length,
        }
    }

    pub fn particle_length(&self) -> f64 {
        self.particle_length
    }

    pub fn dims(&self) -> [usize; 3] {
        self.dims
    }

    /// Cell containing `pos`, or `None` outside the grid.
    pub fn cell_of(&self, pos: &Vector3<f64>) -> Option<[isize; 3]> {
        let c = self.cell_unchecked(pos);
        self.index_of(c).map(|_| c)
    }

    /// Cell coordinates of `pos`, which may lie outside the grid.
    pub fn cell_unchecked(&self, pos: &Vector3<f64>) -> [isize; 3] {
        [0, 1, 2].map(|axis| ((pos[axis] - self.origin[axis]) / self.cell_size).floor() as isize)
    }

    fn index_of(&self, cell: [isize; 3]) -> Option<usize> {
        for axis in 0..3 {
            if cell[axis] < 0 || cell[axis] >= self.dims[axis] as isize {
                return None;
            }
        }
        let [x, y, z] = cell.map(|c| c as usize);
        Some(x + self.dims[0] * (y + self.dims[1] * z))
    }

    fn clamped_index(&self, pos: &Vector3<f64>) -> usize {
        let c = self.cell_unchecked(pos);
        let clamped: [isize; 3] =
            [0, 1, 2].map(|axis| c[axis].clamp(0, self.dims[axis] as isize - 1));
        self.index_of(clamped).unwrap_or(0)
    }

    pub fn add(&self, pos: Vector3<f64>, dir: Vector3<f64>) -> ParticleId {
        let id = self.pool.create(pos, dir);
        let index = self.clamped_index(&pos);
        self.cells.lock()[index].push(id);
        id
    }

    /// Moves a particle to a new pose, updating its bucket. Returns `false` if it is gone.
    pub fn shift(&self, id: ParticleId, pos: Vector3<f64>, dir: Vector3<f64>) -> bool {
        let Some(old) = self.pool.get(id) else {
            return false;
        };
        if !self.pool.set_pose(id, pos, dir) {
            return false;
        }
        let from = self.clamped_index(&old.pos);
        let to = self.clamped_index(&pos);
        if from != to {
            let mut cells = self.cells.lock();
            remove_from(&mut cells[from], id);
            cells[to].push(id);
        }
        true
    }

    pub fn remove(&self, id: ParticleId) -> Option<Particle> {
        let particle = self.pool.destroy(id)?;
        let index = self.clamped_index(&particle.pos);
        remove_from(&mut self.cells.lock()[index], id);
        Some(particle)
    }

    /// Handles stored in `cell`, or `None` if the cell lies outside the grid.
    pub fn neighbours(&self, cell: [isize; 3]) -> Option<Vec<ParticleId>> {
        let index = self.index_of(cell)?;
        Some(self.cells.lock()[index].clone())
    }

    pub fn get(&self, id: ParticleId) -> Option<Particle> {
        self.pool.get(id)
    }

    pub fn random(&self, rng: &mut impl Rng) -> Option<ParticleId> {
        self.pool.random(rng)
    }

    pub fn connect(&self, a: &ParticleEnd, b: &ParticleEnd) -> bool {
        self.pool.connect(a, b)
    }

    pub fn disconnect(&self, id: ParticleId, end: End) -> Option<ParticleId> {
        self.pool.disconnect(id, end)
    }

    pub fn len(&self) -> usize {
        self.pool.size()
    }

    pub fn is_empty(&self) -> bool {
        self.pool.is_empty()
    }

    pub fn ids(&self) -> Vec<ParticleId> {
        self.pool.ids()
    }

    pub fn clear(&self) {
        self.pool.clear();
        for cell in self.cells.lock().iter_mut() {
            cell.clear();
        }
    }

    /// Writes every chain of linked particles to `sink` and returns the number of tracks.
    ///
    /// Each track starts and ends at the free end point of its outermost particles and
    /// visits the particle centres in chain order; an isolated particle yields its tail
    /// end, centre and head end. Exclusive access guarantees no worker is still sampling.
    pub fn export_tracks<S: TrackSink>(&mut self, sink: &mut S) -> Result<usize, S::Error> {
        let length = self.particle_length;
        let particles = self.pool.particles_mut();
        let ids: Vec<ParticleId> = particles.keys().collect();

        let mut count = 0;
        let mut result = Ok(());
        for id in ids {
            if particles[id].visited {
                continue;
            }
            let track = trace_track(particles, id, length);
            if let Err(e) = sink.write_track(&track) {
                result = Err(e);
                break;
            }
            count += 1;
        }

        for p in particles.values_mut() {
            p.visited = false;
        }
        result.map(|_| count)
    }
}

fn remove_from(cell: &mut Vec<ParticleId>, id: ParticleId) {
    if let Some(i) = cell.iter().position(|&p| p == id) {
        cell.swap_remove(i);
    }
}

fn trace_track(
    particles: &mut SlotMap<ParticleId, Particle>,
    start: ParticleId,
    length: f64,
) -> Vec<Vector3<f64>> {
    particles[start].visited = true;
    let mut backward = walk(particles, start, End::Tail, length);
    let forward = walk(particles, start, End::Head, length);

    backward.reverse();
    backward.push(particles[start].pos);
    backward.extend(forward);
    backward
}

/// Follows the chain out of `from` through `exit`, marking particles visited.
///
/// Returns the centres of the particles reached, followed by the free end point of the
/// last one. A neighbour may be attached by either of its ends, so the walk leaves each
/// particle through the end opposite to the one it entered by.
fn walk(
    particles: &mut SlotMap<ParticleId, Particle>,
    from: ParticleId,
    exit: End,
    length: f64,
) -> Vec<Vector3<f64>> {
    let mut points = Vec::new();
    let mut current = from;
    let mut end = exit;
    loop {
        let here = particles[current];
        let next = here
            .link(end)
            .filter(|n| particles.get(*n).is_some_and(|q| !q.visited));
        match next {
            Some(next) => {
                let q = &mut particles[next];
                q.visited = true;
                let entry = q.end_linked_to(current).unwrap_or(End::Tail);
                points.push(q.pos);
                current = next;
                end = entry.opposite();
            }
            None => {
                points.push(here.end_point(end, length));
                return points;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::io::traits::TrackCollector;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn grid() -> ParticleGrid {
        let geometry = ImageGeometry::axis_aligned([10, 10, 10], [2.0, 2.0, 2.0]).unwrap();
        ParticleGrid::new(&geometry, 1.0)
    }

    fn link(grid: &ParticleGrid, a: ParticleId, ea: End, b: ParticleId, eb: End) {
        assert!(grid.connect(&ParticleEnd::new(a, ea), &ParticleEnd::new(b, eb)));
    }

    fn assert_close(a: &Vector3<f64>, b: &Vector3<f64>) {
        assert!((a - b).norm() < 1e-12, "{:?} != {:?}", a, b);
    }

    #[test]
    fn grid_covers_the_image_with_cells_of_twice_the_particle_length() {
        let g = grid();
        assert_eq!(g.dims(), [10, 10, 10]);
        assert_eq!(g.cell_of(&Vector3::new(-1.0, -1.0, -1.0)), Some([0, 0, 0]));
        assert_eq!(g.cell_of(&Vector3::new(3.0, 0.0, 18.9)), Some([2, 0, 9]));
        assert_eq!(g.cell_of(&Vector3::new(19.5, 0.0, 0.0)), None);
        assert!(g.neighbours([-1, 0, 0]).is_none());
        assert_eq!(g.neighbours([0, 0, 0]), Some(vec![]));
    }

    #[test]
    fn add_shift_remove_keep_buckets_consistent() {
        let g = grid();
        let id = g.add(Vector3::new(0.5, 0.5, 0.5), Vector3::new(0.0, 0.0, 2.0));
        assert!((g.get(id).unwrap().dir.norm() - 1.0).abs() < 1e-12);
        let start = g.cell_of(&Vector3::new(0.5, 0.5, 0.5)).unwrap();
        assert_eq!(g.neighbours(start), Some(vec![id]));

        let target = Vector3::new(10.0, 4.0, 7.0);
        assert!(g.shift(id, target, Vector3::new(1.0, 1.0, 0.0)));
        assert_eq!(g.neighbours(start), Some(vec![]));
        assert_eq!(g.neighbours(g.cell_of(&target).unwrap()), Some(vec![id]));
        assert!((g.get(id).unwrap().dir.norm() - 1.0).abs() < 1e-12);

        assert!(g.remove(id).is_some());
        assert!(g.is_empty());
        assert_eq!(g.neighbours(g.cell_of(&target).unwrap()), Some(vec![]));
        assert!(!g.shift(id, target, Vector3::x()));
    }

    #[test]
    fn isolated_particle_exports_as_three_points() {
        let mut g = grid();
        g.add(Vector3::new(5.0, 5.0, 5.0), Vector3::x());
        let mut sink = TrackCollector::new();
        assert_eq!(g.export_tracks(&mut sink).unwrap(), 1);

        let track = &sink.tracks[0];
        assert_eq!(track.len(), 3);
        assert_close(&track[0], &Vector3::new(4.0, 5.0, 5.0));
        assert_close(&track[1], &Vector3::new(5.0, 5.0, 5.0));
        assert_close(&track[2], &Vector3::new(6.0, 5.0, 5.0));
    }

    #[test]
    fn chains_are_exported_once_in_order_regardless_of_orientation() {
        let mut g = grid();
        let a = g.add(Vector3::new(2.0, 5.0, 5.0), Vector3::x());
        // Reversed particle: its head faces `a`.
        let b = g.add(Vector3::new(4.0, 5.0, 5.0), -Vector3::x());
        let c = g.add(Vector3::new(6.0, 5.0, 5.0), Vector3::x());
        g.add(Vector3::new(15.0, 15.0, 15.0), Vector3::z());
        link(&g, a, End::Head, b, End::Head);
        link(&g, b, End::Tail, c, End::Tail);

        let mut sink = TrackCollector::new();
        assert_eq!(g.export_tracks(&mut sink).unwrap(), 2);

        let chain = sink.tracks.iter().find(|t| t.len() == 5).unwrap();
        let xs: Vec<f64> = chain.iter().map(|p| p.x).collect();
        let forward = [1.0, 2.0, 4.0, 6.0, 7.0];
        let reversed = [7.0, 6.0, 4.0, 2.0, 1.0];
        assert!(
            xs.iter().zip(forward).all(|(x, e)| (x - e).abs() < 1e-12)
                || xs.iter().zip(reversed).all(|(x, e)| (x - e).abs() < 1e-12),
            "unexpected order {:?}",
            xs
        );
        assert!(sink.tracks.iter().any(|t| t.len() == 3));

        for id in g.ids() {
            assert!(!g.get(id).unwrap().visited);
        }
    }

    #[test]
    fn closed_loops_terminate_and_visit_every_particle_once() {
        let mut g = grid();
        let ids: Vec<_> = (0..4)
            .map(|i| g.add(Vector3::new(2.0 * i as f64, 5.0, 5.0), Vector3::x()))
            .collect();
        for i in 0..4 {
            link(&g, ids[i], End::Head, ids[(i + 1) % 4], End::Tail);
        }
        let mut sink = TrackCollector::new();
        assert_eq!(g.export_tracks(&mut sink).unwrap(), 1);
        assert_eq!(sink.tracks[0].len(), 4 + 2);
    }

    #[test]
    fn clear_removes_everything() {
        let g = grid();
        let mut rng = StdRng::seed_from_u64(1);
        for i in 0..20 {
            g.add(Vector3::new(i as f64 * 0.9, 1.0, 1.0), Vector3::y());
        }
        assert!(g.random(&mut rng).is_some());
        g.clear();
        assert_eq!(g.len(), 0);
        assert!(g.random(&mut rng).is_none());
        for x in 0..10 {
            assert_eq!(g.neighbours([x, 0, 0]), Some(vec![]));
        }
    }
}
