use super::ImageError;
use super::geometry::ImageGeometry;
use super::volume::Volume;
use nalgebra::Vector3;
use rand::Rng;

/// Half-width of the in-voxel jitter, kept just inside the voxel border.
const VOXEL_JITTER: f64 = 0.5 - 1e-9;

/// The region of scanner space in which particles may be born or moved.
///
/// It is either the whole image or the non-zero voxels of a brain mask defined on
/// the same voxel grid.
#[derive(Debug, Clone)]
pub struct SamplingDomain {
    geometry: ImageGeometry,
    inside: Vec<bool>,
    voxels: Vec<usize>,
}

impl SamplingDomain {
    pub fn whole_image(geometry: ImageGeometry) -> Self {
        let n = geometry.n_voxels();
        Self {
            geometry,
            inside: vec![true; n],
            voxels: (0..n).collect(),
        }
    }

    pub fn from_mask(geometry: ImageGeometry, mask: &Volume<bool>) -> Result<Self, ImageError> {
        if mask.geometry().dims() != geometry.dims() {
            return Err(ImageError::DimensionMismatch {
                expected: geometry.dims(),
                found: mask.geometry().dims(),
            });
        }
        let inside: Vec<bool> = (0..geometry.n_voxels())
            .map(|i| mask.at_index(i).iter().any(|&v| v))
            .collect();
        let voxels: Vec<usize> = inside
            .iter()
            .enumerate()
            .filter_map(|(i, &v)| v.then_some(i))
            .collect();
        if voxels.is_empty() {
            return Err(ImageError::Empty);
        }
        Ok(Self {
            geometry,
            inside,
            voxels,
        })
    }

    pub fn geometry(&self) -> &ImageGeometry {
        &self.geometry
    }

    pub fn n_voxels(&self) -> usize {
        self.voxels.len()
    }

    /// Volume of the domain in scanner units.
    pub fn volume(&self) -> f64 {
        self.voxels.len() as f64 * self.geometry.voxel_volume()
    }

    pub fn contains(&self, pos: &Vector3<f64>) -> bool {
        self.geometry
            .voxel_at(pos)
            .is_some_and(|v| self.inside[self.geometry.linear_index(v)])
    }

    pub fn contains_voxel(&self, index: usize) -> bool {
        self.inside.get(index).copied().unwrap_or(false)
    }

    /// Draws a position uniformly distributed over the domain.
    pub fn random_position(&self, rng: &mut impl Rng) -> Vector3<f64> {
        let index = self.voxels[rng.gen_range(0..self.voxels.len())];
        let [x, y, z] = self.geometry.voxel_from_index(index);
        let offset = Vector3::new(
            rng.gen_range(-VOXEL_JITTER..VOXEL_JITTER),
            rng.gen_range(-VOXEL_JITTER..VOXEL_JITTER),
            rng.gen_range(-VOXEL_JITTER..VOXEL_JITTER),
        );
        self.geometry
            .to_scanner(&(Vector3::new(x as f64, y as f64, z as f64) + offset))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn geometry() -> ImageGeometry {
        ImageGeometry::axis_aligned([4, 4, 4], [2.0, 2.0, 2.0]).unwrap()
    }

    #[test]
    fn random_positions_fall_inside_the_mask() {
        let g = geometry();
        let mut mask = Volume::filled(g.clone(), 1, false);
        mask.at_mut([1, 2, 3])[0] = true;
        mask.at_mut([3, 0, 0])[0] = true;
        let domain = SamplingDomain::from_mask(g, &mask).unwrap();

        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..200 {
            let p = domain.random_position(&mut rng);
            assert!(domain.contains(&p), "{:?} is outside the mask", p);
        }
        assert_eq!(domain.n_voxels(), 2);
        assert!((domain.volume() - 16.0).abs() < 1e-12);
    }

    #[test]
    fn whole_image_contains_everything_within_bounds() {
        let domain = SamplingDomain::whole_image(geometry());
        assert!(domain.contains(&Vector3::new(0.0, 0.0, 0.0)));
        assert!(domain.contains(&Vector3::new(6.9, 6.9, 6.9)));
        assert!(!domain.contains(&Vector3::new(7.1, 0.0, 0.0)));
        assert_eq!(domain.n_voxels(), 64);
    }

    #[test]
    fn empty_mask_is_rejected() {
        let g = geometry();
        let mask = Volume::filled(g.clone(), 1, false);
        assert!(matches!(
            SamplingDomain::from_mask(g, &mask),
            Err(ImageError::Empty)
        ));
    }
}
