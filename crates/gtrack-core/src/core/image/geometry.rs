use super::ImageError;
use nalgebra::{Matrix4, Vector3, Vector4};

/// Voxel grid dimensions and the affine mapping between voxel and scanner space.
///
/// Voxel centres sit at integer voxel coordinates, so voxel `(i, j, k)` covers
/// `[i - 0.5, i + 0.5) x [j - 0.5, j + 0.5) x [k - 0.5, k + 0.5)`.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageGeometry {
    dims: [usize; 3],
    voxel_to_scanner: Matrix4<f64>,
    scanner_to_voxel: Matrix4<f64>,
}

impl ImageGeometry {
    pub fn new(dims: [usize; 3], voxel_to_scanner: Matrix4<f64>) -> Result<Self, ImageError> {
        if dims.iter().any(|&d| d == 0) {
            return Err(ImageError::Empty);
        }
        let scanner_to_voxel = voxel_to_scanner
            .try_inverse()
            .ok_or(ImageError::SingularTransform)?;
        Ok(Self {
            dims,
            voxel_to_scanner,
            scanner_to_voxel,
        })
    }

    /// Axis-aligned geometry with the given voxel size and the origin at voxel `(0, 0, 0)`.
    pub fn axis_aligned(dims: [usize; 3], voxel_size: [f64; 3]) -> Result<Self, ImageError> {
        let transform = Matrix4::new_nonuniform_scaling(&Vector3::from(voxel_size));
        Self::new(dims, transform)
    }

    #[inline]
    pub fn dims(&self) -> [usize; 3] {
        self.dims
    }

    #[inline]
    pub fn n_voxels(&self) -> usize {
        self.dims[0] * self.dims[1] * self.dims[2]
    }

    pub fn voxel_to_scanner(&self) -> &Matrix4<f64> {
        &self.voxel_to_scanner
    }

    /// Lengths of the voxel edges in scanner units.
    pub fn voxel_size(&self) -> [f64; 3] {
        let m = &self.voxel_to_scanner;
        [0, 1, 2].map(|c| Vector3::new(m[(0, c)], m[(1, c)], m[(2, c)]).norm())
    }

    /// Volume of one voxel in scanner units.
    pub fn voxel_volume(&self) -> f64 {
        self.voxel_to_scanner
            .fixed_view::<3, 3>(0, 0)
            .clone_owned()
            .determinant()
            .abs()
    }

    #[inline]
    pub fn to_voxel(&self, scanner: &Vector3<f64>) -> Vector3<f64> {
        (self.scanner_to_voxel * Vector4::new(scanner.x, scanner.y, scanner.z, 1.0)).xyz()
    }

    #[inline]
    pub fn to_scanner(&self, voxel: &Vector3<f64>) -> Vector3<f64> {
        (self.voxel_to_scanner * Vector4::new(voxel.x, voxel.y, voxel.z, 1.0)).xyz()
    }

    /// Returns the voxel containing the scanner position, or `None` outside the image.
    pub fn voxel_at(&self, scanner: &Vector3<f64>) -> Option<[usize; 3]> {
        let v = self.to_voxel(scanner);
        self.checked_voxel([v.x.round(), v.y.round(), v.z.round()])
    }

    /// Converts floating voxel indices to a bounds-checked integer voxel.
    pub fn checked_voxel(&self, v: [f64; 3]) -> Option<[usize; 3]> {
        let mut out = [0usize; 3];
        for axis in 0..3 {
            let value = v[axis];
            if !value.is_finite() || value < 0.0 || value >= self.dims[axis] as f64 {
                return None;
            }
            out[axis] = value as usize;
        }
        Some(out)
    }

    /// Linear index of a voxel, x varying fastest.
    #[inline]
    pub fn linear_index(&self, voxel: [usize; 3]) -> usize {
        voxel[0] + self.dims[0] * (voxel[1] + self.dims[1] * voxel[2])
    }

    /// Inverse of [`ImageGeometry::linear_index`].
    #[inline]
    pub fn voxel_from_index(&self, index: usize) -> [usize; 3] {
        let x = index % self.dims[0];
        let rest = index / self.dims[0];
        [x, rest % self.dims[1], rest / self.dims[1]]
    }

    /// Scanner-space axis-aligned bounding box of the image, including voxel borders.
    pub fn bounding_box(&self) -> (Vector3<f64>, Vector3<f64>) {
        let mut lo = Vector3::repeat(f64::INFINITY);
        let mut hi = Vector3::repeat(f64::NEG_INFINITY);
        for corner in 0..8 {
            let v = Vector3::new(
                if corner & 1 == 0 { -0.5 } else { self.dims[0] as f64 - 0.5 },
                if corner & 2 == 0 { -0.5 } else { self.dims[1] as f64 - 0.5 },
                if corner & 4 == 0 { -0.5 } else { self.dims[2] as f64 - 0.5 },
            );
            let s = self.to_scanner(&v);
            lo = lo.inf(&s);
            hi = hi.sup(&s);
        }
        (lo, hi)
    }
}
