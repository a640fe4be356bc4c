use super::ImageError;
use super::geometry::ImageGeometry;

/// A voxel grid storing `components` values per voxel.
///
/// Values of one voxel are contiguous: component `c` of voxel `v` lives at
/// `v * components + c`, where `v` is the x-fastest linear voxel index.
#[derive(Debug, Clone, PartialEq)]
pub struct Volume<T> {
    geometry: ImageGeometry,
    components: usize,
    data: Vec<T>,
}

impl<T: Copy> Volume<T> {
    pub fn filled(geometry: ImageGeometry, components: usize, value: T) -> Self {
        let data = vec![value; geometry.n_voxels() * components];
        Self {
            geometry,
            components,
            data,
        }
    }

    pub fn from_data(
        geometry: ImageGeometry,
        components: usize,
        data: Vec<T>,
    ) -> Result<Self, ImageError> {
        let expected = geometry.n_voxels() * components;
        if data.len() != expected {
            return Err(ImageError::DataLength {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            geometry,
            components,
            data,
        })
    }

    #[inline]
    pub fn geometry(&self) -> &ImageGeometry {
        &self.geometry
    }

    #[inline]
    pub fn components(&self) -> usize {
        self.components
    }

    #[inline]
    pub fn data(&self) -> &[T] {
        &self.data
    }

    pub fn into_data(self) -> Vec<T> {
        self.data
    }

    #[inline]
    pub fn at_index(&self, index: usize) -> &[T] {
        &self.data[index * self.components..(index + 1) * self.components]
    }

    #[inline]
    pub fn at_index_mut(&mut self, index: usize) -> &mut [T] {
        &mut self.data[index * self.components..(index + 1) * self.components]
    }

    #[inline]
    pub fn at(&self, voxel: [usize; 3]) -> &[T] {
        self.at_index(self.geometry.linear_index(voxel))
    }

    #[inline]
    pub fn at_mut(&mut self, voxel: [usize; 3]) -> &mut [T] {
        let index = self.geometry.linear_index(voxel);
        self.at_index_mut(index)
    }

    /// Returns the values of component `c` for every voxel, x varying fastest.
    pub fn component(&self, c: usize) -> Vec<T> {
        self.data
            .iter()
            .skip(c)
            .step_by(self.components)
            .copied()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geometry() -> ImageGeometry {
        ImageGeometry::axis_aligned([2, 2, 1], [1.0, 1.0, 1.0]).unwrap()
    }

    #[test]
    fn from_data_validates_length() {
        let result = Volume::from_data(geometry(), 2, vec![0.0f32; 7]);
        assert_eq!(
            result,
            Err(ImageError::DataLength {
                expected: 8,
                actual: 7
            })
        );
    }

    #[test]
    fn voxel_values_are_contiguous() {
        let data: Vec<f64> = (0..8).map(|v| v as f64).collect();
        let vol = Volume::from_data(geometry(), 2, data).unwrap();
        assert_eq!(vol.at([0, 0, 0]), &[0.0, 1.0]);
        assert_eq!(vol.at([1, 0, 0]), &[2.0, 3.0]);
        assert_eq!(vol.at([0, 1, 0]), &[4.0, 5.0]);
        assert_eq!(vol.component(1), vec![1.0, 3.0, 5.0, 7.0]);
    }

    #[test]
    fn at_mut_writes_through() {
        let mut vol = Volume::filled(geometry(), 1, false);
        vol.at_mut([1, 1, 0])[0] = true;
        assert_eq!(vol.data(), &[false, false, false, true]);
    }
}
