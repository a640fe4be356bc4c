//! Reading and writing single-file NIfTI-1 images (`.nii` and `.nii.gz`).

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use gtrack::core::image::ImageError;
use gtrack::core::image::geometry::ImageGeometry;
use gtrack::core::image::volume::Volume;
use nalgebra::Matrix4;
use ndarray::{Array, IxDyn};
use nifti::volume::ndarray::IntoNdArray;
use nifti::{InMemNiftiObject, NiftiHeader, NiftiObject};
use std::fs;
use std::io::{Cursor, Write};
use std::path::Path;
use thiserror::Error;
use tracing::debug;

const HEADER_SIZE: usize = 348;
const VOX_OFFSET: usize = 352;
const DT_FLOAT32: i16 = 16;
const NIFTI_XFORM_SCANNER_ANAT: i16 = 1;

#[derive(Debug, Error)]
pub enum NiftiIoError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Malformed NIfTI image: {0}")]
    Nifti(#[from] nifti::NiftiError),
    #[error("Expected a 3D or 4D image, found {0} dimensions")]
    Dimensionality(usize),
    #[error(transparent)]
    Image(#[from] ImageError),
}

fn is_gzip(bytes: &[u8]) -> bool {
    bytes.len() >= 2 && bytes[0] == 0x1f && bytes[1] == 0x8b
}

/// Voxel-to-scanner transform: the sform when one is set, a pixdim diagonal otherwise.
fn affine(header: &NiftiHeader) -> Matrix4<f64> {
    if header.sform_code > 0 {
        let rows = [header.srow_x, header.srow_y, header.srow_z];
        let mut m = Matrix4::identity();
        for (r, row) in rows.iter().enumerate() {
            for (c, &v) in row.iter().enumerate() {
                m[(r, c)] = v as f64;
            }
        }
        m
    } else {
        let p = header.pixdim;
        Matrix4::new_nonuniform_scaling(&nalgebra::Vector3::new(
            p[1].abs().max(f32::EPSILON) as f64,
            p[2].abs().max(f32::EPSILON) as f64,
            p[3].abs().max(f32::EPSILON) as f64,
        ))
    }
}

/// Reads a 3D or 4D image; the fourth axis becomes the per-voxel components.
pub fn read_volume(path: &Path) -> Result<Volume<f64>, NiftiIoError> {
    let bytes = fs::read(path)?;
    let object = if is_gzip(&bytes) {
        InMemNiftiObject::from_reader(GzDecoder::new(Cursor::new(bytes)))?
    } else {
        InMemNiftiObject::from_reader(Cursor::new(bytes))?
    };
    let transform = affine(object.header());

    let array: Array<f64, IxDyn> = object.into_volume().into_ndarray()?;
    let shape = array.shape().to_vec();
    if !(3..=4).contains(&shape.len()) {
        return Err(NiftiIoError::Dimensionality(shape.len()));
    }
    let dims = [shape[0], shape[1], shape[2]];
    let components = shape.get(3).copied().unwrap_or(1);
    debug!(path = %path.display(), ?dims, components, "Read NIfTI image.");

    let mut data = Vec::with_capacity(dims.iter().product::<usize>() * components);
    for k in 0..dims[2] {
        for j in 0..dims[1] {
            for i in 0..dims[0] {
                if shape.len() == 3 {
                    data.push(array[IxDyn(&[i, j, k])]);
                } else {
                    data.extend((0..components).map(|t| array[IxDyn(&[i, j, k, t])]));
                }
            }
        }
    }

    let geometry = ImageGeometry::new(dims, transform)?;
    Ok(Volume::from_data(geometry, components, data)?)
}

/// Reads a mask image; every voxel with a non-zero first component is inside.
pub fn read_mask(path: &Path) -> Result<Volume<bool>, NiftiIoError> {
    let volume = read_volume(path)?;
    let geometry = volume.geometry().clone();
    let data = volume.component(0).into_iter().map(|v| v != 0.0).collect();
    Ok(Volume::from_data(geometry, 1, data)?)
}

fn encode(volume: &Volume<f64>) -> Vec<u8> {
    let geometry = volume.geometry();
    let [nx, ny, nz] = geometry.dims();
    let nt = volume.components();
    let voxel_size = geometry.voxel_size();
    let transform = geometry.voxel_to_scanner();

    let mut header = [0u8; HEADER_SIZE];
    let mut put = |offset: usize, bytes: &[u8]| {
        header[offset..offset + bytes.len()].copy_from_slice(bytes);
    };
    put(0, &(HEADER_SIZE as i32).to_le_bytes());
    let ndim: i16 = if nt > 1 { 4 } else { 3 };
    let dim = [ndim, nx as i16, ny as i16, nz as i16, nt as i16, 1, 1, 1];
    for (i, d) in dim.iter().enumerate() {
        put(40 + 2 * i, &d.to_le_bytes());
    }
    put(70, &DT_FLOAT32.to_le_bytes());
    put(72, &32i16.to_le_bytes());
    let pixdim = [
        1.0,
        voxel_size[0] as f32,
        voxel_size[1] as f32,
        voxel_size[2] as f32,
        1.0,
        1.0,
        1.0,
        1.0,
    ];
    for (i, p) in pixdim.iter().enumerate() {
        put(76 + 4 * i, &p.to_le_bytes());
    }
    put(108, &(VOX_OFFSET as f32).to_le_bytes());
    put(112, &1.0f32.to_le_bytes());
    // Millimetres and seconds.
    put(123, &[2 | 8]);
    put(254, &NIFTI_XFORM_SCANNER_ANAT.to_le_bytes());
    for row in 0..3 {
        for col in 0..4 {
            put(
                280 + 16 * row + 4 * col,
                &(transform[(row, col)] as f32).to_le_bytes(),
            );
        }
    }
    put(344, b"n+1\0");

    let n_voxels = geometry.n_voxels();
    let mut buffer = Vec::with_capacity(VOX_OFFSET + 4 * n_voxels * nt);
    buffer.extend_from_slice(&header);
    buffer.extend_from_slice(&[0u8; 4]);
    // On disk the component axis is outermost.
    for c in 0..nt {
        for v in 0..n_voxels {
            buffer.extend_from_slice(&(volume.data()[v * nt + c] as f32).to_le_bytes());
        }
    }
    buffer
}

/// Writes `volume` as float32 NIfTI-1, gzip-compressed when the path ends in `.nii.gz`.
pub fn write_volume(path: &Path, volume: &Volume<f64>) -> Result<(), NiftiIoError> {
    let bytes = encode(volume);
    if path.to_string_lossy().ends_with(".nii.gz") {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&bytes)?;
        fs::write(path, encoder.finish()?)?;
    } else {
        fs::write(path, bytes)?;
    }
    debug!(path = %path.display(), components = volume.components(), "Wrote NIfTI image.");
    Ok(())
}
