pub mod gradients;
pub mod nifti_io;
