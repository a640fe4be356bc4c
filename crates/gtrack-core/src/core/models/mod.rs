pub mod ids;
pub mod particle;
