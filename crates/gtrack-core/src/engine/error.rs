use thiserror::Error;

use super::config::ConfigError;
use crate::core::gradient::GradientError;
use crate::core::image::ImageError;
use crate::core::response::KernelError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Initialization failed: {0}")]
    Initialization(String),

    #[error("Invalid configuration: {source}")]
    Config {
        #[from]
        source: ConfigError,
    },

    #[error("Response kernel error: {source}")]
    Kernel {
        #[from]
        source: KernelError,
    },

    #[error("Gradient table error: {source}")]
    Gradient {
        #[from]
        source: GradientError,
    },

    #[error("Image error: {source}")]
    Image {
        #[from]
        source: ImageError,
    },

    #[error("Failed to build the worker thread pool: {source}")]
    ThreadPool {
        #[from]
        source: rayon::ThreadPoolBuildError,
    },

    #[error("Failed to write the trend log: {source}")]
    TrendLog {
        #[from]
        source: csv::Error,
    },

    #[error("Failed to write tracks: {0}")]
    TrackOutput(String),

    #[error("Internal logic error: {0}")]
    Internal(String),
}
