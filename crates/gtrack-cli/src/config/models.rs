use gtrack::engine::config as core_config;
use std::path::PathBuf;

/// Optional images written after the run.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct DiagnosticPaths {
    pub tod: Option<PathBuf>,
    pub fractions: Option<PathBuf>,
    pub residual: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub dwi_path: PathBuf,
    pub gradients_path: PathBuf,
    pub mask_path: Option<PathBuf>,
    pub output_path: PathBuf,
    pub wm_response: PathBuf,
    pub iso_responses: Vec<PathBuf>,
    pub diagnostics: DiagnosticPaths,
    pub trend_path: Option<PathBuf>,
    pub core_config: core_config::SamplerConfig,
}
