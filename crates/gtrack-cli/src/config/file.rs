use crate::error::{CliError, Result};
use gtrack::engine::config as core_config;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct FileResponseConfig {
    pub wm: Option<PathBuf>,
    pub isotropic: Option<Vec<PathBuf>>,
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct FileParticleConfig {
    pub length: Option<f64>,
    pub weight: Option<f64>,
    pub density: Option<f64>,
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct FileEnergyConfig {
    pub connection_potential: Option<f64>,
    pub particle_potential: Option<f64>,
    pub lambda_internal: Option<f64>,
    pub lambda_external: Option<f64>,
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct FileProposalConfig {
    pub birth: Option<f64>,
    pub death: Option<f64>,
    pub rand_shift: Option<f64>,
    pub opt_shift: Option<f64>,
    pub connect: Option<f64>,
}

impl FileProposalConfig {
    /// Fills unset probabilities from the built-in defaults.
    pub fn resolve(&self) -> core_config::ProposalProbabilities {
        let defaults = core_config::ProposalProbabilities::default();
        core_config::ProposalProbabilities {
            birth: self.birth.unwrap_or(defaults.birth),
            death: self.death.unwrap_or(defaults.death),
            rand_shift: self.rand_shift.unwrap_or(defaults.rand_shift),
            opt_shift: self.opt_shift.unwrap_or(defaults.opt_shift),
            connect: self.connect.unwrap_or(defaults.connect),
        }
    }
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(rename_all = "kebab-case", tag = "type")]
pub enum FileInterpolation {
    Trilinear,
    Hanning { width: f64 },
}

impl From<FileInterpolation> for core_config::Interpolation {
    fn from(p: FileInterpolation) -> Self {
        match p {
            FileInterpolation::Trilinear => core_config::Interpolation::Trilinear,
            FileInterpolation::Hanning { width } => core_config::Interpolation::Hanning { width },
        }
    }
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct FileSamplingConfig {
    pub iterations: Option<u64>,
    pub update_interval: Option<u64>,
    pub t0: Option<f64>,
    pub t1: Option<f64>,
    pub seed: Option<u64>,
    pub sigma_position: Option<f64>,
    pub sigma_direction: Option<f64>,
    pub interpolation: Option<FileInterpolation>,
    pub proposals: Option<FileProposalConfig>,
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct FileOutputConfig {
    pub tod: Option<PathBuf>,
    pub fractions: Option<PathBuf>,
    pub residual: Option<PathBuf>,
    pub trend: Option<PathBuf>,
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct FileConfig {
    pub response: Option<FileResponseConfig>,
    pub particles: Option<FileParticleConfig>,
    pub energy: Option<FileEnergyConfig>,
    pub sampling: Option<FileSamplingConfig>,
    pub output: Option<FileOutputConfig>,
}

impl FileConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        debug!("Loading configuration from file: {:?}", path);
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content).map_err(|e| CliError::FileParsing {
            path: path.to_path_buf(),
            source: e.into(),
        })
    }

    pub fn from_toml(content: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(content)
    }
}
