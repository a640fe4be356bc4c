use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

const HELP_TEMPLATE: &str = "\
{before-help}{name} {version}
{author-with-newline}{about-with-newline}
{usage-heading} {usage}

{all-args}{after-help}
";

#[derive(Parser, Debug)]
#[command(
    author = "The gtrack developers",
    version,
    about = "gtrack - Particle-based global tractography of diffusion MRI data.",
    help_template = HELP_TEMPLATE,
)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity level (-v for INFO, -vv for DEBUG, -vvv for TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all log output except for errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Write logs to a specified file in addition to the console output
    #[arg(long, global = true, value_name = "PATH")]
    pub log_file: Option<PathBuf>,

    /// Number of sampling threads.
    /// Defaults to the number of available logical cores.
    #[arg(short = 'j', long, global = true, value_name = "NUM")]
    pub threads: Option<usize>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Reconstruct the fibre tracks of a diffusion-weighted image by global tractography.
    Track(TrackArgs),
}

/// Arguments for the `track` subcommand.
#[derive(Args, Debug, Clone)]
pub struct TrackArgs {
    // --- Inputs ---
    /// Diffusion-weighted image (4-D NIfTI, `.nii` or `.nii.gz`).
    #[arg(short = 'i', long, required = true, value_name = "PATH")]
    pub dwi: PathBuf,

    /// Gradient table with one `x y z b` row per volume.
    #[arg(short = 'g', long = "grad", required = true, value_name = "PATH")]
    pub gradients: PathBuf,

    /// Restrict sampling to the non-zero voxels of this 3-D NIfTI image.
    #[arg(short, long, value_name = "PATH")]
    pub mask: Option<PathBuf>,

    /// Output track file (`.tck`).
    #[arg(short, long, required = true, value_name = "PATH")]
    pub output: PathBuf,

    /// Run configuration in TOML format.
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    // --- Response Overrides ---
    /// White-matter response: one row of zonal SH coefficients per shell.
    #[arg(long, value_name = "PATH")]
    pub wm_response: Option<PathBuf>,

    /// Isotropic tissue response: one value per shell. Can be given multiple times.
    #[arg(long = "iso-response", value_name = "PATH")]
    pub iso_responses: Vec<PathBuf>,

    // --- Model Overrides ---
    /// Particle half-length in mm.
    #[arg(long, value_name = "FLOAT")]
    pub length: Option<f64>,

    /// Signal contribution of one particle.
    #[arg(long, value_name = "FLOAT")]
    pub weight: Option<f64>,

    /// Expected number of particles per mm^3.
    #[arg(long, value_name = "FLOAT")]
    pub density: Option<f64>,

    /// Connection potential (reward per link).
    #[arg(long, value_name = "FLOAT")]
    pub cpot: Option<f64>,

    /// Particle potential (data-fit penalty per particle).
    #[arg(long, value_name = "FLOAT")]
    pub ppot: Option<f64>,

    // --- Sampling Overrides ---
    /// Number of proposals over the whole run.
    #[arg(short = 'n', long, value_name = "INT")]
    pub iterations: Option<u64>,

    /// Initial annealing temperature.
    #[arg(long, value_name = "FLOAT")]
    pub t0: Option<f64>,

    /// Final annealing temperature.
    #[arg(long, value_name = "FLOAT")]
    pub t1: Option<f64>,

    /// Seed of the per-worker random generators.
    #[arg(long, value_name = "INT")]
    pub seed: Option<u64>,

    // --- Diagnostic Outputs ---
    /// Write the fitted track orientation distribution (SH image).
    #[arg(long, value_name = "PATH")]
    pub tod: Option<PathBuf>,

    /// Write the isotropic tissue fractions.
    #[arg(long, value_name = "PATH")]
    pub fractions: Option<PathBuf>,

    /// Write the per-voxel residual energy.
    #[arg(long, value_name = "PATH")]
    pub residual: Option<PathBuf>,

    /// Write one CSV row of energies and acceptance rates per temperature update.
    #[arg(long, value_name = "PATH")]
    pub trend: Option<PathBuf>,

    /// Set a specific configuration value, overriding the config file.
    /// Can be used multiple times. Example: -S sampling.proposals.birth=0.3
    #[arg(short = 'S', long = "set", value_name = "KEY=VALUE", num_args(0..))]
    pub set_values: Vec<String>,
}
