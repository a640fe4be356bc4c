use crate::cli::TrackArgs;
use crate::config::{AppConfig, build_config};
use crate::error::{CliError, Result};
use crate::io::{gradients, nifti_io};
use crate::utils::progress::CliProgressHandler;
use gtrack::{
    core::{
        image::{domain::SamplingDomain, volume::Volume},
        io::tck::TckWriter,
        response::ResponseKernels,
    },
    engine::{error::EngineError, progress::ProgressReporter},
    workflows::{self, track::TrackingInputs},
};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::{info, warn};

pub fn run(args: TrackArgs, threads: Option<usize>) -> Result<()> {
    info!("Merging configuration from file and CLI arguments...");
    let config = build_config(&args, threads)?;
    execute(&config, CliProgressHandler::new())
}

fn execute(config: &AppConfig, progress_handler: CliProgressHandler) -> Result<()> {
    let inputs = load_inputs(config)?;

    let properties = vec![
        (
            "generator".to_string(),
            format!("gtrack {}", env!("CARGO_PKG_VERSION")),
        ),
        (
            "particle_length".to_string(),
            config.core_config.particle_length.to_string(),
        ),
        (
            "iterations".to_string(),
            config.core_config.iterations.to_string(),
        ),
    ];
    let mut sink = TckWriter::create_with_properties(&config.output_path, properties).map_err(
        |e| CliError::FileWriting {
            path: config.output_path.clone(),
            source: e.into(),
        },
    )?;
    let trend = match &config.trend_path {
        Some(path) => {
            info!("Writing the sampling trend to {:?}", path);
            let writer: Box<dyn Write + Send> = Box::new(BufWriter::new(File::create(path)?));
            Some(writer)
        }
        None => None,
    };

    let reporter = ProgressReporter::with_callback(progress_handler.get_callback());

    println!("Starting global tractography...");
    info!("Invoking the core tracking workflow...");
    let result = workflows::track::run(inputs, &config.core_config, &mut sink, trend, &reporter)?;
    sink.finish().map_err(|e| CliError::FileWriting {
        path: config.output_path.clone(),
        source: e.into(),
    })?;

    let diagnostics = [
        (&config.diagnostics.tod, &result.outputs.tod),
        (&config.diagnostics.fractions, &result.outputs.fractions),
        (&config.diagnostics.residual, &result.outputs.residual),
    ];
    for (path, volume) in diagnostics {
        if let Some(path) = path {
            write_image(path, volume)?;
        }
    }

    if result.track_count == 0 {
        warn!("Workflow completed but no particle survived the run.");
        println!("Warning: gtrack finished but produced no tracks.");
    } else {
        println!(
            "✓ {} tracks built from {} particles written to: {}",
            result.track_count,
            result.particle_count,
            config.output_path.display()
        );
    }
    println!("{}", result.stats);
    Ok(())
}

fn load_inputs(config: &AppConfig) -> Result<TrackingInputs> {
    info!("Loading diffusion-weighted image from {:?}", &config.dwi_path);
    let dwi = nifti_io::read_volume(&config.dwi_path).map_err(|e| CliError::FileParsing {
        path: config.dwi_path.clone(),
        source: e.into(),
    })?;

    info!("Loading gradient table from {:?}", &config.gradients_path);
    let gradients =
        gradients::read_gradients(&config.gradients_path).map_err(|e| CliError::FileParsing {
            path: config.gradients_path.clone(),
            source: e.into(),
        })?;
    if gradients.len() != dwi.components() {
        return Err(CliError::Argument(format!(
            "the gradient table has {} entries but the image has {} volumes",
            gradients.len(),
            dwi.components()
        )));
    }

    let domain = match &config.mask_path {
        Some(path) => {
            info!("Loading mask from {:?}", path);
            let mask = nifti_io::read_mask(path).map_err(|e| CliError::FileParsing {
                path: path.clone(),
                source: e.into(),
            })?;
            SamplingDomain::from_mask(dwi.geometry().clone(), &mask).map_err(EngineError::from)?
        }
        None => SamplingDomain::whole_image(dwi.geometry().clone()),
    };
    info!(
        voxels = domain.n_voxels(),
        volume_mm3 = domain.volume(),
        "Sampling domain ready."
    );

    let kernels = ResponseKernels::load(&config.wm_response, &config.iso_responses)
        .map_err(EngineError::from)?;

    Ok(TrackingInputs {
        dwi,
        gradients,
        domain,
        kernels,
    })
}

fn write_image(path: &Path, volume: &Volume<f64>) -> Result<()> {
    info!("Writing diagnostic image to {:?}", path);
    nifti_io::write_volume(path, volume).map_err(|e| CliError::FileWriting {
        path: path.to_path_buf(),
        source: e.into(),
    })
}
