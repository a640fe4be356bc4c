use super::defaults::DefaultsConfig;
use super::file::{FileConfig, FileInterpolation, FileProposalConfig};
use super::models::{AppConfig, DiagnosticPaths};
use crate::cli::TrackArgs;
use crate::error::{CliError, Result};
use gtrack::engine::config as core_config;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Merges command-line arguments, the optional config file and the built-in defaults.
///
/// Precedence is command line, then `--set` values, then the file, then defaults.
/// Relative paths inside the config file are resolved against the file's directory.
pub fn build_config(args: &TrackArgs, threads: Option<usize>) -> Result<AppConfig> {
    let defaults = DefaultsConfig::default();

    let (file_config, base_dir) = match &args.config {
        Some(path) => (
            FileConfig::from_file(path)?,
            path.parent().map(Path::to_path_buf),
        ),
        None => (FileConfig::default(), None),
    };
    let mut file_config = apply_set_values(file_config, &args.set_values)?;
    let from_file = |path: PathBuf| match &base_dir {
        Some(dir) if path.is_relative() => dir.join(path),
        _ => path,
    };

    let response = file_config.response.take().unwrap_or_default();
    let wm_response = args
        .wm_response
        .clone()
        .or_else(|| response.wm.map(&from_file))
        .ok_or_else(|| {
            CliError::Config(
                "A white-matter response is required either in the config file (`response.wm`) or via --wm-response."
                    .to_string(),
            )
        })?;
    let iso_responses = if args.iso_responses.is_empty() {
        response
            .isotropic
            .unwrap_or_default()
            .into_iter()
            .map(&from_file)
            .collect()
    } else {
        args.iso_responses.clone()
    };

    let particles = file_config.particles.take().unwrap_or_default();
    let energy = file_config.energy.take().unwrap_or_default();
    let sampling = file_config.sampling.take().unwrap_or_default();
    let output = file_config.output.take().unwrap_or_default();

    let mut builder = core_config::SamplerConfigBuilder::new()
        .particle_length(
            args.length
                .or(particles.length)
                .unwrap_or(defaults.particle_length),
        )
        .particle_weight(
            args.weight
                .or(particles.weight)
                .unwrap_or(defaults.particle_weight),
        )
        .density(args.density.or(particles.density).unwrap_or(defaults.density))
        .connection_potential(
            args.cpot
                .or(energy.connection_potential)
                .unwrap_or(defaults.connection_potential),
        )
        .particle_potential(
            args.ppot
                .or(energy.particle_potential)
                .unwrap_or(defaults.particle_potential),
        )
        .lambda_internal(energy.lambda_internal.unwrap_or(defaults.lambda_internal))
        .lambda_external(energy.lambda_external.unwrap_or(defaults.lambda_external))
        .temperatures(
            args.t0.or(sampling.t0).unwrap_or(defaults.t0),
            args.t1.or(sampling.t1).unwrap_or(defaults.t1),
        )
        .iterations(
            args.iterations
                .or(sampling.iterations)
                .unwrap_or(defaults.iterations),
        )
        .proposals(
            sampling
                .proposals
                .as_ref()
                .map(FileProposalConfig::resolve)
                .unwrap_or_default(),
        )
        .interpolation(
            sampling
                .interpolation
                .map(Into::into)
                .unwrap_or(core_config::Interpolation::Trilinear),
        )
        .threads(threads.unwrap_or(0));

    if let Some(interval) = sampling.update_interval {
        builder = builder.update_interval(interval);
    }
    if let Some(sigma) = sampling.sigma_position {
        builder = builder.sigma_position(sigma);
    }
    if let Some(sigma) = sampling.sigma_direction {
        builder = builder.sigma_direction(sigma);
    }
    if let Some(seed) = args.seed.or(sampling.seed) {
        builder = builder.seed(seed);
    }
    let core_config = builder
        .build()
        .map_err(|e| CliError::Config(e.to_string()))?;

    let diagnostics = DiagnosticPaths {
        tod: args.tod.clone().or_else(|| output.tod.map(&from_file)),
        fractions: args
            .fractions
            .clone()
            .or_else(|| output.fractions.map(&from_file)),
        residual: args
            .residual
            .clone()
            .or_else(|| output.residual.map(&from_file)),
    };

    Ok(AppConfig {
        dwi_path: args.dwi.clone(),
        gradients_path: args.gradients.clone(),
        mask_path: args.mask.clone(),
        output_path: args.output.clone(),
        wm_response,
        iso_responses,
        diagnostics,
        trend_path: args.trend.clone().or_else(|| output.trend.map(&from_file)),
        core_config,
    })
}

fn parse_value<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| {
        CliError::Config(format!(
            "Invalid value for {}: '{}' ({} expected)",
            key,
            value,
            std::any::type_name::<T>()
        ))
    })
}

fn apply_set_values(mut config: FileConfig, set_values: &[String]) -> Result<FileConfig> {
    for kv_pair in set_values {
        let Some((key, value)) = kv_pair.split_once('=') else {
            return Err(CliError::Config(format!(
                "Invalid --set format: '{}'. Expected KEY=VALUE.",
                kv_pair
            )));
        };
        let key = key.trim();
        let path = || Some(PathBuf::from(value.trim()));

        let response = &mut config.response;
        let particles = &mut config.particles;
        let energy = &mut config.energy;
        let sampling = &mut config.sampling;
        let output = &mut config.output;
        match key {
            "response.wm" => response.get_or_insert_with(Default::default).wm = path(),
            "response.isotropic" => {
                response.get_or_insert_with(Default::default).isotropic =
                    Some(value.split(',').map(|p| PathBuf::from(p.trim())).collect());
            }
            "particles.length" => {
                particles.get_or_insert_with(Default::default).length =
                    Some(parse_value(key, value)?);
            }
            "particles.weight" => {
                particles.get_or_insert_with(Default::default).weight =
                    Some(parse_value(key, value)?);
            }
            "particles.density" => {
                particles.get_or_insert_with(Default::default).density =
                    Some(parse_value(key, value)?);
            }
            "energy.connection-potential" => {
                energy.get_or_insert_with(Default::default).connection_potential =
                    Some(parse_value(key, value)?);
            }
            "energy.particle-potential" => {
                energy.get_or_insert_with(Default::default).particle_potential =
                    Some(parse_value(key, value)?);
            }
            "energy.lambda-internal" => {
                energy.get_or_insert_with(Default::default).lambda_internal =
                    Some(parse_value(key, value)?);
            }
            "energy.lambda-external" => {
                energy.get_or_insert_with(Default::default).lambda_external =
                    Some(parse_value(key, value)?);
            }
            "sampling.iterations" => {
                sampling.get_or_insert_with(Default::default).iterations =
                    Some(parse_value(key, value)?);
            }
            "sampling.update-interval" => {
                sampling.get_or_insert_with(Default::default).update_interval =
                    Some(parse_value(key, value)?);
            }
            "sampling.t0" => {
                sampling.get_or_insert_with(Default::default).t0 = Some(parse_value(key, value)?);
            }
            "sampling.t1" => {
                sampling.get_or_insert_with(Default::default).t1 = Some(parse_value(key, value)?);
            }
            "sampling.seed" => {
                sampling.get_or_insert_with(Default::default).seed = Some(parse_value(key, value)?);
            }
            "sampling.sigma-position" => {
                sampling.get_or_insert_with(Default::default).sigma_position =
                    Some(parse_value(key, value)?);
            }
            "sampling.sigma-direction" => {
                sampling.get_or_insert_with(Default::default).sigma_direction =
                    Some(parse_value(key, value)?);
            }
            "sampling.interpolation" if value.trim() == "trilinear" => {
                sampling.get_or_insert_with(Default::default).interpolation =
                    Some(FileInterpolation::Trilinear);
            }
            "sampling.hanning-width" => {
                sampling.get_or_insert_with(Default::default).interpolation =
                    Some(FileInterpolation::Hanning {
                        width: parse_value(key, value)?,
                    });
            }
            "sampling.proposals.birth"
            | "sampling.proposals.death"
            | "sampling.proposals.rand-shift"
            | "sampling.proposals.opt-shift"
            | "sampling.proposals.connect" => {
                let probability = Some(parse_value(key, value)?);
                let proposals = sampling
                    .get_or_insert_with(Default::default)
                    .proposals
                    .get_or_insert_with(Default::default);
                match key.trim_start_matches("sampling.proposals.") {
                    "birth" => proposals.birth = probability,
                    "death" => proposals.death = probability,
                    "rand-shift" => proposals.rand_shift = probability,
                    "opt-shift" => proposals.opt_shift = probability,
                    _ => proposals.connect = probability,
                }
            }
            "output.tod" => output.get_or_insert_with(Default::default).tod = path(),
            "output.fractions" => output.get_or_insert_with(Default::default).fractions = path(),
            "output.residual" => output.get_or_insert_with(Default::default).residual = path(),
            "output.trend" => output.get_or_insert_with(Default::default).trend = path(),
            _ => {
                return Err(CliError::Config(format!(
                    "Unsupported configuration key for --set: '{}'",
                    key
                )));
            }
        }
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn base_track_args() -> TrackArgs {
        TrackArgs {
            dwi: PathBuf::from("dwi.nii.gz"),
            gradients: PathBuf::from("grad.txt"),
            mask: None,
            output: PathBuf::from("out.tck"),
            config: None,
            wm_response: Some(PathBuf::from("wm.txt")),
            iso_responses: vec![],
            length: None,
            weight: None,
            density: None,
            cpot: None,
            ppot: None,
            iterations: None,
            t0: None,
            t1: None,
            seed: None,
            tod: None,
            fractions: None,
            residual: None,
            trend: None,
            set_values: vec![],
        }
    }

    fn write_config(dir: &Path, content: &str) -> PathBuf {
        let path = dir.join("run.toml");
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn defaults_fill_everything_not_given() {
        let app = build_config(&base_track_args(), None).expect("build ok");
        let cfg = app.core_config;
        let defaults = DefaultsConfig::default();

        assert_eq!(cfg.particle_length, defaults.particle_length);
        assert_eq!(cfg.particle_weight, defaults.particle_weight);
        assert_eq!(cfg.connection_potential, defaults.connection_potential);
        assert_eq!(cfg.particle_potential, defaults.particle_potential);
        assert_eq!(cfg.iterations, defaults.iterations);
        assert_eq!((cfg.t0, cfg.t1), (defaults.t0, defaults.t1));
        assert_eq!(cfg.proposals, core_config::ProposalProbabilities::default());
        assert_eq!(cfg.threads, 0);
        assert_eq!(cfg.seed, None);
        assert_eq!(app.wm_response, PathBuf::from("wm.txt"));
        assert!(app.iso_responses.is_empty());
        assert_eq!(app.diagnostics, DiagnosticPaths::default());
    }

    #[test]
    fn missing_wm_response_is_a_config_error() {
        let mut args = base_track_args();
        args.wm_response = None;
        assert!(matches!(build_config(&args, None), Err(CliError::Config(_))));
    }

    #[test]
    fn file_values_are_used_and_relative_paths_follow_the_file() {
        let dir = tempdir().unwrap();
        let config_path = write_config(
            dir.path(),
            r#"
            [response]
            wm = "responses/wm.txt"
            isotropic = ["/abs/csf.txt"]

            [particles]
            length = 2.0
            density = 0.5

            [sampling]
            iterations = 4000
            seed = 9
            interpolation = { type = "hanning", width = 1.5 }

            [output]
            residual = "eext.nii"
            "#,
        );
        let mut args = base_track_args();
        args.wm_response = None;
        args.config = Some(config_path);

        let app = build_config(&args, Some(3)).unwrap();
        assert_eq!(app.wm_response, dir.path().join("responses/wm.txt"));
        assert_eq!(app.iso_responses, vec![PathBuf::from("/abs/csf.txt")]);
        assert_eq!(app.diagnostics.residual, Some(dir.path().join("eext.nii")));

        let cfg = app.core_config;
        assert_eq!(cfg.particle_length, 2.0);
        assert_eq!(cfg.sigma_position, 0.5);
        assert_eq!(cfg.density, 0.5);
        assert_eq!(cfg.iterations, 4000);
        assert_eq!(cfg.update_interval, 4);
        assert_eq!(cfg.seed, Some(9));
        assert_eq!(cfg.threads, 3);
        assert_eq!(cfg.interpolation, core_config::Interpolation::Hanning { width: 1.5 });
    }

    #[test]
    fn cli_overrides_file_values() {
        let dir = tempdir().unwrap();
        let config_path = write_config(
            dir.path(),
            r#"
            [particles]
            weight = 0.2

            [energy]
            connection-potential = 2.0

            [output]
            tod = "tod.nii"
            "#,
        );
        let mut args = base_track_args();
        args.config = Some(config_path);
        args.weight = Some(0.05);
        args.cpot = Some(0.25);
        args.tod = Some(PathBuf::from("/tmp/cli_tod.nii"));

        let app = build_config(&args, None).unwrap();
        assert_eq!(app.core_config.particle_weight, 0.05);
        assert_eq!(app.core_config.connection_potential, 0.25);
        assert_eq!(app.diagnostics.tod, Some(PathBuf::from("/tmp/cli_tod.nii")));
    }

    #[test]
    fn set_values_override_the_file() {
        let dir = tempdir().unwrap();
        let config_path = write_config(
            dir.path(),
            r#"
            [energy]
            lambda-internal = 3.0

            [sampling.proposals]
            birth = 0.4
            "#,
        );
        let mut args = base_track_args();
        args.config = Some(config_path);
        args.set_values = vec![
            "energy.lambda-internal=0.5".to_string(),
            "sampling.proposals.birth=0.25".to_string(),
            "sampling.hanning-width=2".to_string(),
            "sampling.update-interval=500".to_string(),
            "output.trend=trend.csv".to_string(),
        ];

        let app = build_config(&args, None).unwrap();
        let cfg = app.core_config;
        assert_eq!(cfg.lambda_internal, 0.5);
        assert_eq!(cfg.proposals.birth, 0.25);
        assert_eq!(cfg.update_interval, 500);
        assert_eq!(cfg.interpolation, core_config::Interpolation::Hanning { width: 2.0 });
        assert_eq!(app.trend_path, Some(dir.path().join("trend.csv")));
    }

    #[test]
    fn invalid_set_values_are_rejected() {
        let mut args = base_track_args();
        args.set_values = vec!["particles.length".to_string()];
        assert!(matches!(build_config(&args, None), Err(CliError::Config(_))));

        args.set_values = vec!["particles.length=long".to_string()];
        assert!(matches!(build_config(&args, None), Err(CliError::Config(_))));

        args.set_values = vec!["tracking.mode=fast".to_string()];
        let err = build_config(&args, None).unwrap_err();
        assert!(err.to_string().contains("tracking.mode"));
    }

    #[test]
    fn probabilities_not_summing_to_one_are_a_config_error() {
        let mut args = base_track_args();
        args.set_values = vec!["sampling.proposals.connect=0.9".to_string()];
        let err = build_config(&args, None).unwrap_err();
        assert!(matches!(err, CliError::Config(ref msg) if msg.contains("sum")));
    }
}
