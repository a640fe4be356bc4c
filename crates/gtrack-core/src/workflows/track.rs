use crate::core::gradient::GradientTable;
use crate::core::image::domain::SamplingDomain;
use crate::core::image::volume::Volume;
use crate::core::io::traits::TrackSink;
use crate::core::response::{ForwardModel, ResponseKernels};
use crate::engine::config::SamplerConfig;
use crate::engine::energy::{
    EnergyComputer, EnergySum, ExternalEnergy, ExternalModel, ExternalOutputs, InternalEnergy,
};
use crate::engine::error::EngineError;
use crate::engine::grid::ParticleGrid;
use crate::engine::progress::{Progress, ProgressReporter};
use crate::engine::sampler::{MhSampler, SharedState};
use crate::engine::stats::{Stats, StatsSnapshot};
use rand::Rng;
use std::io::Write;
use tracing::{debug, info, instrument};

/// Everything a run reads, already loaded and in memory.
#[derive(Debug, Clone)]
pub struct TrackingInputs {
    /// Diffusion-weighted image, one component per gradient table row.
    pub dwi: Volume<f64>,
    pub gradients: GradientTable,
    pub domain: SamplingDomain,
    pub kernels: ResponseKernels,
}

#[derive(Debug, Clone)]
pub struct TrackingResult {
    pub track_count: usize,
    pub particle_count: usize,
    pub outputs: ExternalOutputs,
    /// Counters and energies at the end of the run.
    pub stats: StatsSnapshot,
}

#[instrument(skip_all, name = "tracking_workflow")]
pub fn run<S: TrackSink>(
    inputs: TrackingInputs,
    config: &SamplerConfig,
    sink: &mut S,
    trend: Option<Box<dyn Write + Send>>,
    reporter: &ProgressReporter,
) -> Result<TrackingResult, EngineError> {
    // === Phase 1: Setup ===
    reporter.report(Progress::PhaseStart { name: "Setup" });
    info!("Building the forward model and the initial fit.");
    config.validate()?;

    let TrackingInputs {
        dwi,
        gradients,
        domain,
        kernels,
    } = inputs;
    if domain.n_voxels() == 0 {
        return Err(EngineError::Initialization(
            "the sampling domain contains no voxels".to_string(),
        ));
    }

    let forward = ForwardModel::build(&kernels, &gradients)?;
    info!(
        volumes = forward.n_volumes(),
        shells = gradients.shells().len(),
        lmax = forward.lmax(),
        isotropic = forward.n_isotropic(),
        "Forward model ready."
    );
    let model = ExternalModel::new(dwi, &domain, forward, config)?;

    let mut grid = ParticleGrid::new(domain.geometry(), config.particle_length);
    let lock = SharedState::lock_for(config);
    let mut stats = Stats::from_config(config);
    if let Some(writer) = trend {
        stats = stats.with_trend_log(writer);
    }
    stats.add_external(model.total_energy(0));

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(config.threads)
        .build()?;
    let workers = pool.current_num_threads();
    let seed = config.seed.unwrap_or_else(|| rand::thread_rng().r#gen());
    info!(
        workers,
        seed,
        expected_particles = config.density * domain.volume(),
        "Setup complete."
    );
    reporter.report(Progress::Message(format!(
        "{} worker(s), seed {}",
        workers, seed
    )));
    reporter.report(Progress::PhaseFinish);

    // === Phase 2: Sampling ===
    reporter.report(Progress::PhaseStart { name: "Sampling" });
    reporter.report(Progress::SamplingStart {
        total_updates: config.total_updates(),
    });

    let base = EnergySum::new(
        Box::new(InternalEnergy::new(
            &grid,
            &stats,
            config.connection_potential,
        )),
        config.lambda_internal,
        Box::new(ExternalEnergy::new(&model, &stats)),
        config.lambda_external,
    );
    let energies: Vec<Box<dyn EnergyComputer + '_>> = (0..workers).map(|_| base.fork()).collect();
    let shared = SharedState {
        config,
        domain: &domain,
        grid: &grid,
        lock: &lock,
        stats: &stats,
    };

    pool.scope(|scope| {
        for (i, energy) in energies.into_iter().enumerate() {
            scope.spawn(move |_| {
                let mut sampler = MhSampler::new(shared, energy, seed.wrapping_add(i as u64));
                sampler.run(reporter);
                debug!(worker = i, "Worker finished.");
            });
        }
    });
    drop(base);

    reporter.report(Progress::SamplingFinish);
    let snapshot = stats.snapshot();
    info!(
        particles = grid.len(),
        internal_energy = snapshot.internal_energy,
        external_energy = snapshot.external_energy,
        temperature = snapshot.temperature,
        "Sampling complete."
    );
    reporter.report(Progress::PhaseFinish);

    // === Phase 3: Export ===
    reporter.report(Progress::PhaseStart { name: "Export" });
    let particle_count = grid.len();
    let track_count = grid
        .export_tracks(sink)
        .map_err(|e| EngineError::TrackOutput(e.to_string()))?;
    stats.flush().map_err(csv::Error::from)?;
    let outputs = model.into_outputs()?;
    reporter.report(Progress::PhaseFinish);

    info!(
        tracks = track_count,
        particles = particle_count,
        "Workflow complete."
    );
    Ok(TrackingResult {
        track_count,
        particle_count,
        outputs,
        stats: snapshot,
    })
}
