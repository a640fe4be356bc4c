use thiserror::Error;

const PROBABILITY_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Error, PartialEq, Clone)]
pub enum ConfigError {
    #[error("Missing required parameter: {0}")]
    MissingParameter(&'static str),

    #[error("Invalid value for '{name}': {reason}")]
    InvalidValue { name: &'static str, reason: String },

    #[error("Proposal probabilities must be non-negative and sum to 1 (sum = {sum})")]
    InvalidProbabilities { sum: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MoveKind {
    Birth,
    Death,
    RandShift,
    OptShift,
    Connect,
}

impl MoveKind {
    pub const ALL: [MoveKind; 5] = [
        MoveKind::Birth,
        MoveKind::Death,
        MoveKind::RandShift,
        MoveKind::OptShift,
        MoveKind::Connect,
    ];

    #[inline]
    pub(crate) fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            MoveKind::Birth => "birth",
            MoveKind::Death => "death",
            MoveKind::RandShift => "randshift",
            MoveKind::OptShift => "optshift",
            MoveKind::Connect => "connect",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProposalProbabilities {
    pub birth: f64,
    pub death: f64,
    pub rand_shift: f64,
    pub opt_shift: f64,
    pub connect: f64,
}

impl Default for ProposalProbabilities {
    fn default() -> Self {
        Self {
            birth: 0.25,
            death: 0.05,
            rand_shift: 0.25,
            opt_shift: 0.10,
            connect: 0.35,
        }
    }
}

impl ProposalProbabilities {
    pub fn get(&self, kind: MoveKind) -> f64 {
        match kind {
            MoveKind::Birth => self.birth,
            MoveKind::Death => self.death,
            MoveKind::RandShift => self.rand_shift,
            MoveKind::OptShift => self.opt_shift,
            MoveKind::Connect => self.connect,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let values = MoveKind::ALL.map(|k| self.get(k));
        let sum: f64 = values.iter().sum();
        if values.iter().any(|p| !p.is_finite() || *p < 0.0)
            || (sum - 1.0).abs() > PROBABILITY_TOLERANCE
        {
            return Err(ConfigError::InvalidProbabilities { sum });
        }
        Ok(())
    }

    pub fn select(&self, u: f64) -> MoveKind {
        let mut acc = 0.0;
        for kind in MoveKind::ALL {
            acc += self.get(kind);
            if u < acc {
                return kind;
            }
        }
        MoveKind::ALL
            .into_iter()
            .rev()
            .find(|&k| self.get(k) > 0.0)
            .unwrap_or(MoveKind::Connect)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Interpolation {
    Trilinear,
    Hanning { width: f64 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct SamplerConfig {
    pub particle_length: f64,
    pub particle_weight: f64,
    pub density: f64,
    pub proposals: ProposalProbabilities,
    pub connection_potential: f64,
    pub particle_potential: f64,
    pub lambda_internal: f64,
    pub lambda_external: f64,
    pub sigma_position: f64,
    pub sigma_direction: f64,
    pub t0: f64,
    pub t1: f64,
    pub iterations: u64,
    pub update_interval: u64,
    pub interpolation: Interpolation,
    pub threads: usize,
    pub seed: Option<u64>,
}

impl SamplerConfig {
    pub fn total_updates(&self) -> u64 {
        (self.iterations / self.update_interval).max(1)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        positive("particle_length", self.particle_length)?;
        positive("particle_weight", self.particle_weight)?;
        positive("density", self.density)?;
        positive("t0", self.t0)?;
        positive("t1", self.t1)?;
        non_negative("connection_potential", self.connection_potential)?;
        non_negative("particle_potential", self.particle_potential)?;
        non_negative("lambda_internal", self.lambda_internal)?;
        non_negative("lambda_external", self.lambda_external)?;
        non_negative("sigma_position", self.sigma_position)?;
        non_negative("sigma_direction", self.sigma_direction)?;
        if self.iterations == 0 {
            return Err(ConfigError::InvalidValue {
                name: "iterations",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.update_interval == 0 || self.update_interval > self.iterations {
            return Err(ConfigError::InvalidValue {
                name: "update_interval",
                reason: format!("must lie in 1..={}", self.iterations),
            });
        }
        if let Interpolation::Hanning { width } = self.interpolation {
            positive("interpolation.width", width)?;
        }
        self.proposals.validate()
    }
}

fn positive(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::InvalidValue {
            name,
            reason: format!("{} is not a positive number", value),
        })
    }
}

fn non_negative(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ConfigError::InvalidValue {
            name,
            reason: format!("{} is negative or not finite", value),
        })
    }
}

#[derive(Default)]
pub struct SamplerConfigBuilder {
    particle_length: Option<f64>,
    particle_weight: Option<f64>,
    density: Option<f64>,
    proposals: Option<ProposalProbabilities>,
    connection_potential: Option<f64>,
    particle_potential: Option<f64>,
    lambda_internal: Option<f64>,
    lambda_external: Option<f64>,
    sigma_position: Option<f64>,
    sigma_direction: Option<f64>,
    t0: Option<f64>,
    t1: Option<f64>,
    iterations: Option<u64>,
    update_interval: Option<u64>,
    interpolation: Option<Interpolation>,
    threads: Option<usize>,
    seed: Option<u64>,
}

impl SamplerConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn particle_length(mut self, length: f64) -> Self {
        self.particle_length = Some(length);
        self
    }
    pub fn particle_weight(mut self, weight: f64) -> Self {
        self.particle_weight = Some(weight);
        self
    }
    pub fn density(mut self, density: f64) -> Self {
        self.density = Some(density);
        self
    }
    pub fn proposals(mut self, proposals: ProposalProbabilities) -> Self {
        self.proposals = Some(proposals);
        self
    }
    pub fn connection_potential(mut self, cpot: f64) -> Self {
        self.connection_potential = Some(cpot);
        self
    }
    pub fn particle_potential(mut self, ppot: f64) -> Self {
        self.particle_potential = Some(ppot);
        self
    }
    pub fn lambda_internal(mut self, lambda: f64) -> Self {
        self.lambda_internal = Some(lambda);
        self
    }
    pub fn lambda_external(mut self, lambda: f64) -> Self {
        self.lambda_external = Some(lambda);
        self
    }
    pub fn sigma_position(mut self, sigma: f64) -> Self {
        self.sigma_position = Some(sigma);
        self
    }
    pub fn sigma_direction(mut self, sigma: f64) -> Self {
        self.sigma_direction = Some(sigma);
        self
    }
    pub fn temperatures(mut self, t0: f64, t1: f64) -> Self {
        self.t0 = Some(t0);
        self.t1 = Some(t1);
        self
    }
    pub fn iterations(mut self, iterations: u64) -> Self {
        self.iterations = Some(iterations);
        self
    }
    pub fn update_interval(mut self, interval: u64) -> Self {
        self.update_interval = Some(interval);
        self
    }
    pub fn interpolation(mut self, interpolation: Interpolation) -> Self {
        self.interpolation = Some(interpolation);
        self
    }
    pub fn threads(mut self, threads: usize) -> Self {
        self.threads = Some(threads);
        self
    }
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn build(self) -> Result<SamplerConfig, ConfigError> {
        let particle_length = self
            .particle_length
            .ok_or(ConfigError::MissingParameter("particle_length"))?;
        let iterations = self
            .iterations
            .ok_or(ConfigError::MissingParameter("iterations"))?;

        let config = SamplerConfig {
            particle_length,
            particle_weight: self
                .particle_weight
                .ok_or(ConfigError::MissingParameter("particle_weight"))?,
            density: self
                .density
                .ok_or(ConfigError::MissingParameter("density"))?,
            proposals: self.proposals.unwrap_or_default(),
            connection_potential: self
                .connection_potential
                .ok_or(ConfigError::MissingParameter("connection_potential"))?,
            particle_potential: self.particle_potential.unwrap_or(0.0),
            lambda_internal: self.lambda_internal.unwrap_or(1.0),
            lambda_external: self.lambda_external.unwrap_or(1.0),
            sigma_position: self.sigma_position.unwrap_or(0.25 * particle_length),
            sigma_direction: self.sigma_direction.unwrap_or(0.25),
            t0: self.t0.ok_or(ConfigError::MissingParameter("t0"))?,
            t1: self.t1.ok_or(ConfigError::MissingParameter("t1"))?,
            iterations,
            update_interval: self
                .update_interval
                .unwrap_or_else(|| (iterations / 1000).max(1)),
            interpolation: self.interpolation.unwrap_or(Interpolation::Trilinear),
            threads: self.threads.unwrap_or(0),
            seed: self.seed,
        };
        config.validate()?;
        Ok(config)
    }
}
