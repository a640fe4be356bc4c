/// Values used when neither the command line nor the config file sets a parameter.
pub struct DefaultsConfig {
    pub particle_length: f64,
    pub particle_weight: f64,
    pub density: f64,
    pub connection_potential: f64,
    pub particle_potential: f64,
    pub lambda_internal: f64,
    pub lambda_external: f64,
    pub t0: f64,
    pub t1: f64,
    pub iterations: u64,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            particle_length: 1.0,
            particle_weight: 0.1,
            density: 1.0,
            connection_potential: 0.5,
            particle_potential: 0.05,
            lambda_internal: 1.0,
            lambda_external: 1.0,
            t0: 0.1,
            t1: 0.001,
            iterations: 10_000_000,
        }
    }
}
