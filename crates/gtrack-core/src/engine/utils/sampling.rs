use rand::{distributions::WeightedIndex, prelude::*};
use thiserror::Error;
use tracing::instrument;

#[derive(Debug, Error)]
pub enum SamplingError {
    #[error("Input energies list is empty, cannot perform sampling")]
    EmptyEnergies,
    #[error("Invalid temperature: {0}. Temperature must be positive for Boltzmann sampling")]
    InvalidTemperature(f64),
    #[error("Failed to create weighted distribution: {source}")]
    DistributionError {
        #[from]
        source: rand::distributions::WeightedError,
    },
}

// Shifted by the minimum energy so the weights survive underflow.
#[instrument(level = "trace", skip_all, fields(temperature))]
pub fn boltzmann_sample<R: Rng + ?Sized>(
    energies: &[f64],
    temperature: f64,
    rng: &mut R,
) -> Result<usize, SamplingError> {
    if energies.is_empty() {
        return Err(SamplingError::EmptyEnergies);
    }
    if temperature.is_nan() || temperature <= 0.0 {
        return Err(SamplingError::InvalidTemperature(temperature));
    }

    let min_energy = energies
        .iter()
        .copied()
        .filter(|e| e.is_finite())
        .fold(f64::INFINITY, f64::min);
    if !min_energy.is_finite() {
        return Ok(0);
    }

    let weights: Vec<f64> = energies
        .iter()
        .map(|&e| {
            if e.is_finite() {
                (-(e - min_energy) / temperature).exp()
            } else {
                0.0
            }
        })
        .collect();

    let dist = WeightedIndex::new(&weights)?;
    Ok(dist.sample(rng))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;

    #[test]
    fn frequencies_follow_boltzmann_weights() {
        let energies = [0.0, 1.0, -0.5];
        let temperature = 0.7;
        let mut rng = StdRng::seed_from_u64(11);
        let mut counts = [0usize; 3];
        let n = 60_000;
        for _ in 0..n {
            counts[boltzmann_sample(&energies, temperature, &mut rng).unwrap()] += 1;
        }

        let weights: Vec<f64> = energies.iter().map(|e| (-e / temperature).exp()).collect();
        let total: f64 = weights.iter().sum();
        for i in 0..3 {
            let expected = weights[i] / total;
            let observed = counts[i] as f64 / n as f64;
            assert!((observed - expected).abs() < 0.01, "i={} {} vs {}", i, observed, expected);
        }
    }

    #[test]
    fn very_low_energy_dominates_without_underflow() {
        let energies = [1.0e4, 0.0];
        let mut rng = StdRng::seed_from_u64(2);
        for _ in 0..100 {
            assert_eq!(boltzmann_sample(&energies, 1e-3, &mut rng).unwrap(), 1);
        }
    }

    #[test]
    fn invalid_inputs_are_rejected() {
        let mut rng = StdRng::seed_from_u64(0);
        assert!(matches!(
            boltzmann_sample(&[], 1.0, &mut rng),
            Err(SamplingError::EmptyEnergies)
        ));
        assert!(matches!(
            boltzmann_sample(&[0.0], 0.0, &mut rng),
            Err(SamplingError::InvalidTemperature(_))
        ));
    }

    #[test]
    fn works_through_a_trait_object() {
        let mut rng = StdRng::seed_from_u64(5);
        let dyn_rng: &mut dyn RngCore = &mut rng;
        assert_eq!(boltzmann_sample(&[0.0], 1.0, dyn_rng).unwrap(), 0);
    }
}
