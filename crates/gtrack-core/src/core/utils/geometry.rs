use nalgebra::Vector3;
use rand::Rng;
use rand_distr::{Distribution, StandardNormal, UnitSphere};

/// Draws a direction uniformly distributed on the unit sphere.
pub fn random_direction(rng: &mut impl Rng) -> Vector3<f64> {
    let [x, y, z]: [f64; 3] = UnitSphere.sample(rng);
    Vector3::new(x, y, z)
}

/// Draws a vector of three independent standard normal components.
pub fn random_normal(rng: &mut impl Rng) -> Vector3<f64> {
    Vector3::new(
        StandardNormal.sample(rng),
        StandardNormal.sample(rng),
        StandardNormal.sample(rng),
    )
}

/// Moves the unit vector `dir` by a Gaussian step of standard deviation `sigma` taken in
/// its tangent plane, then projects the result back onto the sphere.
///
/// The new direction always lies in the hemisphere around `dir`. At angle `θ` from `dir`
/// its density is `exp(-tan²θ / 2σ²) / (2πσ² cos³θ)`.
pub fn perturb_direction(rng: &mut impl Rng, dir: &Vector3<f64>, sigma: f64) -> Vector3<f64> {
    let step = random_normal(rng) * sigma;
    let tangent = step - dir * dir.dot(&step);
    (dir + tangent).normalize()
}
