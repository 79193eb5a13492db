//! link.rs — Network link model
//!
//! Samples per-tick latency/jitter for the camera backhaul. The configured
//! network condition sets the baseline; weather and interference add to it.
//! `latency` triggers compare against the sample.

use rand::RngCore;
use rand_distr::{Distribution, Normal};

use vigil_types::{EnvironmentConditions, LinkMetrics, NetworkCondition, Weather};

/// Milliseconds of latency added per unit of interference
const INTERFERENCE_MS: f64 = 2.0;

/// Baseline (latency, jitter σ) in ms for a network condition.
pub fn baseline(condition: NetworkCondition) -> (f64, f64) {
    match condition {
        NetworkCondition::Good => (20.0, 4.0),
        NetworkCondition::Fair => (60.0, 15.0),
        NetworkCondition::Poor => (150.0, 45.0),
    }
}

pub fn weather_penalty_ms(weather: Weather) -> f64 {
    match weather {
        Weather::Clear => 0.0,
        Weather::Rain => 10.0,
        Weather::Fog => 5.0,
        Weather::Snow => 15.0,
        Weather::Storm => 35.0,
    }
}

/// Draw one tick's link metrics.
pub fn sample(
    condition: NetworkCondition,
    env: &EnvironmentConditions,
    rng: &mut dyn RngCore,
) -> LinkMetrics {
    let (base, sigma) = baseline(condition);
    let floor = base + weather_penalty_ms(env.weather) + INTERFERENCE_MS * env.interference.max(0.0);
    let jitter = Normal::new(0.0, sigma)
        .map(|n| n.sample(rng).abs())
        .unwrap_or(0.0);
    LinkMetrics { latency_ms: floor + jitter, jitter_ms: jitter }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn latency_never_drops_below_the_biased_floor() {
        let mut rng = StdRng::seed_from_u64(11);
        let env = EnvironmentConditions { weather: Weather::Storm, interference: 5.0, ..Default::default() };
        for _ in 0..200 {
            let m = sample(NetworkCondition::Fair, &env, &mut rng);
            assert!(m.latency_ms >= 60.0 + 35.0 + 10.0);
            assert!(m.jitter_ms >= 0.0);
        }
    }

    #[test]
    fn poor_network_is_slower_on_average() {
        let mut rng = StdRng::seed_from_u64(3);
        let env = EnvironmentConditions::default();
        let avg = |c, rng: &mut StdRng| {
            (0..500).map(|_| sample(c, &env, rng).latency_ms).sum::<f64>() / 500.0
        };
        let good = avg(NetworkCondition::Good, &mut rng);
        let poor = avg(NetworkCondition::Poor, &mut rng);
        assert!(poor > good + 100.0, "good={good} poor={poor}");
    }
}
