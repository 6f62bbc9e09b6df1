//! Sensor traffic generation.
//!
//! Water levels follow a Gaussian random walk with occasional rain spikes. The
//! distance helpers here are shared with demo-fleet generation, which picks a
//! spreading factor tier from a device's distance to the gateway.

use rand::Rng;
use rand::seq::SliceRandom;
use rand_distr::{Distribution, Normal};

use super::geometry::{GeoPoint, distance};

/// Width of the uniform band above the base level for a first reading (cm).
const INITIAL_LEVEL_SPREAD_CM: f64 = 20.0;
/// Standard deviation of one random-walk step (cm).
const RANDOM_WALK_SIGMA_CM: f64 = 2.0;
/// Chance that a step coincides with a rain event.
const RAIN_EVENT_PROBABILITY: f64 = 0.1;
/// Extra rise added by a rain event (cm).
const RAIN_SPIKE_MIN_CM: f64 = 5.0;
const RAIN_SPIKE_MAX_CM: f64 = 15.0;

/// Base water level used when the configuration does not override it (cm).
pub const DEFAULT_BASE_LEVEL_CM: f64 = 10.0;

/// Produce the next water-level reading for a sensor.
///
/// # Parameters
///
/// * `previous` - Last level generated for this sensor, `None` for the first reading
/// * `base_level_cm` - Typical dry-weather level at the sensor
/// * `rng` - Random source
///
/// # Returns
///
/// Level in centimeters, never negative. A first reading is uniform in
/// `[base, base + 20]`; later readings move by `Normal(0, 2)` plus, with 10 %
/// probability, a uniform `[5, 15]` rain spike.
pub fn next_water_level<R: Rng + ?Sized>(previous: Option<f64>, base_level_cm: f64, rng: &mut R) -> f64 {
    let Some(previous) = previous else {
        return rng.gen_range(base_level_cm..=base_level_cm + INITIAL_LEVEL_SPREAD_CM).max(0.0);
    };

    let mut change = Normal::new(0.0, RANDOM_WALK_SIGMA_CM).map(|walk| walk.sample(rng)).unwrap_or(0.0);
    if rng.gen_bool(RAIN_EVENT_PROBABILITY) {
        change += rng.gen_range(RAIN_SPIKE_MIN_CM..=RAIN_SPIKE_MAX_CM);
    }
    (previous + change).max(0.0)
}

/// Distance from `point` to the gateway in kilometers.
pub fn distance_to_gateway_km(point: &GeoPoint, gateway: &GeoPoint) -> f64 {
    distance(point, gateway) / 1000.0
}

/// Spreading factor tier a device would settle on at `distance_km`.
///
/// Close devices use short airtime (SF7–9), mid-range SF9–11, far devices
/// SF10–12; the pick within a tier is random.
pub fn spreading_factor_for_distance<R: Rng + ?Sized>(distance_km: f64, rng: &mut R) -> u8 {
    let tier: &[u8] = if distance_km < 5.0 {
        &[7, 8, 9]
    } else if distance_km < 15.0 {
        &[9, 10, 11]
    } else {
        &[10, 11, 12]
    };
    *tier.choose(rng).unwrap_or(&tier[0])
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn first_reading_is_within_initial_band() {
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        for _ in 0..500 {
            let level = next_water_level(None, 10.0, &mut rng);
            assert!((10.0..=30.0).contains(&level), "got {level}");
        }
    }

    #[test]
    fn water_level_never_negative() {
        for seed in 0..50 {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            let mut level = Some(0.5);
            for _ in 0..200 {
                let next = next_water_level(level, 0.0, &mut rng);
                assert!(next >= 0.0, "seed {seed} produced {next}");
                level = Some(next);
            }
        }
    }

    #[test]
    fn rain_events_push_the_walk_upward() {
        // Mean step is E[rain] = 0.1 × 10 cm = 1 cm, so a long walk drifts up.
        let mut rng = ChaCha8Rng::seed_from_u64(12);
        let mut level = 100.0;
        for _ in 0..2_000 {
            level = next_water_level(Some(level), 10.0, &mut rng);
        }
        assert!(level > 1_000.0, "got {level}");
    }

    #[test]
    fn spreading_factor_tiers_follow_distance() {
        let mut rng = ChaCha8Rng::seed_from_u64(13);
        for _ in 0..100 {
            assert!((7..=9).contains(&spreading_factor_for_distance(1.0, &mut rng)));
            assert!((9..=11).contains(&spreading_factor_for_distance(8.0, &mut rng)));
            assert!((10..=12).contains(&spreading_factor_for_distance(30.0, &mut rng)));
        }
    }

    #[test]
    fn gateway_distance_in_kilometers() {
        let gateway = GeoPoint::new(23.8103, 90.4125);
        assert_eq!(distance_to_gateway_km(&gateway, &gateway), 0.0);
        let d = distance_to_gateway_km(&GeoPoint::new(23.8203, 90.4125), &gateway);
        assert!((d - 1.112).abs() < 0.01, "got {d}");
    }
}
