//! Radio channel calculations.
//!
//! Contains helpers for:
//! - Log-distance path loss with log-normal shadowing
//! - SNR and RSSI at the gateway
//! - Packet error rate against per-spreading-factor demodulation limits
//! - Stochastic delivery decisions and a deterministic range estimate
//!
//! Units:
//! - Power: dBm
//! - Loss and ratios: dB
//! - Distance: meters
//!
//! All functions are pure apart from the random draws they take from the
//! caller-supplied RNG.

use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::Deserialize;

use super::types::SpreadingFactorTable;

/// Demodulation SNR limits for SF7..=SF12 (dB), 2.5 dB apart.
pub const DEFAULT_SENSITIVITY_DB: SpreadingFactorTable = SpreadingFactorTable::new([-7.5, -10.0, -12.5, -15.0, -17.5, -20.0]);

/// PER floor at exactly the demodulation limit.
const PER_AT_THRESHOLD: f64 = 0.01;
/// Steepness of the logistic PER curve below the limit (per dB).
const PER_LOGISTIC_SLOPE: f64 = 2.0;
/// Exponential PER decay above the limit (per dB of margin).
const PER_DECAY_RATE: f64 = 0.5;

/// Parameters defining the radio channel propagation model.
///
/// These are the constants of the log-distance path loss model with log-normal
/// shadowing, together with the receiver noise floor and the SNR each spreading
/// factor needs for demodulation.
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct PathLossParameters {
    /// Path loss exponent (n).
    ///
    /// - n = 2.0: Free space
    /// - n = 2.7 to 4.0: Urban areas
    /// - n = 4.0 to 6.0: Dense urban / heavily obstructed
    pub path_loss_exponent: f64,

    /// Standard deviation for log-normal shadowing (σ) in dB.
    ///
    /// A value of 0.0 disables shadowing and makes path loss deterministic.
    pub shadowing_sigma: f64,

    /// Path loss at the reference distance d₀ in dB.
    pub path_loss_at_reference_distance: f64,

    /// Reference distance d₀ in meters. Shorter distances are clamped to it.
    pub reference_distance: f64,

    /// Noise floor of the gateway receiver in dBm.
    pub noise_floor: f64,

    /// Minimum SNR per spreading factor for demodulation (dB).
    pub sensitivity: SpreadingFactorTable,
}

impl Default for PathLossParameters {
    fn default() -> Self {
        Self {
            path_loss_exponent: 3.5,
            shadowing_sigma: 8.0,
            path_loss_at_reference_distance: 40.0,
            reference_distance: 1.0,
            noise_floor: -174.0,
            sensitivity: DEFAULT_SENSITIVITY_DB,
        }
    }
}

/// Calculate the path loss (in dB) at a given distance using a log-distance
/// path loss model with log-normal shadowing.
///
/// # Formula
///
/// ```text
/// PL(d) = PL(d₀) + 10 × n × log₁₀(max(d, d₀)/d₀) + X_σ
/// ```
///
/// Where:
/// - `PL(d₀)`: `params.path_loss_at_reference_distance`
/// - `n`: `params.path_loss_exponent`
/// - `X_σ`: shadowing sampled from Normal(0, σ), σ = `params.shadowing_sigma`
///
/// # Notes
///
/// - Distances below d₀ (including negative or NaN inputs) are clamped to d₀
/// - Each call samples a new shadowing value, so repeated calls with the same
///   distance yield different results unless σ is zero
pub fn calculate_path_loss<R: Rng + ?Sized>(distance: f64, params: &PathLossParameters, rng: &mut R) -> f64 {
    let d0 = params.reference_distance;
    let d = distance.max(d0);
    let path_loss = params.path_loss_at_reference_distance + 10.0 * params.path_loss_exponent * (d / d0).log10();
    path_loss + sample_shadowing(params.shadowing_sigma, rng)
}

fn sample_shadowing<R: Rng + ?Sized>(sigma: f64, rng: &mut R) -> f64 {
    if sigma > 0.0 {
        match Normal::new(0.0, sigma) {
            Ok(normal) => normal.sample(rng),
            Err(err) => {
                log::warn!("Invalid shadowing sigma {}: {}, shadowing disabled", sigma, err);
                0.0
            }
        }
    } else {
        0.0
    }
}

/// SNR at the gateway: `P_tx − PL − N_floor` (dB).
pub fn calculate_snr(tx_power_dbm: f64, path_loss_db: f64, noise_floor_dbm: f64) -> f64 {
    tx_power_dbm - path_loss_db - noise_floor_dbm
}

/// Received signal strength: `P_tx − PL` (dBm).
pub fn calculate_rssi(tx_power_dbm: f64, path_loss_db: f64) -> f64 {
    tx_power_dbm - path_loss_db
}

/// Demodulation limit for `spreading_factor`, `None` if the SF is not in the table.
pub fn calculate_snr_limit(spreading_factor: u8, sensitivity: &SpreadingFactorTable) -> Option<f64> {
    sensitivity.get(spreading_factor)
}

/// Packet error rate for a given SNR and spreading factor.
///
/// With `margin = snr − limit`:
///
/// ```text
/// margin <  0:  PER = 1 / (1 + e^(2·margin))       logistic, → 1 far below the limit
/// margin >= 0:  PER = 0.01 · e^(−0.5·margin)        exponential decay from a 1 % floor
/// ```
///
/// The curve is continuous-ish around the limit (0.5 just below, 0.01 at it) and
/// non-increasing in SNR. An unknown spreading factor is the worst case, PER 1.0.
pub fn calculate_packet_error_rate(snr_db: f64, spreading_factor: u8, sensitivity: &SpreadingFactorTable) -> f64 {
    let Some(limit) = calculate_snr_limit(spreading_factor, sensitivity) else {
        return 1.0;
    };
    let margin = snr_db - limit;
    let per = if margin < 0.0 {
        1.0 / (1.0 + (PER_LOGISTIC_SLOPE * margin).exp())
    } else {
        PER_AT_THRESHOLD * (-PER_DECAY_RATE * margin).exp()
    };
    if per.is_nan() { 1.0 } else { per.clamp(0.0, 1.0) }
}

/// Draw one uniform value in [0, 1); the packet survives iff it exceeds the PER.
pub fn is_packet_delivered<R: Rng + ?Sized>(snr_db: f64, spreading_factor: u8, sensitivity: &SpreadingFactorTable, rng: &mut R) -> bool {
    let per = calculate_packet_error_rate(snr_db, spreading_factor, sensitivity);
    rng.r#gen::<f64>() > per
}

// Estimate an "effective" communication distance from the mean link budget.
// Solve tx − PL(d) − N = limit for d with PL(d) = PL0 + 10n·log10(d/d0):
//   d = d0 · 10^((tx − N − limit − PL0) / (10n))
// Shadowing is not sampled so the estimate is stable across calls.
/// Deterministic range (meters) at which the mean SNR reaches the SF's limit.
///
/// Returns 0.0 for an unknown spreading factor or a budget that does not even
/// cover the reference distance.
pub fn calculate_effective_distance(tx_power_dbm: f64, spreading_factor: u8, params: &PathLossParameters) -> f64 {
    let Some(limit) = calculate_snr_limit(spreading_factor, &params.sensitivity) else {
        return 0.0;
    };
    let numerator = tx_power_dbm - params.noise_floor - limit - params.path_loss_at_reference_distance;
    let denom = 10.0 * params.path_loss_exponent;
    if numerator <= 0.0 || denom <= 0.0 {
        return 0.0;
    }
    params.reference_distance * 10.0_f64.powf(numerator / denom)
}
