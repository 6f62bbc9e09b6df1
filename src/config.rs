//! Engine configuration loading and validation.
//!
//! Every tunable of the simulation lives in one TOML file. Sections and fields
//! may be omitted; missing values fall back to the defaults below.

use anyhow::Context;
use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::simulation::alerts::AlertThresholds;
use crate::simulation::geometry::GeoPoint;
use crate::simulation::mac::MacParameters;
use crate::simulation::runner::RunnerParameters;
use crate::simulation::signal_calculations::PathLossParameters;

/// Gateway location: central Dhaka.
pub const DEFAULT_GATEWAY: GeoPoint = GeoPoint::new(23.8103, 90.4125);

/// Longest accepted time window in minutes (one year).
const MAX_WINDOW_MINUTES: i64 = 525_600;
/// Longest accepted default step in seconds (one year).
const MAX_STEP_SECS: i64 = 31_536_000;
/// Widest accepted collision half-width in seconds.
const MAX_COLLISION_WINDOW_SECS: f64 = 3_600.0;
/// Longest accepted wall-clock pause between automatic steps (one day).
const MAX_AUTO_STEP_INTERVAL_MS: u64 = 86_400_000;

/// Error type for configuration loading failures.
#[derive(Debug)]
pub enum ConfigError {
    FileRead(String),
    Parse(String),
    Validation(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::FileRead(msg) => write!(f, "Failed to read file: {}", msg),
            ConfigError::Parse(msg) => write!(f, "Failed to parse TOML: {}", msg),
            ConfigError::Validation(msg) => write!(f, "Validation error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Wall-clock pacing of the auto-advance loop.
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct DriverParameters {
    /// Real time between two automatic steps (ms).
    pub auto_step_interval_ms: u64,
}

impl Default for DriverParameters {
    fn default() -> Self {
        Self { auto_step_interval_ms: 2000 }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct SimulationConfig {
    /// Seed of the engine's random source, random when absent.
    pub seed: Option<u64>,
    pub gateway: GeoPoint,
    pub channel: PathLossParameters,
    pub mac: MacParameters,
    pub runner: RunnerParameters,
    pub alerts: AlertThresholds,
    pub driver: DriverParameters,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            seed: None,
            gateway: DEFAULT_GATEWAY,
            channel: PathLossParameters::default(),
            mac: MacParameters::default(),
            runner: RunnerParameters::default(),
            alerts: AlertThresholds::default(),
            driver: DriverParameters::default(),
        }
    }
}

impl SimulationConfig {
    /// Load and validate a configuration file.
    ///
    /// # Parameters
    ///
    /// * `path` - Path of the TOML file
    ///
    /// # Returns
    ///
    /// Parsed and validated configuration or an error.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read file: {}", path.display()))
            .map_err(|e| ConfigError::FileRead(e.to_string()))?;
        let config = Self::from_toml(&content)?;
        log::info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: SimulationConfig = toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate().map_err(ConfigError::Validation)?;
        Ok(config)
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<(), String> {
        if !self.gateway.is_valid() {
            return Err(format!("Gateway position ({}, {}) is not a valid coordinate", self.gateway.latitude, self.gateway.longitude));
        }

        let channel = &self.channel;
        if !(channel.path_loss_exponent > 0.0 && channel.path_loss_exponent.is_finite()) {
            return Err(format!("path_loss_exponent must be positive, got {}", channel.path_loss_exponent));
        }
        if !(channel.shadowing_sigma >= 0.0 && channel.shadowing_sigma.is_finite()) {
            return Err(format!("shadowing_sigma must be finite and not negative, got {}", channel.shadowing_sigma));
        }
        if !(channel.reference_distance > 0.0 && channel.reference_distance.is_finite()) {
            return Err(format!("reference_distance must be positive, got {}", channel.reference_distance));
        }
        if !channel.noise_floor.is_finite() || !channel.path_loss_at_reference_distance.is_finite() {
            return Err("noise_floor and path_loss_at_reference_distance must be finite".to_string());
        }
        if let Some((sf, value)) = channel.sensitivity.iter().find(|(_, v)| !v.is_finite()) {
            return Err(format!("Sensitivity for SF{} is not finite: {}", sf, value));
        }

        let mac = &self.mac;
        if mac.max_messages_per_hour == 0 {
            return Err("max_messages_per_hour must be at least 1".to_string());
        }
        if !(0.0..=MAX_COLLISION_WINDOW_SECS).contains(&mac.collision_window_secs) {
            return Err(format!("collision_window_secs must be within 0..={}, got {}", MAX_COLLISION_WINDOW_SECS, mac.collision_window_secs));
        }
        if let Some((sf, value)) = mac.airtime_ms.iter().find(|(_, v)| !(*v > 0.0 && v.is_finite())) {
            return Err(format!("Airtime for SF{} must be positive, got {}", sf, value));
        }

        let runner = &self.runner;
        if !(1..=MAX_STEP_SECS).contains(&runner.transmission_interval_secs) {
            return Err(format!("transmission_interval_secs must be within 1..={}, got {}", MAX_STEP_SECS, runner.transmission_interval_secs));
        }
        if !(1..=MAX_WINDOW_MINUTES).contains(&runner.offline_threshold_minutes) {
            return Err(format!("offline_threshold_minutes must be within 1..={}, got {}", MAX_WINDOW_MINUTES, runner.offline_threshold_minutes));
        }
        if !(runner.base_water_level_cm >= 0.0 && runner.base_water_level_cm.is_finite()) {
            return Err(format!("base_water_level_cm must be finite and not negative, got {}", runner.base_water_level_cm));
        }

        let alerts = &self.alerts;
        if !alerts.water_level_threshold_cm.is_finite() || !alerts.rate_of_rise_threshold_cm_per_hour.is_finite() {
            return Err("Alert thresholds must be finite".to_string());
        }
        if !(1..=MAX_WINDOW_MINUTES).contains(&alerts.rate_window_minutes) {
            return Err(format!("rate_window_minutes must be within 1..={}, got {}", MAX_WINDOW_MINUTES, alerts.rate_window_minutes));
        }

        if !(1..=MAX_AUTO_STEP_INTERVAL_MS).contains(&self.driver.auto_step_interval_ms) {
            return Err(format!("auto_step_interval_ms must be within 1..={}, got {}", MAX_AUTO_STEP_INTERVAL_MS, self.driver.auto_step_interval_ms));
        }
        Ok(())
    }
}
