//! Sensor fleet loading, validation and demo generation.
//!
//! A fleet file is JSON:
//!
//! ```json
//! { "devices": [ { "id": 1, "name": "Gulshan Sensor 1", "area": "Gulshan",
//!                  "latitude": 23.79, "longitude": 90.41,
//!                  "spreading_factor": 9, "tx_power_dbm": 14.0 } ] }
//! ```
//!
//! `area` and `status` are optional. Without a file, a demo fleet is spread
//! over a fixed list of city areas around the gateway.

use anyhow::Context;
use rand::Rng;
use rand::seq::SliceRandom;
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::Path;

use crate::config::SimulationConfig;
use crate::simulation::geometry::{GeoPoint, distance};
use crate::simulation::signal_calculations::calculate_effective_distance;
use crate::simulation::traffic::{distance_to_gateway_km, spreading_factor_for_distance};
use crate::simulation::types::{Device, DeviceStatus, MAX_SPREADING_FACTOR, MIN_SPREADING_FACTOR, is_valid_spreading_factor};

/// City areas demo sensors are placed in, with their center coordinates.
pub const DHAKA_AREAS: [(&str, f64, f64); 7] = [
    ("Bashundhara R/A", 23.8170, 90.4270),
    ("Dhanmondi", 23.7465, 90.3710),
    ("Uttara", 23.8750, 90.3900),
    ("Gulshan", 23.7900, 90.4100),
    ("Banani", 23.7940, 90.4050),
    ("Wari", 23.7100, 90.4000),
    ("Motijheel", 23.7300, 90.4200),
];

/// Maximum placement offset from an area center in degrees (about 500 m).
const PLACEMENT_JITTER_DEG: f64 = 0.005;
/// Transmit power choices of demo sensors (dBm).
const DEMO_TX_POWERS_DBM: [f64; 5] = [2.0, 5.0, 8.0, 11.0, 14.0];

const MAX_DEVICES: usize = 10_000;
const MIN_TX_POWER_DBM: f64 = -10.0;
const MAX_TX_POWER_DBM: f64 = 30.0;

/// Error type for fleet loading failures.
#[derive(Debug)]
pub enum FleetLoadError {
    FileReadError(String),
    ParseError(String),
    ValidationError(String),
}

impl std::fmt::Display for FleetLoadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FleetLoadError::FileReadError(msg) => write!(f, "Failed to read file: {}", msg),
            FleetLoadError::ParseError(msg) => write!(f, "Failed to parse JSON: {}", msg),
            FleetLoadError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
        }
    }
}

impl std::error::Error for FleetLoadError {}

#[derive(Debug, Deserialize, Clone)]
pub struct FleetFile {
    pub devices: Vec<DeviceSpec>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DeviceSpec {
    pub id: u32,
    pub name: String,
    #[serde(default)]
    pub area: String,
    pub latitude: f64,
    pub longitude: f64,
    pub spreading_factor: u8,
    pub tx_power_dbm: f64,
    #[serde(default)]
    pub status: Option<DeviceStatus>,
}

impl From<&DeviceSpec> for Device {
    fn from(spec: &DeviceSpec) -> Self {
        let mut device = Device::new(
            spec.id,
            spec.name.clone(),
            spec.area.clone(),
            GeoPoint::new(spec.latitude, spec.longitude),
            spec.spreading_factor,
            spec.tx_power_dbm,
        );
        device.status = spec.status.unwrap_or_default();
        device
    }
}

/// Load and validate a fleet file.
pub fn load_fleet(path: &Path) -> Result<Vec<Device>, FleetLoadError> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("Failed to read file: {}", path.display()))
        .map_err(|e| FleetLoadError::FileReadError(e.to_string()))?;
    let devices = parse_fleet(&data)?;
    log::info!("Loaded {} devices from {}", devices.len(), path.display());
    Ok(devices)
}

pub fn parse_fleet(json: &str) -> Result<Vec<Device>, FleetLoadError> {
    let fleet: FleetFile = serde_json::from_str(json)
        .context("Invalid JSON format")
        .map_err(|e| FleetLoadError::ParseError(e.to_string()))?;
    validate_fleet(&fleet).map_err(FleetLoadError::ValidationError)?;
    Ok(fleet.devices.iter().map(Device::from).collect())
}

/// Validate a parsed fleet.
///
/// Rejects empty or oversized fleets, duplicate ids, spreading factors outside
/// SF7..=SF12, invalid coordinates and unrealistic transmit power.
pub fn validate_fleet(fleet: &FleetFile) -> Result<(), String> {
    if fleet.devices.is_empty() {
        return Err("Fleet must contain at least one device".to_string());
    }
    if fleet.devices.len() > MAX_DEVICES {
        return Err(format!("Device count {} exceeds maximum of {}", fleet.devices.len(), MAX_DEVICES));
    }

    let mut ids = HashSet::new();
    for spec in &fleet.devices {
        if !ids.insert(spec.id) {
            return Err(format!("Duplicate device id found: {}", spec.id));
        }
        if !is_valid_spreading_factor(spec.spreading_factor) {
            return Err(format!(
                "Device {} spreading_factor {} outside SF{}..=SF{}",
                spec.id, spec.spreading_factor, MIN_SPREADING_FACTOR, MAX_SPREADING_FACTOR
            ));
        }
        if !GeoPoint::new(spec.latitude, spec.longitude).is_valid() {
            return Err(format!("Device {} position ({}, {}) is not a valid coordinate", spec.id, spec.latitude, spec.longitude));
        }
        if !(MIN_TX_POWER_DBM..=MAX_TX_POWER_DBM).contains(&spec.tx_power_dbm) {
            return Err(format!(
                "Device {} tx_power_dbm {} outside realistic range ({} to {} dBm)",
                spec.id, spec.tx_power_dbm, MIN_TX_POWER_DBM, MAX_TX_POWER_DBM
            ));
        }
    }
    Ok(())
}

/// Ids of devices placed farther from the gateway than their mean link budget
/// reaches. Each one is logged as a warning; such sensors will rarely deliver.
pub fn devices_beyond_range(devices: &[Device], config: &SimulationConfig) -> Vec<u32> {
    devices
        .iter()
        .filter(|device| {
            let range = calculate_effective_distance(device.tx_power_dbm, device.spreading_factor, &config.channel);
            let meters = distance(&device.position, &config.gateway);
            if meters > range {
                log::warn!(
                    "Device {} ({}) is {:.0} m from the gateway, beyond its effective range of {:.0} m at SF{}",
                    device.id,
                    device.name,
                    meters,
                    range,
                    device.spreading_factor
                );
                true
            } else {
                false
            }
        })
        .map(|device| device.id)
        .collect()
}

/// Generate `count` ONLINE demo sensors spread round-robin over [`DHAKA_AREAS`].
///
/// Each sensor lands within about 500 m of its area center, picks a spreading
/// factor tier from its distance to `gateway` and a transmit power between 2 and
/// 14 dBm. Ids start at 1; names read "<area> Sensor <n>".
pub fn generate_demo_fleet<R: Rng + ?Sized>(count: usize, gateway: &GeoPoint, rng: &mut R) -> Vec<Device> {
    let mut per_area = [0usize; DHAKA_AREAS.len()];
    (0..count)
        .map(|i| {
            let area_index = i % DHAKA_AREAS.len();
            let (area, lat, lon) = DHAKA_AREAS[area_index];
            per_area[area_index] += 1;

            let position = GeoPoint::new(
                lat + rng.gen_range(-PLACEMENT_JITTER_DEG..=PLACEMENT_JITTER_DEG),
                lon + rng.gen_range(-PLACEMENT_JITTER_DEG..=PLACEMENT_JITTER_DEG),
            );
            let sf = spreading_factor_for_distance(distance_to_gateway_km(&position, gateway), rng);
            let tx_power = *DEMO_TX_POWERS_DBM.choose(rng).unwrap_or(&DEMO_TX_POWERS_DBM[0]);

            Device::new(i as u32 + 1, format!("{} Sensor {}", area, per_area[area_index]), area, position, sf, tx_power)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_GATEWAY;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    const TWO_DEVICES: &str = r#"{
        "devices": [
            { "id": 1, "name": "Gulshan Sensor 1", "area": "Gulshan", "latitude": 23.79, "longitude": 90.41,
              "spreading_factor": 9, "tx_power_dbm": 14.0 },
            { "id": 2, "name": "Wari Sensor 1", "latitude": 23.71, "longitude": 90.40,
              "spreading_factor": 12, "tx_power_dbm": 2.0, "status": "maintenance" }
        ]
    }"#;

    fn spec(id: u32) -> DeviceSpec {
        DeviceSpec {
            id,
            name: format!("Sensor {id}"),
            area: String::new(),
            latitude: 23.8,
            longitude: 90.4,
            spreading_factor: 7,
            tx_power_dbm: 14.0,
            status: None,
        }
    }

    #[test]
    fn parses_devices_with_optional_fields() {
        let devices = parse_fleet(TWO_DEVICES).unwrap();
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].area, "Gulshan");
        assert_eq!(devices[0].status, DeviceStatus::Online);
        assert_eq!(devices[1].area, "");
        assert_eq!(devices[1].status, DeviceStatus::Maintenance);
        assert_eq!(devices[1].spreading_factor, 12);
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        assert!(matches!(parse_fleet("{ \"devices\": [ { \"id\": 1 } ] }"), Err(FleetLoadError::ParseError(_))));
    }

    #[test]
    fn validation_rejects_bad_fleets() {
        let empty = FleetFile { devices: vec![] };
        assert!(validate_fleet(&empty).is_err());

        let duplicate = FleetFile { devices: vec![spec(1), spec(1)] };
        assert!(validate_fleet(&duplicate).unwrap_err().contains("Duplicate"));

        let mut bad_sf = spec(1);
        bad_sf.spreading_factor = 6;
        assert!(validate_fleet(&FleetFile { devices: vec![bad_sf] }).unwrap_err().contains("spreading_factor"));

        let mut bad_position = spec(1);
        bad_position.longitude = 181.0;
        assert!(validate_fleet(&FleetFile { devices: vec![bad_position] }).is_err());

        let mut loud = spec(1);
        loud.tx_power_dbm = 40.0;
        assert!(validate_fleet(&FleetFile { devices: vec![loud] }).is_err());

        assert!(validate_fleet(&FleetFile { devices: vec![spec(1), spec(2)] }).is_ok());
    }

    #[test]
    fn demo_fleet_round_robins_areas() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let fleet = generate_demo_fleet(20, &DEFAULT_GATEWAY, &mut rng);
        assert_eq!(fleet.len(), 20);
        assert_eq!(fleet[0].name, "Bashundhara R/A Sensor 1");
        assert_eq!(fleet[7].name, "Bashundhara R/A Sensor 2");
        assert_eq!(fleet[6].area, "Motijheel");
        let ids: HashSet<u32> = fleet.iter().map(|d| d.id).collect();
        assert_eq!(ids.len(), 20);
    }

    #[test]
    fn demo_fleet_tiers_follow_distance() {
        let mut rng = ChaCha8Rng::seed_from_u64(4);
        for device in generate_demo_fleet(70, &DEFAULT_GATEWAY, &mut rng) {
            let km = distance_to_gateway_km(&device.position, &DEFAULT_GATEWAY);
            let sf = device.spreading_factor;
            if km < 5.0 {
                assert!((7..=9).contains(&sf), "{} at {km:.1} km got SF{sf}", device.name);
            } else if km < 15.0 {
                assert!((9..=11).contains(&sf), "{} at {km:.1} km got SF{sf}", device.name);
            } else {
                assert!((10..=12).contains(&sf));
            }
            assert!(DEMO_TX_POWERS_DBM.contains(&device.tx_power_dbm));
            assert_eq!(device.status, DeviceStatus::Online);
        }
    }

    #[test]
    fn range_warning_flags_distant_weak_devices() {
        let config = SimulationConfig::default();
        let near = Device::new(1, "Near", "", DEFAULT_GATEWAY, 7, 14.0);
        let far = Device::new(2, "Far", "", GeoPoint::new(25.0, 90.4125), 7, 2.0);
        assert_eq!(devices_beyond_range(&[near, far], &config), vec![2]);
    }
}
