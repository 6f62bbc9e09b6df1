//! Type definitions for the simulation.
//!
//! Contains all data structures shared across the engine:
//! - Device records and the partial updates the runner applies to them
//! - Readings emitted once per uplink attempt
//! - Alert records produced by the alert evaluator
//! - Per-spreading-factor lookup tables used by the channel and MAC models

use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::fmt;

use super::geometry::GeoPoint;

/// Lowest spreading factor the network uses.
pub const MIN_SPREADING_FACTOR: u8 = 7;
/// Highest spreading factor the network uses.
pub const MAX_SPREADING_FACTOR: u8 = 12;

const SPREADING_FACTOR_COUNT: usize = (MAX_SPREADING_FACTOR - MIN_SPREADING_FACTOR + 1) as usize;

/// One value per spreading factor, SF7 first.
///
/// Deserializes from a plain array of six numbers so config files can write
/// `sensitivity = [-7.5, -10.0, -12.5, -15.0, -17.5, -20.0]`.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(transparent)]
pub struct SpreadingFactorTable([f64; SPREADING_FACTOR_COUNT]);

impl SpreadingFactorTable {
    pub const fn new(values: [f64; SPREADING_FACTOR_COUNT]) -> Self {
        Self(values)
    }

    /// Look up the value for `spreading_factor`, `None` outside SF7..=SF12.
    pub fn get(&self, spreading_factor: u8) -> Option<f64> {
        if is_valid_spreading_factor(spreading_factor) {
            Some(self.0[(spreading_factor - MIN_SPREADING_FACTOR) as usize])
        } else {
            None
        }
    }

    /// Iterate `(spreading_factor, value)` pairs in ascending SF order.
    pub fn iter(&self) -> impl Iterator<Item = (u8, f64)> + '_ {
        self.0.iter().enumerate().map(|(i, v)| (MIN_SPREADING_FACTOR + i as u8, *v))
    }
}

pub fn is_valid_spreading_factor(spreading_factor: u8) -> bool {
    (MIN_SPREADING_FACTOR..=MAX_SPREADING_FACTOR).contains(&spreading_factor)
}

/// Connectivity state of a sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    #[default]
    Online,
    Offline,
    /// Set and cleared only by an operator. Skipped for transmission.
    Maintenance,
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceStatus::Online => write!(f, "ONLINE"),
            DeviceStatus::Offline => write!(f, "OFFLINE"),
            DeviceStatus::Maintenance => write!(f, "MAINTENANCE"),
        }
    }
}

/// Snapshot of a water-level sensor as held by the store.
#[derive(Debug, Clone, PartialEq)]
pub struct Device {
    pub id: u32,
    pub name: String,
    /// City area the sensor was placed in.
    pub area: String,
    pub position: GeoPoint,
    pub spreading_factor: u8,
    /// Transmit power at the antenna port (dBm).
    pub tx_power_dbm: f64,
    pub status: DeviceStatus,
    /// Simulated time of the last delivered uplink, `None` if never heard.
    pub last_contact: Option<DateTime<Utc>>,
}

impl Device {
    /// A freshly created device: ONLINE and never heard from.
    pub fn new(id: u32, name: impl Into<String>, area: impl Into<String>, position: GeoPoint, spreading_factor: u8, tx_power_dbm: f64) -> Self {
        Self {
            id,
            name: name.into(),
            area: area.into(),
            position,
            spreading_factor,
            tx_power_dbm,
            status: DeviceStatus::Online,
            last_contact: None,
        }
    }
}

/// Changed fields only; `None` leaves the stored value untouched.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DeviceUpdate {
    pub status: Option<DeviceStatus>,
    pub last_contact: Option<DateTime<Utc>>,
}

/// One uplink attempt as observed at the gateway.
///
/// Emitted for failed deliveries too; SNR and RSSI are still meaningful link
/// diagnostics when the packet itself was lost.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub device_id: u32,
    /// Simulated time of the uplink.
    pub timestamp: DateTime<Utc>,
    pub water_level_cm: f64,
    pub snr_db: f64,
    pub rssi_dbm: f64,
    pub delivered: bool,
}

/// MAC-layer record of a transmission that occupied the channel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransmissionRecord {
    pub device_id: u32,
    pub spreading_factor: u8,
    pub time: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlertKind {
    HighWaterLevel,
    RateOfRise,
    DeviceOffline,
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertKind::HighWaterLevel => write!(f, "high_water_level"),
            AlertKind::RateOfRise => write!(f, "rate_of_rise"),
            AlertKind::DeviceOffline => write!(f, "device_offline"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertStatus {
    Active,
    Acknowledged,
    Resolved,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Alert {
    pub id: u64,
    pub device_id: u32,
    pub kind: AlertKind,
    pub status: AlertStatus,
    pub severity: Severity,
    pub message: String,
    pub water_level_cm: Option<f64>,
    pub threshold_cm: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Alert {
    /// Active and acknowledged alerts both still describe a live condition.
    pub fn is_open(&self) -> bool {
        self.status != AlertStatus::Resolved
    }
}

/// Alert contents before the store assigns an id.
#[derive(Debug, Clone, PartialEq)]
pub struct NewAlert {
    pub device_id: u32,
    pub kind: AlertKind,
    pub severity: Severity,
    pub message: String,
    pub water_level_cm: Option<f64>,
    pub threshold_cm: Option<f64>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spreading_factor_table_lookup() {
        let table = SpreadingFactorTable::new([1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        assert_eq!(table.get(7), Some(1.0));
        assert_eq!(table.get(12), Some(6.0));
        assert_eq!(table.get(6), None);
        assert_eq!(table.get(13), None);
        let sfs: Vec<u8> = table.iter().map(|(sf, _)| sf).collect();
        assert_eq!(sfs, vec![7, 8, 9, 10, 11, 12]);
    }

    #[test]
    fn new_device_is_online_and_unheard() {
        let d = Device::new(3, "Gulshan Sensor 1", "Gulshan", GeoPoint::new(23.79, 90.41), 9, 8.0);
        assert_eq!(d.status, DeviceStatus::Online);
        assert!(d.last_contact.is_none());
    }

    #[test]
    fn status_deserializes_lowercase() {
        let s: DeviceStatus = serde_json::from_str("\"maintenance\"").unwrap();
        assert_eq!(s, DeviceStatus::Maintenance);
    }
}
