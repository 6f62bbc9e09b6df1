//! Alert evaluation invoked by the runner after every uplink.
//!
//! Three conditions are watched per device:
//! - water level above a fixed threshold
//! - rate of rise over the recent delivered readings above a threshold
//! - device not ONLINE (offline or under maintenance)
//!
//! Evaluation is idempotent: while an unresolved alert of a kind exists for a
//! device, no second one is opened. When the condition clears, the open alert is
//! resolved.

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;

use super::store::{Store, StoreError};
use super::types::{AlertKind, Device, DeviceStatus, NewAlert, Severity};

/// Level at which a water-level alert escalates to HIGH, as a multiple of the threshold.
const HIGH_LEVEL_FACTOR: f64 = 1.5;
/// Rate at which a rate-of-rise alert escalates to HIGH, as a multiple of the threshold.
const HIGH_RATE_FACTOR: f64 = 2.0;

/// What an evaluation did to the alert table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertAction {
    /// Condition absent and nothing was open, or too little data to decide.
    Unchanged,
    /// Condition present, an alert was already open.
    AlreadyOpen(u64),
    Opened(u64),
    Resolved(u64),
}

/// Alert collaborator of the simulation runner.
pub trait AlertEvaluator {
    fn evaluate_water_level(&self, store: &mut dyn Store, device_id: u32, water_level_cm: f64, now: DateTime<Utc>) -> Result<AlertAction, StoreError>;
    fn evaluate_rate_of_rise(&self, store: &mut dyn Store, device_id: u32, now: DateTime<Utc>) -> Result<AlertAction, StoreError>;
    fn evaluate_offline(&self, store: &mut dyn Store, device: &Device, now: DateTime<Utc>) -> Result<AlertAction, StoreError>;
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct AlertThresholds {
    pub water_level_threshold_cm: f64,
    pub rate_of_rise_threshold_cm_per_hour: f64,
    /// How far back delivered readings count toward the rate of rise.
    pub rate_window_minutes: i64,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            water_level_threshold_cm: 50.0,
            rate_of_rise_threshold_cm_per_hour: 10.0,
            rate_window_minutes: 60,
        }
    }
}

/// Fixed-threshold [`AlertEvaluator`].
#[derive(Debug, Clone, Default)]
pub struct ThresholdAlertEvaluator {
    thresholds: AlertThresholds,
}

impl ThresholdAlertEvaluator {
    pub fn new(thresholds: AlertThresholds) -> Self {
        Self { thresholds }
    }

    /// Rate of rise in cm/hour between the oldest and newest delivered reading
    /// inside the window, `None` with fewer than two readings or no elapsed time.
    pub fn rate_of_rise(&self, store: &dyn Store, device_id: u32, now: DateTime<Utc>) -> Result<Option<(f64, f64)>, StoreError> {
        let since = Duration::try_minutes(self.thresholds.rate_window_minutes)
            .and_then(|window| now.checked_sub_signed(window))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let delivered: Vec<_> = store.readings_since(device_id, since)?.into_iter().filter(|r| r.delivered).collect();
        let (Some(first), Some(last)) = (delivered.first(), delivered.last()) else {
            return Ok(None);
        };
        if delivered.len() < 2 {
            return Ok(None);
        }
        let hours = (last.timestamp - first.timestamp).num_milliseconds() as f64 / 3_600_000.0;
        if hours <= 0.0 {
            return Ok(None);
        }
        Ok(Some(((last.water_level_cm - first.water_level_cm) / hours, last.water_level_cm)))
    }
}

/// Open `alert` unless one of its kind is already open for the device.
fn open_once(store: &mut dyn Store, alert: NewAlert) -> Result<AlertAction, StoreError> {
    if let Some(existing) = store.open_alert(alert.device_id, alert.kind)? {
        return Ok(AlertAction::AlreadyOpen(existing.id));
    }
    let device_id = alert.device_id;
    let kind = alert.kind;
    let id = store.create_alert(alert)?;
    log::info!("Opened {} alert {} for device {}", kind, id, device_id);
    Ok(AlertAction::Opened(id))
}

fn resolve_open(store: &mut dyn Store, device_id: u32, kind: AlertKind, now: DateTime<Utc>) -> Result<AlertAction, StoreError> {
    match store.open_alert(device_id, kind)? {
        Some(existing) => {
            store.resolve_alert(existing.id, now)?;
            log::info!("Resolved {} alert {} for device {}", kind, existing.id, device_id);
            Ok(AlertAction::Resolved(existing.id))
        }
        None => Ok(AlertAction::Unchanged),
    }
}

impl AlertEvaluator for ThresholdAlertEvaluator {
    fn evaluate_water_level(&self, store: &mut dyn Store, device_id: u32, water_level_cm: f64, now: DateTime<Utc>) -> Result<AlertAction, StoreError> {
        let threshold = self.thresholds.water_level_threshold_cm;
        if water_level_cm <= threshold {
            return resolve_open(store, device_id, AlertKind::HighWaterLevel, now);
        }
        let severity = if water_level_cm > threshold * HIGH_LEVEL_FACTOR { Severity::High } else { Severity::Medium };
        open_once(
            store,
            NewAlert {
                device_id,
                kind: AlertKind::HighWaterLevel,
                severity,
                message: format!("Water level {:.1}cm exceeds threshold of {}cm", water_level_cm, threshold),
                water_level_cm: Some(water_level_cm),
                threshold_cm: Some(threshold),
                created_at: now,
            },
        )
    }

    fn evaluate_rate_of_rise(&self, store: &mut dyn Store, device_id: u32, now: DateTime<Utc>) -> Result<AlertAction, StoreError> {
        let threshold = self.thresholds.rate_of_rise_threshold_cm_per_hour;
        let Some((rate, latest_level)) = self.rate_of_rise(store, device_id, now)? else {
            return Ok(AlertAction::Unchanged);
        };
        if rate <= threshold {
            return resolve_open(store, device_id, AlertKind::RateOfRise, now);
        }
        let severity = if rate > threshold * HIGH_RATE_FACTOR { Severity::High } else { Severity::Medium };
        open_once(
            store,
            NewAlert {
                device_id,
                kind: AlertKind::RateOfRise,
                severity,
                message: format!("Water level rising rapidly: {:.1}cm/hour (threshold: {}cm/hour)", rate, threshold),
                water_level_cm: Some(latest_level),
                threshold_cm: None,
                created_at: now,
            },
        )
    }

    fn evaluate_offline(&self, store: &mut dyn Store, device: &Device, now: DateTime<Utc>) -> Result<AlertAction, StoreError> {
        if device.status == DeviceStatus::Online {
            return resolve_open(store, device.id, AlertKind::DeviceOffline, now);
        }
        open_once(
            store,
            NewAlert {
                device_id: device.id,
                kind: AlertKind::DeviceOffline,
                severity: Severity::Medium,
                message: format!("Device {} is offline", device.name),
                water_level_cm: None,
                threshold_cm: None,
                created_at: now,
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::geometry::GeoPoint;
    use crate::simulation::store::MemoryStore;
    use crate::simulation::types::{AlertStatus, Reading};
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 7, 1, 12, 0, 0).unwrap()
    }

    fn store() -> MemoryStore {
        MemoryStore::with_devices([Device::new(1, "Wari Sensor 1", "Wari", GeoPoint::new(23.71, 90.40), 9, 14.0)]).unwrap()
    }

    fn push(store: &mut MemoryStore, minutes: i64, level: f64, delivered: bool) {
        store
            .append_reading(Reading {
                device_id: 1,
                timestamp: t0() + Duration::minutes(minutes),
                water_level_cm: level,
                snr_db: 10.0,
                rssi_dbm: -100.0,
                delivered,
            })
            .unwrap();
    }

    #[test]
    fn water_level_alert_is_idempotent() {
        let evaluator = ThresholdAlertEvaluator::default();
        let mut store = store();
        let first = evaluator.evaluate_water_level(&mut store, 1, 60.0, t0()).unwrap();
        let AlertAction::Opened(id) = first else { panic!("expected an alert, got {first:?}") };
        assert_eq!(evaluator.evaluate_water_level(&mut store, 1, 65.0, t0()).unwrap(), AlertAction::AlreadyOpen(id));
        assert_eq!(store.alerts().len(), 1);
        assert_eq!(store.alerts()[0].severity, Severity::Medium);
        assert_eq!(store.alerts()[0].message, "Water level 60.0cm exceeds threshold of 50cm");
    }

    #[test]
    fn acknowledged_alert_still_suppresses_duplicates() {
        let evaluator = ThresholdAlertEvaluator::default();
        let mut store = store();
        let AlertAction::Opened(id) = evaluator.evaluate_water_level(&mut store, 1, 60.0, t0()).unwrap() else { panic!() };
        store.acknowledge_alert(id).unwrap();
        assert_eq!(evaluator.evaluate_water_level(&mut store, 1, 61.0, t0()).unwrap(), AlertAction::AlreadyOpen(id));
    }

    #[test]
    fn water_level_severity_escalates() {
        let evaluator = ThresholdAlertEvaluator::default();
        let mut store = store();
        evaluator.evaluate_water_level(&mut store, 1, 80.0, t0()).unwrap();
        assert_eq!(store.alerts()[0].severity, Severity::High);
    }

    #[test]
    fn water_level_alert_resolves_when_level_drops() {
        let evaluator = ThresholdAlertEvaluator::default();
        let mut store = store();
        evaluator.evaluate_water_level(&mut store, 1, 60.0, t0()).unwrap();
        let later = t0() + Duration::minutes(5);
        let action = evaluator.evaluate_water_level(&mut store, 1, 50.0, later).unwrap();
        assert!(matches!(action, AlertAction::Resolved(_)));
        assert_eq!(store.alerts()[0].status, AlertStatus::Resolved);
        assert_eq!(store.alerts()[0].resolved_at, Some(later));
        assert_eq!(evaluator.evaluate_water_level(&mut store, 1, 40.0, later).unwrap(), AlertAction::Unchanged);
    }

    #[test]
    fn rate_of_rise_uses_delivered_readings_only() {
        let evaluator = ThresholdAlertEvaluator::default();
        let mut store = store();
        push(&mut store, 0, 10.0, true);
        push(&mut store, 15, 90.0, false);
        push(&mut store, 30, 14.0, true);
        let now = t0() + Duration::minutes(30);
        let (rate, latest) = evaluator.rate_of_rise(&store, 1, now).unwrap().unwrap();
        assert!((rate - 8.0).abs() < 1e-9, "got {rate}");
        assert_eq!(latest, 14.0);
        assert_eq!(evaluator.evaluate_rate_of_rise(&mut store, 1, now).unwrap(), AlertAction::Unchanged);
    }

    #[test]
    fn rate_of_rise_needs_two_readings() {
        let evaluator = ThresholdAlertEvaluator::default();
        let mut store = store();
        push(&mut store, 0, 10.0, true);
        assert_eq!(evaluator.rate_of_rise(&store, 1, t0()).unwrap(), None);
    }

    #[test]
    fn fast_rise_opens_high_alert() {
        let evaluator = ThresholdAlertEvaluator::default();
        let mut store = store();
        push(&mut store, 0, 10.0, true);
        push(&mut store, 30, 25.0, true);
        let now = t0() + Duration::minutes(30);
        assert!(matches!(evaluator.evaluate_rate_of_rise(&mut store, 1, now).unwrap(), AlertAction::Opened(_)));
        let alert = &store.alerts()[0];
        assert_eq!(alert.kind, AlertKind::RateOfRise);
        assert_eq!(alert.severity, Severity::High);
        assert_eq!(alert.water_level_cm, Some(25.0));
    }

    #[test]
    fn readings_outside_window_are_ignored() {
        let evaluator = ThresholdAlertEvaluator::default();
        let mut store = store();
        push(&mut store, 0, 0.0, true);
        push(&mut store, 70, 30.0, true);
        push(&mut store, 80, 31.0, true);
        let now = t0() + Duration::minutes(80);
        let (rate, _) = evaluator.rate_of_rise(&store, 1, now).unwrap().unwrap();
        assert!((rate - 6.0).abs() < 1e-9, "got {rate}");
    }

    #[test]
    fn offline_alert_opens_and_resolves() {
        let evaluator = ThresholdAlertEvaluator::default();
        let mut store = store();
        let mut device = store.device(1).cloned().unwrap();
        device.status = DeviceStatus::Maintenance;
        assert!(matches!(evaluator.evaluate_offline(&mut store, &device, t0()).unwrap(), AlertAction::Opened(_)));
        assert_eq!(store.alerts()[0].message, "Device Wari Sensor 1 is offline");
        assert!(matches!(evaluator.evaluate_offline(&mut store, &device, t0()).unwrap(), AlertAction::AlreadyOpen(_)));

        device.status = DeviceStatus::Online;
        assert!(matches!(evaluator.evaluate_offline(&mut store, &device, t0()).unwrap(), AlertAction::Resolved(_)));
    }
}
