//! Record store consumed by the simulation runner.
//!
//! The runner only needs a narrow slice of persistence: list devices, apply
//! partial device updates, append readings, and open/resolve alerts, all inside
//! one transaction per step. [`Store`] captures that contract; [`MemoryStore`]
//! is the in-process implementation the binary and the tests use.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt;

use super::types::{Alert, AlertKind, AlertStatus, Device, DeviceStatus, DeviceUpdate, NewAlert, Reading};

#[derive(Debug, Clone, PartialEq)]
pub enum StoreError {
    DeviceNotFound(u32),
    DuplicateDevice(u32),
    AlertNotFound(u64),
    CommitFailed(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::DeviceNotFound(id) => write!(f, "Device {} not found", id),
            StoreError::DuplicateDevice(id) => write!(f, "Device {} already exists", id),
            StoreError::AlertNotFound(id) => write!(f, "Alert {} not found", id),
            StoreError::CommitFailed(msg) => write!(f, "Commit failed: {}", msg),
        }
    }
}

impl std::error::Error for StoreError {}

/// Persistence contract of the simulation runner.
///
/// Writes made between [`Store::begin`] and [`Store::commit`] must become visible
/// to other readers together or not at all; reads inside the transaction see its
/// own uncommitted writes.
pub trait Store {
    fn begin(&mut self);
    fn commit(&mut self) -> Result<(), StoreError>;
    fn rollback(&mut self);

    fn list_online_devices(&self) -> Result<Vec<Device>, StoreError>;
    fn list_all_devices(&self) -> Result<Vec<Device>, StoreError>;
    fn update_device(&mut self, device_id: u32, update: DeviceUpdate) -> Result<(), StoreError>;

    fn append_reading(&mut self, reading: Reading) -> Result<(), StoreError>;
    /// Readings of `device_id` at or after `since`, oldest first.
    fn readings_since(&self, device_id: u32, since: DateTime<Utc>) -> Result<Vec<Reading>, StoreError>;

    /// The unresolved alert of `kind` for `device_id`, if any.
    fn open_alert(&self, device_id: u32, kind: AlertKind) -> Result<Option<Alert>, StoreError>;
    fn create_alert(&mut self, alert: NewAlert) -> Result<u64, StoreError>;
    fn resolve_alert(&mut self, alert_id: u64, at: DateTime<Utc>) -> Result<(), StoreError>;
}

#[derive(Debug, Clone, Default)]
struct Transaction {
    devices: BTreeMap<u32, Device>,
    alerts: Vec<Alert>,
    next_alert_id: u64,
    /// Length of the reading log when the transaction began.
    readings_mark: usize,
}

/// In-memory [`Store`].
///
/// A transaction snapshots the device and alert tables (both small). Readings
/// are appended to the log directly and truncated back to the mark on rollback,
/// so `begin` stays cheap as the log grows. Every accessor reads through the
/// open transaction.
#[derive(Debug, Default)]
pub struct MemoryStore {
    devices: BTreeMap<u32, Device>,
    readings: Vec<Reading>,
    alerts: Vec<Alert>,
    next_alert_id: u64,
    transaction: Option<Transaction>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store holding `devices`, rejecting duplicate ids.
    pub fn with_devices(devices: impl IntoIterator<Item = Device>) -> Result<Self, StoreError> {
        let mut store = Self::new();
        for device in devices {
            store.insert_device(device)?;
        }
        Ok(store)
    }

    pub fn insert_device(&mut self, device: Device) -> Result<(), StoreError> {
        let devices = self.devices_mut();
        if devices.contains_key(&device.id) {
            return Err(StoreError::DuplicateDevice(device.id));
        }
        devices.insert(device.id, device);
        Ok(())
    }

    pub fn remove_device(&mut self, device_id: u32) -> Result<Device, StoreError> {
        self.devices_mut().remove(&device_id).ok_or(StoreError::DeviceNotFound(device_id))
    }

    pub fn device(&self, device_id: u32) -> Option<&Device> {
        self.devices().get(&device_id)
    }

    /// Operator action: put a device into or out of maintenance, or force its status.
    pub fn set_device_status(&mut self, device_id: u32, status: DeviceStatus) -> Result<(), StoreError> {
        self.update_device(
            device_id,
            DeviceUpdate {
                status: Some(status),
                last_contact: None,
            },
        )
    }

    /// Reading log in append order, including writes of an open transaction.
    pub fn readings(&self) -> &[Reading] {
        &self.readings
    }

    pub fn alerts(&self) -> &[Alert] {
        match &self.transaction {
            Some(txn) => &txn.alerts,
            None => &self.alerts,
        }
    }

    pub fn open_alerts(&self) -> impl Iterator<Item = &Alert> {
        self.alerts().iter().filter(|a| a.is_open())
    }

    pub fn acknowledge_alert(&mut self, alert_id: u64) -> Result<(), StoreError> {
        let alert = self.alerts_mut().iter_mut().find(|a| a.id == alert_id).ok_or(StoreError::AlertNotFound(alert_id))?;
        if alert.status == AlertStatus::Active {
            alert.status = AlertStatus::Acknowledged;
        }
        Ok(())
    }

    pub fn in_transaction(&self) -> bool {
        self.transaction.is_some()
    }

    fn devices(&self) -> &BTreeMap<u32, Device> {
        match &self.transaction {
            Some(txn) => &txn.devices,
            None => &self.devices,
        }
    }

    fn devices_mut(&mut self) -> &mut BTreeMap<u32, Device> {
        match &mut self.transaction {
            Some(txn) => &mut txn.devices,
            None => &mut self.devices,
        }
    }

    fn alerts_mut(&mut self) -> &mut Vec<Alert> {
        match &mut self.transaction {
            Some(txn) => &mut txn.alerts,
            None => &mut self.alerts,
        }
    }

    fn take_alert_id(&mut self) -> u64 {
        let counter = match &mut self.transaction {
            Some(txn) => &mut txn.next_alert_id,
            None => &mut self.next_alert_id,
        };
        *counter += 1;
        *counter
    }
}

impl Store for MemoryStore {
    fn begin(&mut self) {
        if self.transaction.is_some() {
            log::warn!("Transaction already open, discarding its uncommitted writes");
            self.rollback();
        }
        self.transaction = Some(Transaction {
            devices: self.devices.clone(),
            alerts: self.alerts.clone(),
            next_alert_id: self.next_alert_id,
            readings_mark: self.readings.len(),
        });
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        if let Some(txn) = self.transaction.take() {
            self.devices = txn.devices;
            self.alerts = txn.alerts;
            self.next_alert_id = txn.next_alert_id;
        }
        Ok(())
    }

    fn rollback(&mut self) {
        if let Some(txn) = self.transaction.take() {
            log::debug!("Rolled back transaction with {} staged readings", self.readings.len() - txn.readings_mark);
            self.readings.truncate(txn.readings_mark);
        }
    }

    fn list_online_devices(&self) -> Result<Vec<Device>, StoreError> {
        Ok(self.devices().values().filter(|d| d.status == DeviceStatus::Online).cloned().collect())
    }

    fn list_all_devices(&self) -> Result<Vec<Device>, StoreError> {
        Ok(self.devices().values().cloned().collect())
    }

    fn update_device(&mut self, device_id: u32, update: DeviceUpdate) -> Result<(), StoreError> {
        let device = self.devices_mut().get_mut(&device_id).ok_or(StoreError::DeviceNotFound(device_id))?;
        if let Some(status) = update.status {
            device.status = status;
        }
        if let Some(last_contact) = update.last_contact {
            device.last_contact = Some(last_contact);
        }
        Ok(())
    }

    fn append_reading(&mut self, reading: Reading) -> Result<(), StoreError> {
        if !self.devices().contains_key(&reading.device_id) {
            return Err(StoreError::DeviceNotFound(reading.device_id));
        }
        self.readings.push(reading);
        Ok(())
    }

    fn readings_since(&self, device_id: u32, since: DateTime<Utc>) -> Result<Vec<Reading>, StoreError> {
        let mut readings: Vec<Reading> = self
            .readings
            .iter()
            .filter(|r| r.device_id == device_id && r.timestamp >= since)
            .cloned()
            .collect();
        readings.sort_by_key(|r| r.timestamp);
        Ok(readings)
    }

    fn open_alert(&self, device_id: u32, kind: AlertKind) -> Result<Option<Alert>, StoreError> {
        Ok(self.alerts().iter().find(|a| a.device_id == device_id && a.kind == kind && a.is_open()).cloned())
    }

    fn create_alert(&mut self, alert: NewAlert) -> Result<u64, StoreError> {
        let id = self.take_alert_id();
        self.alerts_mut().push(Alert {
            id,
            device_id: alert.device_id,
            kind: alert.kind,
            status: AlertStatus::Active,
            severity: alert.severity,
            message: alert.message,
            water_level_cm: alert.water_level_cm,
            threshold_cm: alert.threshold_cm,
            created_at: alert.created_at,
            resolved_at: None,
        });
        Ok(id)
    }

    fn resolve_alert(&mut self, alert_id: u64, at: DateTime<Utc>) -> Result<(), StoreError> {
        let alert = self.alerts_mut().iter_mut().find(|a| a.id == alert_id).ok_or(StoreError::AlertNotFound(alert_id))?;
        alert.status = AlertStatus::Resolved;
        alert.resolved_at = Some(at);
        Ok(())
    }
}
