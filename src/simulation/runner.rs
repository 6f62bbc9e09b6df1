//! Discrete-time simulation runner.
//!
//! One [`SimulationRunner::step`] advances the simulated clock and pushes every
//! ONLINE device through the uplink pipeline:
//!
//! 1) water level from the operator override or the traffic model
//! 2) distance to the gateway, path loss with shadowing, SNR and RSSI
//! 3) MAC admission (duty cycle, same-SF collision)
//! 4) stochastic delivery from the packet error rate
//! 5) reading, last-contact and connectivity status written to the store
//! 6) water-level and rate-of-rise alert evaluation
//!
//! Devices that are OFFLINE or under MAINTENANCE do not transmit. Every device
//! is handed to offline-alert evaluation, so alerts close once a device is back. All store writes of a step happen inside
//! one transaction which is rolled back if the commit fails.

use chrono::{DateTime, Duration, Utc};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;

use super::alerts::{AlertAction, AlertEvaluator};
use super::geometry::distance;
use super::mac::{MacLayer, UplinkAdmission};
use super::signal_calculations::{calculate_path_loss, calculate_rssi, calculate_snr, is_packet_delivered};
use super::store::{Store, StoreError};
use super::traffic::{DEFAULT_BASE_LEVEL_CM, next_water_level};
use super::types::{Device, DeviceStatus, DeviceUpdate, Reading};
use crate::config::SimulationConfig;

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct RunnerParameters {
    /// Step size used when a step is requested without an explicit delta.
    pub transmission_interval_secs: i64,
    /// Silence after which a device is considered OFFLINE.
    pub offline_threshold_minutes: i64,
    /// Dry-weather level the traffic model starts each sensor from.
    pub base_water_level_cm: f64,
}

impl Default for RunnerParameters {
    fn default() -> Self {
        Self {
            transmission_interval_secs: 300,
            offline_threshold_minutes: 30,
            base_water_level_cm: DEFAULT_BASE_LEVEL_CM,
        }
    }
}

/// Failure of a single device inside a step. Logged and skipped.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceError {
    InvalidPosition(u32),
    Store(StoreError),
}

impl fmt::Display for DeviceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceError::InvalidPosition(id) => write!(f, "Device {} has invalid coordinates", id),
            DeviceError::Store(e) => write!(f, "Store error: {}", e),
        }
    }
}

impl std::error::Error for DeviceError {}

impl From<StoreError> for DeviceError {
    fn from(e: StoreError) -> Self {
        DeviceError::Store(e)
    }
}

/// Failure of a whole step, surfaced to the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum StepError {
    /// Requested delta was zero, negative or too large for the clock.
    InvalidStepSize(i64),
    Store(StoreError),
    /// The step's writes could not be committed and were rolled back.
    Commit(StoreError),
}

impl fmt::Display for StepError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepError::InvalidStepSize(delta) => write!(f, "Invalid step size: {} seconds", delta),
            StepError::Store(e) => write!(f, "Store error: {}", e),
            StepError::Commit(e) => write!(f, "Step rolled back: {}", e),
        }
    }
}

impl std::error::Error for StepError {}

/// Summary of one executed step.
#[derive(Debug, Clone, PartialEq)]
pub struct StepReport {
    /// Simulated time the step ran at.
    pub time: DateTime<Utc>,
    pub devices_processed: usize,
    /// Uplinks that passed the duty-cycle check and went on air.
    pub transmissions: usize,
    pub delivered: usize,
    pub duty_cycle_blocked: usize,
    pub collisions: usize,
    pub failed_devices: usize,
    /// Devices that turned OFFLINE during this step.
    pub went_offline: Vec<u32>,
    pub alerts_opened: usize,
}

impl StepReport {
    fn new(time: DateTime<Utc>) -> Self {
        Self {
            time,
            devices_processed: 0,
            transmissions: 0,
            delivered: 0,
            duty_cycle_blocked: 0,
            collisions: 0,
            failed_devices: 0,
            went_offline: Vec::new(),
            alerts_opened: 0,
        }
    }
}

/// What happened to one device during a step.
struct UplinkOutcome {
    admission: UplinkAdmission,
    delivered: bool,
    went_offline: bool,
    alerts_opened: usize,
}

fn count_opened(action: AlertAction) -> usize {
    matches!(action, AlertAction::Opened(_)) as usize
}

pub struct SimulationRunner<S: Store, A: AlertEvaluator> {
    config: SimulationConfig,
    store: S,
    alerts: A,
    mac: MacLayer,
    rng: ChaCha8Rng,
    current_time: DateTime<Utc>,
    is_running: bool,
    /// Last generated level per device, the random walk's state.
    last_levels: HashMap<u32, f64>,
    /// First transmission attempt since the last reset, anchors the offline grace period.
    first_attempts: HashMap<u32, DateTime<Utc>>,
    overrides: HashMap<u32, f64>,
}

impl<S: Store, A: AlertEvaluator> SimulationRunner<S, A> {
    /// Create a stopped runner whose clock starts at wall-clock now.
    ///
    /// The random source is seeded from `config.seed`, or from a fresh random
    /// seed which is logged so the run can be replayed.
    pub fn new(config: SimulationConfig, store: S, alerts: A) -> Self {
        let seed = config.seed.unwrap_or_else(rand::random);
        log::info!("Simulation seed: {}", seed);
        let mac = MacLayer::new(config.mac.clone());
        Self {
            config,
            store,
            alerts,
            mac,
            rng: ChaCha8Rng::seed_from_u64(seed),
            current_time: Utc::now(),
            is_running: false,
            last_levels: HashMap::new(),
            first_attempts: HashMap::new(),
            overrides: HashMap::new(),
        }
    }

    pub fn with_rng(mut self, rng: ChaCha8Rng) -> Self {
        self.rng = rng;
        self
    }

    pub fn with_start_time(mut self, start: DateTime<Utc>) -> Self {
        self.current_time = start;
        self
    }

    pub fn start(&mut self) {
        if !self.is_running {
            log::info!("Simulation started at {}", self.current_time);
        }
        self.is_running = true;
    }

    pub fn stop(&mut self) {
        if self.is_running {
            log::info!("Simulation stopped at {}", self.current_time);
        }
        self.is_running = false;
    }

    pub fn is_running(&self) -> bool {
        self.is_running
    }

    pub fn current_time(&self) -> DateTime<Utc> {
        self.current_time
    }

    pub fn mac(&self) -> &MacLayer {
        &self.mac
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    /// Clear MAC ledgers and per-device caches and move the clock to wall-clock now.
    ///
    /// Stored devices, readings and alerts are untouched, as are operator overrides.
    pub fn reset(&mut self) {
        self.mac.reset();
        self.last_levels.clear();
        self.first_attempts.clear();
        self.current_time = Utc::now();
        log::info!("Simulation reset, clock at {}", self.current_time);
    }

    /// Pin the water level reported by `device_id` until cleared.
    pub fn set_override(&mut self, device_id: u32, water_level_cm: f64) {
        log::info!("Water level override for device {}: {:.1} cm", device_id, water_level_cm);
        self.overrides.insert(device_id, water_level_cm);
    }

    pub fn clear_override(&mut self, device_id: u32) -> Option<f64> {
        let previous = self.overrides.remove(&device_id);
        if previous.is_some() {
            log::info!("Cleared water level override for device {}", device_id);
        }
        previous
    }

    pub fn overrides(&self) -> &HashMap<u32, f64> {
        &self.overrides
    }

    /// Advance the simulation by one step.
    ///
    /// # Parameters
    ///
    /// * `delta_seconds` - Clock advance, defaults to the transmission interval
    /// * `force` - Run even while the simulation is stopped (manual step)
    ///
    /// # Returns
    ///
    /// `Ok(None)` when stopped and not forced, otherwise the step summary.
    /// Per-device failures are logged and counted in the report; a failed commit
    /// rolls back every write of the step and is returned as [`StepError::Commit`].
    pub fn step(&mut self, delta_seconds: Option<i64>, force: bool) -> Result<Option<StepReport>, StepError> {
        if !self.is_running && !force {
            return Ok(None);
        }

        let delta = delta_seconds.unwrap_or(self.config.runner.transmission_interval_secs);
        if delta <= 0 {
            return Err(StepError::InvalidStepSize(delta));
        }
        let now = Duration::try_seconds(delta)
            .and_then(|d| self.current_time.checked_add_signed(d))
            .ok_or(StepError::InvalidStepSize(delta))?;
        self.current_time = now;

        self.store.begin();
        let mut report = StepReport::new(now);

        let devices = match self.store.list_online_devices() {
            Ok(devices) => devices,
            Err(e) => {
                self.store.rollback();
                log::error!("Failed to list online devices: {}", e);
                return Err(StepError::Store(e));
            }
        };

        for device in &devices {
            match self.process_device(device, now) {
                Ok(outcome) => {
                    report.devices_processed += 1;
                    if outcome.admission.duty_cycle_ok {
                        report.transmissions += 1;
                    } else {
                        report.duty_cycle_blocked += 1;
                    }
                    if !outcome.admission.no_collision {
                        report.collisions += 1;
                    }
                    if outcome.delivered {
                        report.delivered += 1;
                    }
                    if outcome.went_offline {
                        report.went_offline.push(device.id);
                    }
                    report.alerts_opened += outcome.alerts_opened;
                }
                Err(e) => {
                    log::error!("Error processing device {}: {}", device.id, e);
                    report.failed_devices += 1;
                }
            }
        }

        report.alerts_opened += self.evaluate_connectivity_alerts(now);

        if let Err(e) = self.store.commit() {
            self.store.rollback();
            log::error!("Commit failed at {}, step rolled back: {}", now, e);
            return Err(StepError::Commit(e));
        }

        log::debug!(
            "Step at {}: {} devices, {} delivered, {} blocked, {} collisions, {} failed",
            now,
            report.devices_processed,
            report.delivered,
            report.duty_cycle_blocked,
            report.collisions,
            report.failed_devices
        );
        Ok(Some(report))
    }

    fn process_device(&mut self, device: &Device, now: DateTime<Utc>) -> Result<UplinkOutcome, DeviceError> {
        if !device.position.is_valid() {
            return Err(DeviceError::InvalidPosition(device.id));
        }

        let previous = self.last_levels.get(&device.id).copied();
        let level = match self.overrides.get(&device.id) {
            Some(level) => *level,
            None => next_water_level(previous, self.config.runner.base_water_level_cm, &mut self.rng),
        };
        self.last_levels.insert(device.id, level);
        let first_attempt = *self.first_attempts.entry(device.id).or_insert(now);

        let channel = &self.config.channel;
        let meters = distance(&device.position, &self.config.gateway);
        let path_loss = calculate_path_loss(meters, channel, &mut self.rng);
        let snr = calculate_snr(device.tx_power_dbm, path_loss, channel.noise_floor);
        let rssi = calculate_rssi(device.tx_power_dbm, path_loss);

        let admission = self.mac.process_uplink(device.id, device.spreading_factor, now);
        let delivered = admission.is_admitted() && is_packet_delivered(snr, device.spreading_factor, &channel.sensitivity, &mut self.rng);

        log::debug!(
            "Device {} SF{} at {:.0} m: PL {:.1} dB, SNR {:.1} dB, RSSI {:.1} dBm, level {:.1} cm, delivered {}",
            device.id,
            device.spreading_factor,
            meters,
            path_loss,
            snr,
            rssi,
            level,
            delivered
        );

        self.store.append_reading(Reading {
            device_id: device.id,
            timestamp: now,
            water_level_cm: level,
            snr_db: snr,
            rssi_dbm: rssi,
            delivered,
        })?;

        let last_contact = if delivered { Some(now) } else { device.last_contact };
        let reference = last_contact.unwrap_or(first_attempt);
        let offline_threshold = Duration::try_minutes(self.config.runner.offline_threshold_minutes).unwrap_or(Duration::MAX);
        let status = if now - reference > offline_threshold { DeviceStatus::Offline } else { DeviceStatus::Online };

        let update = DeviceUpdate {
            status: (status != device.status).then_some(status),
            last_contact: delivered.then_some(now),
        };
        if update != DeviceUpdate::default() {
            self.store.update_device(device.id, update)?;
        }
        let went_offline = status == DeviceStatus::Offline && device.status != DeviceStatus::Offline;
        if went_offline {
            log::warn!("Device {} ({}) went offline at {}", device.id, device.name, now);
        }

        let mut alerts_opened = count_opened(self.alerts.evaluate_water_level(&mut self.store, device.id, level, now)?);
        alerts_opened += count_opened(self.alerts.evaluate_rate_of_rise(&mut self.store, device.id, now)?);

        Ok(UplinkOutcome {
            admission,
            delivered,
            went_offline,
            alerts_opened,
        })
    }

    /// Offline-alert evaluation for every device after the transmission pass.
    ///
    /// Devices that are not ONLINE get an alert opened, ONLINE devices get any
    /// open one resolved. Returns the number of alerts opened.
    fn evaluate_connectivity_alerts(&mut self, now: DateTime<Utc>) -> usize {
        let devices = match self.store.list_all_devices() {
            Ok(devices) => devices,
            Err(e) => {
                log::error!("Failed to list devices for offline alerts: {}", e);
                return 0;
            }
        };
        let mut opened = 0;
        for device in &devices {
            match self.alerts.evaluate_offline(&mut self.store, device, now) {
                Ok(action) => opened += count_opened(action),
                Err(e) => log::error!("Offline alert evaluation failed for device {}: {}", device.id, e),
            }
        }
        opened
    }
}
