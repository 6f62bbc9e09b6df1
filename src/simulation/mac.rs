//! Simplified LoRaWAN MAC layer.
//!
//! Tracks two sliding windows of recent uplinks:
//! - a per-device duty-cycle ledger (timestamps within the last hour)
//! - a network-wide collision history of `(device, SF, time)` records
//!
//! Transmissions on different spreading factors are treated as orthogonal and
//! never collide. Both windows are pruned after every mutating call, so memory
//! stays bounded by the traffic of one hour.

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use std::collections::{HashMap, VecDeque};

use super::types::{SpreadingFactorTable, TransmissionRecord};

/// Time-on-air per spreading factor (ms) for the sensor payload, SF7..=SF12.
pub const DEFAULT_AIRTIME_MS: SpreadingFactorTable = SpreadingFactorTable::new([41.0, 72.0, 144.0, 288.0, 577.0, 1155.0]);

/// Airtime reported for spreading factors outside the table.
pub const FALLBACK_AIRTIME_MS: f64 = 100.0;

/// Width of both sliding windows.
fn ledger_window() -> Duration {
    Duration::hours(1)
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct MacParameters {
    /// Uplinks a single device may send within any one-hour window.
    pub max_messages_per_hour: usize,
    /// Half-width of the collision window around a transmission (seconds).
    pub collision_window_secs: f64,
    /// Time-on-air per spreading factor (ms).
    pub airtime_ms: SpreadingFactorTable,
}

impl Default for MacParameters {
    fn default() -> Self {
        Self {
            max_messages_per_hour: 10,
            collision_window_secs: 2.0,
            airtime_ms: DEFAULT_AIRTIME_MS,
        }
    }
}

impl MacParameters {
    /// Non-finite or out-of-range widths saturate to the widest representable window.
    fn collision_window(&self) -> Duration {
        let millis = (self.collision_window_secs.max(0.0) * 1000.0).round();
        if !millis.is_finite() {
            return Duration::MAX;
        }
        Duration::try_milliseconds(millis as i64).unwrap_or(Duration::MAX)
    }
}

/// Admission result of one uplink attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UplinkAdmission {
    /// The device was within its hourly message budget.
    pub duty_cycle_ok: bool,
    /// No same-SF transmission from another device overlapped this one.
    pub no_collision: bool,
}

impl UplinkAdmission {
    /// The packet reached the air and was not destroyed by a collision.
    pub fn is_admitted(&self) -> bool {
        self.duty_cycle_ok && self.no_collision
    }
}

pub struct MacLayer {
    params: MacParameters,
    duty_cycle_ledger: HashMap<u32, VecDeque<DateTime<Utc>>>,
    transmission_history: VecDeque<TransmissionRecord>,
}

impl MacLayer {
    pub fn new(params: MacParameters) -> Self {
        Self {
            params,
            duty_cycle_ledger: HashMap::new(),
            transmission_history: VecDeque::new(),
        }
    }

    /// Whether `device_id` may transmit at `now` without exceeding its hourly budget.
    ///
    /// Prunes the device's ledger to entries newer than one hour before `now`.
    pub fn check_duty_cycle(&mut self, device_id: u32, now: DateTime<Utc>) -> bool {
        let cutoff = now - ledger_window();
        let ledger = self.duty_cycle_ledger.entry(device_id).or_default();
        ledger.retain(|t| *t > cutoff);
        ledger.len() < self.params.max_messages_per_hour
    }

    /// Whether another device's transmission on the same spreading factor lies
    /// within the collision window around `now`.
    pub fn detect_collision(&self, device_id: u32, spreading_factor: u8, now: DateTime<Utc>) -> bool {
        let window = self.params.collision_window();
        let start = now.checked_sub_signed(window).unwrap_or(DateTime::<Utc>::MIN_UTC);
        let end = now.checked_add_signed(window).unwrap_or(DateTime::<Utc>::MAX_UTC);
        self.transmission_history
            .iter()
            .any(|tx| tx.device_id != device_id && tx.spreading_factor == spreading_factor && tx.time >= start && tx.time <= end)
    }

    /// Run one uplink through duty-cycle and collision checks.
    ///
    /// A throttled uplink never reaches the air: nothing is recorded and it cannot
    /// collide. An admitted uplink is recorded in both ledgers even when it
    /// collided, since it still occupied the channel.
    pub fn process_uplink(&mut self, device_id: u32, spreading_factor: u8, now: DateTime<Utc>) -> UplinkAdmission {
        if !self.check_duty_cycle(device_id, now) {
            log::debug!("Device {} throttled by duty cycle at {}", device_id, now);
            return UplinkAdmission {
                duty_cycle_ok: false,
                no_collision: true,
            };
        }

        let collision = self.detect_collision(device_id, spreading_factor, now);
        if collision {
            log::debug!("Device {} collided on SF{} at {}", device_id, spreading_factor, now);
        }

        self.transmission_history.push_back(TransmissionRecord {
            device_id,
            spreading_factor,
            time: now,
        });
        self.duty_cycle_ledger.entry(device_id).or_default().push_back(now);

        let cutoff = now - ledger_window();
        self.transmission_history.retain(|tx| tx.time > cutoff);

        UplinkAdmission {
            duty_cycle_ok: true,
            no_collision: !collision,
        }
    }

    /// Time-on-air for `spreading_factor` in milliseconds.
    pub fn airtime_ms(&self, spreading_factor: u8) -> f64 {
        self.params.airtime_ms.get(spreading_factor).unwrap_or(FALLBACK_AIRTIME_MS)
    }

    /// Number of transmissions currently held in the collision history.
    pub fn history_len(&self) -> usize {
        self.transmission_history.len()
    }

    pub fn reset(&mut self) {
        self.duty_cycle_ledger.clear();
        self.transmission_history.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 7, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn duty_cycle_blocks_after_budget_and_recovers() {
        let mut mac = MacLayer::new(MacParameters::default());
        let start = t0();
        for i in 0..10 {
            let now = start + Duration::minutes(i * 5);
            assert!(mac.process_uplink(1, 7, now).duty_cycle_ok, "uplink {i} should pass");
        }
        let eleventh = start + Duration::minutes(50);
        let blocked = mac.process_uplink(1, 7, eleventh);
        assert_eq!(
            blocked,
            UplinkAdmission {
                duty_cycle_ok: false,
                no_collision: true
            }
        );

        let later = start + Duration::minutes(45) + Duration::hours(1) + Duration::seconds(1);
        assert!(mac.process_uplink(1, 7, later).duty_cycle_ok);
    }

    #[test]
    fn duty_cycle_is_per_device() {
        let mut mac = MacLayer::new(MacParameters {
            max_messages_per_hour: 1,
            ..MacParameters::default()
        });
        assert!(mac.process_uplink(1, 7, t0()).duty_cycle_ok);
        assert!(!mac.process_uplink(1, 7, t0() + Duration::minutes(1)).duty_cycle_ok);
        assert!(mac.process_uplink(2, 8, t0() + Duration::minutes(1)).duty_cycle_ok);
    }

    #[test]
    fn throttled_uplink_is_not_recorded() {
        let mut mac = MacLayer::new(MacParameters {
            max_messages_per_hour: 1,
            ..MacParameters::default()
        });
        mac.process_uplink(1, 7, t0());
        mac.process_uplink(1, 7, t0() + Duration::minutes(10));
        assert_eq!(mac.history_len(), 1);
        // The throttled attempt left no trace another device could collide with.
        assert!(!mac.detect_collision(2, 7, t0() + Duration::minutes(10)));
    }

    #[test]
    fn same_spreading_factor_at_same_instant_collides_both_ways() {
        let mut mac = MacLayer::new(MacParameters::default());
        let first = mac.process_uplink(1, 9, t0());
        let second = mac.process_uplink(2, 9, t0());
        assert!(first.no_collision);
        assert!(!second.no_collision);
        assert!(mac.detect_collision(1, 9, t0()));
        assert!(mac.detect_collision(2, 9, t0()));
    }

    #[test]
    fn different_spreading_factors_never_collide() {
        let mut mac = MacLayer::new(MacParameters::default());
        assert!(mac.process_uplink(1, 7, t0()).no_collision);
        assert!(mac.process_uplink(2, 8, t0()).no_collision);
        assert!(!mac.detect_collision(1, 7, t0()));
        assert!(!mac.detect_collision(2, 8, t0()));
    }

    #[test]
    fn device_never_collides_with_itself() {
        let mut mac = MacLayer::new(MacParameters::default());
        mac.process_uplink(1, 7, t0());
        assert!(!mac.detect_collision(1, 7, t0()));
    }

    #[test]
    fn collision_window_is_symmetric() {
        let mut mac = MacLayer::new(MacParameters::default());
        mac.process_uplink(1, 10, t0());
        assert!(mac.detect_collision(2, 10, t0() - Duration::seconds(2)));
        assert!(mac.detect_collision(2, 10, t0() + Duration::seconds(2)));
        assert!(!mac.detect_collision(2, 10, t0() + Duration::seconds(3)));
        assert!(!mac.detect_collision(2, 10, t0() - Duration::seconds(3)));
    }

    #[test]
    fn colliding_transmission_still_occupies_channel() {
        let mut mac = MacLayer::new(MacParameters::default());
        mac.process_uplink(1, 7, t0());
        let collided = mac.process_uplink(2, 7, t0() + Duration::seconds(1));
        assert!(!collided.is_admitted());
        assert_eq!(mac.history_len(), 2);
        // Device 1's record expired from the window, device 2's still blocks a third sender.
        assert!(mac.detect_collision(3, 7, t0() + Duration::seconds(3)));
    }

    #[test]
    fn unbounded_collision_window_saturates() {
        let mut mac = MacLayer::new(MacParameters {
            collision_window_secs: f64::INFINITY,
            ..MacParameters::default()
        });
        mac.process_uplink(1, 7, t0());
        assert!(!mac.process_uplink(2, 7, t0() + Duration::minutes(59)).no_collision);
    }

    #[test]
    fn history_is_pruned_to_one_hour() {
        let mut mac = MacLayer::new(MacParameters::default());
        mac.process_uplink(1, 7, t0());
        mac.process_uplink(2, 7, t0() + Duration::minutes(30));
        mac.process_uplink(3, 7, t0() + Duration::minutes(61));
        assert_eq!(mac.history_len(), 2);
    }

    #[test]
    fn airtime_table_is_monotonic_with_fallback() {
        let mac = MacLayer::new(MacParameters::default());
        assert_eq!(mac.airtime_ms(7), 41.0);
        assert_eq!(mac.airtime_ms(12), 1155.0);
        let mut previous = 0.0;
        for sf in 7..=12 {
            assert!(mac.airtime_ms(sf) > previous);
            previous = mac.airtime_ms(sf);
        }
        assert_eq!(mac.airtime_ms(5), FALLBACK_AIRTIME_MS);
    }

    #[test]
    fn reset_clears_ledgers() {
        let mut mac = MacLayer::new(MacParameters {
            max_messages_per_hour: 1,
            ..MacParameters::default()
        });
        mac.process_uplink(1, 7, t0());
        assert!(!mac.check_duty_cycle(1, t0()));
        mac.reset();
        assert_eq!(mac.history_len(), 0);
        assert!(mac.check_duty_cycle(1, t0()));
    }
}
