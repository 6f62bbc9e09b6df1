//! Network statistics over stored readings.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use crate::simulation::types::{Device, Reading};

/// Delivered and attempted uplinks of one spreading factor.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DeliveryCount {
    pub attempted: usize,
    pub delivered: usize,
}

impl DeliveryCount {
    /// Packet delivery ratio in percent, 0 when nothing was attempted.
    pub fn ratio_percent(&self) -> f64 {
        if self.attempted == 0 {
            0.0
        } else {
            self.delivered as f64 / self.attempted as f64 * 100.0
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NetworkStats {
    pub readings: usize,
    pub delivered: usize,
    /// Averages over all readings, delivered or not. `None` without readings.
    pub avg_snr_db: Option<f64>,
    pub avg_rssi_dbm: Option<f64>,
    pub avg_water_level_cm: Option<f64>,
    pub by_spreading_factor: BTreeMap<u8, DeliveryCount>,
}

impl NetworkStats {
    /// Aggregate `readings`, attributing each to the spreading factor its device
    /// uses now. Readings of unknown devices count toward the totals only.
    pub fn compute(readings: &[Reading], devices: &[Device]) -> Self {
        let sf_by_device: HashMap<u32, u8> = devices.iter().map(|d| (d.id, d.spreading_factor)).collect();
        let mut by_spreading_factor: BTreeMap<u8, DeliveryCount> = BTreeMap::new();
        let (mut snr, mut rssi, mut level) = (0.0, 0.0, 0.0);
        let mut delivered = 0;

        for reading in readings {
            snr += reading.snr_db;
            rssi += reading.rssi_dbm;
            level += reading.water_level_cm;
            if reading.delivered {
                delivered += 1;
            }
            if let Some(sf) = sf_by_device.get(&reading.device_id) {
                let count = by_spreading_factor.entry(*sf).or_default();
                count.attempted += 1;
                if reading.delivered {
                    count.delivered += 1;
                }
            }
        }

        let n = readings.len();
        let average = |sum: f64| if n == 0 { None } else { Some(sum / n as f64) };
        Self {
            readings: n,
            delivered,
            avg_snr_db: average(snr),
            avg_rssi_dbm: average(rssi),
            avg_water_level_cm: average(level),
            by_spreading_factor,
        }
    }

    pub fn delivery_ratio_percent(&self) -> f64 {
        DeliveryCount {
            attempted: self.readings,
            delivered: self.delivered,
        }
        .ratio_percent()
    }
}

impl fmt::Display for NetworkStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} readings, PDR {:.1}%", self.readings, self.delivery_ratio_percent())?;
        if let (Some(snr), Some(rssi), Some(level)) = (self.avg_snr_db, self.avg_rssi_dbm, self.avg_water_level_cm) {
            write!(f, ", avg SNR {:.1} dB, avg RSSI {:.1} dBm, avg level {:.1} cm", snr, rssi, level)?;
        }
        for (sf, count) in &self.by_spreading_factor {
            write!(f, ", SF{} {:.1}%", sf, count.ratio_percent())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::geometry::GeoPoint;
    use chrono::{TimeZone, Utc};

    fn reading(device_id: u32, snr_db: f64, delivered: bool) -> Reading {
        Reading {
            device_id,
            timestamp: Utc.with_ymd_and_hms(2024, 7, 1, 12, 0, 0).unwrap(),
            water_level_cm: 20.0,
            snr_db,
            rssi_dbm: snr_db - 174.0,
            delivered,
        }
    }

    #[test]
    fn empty_readings_have_no_averages() {
        let stats = NetworkStats::compute(&[], &[]);
        assert_eq!(stats.readings, 0);
        assert_eq!(stats.avg_snr_db, None);
        assert_eq!(stats.delivery_ratio_percent(), 0.0);
    }

    #[test]
    fn delivery_ratio_per_spreading_factor() {
        let devices = [
            Device::new(1, "a", "", GeoPoint::new(23.8, 90.4), 7, 14.0),
            Device::new(2, "b", "", GeoPoint::new(23.8, 90.4), 12, 14.0),
        ];
        let readings = [reading(1, 10.0, true), reading(1, 0.0, false), reading(2, -10.0, true), reading(3, 0.0, true)];
        let stats = NetworkStats::compute(&readings, &devices);

        assert_eq!(stats.readings, 4);
        assert_eq!(stats.delivery_ratio_percent(), 75.0);
        assert_eq!(stats.avg_snr_db, Some(0.0));
        assert_eq!(stats.by_spreading_factor[&7].ratio_percent(), 50.0);
        assert_eq!(stats.by_spreading_factor[&12].ratio_percent(), 100.0);
        assert_eq!(stats.by_spreading_factor.len(), 2);
    }
}
