//! Simulation engine core.
//!
//! ## Module Organization
//!
//! - `types`: Devices, readings, alerts and per-SF lookup tables
//! - `geometry`: Haversine distance between coordinates
//! - `signal_calculations`: Path loss, SNR/RSSI, packet error rate
//! - `mac`: Duty-cycle ledger and same-SF collision detection
//! - `traffic`: Water-level random walk and SF tier assignment
//! - `store`: Record store contract and the in-memory implementation
//! - `alerts`: Threshold alert evaluation
//! - `runner`: Per-step orchestration of all of the above

pub mod alerts;
pub mod geometry;
pub mod mac;
pub mod runner;
pub mod signal_calculations;
pub mod store;
pub mod traffic;
pub mod types;

pub use alerts::{AlertEvaluator, ThresholdAlertEvaluator};
pub use runner::{SimulationRunner, StepError, StepReport};
pub use store::{MemoryStore, Store, StoreError};
pub use types::{Device, DeviceStatus, Reading};
