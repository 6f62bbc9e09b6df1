//! LoRaWAN flood-monitoring network simulator.
//!
//! - `simulation`: channel model, MAC layer, traffic model and the step runner
//! - `config`: TOML engine configuration
//! - `fleet`: sensor fleet files and demo fleet generation
//! - `stats`: delivery and signal statistics over readings
//! - `driver`: operator commands and the auto-advance loop

pub mod config;
pub mod driver;
pub mod fleet;
pub mod simulation;
pub mod stats;
