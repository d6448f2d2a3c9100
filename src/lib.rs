//! Smart meter P1 bridge
//!
//! Reads the telegrams a smart meter writes to its P1 port, decodes the
//! configured OBIS references and publishes them, optionally averaged or
//! throttled, on an MQTT broker.

pub mod config;
pub mod metering_p1;
pub mod mqtt;
pub mod obis_utils;

// Re-export common types for easier access
pub use config::{Config, ConfigError};
pub use metering_p1::{P1Error, P1Manager, P1Processor};
pub use mqtt::{MqttManager, PublishData, Transmission};
