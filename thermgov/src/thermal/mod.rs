//! Closed-loop CPU thermal governor.
//!
//! The [`Governor`] turns temperature readings into one of four throttle
//! levels and caps CPU frequency accordingly. The [`Poller`] drives it on a
//! fixed interval and serializes operator commands through a
//! [`GovernorHandle`].

mod config;
mod freq_table;
mod gateway;
mod governor;
mod level;
mod poller;
mod profile;
mod stats;

pub use config::{ConfigError, ConfigField, ConfigPatch, ThermalConfig};
pub use freq_table::{FrequencyTable, TableError};
pub use gateway::{
    CeilingOwnership, CpuPolicy, GatewayError, PolicyGateway, PowerControl, REFERENCE_CORE,
    TemperatureSensor,
};
pub use governor::{CycleOutcome, Governor, GovernorSnapshot, Mode};
pub use level::{ThrottleLevel, Transition};
pub use poller::{GovernorHandle, HandleError, Poller};
pub use profile::{Band, DynamicOffsets, ProfileError, ThresholdProfile};
pub use stats::{DwellTimes, ThrottleStats};
