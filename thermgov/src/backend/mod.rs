//! Hardware backends the governor can drive.
//!
//! - [`sysfs`]: the Linux thermal and cpufreq interfaces under `/sys`.
//! - [`sim`]: in-memory hardware for development and tests.

pub mod sim;
pub mod sysfs;

use serde::Deserialize;
use strum::{Display, EnumString};

use crate::thermal::{CpuPolicy, PowerControl, TemperatureSensor};

/// The set of external collaborators a governor is built from.
pub struct Backend {
    pub sensor: Box<dyn TemperatureSensor>,
    pub policy: Box<dyn CpuPolicy>,
    pub power: Box<dyn PowerControl>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Sysfs,
    Sim,
}
