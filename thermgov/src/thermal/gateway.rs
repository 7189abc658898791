//! Narrow interfaces to the hardware the governor controls.
//!
//! The governor never touches the sensor driver, the cpufreq subsystem or
//! the power-off facility directly; it goes through the traits below. The
//! [`PolicyGateway`] wraps a [`CpuPolicy`] and keeps track of who last
//! changed the frequency ceiling.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use super::freq_table::{FrequencyTable, TableError};
use crate::tracing::prelude::*;

/// Core whose policy and frequency table stand in for the whole CPU.
pub const REFERENCE_CORE: usize = 0;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("temperature sensor {sensor_id} unreadable: {reason}")]
    Sensor { sensor_id: u32, reason: String },

    #[error("cpu{core} frequency policy unavailable: {reason}")]
    PolicyUnavailable { core: usize, reason: String },

    #[error("cpu{core} ceiling update to {khz} kHz failed: {reason}")]
    SetCeiling {
        core: usize,
        khz: u32,
        reason: String,
    },

    #[error("cpu{core} could not be brought online: {reason}")]
    Online { core: usize, reason: String },

    #[error("frequency table unusable: {0}")]
    Table(#[from] TableError),
}

#[async_trait]
pub trait TemperatureSensor: Send {
    /// Current temperature of `sensor_id` in °C.
    async fn read_temperature(&mut self, sensor_id: u32) -> Result<i32, GatewayError>;
}

/// The operating system's CPU frequency policy and hotplug control.
#[async_trait]
pub trait CpuPolicy: Send {
    /// Number of possible cores, online or not.
    fn core_count(&self) -> usize;

    /// Current frequency ceiling of `core` in kHz.
    async fn ceiling(&mut self, core: usize) -> Result<u32, GatewayError>;

    async fn set_ceiling(&mut self, core: usize, khz: u32) -> Result<(), GatewayError>;

    async fn is_online(&mut self, core: usize) -> Result<bool, GatewayError>;

    async fn bring_online(&mut self, core: usize) -> Result<(), GatewayError>;

    /// Supported frequencies of `core` in kHz, in any order.
    async fn frequencies(&mut self, core: usize) -> Result<Vec<u32>, GatewayError>;
}

/// System power-off facility.
#[async_trait]
pub trait PowerControl: Send {
    /// Ask for an orderly power-off. Implementations force the power-off
    /// themselves if the orderly path does not complete.
    async fn request_shutdown(&mut self, reason: &str) -> Result<(), GatewayError>;
}

/// Who last changed the frequency ceiling.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct CeilingOwnership {
    pub changed_externally: bool,
    pub changed_by_governor: bool,
}

impl CeilingOwnership {
    pub fn external_change_pending(&self) -> bool {
        self.changed_externally && !self.changed_by_governor
    }
}

pub struct PolicyGateway {
    policy: Box<dyn CpuPolicy>,
    ownership: CeilingOwnership,
    last_known_khz: Option<u32>,
}

impl PolicyGateway {
    pub fn new(policy: Box<dyn CpuPolicy>) -> Self {
        Self {
            policy,
            ownership: CeilingOwnership::default(),
            last_known_khz: None,
        }
    }

    pub fn ownership(&self) -> CeilingOwnership {
        self.ownership
    }

    /// Read the reference core's ceiling.
    ///
    /// A value different from the last ceiling this gateway saw or applied
    /// means someone else rewrote it, which is recorded as an external
    /// change.
    pub async fn observe_ceiling(&mut self) -> Result<u32, GatewayError> {
        let khz = self.policy.ceiling(REFERENCE_CORE).await?;

        if let Some(known) = self.last_known_khz.filter(|&known| known != khz) {
            debug!(
                known_khz = known,
                observed_khz = khz,
                "Frequency ceiling changed outside the governor"
            );
            self.mark_external_change();
        }

        self.last_known_khz = Some(khz);
        Ok(khz)
    }

    /// Set `khz` as the ceiling of every core.
    ///
    /// All cores are attempted even if some fail; the last failure is
    /// returned. Ownership passes to the governor either way. The recorded
    /// ceiling is what the reference core reports afterwards, so a failed
    /// or clamped write is not mistaken for an external change later.
    pub async fn apply_ceiling(&mut self, khz: u32) -> Result<(), GatewayError> {
        let mut result = Ok(());
        let mut reference_written = false;

        for core in 0..self.policy.core_count() {
            match self.policy.set_ceiling(core, khz).await {
                Ok(()) => {
                    debug!(core, ceiling_khz = khz, "Set CPU frequency ceiling");
                    reference_written |= core == REFERENCE_CORE;
                }
                Err(e) => {
                    warn!(core, ceiling_khz = khz, error = %e, "Failed to set CPU frequency ceiling");
                    result = Err(e);
                }
            }
        }

        self.ownership = CeilingOwnership {
            changed_externally: false,
            changed_by_governor: true,
        };

        if reference_written {
            match self.policy.ceiling(REFERENCE_CORE).await {
                Ok(actual) => {
                    if actual != khz {
                        debug!(requested_khz = khz, actual_khz = actual, "Ceiling write was clamped");
                    }
                    self.last_known_khz = Some(actual);
                }
                Err(e) => warn!(error = %e, "Failed to read back CPU frequency ceiling"),
            }
        }

        result
    }

    /// Bring every offline secondary core back online. Best effort.
    pub async fn online_all(&mut self) {
        for core in (REFERENCE_CORE + 1)..self.policy.core_count() {
            match self.policy.is_online(core).await {
                Ok(true) => {}
                Ok(false) => match self.policy.bring_online(core).await {
                    Ok(()) => info!(core, "Brought CPU back online"),
                    Err(e) => warn!(core, error = %e, "Failed to bring CPU online"),
                },
                Err(e) => warn!(core, error = %e, "Failed to query CPU online state"),
            }
        }
    }

    pub async fn frequency_table(&mut self) -> Result<FrequencyTable, GatewayError> {
        let mut freqs_khz = self.policy.frequencies(REFERENCE_CORE).await?;
        freqs_khz.sort_unstable();
        freqs_khz.dedup();
        Ok(FrequencyTable::new(freqs_khz)?)
    }

    /// Record that something other than the governor wrote the ceiling.
    pub fn mark_external_change(&mut self) {
        self.ownership = CeilingOwnership {
            changed_externally: true,
            changed_by_governor: false,
        };
    }

    /// Take ownership of the ceiling back, e.g. when the governor is
    /// re-enabled.
    pub fn claim_ownership(&mut self) {
        self.ownership = CeilingOwnership {
            changed_externally: false,
            changed_by_governor: true,
        };
    }
}
