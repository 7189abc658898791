use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use utoipa::ToSchema;

use super::config::{ConfigError, ConfigField, ConfigPatch, ThermalConfig};
use super::freq_table::FrequencyTable;
use super::gateway::{CeilingOwnership, PolicyGateway, PowerControl, TemperatureSensor};
use super::level::{ThrottleLevel, Transition};
use super::profile::ThresholdProfile;
use super::stats::{DwellTimes, ThrottleStats};
use crate::backend::Backend;
use crate::tracing::prelude::*;
use crate::types::{AlarmStatus, DebouncedAlarm};

/// External inputs that gate polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Mode {
    /// Set by the operator; disabling hands the ceiling back.
    pub enabled: bool,
    /// Set while the system is in a low-power state such as screen-off.
    pub suspended: bool,
}

impl Mode {
    pub fn should_poll(&self) -> bool {
        self.enabled && !self.suspended
    }
}

/// What one control cycle did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Temperature could not be read; nothing was evaluated.
    SensorUnavailable,
    /// The frequency policy could not be read; no transition was evaluated.
    PolicyUnavailable,
    Evaluated {
        level: ThrottleLevel,
        applied_khz: Option<u32>,
    },
}

/// Point-in-time copy of the governor state for observers.
#[derive(Debug, Clone)]
pub struct GovernorSnapshot {
    pub mode: Mode,
    pub level: ThrottleLevel,
    pub temperature_c: Option<i32>,
    pub pre_throttle_khz: Option<u32>,
    pub ownership: CeilingOwnership,
    pub stats: ThrottleStats,
    pub config: ThermalConfig,
}

impl GovernorSnapshot {
    pub fn dwell_times(&self, now: Instant) -> DwellTimes {
        self.stats.dwell_times(now)
    }
}

/// The throttle state machine and everything it owns.
///
/// A `Governor` is driven by exactly one task (see
/// [`Poller`](super::Poller)); nothing else holds a reference to it.
pub struct Governor {
    config: ThermalConfig,
    sensor: Box<dyn TemperatureSensor>,
    gateway: PolicyGateway,
    power: Box<dyn PowerControl>,
    table: Option<FrequencyTable>,
    level: ThrottleLevel,
    pre_throttle_khz: Option<u32>,
    stats: ThrottleStats,
    overtemp: DebouncedAlarm,
    mode: Mode,
    temperature_c: Option<i32>,
}

impl Governor {
    /// Build an enabled governor. Fails if `config` is inconsistent.
    pub fn new(config: ThermalConfig, backend: Backend) -> Result<Self, ConfigError> {
        config.validate()?;

        Ok(Self {
            overtemp: DebouncedAlarm::new(config.shutdown_debounce()),
            config,
            sensor: backend.sensor,
            gateway: PolicyGateway::new(backend.policy),
            power: backend.power,
            table: None,
            level: ThrottleLevel::NONE,
            pre_throttle_khz: None,
            stats: ThrottleStats::default(),
            mode: Mode {
                enabled: true,
                suspended: false,
            },
            temperature_c: None,
        })
    }

    pub fn level(&self) -> ThrottleLevel {
        self.level
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn config(&self) -> &ThermalConfig {
        &self.config
    }

    pub fn poll_interval(&self) -> Duration {
        self.config.poll_interval()
    }

    pub fn snapshot(&self) -> GovernorSnapshot {
        GovernorSnapshot {
            mode: self.mode,
            level: self.level,
            temperature_c: self.temperature_c,
            pre_throttle_khz: self.pre_throttle_khz,
            ownership: self.gateway.ownership(),
            stats: self.stats,
            config: self.config.clone(),
        }
    }

    /// Run one control cycle.
    pub async fn cycle(&mut self) -> CycleOutcome {
        let sensor_id = self.config.sensor_id;
        let temp_c = match self.sensor.read_temperature(sensor_id).await {
            Ok(temp_c) => temp_c,
            Err(e) => {
                error!(sensor_id, error = %e, "Unable to read temperature sensor");
                return CycleOutcome::SensorUnavailable;
            }
        };
        self.temperature_c = Some(temp_c);

        let previous = self.level;
        let mut target_khz = self.check_shutdown(temp_c).await;

        let observed_khz = match self.gateway.observe_ceiling().await {
            Ok(khz) => khz,
            Err(e) => {
                warn!(error = %e, "Failed to read CPU frequency policy");
                self.stats.record(self.level, Instant::now());
                return CycleOutcome::PolicyUnavailable;
            }
        };

        if previous == ThrottleLevel::NONE {
            self.pre_throttle_khz = Some(observed_khz);
        }

        if self.config.dynamic_control && self.gateway.ownership().external_change_pending() {
            self.recompute_profile(observed_khz).await;
        }

        if let Some(transition) = Transition::evaluate(temp_c, self.level, &self.config.profile) {
            let next = transition.target();
            let khz = match self.config.profile.ceiling_khz(next) {
                Some(khz) => khz,
                None => self.restore_target(),
            };

            if transition == Transition::Release {
                self.gateway.online_all().await;
            }

            if next != self.level {
                warn!(
                    temp_c,
                    sensor_id,
                    from = %self.level,
                    to = %next,
                    ceiling_khz = khz,
                    "Throttle level changed"
                );
            }

            self.level = next;
            target_khz = Some(khz);
        }

        self.stats.record(self.level, Instant::now());

        if let Some(khz) = target_khz {
            if let Err(e) = self.gateway.apply_ceiling(khz).await {
                warn!(ceiling_khz = khz, error = %e, "Frequency ceiling not applied on every core");
            }
        }

        CycleOutcome::Evaluated {
            level: self.level,
            applied_khz: target_khz,
        }
    }

    /// Enable or disable the governor.
    ///
    /// Disabling restores the pre-throttle ceiling if throttled. Enabling
    /// takes ceiling ownership back and re-arms the shutdown alarm.
    pub async fn set_enabled(&mut self, enabled: bool) -> Mode {
        if enabled == self.mode.enabled {
            return self.mode;
        }

        self.mode.enabled = enabled;
        if enabled {
            self.gateway.claim_ownership();
            self.overtemp.reset();
            info!("Thermal guard enabled");
        } else {
            self.release().await;
            warn!("Thermal guard disabled");
        }

        self.mode
    }

    /// Treat the current ceiling as set by someone else, so the next cycle
    /// re-derives the profile when dynamic control is on.
    pub fn mark_external_change(&mut self) {
        info!("Frequency ceiling reported changed externally");
        self.gateway.mark_external_change();
    }

    pub fn set_suspended(&mut self, suspended: bool) -> Mode {
        if suspended != self.mode.suspended {
            self.mode.suspended = suspended;
            if suspended {
                info!("Thermal guard suspended");
            } else {
                info!("Thermal guard resumed");
            }
        }
        self.mode
    }

    /// Apply a configuration change. The current configuration is kept if
    /// the result would be invalid.
    pub fn update_config(&mut self, patch: &ConfigPatch) -> Result<&ThermalConfig, ConfigError> {
        let next = patch.apply_to(&self.config)?;

        if patch.touches(ConfigField::ShutdownDebounceMs) {
            self.overtemp = DebouncedAlarm::new(next.shutdown_debounce());
        }

        info!(?patch, "Configuration updated");
        self.config = next;
        Ok(&self.config)
    }

    /// Stop throttling and hand the ceiling back to whoever set it before.
    pub async fn release(&mut self) {
        if self.level.is_throttled() {
            let khz = self.restore_target();
            info!(level = %self.level, ceiling_khz = khz, "Restoring pre-throttle ceiling");

            if let Err(e) = self.gateway.apply_ceiling(khz).await {
                warn!(ceiling_khz = khz, error = %e, "Pre-throttle ceiling not restored on every core");
            }

            self.level = ThrottleLevel::NONE;
            self.stats.record(ThrottleLevel::NONE, Instant::now());
        }

        self.pre_throttle_khz = None;
    }

    fn restore_target(&self) -> u32 {
        match self.pre_throttle_khz {
            Some(khz) => khz,
            None => {
                error!(
                    fallback_khz = self.config.fallback_ceiling_khz,
                    "No pre-throttle ceiling captured, falling back"
                );
                self.config.fallback_ceiling_khz
            }
        }
    }

    /// Emergency path. Returns the ceiling to apply if over the shutdown
    /// temperature.
    async fn check_shutdown(&mut self, temp_c: i32) -> Option<u32> {
        let shutdown_temp_c = self.config.shutdown_temp_c;
        let over = temp_c >= shutdown_temp_c;

        match self.overtemp.check(over) {
            AlarmStatus::Triggered => {
                error!(
                    temp_c,
                    shutdown_temp_c,
                    sensor_id = self.config.sensor_id,
                    "OVERTEMP! Shutting down"
                );
                let reason = format!(
                    "sensor {} at {temp_c}°C reached shutdown temperature {shutdown_temp_c}°C",
                    self.config.sensor_id
                );
                if let Err(e) = self.power.request_shutdown(&reason).await {
                    error!(error = %e, "Shutdown request failed");
                }
            }
            AlarmStatus::Resolved => {
                info!(temp_c, shutdown_temp_c, "Temperature back below shutdown threshold");
            }
            AlarmStatus::Idle | AlarmStatus::Pending | AlarmStatus::Active => {}
        }

        if !over {
            return None;
        }

        let khz = self.config.profile.max.ceiling_khz;
        if self.level != ThrottleLevel::MAX {
            warn!(temp_c, ceiling_khz = khz, "Emergency throttle to max level");
        }
        self.level = ThrottleLevel::MAX;
        Some(khz)
    }

    async fn recompute_profile(&mut self, ceiling_khz: u32) {
        if self.table.is_none() {
            match self.gateway.frequency_table().await {
                Ok(table) => {
                    debug!(
                        entries = table.len(),
                        max_khz = table.max_khz(),
                        "Loaded frequency table"
                    );
                    self.table = Some(table);
                }
                Err(e) => {
                    warn!(error = %e, "Failed to load frequency table");
                    return;
                }
            }
        }

        let Some(table) = self.table.as_ref() else {
            return;
        };

        match ThresholdProfile::derive(
            table,
            ceiling_khz,
            &self.config.dynamic_offsets,
            self.config.min_dynamic_index,
        )
        .map_err(ConfigError::from)
        .and_then(|profile| {
            let mut candidate = self.config.clone();
            candidate.profile = profile;
            candidate.validate().map(|()| profile)
        }) {
            Ok(profile) => {
                if profile != self.config.profile {
                    info!(
                        anchor_khz = ceiling_khz,
                        low_engage_c = profile.low.engage_c,
                        mid_engage_c = profile.mid.engage_c,
                        max_engage_c = profile.max.engage_c,
                        "Derived thresholds from new frequency ceiling"
                    );
                }
                self.config.profile = profile;
            }
            Err(e) => debug!(error = %e, "Dynamic threshold recomputation skipped"),
        }
    }
}
