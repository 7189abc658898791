//! Linux sysfs backend.
//!
//! Temperatures come from the thermal class (`thermal_zone<N>/temp`, in
//! millidegrees), ceilings from cpufreq's `scaling_max_freq`, and hotplug
//! from `cpu<N>/online`. All paths are relative to a configurable root so
//! the backend can be pointed at a fake tree.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use tokio::process::Command;

use super::Backend;
use crate::thermal::{CpuPolicy, GatewayError, PowerControl, TemperatureSensor};
use crate::tracing::prelude::*;

/// Build a backend rooted at `sysfs_root` (normally `/sys`).
pub fn backend(sysfs_root: &Path, shutdown_grace: Duration) -> io::Result<Backend> {
    let policy = SysfsCpuPolicy::discover(sysfs_root)?;
    info!(
        cores = policy.core_count(),
        root = %sysfs_root.display(),
        "Discovered CPUs"
    );

    Ok(Backend {
        sensor: Box::new(SysfsSensor::new(sysfs_root)),
        policy: Box::new(policy),
        power: Box::new(SystemPower::new(shutdown_grace)),
    })
}

pub struct SysfsSensor {
    root: PathBuf,
}

impl SysfsSensor {
    pub fn new(sysfs_root: &Path) -> Self {
        Self {
            root: sysfs_root.join("class/thermal"),
        }
    }
}

#[async_trait]
impl TemperatureSensor for SysfsSensor {
    async fn read_temperature(&mut self, sensor_id: u32) -> Result<i32, GatewayError> {
        let path = self.root.join(format!("thermal_zone{sensor_id}/temp"));
        let sensor_error = |reason: String| GatewayError::Sensor { sensor_id, reason };

        let text = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| sensor_error(format!("{}: {e}", path.display())))?;
        let millidegrees: i64 = text
            .trim()
            .parse()
            .map_err(|_| sensor_error(format!("unparsable reading {:?}", text.trim())))?;

        i32::try_from(millidegrees / 1000)
            .map_err(|_| sensor_error(format!("reading {millidegrees} out of range")))
    }
}

pub struct SysfsCpuPolicy {
    root: PathBuf,
    cores: usize,
}

impl SysfsCpuPolicy {
    /// Count `cpu<N>` directories under `devices/system/cpu`.
    pub fn discover(sysfs_root: &Path) -> io::Result<Self> {
        let root = sysfs_root.join("devices/system/cpu");
        let pattern = Regex::new(r"^cpu(\d+)$").map_err(io::Error::other)?;

        let mut highest = None;
        for entry in std::fs::read_dir(&root)? {
            let name = entry?.file_name();
            let Some(index) = name
                .to_str()
                .and_then(|name| pattern.captures(name))
                .and_then(|caps| caps[1].parse::<usize>().ok())
            else {
                continue;
            };
            highest = highest.max(Some(index));
        }

        let cores = highest.map(|index| index + 1).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("no CPUs found under {}", root.display()),
            )
        })?;

        Ok(Self { root, cores })
    }

    fn cpufreq(&self, core: usize, attribute: &str) -> PathBuf {
        self.root.join(format!("cpu{core}/cpufreq/{attribute}"))
    }

    fn online_path(&self, core: usize) -> PathBuf {
        self.root.join(format!("cpu{core}/online"))
    }
}

#[async_trait]
impl CpuPolicy for SysfsCpuPolicy {
    fn core_count(&self) -> usize {
        self.cores
    }

    async fn ceiling(&mut self, core: usize) -> Result<u32, GatewayError> {
        let path = self.cpufreq(core, "scaling_max_freq");
        let unavailable = |reason: String| GatewayError::PolicyUnavailable { core, reason };

        let text = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| unavailable(format!("{}: {e}", path.display())))?;
        text.trim()
            .parse()
            .map_err(|_| unavailable(format!("unparsable ceiling {:?}", text.trim())))
    }

    async fn set_ceiling(&mut self, core: usize, khz: u32) -> Result<(), GatewayError> {
        let path = self.cpufreq(core, "scaling_max_freq");
        tokio::fs::write(&path, khz.to_string())
            .await
            .map_err(|e| GatewayError::SetCeiling {
                core,
                khz,
                reason: format!("{}: {e}", path.display()),
            })
    }

    async fn is_online(&mut self, core: usize) -> Result<bool, GatewayError> {
        match tokio::fs::read_to_string(self.online_path(core)).await {
            Ok(text) => Ok(text.trim() == "1"),
            // The boot CPU usually has no hotplug control and is always on.
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(true),
            Err(e) => Err(GatewayError::Online {
                core,
                reason: e.to_string(),
            }),
        }
    }

    async fn bring_online(&mut self, core: usize) -> Result<(), GatewayError> {
        tokio::fs::write(self.online_path(core), "1")
            .await
            .map_err(|e| GatewayError::Online {
                core,
                reason: e.to_string(),
            })
    }

    async fn frequencies(&mut self, core: usize) -> Result<Vec<u32>, GatewayError> {
        let path = self.cpufreq(core, "scaling_available_frequencies");
        let unavailable = |reason: String| GatewayError::PolicyUnavailable { core, reason };

        let text = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| unavailable(format!("{}: {e}", path.display())))?;
        text.split_whitespace()
            .map(|word| {
                word.parse()
                    .map_err(|_| unavailable(format!("unparsable frequency {word:?}")))
            })
            .collect()
    }
}

/// Powers the system off through systemd, forcing it after a grace period.
pub struct SystemPower {
    grace: Duration,
}

impl SystemPower {
    pub fn new(grace: Duration) -> Self {
        Self { grace }
    }
}

#[async_trait]
impl PowerControl for SystemPower {
    async fn request_shutdown(&mut self, reason: &str) -> Result<(), GatewayError> {
        warn!(reason, grace_secs = self.grace.as_secs(), "Requesting system power-off");

        let spawned = Command::new("systemctl").arg("poweroff").spawn();
        let grace = self.grace;

        tokio::spawn(async move {
            match spawned {
                Ok(mut child) => match child.wait().await {
                    Ok(status) if status.success() => {}
                    Ok(status) => warn!(%status, "systemctl poweroff failed"),
                    Err(e) => warn!(error = %e, "systemctl poweroff failed"),
                },
                Err(e) => warn!(error = %e, "Could not run systemctl"),
            }
            tokio::time::sleep(grace).await;
            force_power_off();
        });

        Ok(())
    }
}

#[cfg(target_os = "linux")]
fn force_power_off() {
    use nix::sys::reboot::{RebootMode, reboot};

    error!("Orderly power-off did not complete, forcing");
    nix::unistd::sync();
    let Err(e) = reboot(RebootMode::RB_POWER_OFF);
    error!(error = %e, "Forced power-off failed");
}

#[cfg(not(target_os = "linux"))]
fn force_power_off() {
    error!("Orderly power-off did not complete and forcing it is unsupported here");
}
