//! Daemon settings from the environment.

use std::env;
use std::fmt::Display;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::backend::BackendKind;
use crate::error::{Error, Result};
use crate::thermal::ThermalConfig;
use crate::tracing::prelude::*;

pub const DEFAULT_THERMAL_CONFIG: &str = "/etc/thermgov/thermal.json";
pub const DEFAULT_API_ADDR: &str = "127.0.0.1:7786";
pub const DEFAULT_SYSFS_ROOT: &str = "/sys";
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonConfig {
    /// Explicit `THERMGOV_CONFIG`. When unset, [`DEFAULT_THERMAL_CONFIG`] is
    /// used if it exists and built-in defaults otherwise.
    pub thermal_config: Option<PathBuf>,
    pub api_addr: SocketAddr,
    pub backend: BackendKind,
    pub sysfs_root: PathBuf,
    pub shutdown_grace: Duration,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            thermal_config: None,
            api_addr: SocketAddr::from(([127, 0, 0, 1], 7786)),
            backend: BackendKind::default(),
            sysfs_root: PathBuf::from(DEFAULT_SYSFS_ROOT),
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }
}

impl DaemonConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(path) = lookup("THERMGOV_CONFIG") {
            config.thermal_config = Some(PathBuf::from(path));
        }
        if let Some(raw) = lookup("THERMGOV_API_ADDR") {
            config.api_addr = parse_var("THERMGOV_API_ADDR", &raw)?;
        }
        if let Some(raw) = lookup("THERMGOV_BACKEND") {
            config.backend = parse_var("THERMGOV_BACKEND", &raw)?;
        }
        if let Some(path) = lookup("THERMGOV_SYSFS_ROOT") {
            config.sysfs_root = PathBuf::from(path);
        }
        if let Some(raw) = lookup("THERMGOV_SHUTDOWN_GRACE_SECS") {
            config.shutdown_grace =
                Duration::from_secs(parse_var("THERMGOV_SHUTDOWN_GRACE_SECS", &raw)?);
        }

        Ok(config)
    }

    /// Load the thermal configuration this daemon should start with.
    pub fn load_thermal_config(&self) -> Result<ThermalConfig> {
        let path = match &self.thermal_config {
            Some(path) => path.clone(),
            None => {
                let path = PathBuf::from(DEFAULT_THERMAL_CONFIG);
                if !path.exists() {
                    info!(path = %path.display(), "No thermal configuration file, using defaults");
                    return Ok(ThermalConfig::default());
                }
                path
            }
        };

        info!(path = %path.display(), "Loading thermal configuration");
        Ok(ThermalConfig::load(&path)?)
    }
}

fn parse_var<T>(name: &'static str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    raw.trim().parse().map_err(|e: T::Err| Error::Environment {
        name,
        reason: format!("`{raw}`: {e}"),
    })
}
