use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString};
use thiserror::Error;
use utoipa::ToSchema;

use super::profile::{Band, DynamicOffsets, ProfileError, ThresholdProfile};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ThermalConfig {
    /// Temperature sensor the governor polls.
    pub sensor_id: u32,

    /// Delay between control cycles (ms).
    pub poll_ms: u64,

    /// At or above this temperature (°C) the system is powered off.
    pub shutdown_temp_c: i32,

    /// Re-derive the profile from the frequency table whenever another
    /// actor changes the CPU frequency ceiling.
    #[serde(default)]
    pub dynamic_control: bool,

    pub profile: ThresholdProfile,

    #[serde(default)]
    pub dynamic_offsets: DynamicOffsets,

    /// Anchors at or below this table position are not throttled further by
    /// dynamic control.
    #[serde(default = "default_min_dynamic_index")]
    pub min_dynamic_index: usize,

    /// Ceiling (kHz) restored on release when no pre-throttle ceiling was
    /// ever captured.
    #[serde(default = "default_fallback_ceiling_khz")]
    pub fallback_ceiling_khz: u32,

    /// How long the shutdown temperature must persist before power-off is
    /// requested (ms). Zero acts on the first reading.
    #[serde(default)]
    pub shutdown_debounce_ms: u64,
}

fn default_min_dynamic_index() -> usize {
    4
}

fn default_fallback_ceiling_khz() -> u32 {
    2_265_600
}

impl Default for ThermalConfig {
    fn default() -> Self {
        Self {
            sensor_id: 0,
            poll_ms: 250,
            shutdown_temp_c: 85,
            dynamic_control: false,
            profile: ThresholdProfile {
                low: Band::new(50, 56, 1_958_400),
                mid: Band::new(54, 58, 1_728_000),
                max: Band::new(56, 68, 1_497_600),
            },
            dynamic_offsets: DynamicOffsets::default(),
            min_dynamic_index: default_min_dynamic_index(),
            fallback_ceiling_khz: default_fallback_ceiling_khz(),
            shutdown_debounce_ms: 0,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("unknown configuration field `{0}`")]
    UnknownField(String),

    #[error("invalid value `{value}` for {field}")]
    InvalidValue { field: ConfigField, value: String },

    #[error("poll interval must be non-zero")]
    ZeroPollInterval,

    #[error("{band} band clear point {clear_c}°C must be below its engage point {engage_c}°C")]
    InvertedBand {
        band: &'static str,
        clear_c: i32,
        engage_c: i32,
    },

    #[error("{0} ceiling must be non-zero")]
    ZeroCeiling(&'static str),

    #[error(
        "engage points must not decrease from low ({low_c}°C) to mid ({mid_c}°C) to max ({max_c}°C)"
    )]
    UnorderedBands { low_c: i32, mid_c: i32, max_c: i32 },

    #[error(transparent)]
    Offsets(#[from] ProfileError),
}

impl ThermalConfig {
    /// Read and validate a JSON configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check the ordering the transition rules depend on.
    ///
    /// The rules are evaluated in a fixed priority order and silently
    /// misbehave if the engage points are out of order, so inconsistent
    /// profiles are rejected rather than clamped.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_ms == 0 {
            return Err(ConfigError::ZeroPollInterval);
        }

        let ThresholdProfile { low, mid, max } = &self.profile;
        for (name, band) in [("low", low), ("mid", mid), ("max", max)] {
            if band.clear_c >= band.engage_c {
                return Err(ConfigError::InvertedBand {
                    band: name,
                    clear_c: band.clear_c,
                    engage_c: band.engage_c,
                });
            }
            if band.ceiling_khz == 0 {
                return Err(ConfigError::ZeroCeiling(name));
            }
        }

        if low.engage_c > mid.engage_c || mid.engage_c > max.engage_c {
            return Err(ConfigError::UnorderedBands {
                low_c: low.engage_c,
                mid_c: mid.engage_c,
                max_c: max.engage_c,
            });
        }

        if self.fallback_ceiling_khz == 0 {
            return Err(ConfigError::ZeroCeiling("fallback"));
        }

        self.dynamic_offsets.validate()?;

        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_ms)
    }

    pub fn shutdown_debounce(&self) -> Duration {
        Duration::from_millis(self.shutdown_debounce_ms)
    }

    /// Textual value of one field, as exposed on the runtime surface.
    pub fn get(&self, field: ConfigField) -> String {
        let p = &self.profile;
        match field {
            ConfigField::SensorId => self.sensor_id.to_string(),
            ConfigField::PollMs => self.poll_ms.to_string(),
            ConfigField::ShutdownTempC => self.shutdown_temp_c.to_string(),
            ConfigField::DynamicControl => u8::from(self.dynamic_control).to_string(),
            ConfigField::LowClearC => p.low.clear_c.to_string(),
            ConfigField::LowEngageC => p.low.engage_c.to_string(),
            ConfigField::LowCeilingKhz => p.low.ceiling_khz.to_string(),
            ConfigField::MidClearC => p.mid.clear_c.to_string(),
            ConfigField::MidEngageC => p.mid.engage_c.to_string(),
            ConfigField::MidCeilingKhz => p.mid.ceiling_khz.to_string(),
            ConfigField::MaxClearC => p.max.clear_c.to_string(),
            ConfigField::MaxEngageC => p.max.engage_c.to_string(),
            ConfigField::MaxCeilingKhz => p.max.ceiling_khz.to_string(),
            ConfigField::MinDynamicIndex => self.min_dynamic_index.to_string(),
            ConfigField::FallbackCeilingKhz => self.fallback_ceiling_khz.to_string(),
            ConfigField::ShutdownDebounceMs => self.shutdown_debounce_ms.to_string(),
        }
    }

    /// Parse `raw` into one field. Does not validate the result; callers
    /// changing a live configuration go through [`ConfigPatch`].
    pub fn set(&mut self, field: ConfigField, raw: &str) -> Result<(), ConfigError> {
        let raw = raw.trim();
        let p = &mut self.profile;
        match field {
            ConfigField::SensorId => self.sensor_id = parse(field, raw)?,
            ConfigField::PollMs => self.poll_ms = parse(field, raw)?,
            ConfigField::ShutdownTempC => self.shutdown_temp_c = parse(field, raw)?,
            ConfigField::DynamicControl => self.dynamic_control = parse_flag(field, raw)?,
            ConfigField::LowClearC => p.low.clear_c = parse(field, raw)?,
            ConfigField::LowEngageC => p.low.engage_c = parse(field, raw)?,
            ConfigField::LowCeilingKhz => p.low.ceiling_khz = parse(field, raw)?,
            ConfigField::MidClearC => p.mid.clear_c = parse(field, raw)?,
            ConfigField::MidEngageC => p.mid.engage_c = parse(field, raw)?,
            ConfigField::MidCeilingKhz => p.mid.ceiling_khz = parse(field, raw)?,
            ConfigField::MaxClearC => p.max.clear_c = parse(field, raw)?,
            ConfigField::MaxEngageC => p.max.engage_c = parse(field, raw)?,
            ConfigField::MaxCeilingKhz => p.max.ceiling_khz = parse(field, raw)?,
            ConfigField::MinDynamicIndex => self.min_dynamic_index = parse(field, raw)?,
            ConfigField::FallbackCeilingKhz => self.fallback_ceiling_khz = parse(field, raw)?,
            ConfigField::ShutdownDebounceMs => self.shutdown_debounce_ms = parse(field, raw)?,
        }
        Ok(())
    }
}

fn parse<T: FromStr>(field: ConfigField, raw: &str) -> Result<T, ConfigError> {
    raw.parse().map_err(|_| ConfigError::InvalidValue {
        field,
        value: raw.to_string(),
    })
}

fn parse_flag(field: ConfigField, raw: &str) -> Result<bool, ConfigError> {
    match raw {
        "1" | "true" => Ok(true),
        "0" | "false" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            field,
            value: raw.to_string(),
        }),
    }
}

/// Individually settable configuration fields.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display, EnumString, EnumIter, AsRefStr,
)]
#[strum(serialize_all = "snake_case")]
pub enum ConfigField {
    SensorId,
    PollMs,
    ShutdownTempC,
    DynamicControl,
    LowClearC,
    LowEngageC,
    LowCeilingKhz,
    MidClearC,
    MidEngageC,
    MidCeilingKhz,
    MaxClearC,
    MaxEngageC,
    MaxCeilingKhz,
    MinDynamicIndex,
    FallbackCeilingKhz,
    ShutdownDebounceMs,
}

impl ConfigField {
    pub fn parse_name(name: &str) -> Result<Self, ConfigError> {
        name.parse()
            .map_err(|_| ConfigError::UnknownField(name.to_string()))
    }
}

/// A set of field writes applied together.
///
/// The result is validated as a whole, so related breakpoints can be moved
/// in one step without passing through an inconsistent profile.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigPatch {
    changes: Vec<(ConfigField, String)>,
}

impl ConfigPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, field: ConfigField, value: impl Into<String>) -> Self {
        self.changes.push((field, value.into()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn touches(&self, field: ConfigField) -> bool {
        self.changes.iter().any(|(f, _)| *f == field)
    }

    pub fn apply_to(&self, config: &ThermalConfig) -> Result<ThermalConfig, ConfigError> {
        let mut next = config.clone();
        for (field, value) in &self.changes {
            next.set(*field, value)?;
        }
        next.validate()?;
        Ok(next)
    }
}

impl FromIterator<(ConfigField, String)> for ConfigPatch {
    fn from_iter<I: IntoIterator<Item = (ConfigField, String)>>(iter: I) -> Self {
        Self {
            changes: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use strum::IntoEnumIterator;

    const SAMPLE: &str = r#"{
        "sensor_id": 7,
        "poll_ms": 250,
        "shutdown_temp_c": 80,
        "dynamic_control": true,
        "profile": {
            "low": { "clear_c": 38, "engage_c": 45, "ceiling_khz": 1728000 },
            "mid": { "clear_c": 42, "engage_c": 50, "ceiling_khz": 1497600 },
            "max": { "clear_c": 50, "engage_c": 58, "ceiling_khz": 1190400 }
        }
    }"#;

    fn write_config(text: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(text.as_bytes()).unwrap();
        file
    }

    #[test]
    fn should_load_config_with_defaults_for_optional_sections() {
        let file = write_config(SAMPLE);
        let config = ThermalConfig::load(file.path()).unwrap();

        assert_eq!(config.sensor_id, 7);
        assert!(config.dynamic_control);
        assert_eq!(config.profile.mid, Band::new(42, 50, 1_497_600));
        assert_eq!(config.dynamic_offsets, DynamicOffsets::default());
        assert_eq!(config.min_dynamic_index, 4);
        assert_eq!(config.fallback_ceiling_khz, 2_265_600);
        assert_eq!(config.shutdown_debounce(), Duration::ZERO);
    }

    #[test]
    fn should_fail_on_missing_file() {
        let err = ThermalConfig::load(Path::new("/nonexistent/thermal.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn should_fail_on_malformed_json() {
        let file = write_config(r#"{ "sensor_id": 7 "#);
        let err = ThermalConfig::load(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn should_reject_unordered_engage_points_at_load() {
        let file = write_config(&SAMPLE.replace(r#""engage_c": 50"#, r#""engage_c": 60"#));
        let err = ThermalConfig::load(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::UnorderedBands { mid_c: 60, .. }));
    }

    #[test]
    fn should_reject_inverted_band() {
        let mut config = ThermalConfig::default();
        config.profile.low.clear_c = config.profile.low.engage_c;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvertedBand { band: "low", .. })
        ));
    }

    #[test]
    fn should_reject_dynamic_offsets_that_invert_a_band_at_load() {
        let file = write_config(&SAMPLE.replace(
            r#""profile": {"#,
            r#""dynamic_offsets": { "mid_band_c": -10 },
        "profile": {"#,
        ));
        let err = ThermalConfig::load(file.path()).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Offsets(ProfileError::InvalidOffsets(_))
        ));
    }

    #[test]
    fn should_reject_zero_poll_interval() {
        let config = ThermalConfig {
            poll_ms: 0,
            ..ThermalConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::ZeroPollInterval)));
    }

    #[test]
    fn default_config_is_valid() {
        ThermalConfig::default().validate().unwrap();
    }

    #[test]
    fn should_expose_every_field_by_name() {
        let mut config = ThermalConfig::default();
        for field in ConfigField::iter() {
            let name = field.to_string();
            assert_eq!(ConfigField::parse_name(&name).unwrap(), field);

            let value = config.get(field);
            config.set(field, &value).unwrap();
        }
        assert_eq!(config, ThermalConfig::default());
    }

    #[test]
    fn should_use_snake_case_field_names() {
        assert_eq!(ConfigField::LowEngageC.as_ref(), "low_engage_c");
        assert_eq!(
            ConfigField::parse_name("fallback_ceiling_khz").unwrap(),
            ConfigField::FallbackCeilingKhz
        );
        assert!(matches!(
            ConfigField::parse_name("allowed_low_high"),
            Err(ConfigError::UnknownField(_))
        ));
    }

    #[test]
    fn should_parse_dynamic_control_flag() {
        let mut config = ThermalConfig::default();
        config.set(ConfigField::DynamicControl, "1\n").unwrap();
        assert!(config.dynamic_control);
        config.set(ConfigField::DynamicControl, "false").unwrap();
        assert!(!config.dynamic_control);
        assert!(config.set(ConfigField::DynamicControl, "2").is_err());
    }

    #[test]
    fn should_reject_non_numeric_values() {
        let mut config = ThermalConfig::default();
        let err = config.set(ConfigField::PollMs, "fast").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                field: ConfigField::PollMs,
                ..
            }
        ));
    }

    #[test]
    fn should_apply_patch_atomically() {
        let config = ThermalConfig::default();

        let shifted = ConfigPatch::new()
            .with(ConfigField::MidEngageC, "70")
            .with(ConfigField::MaxEngageC, "75")
            .apply_to(&config)
            .unwrap();
        assert_eq!(shifted.profile.mid.engage_c, 70);
        assert_eq!(shifted.profile.max.engage_c, 75);

        // Moving mid alone past max is rejected and nothing changes.
        let result = ConfigPatch::new()
            .with(ConfigField::MidEngageC, "70")
            .apply_to(&config);
        assert!(matches!(result, Err(ConfigError::UnorderedBands { .. })));
        assert_eq!(config, ThermalConfig::default());
    }
}
