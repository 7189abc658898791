//! API data transfer objects.
//!
//! These types define the API contract shared between the server and
//! clients.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::thermal::{DwellTimes, ThresholdProfile, ThrottleLevel};

/// Governor status snapshot.
#[derive(Clone, Debug, Deserialize, Serialize, ToSchema)]
pub struct GovernorState {
    pub enabled: bool,
    pub suspended: bool,
    pub level: ThrottleLevel,
    /// Last successful reading, if any.
    pub temperature_c: Option<i32>,
    /// Ceiling that will be restored when throttling ends.
    pub pre_throttle_khz: Option<u32>,
    /// Someone other than the governor rewrote the ceiling since the
    /// governor last took ownership.
    pub ceiling_changed_externally: bool,
    /// Thresholds in effect, possibly derived from the frequency table.
    pub profile: ThresholdProfile,
    pub dwell: DwellTimes,
}

/// Partial update of the governor mode. Absent fields are left alone.
#[derive(Clone, Debug, Default, Deserialize, Serialize, ToSchema)]
pub struct GovernorPatchRequest {
    pub enabled: Option<bool>,
    pub suspended: Option<bool>,
    /// `true` reports that another actor just wrote the frequency ceiling.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ceiling_changed: Option<bool>,
}

/// A configuration value as it appears in JSON.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, ToSchema)]
#[serde(untagged)]
pub enum ConfigValue {
    Bool(bool),
    Int(i64),
    Text(String),
}

impl ConfigValue {
    /// Textual form accepted by the configuration field parser.
    pub fn to_raw(&self) -> String {
        match self {
            ConfigValue::Bool(b) => b.to_string(),
            ConfigValue::Int(n) => n.to_string(),
            ConfigValue::Text(s) => s.clone(),
        }
    }
}

/// One configuration field and its current value.
#[derive(Clone, Debug, Deserialize, Serialize, ToSchema)]
pub struct ConfigFieldValue {
    pub field: String,
    pub value: String,
}

/// Body of `PUT /config/{field}`.
#[derive(Clone, Debug, Deserialize, Serialize, ToSchema)]
pub struct ConfigValueRequest {
    pub value: ConfigValue,
}
