use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use utoipa::ToSchema;

use super::profile::ThresholdProfile;

/// Throttle level, ordered by severity.
#[derive(
    Debug,
    Default,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    ToSchema,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ThrottleLevel {
    #[default]
    NONE,
    LOW,
    MID,
    MAX,
}

impl ThrottleLevel {
    pub fn is_throttled(self) -> bool {
        self != ThrottleLevel::NONE
    }
}

/// A level change decided by one evaluation of the hysteresis rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Crossed the low engage point from an unthrottled state.
    EngageLow,
    /// Cooled below the low clear point; throttling ends entirely.
    Release,
    /// Crossed the mid engage point from NONE or LOW.
    EngageMid,
    /// Cooled below the mid clear point.
    EaseToLow,
    /// At or above the max engage point. Fires on every evaluation while
    /// the temperature stays there.
    EngageMax,
    /// Cooled below the max clear point.
    EaseToMid,
}

impl Transition {
    /// Evaluate the rules in priority order; the first match wins.
    ///
    /// Only one transition is taken per evaluation. Escalation may skip
    /// levels when the temperature jumps past several engage points at once,
    /// and `Release` ends throttling from any level.
    pub fn evaluate(
        temp_c: i32,
        current: ThrottleLevel,
        profile: &ThresholdProfile,
    ) -> Option<Transition> {
        let (low, mid, max) = (&profile.low, &profile.mid, &profile.max);

        if temp_c >= low.engage_c && temp_c < mid.engage_c && current < ThrottleLevel::LOW {
            Some(Transition::EngageLow)
        } else if temp_c < low.clear_c && current > ThrottleLevel::NONE {
            Some(Transition::Release)
        } else if temp_c >= mid.engage_c && temp_c < max.engage_c && current < ThrottleLevel::MID
        {
            Some(Transition::EngageMid)
        } else if temp_c < mid.clear_c && current > ThrottleLevel::LOW {
            Some(Transition::EaseToLow)
        } else if temp_c >= max.engage_c {
            Some(Transition::EngageMax)
        } else if temp_c < max.clear_c && current > ThrottleLevel::MID {
            Some(Transition::EaseToMid)
        } else {
            None
        }
    }

    pub fn target(self) -> ThrottleLevel {
        match self {
            Transition::Release => ThrottleLevel::NONE,
            Transition::EngageLow | Transition::EaseToLow => ThrottleLevel::LOW,
            Transition::EngageMid | Transition::EaseToMid => ThrottleLevel::MID,
            Transition::EngageMax => ThrottleLevel::MAX,
        }
    }
}
