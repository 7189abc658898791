use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use super::freq_table::FrequencyTable;
use super::level::ThrottleLevel;

/// Hysteresis band for one throttle level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Band {
    /// Below this temperature (°C) the level is left.
    pub clear_c: i32,

    /// At or above this temperature (°C) the level is entered.
    pub engage_c: i32,

    /// Frequency ceiling (kHz) applied while the level is active.
    pub ceiling_khz: u32,
}

impl Band {
    pub const fn new(clear_c: i32, engage_c: i32, ceiling_khz: u32) -> Self {
        Self {
            clear_c,
            engage_c,
            ceiling_khz,
        }
    }
}

/// Breakpoints and ceilings for the three throttle levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ThresholdProfile {
    pub low: Band,
    pub mid: Band,
    pub max: Band,
}

/// Offsets used to derive a profile from the frequency table.
///
/// The defaults were tuned empirically against one reference table. They
/// assume stepping back one or two table positions gives a meaningfully
/// lower ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct DynamicOffsets {
    pub base_c: i32,
    pub per_index_c: i32,
    pub low_band_c: i32,
    pub mid_offset_c: i32,
    pub mid_band_c: i32,
    pub max_offset_c: i32,
    pub max_band_c: i32,
}

impl Default for DynamicOffsets {
    fn default() -> Self {
        Self {
            base_c: 30,
            per_index_c: 2,
            low_band_c: 6,
            mid_offset_c: 4,
            mid_band_c: 4,
            max_offset_c: 2,
            max_band_c: 12,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProfileError {
    #[error("ceiling {0} kHz is not in the frequency table")]
    NotInTable(u32),

    #[error("ceiling index {index} is at or below the minimum index {min_index}")]
    BelowMinimum { index: usize, min_index: usize },

    #[error("dynamic offsets are invalid: {0}")]
    InvalidOffsets(&'static str),

    #[error("thresholds derived for ceiling {0} kHz overflow")]
    Overflow(u32),
}

impl DynamicOffsets {
    /// Reject offsets that would derive an inverted or unordered profile.
    ///
    /// Clear points never decrease when both offsets are non-negative, so
    /// the engage points stay ordered as long as each band fits inside the
    /// next one's offset plus width.
    pub fn validate(&self) -> Result<(), ProfileError> {
        if self.low_band_c <= 0 || self.mid_band_c <= 0 || self.max_band_c <= 0 {
            return Err(ProfileError::InvalidOffsets("band widths must be positive"));
        }
        if self.mid_offset_c < 0 || self.max_offset_c < 0 {
            return Err(ProfileError::InvalidOffsets("level offsets must not be negative"));
        }

        let mid_reach = self.mid_offset_c.checked_add(self.mid_band_c);
        let max_reach = self.max_offset_c.checked_add(self.max_band_c);
        match (mid_reach, max_reach) {
            (Some(mid), Some(max)) if self.low_band_c <= mid && self.mid_band_c <= max => Ok(()),
            (Some(_), Some(_)) => Err(ProfileError::InvalidOffsets(
                "engage points must not decrease from low to max",
            )),
            _ => Err(ProfileError::InvalidOffsets("offsets overflow")),
        }
    }
}

impl ThresholdProfile {
    pub fn band(&self, level: ThrottleLevel) -> Option<&Band> {
        match level {
            ThrottleLevel::NONE => None,
            ThrottleLevel::LOW => Some(&self.low),
            ThrottleLevel::MID => Some(&self.mid),
            ThrottleLevel::MAX => Some(&self.max),
        }
    }

    pub fn ceiling_khz(&self, level: ThrottleLevel) -> Option<u32> {
        self.band(level).map(|band| band.ceiling_khz)
    }

    /// Derive a profile anchored on `ceiling_khz`, the ceiling some other
    /// actor just set.
    ///
    /// The LOW ceiling is the anchor itself; MID and MAX step one and two
    /// table positions down. Temperatures scale with the anchor's table
    /// position: a higher allowed clock tolerates a hotter core before
    /// throttling. Anchors at or below `min_index` are already slow enough
    /// and are rejected, as is anything in the first three positions since
    /// MAX steps two positions back.
    pub fn derive(
        table: &FrequencyTable,
        ceiling_khz: u32,
        offsets: &DynamicOffsets,
        min_index: usize,
    ) -> Result<Self, ProfileError> {
        let index = table
            .position(ceiling_khz)
            .ok_or(ProfileError::NotInTable(ceiling_khz))?;

        if index <= min_index || index <= 2 {
            return Err(ProfileError::BelowMinimum { index, min_index });
        }

        let step = |back: usize| {
            table
                .get(index - back)
                .ok_or(ProfileError::NotInTable(ceiling_khz))
        };

        offsets.validate()?;

        let overflow = || ProfileError::Overflow(ceiling_khz);
        let add = |a: i32, b: i32| a.checked_add(b).ok_or_else(overflow);

        let index_c = i32::try_from(index).map_err(|_| overflow())?;
        let scaled = offsets.per_index_c.checked_mul(index_c).ok_or_else(overflow)?;

        let low_clear = add(offsets.base_c, scaled)?;
        let mid_clear = add(low_clear, offsets.mid_offset_c)?;
        let max_clear = add(mid_clear, offsets.max_offset_c)?;

        Ok(Self {
            low: Band::new(low_clear, add(low_clear, offsets.low_band_c)?, step(0)?),
            mid: Band::new(mid_clear, add(mid_clear, offsets.mid_band_c)?, step(1)?),
            max: Band::new(max_clear, add(max_clear, offsets.max_band_c)?, step(2)?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> FrequencyTable {
        FrequencyTable::new(vec![
            300_000, 422_400, 652_800, 729_600, 883_200, 960_000, 1_036_800, 1_190_400,
            1_267_200, 1_497_600, 1_574_400, 1_728_000, 1_958_400, 2_265_600,
        ])
        .unwrap()
    }

    #[test]
    fn should_derive_profile_from_anchor_position() {
        let profile =
            ThresholdProfile::derive(&table(), 1_728_000, &DynamicOffsets::default(), 4).unwrap();

        // 1_728_000 sits at index 11.
        assert_eq!(profile.low, Band::new(52, 58, 1_728_000));
        assert_eq!(profile.mid, Band::new(56, 60, 1_574_400));
        assert_eq!(profile.max, Band::new(58, 70, 1_497_600));
    }

    #[test]
    fn should_derive_lowest_accepted_anchor() {
        let profile =
            ThresholdProfile::derive(&table(), 960_000, &DynamicOffsets::default(), 4).unwrap();

        assert_eq!(profile.low, Band::new(40, 46, 960_000));
        assert_eq!(profile.mid.ceiling_khz, 883_200);
        assert_eq!(profile.max.ceiling_khz, 729_600);
    }

    #[test]
    fn should_reject_anchor_at_minimum_index() {
        assert_eq!(
            ThresholdProfile::derive(&table(), 883_200, &DynamicOffsets::default(), 4),
            Err(ProfileError::BelowMinimum {
                index: 4,
                min_index: 4
            })
        );
    }

    #[test]
    fn should_reject_anchor_missing_from_table() {
        assert_eq!(
            ThresholdProfile::derive(&table(), 1_000_000, &DynamicOffsets::default(), 4),
            Err(ProfileError::NotInTable(1_000_000))
        );
    }

    #[test]
    fn should_guard_against_underflow_with_zero_minimum() {
        for khz in [300_000, 422_400, 652_800] {
            assert!(matches!(
                ThresholdProfile::derive(&table(), khz, &DynamicOffsets::default(), 0),
                Err(ProfileError::BelowMinimum { .. })
            ));
        }
        assert!(ThresholdProfile::derive(&table(), 729_600, &DynamicOffsets::default(), 0).is_ok());
    }

    #[test]
    fn should_reject_offsets_that_invert_a_band() {
        let offsets = DynamicOffsets {
            mid_band_c: -10,
            ..DynamicOffsets::default()
        };
        assert!(matches!(
            ThresholdProfile::derive(&table(), 1_728_000, &offsets, 4),
            Err(ProfileError::InvalidOffsets(_))
        ));
    }

    #[test]
    fn should_reject_offsets_that_unorder_engage_points() {
        // LOW engages at clear + 20, MID at clear + 4 + 4.
        let offsets = DynamicOffsets {
            low_band_c: 20,
            ..DynamicOffsets::default()
        };
        assert_eq!(
            offsets.validate(),
            Err(ProfileError::InvalidOffsets(
                "engage points must not decrease from low to max"
            ))
        );

        let offsets = DynamicOffsets {
            max_offset_c: -1,
            ..DynamicOffsets::default()
        };
        assert!(offsets.validate().is_err());
    }

    #[test]
    fn should_report_overflow_instead_of_wrapping() {
        let offsets = DynamicOffsets {
            base_c: i32::MAX,
            ..DynamicOffsets::default()
        };
        assert_eq!(
            ThresholdProfile::derive(&table(), 1_728_000, &offsets, 4),
            Err(ProfileError::Overflow(1_728_000))
        );

        let offsets = DynamicOffsets {
            per_index_c: i32::MAX,
            ..DynamicOffsets::default()
        };
        assert_eq!(
            ThresholdProfile::derive(&table(), 1_728_000, &offsets, 4),
            Err(ProfileError::Overflow(1_728_000))
        );
    }

    #[test]
    fn should_honor_custom_offsets() {
        let offsets = DynamicOffsets {
            base_c: 20,
            per_index_c: 3,
            ..DynamicOffsets::default()
        };
        let profile = ThresholdProfile::derive(&table(), 1_728_000, &offsets, 4).unwrap();
        assert_eq!(profile.low.clear_c, 53);
        assert_eq!(profile.max.engage_c, 53 + 4 + 2 + 12);
    }

    #[test]
    fn should_map_levels_to_ceilings() {
        let profile =
            ThresholdProfile::derive(&table(), 1_728_000, &DynamicOffsets::default(), 4).unwrap();
        assert_eq!(profile.ceiling_khz(ThrottleLevel::NONE), None);
        assert_eq!(profile.ceiling_khz(ThrottleLevel::MID), Some(1_574_400));
    }
}
