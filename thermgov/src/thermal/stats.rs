use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use utoipa::ToSchema;

use super::level::ThrottleLevel;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Dwell {
    total: Duration,
    since: Option<Instant>,
}

impl Dwell {
    fn close(&mut self, now: Instant) {
        if let Some(start) = self.since.take() {
            self.total += now.saturating_duration_since(start);
        }
    }

    fn read(&self, now: Instant) -> Duration {
        match self.since {
            Some(start) => self.total + now.saturating_duration_since(start),
            None => self.total,
        }
    }
}

/// Time spent at each throttled level.
///
/// At most one level accumulates at a time. [`record`](Self::record) is
/// called once per control cycle: it folds the running interval into the
/// total and opens a new one for the level that is now active.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ThrottleStats {
    low: Dwell,
    mid: Dwell,
    max: Dwell,
}

impl ThrottleStats {
    pub fn record(&mut self, level: ThrottleLevel, now: Instant) {
        self.low.close(now);
        self.mid.close(now);
        self.max.close(now);

        if let Some(dwell) = self.dwell_mut(level) {
            dwell.since = Some(now);
        }
    }

    pub fn dwell_times(&self, now: Instant) -> DwellTimes {
        DwellTimes {
            low_ms: millis(self.low.read(now)),
            mid_ms: millis(self.mid.read(now)),
            max_ms: millis(self.max.read(now)),
        }
    }

    pub fn active(&self) -> ThrottleLevel {
        if self.low.since.is_some() {
            ThrottleLevel::LOW
        } else if self.mid.since.is_some() {
            ThrottleLevel::MID
        } else if self.max.since.is_some() {
            ThrottleLevel::MAX
        } else {
            ThrottleLevel::NONE
        }
    }

    fn dwell_mut(&mut self, level: ThrottleLevel) -> Option<&mut Dwell> {
        match level {
            ThrottleLevel::NONE => None,
            ThrottleLevel::LOW => Some(&mut self.low),
            ThrottleLevel::MID => Some(&mut self.mid),
            ThrottleLevel::MAX => Some(&mut self.max),
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Per-level dwell time in milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct DwellTimes {
    pub low_ms: u64,
    pub mid_ms: u64,
    pub max_ms: u64,
}

impl DwellTimes {
    pub fn throttled_ms(&self) -> u64 {
        self.low_ms + self.mid_ms + self.max_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time;

    #[tokio::test(start_paused = true)]
    async fn should_report_zero_before_throttling() {
        let stats = ThrottleStats::default();
        assert_eq!(stats.dwell_times(Instant::now()), DwellTimes::default());
        assert_eq!(stats.active(), ThrottleLevel::NONE);
    }

    #[tokio::test(start_paused = true)]
    async fn should_include_running_interval_for_active_level() {
        let mut stats = ThrottleStats::default();
        stats.record(ThrottleLevel::LOW, Instant::now());

        time::advance(Duration::from_millis(750)).await;

        let times = stats.dwell_times(Instant::now());
        assert_eq!(times.low_ms, 750);
        assert_eq!(times.mid_ms, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn should_keep_accumulating_across_cycles_at_same_level() {
        let mut stats = ThrottleStats::default();
        for _ in 0..4 {
            stats.record(ThrottleLevel::MID, Instant::now());
            time::advance(Duration::from_millis(250)).await;
        }

        assert_eq!(stats.dwell_times(Instant::now()).mid_ms, 1000);
    }

    #[tokio::test(start_paused = true)]
    async fn should_freeze_inactive_levels() {
        let mut stats = ThrottleStats::default();
        stats.record(ThrottleLevel::MAX, Instant::now());
        time::advance(Duration::from_secs(2)).await;
        stats.record(ThrottleLevel::MID, Instant::now());
        time::advance(Duration::from_secs(3)).await;

        let times = stats.dwell_times(Instant::now());
        assert_eq!(times.max_ms, 2000);
        assert_eq!(times.mid_ms, 3000);
        assert_eq!(stats.active(), ThrottleLevel::MID);
    }

    #[tokio::test(start_paused = true)]
    async fn should_account_for_all_elapsed_time_without_gaps() {
        let start = Instant::now();
        let mut stats = ThrottleStats::default();
        let mut idle = Duration::ZERO;

        let levels = [
            ThrottleLevel::NONE,
            ThrottleLevel::LOW,
            ThrottleLevel::LOW,
            ThrottleLevel::MID,
            ThrottleLevel::MAX,
            ThrottleLevel::MID,
            ThrottleLevel::NONE,
            ThrottleLevel::NONE,
            ThrottleLevel::LOW,
        ];
        for (i, level) in levels.into_iter().enumerate() {
            stats.record(level, Instant::now());
            let step = Duration::from_millis(100 + 37 * i as u64);
            if level == ThrottleLevel::NONE {
                idle += step;
            }
            time::advance(step).await;
        }

        let times = stats.dwell_times(Instant::now());
        let elapsed = Instant::now().duration_since(start);
        assert_eq!(
            Duration::from_millis(times.throttled_ms()) + idle,
            elapsed
        );
    }

    #[tokio::test(start_paused = true)]
    async fn should_stop_accumulating_when_released() {
        let mut stats = ThrottleStats::default();
        stats.record(ThrottleLevel::LOW, Instant::now());
        time::advance(Duration::from_secs(1)).await;
        stats.record(ThrottleLevel::NONE, Instant::now());
        time::advance(Duration::from_secs(5)).await;

        assert_eq!(stats.dwell_times(Instant::now()).low_ms, 1000);
        assert_eq!(stats.active(), ThrottleLevel::NONE);
    }
}
