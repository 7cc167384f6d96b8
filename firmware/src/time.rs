//! Embassy clock adapter for the control core.

use core::ops::Add;
use core::time::Duration;

use embassy_time::{Duration as EmbassyDuration, Instant};
use servo_core::timing::ControlInstant;

/// Monotonic instant backed by the embassy time driver.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub struct FirmwareInstant(Instant);

impl FirmwareInstant {
    #[cfg(target_os = "none")]
    pub fn now() -> Self {
        Self(Instant::now())
    }

    pub const fn into_embassy(self) -> Instant {
        self.0
    }
}

impl From<Instant> for FirmwareInstant {
    fn from(instant: Instant) -> Self {
        Self(instant)
    }
}

impl Add<Duration> for FirmwareInstant {
    type Output = Self;

    fn add(self, rhs: Duration) -> Self::Output {
        Self(self.0 + to_embassy(rhs))
    }
}

impl ControlInstant for FirmwareInstant {
    fn saturating_duration_since(&self, earlier: Self) -> Duration {
        self.0
            .checked_duration_since(earlier.0)
            .map_or(Duration::ZERO, |elapsed| {
                Duration::from_micros(elapsed.as_micros())
            })
    }
}

/// Converts a core duration to embassy ticks, saturating at the tick range.
pub fn to_embassy(duration: Duration) -> EmbassyDuration {
    let micros = u64::try_from(duration.as_micros()).unwrap_or(u64::MAX);
    EmbassyDuration::from_micros(micros)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn micros(value: u64) -> FirmwareInstant {
        FirmwareInstant::from(Instant::from_micros(value))
    }

    #[test]
    fn adding_core_durations_advances_the_instant() {
        let later = micros(1_000) + Duration::from_millis(5);
        assert_eq!(later, micros(6_000));
    }

    #[test]
    fn elapsed_time_saturates_at_zero() {
        assert_eq!(
            micros(2_500).saturating_duration_since(micros(1_000)),
            Duration::from_micros(1_500)
        );
        assert_eq!(
            micros(1_000).saturating_duration_since(micros(2_500)),
            Duration::ZERO
        );
    }
}
