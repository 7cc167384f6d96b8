//! End-stop homing.
//!
//! The rotor is driven into the closed stop until the motor current shows a
//! stall, which re-zeroes the encoder. It is then driven into the open stop to
//! measure the usable span, and finally backed off by the configured margin.
//! The measured span, less the margin at each end, becomes the travel limits
//! applied to every subsequent target.

use core::fmt;

use crate::config::ServoConfig;
use crate::hall::{HallEstimator, STEPS_PER_REVOLUTION, position_for};
use crate::throttle::clamp_percent;
use crate::timing::{ControlInstant, dwell_elapsed};

/// Homing sub-state, meaningful only while the controller is homing.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HomingState {
    Inactive,
    SeekClosed,
    SeekOpen,
    BackOff,
    Complete,
    Failed,
}

impl HomingState {
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            HomingState::Inactive => "inactive",
            HomingState::SeekClosed => "seek-closed",
            HomingState::SeekOpen => "seek-open",
            HomingState::BackOff => "back-off",
            HomingState::Complete => "complete",
            HomingState::Failed => "failed",
        }
    }

    /// Encodes the state for telemetry.
    #[must_use]
    pub const fn to_raw(self) -> u8 {
        match self {
            HomingState::Inactive => 0,
            HomingState::SeekClosed => 1,
            HomingState::SeekOpen => 2,
            HomingState::BackOff => 3,
            HomingState::Complete => 4,
            HomingState::Failed => 5,
        }
    }
}

impl fmt::Display for HomingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Soft bounds applied to servo and throttle targets.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct TravelLimits {
    pub lower: f32,
    pub upper: f32,
}

impl TravelLimits {
    #[must_use]
    pub const fn new(lower: f32, upper: f32) -> Self {
        Self { lower, upper }
    }

    /// Full configured range, used until homing measures the real stops.
    #[must_use]
    pub fn from_config(config: &ServoConfig) -> Self {
        Self::new(
            clamp_percent(config.min_position),
            clamp_percent(config.max_position),
        )
    }

    /// Clamps a target into `[0, 100]` and then into these limits.
    #[must_use]
    pub fn clamp(&self, target: f32) -> f32 {
        let target = clamp_percent(target);
        if self.lower <= self.upper {
            target.clamp(self.lower, self.upper)
        } else {
            target
        }
    }
}

impl Default for TravelLimits {
    fn default() -> Self {
        Self::new(0.0, 100.0)
    }
}

/// Why homing gave up.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HomingError {
    /// A phase ran past its timeout without reaching its goal.
    Timeout(HomingState),
    /// The measured span leaves no room inside the back-off margins,
    /// or does not fit in one revolution of the position map.
    SpanOutOfRange(i32),
}

impl fmt::Display for HomingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HomingError::Timeout(state) => write!(f, "{state} timed out"),
            HomingError::SpanOutOfRange(span) => write!(f, "measured span of {span} steps"),
        }
    }
}

/// Result of one homing step.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum HomingStep {
    /// Keep going with this drive demand.
    Drive(f32),
    /// Homing finished and measured these limits.
    Complete(TravelLimits),
    Failed(HomingError),
}

/// Homing state machine driven once per tick.
#[derive(Copy, Clone, Debug)]
pub struct HomingProcedure<I> {
    state: HomingState,
    phase_started: Option<I>,
    span_steps: i32,
    back_off_target: i32,
}

impl<I: ControlInstant> HomingProcedure<I> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: HomingState::Inactive,
            phase_started: None,
            span_steps: 0,
            back_off_target: 0,
        }
    }

    /// Starts seeking the closed stop.
    pub fn start(&mut self, now: I) {
        *self = Self::new();
        self.enter(HomingState::SeekClosed, now);
    }

    /// Abandons any homing in progress.
    pub fn cancel(&mut self) {
        *self = Self::new();
    }

    #[must_use]
    pub const fn state(&self) -> HomingState {
        self.state
    }

    /// Encoder span between the stops, once measured.
    #[must_use]
    pub const fn span_steps(&self) -> i32 {
        self.span_steps
    }

    /// Advances the procedure using the latest current sample and encoder.
    pub fn step(
        &mut self,
        now: I,
        motor_current: f32,
        hall: &mut HallEstimator,
        config: &ServoConfig,
    ) -> HomingStep {
        let homing = &config.homing;
        let stalled = motor_current >= homing.stall_current;
        let margin = i32::from(homing.back_off_steps);

        match self.state {
            HomingState::SeekClosed => {
                if stalled {
                    hall.rezero(config.min_position, config.max_position);
                    self.enter(HomingState::SeekOpen, now);
                    return HomingStep::Drive(homing.duty);
                }
                self.drive_or_timeout(now, config, -homing.duty)
            }
            HomingState::SeekOpen => {
                if stalled {
                    let span = hall.encoder();
                    if span <= 2 * margin || span >= STEPS_PER_REVOLUTION {
                        return self.fail(HomingError::SpanOutOfRange(span));
                    }
                    self.span_steps = span;
                    self.back_off_target = span - margin;
                    self.enter(HomingState::BackOff, now);
                    return HomingStep::Drive(-homing.duty);
                }
                self.drive_or_timeout(now, config, homing.duty)
            }
            HomingState::BackOff => {
                if hall.encoder() <= self.back_off_target {
                    self.state = HomingState::Complete;
                    self.phase_started = None;
                    return HomingStep::Complete(TravelLimits::new(
                        position_for(margin, config.min_position, config.max_position),
                        position_for(self.back_off_target, config.min_position, config.max_position),
                    ));
                }
                self.drive_or_timeout(now, config, -homing.duty)
            }
            HomingState::Inactive | HomingState::Complete | HomingState::Failed => {
                HomingStep::Drive(0.0)
            }
        }
    }

    fn enter(&mut self, state: HomingState, now: I) {
        self.state = state;
        self.phase_started = Some(now);
    }

    fn drive_or_timeout(&mut self, now: I, config: &ServoConfig, demand: f32) -> HomingStep {
        if dwell_elapsed(self.phase_started, now, config.homing.phase_timeout) {
            return self.fail(HomingError::Timeout(self.state));
        }
        HomingStep::Drive(demand)
    }

    fn fail(&mut self, error: HomingError) -> HomingStep {
        self.state = HomingState::Failed;
        self.phase_started = None;
        HomingStep::Failed(error)
    }
}

impl<I: ControlInstant> Default for HomingProcedure<I> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use core::time::Duration;

    use super::*;
    use crate::hall::HallState;

    const FORWARD: [u8; 6] = [1, 3, 2, 6, 4, 5];
    const STALL: f32 = 8.0;

    fn at(ms: u64) -> Duration {
        Duration::from_millis(ms)
    }

    fn walk(hall: &mut HallEstimator, index: &mut usize, forward: bool) {
        *index = if forward { (*index + 1) % 6 } else { (*index + 5) % 6 };
        hall.update(HallState::from_raw(FORWARD[*index]), 0.0, 100.0);
    }

    #[test]
    fn homing_measures_span_and_backs_off() {
        let config = ServoConfig::default();
        let mut homing = HomingProcedure::new();
        let mut hall = HallEstimator::new();
        let mut index = 0;
        hall.update(HallState::from_raw(FORWARD[index]), 0.0, 100.0);

        homing.start(at(0));
        assert_eq!(homing.step(at(1), 1.0, &mut hall, &config), HomingStep::Drive(-0.25));
        walk(&mut hall, &mut index, false);

        // Closed stop reached.
        assert_eq!(homing.step(at(2), STALL, &mut hall, &config), HomingStep::Drive(0.25));
        assert_eq!(hall.encoder(), 0);
        assert_eq!(homing.state(), HomingState::SeekOpen);

        for ms in 3..33 {
            assert_eq!(homing.step(at(ms), 1.0, &mut hall, &config), HomingStep::Drive(0.25));
            walk(&mut hall, &mut index, true);
        }
        assert_eq!(hall.encoder(), 30);

        assert_eq!(homing.step(at(40), STALL, &mut hall, &config), HomingStep::Drive(-0.25));
        assert_eq!(homing.state(), HomingState::BackOff);
        assert_eq!(homing.span_steps(), 30);

        walk(&mut hall, &mut index, false);
        assert_eq!(homing.step(at(41), 1.0, &mut hall, &config), HomingStep::Drive(-0.25));
        walk(&mut hall, &mut index, false);

        match homing.step(at(42), 1.0, &mut hall, &config) {
            HomingStep::Complete(limits) => {
                assert!(libm::fabsf(limits.lower - 2.0 * 100.0 / 60.0) < 1e-4);
                assert!(libm::fabsf(limits.upper - 28.0 * 100.0 / 60.0) < 1e-4);
            }
            other => panic!("unexpected homing step: {other:?}"),
        }
        assert_eq!(homing.state(), HomingState::Complete);
    }

    #[test]
    fn phase_timeout_fails_homing() {
        let config = ServoConfig::default();
        let mut homing = HomingProcedure::new();
        let mut hall = HallEstimator::new();

        homing.start(at(0));
        assert_eq!(homing.step(at(2999), 0.0, &mut hall, &config), HomingStep::Drive(-0.25));
        assert_eq!(
            homing.step(at(3000), 0.0, &mut hall, &config),
            HomingStep::Failed(HomingError::Timeout(HomingState::SeekClosed))
        );
        assert_eq!(homing.state(), HomingState::Failed);
    }

    #[test]
    fn span_inside_margins_fails() {
        let config = ServoConfig::default();
        let mut homing = HomingProcedure::new();
        let mut hall = HallEstimator::new();

        homing.start(at(0));
        homing.step(at(1), STALL, &mut hall, &config);
        assert_eq!(
            homing.step(at(2), STALL, &mut hall, &config),
            HomingStep::Failed(HomingError::SpanOutOfRange(0))
        );
    }

    #[test]
    fn travel_limits_clamp_targets() {
        let limits = TravelLimits::new(5.0, 90.0);
        assert_eq!(limits.clamp(-3.0), 5.0);
        assert_eq!(limits.clamp(42.0), 42.0);
        assert_eq!(limits.clamp(150.0), 90.0);
        assert_eq!(limits.clamp(f32::NAN), 5.0);
    }
}
