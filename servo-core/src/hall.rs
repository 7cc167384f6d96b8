//! Hall-sensor decoding and encoder-based position estimation.
//!
//! Three digital sensor lines are packed into a 3-bit sector code
//! (phase A is bit 2, phase C is bit 0). Codes 1 through 6 identify the six
//! 60°-electrical sectors; 0 and 7 can only come from a broken sensor or
//! harness and are never used for positioning.
//!
//! Each change between two valid sectors moves a signed encoder by one step.
//! The estimator assumes at most one sector transition between samples: a
//! rotor fast enough to skip a sector is under-counted without any error
//! being flagged.

use core::fmt;

/// Encoder steps in one full revolution of the position mapping.
pub const STEPS_PER_REVOLUTION: i32 = 60;

/// Sector that follows each sector when rotating forward (1 → 3 → 2 → 6 → 4 → 5 → 1).
const FORWARD_SUCCESSOR: [u8; 8] = [0, 3, 6, 2, 5, 1, 4, 0];

/// Raw 3-bit hall code.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct HallState(u8);

impl HallState {
    /// Code reported before the first sample.
    pub const UNKNOWN: Self = Self(0);

    /// Packs the three sensor lines, phase A first.
    #[must_use]
    pub fn from_lines(lines: [bool; 3]) -> Self {
        let [a, b, c] = lines.map(u8::from);
        Self((a << 2) | (b << 1) | c)
    }

    /// Wraps a raw code, discarding bits above bit 2.
    #[must_use]
    pub const fn from_raw(raw: u8) -> Self {
        Self(raw & 0b111)
    }

    #[must_use]
    pub const fn raw(self) -> u8 {
        self.0
    }

    /// Returns `true` for the six real sectors.
    #[must_use]
    pub const fn is_valid(self) -> bool {
        matches!(self.0, 1..=6)
    }

    /// Sector expected after a forward step from this one.
    #[must_use]
    pub fn forward_successor(self) -> Self {
        Self(FORWARD_SUCCESSOR[usize::from(self.0)])
    }
}

impl fmt::Display for HallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Direction inferred from a transition between two valid sectors.
///
/// Any valid transition that is not the forward successor is counted as
/// reverse, including physically impossible jumps across two sectors.
#[must_use]
pub fn is_forward_step(previous: HallState, current: HallState) -> bool {
    previous.forward_successor() == current
}

/// Maps an encoder count onto `[min, max)` using the revolution-modulo fraction.
#[must_use]
pub fn position_for(encoder: i32, min: f32, max: f32) -> f32 {
    let wrapped = encoder.rem_euclid(STEPS_PER_REVOLUTION);
    #[allow(clippy::cast_precision_loss)]
    let fraction = wrapped as f32 / STEPS_PER_REVOLUTION as f32;
    min + fraction * (max - min)
}

/// Tracks hall transitions and derives a position estimate.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct HallEstimator {
    current: HallState,
    previous: HallState,
    encoder: i32,
    transitions: u32,
    position: f32,
    valid: bool,
}

impl HallEstimator {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            current: HallState::UNKNOWN,
            previous: HallState::UNKNOWN,
            encoder: 0,
            transitions: 0,
            position: 0.0,
            valid: false,
        }
    }

    /// Feeds the latest sample. Returns `true` when the code changed.
    pub fn update(&mut self, sample: HallState, min: f32, max: f32) -> bool {
        if sample == self.current {
            return false;
        }

        self.previous = self.current;
        self.current = sample;
        self.transitions = self.transitions.wrapping_add(1);

        if self.previous.is_valid() && sample.is_valid() {
            if is_forward_step(self.previous, sample) {
                self.encoder = self.encoder.wrapping_add(1);
            } else {
                self.encoder = self.encoder.wrapping_sub(1);
            }
            self.position = position_for(self.encoder, min, max);
            self.valid = true;
        }

        true
    }

    /// Declares the current rotor location to be encoder step zero.
    pub fn rezero(&mut self, min: f32, max: f32) {
        self.encoder = 0;
        self.position = position_for(0, min, max);
        self.valid = true;
    }

    /// Re-maps the estimate after the configured range changes.
    pub fn rescale(&mut self, min: f32, max: f32) {
        if self.valid {
            self.position = position_for(self.encoder, min, max);
        }
    }

    /// Forgets every sample and the encoder count.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    #[must_use]
    pub const fn state(&self) -> HallState {
        self.current
    }

    #[must_use]
    pub const fn previous(&self) -> HallState {
        self.previous
    }

    #[must_use]
    pub const fn encoder(&self) -> i32 {
        self.encoder
    }

    #[must_use]
    pub const fn transitions(&self) -> u32 {
        self.transitions
    }

    /// Latest position in percent, once a valid transition has been seen.
    ///
    /// Validity is sticky; callers judge staleness from their own cadence.
    #[must_use]
    pub const fn position(&self) -> Option<f32> {
        if self.valid { Some(self.position) } else { None }
    }

    #[must_use]
    pub const fn position_valid(&self) -> bool {
        self.valid
    }
}

impl Default for HallEstimator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FORWARD: [u8; 6] = [1, 3, 2, 6, 4, 5];

    fn close(a: f32, b: f32) -> bool {
        libm::fabsf(a - b) < 1e-4
    }

    #[test]
    fn lines_pack_phase_a_as_msb() {
        assert_eq!(HallState::from_lines([true, false, false]).raw(), 4);
        assert_eq!(HallState::from_lines([false, true, true]).raw(), 3);
        assert_eq!(HallState::from_lines([true, true, true]).raw(), 7);
    }

    #[test]
    fn only_sectors_one_through_six_are_valid() {
        for raw in 0..8 {
            assert_eq!(HallState::from_raw(raw).is_valid(), (1..=6).contains(&raw));
        }
    }

    #[test]
    fn every_valid_pair_moves_encoder_by_exactly_one() {
        for previous in 1..=6u8 {
            for current in 1..=6u8 {
                if previous == current {
                    continue;
                }

                let mut estimator = HallEstimator::new();
                estimator.update(HallState::from_raw(previous), 0.0, 100.0);
                let before = estimator.encoder();
                estimator.update(HallState::from_raw(current), 0.0, 100.0);

                let expected = if FORWARD_SUCCESSOR[usize::from(previous)] == current {
                    before + 1
                } else {
                    before - 1
                };
                assert_eq!(
                    estimator.encoder(),
                    expected,
                    "transition {previous} -> {current}"
                );
            }
        }
    }

    #[test]
    fn forward_revolution_walks_the_sequence() {
        let mut estimator = HallEstimator::new();
        estimator.update(HallState::from_raw(1), 0.0, 100.0);
        for raw in FORWARD.iter().cycle().skip(1).take(12) {
            estimator.update(HallState::from_raw(*raw), 0.0, 100.0);
        }
        assert_eq!(estimator.encoder(), 12);
        assert!(close(estimator.position().unwrap(), 20.0));
    }

    #[test]
    fn invalid_sectors_count_transitions_but_not_position() {
        let mut estimator = HallEstimator::new();
        estimator.update(HallState::from_raw(1), 0.0, 100.0);
        estimator.update(HallState::from_raw(7), 0.0, 100.0);
        estimator.update(HallState::from_raw(3), 0.0, 100.0);

        assert_eq!(estimator.transitions(), 3);
        assert_eq!(estimator.encoder(), 0);
        assert!(estimator.position().is_none());
    }

    #[test]
    fn position_is_invalid_until_first_valid_transition() {
        let mut estimator = HallEstimator::new();
        assert!(!estimator.update(HallState::UNKNOWN, 0.0, 100.0));
        estimator.update(HallState::from_raw(5), 0.0, 100.0);
        assert!(estimator.position().is_none());

        estimator.update(HallState::from_raw(1), 0.0, 100.0);
        assert!(estimator.position_valid());
    }

    #[test]
    fn negative_encoder_wraps_into_range() {
        assert!(close(position_for(-1, 10.0, 70.0), 10.0 + 59.0));
        assert!(close(position_for(-60, 10.0, 70.0), 10.0));
        assert!(close(position_for(90, 0.0, 100.0), 50.0));
    }

    #[test]
    fn position_stays_within_configured_range() {
        for encoder in -200..200 {
            let position = position_for(encoder, 12.5, 87.5);
            assert!((12.5..87.5).contains(&position), "encoder {encoder}");
        }
    }

    #[test]
    fn rezero_anchors_the_minimum() {
        let mut estimator = HallEstimator::new();
        estimator.update(HallState::from_raw(1), 0.0, 100.0);
        estimator.update(HallState::from_raw(5), 0.0, 100.0);
        assert_eq!(estimator.encoder(), -1);

        estimator.rezero(0.0, 100.0);
        assert_eq!(estimator.encoder(), 0);
        assert_eq!(estimator.position(), Some(0.0));
    }
}
