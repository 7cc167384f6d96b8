//! Six-step commutation and gate-signal generation.

use crate::config::ResolvedPins;
use crate::faults::Fault;
use crate::hal::LineIo;
use crate::hall::HallState;

/// Per-phase drive sign for each hall code. Rows 0 and 7 are never consulted.
///
/// Adjacent rows along the forward sequence 1 → 3 → 2 → 6 → 4 → 5 walk the
/// canonical AB, AC, BC, BA, CA, CB pattern for 120°-separated phases.
const COMMUTATION_TABLE: [[i8; 3]; 8] = [
    [0, 0, 0],
    [1, -1, 0],
    [0, 1, -1],
    [1, 0, -1],
    [-1, 0, 1],
    [0, -1, 1],
    [-1, 1, 0],
    [0, 0, 0],
];

/// Signed duty for phases A, B, C.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct PhaseDuties {
    pub a: f32,
    pub b: f32,
    pub c: f32,
}

impl PhaseDuties {
    pub const ZERO: Self = Self::new(0.0, 0.0, 0.0);

    #[must_use]
    pub const fn new(a: f32, b: f32, c: f32) -> Self {
        Self { a, b, c }
    }

    #[must_use]
    pub const fn as_array(self) -> [f32; 3] {
        [self.a, self.b, self.c]
    }

    /// Clamps each phase into `[-1, 1]`. NaN collapses to zero.
    #[must_use]
    pub fn clamped(self) -> Self {
        Self::new(clamp_unit(self.a), clamp_unit(self.b), clamp_unit(self.c))
    }

    #[must_use]
    pub fn is_zero(self) -> bool {
        self.as_array().iter().all(|duty| *duty == 0.0)
    }
}

/// Clamps a demand into `[-1, 1]`, mapping NaN to zero.
#[must_use]
pub fn clamp_unit(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(-1.0, 1.0)
    }
}

/// Converts an output demand into per-phase duties for the given sector.
///
/// An invalid sector yields [`Fault::SensorFault`]; callers drive zero in that case.
pub fn commutate(demand: f32, sector: HallState, reversed: bool) -> Result<PhaseDuties, Fault> {
    if !sector.is_valid() {
        return Err(Fault::SensorFault);
    }

    let signs = COMMUTATION_TABLE[usize::from(sector.raw())];
    let demand = if reversed {
        -clamp_unit(demand)
    } else {
        clamp_unit(demand)
    };

    Ok(PhaseDuties::new(
        f32::from(signs[0]) * demand,
        f32::from(signs[1]) * demand,
        f32::from(signs[2]) * demand,
    ))
}

/// Complementary gate levels for one phase.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct PhaseGate {
    pub high: bool,
    pub low: bool,
}

/// Derives gate levels. A duty must exceed the dead-time fraction in magnitude
/// to assert either side, so high and low are never asserted together.
#[must_use]
pub fn gate_signals(duties: PhaseDuties, dead_time: f32) -> [PhaseGate; 3] {
    duties.clamped().as_array().map(|duty| PhaseGate {
        high: duty > dead_time,
        low: duty < -dead_time,
    })
}

/// Clamps the duties and writes all six gate lines. Returns the applied duties.
pub fn apply_to_hardware<L: LineIo>(
    lines: &mut L,
    pins: &ResolvedPins,
    duties: PhaseDuties,
    dead_time: f32,
) -> PhaseDuties {
    let applied = duties.clamped();
    let gates = gate_signals(applied, dead_time);

    for (phase, gate) in gates.iter().enumerate() {
        // Release before asserting so both sides are never on at once mid-update.
        if gate.high {
            lines.set_line(pins.low_side[phase], false);
            lines.set_line(pins.high_side[phase], true);
        } else {
            lines.set_line(pins.high_side[phase], false);
            lines.set_line(pins.low_side[phase], gate.low);
        }
    }

    applied
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_sectors_fault_without_output() {
        for raw in [0, 7] {
            assert_eq!(
                commutate(0.8, HallState::from_raw(raw), false),
                Err(Fault::SensorFault)
            );
        }
    }

    #[test]
    fn each_valid_sector_drives_exactly_two_phases_in_opposition() {
        for raw in 1..=6 {
            let duties = commutate(0.5, HallState::from_raw(raw), false).unwrap();
            let values = duties.as_array();
            assert_eq!(values.iter().filter(|d| **d == 0.0).count(), 1);
            assert_eq!(values.iter().sum::<f32>(), 0.0);
        }
    }

    #[test]
    fn reversal_negates_every_phase() {
        let forward = commutate(0.4, HallState::from_raw(3), false).unwrap();
        let reversed = commutate(0.4, HallState::from_raw(3), true).unwrap();
        assert_eq!(reversed, PhaseDuties::new(-forward.a, -forward.b, -forward.c));
    }

    #[test]
    fn demand_is_clamped_before_scaling() {
        let duties = commutate(3.0, HallState::from_raw(1), false).unwrap();
        assert_eq!(duties, PhaseDuties::new(1.0, -1.0, 0.0));
    }

    #[test]
    fn gates_respect_dead_time() {
        let gates = gate_signals(PhaseDuties::new(0.01, -0.5, 0.5), 0.02);
        assert_eq!(gates[0], PhaseGate::default());
        assert_eq!(gates[1], PhaseGate { high: false, low: true });
        assert_eq!(gates[2], PhaseGate { high: true, low: false });
    }

    #[test]
    fn clamping_handles_out_of_range_and_nan() {
        let clamped = PhaseDuties::new(2.5, -7.0, f32::NAN).clamped();
        assert_eq!(clamped, PhaseDuties::new(1.0, -1.0, 0.0));
    }
}
