#![cfg_attr(not(target_os = "none"), allow(dead_code))]

//! Shared status storage for the firmware target.
//!
//! The servo task publishes a handful of telemetry fields into atomics after
//! every tick so diagnostics and other ECU tasks can read them without
//! borrowing the controller.

use portable_atomic::{AtomicBool, AtomicU8, AtomicU16, AtomicU32, Ordering};
use servo_core::controller::OperatingState;
use servo_core::faults::FaultSet;
use servo_core::telemetry::TelemetrySnapshot;

static STATE: AtomicU8 = AtomicU8::new(0);
static FAULT_BITS: AtomicU8 = AtomicU8::new(0);
static POSITION: AtomicU32 = AtomicU32::new(0);
static POSITION_VALID: AtomicBool = AtomicBool::new(false);
static TARGET: AtomicU32 = AtomicU32::new(0);
static MOTOR_CURRENT: AtomicU32 = AtomicU32::new(0);
static ETB_MODE: AtomicBool = AtomicBool::new(false);
static FAILSAFE_ACTIVE: AtomicBool = AtomicBool::new(false);
static FAILSAFE_COUNT: AtomicU16 = AtomicU16::new(0);
static TICK_COUNT: AtomicU32 = AtomicU32::new(0);

/// Condensed servo status read back from the shared atomics.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ServoStatus {
    pub state: OperatingState,
    pub faults: FaultSet,
    /// Measured position in percent, when known.
    pub position: Option<f32>,
    pub target: f32,
    pub motor_current: f32,
    pub etb_mode: bool,
    pub failsafe_active: bool,
    pub failsafe_count: u16,
    pub tick_count: u32,
}

/// Stores the fields of `snapshot` that other tasks consume.
pub fn publish(snapshot: &TelemetrySnapshot) {
    STATE.store(snapshot.state.to_raw(), Ordering::Relaxed);
    FAULT_BITS.store(snapshot.fault_bits, Ordering::Relaxed);
    POSITION.store(snapshot.position.to_bits(), Ordering::Relaxed);
    POSITION_VALID.store(snapshot.position_valid, Ordering::Relaxed);
    TARGET.store(snapshot.target.to_bits(), Ordering::Relaxed);
    MOTOR_CURRENT.store(snapshot.motor_current.to_bits(), Ordering::Relaxed);
    ETB_MODE.store(snapshot.etb_mode, Ordering::Relaxed);
    FAILSAFE_ACTIVE.store(snapshot.failsafe_active, Ordering::Relaxed);
    FAILSAFE_COUNT.store(snapshot.failsafe_count, Ordering::Relaxed);
    TICK_COUNT.store(snapshot.tick_count, Ordering::Relaxed);
}

/// Returns the most recently published status.
pub fn snapshot() -> ServoStatus {
    let state = OperatingState::from_raw(STATE.load(Ordering::Relaxed))
        .unwrap_or(OperatingState::Disabled);
    let position = POSITION_VALID
        .load(Ordering::Relaxed)
        .then(|| f32::from_bits(POSITION.load(Ordering::Relaxed)));

    ServoStatus {
        state,
        faults: FaultSet::from_bits(FAULT_BITS.load(Ordering::Relaxed)),
        position,
        target: f32::from_bits(TARGET.load(Ordering::Relaxed)),
        motor_current: f32::from_bits(MOTOR_CURRENT.load(Ordering::Relaxed)),
        etb_mode: ETB_MODE.load(Ordering::Relaxed),
        failsafe_active: FAILSAFE_ACTIVE.load(Ordering::Relaxed),
        failsafe_count: FAILSAFE_COUNT.load(Ordering::Relaxed),
        tick_count: TICK_COUNT.load(Ordering::Relaxed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use servo_core::faults::Fault;

    #[test]
    fn published_snapshot_reads_back() {
        let mut telemetry = TelemetrySnapshot::initial();
        telemetry.state = OperatingState::PositionControl;
        telemetry.fault_bits = Fault::SensorFault.bit();
        telemetry.position = 42.0;
        telemetry.position_valid = true;
        telemetry.failsafe_count = 2;
        telemetry.tick_count = 1_234;
        publish(&telemetry);

        let status = snapshot();
        assert_eq!(status.state, OperatingState::PositionControl);
        assert!(status.faults.contains(Fault::SensorFault));
        assert_eq!(status.position, Some(42.0));
        assert_eq!(status.failsafe_count, 2);
        assert_eq!(status.tick_count, 1_234);
    }
}
