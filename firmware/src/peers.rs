#![cfg_attr(not(target_os = "none"), allow(dead_code))]

//! Engine peer mailbox shared with the rest of the ECU firmware.
//!
//! The conventional ETB, idle control, traction control, and the speed limiters
//! run in other tasks. They publish into these atomics and the servo reads them
//! once per tick through [`AtomicEnginePeers`]. Floats are stored as raw bits.
//!
//! On a bench board [`BenchEtb`] is the only producer. Idle, traction, and
//! speed-limiter tasks attach through the `publish_*` functions; until they
//! do, the servo sees no idle request, full traction, and no limiter.

use portable_atomic::{AtomicBool, AtomicU32, Ordering};
use servo_core::peers::{EnginePeers, IdleRequest, TractionRequest};

/// Stored in [`ETB_ERROR`] while the ETB reports no error.
const NO_ERROR: u32 = u32::MAX;

static ETB_POSITION: AtomicU32 = AtomicU32::new(0);
static ETB_ERROR: AtomicU32 = AtomicU32::new(NO_ERROR);
static ETB_TARGET: AtomicU32 = AtomicU32::new(0);
static IDLE_ACTIVE: AtomicBool = AtomicBool::new(false);
static IDLE_TARGET: AtomicU32 = AtomicU32::new(0);
static TRACTION_ACTIVE: AtomicBool = AtomicBool::new(false);
static TRACTION_FACTOR: AtomicU32 = AtomicU32::new(0x3f80_0000);
static SPEED_LIMITER: AtomicBool = AtomicBool::new(false);
static THROTTLE_FEEDBACK: AtomicU32 = AtomicU32::new(0);
static REPORTED_POSITION: AtomicU32 = AtomicU32::new(0);
static REPORTED_TARGET: AtomicU32 = AtomicU32::new(0);
static REPORT_VALID: AtomicBool = AtomicBool::new(false);

fn store(cell: &AtomicU32, value: f32) {
    cell.store(value.to_bits(), Ordering::Relaxed);
}

fn load(cell: &AtomicU32) -> f32 {
    f32::from_bits(cell.load(Ordering::Relaxed))
}

/// Publishes the conventional ETB's measured position and error state.
pub fn publish_etb(position: f32, error: Option<u16>) {
    store(&ETB_POSITION, position);
    ETB_ERROR.store(error.map_or(NO_ERROR, u32::from), Ordering::Relaxed);
}

/// Target most recently requested from the conventional ETB.
pub fn etb_target() -> f32 {
    load(&ETB_TARGET)
}

#[cfg_attr(target_os = "none", allow(dead_code))]
pub fn publish_idle(request: IdleRequest) {
    IDLE_ACTIVE.store(request.should_idle, Ordering::Relaxed);
    store(&IDLE_TARGET, request.target);
}

#[cfg_attr(target_os = "none", allow(dead_code))]
pub fn publish_traction(request: TractionRequest) {
    TRACTION_ACTIVE.store(request.enabled, Ordering::Relaxed);
    store(&TRACTION_FACTOR, request.factor);
}

#[cfg_attr(target_os = "none", allow(dead_code))]
pub fn publish_speed_limiter(engaged: bool) {
    SPEED_LIMITER.store(engaged, Ordering::Relaxed);
}

pub fn publish_throttle_feedback(percent: f32) {
    store(&THROTTLE_FEEDBACK, percent);
}

/// Throttle position and target the servo reported while it held authority.
pub fn reported_throttle() -> Option<(f32, f32)> {
    REPORT_VALID
        .load(Ordering::Relaxed)
        .then(|| (load(&REPORTED_POSITION), load(&REPORTED_TARGET)))
}

/// Stand-in for the conventional ETB on a bench board without one.
///
/// Slews toward the commanded ETB target and publishes the result as the ETB
/// position, along with throttle feedback taken from the servo's report while
/// it holds authority.
#[derive(Copy, Clone, Debug, Default)]
pub struct BenchEtb {
    position: f32,
}

impl BenchEtb {
    /// Percent of travel covered per millisecond.
    pub const SLEW_PER_MS: f32 = 0.5;

    pub const fn new() -> Self {
        Self { position: 0.0 }
    }

    pub const fn position(&self) -> f32 {
        self.position
    }

    /// Advances the model by `elapsed_ms` and publishes its outputs.
    pub fn step(&mut self, elapsed_ms: f32) {
        let step = Self::SLEW_PER_MS * elapsed_ms;
        let delta = (etb_target() - self.position).clamp(-step, step);
        self.position += delta;

        publish_etb(self.position, None);
        let feedback = reported_throttle().map_or(self.position, |(position, _)| position);
        publish_throttle_feedback(feedback);
    }
}

/// [`EnginePeers`] view over the shared mailbox.
#[derive(Copy, Clone, Debug, Default)]
pub struct AtomicEnginePeers;

impl EnginePeers for AtomicEnginePeers {
    fn etb_position(&self) -> f32 {
        load(&ETB_POSITION)
    }

    fn etb_error_code(&self) -> Option<u16> {
        u16::try_from(ETB_ERROR.load(Ordering::Relaxed)).ok()
    }

    fn set_etb_target(&mut self, target: f32) {
        store(&ETB_TARGET, target);
    }

    fn idle_request(&self) -> IdleRequest {
        IdleRequest {
            should_idle: IDLE_ACTIVE.load(Ordering::Relaxed),
            target: load(&IDLE_TARGET),
        }
    }

    fn traction_request(&self) -> TractionRequest {
        TractionRequest {
            enabled: TRACTION_ACTIVE.load(Ordering::Relaxed),
            factor: load(&TRACTION_FACTOR),
        }
    }

    fn speed_limiter_engaged(&self) -> bool {
        SPEED_LIMITER.load(Ordering::Relaxed)
    }

    fn throttle_feedback(&self) -> f32 {
        load(&THROTTLE_FEEDBACK)
    }

    fn report_throttle(&mut self, position: f32, target: f32) {
        store(&REPORTED_POSITION, position);
        store(&REPORTED_TARGET, target);
        REPORT_VALID.store(true, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mailbox_round_trips_peer_state() {
        let mut peers = AtomicEnginePeers;
        assert!((peers.traction_request().factor - 1.0).abs() < f32::EPSILON);

        publish_etb(12.5, Some(3));
        assert!((peers.etb_position() - 12.5).abs() < f32::EPSILON);
        assert_eq!(peers.etb_error_code(), Some(3));
        publish_etb(12.5, None);
        assert_eq!(peers.etb_error_code(), None);

        peers.set_etb_target(4.0);
        assert!((etb_target() - 4.0).abs() < f32::EPSILON);

        peers.report_throttle(20.0, 22.0);
        assert_eq!(reported_throttle(), Some((20.0, 22.0)));

        // The bench ETB slews toward the commanded target and republishes.
        peers.set_etb_target(10.0);
        let mut etb = BenchEtb::new();
        etb.step(4.0);
        assert!((etb.position() - 2.0).abs() < f32::EPSILON);
        assert!((peers.etb_position() - 2.0).abs() < f32::EPSILON);
        assert_eq!(peers.etb_error_code(), None);
        assert!((peers.throttle_feedback() - 20.0).abs() < f32::EPSILON);

        etb.step(100.0);
        assert!((peers.etb_position() - 10.0).abs() < f32::EPSILON);

        publish_idle(IdleRequest {
            should_idle: true,
            target: 3.5,
        });
        publish_traction(TractionRequest {
            enabled: true,
            factor: 0.6,
        });
        publish_speed_limiter(true);
        assert!((peers.idle_request().target - 3.5).abs() < f32::EPSILON);
        assert!(peers.idle_request().should_idle);
        assert!(peers.traction_request().enabled);
        assert!((peers.traction_request().factor - 0.6).abs() < f32::EPSILON);
        assert!(peers.speed_limiter_engaged());
    }
}
