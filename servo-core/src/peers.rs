//! Narrow interfaces to the engine functions the servo cooperates with.
//!
//! The conventional ETB, idle control, traction control, speed limiters, and
//! the throttle-position sensor all live outside this crate. The controller
//! only ever talks to them through [`EnginePeers`].

/// Idle-control contribution to the throttle target.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct IdleRequest {
    pub should_idle: bool,
    /// Throttle position idle control wants, in percent.
    pub target: f32,
}

/// Traction-control torque reduction.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct TractionRequest {
    pub enabled: bool,
    /// Multiplier in `[0, 1]` applied to the throttle target.
    pub factor: f32,
}

impl Default for TractionRequest {
    fn default() -> Self {
        Self {
            enabled: false,
            factor: 1.0,
        }
    }
}

/// Engine-side collaborators consulted by the controller.
pub trait EnginePeers {
    /// Position the conventional ETB reports, in percent.
    fn etb_position(&self) -> f32;

    /// Active error code of the conventional ETB, if any.
    fn etb_error_code(&self) -> Option<u16>;

    /// Commands the conventional ETB target, in percent.
    fn set_etb_target(&mut self, target: f32);

    fn idle_request(&self) -> IdleRequest;

    fn traction_request(&self) -> TractionRequest;

    /// Returns `true` while any vehicle speed limiter is engaged.
    fn speed_limiter_engaged(&self) -> bool;

    /// Throttle-position feedback used by launch control, in percent.
    fn throttle_feedback(&self) -> f32;

    /// Overrides the engine-wide reported throttle position and target.
    fn report_throttle(&mut self, position: f32, target: f32);
}

/// Peers that report a healthy, closed ETB and request nothing.
#[derive(Copy, Clone, Debug, Default)]
pub struct NoopPeers;

impl NoopPeers {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl EnginePeers for NoopPeers {
    fn etb_position(&self) -> f32 {
        0.0
    }

    fn etb_error_code(&self) -> Option<u16> {
        None
    }

    fn set_etb_target(&mut self, _: f32) {}

    fn idle_request(&self) -> IdleRequest {
        IdleRequest::default()
    }

    fn traction_request(&self) -> TractionRequest {
        TractionRequest::default()
    }

    fn speed_limiter_engaged(&self) -> bool {
        false
    }

    fn throttle_feedback(&self) -> f32 {
        0.0
    }

    fn report_throttle(&mut self, _: f32, _: f32) {}
}
