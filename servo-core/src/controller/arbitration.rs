//! Authority arbitration between the servo and the conventional ETB.
//!
//! While ETB mode is on, the servo positions the throttle and the ETB is
//! parked at its passive target. A periodic health check escalates to
//! failsafe, which hands authority back to the ETB at the throttle position
//! captured when ETB mode was engaged (the anchor).

use core::fmt;
use core::time::Duration;

use super::{ControlTargets, OperatingState, ServoController};
use crate::config::ServoConfig;
use crate::faults::{Fault, FaultSet};
use crate::hal::LineIo;
use crate::peers::EnginePeers;
use crate::telemetry::{HandoffTelemetry, TelemetryEventKind, TelemetryPayload};
use crate::throttle::{ThrottleInputs, clamp_percent, compute_throttle_target};
use crate::timing::{ControlInstant, deadline_reached, dwell_elapsed};

/// ETB target commanded while the servo owns the throttle.
pub const ETB_PASSIVE_TARGET: f32 = 0.0;
pub const HEALTH_CHECK_PERIOD: Duration = Duration::from_millis(100);
/// How long the throttle error must stay out of tolerance before failsafe.
pub const ETB_ERROR_DWELL: Duration = Duration::from_millis(2000);
pub const FAILSAFE_RETRY_INTERVAL: Duration = Duration::from_millis(5000);

/// Reasons ETB mode could not be engaged.
#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EtbModeError {
    /// Only idle and position control may engage.
    InvalidState(OperatingState),
    FaultActive(FaultSet),
    PositionInvalid,
    /// The conventional ETB reports an error code.
    EtbError(u16),
    /// The servo and ETB disagree by more than the sync tolerance.
    OutOfSync { etb: f32, servo: f32 },
}

impl fmt::Display for EtbModeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EtbModeError::InvalidState(state) => write!(f, "cannot engage while {state}"),
            EtbModeError::FaultActive(faults) => write!(f, "faults active: {faults}"),
            EtbModeError::PositionInvalid => f.write_str("servo position not established"),
            EtbModeError::EtbError(code) => write!(f, "ETB reports error {code}"),
            EtbModeError::OutOfSync { etb, servo } => {
                write!(f, "ETB at {etb}% but servo at {servo}%")
            }
        }
    }
}

/// ETB mode and failsafe bookkeeping.
#[derive(Copy, Clone, Debug)]
pub struct EtbArbitration<I> {
    mode_enabled: bool,
    failsafe_active: bool,
    anchor: f32,
    next_health_check: Option<I>,
    error_since: Option<I>,
    retry_at: Option<I>,
    failsafe_count: u16,
}

impl<I: ControlInstant> EtbArbitration<I> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            mode_enabled: false,
            failsafe_active: false,
            anchor: 0.0,
            next_health_check: None,
            error_since: None,
            retry_at: None,
            failsafe_count: 0,
        }
    }

    #[must_use]
    pub const fn mode_enabled(&self) -> bool {
        self.mode_enabled
    }

    #[must_use]
    pub const fn failsafe_active(&self) -> bool {
        self.failsafe_active
    }

    /// ETB position captured when ETB mode was engaged.
    #[must_use]
    pub const fn anchor(&self) -> f32 {
        self.anchor
    }

    /// Number of failsafe activations since power-up.
    #[must_use]
    pub const fn failsafe_count(&self) -> u16 {
        self.failsafe_count
    }

    #[must_use]
    pub const fn next_health_check(&self) -> Option<I> {
        self.next_health_check
    }

    /// When the next failsafe recovery attempt is due.
    #[must_use]
    pub const fn next_retry(&self) -> Option<I> {
        self.retry_at
    }

    /// Drops all sub-state except the failsafe counter.
    pub(super) fn reset(&mut self) {
        *self = Self {
            failsafe_count: self.failsafe_count,
            ..Self::new()
        };
    }

    fn engage(&mut self, anchor: f32, now: I) {
        self.mode_enabled = true;
        self.failsafe_active = false;
        self.anchor = anchor;
        self.next_health_check = Some(now + HEALTH_CHECK_PERIOD);
        self.error_since = None;
        self.retry_at = None;
    }

    fn disengage(&mut self) {
        self.mode_enabled = false;
        self.failsafe_active = false;
        self.next_health_check = None;
        self.error_since = None;
        self.retry_at = None;
    }

    fn enter_failsafe(&mut self, now: I) {
        self.failsafe_active = true;
        self.error_since = None;
        self.retry_at = Some(now + FAILSAFE_RETRY_INTERVAL);
        self.failsafe_count = self.failsafe_count.saturating_add(1);
    }

    /// Returns `true` once the health check period has elapsed, scheduling the next one.
    fn health_check_due(&mut self, now: I) -> bool {
        if !deadline_reached(self.next_health_check, now) {
            return false;
        }
        self.next_health_check = Some(now + HEALTH_CHECK_PERIOD);
        true
    }

    /// Tracks how long the throttle error has been out of tolerance.
    fn error_dwell_elapsed(&mut self, out_of_tolerance: bool, now: I) -> bool {
        if !out_of_tolerance {
            self.error_since = None;
            return false;
        }
        let since = *self.error_since.get_or_insert(now);
        dwell_elapsed(Some(since), now, ETB_ERROR_DWELL)
    }
}

impl<I: ControlInstant> Default for EtbArbitration<I> {
    fn default() -> Self {
        Self::new()
    }
}

impl<I, L, P> ServoController<I, L, P>
where
    I: ControlInstant,
    L: LineIo,
    P: EnginePeers,
{
    /// Engages or releases ETB mode, returning whether the request took effect.
    pub fn set_etb_mode(&mut self, enable: bool, now: I) -> bool {
        match self.try_set_etb_mode(enable, now) {
            Ok(()) => true,
            Err(reason) => {
                debug!("ETB mode request refused: {:?}", reason);
                false
            }
        }
    }

    /// Engages or releases ETB mode, reporting why an engagement was refused.
    ///
    /// Engaging requires idle or position control, no faults, a valid servo
    /// position, no ETB error, and the ETB within the sync tolerance of the
    /// servo. Releasing always succeeds. Requesting the current mode is a no-op.
    pub fn try_set_etb_mode(&mut self, enable: bool, now: I) -> Result<(), EtbModeError> {
        if enable == self.etb.mode_enabled() {
            return Ok(());
        }
        if !enable {
            self.release_etb_mode(now);
            self.restore_driver();
            return Ok(());
        }

        if !matches!(
            self.state,
            OperatingState::Idle | OperatingState::PositionControl
        ) {
            return Err(EtbModeError::InvalidState(self.state));
        }
        let Some(config) = self.active_config() else {
            return Err(EtbModeError::InvalidState(self.state));
        };
        if !self.faults.is_empty() {
            return Err(EtbModeError::FaultActive(self.faults));
        }
        let servo = self.hall.position().ok_or(EtbModeError::PositionInvalid)?;
        if let Some(code) = self.peers.etb_error_code() {
            return Err(EtbModeError::EtbError(code));
        }
        let etb = self.peers.etb_position();
        let in_sync = libm::fabsf(etb - servo) <= config.etb.sync_tolerance;
        if !in_sync {
            return Err(EtbModeError::OutOfSync { etb, servo });
        }

        self.synchronize(now);
        self.enter_state(OperatingState::PositionControl, now);

        let anchor = self.etb.anchor();
        info!("ETB mode engaged at {} percent", anchor);
        self.record(
            TelemetryEventKind::EtbEngaged,
            TelemetryPayload::Handoff(HandoffTelemetry::new(anchor, self.etb.failsafe_count())),
            now,
        );
        Ok(())
    }

    /// Captures the ETB position as anchor and starting target, then parks the ETB.
    fn synchronize(&mut self, now: I) {
        let anchor = clamp_percent(self.peers.etb_position());
        self.etb.engage(anchor, now);
        self.targets = ControlTargets {
            servo: anchor,
            throttle: anchor,
        };
        self.peers.set_etb_target(ETB_PASSIVE_TARGET);
    }

    /// Returns authority to the ETB at the anchor.
    ///
    /// The bridge is left as it is; callers that keep running decide whether
    /// to re-enable it.
    pub(super) fn release_etb_mode(&mut self, now: I) {
        let anchor = self.etb.anchor();
        self.etb.disengage();
        self.peers.set_etb_target(anchor);

        info!("ETB mode released, ETB restored to {} percent", anchor);
        self.record(
            TelemetryEventKind::EtbReleased,
            TelemetryPayload::Handoff(HandoffTelemetry::new(anchor, self.etb.failsafe_count())),
            now,
        );
    }

    /// Runs the health check, failsafe recovery, and throttle targeting for one tick.
    pub(super) fn process_etb_mode(&mut self, config: &ServoConfig, now: I) {
        if self.etb.health_check_due(now) && !self.etb.failsafe_active() {
            let degraded = self.etb_health_degraded(config, now);
            if degraded {
                self.handle_etb_failsafe(now);
            }
        }

        if self.etb.failsafe_active() {
            self.perform_etb_failsafe(now);
            return;
        }

        let inputs = ThrottleInputs::sample(&config.pedal, &mut self.lines, &self.peers);
        let requested = compute_throttle_target(config, &inputs);

        let current = self.targets.throttle;
        let delta = requested - current;
        if libm::fabsf(delta) <= config.etb.deadband {
            return;
        }

        let step = config.etb_step_limit();
        let next = self.limits.clamp(current + delta.clamp(-step, step));
        self.targets = ControlTargets {
            servo: next,
            throttle: next,
        };
    }

    fn etb_health_degraded(&mut self, config: &ServoConfig, now: I) -> bool {
        let error_out_of_tolerance = self.hall.position().is_none_or(|position| {
            libm::fabsf(position - self.targets.throttle) > config.etb.health_tolerance
        });
        let error_persisted = self.etb.error_dwell_elapsed(error_out_of_tolerance, now);

        self.faults.contains(Fault::Overcurrent)
            || self.faults.contains(Fault::SensorFault)
            || self.state == OperatingState::Fault
            || error_persisted
    }

    /// Hands authority back to the ETB and disables the bridge.
    fn handle_etb_failsafe(&mut self, now: I) {
        self.stop_motor();
        self.set_driver_enabled(false);

        let anchor = self.etb.anchor();
        self.peers.set_etb_target(anchor);
        self.etb.enter_failsafe(now);
        self.raise_fault(Fault::CommunicationError, now);
        if self.state == OperatingState::PositionControl {
            self.enter_state(OperatingState::Idle, now);
        }

        error!(
            "ETB failsafe engaged, ETB restored to {} percent ({} activations)",
            anchor,
            self.etb.failsafe_count()
        );
        self.record(
            TelemetryEventKind::FailsafeEngaged,
            TelemetryPayload::Handoff(HandoffTelemetry::new(anchor, self.etb.failsafe_count())),
            now,
        );
    }

    /// Attempts recovery at most once per retry interval.
    fn perform_etb_failsafe(&mut self, now: I) {
        if !deadline_reached(self.etb.next_retry(), now) {
            return;
        }

        if !self.faults.is_empty() || self.state != OperatingState::Idle {
            debug!(
                "ETB failsafe recovery deferred: state {:?}, faults {:?}",
                self.state, self.faults
            );
            self.etb.retry_at = Some(now + FAILSAFE_RETRY_INTERVAL);
            return;
        }

        self.set_driver_enabled(true);
        self.synchronize(now);
        self.enter_state(OperatingState::PositionControl, now);

        let anchor = self.etb.anchor();
        info!("ETB failsafe recovered at {} percent", anchor);
        self.record(
            TelemetryEventKind::FailsafeRecovered,
            TelemetryPayload::Handoff(HandoffTelemetry::new(anchor, self.etb.failsafe_count())),
            now,
        );
    }
}
