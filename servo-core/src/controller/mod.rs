//! Top-level servo controller.
//!
//! [`ServoController`] owns every piece of per-instance state: the hall
//! estimator, the position loop, homing, ETB arbitration, faults, and
//! telemetry. The scheduler drives it through two entry points:
//! [`ServoController::on_tick`] at a fixed period and
//! [`ServoController::on_configuration_change`] whenever tuning is replaced.
//! Both run to completion, so no locking is involved.
//!
//! Each tick runs, in order: configuration/enable validation, initialization
//! when newly enabled, one state-machine step, ETB arbitration while ETB mode
//! is on, safety checks, the position loop and commutation while in position
//! control, and finally telemetry publication.

mod arbitration;

use core::fmt;
use core::time::Duration;

pub use arbitration::{
    ETB_ERROR_DWELL, ETB_PASSIVE_TARGET, EtbArbitration, EtbModeError, FAILSAFE_RETRY_INTERVAL,
    HEALTH_CHECK_PERIOD,
};

use crate::commutation::{PhaseDuties, apply_to_hardware, commutate};
use crate::config::{ConfigError, PidGains, ResolvedPins, ServoConfig};
use crate::faults::{Fault, FaultSet};
use crate::hal::{LineIo, PinDirection};
use crate::hall::{HallEstimator, HallState};
use crate::homing::{HomingProcedure, HomingState, HomingStep, TravelLimits};
use crate::peers::EnginePeers;
use crate::position::PositionLoop;
use crate::task::{ClosedLoopController, PeriodicTask};
use crate::telemetry::{
    TelemetryEventKind, TelemetryPayload, TelemetryRecorder, TelemetrySnapshot,
};
use crate::timing::{ControlInstant, dwell_elapsed};

/// Tick period assumed before any configuration arrives.
pub const DEFAULT_TICK_PERIOD: Duration = Duration::from_millis(1);

/// Top-level operating state.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum OperatingState {
    Disabled,
    Initializing,
    Idle,
    Homing,
    PositionControl,
    Fault,
}

impl OperatingState {
    /// Returns `true` for the only states in which the motor may be driven.
    #[must_use]
    pub const fn allows_drive(self) -> bool {
        matches!(self, OperatingState::PositionControl | OperatingState::Homing)
    }

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            OperatingState::Disabled => "disabled",
            OperatingState::Initializing => "initializing",
            OperatingState::Idle => "idle",
            OperatingState::Homing => "homing",
            OperatingState::PositionControl => "position-control",
            OperatingState::Fault => "fault",
        }
    }

    /// Encodes the state for telemetry.
    #[must_use]
    pub const fn to_raw(self) -> u8 {
        match self {
            OperatingState::Disabled => 0,
            OperatingState::Initializing => 1,
            OperatingState::Idle => 2,
            OperatingState::Homing => 3,
            OperatingState::PositionControl => 4,
            OperatingState::Fault => 5,
        }
    }

    #[must_use]
    pub const fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(OperatingState::Disabled),
            1 => Some(OperatingState::Initializing),
            2 => Some(OperatingState::Idle),
            3 => Some(OperatingState::Homing),
            4 => Some(OperatingState::PositionControl),
            5 => Some(OperatingState::Fault),
            _ => None,
        }
    }
}

impl fmt::Display for OperatingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Targets in percent. The throttle target is only driven in ETB mode,
/// where it is mirrored into the servo target.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct ControlTargets {
    pub servo: f32,
    pub throttle: f32,
}

/// Reasons a direct servo target is refused.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TargetError {
    /// ETB mode computes its own target.
    EtbModeActive,
    NotFinite,
}

impl fmt::Display for TargetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetError::EtbModeActive => f.write_str("ETB mode owns the throttle target"),
            TargetError::NotFinite => f.write_str("target must be a finite percentage"),
        }
    }
}

/// Servo controller generic over the clock, hardware lines, and engine peers.
pub struct ServoController<I, L, P>
where
    I: ControlInstant,
    L: LineIo,
    P: EnginePeers,
{
    config: Option<ServoConfig>,
    config_error: Option<ConfigError>,
    reinit_pending: bool,
    lines: L,
    peers: P,
    pins: Option<ResolvedPins>,
    state: OperatingState,
    faults: FaultSet,
    hall: HallEstimator,
    position_loop: PositionLoop,
    homing: HomingProcedure<I>,
    targets: ControlTargets,
    tracking: bool,
    etb: EtbArbitration<I>,
    limits: TravelLimits,
    motor_current: f32,
    peak_current: f32,
    driver_enabled: bool,
    tracking_error_since: Option<I>,
    outputs: PhaseDuties,
    snapshot: TelemetrySnapshot,
    events: TelemetryRecorder<I>,
    tick_count: u32,
    last_tick: Option<I>,
}

impl<I, L, P> ServoController<I, L, P>
where
    I: ControlInstant,
    L: LineIo,
    P: EnginePeers,
{
    /// Creates a disabled controller with no configuration.
    pub fn new(lines: L, peers: P) -> Self {
        Self {
            config: None,
            config_error: None,
            reinit_pending: false,
            lines,
            peers,
            pins: None,
            state: OperatingState::Disabled,
            faults: FaultSet::new(),
            hall: HallEstimator::new(),
            position_loop: PositionLoop::new(&PidGains::default()),
            homing: HomingProcedure::new(),
            targets: ControlTargets::default(),
            tracking: false,
            etb: EtbArbitration::new(),
            limits: TravelLimits::default(),
            motor_current: 0.0,
            peak_current: 0.0,
            driver_enabled: false,
            tracking_error_since: None,
            outputs: PhaseDuties::ZERO,
            snapshot: TelemetrySnapshot::initial(),
            events: TelemetryRecorder::new(),
            tick_count: 0,
            last_tick: None,
        }
    }

    /// Replaces the configuration. `None` models an absent configuration.
    ///
    /// Takes effect on the next tick. An invalid configuration is kept for
    /// inspection but holds the controller in [`OperatingState::Disabled`].
    pub fn on_configuration_change(&mut self, config: Option<ServoConfig>) {
        let previous = self.config;
        self.config_error = config.as_ref().and_then(|config| config.validate().err());
        self.config = config;

        if let Some(error) = self.config_error {
            warn!("servo configuration rejected: {:?}", error);
            if let Some(now) = self.last_tick {
                self.record(
                    TelemetryEventKind::ConfigurationRejected,
                    TelemetryPayload::none(),
                    now,
                );
            }
            return;
        }

        let Some(config) = config else {
            return;
        };

        self.position_loop.configure(&config.pid);
        self.hall.rescale(config.min_position, config.max_position);
        if self.homing.state() != HomingState::Complete {
            self.limits = TravelLimits::from_config(&config);
        }
        if self.pins.is_some() && config.pins.resolve().ok() != self.pins {
            self.reinit_pending = true;
        }

        let auto_engage_dropped =
            previous.is_some_and(|previous| previous.etb_mode_enabled) && !config.etb_mode_enabled;
        if auto_engage_dropped && self.etb.mode_enabled() {
            if let Some(now) = self.last_tick {
                self.release_etb_mode(now);
                self.restore_driver();
            }
        }
    }

    /// Runs one control tick.
    pub fn on_tick(&mut self, now: I) {
        self.last_tick = Some(now);

        let Some(config) = self.active_config() else {
            if self.state != OperatingState::Disabled {
                self.reset_to_disabled(now);
            }
            self.finish_tick();
            return;
        };

        if self.reinit_pending {
            self.reinit_pending = false;
            if self.state != OperatingState::Disabled {
                self.reset_to_disabled(now);
            }
        }
        if self.state == OperatingState::Disabled {
            self.initialize(&config, now);
        }

        self.sample_inputs(&config);
        self.step_state_machine(&config, now);

        if self.etb.mode_enabled() {
            self.process_etb_mode(&config, now);
        }

        self.run_safety_checks(&config, now);

        match self.state {
            OperatingState::PositionControl => self.run_position_loop(),
            OperatingState::Homing => {}
            _ => self.stop_motor(),
        }

        self.finish_tick();
    }

    /// Commands a direct servo target and starts tracking it.
    pub fn set_target(&mut self, percent: f32) -> Result<(), TargetError> {
        if !percent.is_finite() {
            return Err(TargetError::NotFinite);
        }
        if self.etb.mode_enabled() {
            return Err(TargetError::EtbModeActive);
        }

        self.targets.servo = self.limits.clamp(percent);
        self.tracking = true;
        Ok(())
    }

    /// Stops tracking the direct servo target. Position control is left on the next tick.
    pub fn release(&mut self) {
        self.tracking = false;
    }

    /// Latches a fault. Critical faults take effect at the next safety check.
    pub fn raise_fault(&mut self, fault: Fault, now: I) {
        if self.faults.insert(fault) {
            warn!("servo fault raised: {:?}", fault);
            self.record(
                TelemetryEventKind::FaultRaised(fault),
                TelemetryPayload::none(),
                now,
            );
        }
    }

    /// Clears every fault and the peak current. Does not change state by itself.
    pub fn clear_faults(&mut self, now: I) {
        let cleared = self.faults;
        self.faults.clear();
        self.peak_current = self.motor_current;

        if !cleared.is_empty() {
            info!("servo faults cleared: {:?}", cleared);
            self.record(
                TelemetryEventKind::FaultsCleared,
                TelemetryPayload::none(),
                now,
            );
        }
    }

    #[must_use]
    pub const fn state(&self) -> OperatingState {
        self.state
    }

    #[must_use]
    pub const fn homing_state(&self) -> HomingState {
        self.homing.state()
    }

    #[must_use]
    pub const fn faults(&self) -> FaultSet {
        self.faults
    }

    #[must_use]
    pub const fn targets(&self) -> ControlTargets {
        self.targets
    }

    /// Returns `true` while a direct servo target is being tracked.
    #[must_use]
    pub const fn is_tracking(&self) -> bool {
        self.tracking
    }

    #[must_use]
    pub const fn position(&self) -> Option<f32> {
        self.hall.position()
    }

    #[must_use]
    pub const fn hall(&self) -> &HallEstimator {
        &self.hall
    }

    #[must_use]
    pub const fn travel_limits(&self) -> TravelLimits {
        self.limits
    }

    #[must_use]
    pub const fn etb(&self) -> &EtbArbitration<I> {
        &self.etb
    }

    #[must_use]
    pub const fn etb_mode_enabled(&self) -> bool {
        self.etb.mode_enabled()
    }

    #[must_use]
    pub const fn failsafe_active(&self) -> bool {
        self.etb.failsafe_active()
    }

    /// Duties written to the gate lines on the most recent update.
    #[must_use]
    pub const fn phase_outputs(&self) -> PhaseDuties {
        self.outputs
    }

    #[must_use]
    pub const fn driver_enabled(&self) -> bool {
        self.driver_enabled
    }

    #[must_use]
    pub const fn motor_current(&self) -> f32 {
        self.motor_current
    }

    #[must_use]
    pub const fn peak_current(&self) -> f32 {
        self.peak_current
    }

    #[must_use]
    pub const fn pid_output(&self) -> f32 {
        self.position_loop.output()
    }

    /// Telemetry published by the most recent tick.
    #[must_use]
    pub const fn telemetry(&self) -> &TelemetrySnapshot {
        &self.snapshot
    }

    #[must_use]
    pub const fn events(&self) -> &TelemetryRecorder<I> {
        &self.events
    }

    #[must_use]
    pub const fn tick_count(&self) -> u32 {
        self.tick_count
    }

    #[must_use]
    pub const fn config(&self) -> Option<&ServoConfig> {
        self.config.as_ref()
    }

    /// Why the current configuration was rejected, if it was.
    #[must_use]
    pub const fn config_error(&self) -> Option<ConfigError> {
        self.config_error
    }

    pub fn lines(&self) -> &L {
        &self.lines
    }

    pub fn lines_mut(&mut self) -> &mut L {
        &mut self.lines
    }

    pub fn peers(&self) -> &P {
        &self.peers
    }

    pub fn peers_mut(&mut self) -> &mut P {
        &mut self.peers
    }

    fn active_config(&self) -> Option<ServoConfig> {
        self.config
            .filter(|config| config.enabled && self.config_error.is_none())
    }

    fn active_setpoint(&self) -> Option<f32> {
        if self.etb.mode_enabled() {
            Some(self.targets.throttle)
        } else if self.tracking {
            Some(self.targets.servo)
        } else {
            None
        }
    }

    fn enter_state(&mut self, next: OperatingState, now: I) {
        let previous = self.state;
        if previous == next {
            return;
        }

        info!("servo state {:?} -> {:?}", previous, next);
        self.state = next;
        self.events.record_state_entered(previous, next, now);
    }

    fn record(&mut self, event: TelemetryEventKind, payload: TelemetryPayload, now: I) {
        self.events.record(event, payload, now);
    }

    fn reset_to_disabled(&mut self, now: I) {
        if self.etb.mode_enabled() {
            self.release_etb_mode(now);
        }
        self.etb.reset();

        self.stop_motor();
        self.set_driver_enabled(false);
        self.pins = None;

        self.hall.reset();
        self.position_loop.reset();
        self.homing.cancel();
        self.targets = ControlTargets::default();
        self.tracking = false;
        self.tracking_error_since = None;
        self.limits = TravelLimits::default();
        self.motor_current = 0.0;

        self.enter_state(OperatingState::Disabled, now);
    }

    fn initialize(&mut self, config: &ServoConfig, now: I) {
        let Ok(pins) = config.pins.resolve() else {
            return;
        };

        self.enter_state(OperatingState::Initializing, now);

        for pin in pins.hall {
            self.lines.configure(pin, PinDirection::Input);
        }
        for pin in pins
            .high_side
            .into_iter()
            .chain(pins.low_side)
            .chain([pins.driver_enable])
        {
            self.lines.configure(pin, PinDirection::Output);
        }

        self.pins = Some(pins);
        self.stop_motor();
        self.position_loop.configure(&config.pid);
        self.limits = TravelLimits::from_config(config);
        self.set_driver_enabled(true);
    }

    fn sample_inputs(&mut self, config: &ServoConfig) {
        let Some(pins) = self.pins else {
            return;
        };

        let sample = HallState::from_lines(pins.hall.map(|pin| self.lines.read_line(pin)));
        if self.hall.update(sample, config.min_position, config.max_position) {
            trace!("hall {} -> {}", self.hall.previous().raw(), sample.raw());
        }

        if let Some(channel) = config.current_sense.channel {
            let volts = self.lines.read_analog(channel);
            self.motor_current = config.current_sense.amps(volts);
            self.peak_current = self.peak_current.max(self.motor_current);
        }
    }

    fn step_state_machine(&mut self, config: &ServoConfig, now: I) {
        match self.state {
            OperatingState::Disabled => {}
            OperatingState::Initializing => {
                if config.homing_enabled && !self.etb.mode_enabled() {
                    self.homing.start(now);
                    self.enter_state(OperatingState::Homing, now);
                } else {
                    self.enter_state(OperatingState::Idle, now);
                }
            }
            OperatingState::Homing => self.step_homing(config, now),
            OperatingState::Idle => {
                if config.etb_mode_enabled && !self.etb.mode_enabled() {
                    if let Err(reason) = self.try_set_etb_mode(true, now) {
                        trace!("ETB auto-engage deferred: {:?}", reason);
                    }
                }

                let wants_control = self.tracking || self.etb.mode_enabled();
                if self.state == OperatingState::Idle
                    && wants_control
                    && !self.etb.failsafe_active()
                {
                    self.enter_state(OperatingState::PositionControl, now);
                }
            }
            OperatingState::PositionControl => {
                if config.etb_mode_enabled && !self.etb.mode_enabled() {
                    if let Err(reason) = self.try_set_etb_mode(true, now) {
                        trace!("ETB auto-engage deferred: {:?}", reason);
                    }
                }
                if !self.tracking && !self.etb.mode_enabled() {
                    self.enter_state(OperatingState::Idle, now);
                }
            }
            OperatingState::Fault => {
                if self.faults.is_empty() {
                    self.enter_state(OperatingState::Idle, now);
                    self.restore_driver();
                }
            }
        }
    }

    fn step_homing(&mut self, config: &ServoConfig, now: I) {
        match self
            .homing
            .step(now, self.motor_current, &mut self.hall, config)
        {
            HomingStep::Drive(demand) => self.drive(config, demand, now),
            HomingStep::Complete(limits) => {
                self.stop_motor();
                self.limits = limits;
                info!(
                    "homing complete, travel {} to {} percent",
                    limits.lower, limits.upper
                );
                self.record(
                    TelemetryEventKind::HomingComplete,
                    TelemetryPayload::Travel(limits),
                    now,
                );
                self.enter_state(OperatingState::Idle, now);
            }
            HomingStep::Failed(reason) => {
                self.stop_motor();
                error!("homing failed: {:?}", reason);
                self.record(
                    TelemetryEventKind::HomingFailed,
                    TelemetryPayload::none(),
                    now,
                );
                self.raise_fault(Fault::PositionError, now);
            }
        }
    }

    fn run_safety_checks(&mut self, config: &ServoConfig, now: I) {
        if self.motor_current > config.safety.overcurrent_limit {
            self.raise_fault(Fault::Overcurrent, now);
        }

        let tracking_error = match (self.state, self.hall.position(), self.active_setpoint()) {
            (OperatingState::PositionControl, Some(position), Some(setpoint)) => {
                Some(libm::fabsf(setpoint - position))
            }
            _ => None,
        };
        match tracking_error {
            Some(error) if error > config.safety.tracking_error_limit => {
                let since = *self.tracking_error_since.get_or_insert(now);
                if dwell_elapsed(Some(since), now, config.safety.tracking_error_time) {
                    self.raise_fault(Fault::PositionError, now);
                }
            }
            _ => self.tracking_error_since = None,
        }

        if self.faults.has_critical() && self.state != OperatingState::Fault {
            self.stop_motor();
            self.homing.cancel();
            self.enter_state(OperatingState::Fault, now);
        }
    }

    fn run_position_loop(&mut self) {
        if self.etb.failsafe_active() {
            self.stop_motor();
            return;
        }

        let (setpoint, observation) = (self.setpoint(), self.observation());
        if let Some(output) = self.position_loop.update(setpoint, observation) {
            self.set_output(output);
        }
    }

    /// Commutates a demand onto the gates, honouring the drive interlock.
    fn drive(&mut self, config: &ServoConfig, demand: f32, now: I) {
        let permitted =
            self.state.allows_drive() && self.driver_enabled && !self.etb.failsafe_active();
        let duties = if permitted {
            match commutate(demand, self.hall.state(), config.direction_reversed) {
                Ok(duties) => duties,
                Err(fault) => {
                    self.raise_fault(fault, now);
                    PhaseDuties::ZERO
                }
            }
        } else {
            PhaseDuties::ZERO
        };

        self.write_outputs(duties, config.dead_time);
    }

    fn stop_motor(&mut self) {
        self.write_outputs(PhaseDuties::ZERO, 0.0);
    }

    fn write_outputs(&mut self, duties: PhaseDuties, dead_time: f32) {
        self.outputs = match self.pins {
            Some(pins) => apply_to_hardware(&mut self.lines, &pins, duties, dead_time),
            None => PhaseDuties::ZERO,
        };
    }

    fn set_driver_enabled(&mut self, enabled: bool) {
        if let Some(pins) = self.pins {
            self.lines.set_line(pins.driver_enable, enabled);
        }
        self.driver_enabled = enabled && self.pins.is_some();
    }

    /// Turns the bridge back on after failsafe, unless a fault still holds it off.
    fn restore_driver(&mut self) {
        let held_off = self.etb.failsafe_active()
            || self.faults.has_critical()
            || matches!(self.state, OperatingState::Disabled | OperatingState::Fault);
        if !held_off && !self.driver_enabled && self.pins.is_some() {
            self.set_driver_enabled(true);
        }
    }

    fn finish_tick(&mut self) {
        self.publish_telemetry();
        self.tick_count = self.tick_count.wrapping_add(1);
    }

    fn publish_telemetry(&mut self) {
        let position = self.hall.position();
        let etb_mode = self.etb.mode_enabled();
        let throttle_error = if etb_mode {
            self.targets.throttle - position.unwrap_or(0.0)
        } else {
            0.0
        };

        self.snapshot = TelemetrySnapshot {
            state: self.state,
            homing: self.homing.state(),
            position: position.unwrap_or(0.0),
            position_valid: position.is_some(),
            target: self.targets.servo,
            throttle_target: self.targets.throttle,
            motor_current: self.motor_current,
            peak_current: self.peak_current,
            hall_state: self.hall.state().raw(),
            hall_transitions: self.hall.transitions(),
            encoder: self.hall.encoder(),
            fault_bits: self.faults.bits(),
            pid_output: self.position_loop.output(),
            driver_enabled: self.driver_enabled,
            etb_mode,
            failsafe_active: self.etb.failsafe_active(),
            failsafe_count: self.etb.failsafe_count(),
            throttle_error,
            tick_count: self.tick_count,
        };

        if self.snapshot.servo_has_authority() {
            self.peers
                .report_throttle(self.snapshot.position, self.targets.throttle);
        }
    }
}

impl<I, L, P> ClosedLoopController for ServoController<I, L, P>
where
    I: ControlInstant,
    L: LineIo,
    P: EnginePeers,
{
    fn observation(&self) -> Option<f32> {
        self.hall.position()
    }

    fn setpoint(&self) -> Option<f32> {
        self.active_setpoint()
    }

    fn set_output(&mut self, output: f32) {
        let (Some(config), Some(now)) = (self.active_config(), self.last_tick) else {
            return;
        };
        self.drive(&config, output, now);
    }
}

impl<I, L, P> PeriodicTask<I> for ServoController<I, L, P>
where
    I: ControlInstant,
    L: LineIo,
    P: EnginePeers,
{
    /// Configured cadence, or [`DEFAULT_TICK_PERIOD`] while no valid configuration is held.
    fn period(&self) -> Duration {
        self.config
            .filter(|_| self.config_error.is_none())
            .map_or(DEFAULT_TICK_PERIOD, |config| config.tick_period)
    }

    fn run(&mut self, now: I) {
        self.on_tick(now);
    }
}
