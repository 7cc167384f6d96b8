mod support;

use core::time::Duration;

use servo_core::config::ConfigError;
use servo_core::controller::{DEFAULT_TICK_PERIOD, OperatingState};
use servo_core::faults::Fault;
use servo_core::hal::PinDirection;
use servo_core::homing::HomingState;
use servo_core::task::{ClosedLoopController, PeriodicTask, TaskScheduler};
use servo_core::telemetry::{TelemetryEventKind, TelemetryPayload};

use support::{
    Controller, DRIVER_ENABLE_PIN, MockInstant, HALL_PINS, HIGH_SIDE_PINS, LOW_SIDE_PINS, Rig, close, wired_config,
};

#[test]
fn missing_configuration_stays_disabled() {
    let mut rig = Rig::new(wired_config());
    rig.controller.on_configuration_change(None);
    rig.ticks(3);

    assert_eq!(rig.controller.state(), OperatingState::Disabled);
    assert!(rig.controller.faults().is_empty());
    assert_eq!(rig.controller.tick_count(), 3);
}

#[test]
fn invalid_configuration_holds_disabled_without_a_fault() {
    let mut rig = Rig::new(wired_config());
    rig.start();

    let mut config = wired_config();
    config.pins.low_side[1] = None;
    rig.controller.on_configuration_change(Some(config));
    rig.tick();

    let controller = &rig.controller;
    assert_eq!(controller.state(), OperatingState::Disabled);
    assert!(controller.faults().is_empty());
    assert!(matches!(
        controller.config_error(),
        Some(ConfigError::MissingPin(_))
    ));
    assert!(controller.events().oldest_first().any(|record| {
        record.event == TelemetryEventKind::ConfigurationRejected
    }));
}

#[test]
fn initialization_sets_up_lines_and_enables_the_driver() {
    let mut rig = Rig::new(wired_config());
    rig.tick();

    let controller = &rig.controller;
    assert_eq!(controller.state(), OperatingState::Idle);
    assert!(controller.driver_enabled());

    let lines = controller.lines();
    for pin in HALL_PINS {
        assert_eq!(lines.direction(pin), Some(PinDirection::Input));
    }
    for pin in HIGH_SIDE_PINS.into_iter().chain(LOW_SIDE_PINS) {
        assert_eq!(lines.direction(pin), Some(PinDirection::Output));
    }
    assert!(lines.level(DRIVER_ENABLE_PIN));
    assert!(lines.gates_released());

    let states: Vec<_> = controller
        .events()
        .oldest_first()
        .filter_map(|record| match record.event {
            TelemetryEventKind::StateEntered(state) => Some(state),
            _ => None,
        })
        .collect();
    assert_eq!(
        states,
        [OperatingState::Initializing, OperatingState::Idle]
    );
}

#[test]
fn tracking_enters_and_release_leaves_position_control() {
    let mut rig = Rig::new(wired_config());
    rig.start();

    rig.controller.set_target(10.0).unwrap();
    rig.tick();
    assert_eq!(rig.controller.state(), OperatingState::PositionControl);
    assert!(!rig.controller.phase_outputs().is_zero());

    rig.controller.release();
    rig.tick();
    assert_eq!(rig.controller.state(), OperatingState::Idle);
    assert!(rig.controller.phase_outputs().is_zero());
    assert!(rig.controller.lines().gates_released());
}

#[test]
fn idle_never_drives_the_motor() {
    let mut rig = Rig::new(wired_config());
    rig.start();

    assert_eq!(rig.controller.state(), OperatingState::Idle);
    rig.controller.set_output(1.0);
    assert!(rig.controller.phase_outputs().is_zero());
    assert!(rig.controller.lines().gates_released());
}

#[test]
fn overcurrent_faults_until_cleared() {
    let mut rig = Rig::new(wired_config());
    rig.start();
    rig.controller.set_target(30.0).unwrap();
    rig.tick();

    rig.set_current(21.0);
    rig.tick();
    assert_eq!(rig.controller.state(), OperatingState::Fault);
    assert!(rig.controller.faults().contains(Fault::Overcurrent));
    assert!(rig.controller.lines().gates_released());
    assert!(close(rig.controller.peak_current(), 21.0));

    rig.set_current(0.5);
    rig.ticks(10);
    assert_eq!(rig.controller.state(), OperatingState::Fault, "faults latch");

    let now = rig.now;
    rig.controller.clear_faults(now);
    assert!(close(rig.controller.peak_current(), 0.5));
    rig.tick();
    // Still tracking, so the next tick re-enters position control.
    assert_eq!(rig.controller.state(), OperatingState::Idle);
    rig.tick();
    assert_eq!(rig.controller.state(), OperatingState::PositionControl);
}

#[test]
fn sustained_tracking_error_raises_position_error() {
    let mut rig = Rig::new(wired_config());
    rig.start();
    rig.controller.set_target(80.0).unwrap();

    rig.ticks(500);
    assert!(!rig.controller.faults().contains(Fault::PositionError));
    rig.tick();
    assert!(rig.controller.faults().contains(Fault::PositionError));
    assert_eq!(rig.controller.state(), OperatingState::Fault);
}

#[test]
fn disabling_resets_everything_but_faults() {
    let mut rig = Rig::new(wired_config());
    rig.start();
    rig.controller.set_target(30.0).unwrap();
    rig.tick();
    let now = rig.now;
    rig.controller.raise_fault(Fault::CommunicationError, now);

    let mut config = wired_config();
    config.enabled = false;
    rig.controller.on_configuration_change(Some(config));
    rig.tick();

    let controller = &rig.controller;
    assert_eq!(controller.state(), OperatingState::Disabled);
    assert_eq!(controller.position(), None);
    assert!(!controller.is_tracking());
    assert!(!controller.driver_enabled());
    assert!(!controller.lines().level(DRIVER_ENABLE_PIN));
    assert!(controller.lines().gates_released());
    assert!(controller.faults().contains(Fault::CommunicationError));
}

#[test]
fn homing_measures_the_stops_and_seeds_travel_limits() {
    let mut config = wired_config();
    config.homing_enabled = true;
    let mut rig = Rig::new(config);

    rig.tick();
    assert_eq!(rig.controller.state(), OperatingState::Homing);
    rig.tick();
    assert!(!rig.controller.phase_outputs().is_zero());

    // Closed stop.
    rig.set_current(8.0);
    rig.tick();
    assert_eq!(rig.controller.homing_state(), HomingState::SeekOpen);
    assert_eq!(rig.controller.hall().encoder(), 0);

    rig.set_current(1.0);
    for _ in 0..30 {
        rig.step(true);
    }

    // Open stop.
    rig.set_current(8.0);
    rig.tick();
    assert_eq!(rig.controller.homing_state(), HomingState::BackOff);

    rig.set_current(1.0);
    rig.step(false);
    assert_eq!(rig.controller.state(), OperatingState::Homing);
    rig.step(false);

    let controller = &rig.controller;
    assert_eq!(controller.state(), OperatingState::Idle);
    assert_eq!(controller.homing_state(), HomingState::Complete);
    let limits = controller.travel_limits();
    assert!(close(limits.lower, 2.0 * 100.0 / 60.0));
    assert!(close(limits.upper, 28.0 * 100.0 / 60.0));

    let homed = controller
        .events()
        .oldest_first()
        .find(|record| record.event == TelemetryEventKind::HomingComplete)
        .expect("homing completion is recorded");
    assert_eq!(homed.details, TelemetryPayload::Travel(limits));
}

#[test]
fn homing_timeout_raises_position_error() {
    let mut config = wired_config();
    config.homing_enabled = true;
    config.homing.phase_timeout = Duration::from_millis(50);
    let mut rig = Rig::new(config);

    rig.ticks(60);
    assert_eq!(rig.controller.state(), OperatingState::Fault);
    assert!(rig.controller.faults().contains(Fault::PositionError));
    assert_eq!(rig.controller.homing_state(), HomingState::Inactive);
    assert!(rig.controller.phase_outputs().is_zero());
}

#[test]
fn targets_are_clamped_to_travel_limits() {
    let mut config = wired_config();
    config.min_position = 0.0;
    config.max_position = 100.0;
    let mut rig = Rig::new(config);
    rig.start();

    rig.controller.set_target(150.0).unwrap();
    assert!(close(rig.controller.targets().servo, 100.0));
    assert!(rig.controller.set_target(f32::NAN).is_err());
}

#[test]
fn rejected_tick_period_falls_back_to_the_default_cadence() {
    let mut rig = Rig::new(wired_config());
    assert_eq!(rig.controller.period(), DEFAULT_TICK_PERIOD);

    let mut config = wired_config();
    config.tick_period = Duration::ZERO;
    rig.controller.on_configuration_change(Some(config));
    assert_eq!(
        rig.controller.config_error(),
        Some(ConfigError::ZeroTickPeriod)
    );
    assert_eq!(rig.controller.period(), DEFAULT_TICK_PERIOD);

    let mut scheduler: TaskScheduler<MockInstant, &mut Controller, 1> = TaskScheduler::new();
    scheduler.register(&mut rig.controller).unwrap();
    assert_eq!(scheduler.poll(MockInstant::millis(5)), 1);
    assert_eq!(scheduler.next_deadline(), Some(MockInstant::millis(6)));
    assert_eq!(scheduler.poll(MockInstant::millis(5)), 0);
}

#[test]
fn accepted_tick_period_sets_the_cadence() {
    let mut config = wired_config();
    config.tick_period = Duration::from_millis(4);
    let rig = Rig::new(config);
    assert_eq!(rig.controller.period(), Duration::from_millis(4));
}

#[test]
fn closed_loop_surface_follows_the_tracked_target() {
    let mut rig = Rig::new(wired_config());
    rig.start();

    assert_eq!(rig.controller.observation(), rig.controller.position());
    assert!(rig.controller.observation().is_some());
    assert_eq!(rig.controller.setpoint(), None);

    rig.controller.set_target(30.0).unwrap();
    assert!(close(rig.controller.setpoint().unwrap(), 30.0));

    rig.tick();
    assert_eq!(rig.controller.state(), OperatingState::PositionControl);
    assert!(rig.controller.pid_output() > 0.0);
    assert!(!rig.controller.phase_outputs().is_zero());

    rig.controller.set_output(-1.0);
    let reversed = rig.controller.phase_outputs();
    rig.controller.set_output(1.0);
    assert_ne!(rig.controller.phase_outputs(), reversed);

    rig.controller.release();
    assert_eq!(rig.controller.setpoint(), None);
}
