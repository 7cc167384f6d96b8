//! Simulated throttle body, pedal, and engine peers.
//!
//! The plant is shared between the line driver handed to the controller, the
//! peer adapter, and the periodic task that advances it, so it lives behind an
//! `Rc<RefCell<_>>`.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use servo_core::commutation::commutate;
use servo_core::config::{CurrentSense, PinAssignments, ServoConfig};
use servo_core::hal::{AnalogChannel, LineIo, PinDirection, PinId};
use servo_core::hall::{HallState, STEPS_PER_REVOLUTION};
use servo_core::peers::{EnginePeers, IdleRequest, TractionRequest};
use servo_core::task::PeriodicTask;

pub const HALL_PINS: [u8; 3] = [0, 1, 2];
pub const HIGH_SIDE_PINS: [u8; 3] = [3, 4, 5];
pub const LOW_SIDE_PINS: [u8; 3] = [6, 7, 8];
pub const DRIVER_ENABLE_PIN: u8 = 9;
pub const CURRENT_CHANNEL: AnalogChannel = AnalogChannel(0);
pub const PEDAL_CHANNEL: AnalogChannel = AnalogChannel(1);

const LINE_COUNT: usize = 16;

/// Hall codes in forward rotation order.
const FORWARD: [u8; 6] = [1, 3, 2, 6, 4, 5];

/// Full-scale travel, in hall steps.
#[allow(clippy::cast_precision_loss)]
const TRAVEL_STEPS: f32 = STEPS_PER_REVOLUTION as f32;
/// The open stop sits half a step short of full scale.
const OPEN_STOP_STEPS: f32 = TRAVEL_STEPS - 0.5;
/// Rotor speed under full drive, in hall steps per millisecond.
const SLEW_STEPS_PER_MS: f32 = 0.1;
/// Rotor location at power-up, somewhere between the stops.
const START_STEPS: f32 = 20.0;
/// Conventional ETB slew, in percent per millisecond.
const ETB_SLEW_PER_MS: f32 = 0.5;

const IDLE_CURRENT: f32 = 0.1;
const MOVING_CURRENT: f32 = 2.0;
const STALL_CURRENT: f32 = 8.0;
const INJECTED_OVERCURRENT: f32 = 25.0;

/// Configuration matching the simulated wiring.
pub fn wired_config() -> ServoConfig {
    let mut config = ServoConfig {
        enabled: true,
        pins: PinAssignments {
            hall: HALL_PINS.map(|pin| Some(PinId(pin))),
            high_side: HIGH_SIDE_PINS.map(|pin| Some(PinId(pin))),
            low_side: LOW_SIDE_PINS.map(|pin| Some(PinId(pin))),
            driver_enable: Some(PinId(DRIVER_ENABLE_PIN)),
        },
        ..ServoConfig::default()
    };
    config.current_sense.channel = Some(CURRENT_CHANNEL);
    config.pedal.channel = Some(PEDAL_CHANNEL);
    config
}

/// Faults the operator can force onto the plant.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Injections {
    pub overcurrent: bool,
    /// Raw hall code forced onto the sensor lines.
    pub hall: Option<u8>,
    pub etb_error: Option<u16>,
}

#[derive(Debug)]
pub struct Plant {
    rotor_steps: f32,
    levels: [bool; LINE_COUNT],
    pedal_volts: f32,
    etb_position: f32,
    etb_target: f32,
    reported: Option<(f32, f32)>,
    current: f32,
    sense: CurrentSense,
    injections: Injections,
}

impl Plant {
    pub fn new(sense: CurrentSense) -> Self {
        Self {
            rotor_steps: START_STEPS,
            levels: [false; LINE_COUNT],
            pedal_volts: 0.5,
            etb_position: 0.0,
            etb_target: 0.0,
            reported: None,
            current: IDLE_CURRENT,
            sense,
            injections: Injections::default(),
        }
    }

    pub fn shared(sense: CurrentSense) -> Rc<RefCell<Self>> {
        Rc::new(RefCell::new(Self::new(sense)))
    }

    pub fn set_pedal(&mut self, volts: f32) {
        self.pedal_volts = volts;
    }

    pub fn pedal(&self) -> f32 {
        self.pedal_volts
    }

    pub fn injections_mut(&mut self) -> &mut Injections {
        &mut self.injections
    }

    pub fn injections(&self) -> Injections {
        self.injections
    }

    pub fn rotor_percent(&self) -> f32 {
        self.rotor_steps * 100.0 / TRAVEL_STEPS
    }

    pub fn etb_position(&self) -> f32 {
        self.etb_position
    }

    pub fn current(&self) -> f32 {
        self.current
    }

    pub fn reported(&self) -> Option<(f32, f32)> {
        self.reported
    }

    fn hall_code(&self) -> u8 {
        if let Some(code) = self.injections.hall {
            return code;
        }
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let sector = (self.rotor_steps.floor() as usize) % FORWARD.len();
        FORWARD[sector]
    }

    /// Direction the energised phases push the rotor: `1`, `-1`, or `0`.
    fn drive_direction(&self) -> i8 {
        if !self.levels[usize::from(DRIVER_ENABLE_PIN)] {
            return 0;
        }

        let mut applied = [0_i8; 3];
        for (phase, slot) in applied.iter_mut().enumerate() {
            let high = self.levels[usize::from(HIGH_SIDE_PINS[phase])];
            let low = self.levels[usize::from(LOW_SIDE_PINS[phase])];
            *slot = match (high, low) {
                (true, false) => 1,
                (false, true) => -1,
                _ => 0,
            };
        }
        if applied == [0; 3] {
            return 0;
        }

        let Ok(forward) = commutate(1.0, HallState::from_raw(self.hall_code()), false) else {
            return 0;
        };
        #[allow(clippy::cast_possible_truncation)]
        let forward = forward.as_array().map(|duty| duty as i8);
        let reverse = forward.map(|sign| -sign);

        if applied == forward {
            1
        } else if applied == reverse {
            -1
        } else {
            0
        }
    }

    /// Advances the rotor and the conventional ETB by `elapsed`.
    pub fn advance(&mut self, elapsed: Duration) {
        let millis = elapsed.as_secs_f32() * 1_000.0;
        let direction = self.drive_direction();

        self.current = if direction == 0 {
            IDLE_CURRENT
        } else {
            let next = self.rotor_steps + f32::from(direction) * SLEW_STEPS_PER_MS * millis;
            let clamped = next.clamp(0.0, OPEN_STOP_STEPS);
            let stalled = (clamped - self.rotor_steps).abs() < f32::EPSILON;
            self.rotor_steps = clamped;
            if stalled { STALL_CURRENT } else { MOVING_CURRENT }
        };
        if self.injections.overcurrent {
            self.current = INJECTED_OVERCURRENT;
        }

        let slew = ETB_SLEW_PER_MS * millis;
        let delta = (self.etb_target - self.etb_position).clamp(-slew, slew);
        self.etb_position += delta;
    }
}

/// Line driver over the simulated plant.
#[derive(Clone, Debug)]
pub struct SimLines {
    plant: Rc<RefCell<Plant>>,
}

impl SimLines {
    pub fn new(plant: Rc<RefCell<Plant>>) -> Self {
        Self { plant }
    }
}

impl LineIo for SimLines {
    fn configure(&mut self, pin: PinId, direction: PinDirection) {
        log::trace!("configure {pin} as {direction:?}");
    }

    fn read_line(&mut self, pin: PinId) -> bool {
        let plant = self.plant.borrow();
        match HALL_PINS.iter().position(|hall| *hall == pin.0) {
            Some(bit) => plant.hall_code() & (0b100 >> bit) != 0,
            None => plant.levels.get(usize::from(pin.0)).copied().unwrap_or(false),
        }
    }

    fn set_line(&mut self, pin: PinId, high: bool) {
        if let Some(level) = self.plant.borrow_mut().levels.get_mut(usize::from(pin.0)) {
            *level = high;
        }
    }

    fn read_analog(&mut self, channel: AnalogChannel) -> f32 {
        let plant = self.plant.borrow();
        if channel == CURRENT_CHANNEL {
            plant.current / plant.sense.amps_per_volt + plant.sense.offset_volts
        } else if channel == PEDAL_CHANNEL {
            plant.pedal_volts
        } else {
            0.0
        }
    }
}

/// Engine peers backed by the simulated conventional ETB.
#[derive(Clone, Debug)]
pub struct SimPeers {
    plant: Rc<RefCell<Plant>>,
}

impl SimPeers {
    pub fn new(plant: Rc<RefCell<Plant>>) -> Self {
        Self { plant }
    }
}

impl EnginePeers for SimPeers {
    fn etb_position(&self) -> f32 {
        self.plant.borrow().etb_position
    }

    fn etb_error_code(&self) -> Option<u16> {
        self.plant.borrow().injections.etb_error
    }

    fn set_etb_target(&mut self, target: f32) {
        self.plant.borrow_mut().etb_target = target;
    }

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
        self.plant.borrow().rotor_percent()
    }

    fn report_throttle(&mut self, position: f32, target: f32) {
        self.plant.borrow_mut().reported = Some((position, target));
    }
}

/// Periodic task that integrates the plant between controller ticks.
pub struct PlantTask {
    plant: Rc<RefCell<Plant>>,
    period: Duration,
    last: Option<Duration>,
}

impl PlantTask {
    pub fn new(plant: Rc<RefCell<Plant>>, period: Duration) -> Self {
        Self {
            plant,
            period,
            last: None,
        }
    }
}

impl PeriodicTask<Duration> for PlantTask {
    fn period(&self) -> Duration {
        self.period
    }

    fn run(&mut self, now: Duration) {
        let elapsed = self.last.map_or(self.period, |last| now.saturating_sub(last));
        self.last = Some(now);
        self.plant.borrow_mut().advance(elapsed);
    }
}
