#![allow(dead_code)]

use core::ops::Add;
use core::time::Duration;

use servo_core::config::{PinAssignments, ServoConfig};
use servo_core::controller::ServoController;
use servo_core::hal::{AnalogChannel, LineIo, PinDirection, PinId};
use servo_core::peers::{EnginePeers, IdleRequest, TractionRequest};
use servo_core::timing::ControlInstant;

pub const HALL_PINS: [u8; 3] = [0, 1, 2];
pub const HIGH_SIDE_PINS: [u8; 3] = [3, 4, 5];
pub const LOW_SIDE_PINS: [u8; 3] = [6, 7, 8];
pub const DRIVER_ENABLE_PIN: u8 = 9;
pub const CURRENT_CHANNEL: AnalogChannel = AnalogChannel(0);
pub const PEDAL_CHANNEL: AnalogChannel = AnalogChannel(1);

/// Hall codes in forward rotation order.
pub const FORWARD: [u8; 6] = [1, 3, 2, 6, 4, 5];

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct MockInstant(u64);

impl MockInstant {
    pub fn millis(value: u64) -> Self {
        Self(value * 1_000)
    }

    pub fn as_millis(self) -> u64 {
        self.0 / 1_000
    }
}

impl Add<Duration> for MockInstant {
    type Output = Self;

    fn add(self, rhs: Duration) -> Self::Output {
        Self(self.0 + rhs.as_micros() as u64)
    }
}

impl ControlInstant for MockInstant {
    fn saturating_duration_since(&self, earlier: Self) -> Duration {
        Duration::from_micros(self.0.saturating_sub(earlier.0))
    }
}

#[derive(Debug, Default)]
pub struct MockLines {
    levels: [bool; 16],
    directions: [Option<PinDirection>; 16],
    analog: [f32; 4],
    driver_writes: Vec<bool>,
}

impl MockLines {
    pub fn set_hall(&mut self, code: u8) {
        for (bit, pin) in HALL_PINS.iter().enumerate() {
            self.levels[usize::from(*pin)] = code & (0b100 >> bit) != 0;
        }
    }

    pub fn set_analog(&mut self, channel: AnalogChannel, volts: f32) {
        self.analog[usize::from(channel.0)] = volts;
    }

    pub fn level(&self, pin: u8) -> bool {
        self.levels[usize::from(pin)]
    }

    pub fn direction(&self, pin: u8) -> Option<PinDirection> {
        self.directions[usize::from(pin)]
    }

    /// Every level written to the driver-enable line, oldest first.
    pub fn driver_writes(&self) -> &[bool] {
        &self.driver_writes
    }

    pub fn forget_driver_writes(&mut self) {
        self.driver_writes.clear();
    }

    pub fn gates_released(&self) -> bool {
        HIGH_SIDE_PINS
            .iter()
            .chain(LOW_SIDE_PINS.iter())
            .all(|pin| !self.level(*pin))
    }
}

impl LineIo for MockLines {
    fn configure(&mut self, pin: PinId, direction: PinDirection) {
        self.directions[usize::from(pin.0)] = Some(direction);
    }

    fn read_line(&mut self, pin: PinId) -> bool {
        self.levels[usize::from(pin.0)]
    }

    fn set_line(&mut self, pin: PinId, high: bool) {
        if pin.0 == DRIVER_ENABLE_PIN {
            self.driver_writes.push(high);
        }
        self.levels[usize::from(pin.0)] = high;
    }

    fn read_analog(&mut self, channel: AnalogChannel) -> f32 {
        self.analog[usize::from(channel.0)]
    }
}

#[derive(Debug, Default)]
pub struct MockPeers {
    pub etb_position: f32,
    pub etb_error: Option<u16>,
    pub etb_target: Option<f32>,
    pub idle: IdleRequest,
    pub traction: TractionRequest,
    pub speed_limiter: bool,
    pub throttle_feedback: f32,
    pub reported: Option<(f32, f32)>,
}

impl EnginePeers for MockPeers {
    fn etb_position(&self) -> f32 {
        self.etb_position
    }

    fn etb_error_code(&self) -> Option<u16> {
        self.etb_error
    }

    fn set_etb_target(&mut self, target: f32) {
        self.etb_target = Some(target);
    }

    fn idle_request(&self) -> IdleRequest {
        self.idle
    }

    fn traction_request(&self) -> TractionRequest {
        self.traction
    }

    fn speed_limiter_engaged(&self) -> bool {
        self.speed_limiter
    }

    fn throttle_feedback(&self) -> f32 {
        self.throttle_feedback
    }

    fn report_throttle(&mut self, position: f32, target: f32) {
        self.reported = Some((position, target));
    }
}

pub type Controller = ServoController<MockInstant, MockLines, MockPeers>;

/// Enabled configuration with every pin, current sense, and the pedal wired.
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

/// Controller plus a millisecond clock and a hand-driven hall sequence.
pub struct Rig {
    pub controller: Controller,
    pub now: MockInstant,
    sector: usize,
}

impl Rig {
    pub fn new(config: ServoConfig) -> Self {
        let mut controller = Controller::new(MockLines::default(), MockPeers::default());
        controller.on_configuration_change(Some(config));
        controller.lines_mut().set_hall(FORWARD[0]);
        Self {
            controller,
            now: MockInstant::millis(0),
            sector: 0,
        }
    }

    pub fn tick(&mut self) {
        self.now = self.now + Duration::from_millis(1);
        self.controller.on_tick(self.now);
    }

    pub fn ticks(&mut self, count: u32) {
        for _ in 0..count {
            self.tick();
        }
    }

    /// Moves the simulated rotor one sector and ticks once.
    pub fn step(&mut self, forward: bool) {
        self.sector = if forward {
            (self.sector + 1) % FORWARD.len()
        } else {
            (self.sector + FORWARD.len() - 1) % FORWARD.len()
        };
        let code = FORWARD[self.sector];
        self.controller.lines_mut().set_hall(code);
        self.tick();
    }

    /// Sets the sensed motor current in amps for the default 10 A/V scaling.
    pub fn set_current(&mut self, amps: f32) {
        self.controller
            .lines_mut()
            .set_analog(CURRENT_CHANNEL, amps / 10.0);
    }

    pub fn set_pedal(&mut self, volts: f32) {
        self.controller.lines_mut().set_analog(PEDAL_CHANNEL, volts);
    }

    /// Enables the controller and establishes a valid position one step forward of zero.
    pub fn start(&mut self) {
        self.tick();
        self.step(true);
        assert!(self.controller.position().is_some());
    }

    /// Starts the controller and engages ETB mode with the ETB reporting `etb_position`.
    pub fn engage_etb(&mut self, etb_position: f32) {
        self.start();
        self.controller.peers_mut().etb_position = etb_position;
        let now = self.now;
        self.controller
            .try_set_etb_mode(true, now)
            .expect("ETB mode should engage");
    }
}

pub fn close(a: f32, b: f32) -> bool {
    (a - b).abs() < 1e-3
}
