//! Tuning configuration consumed by the servo controller.
//!
//! The configuration is a plain `Copy` value owned by the controller and
//! replaced wholesale through
//! [`ServoController::on_configuration_change`](crate::controller::ServoController::on_configuration_change).
//! Validation never raises a fault: an invalid configuration simply keeps the
//! controller disabled.

use core::fmt;
use core::time::Duration;

use crate::hal::{AnalogChannel, PinId};

/// Number of breakpoints in the optional pedal transfer table.
pub const PEDAL_TABLE_SIZE: usize = 8;

/// PID gains expressed per second, evaluated at a fixed period.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct PidGains {
    pub kp: f32,
    pub ki: f32,
    pub kd: f32,
    pub period: Duration,
}

impl PidGains {
    #[must_use]
    pub const fn new(kp: f32, ki: f32, kd: f32, period: Duration) -> Self {
        Self { kp, ki, kd, period }
    }
}

impl Default for PidGains {
    fn default() -> Self {
        Self::new(0.05, 0.5, 0.0005, Duration::from_millis(1))
    }
}

/// Role a pin plays, used when reporting a missing assignment.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PinRole {
    Hall(u8),
    HighSide(u8),
    LowSide(u8),
    DriverEnable,
}

impl fmt::Display for PinRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PinRole::Hall(index) => write!(f, "hall {}", phase_name(*index)),
            PinRole::HighSide(index) => write!(f, "high-side {}", phase_name(*index)),
            PinRole::LowSide(index) => write!(f, "low-side {}", phase_name(*index)),
            PinRole::DriverEnable => f.write_str("driver enable"),
        }
    }
}

fn phase_name(index: u8) -> char {
    match index {
        0 => 'A',
        1 => 'B',
        _ => 'C',
    }
}

/// Pin assignments as configured. Unassigned entries are `None`.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct PinAssignments {
    /// Hall sensor inputs for phases A, B, C. Phase A is the most significant bit.
    pub hall: [Option<PinId>; 3],
    pub high_side: [Option<PinId>; 3],
    pub low_side: [Option<PinId>; 3],
    pub driver_enable: Option<PinId>,
}

impl PinAssignments {
    /// Resolves every assignment, reporting the first missing role.
    pub fn resolve(&self) -> Result<ResolvedPins, ConfigError> {
        Ok(ResolvedPins {
            hall: resolve_group(&self.hall, PinRole::Hall)?,
            high_side: resolve_group(&self.high_side, PinRole::HighSide)?,
            low_side: resolve_group(&self.low_side, PinRole::LowSide)?,
            driver_enable: self
                .driver_enable
                .ok_or(ConfigError::MissingPin(PinRole::DriverEnable))?,
        })
    }
}

fn resolve_group(
    pins: &[Option<PinId>; 3],
    role: fn(u8) -> PinRole,
) -> Result<[PinId; 3], ConfigError> {
    let mut resolved = [PinId(0); 3];
    for (index, (slot, pin)) in resolved.iter_mut().zip(pins).enumerate() {
        #[allow(clippy::cast_possible_truncation)]
        let missing = ConfigError::MissingPin(role(index as u8));
        *slot = pin.ok_or(missing)?;
    }
    Ok(resolved)
}

/// Pin assignments after validation, as set up during initialization.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ResolvedPins {
    pub hall: [PinId; 3],
    pub high_side: [PinId; 3],
    pub low_side: [PinId; 3],
    pub driver_enable: PinId,
}

/// Conversion from the current-sense amplifier voltage to motor amps.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct CurrentSense {
    pub channel: Option<AnalogChannel>,
    pub amps_per_volt: f32,
    /// Amplifier output at zero current, in volts.
    pub offset_volts: f32,
}

impl CurrentSense {
    /// Converts a sampled voltage into an absolute current.
    #[must_use]
    pub fn amps(&self, volts: f32) -> f32 {
        libm::fabsf((volts - self.offset_volts) * self.amps_per_volt)
    }
}

impl Default for CurrentSense {
    fn default() -> Self {
        Self {
            channel: None,
            amps_per_volt: 10.0,
            offset_volts: 0.0,
        }
    }
}

/// Limits enforced by the per-tick safety checks.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct SafetyConfig {
    /// Motor current above which Overcurrent is raised, in amps.
    pub overcurrent_limit: f32,
    /// Tracking error, in percent, tolerated while in position control.
    pub tracking_error_limit: f32,
    /// How long the tracking error may persist before PositionError is raised.
    pub tracking_error_time: Duration,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            overcurrent_limit: 20.0,
            tracking_error_limit: 15.0,
            tracking_error_time: Duration::from_millis(500),
        }
    }
}

/// Parameters of the end-stop homing procedure.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct HomingConfig {
    /// Drive demand used while seeking the stops.
    pub duty: f32,
    /// Motor current that marks a stalled rotor, in amps.
    pub stall_current: f32,
    /// Encoder steps to back away from each stop.
    pub back_off_steps: u16,
    /// Longest time any single homing phase may take.
    pub phase_timeout: Duration,
}

impl Default for HomingConfig {
    fn default() -> Self {
        Self {
            duty: 0.25,
            stall_current: 6.0,
            back_off_steps: 2,
            phase_timeout: Duration::from_secs(3),
        }
    }
}

/// Parameters of the ETB arbitration protocol.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct EtbConfig {
    /// Maximum throttle target slew, in percent per second.
    pub transition_rate: f32,
    /// Requested changes smaller than this are ignored, in percent.
    pub deadband: f32,
    /// Largest ETB/BLDC disagreement accepted at engagement, in percent.
    pub sync_tolerance: f32,
    /// Tracking error the health check tolerates before its dwell timer starts.
    pub health_tolerance: f32,
}

impl Default for EtbConfig {
    fn default() -> Self {
        Self {
            transition_rate: 200.0,
            deadband: 0.1,
            sync_tolerance: 5.0,
            health_tolerance: 10.0,
        }
    }
}

/// Voltage to pedal-position breakpoints. Voltages must be ascending.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct PedalTable {
    pub voltages: [f32; PEDAL_TABLE_SIZE],
    pub positions: [f32; PEDAL_TABLE_SIZE],
}

/// Pedal sensor calibration.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct PedalConfig {
    pub channel: Option<AnalogChannel>,
    pub idle_voltage: f32,
    pub wot_voltage: f32,
    /// When present, replaces the linear idle/WOT map.
    pub table: Option<PedalTable>,
}

impl Default for PedalConfig {
    fn default() -> Self {
        Self {
            channel: None,
            idle_voltage: 0.5,
            wot_voltage: 4.5,
            table: None,
        }
    }
}

/// Launch-control clamp applied before the vehicle moves off.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct LaunchConfig {
    pub enabled: bool,
    /// Throttle-position feedback below which the clamp is active, in percent.
    pub tps_threshold: f32,
    /// Highest throttle target permitted while the clamp is active, in percent.
    pub throttle_limit: f32,
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            tps_threshold: 3.0,
            throttle_limit: 30.0,
        }
    }
}

/// Complete servo configuration.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ServoConfig {
    pub enabled: bool,
    pub homing_enabled: bool,
    /// Engage ETB mode automatically whenever the preconditions hold.
    pub etb_mode_enabled: bool,
    pub direction_reversed: bool,
    /// Period at which `on_tick` is invoked.
    pub tick_period: Duration,
    pub pid: PidGains,
    pub min_position: f32,
    pub max_position: f32,
    /// Fraction of full duty below which neither gate is driven.
    pub dead_time: f32,
    pub current_sense: CurrentSense,
    pub safety: SafetyConfig,
    pub homing: HomingConfig,
    pub etb: EtbConfig,
    pub pedal: PedalConfig,
    pub launch: LaunchConfig,
    pub pins: PinAssignments,
}

impl ServoConfig {
    /// Checks the configuration for values the controller cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.pins.resolve()?;

        if self.tick_period.is_zero() {
            return Err(ConfigError::ZeroTickPeriod);
        }
        if self.pid.period.is_zero() {
            return Err(ConfigError::ZeroPidPeriod);
        }
        if !is_positive(self.max_position - self.min_position) {
            return Err(ConfigError::InvertedPositionRange);
        }
        if !(0.0..1.0).contains(&self.dead_time) {
            return Err(ConfigError::DeadTimeOutOfRange);
        }
        if !is_positive(self.safety.overcurrent_limit) {
            return Err(ConfigError::InvalidCurrentLimit);
        }
        if !is_positive(self.etb.transition_rate) {
            return Err(ConfigError::InvalidTransitionRate);
        }
        if self.homing_enabled {
            if self.current_sense.channel.is_none() {
                return Err(ConfigError::MissingCurrentSense);
            }
            if !is_positive(self.homing.duty) || self.homing.duty > 1.0 {
                return Err(ConfigError::InvalidHomingDuty);
            }
        }

        Ok(())
    }

    /// Throttle slew permitted in a single tick, in percent.
    #[must_use]
    pub fn etb_step_limit(&self) -> f32 {
        self.etb.transition_rate * self.tick_period.as_secs_f32()
    }
}

// NaN compares false, so it is rejected along with zero and negatives.
fn is_positive(value: f32) -> bool {
    value > 0.0
}

impl Default for ServoConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            homing_enabled: false,
            etb_mode_enabled: false,
            direction_reversed: false,
            tick_period: Duration::from_millis(1),
            pid: PidGains::default(),
            min_position: 0.0,
            max_position: 100.0,
            dead_time: 0.02,
            current_sense: CurrentSense::default(),
            safety: SafetyConfig::default(),
            homing: HomingConfig::default(),
            etb: EtbConfig::default(),
            pedal: PedalConfig::default(),
            launch: LaunchConfig::default(),
            pins: PinAssignments::default(),
        }
    }
}

/// Reasons a configuration is rejected.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    MissingPin(PinRole),
    ZeroTickPeriod,
    ZeroPidPeriod,
    InvertedPositionRange,
    DeadTimeOutOfRange,
    InvalidCurrentLimit,
    InvalidTransitionRate,
    MissingCurrentSense,
    InvalidHomingDuty,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::MissingPin(role) => write!(f, "{role} pin is unassigned"),
            ConfigError::ZeroTickPeriod => f.write_str("tick period must be non-zero"),
            ConfigError::ZeroPidPeriod => f.write_str("PID period must be non-zero"),
            ConfigError::InvertedPositionRange => {
                f.write_str("minimum position must be below maximum position")
            }
            ConfigError::DeadTimeOutOfRange => f.write_str("dead time must be within [0, 1)"),
            ConfigError::InvalidCurrentLimit => f.write_str("overcurrent limit must be positive"),
            ConfigError::InvalidTransitionRate => {
                f.write_str("ETB transition rate must be positive")
            }
            ConfigError::MissingCurrentSense => {
                f.write_str("homing requires a current-sense channel")
            }
            ConfigError::InvalidHomingDuty => f.write_str("homing duty must be within (0, 1]"),
        }
    }
}
