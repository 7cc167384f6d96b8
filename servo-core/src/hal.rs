//! Hardware abstraction consumed by the controller.
//!
//! Pins and analog channels are referred to by board-level identifiers that the
//! configuration assigns. Implementations translate them into real GPIO/ADC
//! accesses (firmware), simulated plant lines (emulator), or recorded writes
//! (tests).

use core::fmt;

/// Board-level identifier for a digital line.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PinId(pub u8);

impl fmt::Display for PinId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pin{}", self.0)
    }
}

/// Board-level identifier for an analog input.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AnalogChannel(pub u8);

impl fmt::Display for AnalogChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "adc{}", self.0)
    }
}

/// Direction requested when a line is set up during initialization.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PinDirection {
    Input,
    Output,
}

/// Digital and analog I/O used by the servo.
pub trait LineIo {
    /// Configures the line for the requested direction.
    fn configure(&mut self, pin: PinId, direction: PinDirection);

    /// Samples a digital input.
    fn read_line(&mut self, pin: PinId) -> bool;

    /// Drives a digital output.
    fn set_line(&mut self, pin: PinId, high: bool);

    /// Samples an analog input, in volts.
    fn read_analog(&mut self, channel: AnalogChannel) -> f32;
}

/// Line implementation that reads everything low and discards writes.
#[derive(Copy, Clone, Debug, Default)]
pub struct NoopLines;

impl NoopLines {
    /// Creates a new no-op line driver.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl LineIo for NoopLines {
    fn configure(&mut self, _: PinId, _: PinDirection) {}

    fn read_line(&mut self, _: PinId) -> bool {
        false
    }

    fn set_line(&mut self, _: PinId, _: bool) {}

    fn read_analog(&mut self, _: AnalogChannel) -> f32 {
        0.0
    }
}
