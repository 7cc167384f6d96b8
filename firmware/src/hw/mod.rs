//! STM32G0 GPIO and ADC wiring for the throttle servo.
//!
//! Board pins are addressed by the [`PinId`] indices the configuration
//! assigns. Every line is a [`Flex`] so initialization can pick its direction
//! at run time, matching how the controller configures lines from the active
//! configuration.

#![cfg(target_os = "none")]

use embassy_stm32::adc::{Adc, AnyAdcChannel, SampleTime};
use embassy_stm32::gpio::{Flex, Pull, Speed};
use embassy_stm32::peripherals::ADC1;
use servo_core::config::{PinAssignments, ServoConfig};
use servo_core::hal::{AnalogChannel, LineIo, PinDirection, PinId};

/// Digital lines wired on the board, indexed by [`PinId`].
pub const LINE_COUNT: usize = 10;

pub const HALL_PINS: [PinId; 3] = [PinId(0), PinId(1), PinId(2)];
pub const HIGH_SIDE_PINS: [PinId; 3] = [PinId(3), PinId(4), PinId(5)];
pub const LOW_SIDE_PINS: [PinId; 3] = [PinId(6), PinId(7), PinId(8)];
pub const DRIVER_ENABLE_PIN: PinId = PinId(9);
pub const CURRENT_CHANNEL: AnalogChannel = AnalogChannel(0);
pub const PEDAL_CHANNEL: AnalogChannel = AnalogChannel(1);

/// ADC reference voltage.
const VREF_VOLTS: f32 = 3.3;
const ADC_FULL_SCALE: f32 = 4095.0;

/// Configuration matching the board wiring.
pub fn board_config() -> ServoConfig {
    let mut config = ServoConfig {
        enabled: true,
        homing_enabled: true,
        pins: PinAssignments {
            hall: HALL_PINS.map(Some),
            high_side: HIGH_SIDE_PINS.map(Some),
            low_side: LOW_SIDE_PINS.map(Some),
            driver_enable: Some(DRIVER_ENABLE_PIN),
        },
        ..ServoConfig::default()
    };
    config.current_sense.channel = Some(CURRENT_CHANNEL);
    config.current_sense.offset_volts = 1.65;
    config.pedal.channel = Some(PEDAL_CHANNEL);
    config
}

/// [`LineIo`] over the board's GPIO and ADC1.
pub struct BoardLines<'d> {
    lines: [Flex<'d>; LINE_COUNT],
    adc: Adc<'d, ADC1>,
    analog: [AnyAdcChannel<ADC1>; 2],
}

impl<'d> BoardLines<'d> {
    pub fn new(
        lines: [Flex<'d>; LINE_COUNT],
        mut adc: Adc<'d, ADC1>,
        analog: [AnyAdcChannel<ADC1>; 2],
    ) -> Self {
        adc.set_sample_time(SampleTime::CYCLES160_5);
        Self { lines, adc, analog }
    }

    fn line(&mut self, pin: PinId) -> Option<&mut Flex<'d>> {
        self.lines.get_mut(usize::from(pin.0))
    }
}

impl LineIo for BoardLines<'_> {
    fn configure(&mut self, pin: PinId, direction: PinDirection) {
        let Some(line) = self.line(pin) else {
            defmt::warn!("configure on unwired {}", pin);
            return;
        };
        match direction {
            PinDirection::Input => line.set_as_input(Pull::Up),
            PinDirection::Output => {
                line.set_low();
                line.set_as_output(Speed::VeryHigh);
            }
        }
    }

    fn read_line(&mut self, pin: PinId) -> bool {
        self.line(pin).is_some_and(|line| line.is_high())
    }

    fn set_line(&mut self, pin: PinId, high: bool) {
        if let Some(line) = self.line(pin) {
            if high {
                line.set_high();
            } else {
                line.set_low();
            }
        }
    }

    fn read_analog(&mut self, channel: AnalogChannel) -> f32 {
        let Some(input) = self.analog.get_mut(usize::from(channel.0)) else {
            return 0.0;
        };
        let raw = self.adc.blocking_read(input);
        f32::from(raw) * VREF_VOLTS / ADC_FULL_SCALE
    }
}
