//! Throttle target calculation used while the servo holds ETB authority.
//!
//! The pedal request is raised by idle control, then reduced in a fixed order
//! by launch control, traction control, and the speed limiter.

use crate::config::{PedalConfig, PedalTable, ServoConfig};
use crate::hal::LineIo;
use crate::peers::{EnginePeers, IdleRequest, TractionRequest};

/// Multiplier applied to the throttle target while a speed limiter is engaged.
pub const SPEED_LIMITER_FACTOR: f32 = 0.10;

/// Inputs sampled once per tick for the throttle calculation.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct ThrottleInputs {
    /// Pedal sensor voltage, or `None` when no channel is assigned.
    pub pedal_voltage: Option<f32>,
    pub idle: IdleRequest,
    pub traction: TractionRequest,
    pub speed_limiter_engaged: bool,
    pub throttle_feedback: f32,
}

impl ThrottleInputs {
    /// Samples the pedal channel and every peer contribution.
    pub fn sample<L: LineIo, P: EnginePeers>(
        pedal: &PedalConfig,
        lines: &mut L,
        peers: &P,
    ) -> Self {
        Self {
            pedal_voltage: pedal.channel.map(|channel| lines.read_analog(channel)),
            idle: peers.idle_request(),
            traction: peers.traction_request(),
            speed_limiter_engaged: peers.speed_limiter_engaged(),
            throttle_feedback: peers.throttle_feedback(),
        }
    }
}

/// Clamps into `[0, 100]`, mapping NaN to zero.
#[must_use]
pub fn clamp_percent(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 100.0)
    }
}

/// Pedal position in percent.
///
/// Returns zero when the channel is unassigned or the idle/WOT calibration is
/// degenerate, whether or not a transfer table is configured.
#[must_use]
pub fn pedal_position(pedal: &PedalConfig, voltage: Option<f32>) -> f32 {
    let (Some(_), Some(volts)) = (pedal.channel, voltage) else {
        return 0.0;
    };

    let span = pedal.wot_voltage - pedal.idle_voltage;
    if span.is_nan() || span <= 0.0 {
        return 0.0;
    }

    let position = match &pedal.table {
        Some(table) => interpolate(table, volts),
        None => (volts - pedal.idle_voltage) / span * 100.0,
    };
    clamp_percent(position)
}

/// Piecewise-linear lookup, holding the end values outside the table.
#[must_use]
pub fn interpolate(table: &PedalTable, volts: f32) -> f32 {
    let last = table.voltages.len() - 1;
    if volts <= table.voltages[0] {
        return table.positions[0];
    }
    if volts >= table.voltages[last] {
        return table.positions[last];
    }

    for index in 0..last {
        let (low, high) = (table.voltages[index], table.voltages[index + 1]);
        if volts >= low && volts < high {
            let fraction = (volts - low) / (high - low);
            let (from, to) = (table.positions[index], table.positions[index + 1]);
            return from + fraction * (to - from);
        }
    }

    // Only reachable with non-ascending breakpoints.
    table.positions[last]
}

/// Computes the throttle target before rate limiting.
#[must_use]
pub fn compute_throttle_target(config: &ServoConfig, inputs: &ThrottleInputs) -> f32 {
    let pedal = pedal_position(&config.pedal, inputs.pedal_voltage);
    let idle = if inputs.idle.should_idle {
        clamp_percent(inputs.idle.target)
    } else {
        0.0
    };
    let mut target = pedal.max(idle);

    let launch = &config.launch;
    if launch.enabled && inputs.throttle_feedback < launch.tps_threshold {
        target = target.min(launch.throttle_limit);
    }

    if inputs.traction.enabled {
        target *= inputs.traction.factor.clamp(0.0, 1.0);
    }

    if inputs.speed_limiter_engaged {
        target *= SPEED_LIMITER_FACTOR;
    }

    clamp_percent(target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PEDAL_TABLE_SIZE;
    use crate::hal::AnalogChannel;

    fn close(a: f32, b: f32) -> bool {
        libm::fabsf(a - b) < 1e-3
    }

    fn pedal_config() -> ServoConfig {
        let mut config = ServoConfig::default();
        config.pedal.channel = Some(AnalogChannel(4));
        config.pedal.idle_voltage = 0.5;
        config.pedal.wot_voltage = 4.5;
        config
    }

    fn pedal_at(volts: f32) -> ThrottleInputs {
        ThrottleInputs {
            pedal_voltage: Some(volts),
            ..ThrottleInputs::default()
        }
    }

    #[test]
    fn linear_pedal_map_clamps_to_percent() {
        let config = pedal_config();
        assert!(close(pedal_position(&config.pedal, Some(2.5)), 50.0));
        assert_eq!(pedal_position(&config.pedal, Some(0.1)), 0.0);
        assert_eq!(pedal_position(&config.pedal, Some(5.0)), 100.0);
    }

    #[test]
    fn degenerate_calibration_reads_zero() {
        let mut config = pedal_config();
        config.pedal.wot_voltage = 0.5;
        assert_eq!(pedal_position(&config.pedal, Some(2.5)), 0.0);
    }

    #[test]
    fn unassigned_channel_reads_zero() {
        let mut config = pedal_config();
        config.pedal.channel = None;
        assert_eq!(pedal_position(&config.pedal, Some(2.5)), 0.0);
    }

    #[test]
    fn table_replaces_linear_map() {
        let mut config = pedal_config();
        let mut voltages = [0.0; PEDAL_TABLE_SIZE];
        let mut positions = [0.0; PEDAL_TABLE_SIZE];
        for index in 0..PEDAL_TABLE_SIZE {
            #[allow(clippy::cast_precision_loss)]
            let step = index as f32;
            voltages[index] = 0.5 + step * 0.5;
            positions[index] = step * step * 2.0;
        }
        config.pedal.table = Some(PedalTable { voltages, positions });

        assert!(close(pedal_position(&config.pedal, Some(1.0)), 2.0));
        assert!(close(pedal_position(&config.pedal, Some(1.25)), 5.0));
        assert!(close(pedal_position(&config.pedal, Some(9.0)), 98.0));
    }

    #[test]
    fn idle_only_raises_the_target() {
        let config = pedal_config();
        let mut inputs = pedal_at(0.9);
        inputs.idle = IdleRequest {
            should_idle: true,
            target: 4.0,
        };
        assert!(close(compute_throttle_target(&config, &inputs), 10.0));

        inputs.pedal_voltage = Some(0.5);
        assert!(close(compute_throttle_target(&config, &inputs), 4.0));
    }

    #[test]
    fn launch_clamp_applies_only_before_launch() {
        let mut config = pedal_config();
        config.launch.enabled = true;
        config.launch.tps_threshold = 3.0;
        config.launch.throttle_limit = 30.0;

        let mut inputs = pedal_at(4.5);
        inputs.throttle_feedback = 1.0;
        assert!(close(compute_throttle_target(&config, &inputs), 30.0));

        inputs.throttle_feedback = 12.0;
        assert!(close(compute_throttle_target(&config, &inputs), 100.0));
    }

    #[test]
    fn reductions_apply_in_order() {
        let mut config = pedal_config();
        config.launch.enabled = true;
        config.launch.throttle_limit = 40.0;

        let mut inputs = pedal_at(4.5);
        inputs.traction = TractionRequest {
            enabled: true,
            factor: 0.5,
        };
        inputs.speed_limiter_engaged = true;

        // 100 -> launch 40 -> traction 20 -> limiter 2
        assert!(close(compute_throttle_target(&config, &inputs), 2.0));
    }

    #[test]
    fn disabled_traction_ignores_factor() {
        let config = pedal_config();
        let mut inputs = pedal_at(2.5);
        inputs.traction = TractionRequest {
            enabled: false,
            factor: 0.0,
        };
        assert!(close(compute_throttle_target(&config, &inputs), 50.0));
    }
}
