//! Position loop built on the `pid` crate.
//!
//! Gains are configured per second and folded into per-evaluation gains using
//! the configured PID period, since the underlying controller has no notion of
//! time. The instance is rebuilt whenever the configuration changes.

use pid::Pid;

use crate::commutation::clamp_unit;
use crate::config::PidGains;

const OUTPUT_LIMIT: f32 = 1.0;

/// Fixed-period position loop producing a signed demand in `[-1, 1]`.
pub struct PositionLoop {
    pid: Pid<f32>,
    gains: PidGains,
    output: f32,
}

impl PositionLoop {
    #[must_use]
    pub fn new(gains: &PidGains) -> Self {
        Self {
            pid: build_pid(gains),
            gains: *gains,
            output: 0.0,
        }
    }

    /// Rebuilds the PID instance, dropping integral and derivative history.
    pub fn configure(&mut self, gains: &PidGains) {
        *self = Self::new(gains);
    }

    /// Clears loop history while keeping the current gains.
    pub fn reset(&mut self) {
        let gains = self.gains;
        self.configure(&gains);
    }

    /// Runs one evaluation.
    ///
    /// When either input is unavailable the loop is skipped entirely and
    /// `None` is returned; the previous output is left untouched.
    pub fn update(&mut self, setpoint: Option<f32>, observation: Option<f32>) -> Option<f32> {
        let (setpoint, observation) = (setpoint?, observation?);
        if !setpoint.is_finite() || !observation.is_finite() {
            return None;
        }

        self.pid.setpoint(setpoint);
        let output = self.pid.next_control_output(observation).output;
        self.output = clamp_unit(output);
        Some(self.output)
    }

    /// Most recent loop output.
    #[must_use]
    pub const fn output(&self) -> f32 {
        self.output
    }

    #[must_use]
    pub const fn gains(&self) -> &PidGains {
        &self.gains
    }
}

fn build_pid(gains: &PidGains) -> Pid<f32> {
    let dt = gains.period.as_secs_f32();
    let mut pid = Pid::new(0.0, OUTPUT_LIMIT);
    pid.p(gains.kp, OUTPUT_LIMIT)
        .i(gains.ki * dt, OUTPUT_LIMIT)
        .d(gains.kd / dt, OUTPUT_LIMIT);
    pid
}
