//! Text rendering of telemetry for the `status` command.
//!
//! Firmware and emulator front-ends share [`StatusFormatter`] so both print
//! identical lines.

use core::fmt;

use crate::faults::FaultSet;
use crate::telemetry::TelemetrySnapshot;

/// Renders a [`TelemetrySnapshot`] into human-readable lines.
#[derive(Clone, Copy, Debug)]
pub struct StatusFormatter<'a> {
    snapshot: &'a TelemetrySnapshot,
}

impl<'a> StatusFormatter<'a> {
    #[must_use]
    pub const fn new(snapshot: &'a TelemetrySnapshot) -> Self {
        Self { snapshot }
    }

    /// Writes the state line (e.g. `state idle homing=complete faults=none driver=on`).
    pub fn write_state_line<W: fmt::Write>(&self, writer: &mut W) -> fmt::Result {
        let snapshot = self.snapshot;
        write!(
            writer,
            "state {} homing={} faults={} driver={}",
            snapshot.state,
            snapshot.homing,
            FaultSet::from_bits(snapshot.fault_bits),
            on_off(snapshot.driver_enabled),
        )
    }

    /// Writes the position line (e.g. `position 42.0% target=45.0% pid=+0.150 hall=3 encoder=25`).
    pub fn write_position_line<W: fmt::Write>(&self, writer: &mut W) -> fmt::Result {
        let snapshot = self.snapshot;
        writer.write_str("position ")?;
        if snapshot.position_valid {
            write!(writer, "{:.1}%", snapshot.position)?;
        } else {
            writer.write_str("unknown")?;
        }
        write!(
            writer,
            " target={:.1}% pid={:+.3} hall={} encoder={}",
            snapshot.target, snapshot.pid_output, snapshot.hall_state, snapshot.encoder,
        )
    }

    /// Writes the current line (e.g. `current 1.20A peak=6.80A`).
    pub fn write_current_line<W: fmt::Write>(&self, writer: &mut W) -> fmt::Result {
        write!(
            writer,
            "current {:.2}A peak={:.2}A",
            self.snapshot.motor_current, self.snapshot.peak_current
        )
    }

    /// Writes the ETB line (e.g. `etb mode=on failsafe=off count=0 throttle=40.0% error=+0.4`).
    pub fn write_etb_line<W: fmt::Write>(&self, writer: &mut W) -> fmt::Result {
        let snapshot = self.snapshot;
        write!(
            writer,
            "etb mode={} failsafe={} count={} throttle={:.1}% error={:+.1}",
            on_off(snapshot.etb_mode),
            on_off(snapshot.failsafe_active),
            snapshot.failsafe_count,
            snapshot.throttle_target,
            snapshot.throttle_error,
        )
    }

    /// Writes every line, separated by `\n`.
    pub fn write_all<W: fmt::Write>(&self, writer: &mut W) -> fmt::Result {
        self.write_state_line(writer)?;
        writer.write_char('\n')?;
        self.write_position_line(writer)?;
        writer.write_char('\n')?;
        self.write_current_line(writer)?;
        writer.write_char('\n')?;
        self.write_etb_line(writer)
    }
}

const fn on_off(value: bool) -> &'static str {
    if value { "on" } else { "off" }
}
