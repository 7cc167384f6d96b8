//! Console tooling shared between firmware and emulator targets.
//!
//! [`grammar`] turns a line into a [`grammar::Command`], [`commands`] applies
//! it to a controller, and [`status`] renders telemetry for the `status`
//! command. Everything stays `no_std` and allocation free.

pub mod catalog;
pub mod commands;
pub mod grammar;
pub mod status;
