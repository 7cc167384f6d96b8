#![no_std]

// This module must come first so the logging macros are visible everywhere else.
mod fmt;

// Control core for a hall-sensored BLDC throttle servo.
//
// The crate stays portable across MCU firmware and host tooling by avoiding the
// Rust standard library. Hardware, peer engine functions, and the clock are all
// injected through traits so the firmware and emulator crates can supply their
// own implementations.

pub mod commutation;
pub mod config;
pub mod controller;
pub mod faults;
pub mod hal;
pub mod hall;
pub mod homing;
pub mod peers;
pub mod position;
pub mod repl;
pub mod task;
pub mod telemetry;
pub mod throttle;
pub mod timing;
