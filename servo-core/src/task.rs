//! Scheduling seams between the controller and its host.
//!
//! Firmware drives the controller from an embassy ticker, while the emulator
//! and tests multiplex it with simulated plants on a synthetic clock through
//! [`TaskScheduler`].

use core::fmt;
use core::time::Duration;

use heapless::Vec;

use crate::timing::ControlInstant;

/// Work that must run at a fixed cadence.
pub trait PeriodicTask<I> {
    /// Interval between consecutive runs.
    fn period(&self) -> Duration;

    fn run(&mut self, now: I);
}

impl<I, T: PeriodicTask<I> + ?Sized> PeriodicTask<I> for &mut T {
    fn period(&self) -> Duration {
        (**self).period()
    }

    fn run(&mut self, now: I) {
        (**self).run(now);
    }
}

/// Minimal surface of a closed position loop.
pub trait ClosedLoopController {
    /// Measured position, or `None` while it is unknown.
    fn observation(&self) -> Option<f32>;

    /// Requested position, or `None` when nothing is being tracked.
    fn setpoint(&self) -> Option<f32>;

    /// Applies a signed demand in `[-1, 1]`.
    fn set_output(&mut self, output: f32);
}

/// Errors returned while registering tasks.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SchedulerError {
    Full,
}

impl fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedulerError::Full => f.write_str("task table is full"),
        }
    }
}

struct Slot<I, T> {
    task: T,
    next_due: Option<I>,
}

/// Cooperative scheduler over a fixed set of tasks of one type.
///
/// Hosts with several kinds of task wrap them in an enum that implements
/// [`PeriodicTask`]; `&mut T` implements it too, so borrowed tasks work.
/// Tasks run in registration order. A task that falls behind runs once and
/// then resumes its cadence from the current instant; missed periods are not
/// replayed.
pub struct TaskScheduler<I, T, const N: usize> {
    slots: Vec<Slot<I, T>, N>,
}

impl<I: ControlInstant, T: PeriodicTask<I>, const N: usize> TaskScheduler<I, T, N> {
    #[must_use]
    pub const fn new() -> Self {
        Self { slots: Vec::new() }
    }

    /// Adds a task. It first runs on the next poll.
    pub fn register(&mut self, task: T) -> Result<(), SchedulerError> {
        self.slots
            .push(Slot {
                task,
                next_due: None,
            })
            .map_err(|_| SchedulerError::Full)
    }

    /// Runs every task that is due at `now` and returns how many ran.
    pub fn poll(&mut self, now: I) -> usize {
        let mut ran = 0;
        for slot in &mut self.slots {
            let due = slot.next_due.is_none_or(|deadline| now >= deadline);
            if !due {
                continue;
            }

            slot.task.run(now);
            ran += 1;

            let period = slot.task.period();
            let mut next = slot.next_due.unwrap_or(now) + period;
            if next <= now {
                next = now + period;
            }
            slot.next_due = Some(next);
        }
        ran
    }

    /// Earliest instant at which some task becomes due.
    #[must_use]
    pub fn next_deadline(&self) -> Option<I> {
        self.slots.iter().filter_map(|slot| slot.next_due).min()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

impl<I: ControlInstant, T: PeriodicTask<I>, const N: usize> Default for TaskScheduler<I, T, N> {
    fn default() -> Self {
        Self::new()
    }
}
