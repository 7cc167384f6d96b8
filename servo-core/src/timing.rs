//! Clock abstraction shared by every timer in the controller.
//!
//! Timers are stored as deadlines (`Option<I>`) and compared against the
//! instant handed to each tick, so the same logic runs against embassy time on
//! target and against synthetic clocks in the emulator and tests.

use core::ops::Add;
use core::time::Duration;

/// Monotonic instant supplied by the scheduler on every tick.
pub trait ControlInstant: Copy + Ord + Add<Duration, Output = Self> {
    /// Returns the saturating duration from `earlier` to `self`.
    fn saturating_duration_since(&self, earlier: Self) -> Duration;
}

/// Time since boot is a perfectly good instant for host-side tooling.
impl ControlInstant for Duration {
    fn saturating_duration_since(&self, earlier: Self) -> Duration {
        self.saturating_sub(earlier)
    }
}

/// Returns `true` once `now` has reached the optional deadline.
///
/// An unarmed deadline is never due.
pub fn deadline_reached<I: ControlInstant>(deadline: Option<I>, now: I) -> bool {
    match deadline {
        Some(deadline) => now >= deadline,
        None => false,
    }
}

/// Returns `true` when a condition first observed at `since` has persisted for `dwell`.
pub fn dwell_elapsed<I: ControlInstant>(since: Option<I>, now: I, dwell: Duration) -> bool {
    since.is_some_and(|start| now.saturating_duration_since(start) >= dwell)
}
